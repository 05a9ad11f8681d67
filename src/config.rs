use crate::logging::warn;
use std::time::Duration;

pub const SHARED_NAMESPACE: &str = "taskmon-registry";
// Default slot count for the task table. Each slot is 448 bytes, so the
// default segment stays under 128KB.
pub const DEFAULT_CAPACITY: usize = 256;
// Upper bound accepted from env/CLI; keeps a typo from mapping gigabytes.
pub const MAX_CAPACITY: usize = 65_536;

pub const NAMESPACE_ENV: &str = "TASKMON_NAMESPACE";
pub const CAPACITY_ENV: &str = "TASKMON_CAPACITY";
pub const SUSPENDED_STATES_ENV: &str = "TASKMON_SUSPENDED_STATES";
pub const TERMINATED_STATES_ENV: &str = "TASKMON_TERMINATED_STATES";

pub const DEFAULT_SUSPENDED_STATES: &str = "TVPX";
pub const DEFAULT_TERMINATED_STATES: &str = "ZL";

/// Spins per attempt for a reader racing a slot writer.
pub const SNAPSHOT_READ_RETRIES: usize = 64;
/// How long a reader waits on a slot stuck mid-write before reporting it
/// blank.
pub const STALLED_READ_WAIT: Duration = Duration::from_millis(20);

/// Resolved registry settings: defaults, then environment, then CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub namespace: String,
    pub capacity: usize,
    pub suspended_states: Vec<char>,
    pub terminated_states: Vec<char>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            namespace: SHARED_NAMESPACE.to_string(),
            capacity: DEFAULT_CAPACITY,
            suspended_states: DEFAULT_SUSPENDED_STATES.chars().collect(),
            terminated_states: DEFAULT_TERMINATED_STATES.chars().collect(),
        }
    }
}

impl RegistryConfig {
    /// Defaults overlaid with the `TASKMON_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RegistryConfig::from_env`] but reads values through `lookup`,
    /// so callers (and tests) can supply their own source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(namespace) = lookup(NAMESPACE_ENV) {
            let namespace = namespace.trim();
            if namespace.is_empty() {
                warn(format!("ignoring empty {NAMESPACE_ENV}"));
            } else {
                config.namespace = namespace.to_string();
            }
        }

        if let Some(raw) = lookup(CAPACITY_ENV) {
            match parse_capacity(&raw) {
                Some(capacity) => config.capacity = capacity,
                None => warn(format!(
                    "ignoring invalid {CAPACITY_ENV}={raw:?} (expected 1..={MAX_CAPACITY})"
                )),
            }
        }

        if let Some(raw) = lookup(SUSPENDED_STATES_ENV) {
            config.suspended_states = parse_states(&raw);
        }
        if let Some(raw) = lookup(TERMINATED_STATES_ENV) {
            config.terminated_states = parse_states(&raw);
        }

        config
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.clamp(1, MAX_CAPACITY);
        self
    }
}

pub fn parse_capacity(raw: &str) -> Option<usize> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|capacity| (1..=MAX_CAPACITY).contains(capacity))
}

/// State alphabets are plain character lists; separators and whitespace are
/// dropped so `"T,V P"` and `"TVP"` mean the same thing.
pub fn parse_states(raw: &str) -> Vec<char> {
    let mut states = Vec::new();
    for c in raw.chars().filter(|c| !c.is_whitespace() && *c != ',') {
        if !states.contains(&c) {
            states.push(c);
        }
    }
    states
}
