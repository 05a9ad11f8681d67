use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Single-character lifecycle signal written by the task owner.
///
/// The alphabet is open: the registry stores whatever character the owner
/// reports, and the renderer classifies it through a configurable palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskState(pub char);

impl TaskState {
    pub const RUNNING: TaskState = TaskState('R');
    pub const WAITING: TaskState = TaskState('W');
    pub const SLEEPING: TaskState = TaskState('S');
    pub const STOPPED: TaskState = TaskState('T');
    pub const PAUSED: TaskState = TaskState('P');
    pub const ZOMBIE: TaskState = TaskState('Z');
    pub const LOST: TaskState = TaskState('L');

    pub fn as_char(self) -> char {
        self.0
    }

    pub(crate) fn from_code(code: u32) -> Self {
        TaskState(char::from_u32(code).filter(|c| *c != '\0').unwrap_or(' '))
    }
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::RUNNING
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time copy of one registry slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub slot_index: usize,
    /// Occupancy number of the slot; changes every time the slot is reused.
    pub generation: u64,
    pub parent_slot: Option<usize>,
    /// Generation the parent slot held when this task registered; a parent
    /// slot with any other generation has been reused.
    pub parent_generation: u64,
    pub application_name: String,
    pub task_name: String,
    pub depth: u32,
    pub pid: u32,
    pub task_id: u64,
    pub state: TaskState,
    pub status_text: String,
    pub message: String,
    pub progress_min: i64,
    pub progress_val: i64,
    pub progress_max: i64,
    pub last_heartbeat: DateTime<Utc>,
    pub busy: bool,
    pub visible: bool,
}

impl TaskRecord {
    /// A never-occupied slot.
    pub fn vacant(slot_index: usize) -> Self {
        Self {
            slot_index,
            generation: 0,
            parent_slot: None,
            parent_generation: 0,
            application_name: String::new(),
            task_name: String::new(),
            depth: 0,
            pid: 0,
            task_id: 0,
            state: TaskState(' '),
            status_text: String::new(),
            message: String::new(),
            progress_min: 0,
            progress_val: 0,
            progress_max: 0,
            last_heartbeat: DateTime::<Utc>::default(),
            busy: false,
            visible: false,
        }
    }

    /// Name shown in listings; falls back to the application name.
    pub fn display_name(&self) -> &str {
        if self.task_name.is_empty() {
            &self.application_name
        } else {
            &self.task_name
        }
    }

    pub fn progress_active(&self) -> bool {
        self.progress_max != self.progress_min
    }

    /// Completion percentage, only when progress is active.
    pub fn progress_percent(&self) -> Option<f64> {
        if !self.progress_active() {
            return None;
        }
        // bounds may sit anywhere in i64, so subtract as floats
        let min = self.progress_min as f64;
        let span = self.progress_max as f64 - min;
        Some((self.progress_val as f64 - min) * 100.0 / span)
    }

    pub fn is_root(&self) -> bool {
        self.parent_slot.is_none()
    }

    /// Seconds since the last heartbeat, clamped at zero for clock skew.
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_heartbeat)
            .num_seconds()
            .max(0)
    }

    pub fn is_listed(&self) -> bool {
        self.busy && self.visible
    }
}

/// Proof of ownership for one occupancy of a slot, handed out by
/// `register`. Stale tokens (after `release` or slot reuse) are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotToken {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

impl SlotToken {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owner-side mutation. Unset fields keep their current value; every update
/// refreshes the heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub task_name: Option<String>,
    pub state: Option<TaskState>,
    pub status_text: Option<String>,
    pub message: Option<String>,
    pub progress: Option<(i64, i64, i64)>,
    pub task_id: Option<u64>,
    pub visible: Option<bool>,
    pub pid: Option<u32>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = Some(name.into());
        self
    }

    pub fn state(mut self, state: TaskState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status_text = Some(status.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set progress bounds and current value. Equal bounds switch progress off.
    pub fn progress(mut self, min: i64, val: i64, max: i64) -> Self {
        self.progress = Some((min, val, max));
        self
    }

    pub fn clear_progress(self) -> Self {
        self.progress(0, 0, 0)
    }

    pub fn task_id(mut self, task_id: u64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_record() -> TaskRecord {
        TaskRecord {
            slot_index: 0,
            generation: 1,
            parent_slot: None,
            parent_generation: 0,
            application_name: "sim".to_string(),
            task_name: "sim".to_string(),
            depth: 0,
            pid: 4242,
            task_id: 7,
            state: TaskState::RUNNING,
            status_text: String::new(),
            message: String::new(),
            progress_min: 0,
            progress_val: 0,
            progress_max: 0,
            last_heartbeat: Utc::now(),
            busy: true,
            visible: true,
        }
    }

    #[test]
    fn test_progress_percent() {
        let mut record = sample_record();
        assert_eq!(record.progress_percent(), None);

        record.progress_max = 200;
        record.progress_val = 50;
        assert_eq!(record.progress_percent(), Some(25.0));

        record.progress_min = 200;
        assert!(!record.progress_active());
        assert_eq!(record.progress_percent(), None);
    }

    #[test]
    fn test_progress_percent_extreme_bounds() {
        let mut record = sample_record();
        record.progress_min = i64::MIN;
        record.progress_val = 0;
        record.progress_max = i64::MAX;
        assert_eq!(record.progress_percent(), Some(50.0));

        record.progress_val = i64::MIN;
        assert_eq!(record.progress_percent(), Some(0.0));

        record.progress_min = i64::MAX;
        record.progress_max = i64::MIN;
        record.progress_val = i64::MAX;
        assert_eq!(record.progress_percent(), Some(0.0));
    }

    #[test]
    fn test_idle_seconds_clamps_future_heartbeat() {
        let mut record = sample_record();
        let now = Utc::now();
        record.last_heartbeat = now + Duration::seconds(30);
        assert_eq!(record.idle_seconds(now), 0);

        record.last_heartbeat = now - Duration::seconds(125);
        assert_eq!(record.idle_seconds(now), 125);
    }

    #[test]
    fn test_state_from_code() {
        assert_eq!(TaskState::from_code('Z' as u32), TaskState::ZOMBIE);
        assert_eq!(TaskState::from_code(0), TaskState(' '));
        assert_eq!(TaskState::from_code(0xD800), TaskState(' '));
    }

    #[test]
    fn test_update_builder() {
        let update = TaskUpdate::new()
            .state(TaskState::WAITING)
            .status("queued behind 3 jobs")
            .progress(0, 1, 10);
        assert_eq!(update.state, Some(TaskState::WAITING));
        assert_eq!(update.progress, Some((0, 1, 10)));
        assert_eq!(update.message, None);
    }

    #[test]
    fn test_record_serialization_roundtrip() {
        let record = sample_record();
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains("\"state\":\"R\""));
        let back: TaskRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
    }
}
