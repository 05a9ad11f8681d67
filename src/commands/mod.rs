//! Subcommands of the `taskmon` binary.

pub mod maintenance;
pub mod parser;
pub mod ps;
pub mod worker;

pub use parser::{Cli, Commands, RegistryArgs};

use crate::config::RegistryConfig;
use crate::registry::TaskRegistry;
use crate::render::StatePalette;
use crate::storage::SlotStorage;
use anyhow::{Context, Result};
use ps::PsOptions;
use std::io::{self, Write};
use std::time::Duration;
use worker::WorkerOptions;

/// Environment configuration overridden by command-line flags.
pub fn resolve_config(args: &RegistryArgs) -> RegistryConfig {
    let mut config = RegistryConfig::from_env();
    if let Some(namespace) = &args.namespace {
        config = config.with_namespace(namespace.clone());
    }
    if let Some(capacity) = args.capacity {
        config = config.with_capacity(capacity);
    }
    config
}

pub fn execute(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli.registry);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Commands::Clean = cli.command {
        if cli.registry.in_process {
            writeln!(out, "Nothing to clean for an in-process table")?;
            return Ok(());
        }
        maintenance::run_clean(&config.namespace, &mut out)?;
        return Ok(());
    }

    if cli.registry.in_process {
        let registry = TaskRegistry::in_process(config.capacity);
        dispatch(&registry, &cli.command, &config, &mut out)
    } else {
        let registry = TaskRegistry::shared_memory(&config)
            .with_context(|| format!("failed to attach to task table `{}`", config.namespace))?;
        dispatch(&registry, &cli.command, &config, &mut out)
    }
}

fn dispatch<S, W>(
    registry: &TaskRegistry<S>,
    command: &Commands,
    config: &RegistryConfig,
    out: &mut W,
) -> Result<()>
where
    S: SlotStorage,
    W: Write,
{
    match command {
        Commands::Ps {
            tokens,
            grep,
            pids,
            tasks,
            json,
            no_color,
        } => {
            let options = PsOptions {
                tokens: tokens.clone(),
                grep: grep.clone(),
                pids: pids.clone(),
                tasks: tasks.clone(),
                json: *json,
                color: !*no_color && !*json,
            };
            ps::run_ps(registry, &options, StatePalette::from_config(config), out)
        }
        Commands::Worker {
            name,
            children,
            steps,
            interval_ms,
        } => {
            let options = WorkerOptions {
                name: name.clone(),
                children: *children,
                steps: *steps,
                interval: Duration::from_millis(*interval_ms),
            };
            let summary = worker::run_worker(registry, &options)?;
            writeln!(
                out,
                "worker `{}` done: root slot {}, {} children, {} steps",
                name,
                summary.root_slot,
                summary.child_slots.len(),
                summary.steps
            )?;
            Ok(())
        }
        Commands::Sweep => maintenance::run_sweep(registry, out).map(|_| ()),
        Commands::Clean => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = RegistryArgs {
            namespace: Some("taskmon-flag".to_string()),
            capacity: Some(12),
            ..RegistryArgs::default()
        };
        let config = resolve_config(&args);
        assert_eq!(config.namespace, "taskmon-flag");
        assert_eq!(config.capacity, 12);
    }

    #[test]
    fn test_dispatch_ps_in_process() {
        let registry = TaskRegistry::in_process(4);
        registry.register_for_pid("sim", None, 4242).unwrap();
        let command = Commands::Ps {
            tokens: vec!["sim".to_string()],
            grep: None,
            pids: vec![],
            tasks: vec![],
            json: false,
            no_color: true,
        };

        let mut out = Vec::new();
        dispatch(&registry, &command, &RegistryConfig::default(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
