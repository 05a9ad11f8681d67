//! `taskmon sweep` and `taskmon clean`.

use crate::platform;
use crate::registry::{CleanupEvent, TaskRegistry};
use crate::storage::{SharedMemoryStorage, SlotStorage};
use anyhow::{Context, Result};
use colored::Colorize;
use std::io::Write;

/// Reclaim slots of exited owners and report each one.
pub fn run_sweep<S, W>(registry: &TaskRegistry<S>, out: &mut W) -> Result<Vec<CleanupEvent>>
where
    S: SlotStorage,
    W: Write,
{
    sweep_with(registry, platform::process_alive, out)
}

fn sweep_with<S, W, F>(registry: &TaskRegistry<S>, is_alive: F, out: &mut W) -> Result<Vec<CleanupEvent>>
where
    S: SlotStorage,
    W: Write,
    F: Fn(u32) -> bool,
{
    let events = registry.sweep_dead_owners(is_alive)?;
    if events.is_empty() {
        writeln!(out, "No orphaned slots")?;
    }
    for event in &events {
        writeln!(
            out,
            "reclaimed slot {} ({}, pid {})",
            event.slot.to_string().yellow(),
            event.record.display_name(),
            event.record.pid
        )?;
    }
    Ok(events)
}

/// Unlink the shared table `namespace`.
pub fn run_clean<W: Write>(namespace: &str, out: &mut W) -> Result<bool> {
    let removed = SharedMemoryStorage::unlink(namespace)
        .with_context(|| format!("failed to remove task table `{namespace}`"))?;
    if removed {
        writeln!(out, "Removed task table {}", namespace.cyan())?;
    } else {
        writeln!(out, "No task table named {}", namespace.cyan())?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_reports_reclaimed_slots() {
        colored::control::set_override(false);
        let registry = TaskRegistry::in_process(4);
        registry.register_for_pid("sim", None, 11).unwrap();
        registry.register_for_pid("post", None, 22).unwrap();

        let mut out = Vec::new();
        let events = sweep_with(&registry, |pid| pid == 11, &mut out).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "reclaimed slot 1 (post, pid 22)\n"
        );
    }

    #[test]
    fn test_sweep_nothing_to_do() {
        let registry = TaskRegistry::in_process(2);
        registry.register("sim", None).unwrap();

        let mut out = Vec::new();
        let events = run_sweep(&registry, &mut out).unwrap();
        assert!(events.is_empty());
        assert_eq!(String::from_utf8(out).unwrap(), "No orphaned slots\n");
    }
}
