//! `taskmon worker`: a demonstration writer.
//!
//! Registers a root task plus one child per thread, reports progress on each
//! step and releases every slot on the way out.

use crate::logging::{info, warn};
use crate::registry::TaskRegistry;
use crate::storage::SlotStorage;
use crate::task_record::{SlotToken, TaskState, TaskUpdate};
use anyhow::{anyhow, Result};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub name: String,
    pub children: usize,
    pub steps: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub root_slot: usize,
    pub child_slots: Vec<usize>,
    pub steps: u32,
}

pub fn run_worker<S: SlotStorage>(
    registry: &TaskRegistry<S>,
    options: &WorkerOptions,
) -> Result<WorkerSummary> {
    let root = registry.register(&options.name, None)?;
    let result = supervise(registry, root, options);
    registry.release(root)?;
    let child_slots = result?;

    info(format!(
        "worker `{}` finished: {} children, {} steps",
        options.name,
        child_slots.len(),
        options.steps
    ));
    Ok(WorkerSummary {
        root_slot: root.index(),
        child_slots,
        steps: options.steps,
    })
}

fn supervise<S: SlotStorage>(
    registry: &TaskRegistry<S>,
    root: SlotToken,
    options: &WorkerOptions,
) -> Result<Vec<usize>> {
    registry.update(
        &root,
        &TaskUpdate::new()
            .state(TaskState::WAITING)
            .status(format!("waiting for {} children", options.children))
            .progress(0, 0, options.children as i64),
    )?;

    let results = crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = (0..options.children)
            .map(|n| scope.spawn(move |_| run_child(registry, root, n, options)))
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (done, handle) in handles.into_iter().enumerate() {
            let result = handle
                .join()
                .map_err(|_| anyhow!("child {done} panicked"))
                .and_then(|r| r);
            if result.is_ok() {
                let progress =
                    TaskUpdate::new().progress(0, done as i64 + 1, options.children as i64);
                if let Err(err) = registry.update(&root, &progress) {
                    warn(format!("could not record progress on slot {}: {err}", root.index()));
                }
            }
            results.push(result);
        }
        results
    })
    .map_err(|_| anyhow!("worker scope panicked"))?;

    results.into_iter().collect()
}

fn run_child<S: SlotStorage>(
    registry: &TaskRegistry<S>,
    root: SlotToken,
    n: usize,
    options: &WorkerOptions,
) -> Result<usize> {
    let token = registry.register(&options.name, Some(root.index()))?;
    let result = report_steps(registry, &token, n, options);
    registry.release(token)?;
    result.map(|()| token.index())
}

fn report_steps<S: SlotStorage>(
    registry: &TaskRegistry<S>,
    token: &SlotToken,
    n: usize,
    options: &WorkerOptions,
) -> Result<()> {
    let steps = i64::from(options.steps);
    registry.update(
        token,
        &TaskUpdate::new()
            .task_name(format!("child-{n}"))
            .task_id(n as u64)
            .status("queued"),
    )?;

    for step in 0..=options.steps {
        registry.update(
            token,
            &TaskUpdate::new()
                .state(TaskState::RUNNING)
                .message(format!("step {step}/{}", options.steps))
                .status(format!("processing chunk {step}"))
                .progress(0, i64::from(step), steps),
        )?;
        if step < options.steps {
            thread::sleep(options.interval);
        }
    }
    Ok(())
}
