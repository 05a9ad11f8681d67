//! `taskmon ps`: snapshot, select, order and print.

use crate::core::snapshot::Snapshot;
use crate::query::{QueryFilters, QueryRow, TaskQuery};
use crate::registry::TaskRegistry;
use crate::render::{StatePalette, StatusRenderer};
use crate::storage::SlotStorage;
use anyhow::{Context, Result};
use std::io::Write;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsOptions {
    pub tokens: Vec<String>,
    pub grep: Option<String>,
    pub pids: Vec<u32>,
    pub tasks: Vec<usize>,
    pub json: bool,
    pub color: bool,
}

impl PsOptions {
    /// Positional tokens are classified against `snapshot`; `--pid` and
    /// `--task` values are taken as given.
    pub fn filters(&self, snapshot: &Snapshot) -> QueryFilters {
        let mut filters = QueryFilters::from_tokens(&self.tokens, snapshot);
        if let Some(term) = &self.grep {
            filters = filters.grep(term.as_str());
        }
        filters.pids.extend(&self.pids);
        filters.task_slots.extend(&self.tasks);
        filters
    }
}

pub fn run_ps<S, W>(
    registry: &TaskRegistry<S>,
    options: &PsOptions,
    palette: StatePalette,
    out: &mut W,
) -> Result<()>
where
    S: SlotStorage,
    W: Write,
{
    let snapshot = registry.snapshot();
    let query = TaskQuery::new(&snapshot, options.filters(&snapshot));
    let rows = query.run();
    write_rows(&rows, &snapshot, options, palette, out)
}

fn write_rows<W: Write>(
    rows: &[QueryRow<'_>],
    snapshot: &Snapshot,
    options: &PsOptions,
    palette: StatePalette,
    out: &mut W,
) -> Result<()> {
    if options.json {
        serde_json::to_writer_pretty(&mut *out, rows).context("failed to encode rows")?;
        writeln!(out)?;
    } else {
        StatusRenderer::new(palette)
            .with_color(options.color)
            .at(snapshot.captured_at())
            .render(out, rows)
            .context("failed to write listing")?;
    }
    Ok(())
}
