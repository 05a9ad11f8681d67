//! Row selection and ordering for the `ps` listing.

use crate::core::lineage::LineageResolver;
use crate::core::snapshot::Snapshot;
use crate::task_record::TaskRecord;
use serde::Serialize;

/// How a positional `ps` argument is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterToken {
    Name(String),
    TaskSlot(usize),
    Pid(u32),
}

/// Classify a positional token: a number naming a live slot is a task
/// filter, any other number that fits a pid is a pid filter, and everything
/// else (including numbers too large for either) is a name filter.
pub fn classify_token(token: &str, snapshot: &Snapshot) -> FilterToken {
    if let Ok(number) = token.parse::<u64>() {
        if let Ok(slot) = usize::try_from(number) {
            if snapshot.occupied(slot).is_some() {
                return FilterToken::TaskSlot(slot);
            }
        }
        if let Ok(pid) = u32::try_from(number) {
            return FilterToken::Pid(pid);
        }
    }
    FilterToken::Name(token.to_string())
}

/// Selection filters (OR'ed together) plus the highlight-only grep term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilters {
    pub grep: Option<String>,
    pub names: Vec<String>,
    pub task_slots: Vec<usize>,
    pub pids: Vec<u32>,
}

impl QueryFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters from positional tokens, classified against `snapshot`.
    pub fn from_tokens<I, T>(tokens: I, snapshot: &Snapshot) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        tokens
            .into_iter()
            .fold(Self::new(), |filters, token| {
                match classify_token(token.as_ref(), snapshot) {
                    FilterToken::Name(name) => filters.name(name),
                    FilterToken::TaskSlot(slot) => filters.task_slot(slot),
                    FilterToken::Pid(pid) => filters.pid(pid),
                }
            })
    }

    pub fn grep(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        self.grep = (!term.is_empty()).then_some(term);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    pub fn task_slot(mut self, slot: usize) -> Self {
        self.task_slots.push(slot);
        self
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pids.push(pid);
        self
    }

    /// No selection filter: every listed task is shown.
    pub fn is_all(&self) -> bool {
        self.names.is_empty() && self.task_slots.is_empty() && self.pids.is_empty()
    }

    pub fn grep_matches(&self, record: &TaskRecord) -> bool {
        self.grep
            .as_deref()
            .is_some_and(|term| record.status_text.contains(term))
    }
}

/// One selected task, in display order.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRow<'a> {
    /// Position in the unfiltered ordering; stable across filters.
    pub ordinal: usize,
    #[serde(flatten)]
    pub record: &'a TaskRecord,
    pub grep_match: bool,
}

pub struct TaskQuery<'a> {
    lineage: LineageResolver<'a>,
    filters: QueryFilters,
}

impl<'a> TaskQuery<'a> {
    pub fn new(snapshot: &'a Snapshot, filters: QueryFilters) -> Self {
        Self {
            lineage: LineageResolver::new(snapshot),
            filters,
        }
    }

    pub fn filters(&self) -> &QueryFilters {
        &self.filters
    }

    /// Busy, visible slots sorted by root application name, then ancestor
    /// chain.
    pub fn ordered_candidates(&self) -> Vec<usize> {
        let mut candidates: Vec<usize> = self
            .lineage
            .snapshot()
            .listed()
            .map(|record| record.slot_index)
            .collect();
        candidates.sort_by_cached_key(|&slot| self.lineage.sort_key(slot));
        candidates
    }

    pub fn matches(&self, slot: usize) -> bool {
        if self.filters.is_all() {
            return true;
        }
        let Some(record) = self.lineage.snapshot().get(slot) else {
            return false;
        };

        self.filters
            .names
            .iter()
            .any(|name| self.lineage.is_descendant_of_named(name, slot))
            || self
                .filters
                .task_slots
                .iter()
                .any(|&task| self.lineage.is_related(task, slot))
            || self.filters.pids.contains(&record.pid)
    }

    pub fn run(&self) -> Vec<QueryRow<'a>> {
        let snapshot = self.lineage.snapshot();
        self.ordered_candidates()
            .into_iter()
            .enumerate()
            .filter(|&(_, slot)| self.matches(slot))
            .filter_map(|(ordinal, slot)| {
                let record = snapshot.get(slot)?;
                Some(QueryRow {
                    ordinal,
                    record,
                    grep_match: self.filters.grep_matches(record),
                })
            })
            .collect()
    }
}
