//! Parent/child resolution over a registry snapshot.
//!
//! Walks follow `parent_slot` links upward. A link to a slot that is no
//! longer busy, has been reused by another task (different generation), or
//! is out of range ends the walk: that task is treated as the top of its
//! lineage. Every walk visits each slot at most once, so it is
//! bounded by the snapshot capacity; revisiting a slot means the table holds
//! a cycle, which is logged and cut at the repeat.

use crate::core::snapshot::Snapshot;
use crate::error::RegistryError;
use crate::logging::warn;
use crate::task_record::TaskRecord;

/// Ancestors of a slot, the slot itself first and the top of the lineage last.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Ancestry {
    path: Vec<usize>,
    corrupted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LineageResolver<'a> {
    snapshot: &'a Snapshot,
}

impl<'a> LineageResolver<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    fn parent_of(&self, slot: usize) -> Option<usize> {
        let record = self.snapshot.get(slot)?;
        let parent = record.parent_slot?;
        self.snapshot
            .occupied(parent)
            .filter(|occupant| occupant.generation == record.parent_generation)
            .map(|_| parent)
    }

    fn walk(&self, slot: usize) -> Ancestry {
        let capacity = self.snapshot.capacity();
        let mut path = vec![slot];
        if slot >= capacity {
            return Ancestry {
                path,
                corrupted: false,
            };
        }

        let mut visited = vec![false; capacity];
        visited[slot] = true;
        let mut current = slot;
        let mut corrupted = false;

        while let Some(parent) = self.parent_of(current) {
            if visited[parent] {
                corrupted = true;
                warn(format!(
                    "{} (slot {parent} repeats); chain truncated",
                    RegistryError::CorruptedLineage {
                        slot,
                        hops: path.len(),
                    }
                ));
                break;
            }
            visited[parent] = true;
            path.push(parent);
            current = parent;
        }

        Ancestry { path, corrupted }
    }

    /// Top-most reachable ancestor of `slot` (possibly `slot` itself).
    pub fn top(&self, slot: usize) -> usize {
        self.walk(slot).path.last().copied().unwrap_or(slot)
    }

    fn top_record(&self, slot: usize) -> Option<&'a TaskRecord> {
        self.snapshot.get(self.top(slot))
    }

    /// Application name of the lineage's root; empty for unknown slots.
    pub fn root_name(&self, slot: usize) -> &'a str {
        self.top_record(slot)
            .map(|record| record.application_name.as_str())
            .unwrap_or("")
    }

    /// Ancestor path from the root down to `slot`, inclusive. Never empty and
    /// always ends with `slot`.
    pub fn chain(&self, slot: usize) -> Vec<usize> {
        let mut path = self.walk(slot).path;
        path.reverse();
        path
    }

    /// Like [`LineageResolver::chain`] but reports a cycle instead of
    /// truncating it.
    pub fn try_chain(&self, slot: usize) -> Result<Vec<usize>, RegistryError> {
        let ancestry = self.walk(slot);
        if ancestry.corrupted {
            return Err(RegistryError::CorruptedLineage {
                slot,
                hops: ancestry.path.len(),
            });
        }
        let mut path = ancestry.path;
        path.reverse();
        Ok(path)
    }

    /// True when the lineage of `slot` ends in a root task whose application
    /// is `name`.
    pub fn is_descendant_of_named(&self, name: &str, slot: usize) -> bool {
        self.snapshot.get(slot).is_some()
            && self
                .top_record(slot)
                .is_some_and(|record| record.application_name == name)
    }

    /// `a` and `b` are the same task or one is an ancestor of the other.
    pub fn is_related(&self, a: usize, b: usize) -> bool {
        a == b || self.walk(b).path.contains(&a) || self.walk(a).path.contains(&b)
    }

    /// Display ordering key: tasks grouped by root application name, then by
    /// ancestor chain so parents precede their descendants.
    pub fn sort_key(&self, slot: usize) -> (String, Vec<usize>) {
        (self.root_name(slot).to_string(), self.chain(slot))
    }
}
