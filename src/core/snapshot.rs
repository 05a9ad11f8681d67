use crate::task_record::TaskRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time copy of every slot of a registry, indexed by slot.
///
/// Each record was copied consistently with respect to its own writer;
/// records of different slots may come from slightly different moments.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    captured_at: DateTime<Utc>,
    slots: Vec<TaskRecord>,
}

impl Snapshot {
    /// `slots[i]` must describe slot `i`.
    pub fn new(captured_at: DateTime<Utc>, slots: Vec<TaskRecord>) -> Self {
        debug_assert!(slots.iter().enumerate().all(|(i, r)| r.slot_index == i));
        Self { captured_at, slots }
    }

    /// Build a snapshot of `capacity` slots from loose records, placing each
    /// at its `slot_index`; slots without a record are vacant. Records beyond
    /// `capacity` are dropped.
    pub fn from_records(
        captured_at: DateTime<Utc>,
        capacity: usize,
        records: impl IntoIterator<Item = TaskRecord>,
    ) -> Self {
        let mut slots: Vec<TaskRecord> = (0..capacity).map(TaskRecord::vacant).collect();
        for record in records {
            if let Some(slot) = slots.get_mut(record.slot_index) {
                *slot = record;
            }
        }
        Self { captured_at, slots }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: usize) -> Option<&TaskRecord> {
        self.slots.get(slot)
    }

    /// The record at `slot` if that slot currently holds a live task.
    pub fn occupied(&self, slot: usize) -> Option<&TaskRecord> {
        self.get(slot).filter(|record| record.busy)
    }

    /// Every slot in index order, as `(slot_index, record)`.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &TaskRecord)> {
        self.slots.iter().enumerate()
    }

    pub fn busy(&self) -> impl Iterator<Item = &TaskRecord> {
        self.slots.iter().filter(|record| record.busy)
    }

    /// Busy and visible records: what a listing may show.
    pub fn listed(&self) -> impl Iterator<Item = &TaskRecord> {
        self.slots.iter().filter(|record| record.is_listed())
    }
}
