//! Slot table internals, snapshots and lineage resolution.

pub mod lineage;
pub(crate) mod shared_table;
pub mod slot_table;
pub mod snapshot;
