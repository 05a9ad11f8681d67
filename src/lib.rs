//! taskmon library
//!
//! Bounded task table shared between worker threads or processes, plus the
//! lineage, query and rendering pieces behind the `ps` inspection command.

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod platform;
pub mod query;
pub mod registry;
pub mod render;
pub mod storage;
pub mod task_record;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::RegistryConfig;
pub use core::lineage::LineageResolver;
pub use core::snapshot::Snapshot;
pub use error::{RegistryError, RegistryResult};
pub use query::{QueryFilters, QueryRow, TaskQuery};
pub use registry::{CleanupEvent, InProcessRegistry, SharedMemoryRegistry, TaskRegistry};
pub use render::{StatePalette, StatusRenderer};
pub use storage::{InProcessStorage, SharedMemoryStorage, SlotStorage};
pub use task_record::{SlotToken, TaskRecord, TaskState, TaskUpdate};
