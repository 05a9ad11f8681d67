use crate::{
    config::RegistryConfig,
    core::shared_table::{self, SharedTable},
    core::slot_table::{RawSlot, TableHeader},
    error::RegistryError,
};
use parking_lot::Mutex;
use std::fmt;

/// Backing store for a task registry: a fixed table of slots plus the lock
/// that serializes slot allocation and release.
/// Implemented in-process (`InProcessStorage`) and across processes
/// (`SharedMemoryStorage`).
pub trait SlotStorage: Send + Sync {
    fn header(&self) -> &TableHeader;

    fn slots(&self) -> &[RawSlot];

    /// Run `f` while holding the table-wide allocation lock.
    fn with_allocation_lock<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce() -> T;

    fn capacity(&self) -> usize {
        self.slots().len()
    }
}

/// Slot table owned by this process. Threads of the process share it through
/// an `Arc`.
pub struct InProcessStorage {
    header: TableHeader,
    slots: Box<[RawSlot]>,
    allocation: Mutex<()>,
}

impl InProcessStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            header: TableHeader::new(capacity),
            slots: (0..capacity).map(|_| RawSlot::new()).collect(),
            allocation: Mutex::new(()),
        }
    }
}

impl fmt::Debug for InProcessStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessStorage")
            .field("capacity", &self.slots.len())
            .finish()
    }
}

impl SlotStorage for InProcessStorage {
    fn header(&self) -> &TableHeader {
        &self.header
    }

    fn slots(&self) -> &[RawSlot] {
        &self.slots
    }

    fn with_allocation_lock<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce() -> T,
    {
        let _guard = self.allocation.lock();
        Ok(f())
    }
}

/// Slot table in a named shared-memory segment, visible to every process
/// that connects with the same namespace.
pub struct SharedMemoryStorage {
    namespace: String,
    table: SharedTable,
}

impl SharedMemoryStorage {
    /// Connect using the resolved configuration.
    pub fn connect(config: &RegistryConfig) -> Result<Self, RegistryError> {
        Self::connect_with_namespace(config.namespace.clone(), config.capacity)
    }

    /// Open the segment `namespace`, creating it with `capacity` slots if it
    /// does not exist yet. An existing segment keeps the capacity it was
    /// created with.
    pub fn connect_with_namespace(namespace: String, capacity: usize) -> Result<Self, RegistryError> {
        let table = shared_table::open_or_create(&namespace, capacity)?;
        Ok(Self { namespace, table })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Remove the shared segment (teardown). Returns whether one existed.
    pub fn cleanup(&self) -> Result<bool, RegistryError> {
        Self::unlink(&self.namespace)
    }

    /// Remove a segment without attaching to it first.
    pub fn unlink(namespace: &str) -> Result<bool, RegistryError> {
        Ok(shared_table::unlink(namespace)?)
    }
}

impl fmt::Debug for SharedMemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemoryStorage")
            .field("namespace", &self.namespace)
            .field("capacity", &self.table.slots().len())
            .finish()
    }
}

impl SlotStorage for SharedMemoryStorage {
    fn header(&self) -> &TableHeader {
        self.table.header()
    }

    fn slots(&self) -> &[RawSlot] {
        self.table.slots()
    }

    fn with_allocation_lock<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce() -> T,
    {
        Ok(self.table.with_lock(f)?)
    }
}
