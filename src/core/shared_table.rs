//! Named shared-memory segment holding a slot table.
//!
//! Layout: `[process-shared mutex] [TableHeader] [RawSlot; capacity]`, each
//! region aligned to 64 bytes. The mutex only guards slot allocation and
//! release; slot content is published through the per-slot seqlock.

use crate::core::slot_table::{RawSlot, TableHeader};
use crate::logging::debug;
use raw_sync::locks::{LockImpl, LockInit, Mutex};
use shared_memory::{Shmem, ShmemConf, ShmemError};
use std::mem::size_of;
use thiserror::Error;

const REGION_ALIGN: usize = 64;
const OPEN_INIT_RETRIES: usize = 50;
const OPEN_INIT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum SharedTableError {
    #[error("shared memory region too small: {actual} bytes, need {required}")]
    RegionTooSmall { actual: usize, required: usize },
    #[error("shared memory error: {0}")]
    Shmem(#[from] ShmemError),
    #[error("segment `{0}` exists but was never initialized as a task table")]
    Uninitialized(String),
    #[error("shared lock init failed: {0}")]
    LockInit(String),
    #[error("shared lock access failed: {0}")]
    LockGuard(String),
}

fn align_up(value: usize) -> usize {
    (value + REGION_ALIGN - 1) & !(REGION_ALIGN - 1)
}

fn lock_region() -> usize {
    // worst-case padding, the mapping address is not known yet
    align_up(Mutex::size_of(None))
}

fn header_region() -> usize {
    align_up(size_of::<TableHeader>())
}

pub(crate) fn required_size(capacity: usize) -> usize {
    lock_region() + header_region() + capacity * size_of::<RawSlot>()
}

pub(crate) struct SharedTable {
    // Keeps the mapping alive; `header` and `slots` point into it.
    _shm: Shmem,
    lock: Box<dyn LockImpl>,
    header: *const TableHeader,
    slots: *const RawSlot,
    capacity: usize,
}

// SAFETY: the mapped region is only accessed through atomics (`TableHeader`,
// `RawSlot`) and the process-shared mutex, both of which are designed for
// concurrent use from any thread of any process mapping the segment. The
// pointers stay valid for as long as `_shm` is alive, i.e. for `self`.
unsafe impl Send for SharedTable {}
unsafe impl Sync for SharedTable {}

impl SharedTable {
    pub(crate) fn header(&self) -> &TableHeader {
        // SAFETY: see the Send/Sync note; the header region was validated on map.
        unsafe { &*self.header }
    }

    pub(crate) fn slots(&self) -> &[RawSlot] {
        // SAFETY: `capacity` slots fit in the mapping (checked in `map_table`)
        // and any bit pattern written through `RawSlot` is a valid `RawSlot`.
        unsafe { std::slice::from_raw_parts(self.slots, self.capacity) }
    }

    pub(crate) fn with_lock<T>(&self, f: impl FnOnce() -> T) -> Result<T, SharedTableError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| SharedTableError::LockGuard(e.to_string()))?;
        Ok(f())
    }
}

pub(crate) fn open_or_create(
    namespace: &str,
    capacity: usize,
) -> Result<SharedTable, SharedTableError> {
    match open_existing(namespace) {
        Ok(table) => Ok(table),
        Err(SharedTableError::Shmem(ShmemError::MapOpenFailed(_)))
        | Err(SharedTableError::Shmem(ShmemError::LinkDoesNotExist))
        | Err(SharedTableError::Shmem(ShmemError::NoLinkOrOsId)) => {
            create_or_retry(namespace, capacity)
        }
        Err(err) => Err(err),
    }
}

fn open_existing(namespace: &str) -> Result<SharedTable, SharedTableError> {
    let shm = ShmemConf::new().os_id(namespace).open()?;
    map_table(shm, namespace, None)
}

fn create_or_retry(namespace: &str, capacity: usize) -> Result<SharedTable, SharedTableError> {
    let conf = ShmemConf::new()
        .os_id(namespace)
        .size(required_size(capacity));
    match conf.create() {
        Ok(mut shm) => {
            // the table outlives its creator; `unlink` removes it explicitly
            let _ = shm.set_owner(false);
            debug(format!(
                "created task table `{namespace}` with {capacity} slots"
            ));
            map_table(shm, namespace, Some(capacity))
        }
        Err(ShmemError::MappingIdExists) => open_existing(namespace),
        Err(e) => Err(SharedTableError::from(e)),
    }
}

/// Map the regions of a segment. `init` carries the capacity when this
/// process created the segment and must initialize it.
fn map_table(
    shm: Shmem,
    namespace: &str,
    init: Option<usize>,
) -> Result<SharedTable, SharedTableError> {
    let base = shm.as_ptr();
    let total_len = shm.len();
    let lock_len = lock_region();
    let table_offset = lock_len + header_region();

    if total_len < table_offset {
        return Err(SharedTableError::RegionTooSmall {
            actual: total_len,
            required: table_offset,
        });
    }

    // SAFETY: offsets are within the mapping (checked above).
    let header_ptr = unsafe { base.add(lock_len) };
    let header = header_ptr as *const TableHeader;

    let lock = match init {
        Some(capacity) => {
            // SAFETY: fresh zeroed segment, nobody else can have initialized
            // the mutex region yet.
            let (lock, _) = unsafe { Mutex::new(base, header_ptr) }
                .map_err(|e| SharedTableError::LockInit(e.to_string()))?;
            // SAFETY: header region is in bounds and aligned to 64 bytes.
            unsafe { &*header }.initialize(capacity);
            lock
        }
        None => {
            wait_for_header(unsafe { &*header }, namespace)?;
            // SAFETY: the creator initialized the mutex before publishing the
            // header magic we just observed.
            let (lock, _) = unsafe { Mutex::from_existing(base, header_ptr) }
                .map_err(|e| SharedTableError::LockInit(e.to_string()))?;
            lock
        }
    };

    // SAFETY: header region is in bounds and initialized.
    let capacity = unsafe { &*header }.capacity();
    let required = required_size(capacity);
    if total_len < required {
        return Err(SharedTableError::RegionTooSmall {
            actual: total_len,
            required,
        });
    }

    // SAFETY: `required` covers `capacity` slots after `table_offset`.
    let slots = unsafe { base.add(table_offset) } as *const RawSlot;

    Ok(SharedTable {
        _shm: shm,
        lock,
        header,
        slots,
        capacity,
    })
}

fn wait_for_header(header: &TableHeader, namespace: &str) -> Result<(), SharedTableError> {
    for _ in 0..OPEN_INIT_RETRIES {
        if header.is_initialized() {
            return Ok(());
        }
        std::thread::sleep(OPEN_INIT_BACKOFF);
    }
    Err(SharedTableError::Uninitialized(namespace.to_string()))
}

/// Remove the named segment. Processes that still map it keep their
/// mapping until they drop it.
pub(crate) fn unlink(namespace: &str) -> Result<bool, SharedTableError> {
    match ShmemConf::new().os_id(namespace).open() {
        Ok(mut shm) => {
            let _ = shm.set_owner(true);
            debug(format!("unlinked task table `{namespace}`"));
            Ok(true)
        }
        Err(ShmemError::MapOpenFailed(_))
        | Err(ShmemError::LinkDoesNotExist)
        | Err(ShmemError::NoLinkOrOsId) => Ok(false),
        Err(err) => Err(err.into()),
    }
}
