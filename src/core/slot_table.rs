//! Fixed-layout slot table shared by every storage backend.
//!
//! Every field of a slot is an atomic word so a reader can never observe a
//! torn field, even when the table lives in a shared-memory segment mapped by
//! several processes. On top of that each slot carries a sequence counter
//! (seqlock): writers hold it odd for the duration of a write, readers copy
//! the slot and retry while the counter moved. Readers never block writers.
//!
//! The all-zero bit pattern is a valid, vacant slot, which is what a freshly
//! created shared-memory segment contains.

use crate::config::{SNAPSHOT_READ_RETRIES, STALLED_READ_WAIT};
use crate::logging::{debug, warn};
use crate::task_record::{SlotToken, TaskRecord, TaskState, TaskUpdate};
use chrono::{DateTime, Utc};
use std::sync::atomic::{fence, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// "TKMON_V2" in ASCII; marks an initialized table header.
pub const TABLE_MAGIC: u64 = 0x544B_4D4F_4E5F_5632;
// Parent links are stored as `index + 1` so zero means "no parent".
const NO_PARENT: u64 = 0;

pub const NAME_WORDS: usize = 4;
pub const MESSAGE_WORDS: usize = 4;
pub const STATUS_WORDS: usize = 32;

// Spins on an odd sequence value that never changes before a writer is
// considered dead (crashed mid-write) and its write section is taken over.
const STALLED_WRITER_SPINS: u32 = 200_000;

/// UTF-8 text packed little-endian into a fixed number of atomic words,
/// NUL-padded. Longer input is cut on a character boundary.
#[repr(C)]
pub struct PackedText<const WORDS: usize> {
    words: [AtomicU64; WORDS],
}

impl<const WORDS: usize> PackedText<WORDS> {
    pub const BYTES: usize = WORDS * 8;

    fn new() -> Self {
        Self {
            words: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn store(&self, text: &str) {
        let bytes = truncate_utf8(text, Self::BYTES);
        for (i, word) in self.words.iter().enumerate() {
            let mut chunk = [0u8; 8];
            let start = i * 8;
            if start < bytes.len() {
                let end = (start + 8).min(bytes.len());
                chunk[..end - start].copy_from_slice(&bytes[start..end]);
            }
            word.store(u64::from_le_bytes(chunk), Ordering::Relaxed);
        }
    }

    fn load(&self) -> String {
        let mut bytes = Vec::with_capacity(Self::BYTES);
        for word in &self.words {
            bytes.extend_from_slice(&word.load(Ordering::Relaxed).to_le_bytes());
        }
        let len = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        bytes.truncate(len);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn truncate_utf8(text: &str, max_bytes: usize) -> &[u8] {
    if text.len() <= max_bytes {
        return text.as_bytes();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text.as_bytes()[..end]
}

/// Table-wide metadata placed in front of the slots.
#[repr(C)]
pub struct TableHeader {
    magic: AtomicU64,
    capacity: AtomicU64,
    next_generation: AtomicU64,
}

impl TableHeader {
    pub fn new(capacity: usize) -> Self {
        let header = Self {
            magic: AtomicU64::new(0),
            capacity: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
        };
        header.initialize(capacity);
        header
    }

    /// Publish the layout. The magic is written last so a concurrent opener
    /// that sees it also sees the capacity.
    pub fn initialize(&self, capacity: usize) {
        self.capacity.store(capacity as u64, Ordering::Relaxed);
        self.next_generation.store(0, Ordering::Relaxed);
        self.magic.store(TABLE_MAGIC, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.magic.load(Ordering::Acquire) == TABLE_MAGIC
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire) as usize
    }

    /// Generations start at 1 so 0 always means "never occupied".
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[repr(C)]
pub struct RawSlot {
    seq: AtomicU64,
    generation: AtomicU64,
    busy: AtomicU32,
    visible: AtomicU32,
    depth: AtomicU32,
    pid: AtomicU32,
    state: AtomicU32,
    _reserved: AtomicU32,
    parent: AtomicU64,
    parent_generation: AtomicU64,
    task_id: AtomicU64,
    progress_min: AtomicI64,
    progress_val: AtomicI64,
    progress_max: AtomicI64,
    heartbeat_ms: AtomicI64,
    application: PackedText<NAME_WORDS>,
    task_name: PackedText<NAME_WORDS>,
    message: PackedText<MESSAGE_WORDS>,
    status: PackedText<STATUS_WORDS>,
}

impl Default for RawSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSlot {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            busy: AtomicU32::new(0),
            visible: AtomicU32::new(0),
            depth: AtomicU32::new(0),
            pid: AtomicU32::new(0),
            state: AtomicU32::new(0),
            _reserved: AtomicU32::new(0),
            parent: AtomicU64::new(NO_PARENT),
            parent_generation: AtomicU64::new(0),
            task_id: AtomicU64::new(0),
            progress_min: AtomicI64::new(0),
            progress_val: AtomicI64::new(0),
            progress_max: AtomicI64::new(0),
            heartbeat_ms: AtomicI64::new(0),
            application: PackedText::new(),
            task_name: PackedText::new(),
            message: PackedText::new(),
            status: PackedText::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire) != 0
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Relaxed)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Copy the slot, waiting out an active writer. A writer still inside its
    /// write section after `STALLED_READ_WAIT` is treated as stalled and the
    /// slot reads as blank (not busy) rather than half-written.
    pub fn read(&self, index: usize) -> TaskRecord {
        if let Some(record) = self.read_consistent(index, SNAPSHOT_READ_RETRIES) {
            return record;
        }

        let deadline = Instant::now() + STALLED_READ_WAIT;
        while Instant::now() < deadline {
            std::thread::yield_now();
            if let Some(record) = self.read_consistent(index, SNAPSHOT_READ_RETRIES) {
                return record;
            }
        }

        debug(format!(
            "slot {index} still being written after {STALLED_READ_WAIT:?}; reported blank"
        ));
        let mut blank = TaskRecord::vacant(index);
        blank.generation = self.generation.load(Ordering::Relaxed);
        blank
    }

    /// Copy the slot between two equal, even sequence values. `None` when no
    /// stable copy was obtained within `retries` attempts.
    pub fn read_consistent(&self, index: usize, retries: usize) -> Option<TaskRecord> {
        for _ in 0..=retries {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let record = self.copy_fields(index);
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return Some(record);
            }
        }
        None
    }

    fn copy_fields(&self, index: usize) -> TaskRecord {
        let parent = self.parent.load(Ordering::Relaxed);
        TaskRecord {
            slot_index: index,
            generation: self.generation.load(Ordering::Relaxed),
            parent_slot: parent
                .checked_sub(1)
                .and_then(|p| usize::try_from(p).ok()),
            parent_generation: self.parent_generation.load(Ordering::Relaxed),
            application_name: self.application.load(),
            task_name: self.task_name.load(),
            depth: self.depth.load(Ordering::Relaxed),
            pid: self.pid.load(Ordering::Relaxed),
            task_id: self.task_id.load(Ordering::Relaxed),
            state: TaskState::from_code(self.state.load(Ordering::Relaxed)),
            status_text: self.status.load(),
            message: self.message.load(),
            progress_min: self.progress_min.load(Ordering::Relaxed),
            progress_val: self.progress_val.load(Ordering::Relaxed),
            progress_max: self.progress_max.load(Ordering::Relaxed),
            last_heartbeat: DateTime::from_timestamp_millis(
                self.heartbeat_ms.load(Ordering::Relaxed),
            )
            .unwrap_or_default(),
            busy: self.busy.load(Ordering::Relaxed) != 0,
            visible: self.visible.load(Ordering::Relaxed) != 0,
        }
    }

    /// Enter the slot's write section. Only one writer at a time; a writer
    /// that stalls with the counter odd (its process died mid-write) is taken
    /// over after a bounded wait.
    pub fn begin_write(&self) -> SlotWriter<'_> {
        let mut observed = self.seq.load(Ordering::Relaxed);
        let mut spins: u32 = 0;
        loop {
            let current = self.seq.load(Ordering::Relaxed);
            if current & 1 == 0 {
                if self
                    .seq
                    .compare_exchange_weak(
                        current,
                        current + 1,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    fence(Ordering::Release);
                    return SlotWriter {
                        slot: self,
                        seq: current + 1,
                    };
                }
            } else if current == observed {
                spins += 1;
                if spins >= STALLED_WRITER_SPINS
                    && self
                        .seq
                        .compare_exchange(
                            current,
                            current + 2,
                            Ordering::Acquire,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                {
                    warn(format!(
                        "taking over stalled write section (seq={current}, pid={})",
                        self.pid()
                    ));
                    fence(Ordering::Release);
                    return SlotWriter {
                        slot: self,
                        seq: current + 2,
                    };
                }
            } else {
                observed = current;
                spins = 0;
            }

            if spins % 64 == 63 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Fields stamped into a slot when it is handed to a new owner.
pub struct Occupancy<'a> {
    pub generation: u64,
    /// Parent slot and the generation it held at registration.
    pub parent: Option<(usize, u64)>,
    pub depth: u32,
    pub application: &'a str,
    pub pid: u32,
    pub now: DateTime<Utc>,
}

/// Exclusive write access to one slot; leaving scope publishes the write.
pub struct SlotWriter<'a> {
    slot: &'a RawSlot,
    seq: u64,
}

impl SlotWriter<'_> {
    pub fn owned_by(&self, token: &SlotToken) -> bool {
        self.slot.is_busy() && self.slot.generation() == token.generation
    }

    pub fn generation(&self) -> u64 {
        self.slot.generation()
    }

    /// Overwrite the whole slot for a fresh registration and mark it busy.
    pub fn occupy(&mut self, occupancy: Occupancy<'_>) {
        let slot = self.slot;
        let (parent, parent_generation) = occupancy
            .parent
            .map(|(p, generation)| (p as u64 + 1, generation))
            .unwrap_or((NO_PARENT, 0));

        slot.generation
            .store(occupancy.generation, Ordering::Relaxed);
        slot.parent.store(parent, Ordering::Relaxed);
        slot.parent_generation
            .store(parent_generation, Ordering::Relaxed);
        slot.depth.store(occupancy.depth, Ordering::Relaxed);
        slot.pid.store(occupancy.pid, Ordering::Relaxed);
        slot.task_id.store(0, Ordering::Relaxed);
        slot.state
            .store(TaskState::RUNNING.as_char() as u32, Ordering::Relaxed);
        slot.progress_min.store(0, Ordering::Relaxed);
        slot.progress_val.store(0, Ordering::Relaxed);
        slot.progress_max.store(0, Ordering::Relaxed);
        slot.application.store(occupancy.application);
        slot.task_name.store(occupancy.application);
        slot.message.store("");
        slot.status.store("");
        slot.visible.store(1, Ordering::Relaxed);
        self.touch(occupancy.now);
        slot.busy.store(1, Ordering::Release);
    }

    pub fn apply(&mut self, update: &TaskUpdate, now: DateTime<Utc>) {
        let slot = self.slot;
        if let Some(name) = &update.task_name {
            slot.task_name.store(name);
        }
        if let Some(state) = update.state {
            slot.state.store(state.as_char() as u32, Ordering::Relaxed);
        }
        if let Some(status) = &update.status_text {
            slot.status.store(status);
        }
        if let Some(message) = &update.message {
            slot.message.store(message);
        }
        if let Some((min, val, max)) = update.progress {
            slot.progress_min.store(min, Ordering::Relaxed);
            slot.progress_val.store(val, Ordering::Relaxed);
            slot.progress_max.store(max, Ordering::Relaxed);
        }
        if let Some(task_id) = update.task_id {
            slot.task_id.store(task_id, Ordering::Relaxed);
        }
        if let Some(visible) = update.visible {
            slot.visible.store(u32::from(visible), Ordering::Relaxed);
        }
        if let Some(pid) = update.pid {
            slot.pid.store(pid, Ordering::Relaxed);
        }
        self.touch(now);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.slot
            .heartbeat_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    /// Mark the slot free. Content stays until the next registration.
    pub fn vacate(&mut self) {
        self.slot.busy.store(0, Ordering::Release);
    }
}

impl Drop for SlotWriter<'_> {
    fn drop(&mut self) {
        self.slot.seq.store(self.seq + 1, Ordering::Release);
    }
}
