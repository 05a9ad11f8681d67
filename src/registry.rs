//! Task registry over a slot storage backend.
//!
//! Writers register a task, keep its slot up to date and release it when
//! done; inspection tools take snapshots. Allocation and release are the only
//! operations that take the table-wide lock.

use crate::{
    config::RegistryConfig,
    core::slot_table::{Occupancy, RawSlot},
    core::snapshot::Snapshot,
    error::{RegistryError, RegistryResult},
    logging::debug,
    storage::{InProcessStorage, SharedMemoryStorage, SlotStorage},
    task_record::{SlotToken, TaskRecord, TaskUpdate},
};
use chrono::Utc;
use std::sync::Arc;

/// A slot reclaimed by [`TaskRegistry::sweep_dead_owners`].
#[derive(Debug, Clone)]
pub struct CleanupEvent {
    pub slot: usize,
    pub record: TaskRecord,
}

/// Generic over the storage backend so the same registry works inside one
/// process or across processes.
///
/// # Example
///
/// ```rust
/// use taskmon::registry::TaskRegistry;
/// use taskmon::task_record::{TaskState, TaskUpdate};
///
/// let registry = TaskRegistry::in_process(16);
/// let root = registry.register("sim", None).unwrap();
/// let child = registry.register("sim", Some(root.index())).unwrap();
/// registry
///     .update(&child, &TaskUpdate::new().state(TaskState::WAITING).message("solver"))
///     .unwrap();
///
/// let snapshot = registry.snapshot();
/// assert_eq!(snapshot.busy().count(), 2);
/// registry.release(child).unwrap();
/// ```
#[derive(Debug)]
pub struct TaskRegistry<S: SlotStorage> {
    storage: Arc<S>,
}

impl<S: SlotStorage> Clone for TaskRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: SlotStorage> TaskRegistry<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    /// Share an existing storage.
    pub fn from_arc(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Register a task owned by the current process.
    pub fn register(&self, application: &str, parent: Option<usize>) -> RegistryResult<SlotToken> {
        self.register_for_pid(application, parent, std::process::id())
    }

    /// Claim the first free slot for `application`. A parent, when given,
    /// must be a live slot; the new task sits one level below it.
    pub fn register_for_pid(
        &self,
        application: &str,
        parent: Option<usize>,
        pid: u32,
    ) -> RegistryResult<SlotToken> {
        let capacity = self.capacity();
        let now = Utc::now();

        let token = self.storage.with_allocation_lock(|| -> RegistryResult<SlotToken> {
            let slots = self.storage.slots();
            let (depth, parent) = match parent {
                None => (0, None),
                Some(parent) => slots
                    .get(parent)
                    .filter(|slot| slot.is_busy())
                    .map(|slot| {
                        let depth = slot.depth().saturating_add(1);
                        (depth, Some((parent, slot.generation())))
                    })
                    .ok_or(RegistryError::InvalidSlot { slot: parent })?,
            };

            let index = slots
                .iter()
                .position(|slot| !slot.is_busy())
                .ok_or(RegistryError::CapacityExceeded { capacity })?;

            let generation = self.storage.header().next_generation();
            slots[index].begin_write().occupy(Occupancy {
                generation,
                parent,
                depth,
                application,
                pid,
                now,
            });

            Ok(SlotToken { index, generation })
        })??;

        debug(format!(
            "registered `{application}` in slot {} (parent={parent:?}, pid={pid})",
            token.index
        ));
        Ok(token)
    }

    /// Owner-side update of the slot's content; also refreshes the heartbeat.
    pub fn update(&self, token: &SlotToken, update: &TaskUpdate) -> RegistryResult<()> {
        let slot = self.owned_slot(token)?;
        let mut writer = slot.begin_write();
        if !writer.owned_by(token) {
            return Err(RegistryError::InvalidSlot { slot: token.index });
        }
        writer.apply(update, Utc::now());
        Ok(())
    }

    pub fn heartbeat(&self, token: &SlotToken) -> RegistryResult<()> {
        let slot = self.owned_slot(token)?;
        let mut writer = slot.begin_write();
        if !writer.owned_by(token) {
            return Err(RegistryError::InvalidSlot { slot: token.index });
        }
        writer.touch(Utc::now());
        Ok(())
    }

    /// Free the slot. Its content stays readable until the slot is reused.
    pub fn release(&self, token: SlotToken) -> RegistryResult<()> {
        let slot = self.owned_slot(&token)?;
        self.storage.with_allocation_lock(|| -> RegistryResult<()> {
            let mut writer = slot.begin_write();
            if !writer.owned_by(&token) {
                return Err(RegistryError::InvalidSlot { slot: token.index });
            }
            writer.vacate();
            Ok(())
        })??;

        debug(format!("released slot {}", token.index));
        Ok(())
    }

    /// Copy every slot. Never blocks writers.
    pub fn snapshot(&self) -> Snapshot {
        let records = self
            .storage
            .slots()
            .iter()
            .enumerate()
            .map(|(index, slot)| slot.read(index))
            .collect();
        Snapshot::new(Utc::now(), records)
    }

    /// Release every busy slot whose owning process `is_alive` reports dead.
    pub fn sweep_dead_owners<F>(&self, is_alive: F) -> RegistryResult<Vec<CleanupEvent>>
    where
        F: Fn(u32) -> bool,
    {
        let events = self.storage.with_allocation_lock(|| {
            let mut events = Vec::new();
            for (index, slot) in self.storage.slots().iter().enumerate() {
                if !slot.is_busy() || is_alive(slot.pid()) {
                    continue;
                }
                let record = slot.read(index);
                let mut writer = slot.begin_write();
                // the owner may have released it and someone else re-registered
                if writer.generation() != record.generation {
                    continue;
                }
                writer.vacate();
                events.push(CleanupEvent {
                    slot: index,
                    record,
                });
            }
            events
        })?;

        for event in &events {
            debug(format!(
                "reclaimed slot {} from dead pid {}",
                event.slot, event.record.pid
            ));
        }
        Ok(events)
    }

    fn owned_slot(&self, token: &SlotToken) -> RegistryResult<&RawSlot> {
        self.storage
            .slots()
            .get(token.index)
            .ok_or(RegistryError::InvalidSlot { slot: token.index })
    }
}

/// In-process registry type alias
pub type InProcessRegistry = TaskRegistry<InProcessStorage>;

/// Cross-process registry type alias
pub type SharedMemoryRegistry = TaskRegistry<SharedMemoryStorage>;

impl TaskRegistry<InProcessStorage> {
    pub fn in_process(capacity: usize) -> Self {
        Self::new(InProcessStorage::new(capacity))
    }
}

impl TaskRegistry<SharedMemoryStorage> {
    /// Attach to (or create) the shared table named by `config`.
    pub fn shared_memory(config: &RegistryConfig) -> RegistryResult<Self> {
        Ok(Self::new(SharedMemoryStorage::connect(config)?))
    }

    /// Remove the shared segment (teardown).
    pub fn cleanup(&self) -> RegistryResult<bool> {
        self.storage.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_record::TaskState;
    use std::collections::HashMap;

    #[test]
    fn test_register_sets_depth_and_defaults() {
        let registry = TaskRegistry::in_process(4);
        let root = registry.register("sim", None).unwrap();
        let child = registry.register("sim", Some(root.index())).unwrap();
        let grandchild = registry.register("sim", Some(child.index())).unwrap();

        let snapshot = registry.snapshot();
        let record = snapshot.occupied(grandchild.index()).unwrap();
        assert_eq!(record.depth, 2);
        assert_eq!(record.parent_slot, Some(child.index()));
        assert_eq!(record.pid, std::process::id());
        assert_eq!(record.state, TaskState::RUNNING);
        assert!(record.visible);
        assert_eq!(snapshot.occupied(root.index()).unwrap().depth, 0);
    }

    #[test]
    fn test_first_free_slot_is_reused() {
        let registry = TaskRegistry::in_process(3);
        let a = registry.register("a", None).unwrap();
        let b = registry.register("b", None).unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));

        registry.release(a).unwrap();
        let c = registry.register("c", None).unwrap();
        assert_eq!(c.index(), 0);
        assert_ne!(c.generation(), a.generation());
    }

    #[test]
    fn test_reused_parent_slot_does_not_adopt_orphans() {
        let registry = TaskRegistry::in_process(4);
        let sim = registry.register("sim", None).unwrap();
        let solver = registry.register("sim", Some(sim.index())).unwrap();
        registry.release(sim).unwrap();
        let post = registry.register("post", None).unwrap();
        assert_eq!(post.index(), sim.index());

        let snapshot = registry.snapshot();
        let record = snapshot.occupied(solver.index()).unwrap();
        assert_eq!(record.parent_slot, Some(sim.index()));
        assert_eq!(record.parent_generation, sim.generation());

        let lineage = crate::core::lineage::LineageResolver::new(&snapshot);
        assert_eq!(lineage.chain(solver.index()), vec![solver.index()]);
        assert_eq!(lineage.root_name(solver.index()), "sim");
        assert!(!lineage.is_descendant_of_named("post", solver.index()));
        assert!(!lineage.is_related(post.index(), solver.index()));
    }

    #[test]
    fn test_slot_reuse_does_not_look_like_a_cycle() {
        let registry = TaskRegistry::in_process(4);
        let a = registry.register("sim", None).unwrap();
        let b = registry.register("sim", Some(a.index())).unwrap();
        registry.release(a).unwrap();
        // slot 0 comes back as a child of slot 1, whose parent link still says 0
        let c = registry.register("sim", Some(b.index())).unwrap();
        assert_eq!(c.index(), a.index());

        let snapshot = registry.snapshot();
        let lineage = crate::core::lineage::LineageResolver::new(&snapshot);
        assert_eq!(lineage.try_chain(c.index()), Ok(vec![b.index(), c.index()]));
        assert_eq!(lineage.try_chain(b.index()), Ok(vec![b.index()]));
    }

    #[test]
    fn test_capacity_exceeded() {
        let registry = TaskRegistry::in_process(2);
        registry.register("a", None).unwrap();
        registry.register("b", None).unwrap();
        assert_eq!(
            registry.register("c", None),
            Err(RegistryError::CapacityExceeded { capacity: 2 })
        );
    }

    #[test]
    fn test_register_with_free_parent_fails() {
        let registry = TaskRegistry::in_process(4);
        let root = registry.register("sim", None).unwrap();
        registry.release(root).unwrap();

        assert_eq!(
            registry.register("sim", Some(root.index())),
            Err(RegistryError::InvalidSlot { slot: 0 })
        );
        assert_eq!(
            registry.register("sim", Some(99)),
            Err(RegistryError::InvalidSlot { slot: 99 })
        );
    }

    #[test]
    fn test_stale_token_is_rejected() {
        let registry = TaskRegistry::in_process(2);
        let first = registry.register("a", None).unwrap();
        registry.release(first).unwrap();
        let second = registry.register("b", None).unwrap();
        assert_eq!(first.index(), second.index());

        let update = TaskUpdate::new().message("hijack");
        assert_eq!(
            registry.update(&first, &update),
            Err(RegistryError::InvalidSlot { slot: 0 })
        );
        assert_eq!(
            registry.release(first),
            Err(RegistryError::InvalidSlot { slot: 0 })
        );
        assert_eq!(registry.snapshot().occupied(0).unwrap().message, "");
    }

    #[test]
    fn test_double_release_is_invalid() {
        let registry = TaskRegistry::in_process(1);
        let token = registry.register("a", None).unwrap();
        registry.release(token).unwrap();
        assert_eq!(
            registry.release(token),
            Err(RegistryError::InvalidSlot { slot: 0 })
        );
    }

    #[test]
    fn test_release_keeps_content_readable() {
        let registry = TaskRegistry::in_process(1);
        let token = registry.register("post", None).unwrap();
        registry
            .update(&token, &TaskUpdate::new().status("archiving"))
            .unwrap();
        registry.release(token).unwrap();

        let snapshot = registry.snapshot();
        let record = snapshot.get(0).unwrap();
        assert!(!record.busy);
        assert_eq!(record.status_text, "archiving");
        assert!(snapshot.occupied(0).is_none());
    }

    #[test]
    fn test_update_fields() {
        let registry = TaskRegistry::in_process(2);
        let token = registry.register("sim", None).unwrap();
        registry
            .update(
                &token,
                &TaskUpdate::new()
                    .task_name("solver")
                    .state(TaskState::STOPPED)
                    .status("queued")
                    .message("step 3")
                    .progress(0, 50, 200)
                    .task_id(1234)
                    .visible(false)
                    .pid(31337),
            )
            .unwrap();

        let snapshot = registry.snapshot();
        let record = snapshot.get(token.index()).unwrap();
        assert_eq!(record.task_name, "solver");
        assert_eq!(record.application_name, "sim");
        assert_eq!(record.state, TaskState::STOPPED);
        assert_eq!(record.status_text, "queued");
        assert_eq!(record.message, "step 3");
        assert_eq!(record.progress_percent(), Some(25.0));
        assert_eq!(record.task_id, 1234);
        assert!(!record.visible);
        assert_eq!(record.pid, 31337);
    }

    #[test]
    fn test_heartbeat_moves_forward() {
        let registry = TaskRegistry::in_process(1);
        let token = registry.register("sim", None).unwrap();
        let before = registry.snapshot().get(0).unwrap().last_heartbeat;
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.heartbeat(&token).unwrap();
        let after = registry.snapshot().get(0).unwrap().last_heartbeat;
        assert!(after > before);
    }

    #[test]
    fn test_sweep_dead_owners() {
        let registry = TaskRegistry::in_process(4);
        registry.register_for_pid("alive", None, 100).unwrap();
        let dead = registry.register_for_pid("dead", None, 200).unwrap();

        let events = registry.sweep_dead_owners(|pid| pid != 200).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].slot, dead.index());
        assert_eq!(events[0].record.application_name, "dead");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.busy().count(), 1);
        assert!(registry.heartbeat(&dead).is_err());
    }

    #[test]
    fn test_concurrent_owners_keep_latest_values() {
        const THREADS: usize = 8;
        const UPDATES: i64 = 200;

        let registry = TaskRegistry::in_process(THREADS);
        let tokens = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|n| {
                    let registry = &registry;
                    scope.spawn(move |_| {
                        let token = registry.register(&format!("worker-{n}"), None).unwrap();
                        for i in 0..=UPDATES {
                            registry
                                .update(&token, &TaskUpdate::new().progress(0, i, UPDATES))
                                .unwrap();
                        }
                        token
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();

        let snapshot = registry.snapshot();
        let by_slot: HashMap<usize, &TaskRecord> =
            snapshot.busy().map(|r| (r.slot_index, r)).collect();
        assert_eq!(by_slot.len(), THREADS);
        for token in tokens {
            let record = by_slot[&token.index()];
            assert_eq!(record.progress_val, UPDATES);
            assert_eq!(record.generation, token.generation());
        }
    }

    #[test]
    fn test_clones_share_storage() {
        let registry = TaskRegistry::in_process(2);
        let other = registry.clone();
        registry.register("sim", None).unwrap();
        assert_eq!(other.snapshot().busy().count(), 1);
    }
}
