//! Registry over a named shared-memory table.
#![cfg(unix)]

use serial_test::serial;
use taskmon::{
    RegistryConfig, RegistryError, SharedMemoryRegistry, SharedMemoryStorage, TaskRegistry,
    TaskState, TaskUpdate,
};

fn namespace(test: &str) -> String {
    format!("taskmon-test-{}-{test}", std::process::id())
}

fn connect(namespace: &str, capacity: usize) -> SharedMemoryRegistry {
    let config = RegistryConfig::default()
        .with_namespace(namespace)
        .with_capacity(capacity);
    TaskRegistry::shared_memory(&config).expect("attach shared table")
}

#[test]
#[serial]
fn test_two_handles_share_slots() {
    let ns = namespace("share");
    let _ = SharedMemoryStorage::unlink(&ns);

    let writer = connect(&ns, 8);
    let reader = connect(&ns, 32);
    assert_eq!(reader.capacity(), 8, "second connector adopts stored capacity");

    let root = writer.register_for_pid("sim", None, 4242).unwrap();
    let child = writer.register("sim", Some(root.index())).unwrap();
    writer
        .update(
            &child,
            &TaskUpdate::new()
                .task_name("solver")
                .state(TaskState::WAITING)
                .status("queued")
                .progress(0, 50, 200),
        )
        .unwrap();

    let snapshot = reader.snapshot();
    let record = snapshot.occupied(child.index()).unwrap();
    assert_eq!(record.task_name, "solver");
    assert_eq!(record.parent_slot, Some(root.index()));
    assert_eq!(record.depth, 1);
    assert_eq!(record.progress_percent(), Some(25.0));
    assert_eq!(snapshot.occupied(root.index()).unwrap().pid, 4242);

    writer.release(child).unwrap();
    assert!(reader.snapshot().occupied(child.index()).is_none());

    assert!(writer.cleanup().unwrap());
}

#[test]
#[serial]
fn test_capacity_is_enforced_across_handles() {
    let ns = namespace("capacity");
    let _ = SharedMemoryStorage::unlink(&ns);

    let a = connect(&ns, 2);
    let b = connect(&ns, 2);
    a.register("a", None).unwrap();
    b.register("b", None).unwrap();
    assert_eq!(
        a.register("c", None),
        Err(RegistryError::CapacityExceeded { capacity: 2 })
    );

    assert!(SharedMemoryStorage::unlink(&ns).unwrap());
}

#[test]
#[serial]
fn test_concurrent_registration_gets_distinct_slots() {
    let ns = namespace("concurrent");
    let _ = SharedMemoryStorage::unlink(&ns);
    let first = connect(&ns, 16);

    let indices = crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let ns = ns.clone();
                scope.spawn(move |_| {
                    let registry = connect(&ns, 16);
                    let token = registry.register(&format!("w{n}"), None).unwrap();
                    registry
                        .update(&token, &TaskUpdate::new().message(format!("m{n}")))
                        .unwrap();
                    token.index()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    })
    .unwrap();

    let mut sorted = indices.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 8);
    assert_eq!(first.snapshot().busy().count(), 8);

    assert!(first.cleanup().unwrap());
}

#[test]
#[serial]
fn test_unlink_missing_table() {
    let ns = namespace("missing");
    let _ = SharedMemoryStorage::unlink(&ns);
    assert!(!SharedMemoryStorage::unlink(&ns).unwrap());
}
