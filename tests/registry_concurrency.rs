//! Concurrency properties of the feature registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

use sim_features::{FeatureRegistry, LlsdMap, LlsdValue};

fn counter(features: &LlsdMap, key: &str) -> i32 {
    features
        .get(key)
        .and_then(LlsdValue::as_integer)
        .unwrap_or(-1)
}

#[test]
fn test_snapshot_reflects_exactly_the_completed_writes() {
    let registry = FeatureRegistry::new();
    for i in 0..50 {
        let before = registry.snapshot();
        registry.set(format!("k{}", i), i).unwrap();
        let after = registry.snapshot();

        assert!(!before.contains_key(&format!("k{}", i)));
        assert_eq!(after.get(&format!("k{}", i)), Some(&LlsdValue::Integer(i)));
        assert_eq!(after.len(), before.len() + 1);
    }
}

#[test]
fn test_readers_never_observe_torn_writes() {
    const WRITES: i32 = 2_000;
    let registry = FeatureRegistry::new();
    registry
        .update(|f| {
            f.insert("x".into(), 0.into());
            f.insert("y".into(), 0.into());
        })
        .unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for i in 1..=WRITES {
                registry
                    .update(|f| {
                        f.insert("x".into(), i.into());
                        f.insert("y".into(), i.into());
                    })
                    .unwrap();
            }
        });

        for _ in 0..4 {
            s.spawn(|| {
                let mut last = 0;
                loop {
                    let snap = registry.snapshot();
                    let x = counter(&snap, "x");
                    let y = counter(&snap, "y");
                    assert_eq!(x, y, "snapshot mixed two writes");
                    assert!(x >= last, "snapshot went back in time: {} after {}", x, last);
                    last = x;
                    if x == WRITES {
                        break;
                    }
                }
            });
        }
    });

    assert_eq!(registry.try_get("x"), Some(LlsdValue::Integer(WRITES)));
}

#[test]
fn test_concurrent_writers_lose_nothing() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 100;
    let registry = FeatureRegistry::new();
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for t in 0..THREADS {
            let registry = &registry;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    registry.set(format!("t{}-{}", t, i), true).unwrap();
                }
            });
        }
    });

    assert_eq!(registry.len(), THREADS * PER_THREAD);
    assert_eq!(registry.version(), (THREADS * PER_THREAD) as u64);
}

#[test]
fn test_concurrent_remove_succeeds_exactly_once() {
    const THREADS: usize = 8;
    for _ in 0..20 {
        let registry = FeatureRegistry::new();
        registry.set("MeshUploadEnabled", true).unwrap();
        let removed = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    if registry.remove("MeshUploadEnabled") {
                        removed.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(registry.try_get("MeshUploadEnabled").is_none());
    }
}

#[test]
fn test_concurrent_snapshots_of_a_stable_document_agree() {
    const THREADS: usize = 16;
    let registry = FeatureRegistry::new();
    registry.set("MeshRezEnabled", true).unwrap();
    registry.set("MaxAgentGroups", 42).unwrap();
    let mut shapes = LlsdMap::new();
    shapes.insert("convex".into(), true.into());
    registry.set("PhysicsShapeTypes", shapes).unwrap();

    let reference = registry.snapshot();
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                barrier.wait();
                for _ in 0..500 {
                    assert_eq!(registry.snapshot(), reference);
                }
            });
        }
    });
}

#[test]
fn test_mutating_a_snapshot_under_load_leaves_the_registry_alone() {
    let registry = FeatureRegistry::new();
    registry.set("MeshUploadEnabled", true).unwrap();

    thread::scope(|s| {
        for t in 0..4 {
            let registry = &registry;
            s.spawn(move || {
                for i in 0..200 {
                    let mut snap = registry.snapshot();
                    snap.insert(format!("scratch-{}-{}", t, i), i.into());
                    snap.shift_remove("MeshUploadEnabled");
                }
            });
        }
    });

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.version(), 1);
}
