//! Multi-threaded charging and admission.

use std::thread;

use memtally::MemTracker;

#[test]
fn test_contended_admission_admits_exactly_one() {
    let tracker = MemTracker::new(100, "contended", None);

    let results: Vec<bool> = thread::scope(|s| {
        (0..2)
            .map(|_| s.spawn(|| tracker.try_consume(60)))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().expect("admission thread panicked"))
            .collect()
    });

    assert_eq!(results.iter().filter(|&&accepted| accepted).count(), 1);
    assert_eq!(tracker.consumption(), 60);
}

#[test]
fn test_balanced_concurrent_pairs_leave_zero() {
    let root = MemTracker::new(-1, "root", None);
    let mid = MemTracker::new(-1, "mid", Some(&root));
    let leaf = MemTracker::new(-1, "leaf", Some(&mid));

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..1000 {
                    leaf.consume(64);
                    leaf.release(64);
                }
            });
        }
    });

    assert_eq!(leaf.consumption(), 0);
    assert_eq!(mid.consumption(), 0);
    assert_eq!(root.consumption(), 0);
}

#[test]
fn test_limited_ancestor_never_over_admits() {
    let root = MemTracker::new(100_000, "root", None);
    let left = MemTracker::new(-1, "left", Some(&root));
    let right = MemTracker::new(-1, "right", Some(&root));

    thread::scope(|s| {
        for child in [&left, &right] {
            for _ in 0..4 {
                s.spawn(move || {
                    let mut admitted = 0u32;
                    for _ in 0..500 {
                        if child.try_consume(1000) {
                            admitted += 1;
                            child.release(1000);
                        }
                    }
                    // The limit is generous; starvation here would point at
                    // a bug in the retry-free rejection path.
                    assert!(admitted > 0);
                });
            }
        }
    });

    assert_eq!(root.consumption(), 0);
    assert_eq!(left.consumption(), 0);
    assert_eq!(right.consumption(), 0);
    // try_update never lets the limited node overshoot, so its high-water
    // mark respects the limit even under contention.
    assert!(root.peak_consumption() <= 100_000);
}

#[test]
fn test_concurrent_mixed_charge_and_admit() {
    let root = MemTracker::new(1 << 30, "root", None);
    let query = MemTracker::new(1 << 20, "query", Some(&root));

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..200 {
                    if query.try_consume(4096) {
                        query.release(4096);
                    }
                }
            });
            s.spawn(|| {
                for _ in 0..200 {
                    query.consume(512);
                    query.release(512);
                }
            });
        }
    });

    assert_eq!(query.consumption(), 0);
    assert_eq!(root.consumption(), 0);
}
