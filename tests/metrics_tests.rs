//! Metric bindings: gauge naming and side-effect publication.

use std::sync::Arc;

use memtally::{Error, InMemoryMetrics, MemTracker};

fn gauge_value(metrics: &InMemoryMetrics, name: &str) -> i64 {
    metrics
        .get(name)
        .unwrap_or_else(|| panic!("gauge '{}' not registered", name))
        .value()
}

#[test]
fn test_register_publishes_expected_names() {
    let metrics = InMemoryMetrics::new();
    let tracker = MemTracker::new(100, "q0", None);
    tracker.register_metrics(&metrics, "q0").unwrap();

    assert_eq!(
        metrics.names(),
        vec![
            "q0.bytes-freed-by-last-gc".to_string(),
            "q0.bytes-over-limit".to_string(),
            "q0.consumption".to_string(),
            "q0.limit".to_string(),
            "q0.num-gcs".to_string(),
            "q0.peak-consumption".to_string(),
        ]
    );
    assert_eq!(gauge_value(&metrics, "q0.limit"), 100);
    assert_eq!(gauge_value(&metrics, "q0.consumption"), 0);
    // Sentinels: no GC has run, the limit was never exceeded.
    assert_eq!(gauge_value(&metrics, "q0.bytes-freed-by-last-gc"), -1);
    assert_eq!(gauge_value(&metrics, "q0.bytes-over-limit"), -1);
}

#[test]
fn test_operations_drive_gauges() {
    let metrics = InMemoryMetrics::new();
    let tracker = MemTracker::new(-1, "q1", None);
    tracker.register_metrics(&metrics, "q1").unwrap();

    tracker.consume(400);
    assert_eq!(gauge_value(&metrics, "q1.consumption"), 400);
    assert_eq!(gauge_value(&metrics, "q1.peak-consumption"), 400);

    tracker.release(300);
    assert_eq!(gauge_value(&metrics, "q1.consumption"), 100);
    assert_eq!(gauge_value(&metrics, "q1.peak-consumption"), 400);

    assert!(tracker.try_consume(50));
    assert_eq!(gauge_value(&metrics, "q1.consumption"), 150);
    tracker.release(150);
}

#[test]
fn test_gc_pass_updates_gc_gauges() {
    let metrics = InMemoryMetrics::new();
    let tracker = MemTracker::new(100, "q2", None);
    tracker.register_metrics(&metrics, "q2").unwrap();

    let weak = Arc::downgrade(&tracker);
    tracker.add_gc_callback(move || {
        if let Some(t) = weak.upgrade() {
            t.release(50);
        }
    });

    tracker.consume(110);
    assert!(!tracker.limit_exceeded());

    assert_eq!(gauge_value(&metrics, "q2.num-gcs"), 1);
    assert_eq!(gauge_value(&metrics, "q2.bytes-freed-by-last-gc"), 50);
    assert_eq!(gauge_value(&metrics, "q2.bytes-over-limit"), 10);
    assert_eq!(gauge_value(&metrics, "q2.consumption"), 60);
}

#[test]
fn test_rebinding_is_an_error() {
    let metrics = InMemoryMetrics::new();
    let tracker = MemTracker::new(100, "q3", None);
    tracker.register_metrics(&metrics, "q3").unwrap();

    let err = tracker.register_metrics(&metrics, "q3-again").unwrap_err();
    match err {
        Error::MetricsAlreadyBound { label } => assert_eq!(label, "q3"),
        other => panic!("unexpected error: {other}"),
    }
}
