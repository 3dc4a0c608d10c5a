//! Admission control through the public facade.

use dispatch_throttle::infrastructure::mocks::MockClock;
use dispatch_throttle::{
    allow, record_and_check, AdmissionGuard, AdmissionRegistry, AdmissionRule, EventWindow,
    Metrics, ShardedStorage, WindowError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn test_join_flood_detection() {
    // Five joins within ten seconds trip the detector.
    let window = EventWindow::new(8).unwrap();
    let start = Instant::now();

    let tripped: Vec<bool> = (0..6)
        .map(|i| record_and_check(&window, 4, secs(10), start + secs(i)).unwrap())
        .collect();

    assert_eq!(tripped, vec![false, false, false, false, true, true]);
}

#[test]
fn test_command_cooldown() {
    // At most two uses per minute.
    let window = EventWindow::new(2).unwrap();
    let start = Instant::now();

    assert!(allow(&window, 2, secs(60), start).unwrap());
    window.record(start);
    assert!(allow(&window, 2, secs(60), start + secs(1)).unwrap());
    window.record(start + secs(1));
    assert!(!allow(&window, 2, secs(60), start + secs(30)).unwrap());
    assert!(allow(&window, 2, secs(60), start + secs(61)).unwrap());
}

#[test]
fn test_lookback_beyond_capacity_is_rejected() {
    let window = EventWindow::new(3).unwrap();
    let now = Instant::now();

    assert_eq!(
        allow(&window, 4, secs(1), now),
        Err(WindowError::LookbackOutOfRange { k: 4, capacity: 3 })
    );
    assert_eq!(
        record_and_check(&window, 3, secs(1), now),
        Err(WindowError::LookbackOutOfRange { k: 3, capacity: 3 })
    );
    assert_eq!(window.latest(), None);
}

#[test]
fn test_guard_resize_keeps_history() {
    let clock = MockClock::new(Instant::now());
    let rule = AdmissionRule::new(2, secs(10)).unwrap();
    let guard = AdmissionGuard::with_capacity(rule, 5, Arc::new(clock.clone())).unwrap();

    assert!(guard.try_acquire());
    assert!(guard.try_acquire());
    guard.resize(3).unwrap();
    assert!(!guard.allow());

    assert!(matches!(
        guard.resize(1),
        Err(WindowError::LookbackOutOfRange { .. })
    ));

    clock.advance(secs(11));
    assert!(guard.try_acquire());
}

#[test]
fn test_registry_isolates_resources() {
    let clock = MockClock::new(Instant::now());
    let metrics = Metrics::new();
    let registry = AdmissionRegistry::new(
        Arc::new(ShardedStorage::new()),
        AdmissionRule::new(1, secs(5)).unwrap(),
        Arc::new(clock.clone()),
    )
    .with_metrics(metrics.clone());

    assert!(registry.try_acquire("user:1"));
    assert!(!registry.try_acquire("user:1"));
    assert!(registry.try_acquire("user:2"));

    clock.advance(secs(6));
    assert!(registry.try_acquire("user:1"));

    assert_eq!(registry.len(), 2);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.admissions_allowed, 3);
    assert_eq!(snapshot.admissions_denied, 1);
}
