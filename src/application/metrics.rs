//! Observability metrics for admission control and outbound dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking admission and dispatch statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Actions admitted by an event window
    admissions_allowed: AtomicU64,
    /// Actions denied by an event window
    admissions_denied: AtomicU64,
    /// Non-empty payloads appended to a coalescer
    payloads_enqueued: AtomicU64,
    /// Payloads delivered inside a transmission
    payloads_sent: AtomicU64,
    /// Successful physical transmissions
    transmissions: AtomicU64,
    /// Transmissions that failed in the transport
    transport_errors: AtomicU64,
    /// Advisory waits taken
    soft_waits: AtomicU64,
    /// Mandatory waits taken before a transmission
    hard_waits: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admission(&self, allowed: bool) {
        let counter = if allowed {
            &self.inner.admissions_allowed
        } else {
            &self.inner.admissions_denied
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enqueued(&self) {
        self.inner.payloads_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transmission(&self, payloads: usize) {
        self.inner.transmissions.fetch_add(1, Ordering::Relaxed);
        self.inner
            .payloads_sent
            .fetch_add(payloads as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_transport_error(&self) {
        self.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_soft_wait(&self) {
        self.inner.soft_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hard_wait(&self) {
        self.inner.hard_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Actions admitted by an event window.
    pub fn admissions_allowed(&self) -> u64 {
        self.inner.admissions_allowed.load(Ordering::Relaxed)
    }

    /// Actions denied by an event window.
    pub fn admissions_denied(&self) -> u64 {
        self.inner.admissions_denied.load(Ordering::Relaxed)
    }

    /// Non-empty payloads appended to a coalescer.
    pub fn payloads_enqueued(&self) -> u64 {
        self.inner.payloads_enqueued.load(Ordering::Relaxed)
    }

    /// Payloads delivered inside a successful transmission.
    pub fn payloads_sent(&self) -> u64 {
        self.inner.payloads_sent.load(Ordering::Relaxed)
    }

    /// Successful physical transmissions.
    pub fn transmissions(&self) -> u64 {
        self.inner.transmissions.load(Ordering::Relaxed)
    }

    /// Transmissions that failed in the transport.
    pub fn transport_errors(&self) -> u64 {
        self.inner.transport_errors.load(Ordering::Relaxed)
    }

    /// Advisory waits taken.
    pub fn soft_waits(&self) -> u64 {
        self.inner.soft_waits.load(Ordering::Relaxed)
    }

    /// Mandatory waits taken.
    pub fn hard_waits(&self) -> u64 {
        self.inner.hard_waits.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admissions_allowed: self.admissions_allowed(),
            admissions_denied: self.admissions_denied(),
            payloads_enqueued: self.payloads_enqueued(),
            payloads_sent: self.payloads_sent(),
            transmissions: self.transmissions(),
            transport_errors: self.transport_errors(),
            soft_waits: self.soft_waits(),
            hard_waits: self.hard_waits(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.admissions_allowed,
            &inner.admissions_denied,
            &inner.payloads_enqueued,
            &inner.payloads_sent,
            &inner.transmissions,
            &inner.transport_errors,
            &inner.soft_waits,
            &inner.hard_waits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Actions admitted by an event window
    pub admissions_allowed: u64,
    /// Actions denied by an event window
    pub admissions_denied: u64,
    /// Non-empty payloads appended to a coalescer
    pub payloads_enqueued: u64,
    /// Payloads delivered inside a successful transmission
    pub payloads_sent: u64,
    /// Successful physical transmissions
    pub transmissions: u64,
    /// Transmissions that failed in the transport
    pub transport_errors: u64,
    /// Advisory waits taken
    pub soft_waits: u64,
    /// Mandatory waits taken
    pub hard_waits: u64,
}

impl MetricsSnapshot {
    /// Fraction of admission checks that were denied (0.0 to 1.0).
    ///
    /// Returns 0.0 if no admission checks were made.
    pub fn denial_rate(&self) -> f64 {
        let total = self
            .admissions_allowed
            .saturating_add(self.admissions_denied);
        if total == 0 {
            0.0
        } else {
            self.admissions_denied as f64 / total as f64
        }
    }

    /// Average payloads merged into one transmission.
    ///
    /// Returns 0.0 before the first transmission.
    pub fn coalescing_ratio(&self) -> f64 {
        if self.transmissions == 0 {
            0.0
        } else {
            self.payloads_sent as f64 / self.transmissions as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initial_state() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_record_admission() {
        let metrics = Metrics::new();
        metrics.record_admission(true);
        metrics.record_admission(true);
        metrics.record_admission(false);
        assert_eq!(metrics.admissions_allowed(), 2);
        assert_eq!(metrics.admissions_denied(), 1);
    }

    #[test]
    fn test_snapshot_denial_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().denial_rate(), 0.0);

        metrics.record_admission(true);
        metrics.record_admission(false);
        assert!((metrics.snapshot().denial_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_coalescing_ratio() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().coalescing_ratio(), 0.0);

        metrics.record_transmission(28);
        metrics.record_transmission(2);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transmissions, 2);
        assert_eq!(snapshot.payloads_sent, 30);
        assert!((snapshot.coalescing_ratio() - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_enqueued();
        metrics.record_transport_error();
        metrics.record_soft_wait();
        metrics.record_hard_wait();

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_clone_shares_counters() {
        let metrics1 = Metrics::new();
        metrics1.record_enqueued();

        let metrics2 = metrics1.clone();
        metrics2.record_enqueued();

        assert_eq!(metrics1.payloads_enqueued(), 2);
        assert_eq!(metrics2.payloads_enqueued(), 2);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let metrics = Metrics::new();
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    m.record_admission(true);
                    m.record_transmission(3);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.admissions_allowed(), 1000);
        assert_eq!(metrics.transmissions(), 1000);
        assert_eq!(metrics.payloads_sent(), 3000);
    }
}
