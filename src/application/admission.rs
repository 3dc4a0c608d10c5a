//! Admission control built on [`EventWindow`].
//!
//! Two entry points cover what other subsystems need:
//! [`allow`] pre-checks an action without recording it, and
//! [`record_and_check`] records an event and reports whether it tripped the
//! window. [`AdmissionGuard`] and [`AdmissionRegistry`] bundle a window with
//! a validated rule and a clock.

use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, Storage};
use crate::domain::window::{EventWindow, WindowError};
use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Whether a new action may proceed: `false` when `k` actions already
/// happened within `duration` of `now`.
///
/// Does not record anything.
pub fn allow(
    window: &EventWindow,
    k: usize,
    duration: Duration,
    now: Instant,
) -> Result<bool, WindowError> {
    if duration.is_zero() {
        return Err(WindowError::ZeroDuration);
    }
    Ok(!window.check_within(k, duration, now)?)
}

/// Record an event at `now`, then report whether it landed within
/// `duration` of the event `k` positions before it.
pub fn record_and_check(
    window: &EventWindow,
    k: usize,
    duration: Duration,
    now: Instant,
) -> Result<bool, WindowError> {
    if duration.is_zero() {
        return Err(WindowError::ZeroDuration);
    }
    if k == 0 {
        return Err(WindowError::ZeroLookback);
    }
    let capacity = window.capacity();
    if k >= capacity {
        return Err(WindowError::LookbackOutOfRange { k, capacity });
    }
    window.record(now);
    window.check_after_record(k, duration)
}

/// "At most `k` events per `window`", validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdmissionRule {
    k: usize,
    window: Duration,
}

impl AdmissionRule {
    /// Create a rule admitting at most `k` events per `window`.
    ///
    /// # Errors
    /// `ZeroLookback` for `k == 0`, `ZeroDuration` for an empty window.
    pub fn new(k: usize, window: Duration) -> Result<Self, WindowError> {
        if k == 0 {
            return Err(WindowError::ZeroLookback);
        }
        if window.is_zero() {
            return Err(WindowError::ZeroDuration);
        }
        Ok(Self { k, window })
    }

    /// Events admitted per window.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Smallest window capacity that answers both checks for this rule.
    pub fn min_capacity(&self) -> usize {
        self.k + 1
    }

    fn min_nonzero_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::MIN.saturating_add(self.k)
    }

    fn check_capacity(&self, capacity: usize) -> Result<(), WindowError> {
        if capacity < self.min_capacity() {
            return Err(WindowError::LookbackOutOfRange {
                k: self.k,
                capacity,
            });
        }
        Ok(())
    }
}

/// One guarded resource: an event window, the rule applied to it and the
/// clock stamping its events.
///
/// # Example
/// ```
/// use dispatch_throttle::{AdmissionGuard, AdmissionRule, SystemClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let rule = AdmissionRule::new(2, Duration::from_secs(60)).unwrap();
/// let guard = AdmissionGuard::new(rule, Arc::new(SystemClock::new())).unwrap();
///
/// assert!(guard.try_acquire());
/// assert!(guard.try_acquire());
/// assert!(!guard.try_acquire());
/// ```
#[derive(Debug)]
pub struct AdmissionGuard {
    window: EventWindow,
    rule: AdmissionRule,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl AdmissionGuard {
    /// Guard sized exactly for `rule`.
    pub fn new(rule: AdmissionRule, clock: Arc<dyn Clock>) -> Result<Self, WindowError> {
        Self::with_capacity(rule, rule.min_capacity(), clock)
    }

    /// Guard whose window remembers `capacity` events.
    ///
    /// # Errors
    /// `LookbackOutOfRange` if `capacity` is too small for `rule`.
    pub fn with_capacity(
        rule: AdmissionRule,
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WindowError> {
        rule.check_capacity(capacity)?;
        Ok(Self {
            window: EventWindow::new(capacity)?,
            rule,
            clock,
            metrics: Metrics::new(),
        })
    }

    /// Report admission decisions into shared metrics.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether an action may proceed now. Does not record it.
    pub fn allow(&self) -> bool {
        // Capacity was validated against the rule, so the check cannot fail.
        let allowed = matches!(
            allow(&self.window, self.rule.k, self.rule.window, self.clock.now()),
            Ok(true)
        );
        self.metrics.record_admission(allowed);
        allowed
    }

    /// Record an action now without checking.
    pub fn record(&self) {
        self.window.record(self.clock.now());
    }

    /// Admit and record an action if the window allows it.
    pub fn try_acquire(&self) -> bool {
        let allowed = self.allow();
        if allowed {
            self.record();
        }
        allowed
    }

    /// Record an event now and report whether it exceeded the rule.
    pub fn record_and_check(&self) -> bool {
        matches!(
            record_and_check(&self.window, self.rule.k, self.rule.window, self.clock.now()),
            Ok(true)
        )
    }

    /// Resize the underlying window, keeping recent history.
    ///
    /// # Errors
    /// `LookbackOutOfRange` if `new_capacity` is too small for the rule.
    pub fn resize(&self, new_capacity: usize) -> Result<(), WindowError> {
        self.rule.check_capacity(new_capacity)?;
        self.window.resize(new_capacity)
    }

    /// The rule applied by this guard.
    pub fn rule(&self) -> AdmissionRule {
        self.rule
    }

    /// The underlying window.
    pub fn window(&self) -> &EventWindow {
        &self.window
    }
}

/// Lazily creates one event window per guarded resource key.
pub struct AdmissionRegistry<K, S> {
    storage: S,
    rule: AdmissionRule,
    capacity: NonZeroUsize,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    _key: PhantomData<fn(K)>,
}

impl<K, S> AdmissionRegistry<K, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    S: Storage<K, EventWindow>,
{
    /// Create a registry applying `rule` to every key.
    pub fn new(storage: S, rule: AdmissionRule, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            rule,
            capacity: rule.min_nonzero_capacity(),
            clock,
            metrics: Metrics::new(),
            _key: PhantomData,
        }
    }

    /// Give every new window `capacity` slots.
    ///
    /// # Errors
    /// `LookbackOutOfRange` if `capacity` is too small for the rule.
    pub fn with_capacity(mut self, capacity: usize) -> Result<Self, WindowError> {
        self.rule.check_capacity(capacity)?;
        self.capacity = NonZeroUsize::new(capacity).ok_or(WindowError::ZeroCapacity)?;
        Ok(self)
    }

    /// Report admission decisions into shared metrics.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    fn with_window<R>(&self, key: K, f: impl FnOnce(&EventWindow, Instant) -> R) -> R {
        let now = self.clock.now();
        let capacity = self.capacity;
        self.storage.with_entry_mut(
            key,
            || EventWindow::with_capacity(capacity),
            |window| f(window, now),
        )
    }

    /// Whether an action on `key` may proceed now. Does not record it.
    ///
    /// A key without a window has no history and is always allowed; no
    /// window is created for it.
    pub fn allow(&self, key: &K) -> bool {
        let rule = self.rule;
        let now = self.clock.now();
        let allowed = self
            .storage
            .with_entry(key, |window| {
                matches!(allow(window, rule.k, rule.window, now), Ok(true))
            })
            .unwrap_or(true);
        self.metrics.record_admission(allowed);
        allowed
    }

    /// Admit and record an action on `key` if its window allows it.
    pub fn try_acquire(&self, key: K) -> bool {
        let rule = self.rule;
        let allowed = self.with_window(key, |window, now| {
            let allowed = matches!(allow(window, rule.k, rule.window, now), Ok(true));
            if allowed {
                window.record(now);
            }
            allowed
        });
        self.metrics.record_admission(allowed);
        allowed
    }

    /// Record an event on `key` and report whether it exceeded the rule.
    pub fn record_and_check(&self, key: K) -> bool {
        let rule = self.rule;
        self.with_window(key, |window, now| {
            matches!(record_and_check(window, rule.k, rule.window, now), Ok(true))
        })
    }

    /// Forget the history of `key`.
    ///
    /// Returns `true` if a window existed.
    pub fn remove(&self, key: &K) -> bool {
        self.storage.remove(key).is_some()
    }

    /// Drop windows whose newest event is older than the rule's window.
    ///
    /// Such a window answers exactly like a fresh one, so pruning never
    /// changes a decision. Returns the number of windows dropped.
    pub fn prune_idle(&self) -> usize {
        let now = self.clock.now();
        let window = self.rule.window;
        let before = self.storage.len();
        self.storage.retain(|_, events| {
            events
                .latest()
                .is_some_and(|latest| now.saturating_duration_since(latest) <= window)
        });
        before.saturating_sub(self.storage.len())
    }

    /// Number of guarded resources currently tracked.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether no resource has been guarded yet.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// The rule applied to every key.
    pub fn rule(&self) -> AdmissionRule {
        self.rule
    }
}
