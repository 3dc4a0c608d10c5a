//! Per-endpoint rate-limit accounting.
//!
//! A [`Bucket`] is the unit of mutual exclusion for outbound delivery: its
//! async lock guards the remaining-call count, the reset metadata and the
//! endpoint's [`Coalescer`].

use crate::application::ports::RateLimitInfo;
use crate::domain::coalescer::Coalescer;
use crate::domain::config::CoalescerConfig;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

/// Mutable state of one bucket, only reachable through [`Bucket::lock`].
#[derive(Debug)]
pub struct BucketState {
    remaining: u32,
    limit: u32,
    reset_after: Duration,
    reset_at: Option<Instant>,
    coalescer: Option<Coalescer>,
}

impl BucketState {
    /// Fresh state assuming `limit` calls per `reset_after`.
    pub fn new(limit: u32, reset_after: Duration) -> Self {
        Self {
            remaining: limit,
            limit,
            reset_after,
            reset_at: None,
            coalescer: None,
        }
    }

    /// Calls believed to be left in the current window.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Override the remaining-call count.
    pub fn set_remaining(&mut self, remaining: u32) {
        self.remaining = remaining;
    }

    /// Calls allowed per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Length of the reset window.
    pub fn reset_after(&self) -> Duration {
        self.reset_after
    }

    /// When the current window resets, if known.
    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    /// Start a window that resets at `reset_at`.
    pub fn set_reset_at(&mut self, reset_at: Instant) {
        self.reset_at = Some(reset_at);
    }

    /// Restore the full limit once the reset instant has passed.
    pub fn refresh(&mut self, now: Instant) {
        if let Some(reset_at) = self.reset_at {
            if now >= reset_at {
                self.remaining = self.limit;
                self.reset_at = None;
            }
        }
    }

    /// Count one call against the window, opening a local window if the
    /// remote has not reported one yet.
    pub fn consume(&mut self, now: Instant) {
        self.refresh(now);
        if self.reset_at.is_none() {
            self.reset_at = Some(now + self.reset_after);
        }
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Replace local estimates with what the remote reported.
    pub fn apply(&mut self, limits: RateLimitInfo, now: Instant) {
        self.limit = limits.limit;
        self.remaining = limits.remaining;
        self.reset_after = limits.reset_after;
        self.reset_at = Some(now + limits.reset_after);
    }

    /// Duration until at least `min_remaining` calls are available.
    ///
    /// Zero when enough calls remain or no reset instant is known.
    pub fn wait_time(&self, min_remaining: u32, now: Instant) -> Duration {
        if self.remaining >= min_remaining {
            return Duration::ZERO;
        }
        self.reset_at
            .map_or(Duration::ZERO, |reset_at| reset_at.saturating_duration_since(now))
    }

    /// The endpoint's coalescer, created on first use.
    pub fn coalescer_or_insert(&mut self, config: &CoalescerConfig) -> &mut Coalescer {
        self.coalescer
            .get_or_insert_with(|| Coalescer::new(config.clone()))
    }

    /// The endpoint's coalescer, if one was created.
    pub fn coalescer(&self) -> Option<&Coalescer> {
        self.coalescer.as_ref()
    }

    pub(crate) fn coalescer_mut(&mut self) -> Option<&mut Coalescer> {
        self.coalescer.as_mut()
    }

    /// Payloads waiting in the coalescer.
    pub fn backlog(&self) -> usize {
        self.coalescer.as_ref().map_or(0, Coalescer::len)
    }
}

/// Rate-limit bucket for one remote endpoint.
#[derive(Debug)]
pub struct Bucket {
    key: String,
    state: Mutex<BucketState>,
}

impl Bucket {
    /// Create a bucket for `key`.
    pub fn new(key: impl Into<String>, state: BucketState) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(state),
        }
    }

    /// The endpoint key this bucket accounts for.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Acquire the bucket, waiting for any other holder to release it.
    pub async fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().await
    }

    /// Acquire the bucket only if nobody holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, BucketState>> {
        self.state.try_lock().ok()
    }
}
