//! In-memory rate-limit estimator.
//!
//! Buckets are created lazily per endpoint and live as long as the registry.
//! Until a response reports real limits, a bucket assumes the configured
//! default limit per default reset window.

use crate::application::bucket::{Bucket, BucketState};
use crate::application::ports::{Clock, RateEstimator, RateLimitInfo};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::storage::ShardedStorage;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Calls assumed per window before any metadata is observed.
pub const DEFAULT_LIMIT: u32 = 5;

/// Reset window assumed before any metadata is observed.
pub const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(5);

/// Builder for [`BucketRegistry`].
#[derive(Debug)]
pub struct BucketRegistryBuilder {
    default_limit: u32,
    default_reset_after: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for BucketRegistryBuilder {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            default_reset_after: DEFAULT_RESET_AFTER,
            clock: Arc::new(SystemClock::new()),
        }
    }
}

impl BucketRegistryBuilder {
    /// Calls assumed per window for new buckets.
    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }

    /// Reset window assumed for new buckets.
    pub fn with_default_reset_after(mut self, reset_after: Duration) -> Self {
        self.default_reset_after = reset_after;
        self
    }

    /// Clock used for reset arithmetic.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the registry.
    pub fn build(self) -> BucketRegistry {
        BucketRegistry {
            buckets: ShardedStorage::new(),
            default_limit: self.default_limit,
            default_reset_after: self.default_reset_after,
            clock: self.clock,
        }
    }
}

/// [`RateEstimator`] keeping one bucket per endpoint in a sharded map.
#[derive(Debug)]
pub struct BucketRegistry {
    buckets: ShardedStorage<String, Arc<Bucket>>,
    default_limit: u32,
    default_reset_after: Duration,
    clock: Arc<dyn Clock>,
}

impl BucketRegistry {
    /// Registry with default limits and the system clock.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring the registry.
    pub fn builder() -> BucketRegistryBuilder {
        BucketRegistryBuilder::default()
    }

    /// Number of endpoints seen so far.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no endpoint has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// The bucket for `endpoint`, if one was created.
    pub fn get(&self, endpoint: &str) -> Option<Arc<Bucket>> {
        self.buckets.get_cloned(endpoint)
    }
}

impl Default for BucketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RateEstimator for BucketRegistry {
    fn bucket(&self, endpoint: &str) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.get_cloned(endpoint) {
            return bucket;
        }
        self.buckets.get_or_insert_with(endpoint.to_string(), || {
            trace!(endpoint, "creating bucket");
            Arc::new(Bucket::new(
                endpoint,
                BucketState::new(self.default_limit, self.default_reset_after),
            ))
        })
    }

    fn wait_time(&self, state: &mut BucketState, min_remaining: u32) -> Duration {
        let now = self.clock.now();
        state.refresh(now);
        state.wait_time(min_remaining, now)
    }

    fn consume(&self, state: &mut BucketState) {
        state.consume(self.clock.now());
    }

    fn release(&self, state: &mut BucketState, limits: Option<RateLimitInfo>) {
        if let Some(limits) = limits {
            state.apply(limits, self.clock.now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::time::Instant;

    fn registry(clock: &MockClock) -> BucketRegistry {
        BucketRegistry::builder()
            .with_default_limit(2)
            .with_clock(Arc::new(clock.clone()))
            .build()
    }

    #[test]
    fn test_bucket_is_shared_per_endpoint() {
        let registry = BucketRegistry::new();
        let a = registry.bucket("channels/1/messages");
        let b = registry.bucket("channels/1/messages");
        let c = registry.bucket("channels/2/messages");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("channels/3/messages").is_none());
    }

    #[tokio::test]
    async fn test_wait_after_budget_spent() {
        let clock = MockClock::new(Instant::now());
        let registry = registry(&clock);
        let bucket = registry.bucket("ep");
        let mut state = bucket.lock().await;

        assert_eq!(registry.wait_time(&mut state, 1), Duration::ZERO);
        registry.consume(&mut state);
        assert_eq!(registry.wait_time(&mut state, 2), DEFAULT_RESET_AFTER);
        registry.consume(&mut state);

        clock.advance(Duration::from_secs(2));
        assert_eq!(registry.wait_time(&mut state, 1), Duration::from_secs(3));

        clock.advance(Duration::from_secs(3));
        assert_eq!(registry.wait_time(&mut state, 1), Duration::ZERO);
        assert_eq!(state.remaining(), 2);
    }

    #[tokio::test]
    async fn test_release_applies_reported_limits() {
        let clock = MockClock::new(Instant::now());
        let registry = registry(&clock);
        let bucket = registry.bucket("ep");
        let mut state = bucket.lock().await;

        registry.consume(&mut state);
        registry.release(&mut state, None);
        assert_eq!(state.remaining(), 1);

        registry.release(
            &mut state,
            Some(RateLimitInfo {
                limit: 10,
                remaining: 0,
                reset_after: Duration::from_secs(1),
            }),
        );
        assert_eq!(state.limit(), 10);
        assert_eq!(registry.wait_time(&mut state, 1), Duration::from_secs(1));
    }
}
