//! Ports (interfaces) for the application layer.
//!
//! The dispatcher talks to the outside world only through these traits:
//! a [`Clock`] for time, a [`RateEstimator`] owning per-endpoint buckets and
//! a [`Transport`] that physically delivers a payload. Infrastructure
//! provides the production adapters; tests substitute fakes.

use crate::application::bucket::{Bucket, BucketState};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Port for obtaining current time.
///
/// Infrastructure provides `SystemClock`, `TokioClock` and, for tests,
/// `MockClock`.
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for concurrent key-value storage.
///
/// Used to hold one entry per guarded resource or remote endpoint.
/// Infrastructure provides `ShardedStorage`.
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Access an entry with mutable access, creating it if necessary.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `factory` - Function to create a new value if the key doesn't exist
    /// * `accessor` - Function that gets mutable access to the value
    ///
    /// # Returns
    /// The result from the accessor function
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Read an existing entry without creating one.
    ///
    /// Returns `None` if `key` is absent.
    fn with_entry<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&V) -> R;

    /// Remove an entry, returning its value.
    fn remove(&self, key: &K) -> Option<V>;

    /// Keep only the entries for which `f` returns `true`.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}

/// Authoritative rate-limit metadata reported by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Calls allowed per reset window
    pub limit: u32,
    /// Calls left in the current window
    pub remaining: u32,
    /// Time until the window resets
    pub reset_after: Duration,
}

/// Port owning the per-endpoint rate-limit buckets.
///
/// One [`Bucket`] exists per endpoint key, created lazily on first use and
/// retained for the life of the estimator.
pub trait RateEstimator: Send + Sync + Debug {
    /// Get or create the bucket for `endpoint`.
    fn bucket(&self, endpoint: &str) -> Arc<Bucket>;

    /// Duration until at least `min_remaining` calls are available.
    ///
    /// Refreshes the bucket first if its reset window has passed.
    fn wait_time(&self, state: &mut BucketState, min_remaining: u32) -> Duration;

    /// Optimistically account for one call about to be made.
    fn consume(&self, state: &mut BucketState);

    /// Fold the metadata of a real response back into the bucket.
    fn release(&self, state: &mut BucketState, limits: Option<RateLimitInfo>);
}

/// A merged payload ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// HTTP-style method
    pub method: &'static str,
    /// Target endpoint key
    pub endpoint: String,
    /// MIME type of `body`
    pub content_type: &'static str,
    /// Serialized payload
    pub body: String,
}

impl OutboundRequest {
    /// Plain-text `POST` of `body` to `endpoint`.
    pub fn text(endpoint: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST",
            endpoint: endpoint.into(),
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }
}

/// Successful delivery result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    /// Raw response body
    pub body: Vec<u8>,
    /// Rate-limit metadata carried by the response, if any
    pub limits: Option<RateLimitInfo>,
}

/// Network or remote failure reported by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Human-readable failure description
    pub message: String,
    /// Remote status code, when a response was received
    pub status: Option<u16>,
    /// Rate-limit metadata carried by an error response
    pub limits: Option<RateLimitInfo>,
}

impl TransportError {
    /// Failure without a remote response.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            limits: None,
        }
    }

    /// Attach the remote status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach rate-limit metadata from the error response.
    pub fn with_limits(mut self, limits: RateLimitInfo) -> Self {
        self.limits = Some(limits);
        self
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "transport failed with status {}: {}", status, self.message),
            None => write!(f, "transport failed: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Port for physically sending a payload to the remote API.
///
/// Called with the endpoint's bucket locked, so at most one call per
/// endpoint is in flight. Implementations do not retry.
pub trait Transport: Send + Sync {
    /// Deliver `request`.
    fn send(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}
