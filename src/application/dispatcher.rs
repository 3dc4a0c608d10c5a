//! Rate-limit aware, coalescing delivery of outbound text payloads.
//!
//! The [`Dispatcher`] serializes delivery per endpoint through the
//! endpoint's [`Bucket`](crate::application::bucket::Bucket) lock, merges
//! queued payloads with a [`Coalescer`](crate::domain::coalescer::Coalescer)
//! and honours the bucket's rate-limit state before every transmission.
//!
//! One dispatch cycle:
//! 1. lock the endpoint's bucket and append the new payload (split first if
//!    it is oversized),
//! 2. optionally release the lock for a soft wait so concurrent producers
//!    can add to the same batch,
//! 3. drain and send merged batches, taking a hard wait whenever the bucket
//!    has no calls left, until the backlog is empty.

use crate::application::metrics::Metrics;
use crate::application::ports::{OutboundRequest, RateEstimator, Transport, TransportError};
use crate::domain::coalescer::Coalescer;
use crate::domain::config::{
    CoalescerConfig, ConfigError, Fence, SplitterConfig, DEFAULT_MAX_PAYLOAD,
    DEFAULT_SOFT_LIMIT, DEFAULT_SPLIT_MARGIN,
};
use crate::domain::splitter::Splitter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

/// Default number of calls that must be available before sending without a
/// soft wait.
pub const DEFAULT_MIN_REMAINING: u32 = 2;

/// Error returned by a dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The transport failed; the cycle stopped and remaining payloads stay
    /// queued for the next dispatch
    Transport(TransportError),
    /// A spawned dispatch task panicked or was cancelled
    TaskFailed(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Transport(e) => write!(f, "{}", e),
            DispatchError::TaskFailed(reason) => write!(f, "dispatch task failed: {}", reason),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Transport(e) => Some(e),
            DispatchError::TaskFailed(_) => None,
        }
    }
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        DispatchError::Transport(e)
    }
}

/// When the dispatcher takes advisory waits.
///
/// A soft wait trades latency for batching: while the dispatcher sleeps
/// without holding the bucket, other producers keep appending to the same
/// coalescer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SoftWaitPolicy {
    /// Skip the wait before the first batch once the backlog crossed the
    /// soft limit, since a flush is already due
    #[default]
    SkipWhenBacklogged,
    /// Always wait before the first batch
    Always,
    /// Never take soft waits; only hard waits apply
    Never,
}

impl SoftWaitPolicy {
    fn waits_before_first_batch(self, backlog_signal: usize) -> bool {
        match self {
            SoftWaitPolicy::SkipWhenBacklogged => backlog_signal == 0,
            SoftWaitPolicy::Always => true,
            SoftWaitPolicy::Never => false,
        }
    }

    fn waits_between_batches(self) -> bool {
        self != SoftWaitPolicy::Never
    }
}

/// Outcome of a successful dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Physical transmissions made
    pub transmissions: usize,
    /// Payloads delivered across those transmissions
    pub payloads: usize,
}

#[derive(Debug)]
struct DispatcherConfig {
    coalescer: CoalescerConfig,
    splitter: Splitter,
    min_remaining: u32,
    soft_wait_policy: SoftWaitPolicy,
}

/// Builder for constructing a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherBuilder {
    max_payload: usize,
    soft_limit: usize,
    separator: String,
    split_margin: usize,
    fence: Option<Fence>,
    min_remaining: u32,
    soft_wait_policy: SoftWaitPolicy,
    metrics: Option<Metrics>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            soft_limit: DEFAULT_SOFT_LIMIT,
            separator: "\n".to_string(),
            split_margin: DEFAULT_SPLIT_MARGIN,
            fence: Some(Fence::default()),
            min_remaining: DEFAULT_MIN_REMAINING,
            soft_wait_policy: SoftWaitPolicy::default(),
            metrics: None,
        }
    }
}

impl DispatcherBuilder {
    /// Maximum characters per transmission, for both merging and splitting.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Backlog size at which a flush is considered due.
    pub fn with_soft_limit(mut self, soft_limit: usize) -> Self {
        self.soft_limit = soft_limit;
        self
    }

    /// Separator inserted between merged payloads.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// How close to the chunk budget the splitter looks for a line break.
    pub fn with_split_margin(mut self, margin: usize) -> Self {
        self.split_margin = margin;
        self
    }

    /// Fence preserved across split chunks, or `None` to disable re-fencing.
    pub fn with_fence(mut self, fence: Option<Fence>) -> Self {
        self.fence = fence;
        self
    }

    /// Calls that must be available before sending without a soft wait.
    pub fn with_min_remaining(mut self, min_remaining: u32) -> Self {
        self.min_remaining = min_remaining;
        self
    }

    /// When to take advisory waits.
    pub fn with_soft_wait_policy(mut self, policy: SoftWaitPolicy) -> Self {
        self.soft_wait_policy = policy;
        self
    }

    /// Report into shared metrics.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the dispatcher.
    ///
    /// # Errors
    /// Returns `ConfigError` if the size configuration is invalid.
    pub fn build<E, T>(
        self,
        estimator: Arc<E>,
        transport: Arc<T>,
    ) -> Result<Dispatcher<E, T>, ConfigError>
    where
        E: RateEstimator,
        T: Transport,
    {
        let coalescer = CoalescerConfig::new(self.max_payload, self.soft_limit, self.separator)?;
        let splitter = Splitter::new(SplitterConfig::new(
            self.max_payload,
            self.split_margin,
            self.fence,
        )?)?;

        Ok(Dispatcher {
            estimator,
            transport,
            config: Arc::new(DispatcherConfig {
                coalescer,
                splitter,
                min_remaining: self.min_remaining,
                soft_wait_policy: self.soft_wait_policy,
            }),
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}

/// Drives coalesced, rate-limited delivery to remote endpoints.
///
/// Cheap to clone; clones share the estimator, transport and metrics.
#[derive(Debug)]
pub struct Dispatcher<E, T> {
    estimator: Arc<E>,
    transport: Arc<T>,
    config: Arc<DispatcherConfig>,
    metrics: Metrics,
}

impl<E, T> Clone for Dispatcher<E, T> {
    fn clone(&self) -> Self {
        Self {
            estimator: Arc::clone(&self.estimator),
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
            metrics: self.metrics.clone(),
        }
    }
}

impl Dispatcher<(), ()> {
    /// Create a builder for configuring a dispatcher.
    ///
    /// Defaults:
    /// - Max payload: 2000 characters
    /// - Soft limit: 1000 characters
    /// - Separator: newline
    /// - Split margin: 100 characters, fenced with "```"
    /// - Min remaining: 2 calls
    /// - Soft wait policy: skip when backlogged
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }
}

impl<E, T> Dispatcher<E, T>
where
    E: RateEstimator,
    T: Transport,
{
    /// Queue `content` for `endpoint` and deliver the endpoint's backlog.
    pub async fn send(
        &self,
        endpoint: &str,
        content: &str,
    ) -> Result<DispatchReport, DispatchError> {
        self.dispatch(endpoint, Some(content)).await
    }

    /// Deliver whatever is queued for `endpoint` without adding to it.
    pub async fn flush(&self, endpoint: &str) -> Result<DispatchReport, DispatchError> {
        self.dispatch(endpoint, None).await
    }

    /// Run one dispatch cycle for `endpoint`.
    ///
    /// `None` appends nothing and only flushes a previously deferred
    /// backlog. On a transport error the cycle stops and the error is
    /// returned; batches already sent stay sent and payloads not yet drained
    /// stay queued.
    pub async fn dispatch(
        &self,
        endpoint: &str,
        content: Option<&str>,
    ) -> Result<DispatchReport, DispatchError> {
        let config = &self.config;
        let bucket = self.estimator.bucket(endpoint);
        let mut state = bucket.lock().await;

        let backlog_signal = {
            let coalescer = state.coalescer_or_insert(&config.coalescer);
            self.enqueue(coalescer, content)
        };

        let soft_wait = self.estimator.wait_time(&mut state, config.min_remaining);
        if !soft_wait.is_zero()
            && config
                .soft_wait_policy
                .waits_before_first_batch(backlog_signal)
        {
            trace!(endpoint, wait_ms = millis(soft_wait), "soft wait before draining");
            self.metrics.record_soft_wait();
            drop(state);
            sleep(soft_wait).await;
            state = bucket.lock().await;
        }

        let mut report = DispatchReport::default();
        loop {
            let Some(batch) = state.coalescer_mut().and_then(Coalescer::drain) else {
                break;
            };

            let hard_wait = self.estimator.wait_time(&mut state, 1);
            if !hard_wait.is_zero() {
                trace!(endpoint, wait_ms = millis(hard_wait), "hard wait before sending");
                self.metrics.record_hard_wait();
                sleep(hard_wait).await;
            }
            self.estimator.consume(&mut state);

            debug!(
                endpoint,
                payloads = batch.payloads,
                chars = batch.content.chars().count(),
                backlog = batch.remaining,
                remaining = state.remaining(),
                "sending batch"
            );
            let request = OutboundRequest::text(endpoint, batch.content);
            match self.transport.send(request).await {
                Ok(response) => {
                    self.estimator.release(&mut state, response.limits);
                    self.metrics.record_transmission(batch.payloads);
                    report.transmissions += 1;
                    report.payloads += batch.payloads;
                }
                Err(error) => {
                    self.estimator.release(&mut state, error.limits);
                    self.metrics.record_transport_error();
                    warn!(
                        endpoint,
                        error = %error,
                        dropped = batch.payloads,
                        backlog = batch.remaining,
                        "transport failed, stopping dispatch"
                    );
                    return Err(DispatchError::Transport(error));
                }
            }

            if batch.remaining == 0 {
                break;
            }

            if config.soft_wait_policy.waits_between_batches() {
                let soft_wait = self.estimator.wait_time(&mut state, config.min_remaining);
                if !soft_wait.is_zero() {
                    trace!(endpoint, wait_ms = millis(soft_wait), "soft wait between batches");
                    self.metrics.record_soft_wait();
                    sleep(soft_wait).await;
                }
            }
        }

        Ok(report)
    }

    fn enqueue(&self, coalescer: &mut Coalescer, content: Option<&str>) -> usize {
        let Some(content) = content.filter(|c| !c.is_empty()) else {
            return coalescer.append("");
        };
        let mut signal = 0;
        for chunk in self.config.splitter.split(content) {
            signal = coalescer.append(chunk.into_content());
            self.metrics.record_enqueued();
        }
        signal
    }

    /// The metrics this dispatcher reports into.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The rate estimator owning the buckets.
    pub fn estimator(&self) -> &Arc<E> {
        &self.estimator
    }
}

impl<E, T> Dispatcher<E, T>
where
    E: RateEstimator + 'static,
    T: Transport + 'static,
{
    /// Send `content` to `endpoint` on a spawned task.
    ///
    /// Must be called within a tokio runtime. The returned handle can be
    /// dropped; the task keeps running and logs its own failures.
    pub fn spawn_send(
        &self,
        endpoint: impl Into<String>,
        content: impl Into<String>,
    ) -> DispatchHandle {
        let dispatcher = self.clone();
        let endpoint = endpoint.into();
        let content = content.into();
        DispatchHandle {
            handle: tokio::spawn(async move { dispatcher.send(&endpoint, &content).await }),
        }
    }
}

/// Handle to a spawned dispatch task.
///
/// Dropping the handle detaches the task.
#[derive(Debug)]
pub struct DispatchHandle {
    handle: JoinHandle<Result<DispatchReport, DispatchError>>,
}

impl DispatchHandle {
    /// Wait for the task to finish.
    ///
    /// # Errors
    /// The task's own error, or `TaskFailed` if it panicked or was aborted.
    pub async fn wait(self) -> Result<DispatchReport, DispatchError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(DispatchError::TaskFailed(e.to_string())),
        }
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task at its next suspension point.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::TransportResponse;
    use crate::infrastructure::buckets::BucketRegistry;
    use crate::infrastructure::clock::TokioClock;
    use crate::infrastructure::mocks::MockTransport;

    fn dispatcher(
        transport: MockTransport,
        builder: DispatcherBuilder,
    ) -> Dispatcher<BucketRegistry, MockTransport> {
        let registry = BucketRegistry::builder()
            .with_clock(Arc::new(TokioClock::new()))
            .build();
        builder.build(Arc::new(registry), Arc::new(transport)).unwrap()
    }

    #[test]
    fn test_builder_rejects_invalid_sizes() {
        let registry = Arc::new(BucketRegistry::new());
        let transport = Arc::new(MockTransport::new());

        let result = Dispatcher::builder()
            .with_max_payload(100)
            .with_soft_limit(100)
            .build(Arc::clone(&registry), Arc::clone(&transport));
        assert!(matches!(result, Err(ConfigError::SoftLimitTooLarge { .. })));

        let result = Dispatcher::builder()
            .with_max_payload(100)
            .with_soft_limit(10)
            .with_split_margin(100)
            .build(registry, transport);
        assert!(matches!(result, Err(ConfigError::NoRoomForContent { .. })));
    }

    #[test]
    fn test_soft_wait_policy() {
        assert!(SoftWaitPolicy::SkipWhenBacklogged.waits_before_first_batch(0));
        assert!(!SoftWaitPolicy::SkipWhenBacklogged.waits_before_first_batch(3));
        assert!(SoftWaitPolicy::Always.waits_before_first_batch(3));
        assert!(!SoftWaitPolicy::Never.waits_before_first_batch(0));
        assert!(!SoftWaitPolicy::Never.waits_between_batches());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_send() {
        let d = dispatcher(MockTransport::new(), Dispatcher::builder());

        let report = d.send("channels/1/messages", "hello").await.unwrap();
        assert_eq!(
            report,
            DispatchReport {
                transmissions: 1,
                payloads: 1
            }
        );
        assert_eq!(d.transport.bodies(), vec!["hello".to_string()]);
        assert_eq!(d.metrics().payloads_enqueued(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_of_empty_endpoint_sends_nothing() {
        let d = dispatcher(MockTransport::new(), Dispatcher::builder());

        let report = d.flush("channels/1/messages").await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert!(d.transport.bodies().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_payload_is_split_before_queueing() {
        let d = dispatcher(
            MockTransport::new(),
            Dispatcher::builder()
                .with_max_payload(50)
                .with_soft_limit(25)
                .with_split_margin(10),
        );
        let content = "word ".repeat(30);

        let report = d.send("ep", &content).await.unwrap();
        let bodies = d.transport.bodies();
        assert_eq!(report.transmissions, bodies.len());
        assert!(bodies.len() >= 3);
        assert!(bodies.iter().all(|b| b.chars().count() <= 50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_stops_cycle_and_keeps_backlog() {
        let transport = MockTransport::new();
        transport.push_reply(Ok(TransportResponse::default()));
        transport.push_error(TransportError::new("connection reset"));
        let d = dispatcher(
            transport.clone(),
            Dispatcher::builder()
                .with_max_payload(20)
                .with_soft_limit(10)
                .with_split_margin(5)
                .with_fence(None),
        );
        {
            let bucket = d.estimator().bucket("ep");
            let mut state = bucket.lock().await;
            let coalescer = state.coalescer_or_insert(&d.config.coalescer);
            for word in ["aaaaaaaaaa", "bbbbbbbbbb", "cccccccccc"] {
                coalescer.append(word);
            }
        }

        let err = d.flush("ep").await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
        assert_eq!(
            transport.bodies(),
            vec!["aaaaaaaaaa".to_string(), "bbbbbbbbbb".to_string()]
        );
        assert_eq!(d.metrics().transport_errors(), 1);

        let bucket = d.estimator().bucket("ep");
        assert_eq!(bucket.lock().await.backlog(), 1);
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::from(TransportError::new("timeout").with_status(504));
        assert_eq!(err.to_string(), "transport failed with status 504: timeout");
        assert!(std::error::Error::source(&err).is_some());
    }
}
