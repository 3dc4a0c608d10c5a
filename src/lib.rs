//! # dispatch-throttle
//!
//! Sliding-window admission control and rate-limit aware, coalescing
//! delivery of outbound text payloads.
//!
//! The crate solves two problems:
//!
//! 1. **Admission control**: allow an action only if fewer than `k` of the
//!    same kind happened within a duration, using a fixed-capacity ring of
//!    timestamps ([`EventWindow`]).
//! 2. **Outbound dispatch**: deliver text payloads to a remote API that
//!    limits calls per endpoint. Payloads queued for the same endpoint are
//!    merged into as few transmissions as the size cap allows, oversized
//!    payloads are split, and every transmission waits for the endpoint's
//!    rate-limit budget ([`Dispatcher`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dispatch_throttle::{
//!     BucketRegistry, Dispatcher, OutboundRequest, Transport, TransportError,
//!     TransportResponse,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Stdout;
//!
//! impl Transport for Stdout {
//!     async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
//!         println!("{} {}: {}", request.method, request.endpoint, request.body);
//!         Ok(TransportResponse::default())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::builder()
//!     .with_max_payload(2000)
//!     .with_soft_limit(1000)
//!     .build(Arc::new(BucketRegistry::new()), Arc::new(Stdout))?;
//!
//! let report = dispatcher.send("channels/42/messages", "hello").await?;
//! assert_eq!(report.transmissions, 1);
//!
//! // Fire and forget; the task logs its own failures.
//! dispatcher.spawn_send("channels/42/messages", "world");
//! # Ok(())
//! # }
//! ```
//!
//! ## Admission Control
//!
//! ```rust
//! use dispatch_throttle::{AdmissionGuard, AdmissionRule, SystemClock};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! // At most 3 joins per 10 seconds.
//! let rule = AdmissionRule::new(3, Duration::from_secs(10)).unwrap();
//! let guard = AdmissionGuard::new(rule, Arc::new(SystemClock::new())).unwrap();
//!
//! assert!(guard.try_acquire());
//! assert!(guard.try_acquire());
//! assert!(guard.try_acquire());
//! assert!(!guard.try_acquire());
//! ```
//!
//! For one window per guarded resource, use [`AdmissionRegistry`].
//!
//! ## Dispatch Cycle
//!
//! Each endpoint owns a [`Bucket`] holding its rate-limit state and a
//! [`Coalescer`]. A dispatch locks the bucket, appends the payload, may
//! release the lock for a *soft wait* so concurrent producers can join the
//! batch ([`SoftWaitPolicy`]), then drains batches one by one. Before each
//! transmission a *hard wait* is taken if the bucket has no calls left.
//! The remote's rate-limit metadata ([`RateLimitInfo`]) is folded back into
//! the bucket after each response.
//!
//! A transport failure ends the cycle and is returned as
//! [`DispatchError::Transport`]; nothing is retried and payloads not yet
//! drained stay queued for the next dispatch on that endpoint.
//!
//! ## Observability
//!
//! Diagnostics go through `tracing`: `trace` for waits, `debug` for each
//! transmission and `warn` for transport failures. Counters are available
//! through [`Metrics`]:
//!
//! ```rust
//! # use dispatch_throttle::Metrics;
//! let metrics = Metrics::new();
//! let snapshot = metrics.snapshot();
//! println!(
//!     "{} transmissions, {:.1} payloads each",
//!     snapshot.transmissions,
//!     snapshot.coalescing_ratio()
//! );
//! ```
//!
//! ## Lengths
//!
//! All sizes are measured in characters (Unicode scalar values), never
//! bytes. Cuts never split a character.

// Domain layer - pure data structures
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    coalescer::{Batch, Coalescer, PendingPayload},
    config::{CoalescerConfig, ConfigError, Fence, SplitterConfig},
    splitter::{Chunk, Splitter},
    window::{EventWindow, WindowError},
};

pub use application::{
    admission::{allow, record_and_check, AdmissionGuard, AdmissionRegistry, AdmissionRule},
    bucket::{Bucket, BucketState},
    dispatcher::{
        DispatchError, DispatchHandle, DispatchReport, Dispatcher, DispatcherBuilder,
        SoftWaitPolicy,
    },
    metrics::{Metrics, MetricsSnapshot},
    ports::{
        Clock, OutboundRequest, RateEstimator, RateLimitInfo, Storage, Transport,
        TransportError, TransportResponse,
    },
};

pub use infrastructure::{
    buckets::{BucketRegistry, BucketRegistryBuilder},
    clock::{SystemClock, TokioClock},
    storage::ShardedStorage,
};
