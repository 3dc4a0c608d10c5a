//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system, tokio and mock time)
//! - Storage implementations (sharded maps)
//! - The in-memory rate estimator owning endpoint buckets

pub mod buckets;
pub mod clock;
pub mod storage;

/// Mock implementations for testing.
///
/// Only available when the `test-helpers` feature is enabled, or during
/// test builds. To use these mocks in integration tests, add to your
/// `Cargo.toml`:
/// ```toml
/// [dev-dependencies]
/// dispatch-throttle = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
