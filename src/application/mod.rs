//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain structures at runtime:
//! - Admission control over event windows
//! - Per-endpoint bucket accounting
//! - The coalescing dispatcher
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from time sources, storage and the network.

pub mod admission;
pub mod bucket;
pub mod dispatcher;
pub mod metrics;
pub mod ports;
