//! Test doubles for infrastructure adapters.
//!
//! Lets tests control time, capture log output and script transport
//! replies without a network.

pub mod clock;
pub mod layer;
pub mod transport;

pub use clock::MockClock;
pub use layer::{CapturedEvent, MockCaptureLayer};
pub use transport::{MockTransport, SentRequest};
