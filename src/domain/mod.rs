//! Domain layer - pure data structures with no runtime dependencies.
//!
//! This layer contains the core algorithms of the subsystem:
//! - Fixed-capacity sliding event windows for "K events per duration" checks
//! - Payload coalescing under a size cap
//! - Splitting of oversized payloads with fence preservation
//! - Validated size configuration
//!
//! All types in this layer are synchronous and easily testable.

pub mod coalescer;
pub mod config;
pub mod splitter;
pub mod window;
