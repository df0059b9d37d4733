//! # entigroup testkit
//!
//! Test utilities for entigroup.
//!
//! This crate provides:
//! - Fixture class metadata and session helpers
//! - Property-based test generators using proptest
//! - Cursors and observers for exercising failure translation
//! - Opt-in log output for tests
//!
//! ## Usage
//!
//! ```rust
//! use entigroup_testkit::prelude::*;
//!
//! with_session(|session| {
//!     let flight = session.new_object("Flight").unwrap();
//!     session.set(flight, "origin", "BOS").unwrap();
//!     session.make_persistent(flight).unwrap();
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cursors;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cursors::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use cursors::*;
pub use fixtures::*;
pub use generators::*;

/// Routes `tracing` output to the test writer, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
