//! # dqs-runtime
//!
//! Host-side task runtime for the STARS data queue scheduler.
//!
//! This is the workspace root crate that re-exports core functionality.
//! For direct usage, depend on individual sub-crates:
//!
//! - [`dqs-core`] - Task building, kernel control protocol, simulator
//! - [`dqs-ctl`] - CLI tool (`dqs-ctl` binary)

pub use dqs_core::*;

/// Crate version, as published.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
