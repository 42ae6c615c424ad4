//! Inkmark Common Utilities
//!
//! Shared infrastructure for all Inkmark crates:
//! - Error taxonomy and result aliases
//! - Progress throttling and scratch-file timestamps
//! - Tracing/logging initialization
//! - Configuration loading
//! - Human-readable byte sizes

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod units;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use units::*;
