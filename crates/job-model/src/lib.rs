//! Inkmark Job Model
//!
//! Defines the core data contracts for watermark jobs:
//! - **Style:** Per-user placement mode, sizing and encode settings
//! - **Media:** Submitted media references and their classification
//! - **Job:** Immutable per-job snapshots and lifecycle status
//! - **Watermark:** The raster watermark description
//! - **Trajectory:** Where each watermark layer sits over time
//!
//! All coordinates are in output pixels, origin top-left.

pub mod geometry;
pub mod job;
pub mod media;
pub mod style;
pub mod trajectory;
pub mod watermark;

pub use geometry::*;
pub use job::*;
pub use media::*;
pub use style::*;
pub use trajectory::*;
pub use watermark::*;
