//! Inkmark Placement
//!
//! Decides how big each watermark layer is and where it sits over time:
//! - **Sizing:** Derive a [`WatermarkSpec`](inkmark_job_model::WatermarkSpec)
//!   from frame size so marks keep the same visual proportion at any resolution
//! - **Planner:** Turn a placement mode into bounded per-layer trajectories
//!
//! This crate is pure computation with no I/O and no process spawning.
//! All inputs are data; all outputs are data.

pub mod planner;
pub mod sizing;

pub use planner::{PlacementPlanner, PlannerConfig};
pub use sizing::{fit_factor, layer_spec};
