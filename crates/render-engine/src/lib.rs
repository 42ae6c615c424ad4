//! Inkmark Render Engine
//!
//! Turns a placement plan into an encoded file: rasterizes watermark
//! text, wires the overlays into an ffmpeg filter graph, and supervises
//! the encoder process.
//!
//! # Pipeline Architecture
//!
//! ```text
//! text + style ── WatermarkSynthesizer ── mark{i}.png ──┐
//!                                                       │
//! source ── probe ── PlacementPlan ── FilterGraph ──────┤
//!                                                       ▼
//!                                                 TranscodePlan
//!                                                       │
//!                               TranscodeSupervisor (timeout, cancel)
//!                                                       │
//!                                                       ▼
//!                                                   output file
//! ```

pub mod encoder;
pub mod filter_graph;
pub mod glyphs;
pub mod plan;
pub mod probe;
pub mod supervisor;
pub mod watermark;

pub use encoder::{Encoder, FfmpegEncoder};
pub use filter_graph::{build_filter_graph, overlay_exprs, FilterGraph, OverlayExpr, ScaleSpec};
pub use plan::{CodecSettings, TranscodePlan};
pub use probe::{command_exists, parse_probe_output, probe_media, MediaInfo};
pub use supervisor::{SupervisorConfig, TranscodeOutcome, TranscodeSupervisor};
pub use watermark::{image_size, write_png, WatermarkSynthesizer};
