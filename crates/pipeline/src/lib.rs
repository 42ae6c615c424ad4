//! Inkmark Pipeline
//!
//! Per-user watermark job pipeline: conversation state, a FIFO job queue
//! with one worker per user, and the job runner that drives download,
//! rendering, encoding and delivery.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  SessionRegistry                     │
//! │   user ─▶ SessionHandle { Session, queue, worker }   │
//! └──────────────┬───────────────────────────────────────┘
//!                │ lazily spawned, one per user
//!                ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                  worker_loop ─▶ JobRunner            │
//! │  MediaFetcher ─▶ Encoder::probe ─▶ synthesize/plan   │
//! │      ─▶ Encoder::transcode ─▶ ChatOutbox::deliver    │
//! └──────────────┬───────────────────────────────────────┘
//!                ▼
//!          ScratchDir / JobFiles (removed on every exit)
//! ```

pub mod local;
pub mod registry;
pub mod scratch;
pub mod session;
pub mod transport;
pub mod worker;

pub use local::{DirectoryOutbox, LocalFetcher, StatvfsProbe};
pub use registry::{SessionHandle, SessionRegistry, SessionStatus};
pub use scratch::{JobFiles, ScratchDir, SweepReport};
pub use session::{CancelOutcome, JobRecord, Session, SessionStep};
pub use transport::{ChatOutbox, Delivery, MediaFetcher, SpaceProbe, StatusUpdate};
pub use worker::{required_space, JobRunner};
