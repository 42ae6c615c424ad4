//! Collaborator boundaries: the chat transport and the host filesystem.
//!
//! The pipeline never talks to a chat platform directly. Inbound media is
//! pulled through a [`MediaFetcher`], status edits and finished files go out
//! through a [`ChatOutbox`], and free disk space is read through a
//! [`SpaceProbe`]. Local implementations live in [`crate::local`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use inkmark_common::error::{FailureKind, InkmarkResult};
use inkmark_job_model::{JobId, MediaKind, MediaRef, UserId};

/// Progress notification for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusUpdate {
    /// Accepted; 1-based place in line, counting a running job.
    Queued { position: usize },
    /// Share of the input received, in `[0, 1]`.
    Downloading { progress: f64 },
    /// Encoder progress in `[0, 1]`.
    Encoding { progress: f64 },
    /// Share of the result sent, in `[0, 1]`.
    Uploading { progress: f64 },
    Done,
    Failed { kind: FailureKind, reason: String },
    Cancelled,
}

impl StatusUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatusUpdate::Done | StatusUpdate::Failed { .. } | StatusUpdate::Cancelled
        )
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusUpdate::Queued { position } => write!(f, "Queued (position {position})"),
            StatusUpdate::Downloading { progress } => {
                write!(f, "Downloading {:.0}%", progress * 100.0)
            }
            StatusUpdate::Encoding { progress } => {
                write!(f, "Encoding {:.0}%", progress * 100.0)
            }
            StatusUpdate::Uploading { progress } => {
                write!(f, "Uploading {:.0}%", progress * 100.0)
            }
            StatusUpdate::Done => f.write_str("Done"),
            StatusUpdate::Failed { reason, .. } => write!(f, "Failed: {reason}"),
            StatusUpdate::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// A finished file ready to hand back to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub job: JobId,
    pub path: PathBuf,
    /// Name the user sees.
    pub file_name: String,
    pub caption: String,
    pub kind: MediaKind,
    pub thumbnail: Option<String>,
}

/// Downloads submitted media.
#[async_trait::async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Write the media to `dest`, returning the number of bytes written.
    ///
    /// Implementations should stop early once `cancel` fires. When
    /// `progress` is set, the received share in `[0, 1]` may be sent on it.
    async fn fetch(
        &self,
        media: &MediaRef,
        dest: &Path,
        cancel: CancellationToken,
        progress: Option<UnboundedSender<f64>>,
    ) -> InkmarkResult<u64>;
}

/// Outbound side of the chat transport.
#[async_trait::async_trait]
pub trait ChatOutbox: Send + Sync {
    /// Post or edit the status line for `job`. Best effort.
    async fn status(&self, user: UserId, job: JobId, update: StatusUpdate) -> InkmarkResult<()>;

    /// Upload a finished file, optionally reporting the sent share on `progress`.
    async fn deliver(
        &self,
        user: UserId,
        delivery: &Delivery,
        progress: Option<UnboundedSender<f64>>,
    ) -> InkmarkResult<()>;
}

/// Free space lookup for the scratch filesystem.
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, dir: &Path) -> InkmarkResult<u64>;
}
