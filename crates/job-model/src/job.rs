//! Job identity, snapshot and lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use inkmark_common::error::FailureKind;

use crate::media::{MediaKind, MediaRef};
use crate::style::StyleSettings;

/// Chat user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide monotonically increasing job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Encoding,
    Uploading,
    Done,
    Failed(FailureKind),
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed(_) | JobStatus::Cancelled
        )
    }

    /// Downloading, Encoding or Uploading.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Downloading | JobStatus::Encoding | JobStatus::Uploading
        )
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Downloading) => true,
            (Downloading, Encoding) => true,
            (Encoding, Uploading) => true,
            (Uploading, Done) => true,
            (from, Failed(_) | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => f.write_str("queued"),
            JobStatus::Downloading => f.write_str("downloading"),
            JobStatus::Encoding => f.write_str("encoding"),
            JobStatus::Uploading => f.write_str("uploading"),
            JobStatus::Done => f.write_str("done"),
            JobStatus::Failed(kind) => write!(f, "failed({})", kind.as_str()),
            JobStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Everything a job needs, frozen at enqueue time.
///
/// Later changes to the session never reach an existing snapshot, so the
/// derived watermark and trajectory are a pure function of this value
/// plus the probed media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub user: UserId,
    pub media: MediaRef,
    pub kind: MediaKind,
    pub text: String,
    pub style: StyleSettings,
    pub thumbnail: Option<String>,
    /// Seed for randomized placement (Hop waypoints).
    pub seed: u64,
    pub enqueued_at: DateTime<Utc>,
}
