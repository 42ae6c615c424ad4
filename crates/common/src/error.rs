//! Error types shared across Inkmark crates.

use serde::{Deserialize, Serialize};

use crate::units::format_bytes;

/// Top-level error type for Inkmark operations.
#[derive(Debug, thiserror::Error)]
pub enum InkmarkError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Encode failed: {message}")]
    EncodeFailed { message: String, stderr_tail: String },

    #[error("Insufficient storage: {required} bytes required, {available} bytes available")]
    InsufficientStorage { required: u64, available: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Encode timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("Upload failed: {message}")]
    UploadFailed { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Startup error: {message}")]
    Startup { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using InkmarkError.
pub type InkmarkResult<T> = Result<T, InkmarkError>;

/// Coarse failure classification used for terminal job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    DownloadFailed,
    EncodeFailed,
    InsufficientStorage,
    Cancelled,
    Timeout,
    UploadFailed,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::DownloadFailed => "download_failed",
            FailureKind::EncodeFailed => "encode_failed",
            FailureKind::InsufficientStorage => "insufficient_storage",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Timeout => "timeout",
            FailureKind::UploadFailed => "upload_failed",
            FailureKind::Internal => "internal",
        }
    }
}

impl InkmarkError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::EncodeFailed {
            message: msg.into(),
            stderr_tail: String::new(),
        }
    }

    pub fn encode_with_stderr(msg: impl Into<String>, stderr_tail: impl Into<String>) -> Self {
        Self::EncodeFailed {
            message: msg.into(),
            stderr_tail: stderr_tail.into(),
        }
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::UploadFailed {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup {
            message: msg.into(),
        }
    }

    /// Classify this error for the job's terminal status.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            InkmarkError::InvalidInput { .. } => FailureKind::InvalidInput,
            InkmarkError::DownloadFailed { .. } => FailureKind::DownloadFailed,
            InkmarkError::EncodeFailed { .. } | InkmarkError::Render { .. } => {
                FailureKind::EncodeFailed
            }
            InkmarkError::InsufficientStorage { .. } => FailureKind::InsufficientStorage,
            InkmarkError::Cancelled => FailureKind::Cancelled,
            InkmarkError::Timeout { .. } => FailureKind::Timeout,
            InkmarkError::UploadFailed { .. } => FailureKind::UploadFailed,
            InkmarkError::Config { .. }
            | InkmarkError::Startup { .. }
            | InkmarkError::Io(_)
            | InkmarkError::Json(_)
            | InkmarkError::Other(_) => FailureKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InkmarkError::Cancelled)
    }

    /// Short reason suitable for showing to the submitting user.
    pub fn user_message(&self) -> String {
        match self {
            InkmarkError::InsufficientStorage {
                required,
                available,
            } => format!(
                "Not enough free disk space to process this file (need {}, have {}).",
                format_bytes(*required),
                format_bytes(*available)
            ),
            InkmarkError::Timeout { after_secs } => format!(
                "Processing took longer than {} and was stopped.",
                format_duration_hm(*after_secs)
            ),
            InkmarkError::Cancelled => "Cancelled.".to_string(),
            InkmarkError::Io(_)
            | InkmarkError::Json(_)
            | InkmarkError::Other(_)
            | InkmarkError::Config { .. }
            | InkmarkError::Startup { .. } => "Internal error while processing.".to_string(),
            other => other.to_string(),
        }
    }
}

fn format_duration_hm(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h{minutes:02}m")
    } else {
        format!("{minutes}m{:02}s", secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            InkmarkError::invalid_input("x").failure_kind(),
            FailureKind::InvalidInput
        );
        assert_eq!(
            InkmarkError::render("font").failure_kind(),
            FailureKind::EncodeFailed
        );
        assert_eq!(
            InkmarkError::Timeout { after_secs: 10 }.failure_kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            InkmarkError::Io(std::io::Error::other("disk")).failure_kind(),
            FailureKind::Internal
        );
        assert!(InkmarkError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_user_message_hides_internal_detail() {
        let err = InkmarkError::Io(std::io::Error::other("/secret/path"));
        assert!(!err.user_message().contains("secret"));
    }

    #[test]
    fn test_user_message_formats_storage() {
        let err = InkmarkError::InsufficientStorage {
            required: 3 * 1024 * 1024 * 1024,
            available: 512 * 1024 * 1024,
        };
        let msg = err.user_message();
        assert!(msg.contains("3.00 GB"), "{msg}");
        assert!(msg.contains("512.00 MB"), "{msg}");
    }

    #[test]
    fn test_timeout_message() {
        let err = InkmarkError::Timeout { after_secs: 7_260 };
        assert!(err.user_message().contains("2h01m"));
    }
}
