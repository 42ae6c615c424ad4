//! Per-user conversation state.
//!
//! A [`Session`] tracks which step of the watermark flow a user is in, the
//! text and style they configured, and their pending jobs:
//!
//! ```text
//! Idle ──begin──▶ AwaitingText ──set_text──▶ AwaitingMedia ◀──┐
//!  ▲                                              │ submit     │ queue
//!  │                                              ▼            │ drained
//!  └────────────────cancel/reset───────────────  Busy ─────────┘
//! ```
//!
//! `Busy` is never stored. It is reported while a worker task is attached,
//! and the stored step underneath is kept so the flow resumes in
//! `AwaitingMedia` with the same text once the queue drains.

use std::collections::VecDeque;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use inkmark_common::config::LimitsConfig;
use inkmark_common::error::{InkmarkError, InkmarkResult};
use inkmark_common::units::format_bytes;
use inkmark_job_model::{JobId, JobSnapshot, JobStatus, MediaRef, StyleField, StyleSettings, UserId};

/// Finished jobs remembered per session.
const HISTORY_LIMIT: usize = 32;

/// Where a user is in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStep {
    Idle,
    AwaitingText,
    AwaitingMedia,
    Busy,
}

/// A job the worker has taken off the queue.
#[derive(Debug)]
pub struct ActiveJob {
    pub id: JobId,
    pub status: JobStatus,
    cancel: CancellationToken,
}

impl ActiveJob {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Terminal outcome of a job, kept for `/status` and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
}

/// What `cancel()` stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelOutcome {
    /// Queued jobs that were dropped without starting.
    pub dropped: Vec<JobId>,
    /// Running job that was signalled to stop.
    pub interrupted: Option<JobId>,
}

/// Accepted submission.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub snapshot: JobSnapshot,
    /// 1-based position, counting a running job.
    pub position: usize,
}

#[derive(Debug)]
pub struct Session {
    user: UserId,
    step: SessionStep,
    text: Option<String>,
    style: StyleSettings,
    thumbnail: Option<String>,
    queue: VecDeque<JobSnapshot>,
    active: Option<ActiveJob>,
    worker: Option<JoinHandle<()>>,
    history: VecDeque<JobRecord>,
}

impl Session {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            step: SessionStep::Idle,
            text: None,
            style: StyleSettings::default(),
            thumbnail: None,
            queue: VecDeque::new(),
            active: None,
            worker: None,
            history: VecDeque::new(),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Current step; `Busy` while a worker owns the queue.
    pub fn step(&self) -> SessionStep {
        if self.worker.is_some() {
            SessionStep::Busy
        } else {
            self.step
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn style(&self) -> &StyleSettings {
        &self.style
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }

    pub fn queued(&self) -> impl Iterator<Item = &JobSnapshot> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active(&self) -> Option<&ActiveJob> {
        self.active.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &JobRecord> {
        self.history.iter()
    }

    /// Queued or running work that has not been cancelled.
    fn has_live_work(&self) -> bool {
        !self.queue.is_empty() || self.active.as_ref().is_some_and(|a| !a.is_cancelled())
    }

    /// Start the flow (the `/w` command).
    pub fn begin(&mut self) -> InkmarkResult<()> {
        if self.has_live_work() {
            return Err(InkmarkError::invalid_input(
                "A job is still being processed. Send /cancel first.",
            ));
        }
        self.step = SessionStep::AwaitingText;
        self.text = None;
        Ok(())
    }

    /// Set the watermark text. Valid only in `AwaitingText`.
    pub fn set_text(&mut self, text: &str, max_chars: usize) -> InkmarkResult<()> {
        if self.step != SessionStep::AwaitingText {
            return Err(InkmarkError::invalid_input(
                "Not expecting watermark text right now. Send /w to start.",
            ));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(InkmarkError::invalid_input("Watermark text cannot be empty."));
        }
        let len = text.chars().count();
        if len > max_chars {
            return Err(InkmarkError::invalid_input(format!(
                "Watermark text is too long ({len} characters, maximum {max_chars})."
            )));
        }
        self.text = Some(text.to_string());
        self.step = SessionStep::AwaitingMedia;
        Ok(())
    }

    /// Validate a media submission and append a snapshot to the queue.
    ///
    /// Does not change the step; any number of jobs may be queued.
    pub fn submit_media(
        &mut self,
        id: JobId,
        seed: u64,
        media: MediaRef,
        limits: &LimitsConfig,
    ) -> InkmarkResult<Submitted> {
        let submitted = self.prepare_submission(id, seed, media, limits)?;
        self.enqueue(submitted.snapshot.clone())?;
        Ok(submitted)
    }

    /// Validate a submission and snapshot the current style without
    /// queueing it yet.
    pub fn prepare_submission(
        &self,
        id: JobId,
        seed: u64,
        media: MediaRef,
        limits: &LimitsConfig,
    ) -> InkmarkResult<Submitted> {
        if self.step != SessionStep::AwaitingMedia {
            return Err(InkmarkError::invalid_input(
                "Not expecting media right now. Send /w to start.",
            ));
        }
        let text = self
            .text
            .clone()
            .ok_or_else(|| InkmarkError::invalid_input("No watermark text set. Send /w to start."))?;
        let kind = media.kind()?;
        if let Some(size) = media.declared_size {
            if size > limits.max_input_bytes {
                return Err(InkmarkError::download(format!(
                    "File is too large ({}, maximum {}).",
                    format_bytes(size),
                    format_bytes(limits.max_input_bytes)
                )));
            }
        }

        let snapshot = JobSnapshot {
            id,
            user: self.user,
            media,
            kind,
            text,
            style: self.style.clone(),
            thumbnail: self.thumbnail.clone(),
            seed,
            enqueued_at: Utc::now(),
        };
        let position = self.queue.len() + usize::from(self.active.is_some()) + 1;
        Ok(Submitted { snapshot, position })
    }

    /// Append a prepared snapshot. Fails if the flow was cancelled since.
    pub fn enqueue(&mut self, snapshot: JobSnapshot) -> InkmarkResult<()> {
        if self.step != SessionStep::AwaitingMedia {
            return Err(InkmarkError::Cancelled);
        }
        self.queue.push_back(snapshot);
        Ok(())
    }

    /// Change one style field. Already-queued jobs keep their snapshot.
    pub fn update_style(&mut self, field: StyleField, value: &str) -> InkmarkResult<()> {
        self.style.apply(field, value)
    }

    pub fn set_thumbnail(&mut self, thumbnail: Option<String>) {
        self.thumbnail = thumbnail;
    }

    /// Drop queued jobs, stop the running one and return to `Idle`.
    pub fn cancel(&mut self) -> CancelOutcome {
        let dropped: Vec<JobId> = self.queue.drain(..).map(|job| job.id).collect();
        let interrupted = self.active.as_ref().and_then(|active| {
            if active.is_cancelled() {
                None
            } else {
                active.cancel.cancel();
                Some(active.id)
            }
        });
        for id in &dropped {
            self.remember(JobRecord {
                id: *id,
                status: JobStatus::Cancelled,
            });
        }
        self.step = SessionStep::Idle;
        self.text = None;
        CancelOutcome {
            dropped,
            interrupted,
        }
    }

    /// Alias of [`Session::cancel`].
    pub fn reset(&mut self) -> CancelOutcome {
        self.cancel()
    }

    /// Whether a new worker must be spawned to drain the queue.
    pub fn needs_worker(&self) -> bool {
        !self.queue.is_empty() && self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn attach_worker(&mut self, handle: JoinHandle<()>) {
        self.worker = Some(handle);
    }

    /// Pop the next job and mark it active, or detach the worker when the
    /// queue is empty. Both happen under the caller's lock, so an enqueue
    /// racing with the drain either lands in this worker or spawns a new one.
    pub fn start_next(&mut self) -> Option<(JobSnapshot, CancellationToken)> {
        match self.queue.pop_front() {
            Some(job) => {
                let cancel = CancellationToken::new();
                self.active = Some(ActiveJob {
                    id: job.id,
                    status: JobStatus::Queued,
                    cancel: cancel.clone(),
                });
                Some((job, cancel))
            }
            None => {
                self.active = None;
                self.worker = None;
                None
            }
        }
    }

    /// Record a status change of the active job.
    pub fn set_active_status(&mut self, id: JobId, status: JobStatus) {
        if let Some(active) = self.active.as_mut().filter(|a| a.id == id) {
            active.status = status;
        }
    }

    /// Move the active job into history.
    pub fn finish_active(&mut self, id: JobId, status: JobStatus) {
        if self.active.as_ref().is_some_and(|a| a.id == id) {
            self.active = None;
        }
        self.remember(JobRecord { id, status });
    }

    fn remember(&mut self, record: JobRecord) {
        self.history.push_back(record);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(mime: &str, size: Option<u64>) -> MediaRef {
        MediaRef {
            source: "file-1".into(),
            file_name: Some("clip.mp4".into()),
            mime: mime.into(),
            declared_size: size,
        }
    }

    fn ready(limits: &LimitsConfig) -> Session {
        let mut session = Session::new(UserId(1));
        session.begin().unwrap();
        session.set_text("  © 2024 Brand  ", limits.max_text_chars).unwrap();
        session
    }

    #[test]
    fn test_happy_path_steps() {
        let limits = LimitsConfig::default();
        let mut session = Session::new(UserId(1));
        assert_eq!(session.step(), SessionStep::Idle);
        session.begin().unwrap();
        assert_eq!(session.step(), SessionStep::AwaitingText);
        session.set_text("  © 2024 Brand  ", 100).unwrap();
        assert_eq!(session.text(), Some("© 2024 Brand"));
        assert_eq!(session.step(), SessionStep::AwaitingMedia);

        let first = session
            .submit_media(JobId(1), 9, media("video/mp4", Some(10)), &limits)
            .unwrap();
        let second = session
            .submit_media(JobId(2), 9, media("image/png", None), &limits)
            .unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
        assert_eq!(session.step(), SessionStep::AwaitingMedia);
        assert_eq!(session.queue_len(), 2);
    }

    #[test]
    fn test_text_validation() {
        let mut session = Session::new(UserId(1));
        assert!(session.set_text("early", 100).is_err());
        session.begin().unwrap();
        assert!(session.set_text("   ", 100).is_err());
        assert!(session.set_text(&"é".repeat(101), 100).is_err());
        assert_eq!(session.step(), SessionStep::AwaitingText);
        session.set_text(&"é".repeat(100), 100).unwrap();
    }

    #[test]
    fn test_submit_rejections() {
        let limits = LimitsConfig::default();
        let mut idle = Session::new(UserId(1));
        let err = idle
            .submit_media(JobId(1), 0, media("video/mp4", None), &limits)
            .unwrap_err();
        assert!(matches!(err, InkmarkError::InvalidInput { .. }));

        let mut session = ready(&limits);
        let err = session
            .submit_media(JobId(1), 0, media("application/zip", None), &limits)
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported file type"));

        let too_big = limits.max_input_bytes + 1;
        let err = session
            .submit_media(JobId(2), 0, media("video/mp4", Some(too_big)), &limits)
            .unwrap_err();
        assert!(matches!(err, InkmarkError::DownloadFailed { .. }));
        assert!(err.to_string().contains("2.00 GB"), "{err}");
        assert_eq!(session.queue_len(), 0);
    }

    #[test]
    fn test_style_change_does_not_touch_queued_snapshot() {
        let limits = LimitsConfig::default();
        let mut session = ready(&limits);
        session
            .submit_media(JobId(1), 0, media("video/mp4", None), &limits)
            .unwrap();
        session.update_style(StyleField::Mode, "hop").unwrap();
        session.update_style(StyleField::Crf, "30").unwrap();
        assert!(session.update_style(StyleField::Crf, "99").is_err());

        let queued = session.queued().next().unwrap();
        assert_eq!(queued.style, StyleSettings::default());
        assert_eq!(session.style().crf, 30);
    }

    #[test]
    fn test_thumbnail_is_snapshotted() {
        let limits = LimitsConfig::default();
        let mut session = ready(&limits);
        session.set_thumbnail(Some("thumb-1".into()));
        let submitted = session
            .submit_media(JobId(1), 0, media("video/mp4", None), &limits)
            .unwrap();
        session.set_thumbnail(None);
        assert_eq!(submitted.snapshot.thumbnail.as_deref(), Some("thumb-1"));
    }

    #[test]
    fn test_cancel_clears_queue_and_signals_active() {
        let limits = LimitsConfig::default();
        let mut session = ready(&limits);
        for id in 1..=3 {
            session
                .submit_media(JobId(id), 0, media("video/mp4", None), &limits)
                .unwrap();
        }
        let (job, token) = session.start_next().unwrap();
        assert_eq!(job.id, JobId(1));
        assert!(session.begin().is_err());

        let outcome = session.cancel();
        assert_eq!(outcome.dropped, vec![JobId(2), JobId(3)]);
        assert_eq!(outcome.interrupted, Some(JobId(1)));
        assert!(token.is_cancelled());
        assert_eq!(session.step(), SessionStep::Idle);
        assert_eq!(session.text(), None);

        // A cancelled job no longer blocks a new flow.
        session.begin().unwrap();
        assert_eq!(session.reset().interrupted, None);
    }

    #[tokio::test]
    async fn test_busy_tracks_worker() {
        let limits = LimitsConfig::default();
        let mut session = ready(&limits);
        session
            .submit_media(JobId(1), 0, media("video/mp4", None), &limits)
            .unwrap();
        assert!(session.needs_worker());
        session.attach_worker(tokio::spawn(std::future::pending::<()>()));
        assert!(!session.needs_worker());
        assert_eq!(session.step(), SessionStep::Busy);

        let (job, _) = session.start_next().unwrap();
        session.set_active_status(job.id, JobStatus::Encoding);
        assert_eq!(session.active().unwrap().status, JobStatus::Encoding);
        session.finish_active(job.id, JobStatus::Done);
        assert!(session.start_next().is_none());

        assert_eq!(session.step(), SessionStep::AwaitingMedia);
        assert_eq!(session.text(), Some("© 2024 Brand"));
        let history: Vec<_> = session.history().copied().collect();
        assert_eq!(
            history,
            vec![JobRecord {
                id: JobId(1),
                status: JobStatus::Done
            }]
        );
    }
}
