//! Session registry and worker spawning.
//!
//! The registry owns one [`SessionHandle`] per user. The map lock is held
//! only to look up or create a handle; each session has its own lock, and
//! no lock is held while a job runs.
//!
//! A worker task is spawned lazily by the first enqueue into an idle
//! session and detaches itself once the queue is empty. Both happen under
//! the session lock, so a user never has two workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use inkmark_common::error::InkmarkResult;
use inkmark_job_model::{JobId, JobSnapshot, JobStatus, MediaRef, StyleField, StyleSettings, UserId};

use crate::session::{CancelOutcome, JobRecord, Session, SessionStep};
use crate::transport::StatusUpdate;
use crate::worker::{worker_loop, JobRunner};

/// One user's session plus the signal the worker raises when it exits.
#[derive(Debug)]
pub struct SessionHandle {
    user: UserId,
    state: Mutex<Session>,
    idle: watch::Sender<bool>,
}

impl SessionHandle {
    fn new(user: UserId) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            user,
            state: Mutex::new(Session::new(user)),
            idle,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Run `f` with the session locked. `f` must not block.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Take the next job, or release the session if the queue is empty.
    pub(crate) fn next_job(&self) -> Option<(JobSnapshot, CancellationToken)> {
        self.with(|session| {
            let next = session.start_next();
            if next.is_none() {
                self.idle.send_replace(true);
            }
            next
        })
    }

    /// Resolve once no worker is attached.
    pub async fn wait_idle(&self) {
        let mut rx = self.idle.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }

    pub fn is_idle(&self) -> bool {
        *self.idle.borrow()
    }
}

/// Point-in-time view of a session for `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub user: UserId,
    pub step: SessionStep,
    pub text: Option<String>,
    pub style: StyleSettings,
    pub thumbnail: Option<String>,
    pub queued: Vec<JobId>,
    pub active: Option<(JobId, JobStatus)>,
    pub recent: Vec<JobRecord>,
}

impl SessionStatus {
    fn of(user: UserId, s: &Session) -> Self {
        Self {
            user,
            step: s.step(),
            text: s.text().map(str::to_string),
            style: s.style().clone(),
            thumbnail: s.thumbnail().map(str::to_string),
            queued: s.queued().map(|job| job.id).collect(),
            active: s.active().map(|a| (a.id, a.status)),
            recent: s.history().copied().collect(),
        }
    }
}

/// All sessions, keyed by user.
pub struct SessionRegistry {
    runner: Arc<JobRunner>,
    sessions: Mutex<HashMap<UserId, Arc<SessionHandle>>>,
    next_job: AtomicU64,
}

impl SessionRegistry {
    pub fn new(runner: JobRunner) -> Self {
        Self {
            runner: Arc::new(runner),
            sessions: Mutex::new(HashMap::new()),
            next_job: AtomicU64::new(1),
        }
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Get or create the session for `user`.
    pub fn session(&self, user: UserId) -> Arc<SessionHandle> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sessions
                .entry(user)
                .or_insert_with(|| Arc::new(SessionHandle::new(user))),
        )
    }

    /// The session for `user`, if one was ever started.
    pub fn lookup(&self, user: UserId) -> Option<Arc<SessionHandle>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&user).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn existing(&self) -> Vec<Arc<SessionHandle>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.values().cloned().collect()
    }

    pub fn begin(&self, user: UserId) -> InkmarkResult<()> {
        self.session(user).with(Session::begin)?;
        tracing::debug!(%user, "Session started");
        Ok(())
    }

    pub fn set_text(&self, user: UserId, text: &str) -> InkmarkResult<()> {
        let max = self.runner.config().limits.max_text_chars;
        self.session(user).with(|s| s.set_text(text, max))
    }

    /// Accept a media item and queue a job for it.
    pub async fn submit_media(&self, user: UserId, media: MediaRef) -> InkmarkResult<JobId> {
        let session = self.session(user);
        let id = JobId(self.next_job.fetch_add(1, Ordering::Relaxed));
        let seed: u64 = rand::random();
        let limits = &self.runner.config().limits;

        let submitted = session.with(|s| s.prepare_submission(id, seed, media, limits))?;
        // Announce before queueing so `Queued` always precedes later statuses.
        self.runner
            .notify(
                &submitted.snapshot,
                StatusUpdate::Queued {
                    position: submitted.position,
                },
            )
            .await;

        let enqueued = session.with(|s| {
            s.enqueue(submitted.snapshot.clone())?;
            if s.needs_worker() {
                session.idle.send_replace(false);
                let runner = Arc::clone(&self.runner);
                let handle = Arc::clone(&session);
                s.attach_worker(tokio::spawn(worker_loop(runner, handle)));
            }
            Ok(())
        });
        if let Err(e) = enqueued {
            self.runner
                .notify(&submitted.snapshot, StatusUpdate::Cancelled)
                .await;
            return Err(e);
        }

        tracing::info!(
            %user,
            job = %id,
            kind = ?submitted.snapshot.kind,
            position = submitted.position,
            "Job queued"
        );
        Ok(id)
    }

    pub fn update_style(&self, user: UserId, field: StyleField, value: &str) -> InkmarkResult<()> {
        self.session(user).with(|s| s.update_style(field, value))?;
        tracing::debug!(%user, ?field, value, "Style updated");
        Ok(())
    }

    pub fn set_thumbnail(&self, user: UserId, thumbnail: Option<String>) {
        self.session(user).with(|s| s.set_thumbnail(thumbnail));
    }

    /// Drop the queue, stop the running job and return to `Idle`.
    ///
    /// Returns without waiting for the encoder to exit.
    pub async fn cancel(&self, user: UserId) -> CancelOutcome {
        let Some(session) = self.lookup(user) else {
            tracing::debug!(%user, "Cancel without a session");
            return CancelOutcome::default();
        };
        let outcome = session.with(Session::cancel);
        for id in &outcome.dropped {
            if let Err(e) = self
                .runner
                .outbox()
                .status(user, *id, StatusUpdate::Cancelled)
                .await
            {
                tracing::debug!(%user, job = %id, error = %e, "Status update failed");
            }
        }
        tracing::info!(
            %user,
            dropped = outcome.dropped.len(),
            interrupted = ?outcome.interrupted,
            "Session cancelled"
        );
        outcome
    }

    pub async fn reset(&self, user: UserId) -> CancelOutcome {
        self.cancel(user).await
    }

    /// Unknown users get the view of a fresh session; nothing is stored.
    pub fn status(&self, user: UserId) -> SessionStatus {
        match self.lookup(user) {
            Some(session) => session.with(|s| SessionStatus::of(user, s)),
            None => SessionStatus::of(user, &Session::new(user)),
        }
    }

    pub async fn wait_idle(&self, user: UserId) {
        if let Some(session) = self.lookup(user) {
            session.wait_idle().await;
        }
    }

    /// Cancel every session and wait for all workers to exit.
    pub async fn shutdown(&self) {
        let sessions = self.existing();
        for session in &sessions {
            self.cancel(session.user()).await;
        }
        for session in &sessions {
            session.wait_idle().await;
        }
        tracing::info!(sessions = sessions.len(), "All workers stopped");
    }
}
