//! Job execution.
//!
//! [`JobRunner`] runs one job end to end:
//!
//! ```text
//! Queued ─▶ Downloading ─▶ Encoding ─▶ Uploading ─▶ Done
//!              │  disk check   │ probe, synthesize, plan,
//!              │  fetch        │ filter graph, disk check,
//!              │               │ supervised encode
//!              └───────────────┴──────────▶ Failed(kind) | Cancelled
//! ```
//!
//! Every error is caught here and turned into a terminal status, so one
//! bad job never takes down the user's worker loop. Temporary files are
//! owned by a [`JobFiles`] guard and removed on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use inkmark_common::clock::ProgressThrottle;
use inkmark_common::config::AppConfig;
use inkmark_common::error::{InkmarkError, InkmarkResult};
use inkmark_common::units::format_bytes;
use inkmark_job_model::{JobId, JobSnapshot, JobStatus, MediaKind, Size, UserId};
use inkmark_placement::{layer_spec, PlacementPlanner, PlannerConfig};
use inkmark_render_engine::{
    build_filter_graph, image_size, write_png, CodecSettings, Encoder, ScaleSpec, TranscodePlan,
    WatermarkSynthesizer,
};

use crate::registry::SessionHandle;
use crate::scratch::{JobFiles, ScratchDir};
use crate::transport::{ChatOutbox, Delivery, MediaFetcher, SpaceProbe, StatusUpdate};

/// How long to wait for the last progress notifications after an encode.
const PROGRESS_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a job needs from the outside world.
pub struct JobRunner {
    config: AppConfig,
    scratch: ScratchDir,
    encoder: Arc<dyn Encoder>,
    fetcher: Arc<dyn MediaFetcher>,
    outbox: Arc<dyn ChatOutbox>,
    space: Arc<dyn SpaceProbe>,
    synthesizer: Arc<WatermarkSynthesizer>,
    planner: PlacementPlanner,
}

impl JobRunner {
    pub fn new(
        config: AppConfig,
        scratch: ScratchDir,
        encoder: Arc<dyn Encoder>,
        fetcher: Arc<dyn MediaFetcher>,
        outbox: Arc<dyn ChatOutbox>,
        space: Arc<dyn SpaceProbe>,
    ) -> Self {
        let synthesizer = Arc::new(WatermarkSynthesizer::load(&config.watermark.font_paths));
        Self {
            config,
            scratch,
            encoder,
            fetcher,
            outbox,
            space,
            synthesizer,
            planner: PlacementPlanner::new(PlannerConfig::default()),
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: WatermarkSynthesizer) -> Self {
        self.synthesizer = Arc::new(synthesizer);
        self
    }

    pub fn with_planner(mut self, planner: PlacementPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn outbox(&self) -> &Arc<dyn ChatOutbox> {
        &self.outbox
    }

    /// Post a status line, logging instead of failing.
    pub async fn notify(&self, job: &JobSnapshot, update: StatusUpdate) {
        if let Err(e) = self.outbox.status(job.user, job.id, update).await {
            tracing::warn!(user = %job.user, job = %job.id, error = %e, "Status update failed");
        }
    }

    /// Run `job` to a terminal status.
    pub async fn run(
        &self,
        job: &JobSnapshot,
        cancel: CancellationToken,
        session: Option<&SessionHandle>,
    ) -> JobStatus {
        let mut files = self.scratch.job_files(job);
        let mut tracker = StatusTracker { job, session, status: JobStatus::Queued };

        let result = self.execute(job, &files, &cancel, &mut tracker).await;
        files.cleanup();

        let (status, update) = match result {
            Ok(()) => (JobStatus::Done, StatusUpdate::Done),
            // Errors raised while a cancel is in flight are a consequence of it.
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                (JobStatus::Cancelled, StatusUpdate::Cancelled)
            }
            Err(e) => {
                let kind = e.failure_kind();
                tracing::warn!(user = %job.user, job = %job.id, error = %e, "Job failed");
                let reason = e.user_message();
                (JobStatus::Failed(kind), StatusUpdate::Failed { kind, reason })
            }
        };
        tracker.advance(status);
        tracing::info!(user = %job.user, job = %job.id, %status, "Job finished");
        self.notify(job, update).await;
        status
    }

    async fn execute(
        &self,
        job: &JobSnapshot,
        files: &JobFiles,
        cancel: &CancellationToken,
        tracker: &mut StatusTracker<'_>,
    ) -> InkmarkResult<()> {
        let limits = &self.config.limits;

        tracker.advance(JobStatus::Downloading);
        self.notify(job, StatusUpdate::Downloading { progress: 0.0 }).await;

        if let Some(declared) = job.media.declared_size {
            check_input_size(declared, limits.max_input_bytes)?;
        }
        self.check_space(job.media.declared_size.unwrap_or(0))?;

        let forwarder = self.transfer_progress(job, |progress| StatusUpdate::Downloading {
            progress,
        });
        let fetched = self
            .fetcher
            .fetch(&job.media, files.input(), cancel.clone(), Some(forwarder.sender()))
            .await;
        forwarder.finish().await;
        let fetched = fetched?;
        let input_bytes = std::fs::metadata(files.input())
            .map(|m| m.len())
            .unwrap_or(fetched);
        check_input_size(input_bytes, limits.max_input_bytes)?;
        tracing::info!(user = %job.user, job = %job.id, input_bytes, "Media downloaded");
        ensure_live(cancel)?;

        tracker.advance(JobStatus::Encoding);
        self.notify(job, StatusUpdate::Encoding { progress: 0.0 }).await;

        let plan = self.prepare(job, files, input_bytes).await?;
        ensure_live(cancel)?;

        let outcome = self.encode(job, &plan, cancel).await?;
        if outcome.output_bytes > limits.max_output_bytes {
            return Err(InkmarkError::upload(format!(
                "Result is too large to send ({}, maximum {}).",
                format_bytes(outcome.output_bytes),
                format_bytes(limits.max_output_bytes)
            )));
        }

        tracker.advance(JobStatus::Uploading);
        self.notify(job, StatusUpdate::Uploading { progress: 0.0 }).await;
        self.deliver(job, files, cancel).await
    }

    /// Probe, synthesize marks and build the encoder invocation.
    async fn prepare(
        &self,
        job: &JobSnapshot,
        files: &JobFiles,
        input_bytes: u64,
    ) -> InkmarkResult<TranscodePlan> {
        let info = self.encoder.probe(files.input()).await?;
        let frame = job.style.resolution.target_size(info.size);
        let duration = match job.kind {
            MediaKind::Image => 0.0,
            MediaKind::Video => info.duration_secs.unwrap_or_else(|| {
                tracing::warn!(job = %job.id, "Video has no duration; progress will not advance");
                0.0
            }),
        };
        tracing::debug!(job = %job.id, source = %info.size, %frame, duration, "Probed input");

        let mode = PlacementPlanner::effective_mode(job.style.mode, job.kind);
        let mut marks: Vec<PathBuf> = Vec::new();
        let mut sizes: Vec<Size> = Vec::new();
        for (idx, motion) in mode.layers().iter().enumerate() {
            let spec = layer_spec(
                &job.text,
                *motion,
                frame,
                job.style.scale,
                &self.config.watermark,
            );
            let path = files.mark(idx)?.to_path_buf();
            let synthesizer = Arc::clone(&self.synthesizer);
            let target = path.clone();
            let size = tokio::task::spawn_blocking(move || -> InkmarkResult<Size> {
                let (image, _) = synthesizer.synthesize_fitting(&spec, frame);
                write_png(&image, &target)?;
                Ok(image_size(&image))
            })
            .await
            .map_err(|e| InkmarkError::render(format!("watermark task failed: {e}")))??;
            marks.push(path);
            sizes.push(size);
        }

        let placement = self
            .planner
            .plan(&job.style, job.kind, frame, &sizes, duration, job.seed)?;
        let graph = build_filter_graph(
            &placement,
            ScaleSpec {
                source: info.size,
                target: frame,
            },
        )?;

        self.check_space(input_bytes)?;

        Ok(TranscodePlan::new(
            self.encoder.program(),
            job.kind,
            files.input(),
            marks,
            graph.render(),
            CodecSettings {
                codec: job.style.codec,
                crf: job.style.crf,
                preset: self.config.encode.preset.clone(),
            },
            files.output(),
            duration,
        ))
    }

    async fn encode(
        &self,
        job: &JobSnapshot,
        plan: &TranscodePlan,
        cancel: &CancellationToken,
    ) -> InkmarkResult<inkmark_render_engine::TranscodeOutcome> {
        // The supervisor already throttles encoder progress.
        let forwarder = ProgressForwarder::spawn(
            Arc::clone(&self.outbox),
            job,
            |progress| StatusUpdate::Encoding { progress },
            None,
        );

        tracing::info!(user = %job.user, job = %job.id, encoder = self.encoder.name(), "Encoding");
        let result = self
            .encoder
            .transcode(plan, cancel.clone(), Some(forwarder.sender()))
            .await;
        forwarder.finish().await;
        result
    }

    /// Forwarder for download and upload progress, throttled like encoding.
    fn transfer_progress(
        &self,
        job: &JobSnapshot,
        stage: fn(f64) -> StatusUpdate,
    ) -> ProgressForwarder {
        ProgressForwarder::spawn(
            Arc::clone(&self.outbox),
            job,
            stage,
            Some(ProgressThrottle::new(self.config.progress_interval())),
        )
    }

    async fn deliver(
        &self,
        job: &JobSnapshot,
        files: &JobFiles,
        cancel: &CancellationToken,
    ) -> InkmarkResult<()> {
        let delivery = Delivery {
            job: job.id,
            path: files.output().to_path_buf(),
            file_name: delivered_name(job),
            caption: format!("Watermarked with \"{}\"", job.text),
            kind: job.kind,
            thumbnail: job.thumbnail.clone(),
        };
        let attempts = self.config.delivery.upload_attempts.max(1);
        let backoff = Duration::from_millis(self.config.delivery.retry_backoff_ms);

        let forwarder = self.transfer_progress(job, |progress| StatusUpdate::Uploading {
            progress,
        });
        let result = self
            .deliver_with_retry(job, &delivery, attempts, backoff, &forwarder, cancel)
            .await;
        forwarder.finish().await;
        result
    }

    async fn deliver_with_retry(
        &self,
        job: &JobSnapshot,
        delivery: &Delivery,
        attempts: u32,
        backoff: Duration,
        forwarder: &ProgressForwarder,
        cancel: &CancellationToken,
    ) -> InkmarkResult<()> {
        let mut attempt = 1;
        loop {
            match self
                .outbox
                .deliver(job.user, delivery, Some(forwarder.sender()))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => {
                    return Err(match e {
                        InkmarkError::UploadFailed { .. } => e,
                        other => InkmarkError::upload(other.to_string()),
                    });
                }
                Err(e) => {
                    tracing::warn!(job = %job.id, attempt, error = %e, "Upload failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff * attempt) => {}
                        _ = cancel.cancelled() => return Err(InkmarkError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Fail fast when the scratch filesystem cannot hold the job.
    fn check_space(&self, input_bytes: u64) -> InkmarkResult<()> {
        let limits = &self.config.limits;
        let required = required_space(
            input_bytes,
            limits.storage_headroom_factor,
            limits.storage_floor_bytes,
        );
        let available = self.space.available_bytes(self.scratch.path())?;
        if available < required {
            return Err(InkmarkError::InsufficientStorage {
                required,
                available,
            });
        }
        Ok(())
    }
}

/// Relays progress samples from a job stage to the chat outbox.
///
/// Samples are clamped, never go backwards and, when a throttle is set,
/// are limited to one per interval. [`finish`](Self::finish) waits a
/// bounded time for the backlog and then stops the relay, so no stage
/// update can arrive after the job's next status.
struct ProgressForwarder {
    tx: mpsc::UnboundedSender<f64>,
    task: JoinHandle<()>,
    job: JobId,
}

impl ProgressForwarder {
    fn spawn(
        outbox: Arc<dyn ChatOutbox>,
        job: &JobSnapshot,
        stage: fn(f64) -> StatusUpdate,
        mut throttle: Option<ProgressThrottle>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<f64>();
        let (user, id): (UserId, JobId) = (job.user, job.id);
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let mut last = 0.0f64;
            while let Some(sample) = rx.recv().await {
                if !sample.is_finite() {
                    continue;
                }
                let sample = sample.clamp(0.0, 1.0);
                if sample < last {
                    continue;
                }
                let progress = match throttle.as_mut() {
                    None => sample,
                    Some(t) if sample >= 1.0 => match t.finish(started.elapsed()) {
                        Some(p) => p,
                        None => continue,
                    },
                    Some(t) => match t.offer(started.elapsed(), sample) {
                        Some(p) => p,
                        None => continue,
                    },
                };
                last = progress;
                if let Err(e) = outbox.status(user, id, stage(progress)).await {
                    tracing::debug!(%user, job = %id, error = %e, "Progress update failed");
                }
            }
        });
        Self { tx, task, job: id }
    }

    fn sender(&self) -> mpsc::UnboundedSender<f64> {
        self.tx.clone()
    }

    /// Close the channel and wait for queued updates, aborting on timeout.
    async fn finish(self) {
        let Self { tx, mut task, job } = self;
        drop(tx);
        if tokio::time::timeout(PROGRESS_FLUSH_TIMEOUT, &mut task)
            .await
            .is_err()
        {
            task.abort();
            let _ = task.await;
            tracing::debug!(%job, "Progress forwarder did not drain in time");
        }
    }
}

/// Scratch space a job of `input_bytes` needs: input, output and marks.
pub fn required_space(input_bytes: u64, headroom: f64, floor: u64) -> u64 {
    let scaled = (input_bytes as f64 * headroom.max(1.0)).ceil();
    let scaled = if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    };
    scaled.max(floor)
}

fn check_input_size(bytes: u64, max: u64) -> InkmarkResult<()> {
    if bytes > max {
        return Err(InkmarkError::download(format!(
            "File is too large ({}, maximum {}).",
            format_bytes(bytes),
            format_bytes(max)
        )));
    }
    Ok(())
}

fn ensure_live(cancel: &CancellationToken) -> InkmarkResult<()> {
    if cancel.is_cancelled() {
        Err(InkmarkError::Cancelled)
    } else {
        Ok(())
    }
}

/// `clip.mov` becomes `clip_watermarked.mp4`.
fn delivered_name(job: &JobSnapshot) -> String {
    let stem = job
        .media
        .file_name
        .as_deref()
        .and_then(|name| std::path::Path::new(name).file_stem())
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("media");
    let ext = match job.kind {
        MediaKind::Video => ".mp4".to_string(),
        MediaKind::Image => job
            .media
            .extension()
            .unwrap_or_else(|| format!(".{}", job.kind.default_extension())),
    };
    format!("{stem}_watermarked{ext}")
}

/// Enforces forward-only status transitions and mirrors them into the session.
struct StatusTracker<'a> {
    job: &'a JobSnapshot,
    session: Option<&'a SessionHandle>,
    status: JobStatus,
}

impl StatusTracker<'_> {
    fn advance(&mut self, next: JobStatus) {
        if !self.status.can_advance_to(next) {
            tracing::error!(
                job = %self.job.id,
                from = %self.status,
                to = %next,
                "Illegal status transition"
            );
            return;
        }
        tracing::debug!(job = %self.job.id, from = %self.status, to = %next, "Status");
        self.status = next;
        if let Some(session) = self.session {
            session.with(|s| s.set_active_status(self.job.id, next));
        }
    }
}

/// Drain a user's queue until it is empty, then release the session.
pub(crate) async fn worker_loop(runner: Arc<JobRunner>, session: Arc<SessionHandle>) {
    tracing::debug!(user = %session.user(), "Worker started");
    while let Some((job, cancel)) = session.next_job() {
        tracing::info!(user = %job.user, job = %job.id, "Job started");
        let status = runner.run(&job, cancel, Some(&session)).await;
        session.with(|s| s.finish_active(job.id, status));
    }
    tracing::debug!(user = %session.user(), "Worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inkmark_common::units::{GIB, MIB};
    use inkmark_job_model::{JobId, MediaRef, StyleSettings, UserId};

    #[test]
    fn test_required_space() {
        assert_eq!(required_space(0, 3.0, 64 * MIB), 64 * MIB);
        assert_eq!(required_space(GIB, 3.0, 64 * MIB), 3 * GIB);
        assert_eq!(required_space(GIB, 0.5, 0), GIB);
        assert_eq!(required_space(u64::MAX, 3.0, 0), u64::MAX);
    }

    #[test]
    fn test_delivered_name() {
        let mut job = JobSnapshot {
            id: JobId(1),
            user: UserId(1),
            media: MediaRef {
                source: "x".into(),
                file_name: Some("Holiday.MOV".into()),
                mime: "video/quicktime".into(),
                declared_size: None,
            },
            kind: MediaKind::Video,
            text: "t".into(),
            style: StyleSettings::default(),
            thumbnail: None,
            seed: 0,
            enqueued_at: Utc::now(),
        };
        assert_eq!(delivered_name(&job), "Holiday_watermarked.mp4");
        job.kind = MediaKind::Image;
        job.media.file_name = Some("pic.PNG".into());
        assert_eq!(delivered_name(&job), "pic_watermarked.png");
        job.media.file_name = None;
        assert_eq!(delivered_name(&job), "media_watermarked.jpg");
    }

    #[test]
    fn test_input_size_message() {
        let err = check_input_size(3 * GIB, 2 * GIB).unwrap_err();
        assert!(matches!(err, InkmarkError::DownloadFailed { .. }));
        assert!(err.to_string().contains("3.00 GB"));
        assert!(check_input_size(2 * GIB, 2 * GIB).is_ok());
    }
}
