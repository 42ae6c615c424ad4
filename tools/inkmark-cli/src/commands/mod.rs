pub mod chat;
pub mod check;
pub mod plan;
pub mod preview;
pub mod stamp;
pub mod sweep;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use inkmark_common::config::AppConfig;
use inkmark_common::error::InkmarkResult;
use inkmark_job_model::{JobId, UserId};
use inkmark_pipeline::{
    ChatOutbox, Delivery, DirectoryOutbox, JobRunner, LocalFetcher, ScratchDir, SessionRegistry,
    StatusUpdate, StatvfsProbe,
};
use inkmark_render_engine::FfmpegEncoder;

/// Prints status lines to the terminal and writes deliveries to disk.
pub struct ConsoleOutbox {
    inner: DirectoryOutbox,
    /// Fixed destination for every delivery, used by `stamp --output`.
    target: Option<PathBuf>,
    last: Mutex<HashMap<JobId, StatusUpdate>>,
}

impl ConsoleOutbox {
    pub fn new(dir: PathBuf, target: Option<PathBuf>) -> InkmarkResult<Self> {
        Ok(Self {
            inner: DirectoryOutbox::new(dir)?,
            target,
            last: Mutex::new(HashMap::new()),
        })
    }

    pub fn last_status(&self, job: JobId) -> Option<StatusUpdate> {
        self.last.lock().ok().and_then(|last| last.get(&job).cloned())
    }
}

#[async_trait::async_trait]
impl ChatOutbox for ConsoleOutbox {
    async fn status(&self, _user: UserId, job: JobId, update: StatusUpdate) -> InkmarkResult<()> {
        println!("[job {job}] {update}");
        if let Ok(mut last) = self.last.lock() {
            last.insert(job, update);
        }
        Ok(())
    }

    async fn deliver(
        &self,
        user: UserId,
        delivery: &Delivery,
        progress: Option<UnboundedSender<f64>>,
    ) -> InkmarkResult<()> {
        match &self.target {
            Some(target) => {
                if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&delivery.path, target).await.map_err(|e| {
                    inkmark_common::InkmarkError::upload(format!(
                        "cannot write {}: {e}",
                        target.display()
                    ))
                })?;
                if let Some(tx) = progress {
                    let _ = tx.send(1.0);
                }
                println!(
                    "[job {}] Saved {} ({})",
                    delivery.job,
                    target.display(),
                    delivery.caption
                );
            }
            None => {
                self.inner.deliver(user, delivery, progress).await?;
                if let Some(path) = self.inner.delivered().last() {
                    println!(
                        "[job {}] Saved {} ({})",
                        delivery.job,
                        path.display(),
                        delivery.caption
                    );
                }
            }
        }
        Ok(())
    }
}

/// Open scratch, sweep leftovers and wire the local collaborators.
pub fn build_registry(
    config: AppConfig,
    outbox: Arc<ConsoleOutbox>,
) -> anyhow::Result<SessionRegistry> {
    let scratch = ScratchDir::open(&config.scratch_dir)?;
    scratch.sweep_orphans()?;
    let encoder = FfmpegEncoder::from_config(&config);
    if !inkmark_render_engine::Encoder::is_available(&encoder) {
        tracing::warn!("ffmpeg/ffprobe not found on PATH; jobs will fail to encode");
    }
    let runner = JobRunner::new(
        config,
        scratch,
        Arc::new(encoder),
        Arc::new(LocalFetcher),
        outbox,
        Arc::new(StatvfsProbe),
    );
    Ok(SessionRegistry::new(runner))
}
