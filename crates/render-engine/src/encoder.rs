use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use inkmark_common::config::AppConfig;
use inkmark_common::error::InkmarkResult;

use crate::plan::TranscodePlan;
use crate::probe::{command_exists, probe_media, MediaInfo};
use crate::supervisor::{SupervisorConfig, TranscodeOutcome, TranscodeSupervisor};

/// Abstract interface over the external media toolchain.
#[async_trait::async_trait]
pub trait Encoder: Send + Sync {
    /// Read dimensions and duration of a source file.
    async fn probe(&self, path: &Path) -> InkmarkResult<MediaInfo>;

    /// Run a transcode to completion, reporting progress fractions on `progress`.
    async fn transcode(
        &self,
        plan: &TranscodePlan,
        cancel: CancellationToken,
        progress: Option<UnboundedSender<f64>>,
    ) -> InkmarkResult<TranscodeOutcome>;

    /// Program passed as `argv[0]` when building plans.
    fn program(&self) -> &Path;

    fn name(&self) -> &str;

    fn is_available(&self) -> bool;
}

/// `ffmpeg`/`ffprobe` backed encoder.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    supervisor: TranscodeSupervisor,
}

impl FfmpegEncoder {
    pub fn new(
        ffmpeg: impl Into<PathBuf>,
        ffprobe: impl Into<PathBuf>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            supervisor: TranscodeSupervisor::new(config),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let supervisor = SupervisorConfig {
            timeout: config.encode_timeout(),
            kill_grace: Duration::from_secs(config.encode.kill_grace_secs),
            progress_interval: config.progress_interval(),
            min_output_bytes: config.limits.min_output_bytes,
        };
        Self::new(&config.encode.ffmpeg_bin, &config.encode.ffprobe_bin, supervisor)
    }

    pub fn ffprobe(&self) -> &Path {
        &self.ffprobe
    }

    pub fn supervisor(&self) -> &TranscodeSupervisor {
        &self.supervisor
    }
}

#[async_trait::async_trait]
impl Encoder for FfmpegEncoder {
    async fn probe(&self, path: &Path) -> InkmarkResult<MediaInfo> {
        probe_media(&self.ffprobe, path).await
    }

    async fn transcode(
        &self,
        plan: &TranscodePlan,
        cancel: CancellationToken,
        progress: Option<UnboundedSender<f64>>,
    ) -> InkmarkResult<TranscodeOutcome> {
        self.supervisor.run(plan, cancel, progress).await
    }

    fn program(&self) -> &Path {
        &self.ffmpeg
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg) && command_exists(&self.ffprobe)
    }
}
