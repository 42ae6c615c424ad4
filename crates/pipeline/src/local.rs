//! Local-filesystem collaborators used by the CLI.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use inkmark_common::error::{InkmarkError, InkmarkResult};
use inkmark_job_model::{JobId, MediaRef, UserId};

use crate::transport::{ChatOutbox, Delivery, MediaFetcher, SpaceProbe, StatusUpdate};

/// Treats `MediaRef::source` as a local path and copies it into scratch.
#[derive(Debug, Default, Clone)]
pub struct LocalFetcher;

#[async_trait::async_trait]
impl MediaFetcher for LocalFetcher {
    async fn fetch(
        &self,
        media: &MediaRef,
        dest: &Path,
        cancel: CancellationToken,
        progress: Option<UnboundedSender<f64>>,
    ) -> InkmarkResult<u64> {
        let source = PathBuf::from(&media.source);
        let copy = copy_with_progress(&source, dest, progress.as_ref());
        tokio::select! {
            copied = copy => copied.map_err(|e| {
                InkmarkError::download(format!("cannot read {}: {e}", source.display()))
            }),
            _ = cancel.cancelled() => Err(InkmarkError::Cancelled),
        }
    }
}

const COPY_CHUNK: usize = 256 * 1024;

/// Copy `src` to `dest`, reporting the copied share after every chunk.
async fn copy_with_progress(
    src: &Path,
    dest: &Path,
    progress: Option<&UnboundedSender<f64>>,
) -> std::io::Result<u64> {
    let mut reader = tokio::fs::File::open(src).await?;
    let total = reader.metadata().await?.len();
    let mut writer = tokio::fs::File::create(dest).await?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        if let (Some(tx), true) = (progress, total > 0) {
            let _ = tx.send((copied as f64 / total as f64).min(1.0));
        }
    }
    writer.flush().await?;
    Ok(copied)
}

/// Copies deliveries into a directory and logs status changes.
#[derive(Debug)]
pub struct DirectoryOutbox {
    dir: PathBuf,
    delivered: Mutex<Vec<PathBuf>>,
}

impl DirectoryOutbox {
    pub fn new(dir: impl Into<PathBuf>) -> InkmarkResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            InkmarkError::startup(format!("cannot create outbox {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths written so far, oldest first.
    pub fn delivered(&self) -> Vec<PathBuf> {
        self.delivered
            .lock()
            .map(|paths| paths.clone())
            .unwrap_or_default()
    }

    /// Destination for a delivery, without overwriting earlier ones.
    fn target(&self, delivery: &Delivery) -> PathBuf {
        let candidate = self.dir.join(&delivery.file_name);
        if !candidate.exists() {
            return candidate;
        }
        self.dir
            .join(format!("{}_{}", delivery.job, delivery.file_name))
    }
}

#[async_trait::async_trait]
impl ChatOutbox for DirectoryOutbox {
    async fn status(&self, user: UserId, job: JobId, update: StatusUpdate) -> InkmarkResult<()> {
        tracing::info!(%user, %job, status = %update, "Job status");
        Ok(())
    }

    async fn deliver(
        &self,
        user: UserId,
        delivery: &Delivery,
        progress: Option<UnboundedSender<f64>>,
    ) -> InkmarkResult<()> {
        let target = self.target(delivery);
        copy_with_progress(&delivery.path, &target, progress.as_ref())
            .await
            .map_err(|e| InkmarkError::upload(format!("cannot write {}: {e}", target.display())))?;
        tracing::info!(
            %user,
            job = %delivery.job,
            path = %target.display(),
            caption = %delivery.caption,
            "Delivered"
        );
        if let Ok(mut paths) = self.delivered.lock() {
            paths.push(target);
        }
        Ok(())
    }
}

/// Free space via `statvfs(3)`.
#[derive(Debug, Default, Clone)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    #[cfg(unix)]
    fn available_bytes(&self, dir: &Path) -> InkmarkResult<u64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|_| InkmarkError::invalid_input("path contains a NUL byte"))?;
        let mut stat = std::mem::MaybeUninit::<libc::statvfs>::zeroed();
        // SAFETY: `c_path` is NUL-terminated and `stat` points to writable
        // memory large enough for a `statvfs` struct.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        // SAFETY: statvfs returned 0, so the struct is initialized.
        let stat = unsafe { stat.assume_init() };
        #[allow(clippy::unnecessary_cast)]
        let available = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
        Ok(available)
    }

    #[cfg(not(unix))]
    fn available_bytes(&self, _dir: &Path) -> InkmarkResult<u64> {
        Ok(u64::MAX)
    }
}
