//! Scratch directory and per-job temporary files.
//!
//! Every file a job creates lives directly in the scratch directory and is
//! named `{user}_{yyyymmddHHMMSS}_{job}_{role}{ext}`. [`JobFiles`] owns
//! those paths and removes whatever exists when dropped, so every exit path
//! out of the worker cleans up.

use std::fs;
use std::path::{Path, PathBuf};

use inkmark_common::clock::file_stamp;
use inkmark_common::error::{InkmarkError, InkmarkResult};
use inkmark_job_model::{JobId, JobSnapshot, MediaKind, UserId};

const WRITE_TEST_NAME: &str = ".inkmark-write-test";

/// What a scratch file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Input,
    Mark(usize),
    Output,
}

impl FileRole {
    fn label(self) -> String {
        match self {
            FileRole::Input => "input".to_string(),
            FileRole::Mark(idx) => format!("mark{idx}"),
            FileRole::Output => "output".to_string(),
        }
    }
}

/// Build a scratch file name. `ext` includes the leading dot.
pub fn scratch_name(user: UserId, stamp: &str, job: JobId, role: FileRole, ext: &str) -> String {
    format!("{user}_{stamp}_{job}_{}{ext}", role.label())
}

/// Whether `name` follows the scratch naming pattern.
pub fn is_scratch_name(name: &str) -> bool {
    let mut parts = name.splitn(4, '_');
    let (Some(user), Some(stamp), Some(job), Some(rest)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if user.parse::<i64>().is_err() || job.parse::<u64>().is_err() {
        return false;
    }
    if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let role = rest.split('.').next().unwrap_or_default();
    match role {
        "input" | "output" => true,
        _ => role
            .strip_prefix("mark")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
    }
}

/// Result of an orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub bytes: u64,
}

/// Directory holding all per-job temporary files.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create `root` if needed and verify it is writable.
    ///
    /// Failure here is fatal: the service cannot process any job without it.
    pub fn open(root: impl Into<PathBuf>) -> InkmarkResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            InkmarkError::startup(format!(
                "cannot create scratch directory {}: {e}",
                root.display()
            ))
        })?;
        let probe = root.join(WRITE_TEST_NAME);
        fs::write(&probe, b"ok").map_err(|e| {
            InkmarkError::startup(format!(
                "scratch directory {} is not writable: {e}",
                root.display()
            ))
        })?;
        let _ = fs::remove_file(&probe);
        tracing::debug!(path = %root.display(), "Scratch directory ready");
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Allocate paths for a job. Nothing is created on disk.
    pub fn job_files(&self, job: &JobSnapshot) -> JobFiles {
        let stamp = file_stamp();
        let input_ext = job
            .media
            .extension()
            .unwrap_or_else(|| format!(".{}", job.kind.default_extension()));
        let output_ext = match job.kind {
            MediaKind::Image => input_ext.clone(),
            MediaKind::Video => ".mp4".to_string(),
        };
        let path = |role: FileRole, ext: &str| {
            self.root
                .join(scratch_name(job.user, &stamp, job.id, role, ext))
        };
        JobFiles {
            job: job.id,
            input: path(FileRole::Input, &input_ext),
            marks: (0..2).map(|i| path(FileRole::Mark(i), ".png")).collect(),
            output: path(FileRole::Output, &output_ext),
            released: false,
        }
    }

    /// Remove leftover job files from a previous run.
    pub fn sweep_orphans(&self) -> InkmarkResult<SweepReport> {
        let mut report = SweepReport::default();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_scratch_name(name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    report.removed += 1;
                    report.bytes += meta.len();
                }
                Err(e) => tracing::warn!(file = name, error = %e, "Failed to remove orphan"),
            }
        }
        if report.removed > 0 {
            tracing::info!(
                removed = report.removed,
                bytes = report.bytes,
                "Swept orphaned scratch files"
            );
        }
        Ok(report)
    }
}

/// Temporary files owned by one job.
#[derive(Debug)]
pub struct JobFiles {
    job: JobId,
    input: PathBuf,
    marks: Vec<PathBuf>,
    output: PathBuf,
    released: bool,
}

impl JobFiles {
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Path for watermark layer `idx`.
    pub fn mark(&self, idx: usize) -> InkmarkResult<&Path> {
        self.marks
            .get(idx)
            .map(PathBuf::as_path)
            .ok_or_else(|| InkmarkError::render(format!("no scratch slot for layer {idx}")))
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn all(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.input.as_path())
            .chain(self.marks.iter().map(PathBuf::as_path))
            .chain(std::iter::once(self.output.as_path()))
    }

    /// Remove every file this job may have created. Returns how many existed.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in self.all() {
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(job = %self.job, file = %path.display(), error = %e, "Failed to remove temp file")
                }
            }
        }
        self.released = true;
        if removed > 0 {
            tracing::debug!(job = %self.job, removed, "Removed job temp files");
        }
        removed
    }
}

impl Drop for JobFiles {
    fn drop(&mut self) {
        if !self.released {
            self.cleanup();
        }
    }
}
