//! Encoder child-process supervision.
//!
//! One supervisor call owns one child process for its whole life:
//! - stdout carries `-progress pipe:1` key/value lines and is parsed on its
//!   own task, which forwards throttled progress over a channel
//! - stderr is drained on another task into a bounded tail buffer, so a
//!   chatty encoder can never block on a full pipe
//! - the caller's [`CancellationToken`] and a hard timeout both stop the
//!   child with SIGTERM, then SIGKILL after a grace period
//!
//! Success requires exit status zero and an output file of at least
//! `min_output_bytes`.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use inkmark_common::clock::ProgressThrottle;
use inkmark_common::error::{InkmarkError, InkmarkResult};

use crate::plan::TranscodePlan;

/// Bytes of stderr retained for diagnostics.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Characters of stderr included in logs and errors.
pub const STDERR_REPORT_CHARS: usize = 400;

/// How long to wait for pipe readers after the child has exited.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub timeout: Duration,
    pub kill_grace: Duration,
    pub progress_interval: Duration,
    pub min_output_bytes: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(6 * 3600),
            kill_grace: Duration::from_secs(5),
            progress_interval: Duration::from_secs(5),
            min_output_bytes: 1024,
        }
    }
}

/// Result of a successful encode.
#[derive(Debug, Clone)]
pub struct TranscodeOutcome {
    pub output_bytes: u64,
    pub elapsed: Duration,
}

/// Latest values seen on the `-progress` stream.
#[derive(Debug, Default)]
pub struct ProgressState {
    pub out_time_secs: f64,
    pub complete: bool,
}

impl ProgressState {
    pub fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.trim().parse::<f64>() {
                    if us.is_finite() && us >= 0.0 {
                        self.out_time_secs = us / 1_000_000.0;
                    }
                }
            }
            "out_time" => {
                if let Some(secs) = parse_timestamp(value.trim()) {
                    self.out_time_secs = secs;
                }
            }
            "progress" => {
                self.complete = value.trim() == "end";
            }
            _ => {}
        }
    }

    /// Fraction of `total_secs` encoded so far, clamped to `[0, 1]`.
    pub fn fraction(&self, total_secs: f64) -> f64 {
        if self.complete {
            return 1.0;
        }
        if !(total_secs.is_finite() && total_secs > 0.0) {
            return 0.0;
        }
        (self.out_time_secs / total_secs).clamp(0.0, 1.0)
    }
}

/// Parse `HH:MM:SS.ffffff`.
fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || h < 0.0 || m < 0.0 || s < 0.0 {
        return None;
    }
    Some(h * 3600.0 + m * 60.0 + s)
}

/// Runs encoder processes.
#[derive(Debug, Clone, Default)]
pub struct TranscodeSupervisor {
    config: SupervisorConfig,
}

enum Stop {
    Cancelled,
    TimedOut,
}

impl TranscodeSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Execute `plan`.
    pub async fn run(
        &self,
        plan: &TranscodePlan,
        cancel: CancellationToken,
        progress: Option<UnboundedSender<f64>>,
    ) -> InkmarkResult<TranscodeOutcome> {
        self.run_command(
            plan.program(),
            &plan.args(),
            plan.output(),
            plan.duration_secs(),
            cancel,
            progress,
        )
        .await
    }

    /// Execute an arbitrary command that writes `output`.
    pub async fn run_command(
        &self,
        program: &Path,
        args: &[String],
        output: &Path,
        duration_secs: f64,
        cancel: CancellationToken,
        progress: Option<UnboundedSender<f64>>,
    ) -> InkmarkResult<TranscodeOutcome> {
        if cancel.is_cancelled() {
            return Err(InkmarkError::Cancelled);
        }

        tracing::debug!(program = %program.display(), ?args, "Spawning encoder");
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            InkmarkError::encode(format!("failed to start {}: {e}", program.display()))
        })?;
        let pid = child.id();
        tracing::info!(pid, args_len = args.len(), duration_secs, "Encoder process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InkmarkError::encode("failed to capture encoder stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| InkmarkError::encode("failed to capture encoder stderr"))?;

        let stderr_task = tokio::spawn(drain_tail(stderr));
        let progress_task = tokio::spawn(read_progress(
            stdout,
            duration_secs,
            started,
            self.config.progress_interval,
            progress.clone(),
        ));

        let waited = tokio::select! {
            status = child.wait() => Ok(status),
            _ = cancel.cancelled() => Err(Stop::Cancelled),
            _ = tokio::time::sleep(self.config.timeout) => Err(Stop::TimedOut),
        };

        let status = match waited {
            Ok(status) => status.map_err(|e| {
                InkmarkError::encode(format!("failed to wait on encoder: {e}"))
            })?,
            Err(stop) => {
                terminate(&mut child, self.config.kill_grace).await;
                progress_task.abort();
                stderr_task.abort();
                return Err(match stop {
                    Stop::Cancelled => {
                        tracing::info!(pid, "Encoder cancelled");
                        InkmarkError::Cancelled
                    }
                    Stop::TimedOut => {
                        tracing::warn!(
                            pid,
                            timeout_secs = self.config.timeout.as_secs(),
                            "Encoder timed out"
                        );
                        InkmarkError::Timeout {
                            after_secs: self.config.timeout.as_secs(),
                        }
                    }
                });
            }
        };

        let throttle = join_with_timeout(progress_task).await;
        let stderr_tail = join_with_timeout(stderr_task).await.unwrap_or_default();

        if let Err(err) = self.check_result(status, output, &stderr_tail) {
            tracing::warn!(
                pid,
                %status,
                stderr = %tail_chars(&stderr_tail, STDERR_REPORT_CHARS),
                "Encoder failed"
            );
            return Err(err);
        }

        let output_bytes = file_len(output).unwrap_or(0);
        if let (Some(tx), Some(mut throttle)) = (progress, throttle) {
            if let Some(value) = throttle.finish(started.elapsed()) {
                let _ = tx.send(value);
            }
        }

        let elapsed = started.elapsed();
        tracing::info!(
            pid,
            output_bytes,
            elapsed_secs = elapsed.as_secs_f64(),
            "Encoder finished"
        );
        Ok(TranscodeOutcome {
            output_bytes,
            elapsed,
        })
    }

    fn check_result(
        &self,
        status: ExitStatus,
        output: &Path,
        stderr_tail: &str,
    ) -> InkmarkResult<()> {
        let tail = tail_chars(stderr_tail, STDERR_REPORT_CHARS);
        if !status.success() {
            return Err(InkmarkError::encode_with_stderr(
                format!("encoder exited with {status}"),
                tail,
            ));
        }
        match file_len(output) {
            None => Err(InkmarkError::encode_with_stderr(
                "encoder produced no output file",
                tail,
            )),
            Some(len) if len < self.config.min_output_bytes => {
                Err(InkmarkError::encode_with_stderr(
                    format!(
                        "encoder output is implausibly small ({len} bytes, minimum {})",
                        self.config.min_output_bytes
                    ),
                    tail,
                ))
            }
            Some(_) => Ok(()),
        }
    }
}

fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// Last `n` characters of `s`.
pub fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

async fn join_with_timeout<T>(mut handle: JoinHandle<T>) -> Option<T> {
    match tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(_)) => None,
        Err(_) => {
            handle.abort();
            None
        }
    }
}

async fn read_progress<R>(
    stdout: R,
    duration_secs: f64,
    started: Instant,
    interval: Duration,
    progress: Option<UnboundedSender<f64>>,
) -> ProgressThrottle
where
    R: AsyncRead + Unpin,
{
    let mut throttle = ProgressThrottle::new(interval);
    let mut state = ProgressState::default();
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed reading encoder progress");
                break;
            }
        };
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        state.update(key, value);
        // Each progress block ends with a `progress=` line.
        if key != "progress" || state.complete {
            continue;
        }
        if let Some(value) = throttle.offer(started.elapsed(), state.fraction(duration_secs)) {
            tracing::debug!(progress = value, "Encoder progress");
            if let Some(tx) = &progress {
                let _ = tx.send(value);
            }
        }
    }
    throttle
}

/// Read everything from `reader`, keeping only the last few kilobytes.
async fn drain_tail<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail: VecDeque<u8> = VecDeque::with_capacity(STDERR_TAIL_BYTES);
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend(&buf[..n]);
                while tail.len() > STDERR_TAIL_BYTES {
                    tail.pop_front();
                }
            }
            Err(e) => {
                return format!("<failed to read encoder stderr: {e}>");
            }
        }
    }
    let bytes: Vec<u8> = tail.into_iter().collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

/// SIGTERM the child's process group, then SIGKILL after `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        return;
    };
    signal_group(pid, Signal::Term);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => tracing::debug!(pid, "Encoder exited after SIGTERM"),
        Err(_) => {
            tracing::warn!(pid, grace_secs = grace.as_secs(), "Encoder ignored SIGTERM, killing");
            signal_group(pid, Signal::Kill);
            if let Err(e) = child.kill().await {
                tracing::warn!(pid, error = %e, "Failed to kill encoder");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group created by `process_group(0)`.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), sig) };
    if rc != 0 {
        tracing::debug!(pid, ?signal, "Signalling encoder group failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}
