//! C3: MediaProcessRunner — spawns and supervises the media process (ffmpeg
//! or compatible) for one session, emitting progress/stall/exit events.
//!
//! Structured after `FfmpegEngine::start` in
//! `rust-srec/src/downloader/engine/ffmpeg.rs`: a process-waiter task races
//! `child.wait()` against a cancellation signal (graceful stdin `q` then a
//! timed kill escalation), while a second task drains stderr records and
//! turns them into domain events.

pub mod argv;
pub mod classify;
pub mod progress;
mod reader;
pub mod watchdog;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub use argv::{ArgvVariant, ReceiverInputConfig};
use argv::build_argv;
use classify::{ClassifiedAction, classify_stderr};
use progress::{ProgressAccumulator, ProgressSnapshot};
use reader::OutputRecordReader;
use watchdog::StallWatchdog;

use crate::error::{Error, Result};
use crate::profile::OutputSpec;
use crate::session::FailReasonClass;

const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const STALL_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Bounded so a runaway process can't exhaust memory with stderr chatter.
const STDERR_RING_CAPACITY: usize = 200;

/// Whether this run targets a rolling live HLS playlist or a single VOD
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Live,
    Vod,
}

impl From<&OutputSpec> for OutputMode {
    fn from(spec: &OutputSpec) -> Self {
        if spec.vod { OutputMode::Vod } else { OutputMode::Live }
    }
}

#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Progress(ProgressSnapshot),
    Stalled,
    Exited {
        success: bool,
        fail_reason_class: Option<FailReasonClass>,
        stderr_tail: String,
    },
}

pub struct MediaProcessHandle {
    pub events: mpsc::Receiver<ProcessEvent>,
    cancellation_token: CancellationToken,
    pid: Option<u32>,
}

impl MediaProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request graceful shutdown. The supervising task writes `q` to stdin
    /// and escalates to SIGKILL after `GRACEFUL_STOP_TIMEOUT`.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }
}

pub struct MediaProcessRunner {
    binary_path: String,
    stall_grace: Duration,
    stall_threshold: Duration,
    input_config: ReceiverInputConfig,
}

impl MediaProcessRunner {
    pub fn new(
        binary_path: String,
        stall_grace: Duration,
        stall_threshold: Duration,
        input_config: ReceiverInputConfig,
    ) -> Self {
        Self {
            binary_path,
            stall_grace,
            stall_threshold,
            input_config,
        }
    }

    /// Spawn the media process for `stream_url`, writing output under
    /// `work_dir` (which must already exist).
    pub fn spawn(
        &self,
        stream_url: &str,
        output_spec: &OutputSpec,
        work_dir: &Path,
        variant: ArgvVariant,
    ) -> Result<MediaProcessHandle> {
        let args = build_argv(stream_url, output_spec, work_dir, variant, &self.input_config);
        debug!(binary = %self.binary_path, ?args, "spawning media process");

        let mut cmd = process_utils::tokio_command(&self.binary_path);
        cmd.args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn media process: {e}")))?;
        let pid = child.id();
        let mut stdin = child.stdin.take();
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Process("failed to capture media process stderr".into()))?;

        let cancellation_token = CancellationToken::new();
        let waiter_token = cancellation_token.clone();
        let (exit_tx, exit_rx) = oneshot::channel::<Option<i32>>();

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;

            let exit_code = tokio::select! {
                status = child.wait() => match status {
                    Ok(exit_status) => exit_status.code(),
                    Err(e) => {
                        error!(error = %e, "error waiting for media process");
                        Some(-1)
                    }
                },
                _ = waiter_token.cancelled() => {
                    debug!("stop requested, sending graceful-quit to media process");
                    if let Some(mut stdin) = stdin.take() {
                        let _ = stdin.write_all(b"q").await;
                        let _ = stdin.flush().await;
                        let _ = stdin.shutdown().await;
                    }
                    match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
                        Ok(Ok(exit_status)) => exit_status.code(),
                        Ok(Err(e)) => {
                            error!(error = %e, "error waiting for media process after stop");
                            Some(-1)
                        }
                        Err(_) => {
                            warn!("media process did not exit in time, killing");
                            let _ = child.kill().await;
                            child.wait().await.ok().and_then(|s| s.code()).or(Some(-1))
                        }
                    }
                }
            };
            let _ = exit_tx.send(exit_code);
        });

        let (event_tx, event_rx) = mpsc::channel(64);
        let stall_grace = self.stall_grace;
        let stall_threshold = self.stall_threshold;
        let work_dir = work_dir.to_path_buf();

        tokio::spawn(async move {
            run_stderr_pump(
                stderr,
                exit_rx,
                event_tx,
                stall_grace,
                stall_threshold,
                work_dir,
            )
            .await;
        });

        Ok(MediaProcessHandle {
            events: event_rx,
            cancellation_token,
            pid,
        })
    }
}

async fn run_stderr_pump(
    stderr: tokio::process::ChildStderr,
    exit_rx: oneshot::Receiver<Option<i32>>,
    event_tx: mpsc::Sender<ProcessEvent>,
    stall_grace: Duration,
    stall_threshold: Duration,
    work_dir: PathBuf,
) {
    let mut reader = OutputRecordReader::new(stderr);
    let mut accumulator = ProgressAccumulator::new();
    let mut watchdog = StallWatchdog::new(stall_grace, stall_threshold);
    let mut ring: Vec<String> = Vec::with_capacity(STDERR_RING_CAPACITY);
    let mut stall_poll = tokio::time::interval(STALL_POLL_INTERVAL);
    let mut already_reported_stall = false;

    loop {
        tokio::select! {
            record = reader.next_record() => {
                match record {
                    Ok(Some(line)) => {
                        if ring.len() == STDERR_RING_CAPACITY {
                            ring.remove(0);
                        }
                        ring.push(line.clone());

                        if let Some(snapshot) = accumulator.feed(&line) {
                            watchdog.observe(snapshot);
                            let _ = event_tx.send(ProcessEvent::Progress(snapshot)).await;
                            if snapshot.ended {
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "error reading media process stderr");
                        break;
                    }
                }
            }
            _ = stall_poll.tick() => {
                if !already_reported_stall && watchdog.is_stalled() {
                    already_reported_stall = true;
                    let _ = event_tx.send(ProcessEvent::Stalled).await;
                }
            }
        }
    }

    let exit_code = exit_rx.await.ok().flatten();
    let success = exit_code == Some(0);
    let stderr_tail = ring.join("\n");

    let fail_reason_class = if success {
        None
    } else if already_reported_stall {
        Some(FailReasonClass::FFmpegStalled)
    } else {
        match classify_stderr(&stderr_tail) {
            Some(c) if c.action != ClassifiedAction::WarnOnly => Some(c.reason),
            _ => Some(FailReasonClass::FFmpegExit),
        }
    };

    if !success {
        let log_path = work_dir.join("err.log");
        if let Err(e) = tokio::fs::write(&log_path, &stderr_tail).await {
            warn!(error = %e, path = %log_path.display(), "failed to persist media process stderr");
        }
    }

    let _ = event_tx
        .send(ProcessEvent::Exited {
            success,
            fail_reason_class,
            stderr_tail,
        })
        .await;
}

/// Decide the next argv variant to retry with after a classified failure
///: DTS-related failures get one DTS-tolerant retry, then one
/// software-transcode retry, then give up.
pub fn next_retry_variant(previous: ArgvVariant, reason: FailReasonClass) -> Option<ArgvVariant> {
    match (previous, reason) {
        (ArgvVariant::Primary, FailReasonClass::NonMonotonousDts) => Some(ArgvVariant::DtsFallback),
        (ArgvVariant::Primary, FailReasonClass::PacketCorrupt) => Some(ArgvVariant::DtsFallback),
        (ArgvVariant::DtsFallback, _) => Some(ArgvVariant::TranscodeFallback),
        _ => None,
    }
}
