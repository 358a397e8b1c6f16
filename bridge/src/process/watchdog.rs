//! Stall watchdog: after an initial grace window, a run
//! that stops advancing `out_time_us`/`total_size` for longer than the stall
//! threshold is classified `FFmpegStalled` and torn down.
//!
//! Modeled on the cancellation race in
//! `rust-srec/src/downloader/engine/ffmpeg.rs::start`, which uses
//! `tokio::select!` against a cancellation token rather than polling.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::progress::ProgressSnapshot;

/// Tracks the last time progress was observed and signals a stall once
/// `stall_threshold` has elapsed with no advance, after an initial
/// `stall_grace` warm-up period is over.
pub struct StallWatchdog {
    stall_grace: Duration,
    stall_threshold: Duration,
    started_at: Instant,
    last_progress_at: Instant,
    last_snapshot: ProgressSnapshot,
}

impl StallWatchdog {
    pub fn new(stall_grace: Duration, stall_threshold: Duration) -> Self {
        let now = Instant::now();
        Self {
            stall_grace,
            stall_threshold,
            started_at: now,
            last_progress_at: now,
            last_snapshot: ProgressSnapshot::default(),
        }
    }

    /// Record a new progress snapshot, resetting the stall clock if it
    /// advanced past the previous one.
    pub fn observe(&mut self, snapshot: ProgressSnapshot) {
        if super::progress::advanced(&self.last_snapshot, &snapshot) {
            self.last_progress_at = Instant::now();
        }
        self.last_snapshot = snapshot;
    }

    /// Has the run stalled? False during the grace window regardless of
    /// progress, since the process may legitimately take a moment to produce
    /// its first segment.
    pub fn is_stalled(&self) -> bool {
        if self.started_at.elapsed() < self.stall_grace {
            return false;
        }
        self.last_progress_at.elapsed() >= self.stall_threshold
    }

    /// Duration until the next point this watchdog should be polled again.
    pub fn next_check_in(&self) -> Duration {
        if self.started_at.elapsed() < self.stall_grace {
            return self.stall_grace - self.started_at.elapsed();
        }
        self.stall_threshold
            .saturating_sub(self.last_progress_at.elapsed())
            .max(Duration::from_secs(1))
    }
}

/// A one-shot signal a supervising task can poll or await to learn the run
/// stalled, set by a ticking task that periodically calls
/// `StallWatchdog::is_stalled`.
pub fn stall_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn grace_window_suppresses_stall_detection() {
        let watchdog = StallWatchdog::new(Duration::from_secs(30), Duration::from_secs(90));
        assert!(!watchdog.is_stalled());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!watchdog.is_stalled());
    }

    #[tokio::test(start_paused = true)]
    async fn no_progress_past_threshold_is_stalled() {
        let watchdog = StallWatchdog::new(Duration::from_secs(5), Duration::from_secs(20));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(watchdog.is_stalled());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_resets_the_clock() {
        let mut watchdog = StallWatchdog::new(Duration::from_secs(5), Duration::from_secs(20));
        tokio::time::advance(Duration::from_secs(15)).await;
        watchdog.observe(ProgressSnapshot {
            out_time_us: Some(1_000_000),
            total_size: Some(1),
            ended: false,
        });
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(!watchdog.is_stalled());
    }
}
