//! Parser for the media process's `-progress` key=value stream
//! (`out_time_us=`, `total_size=`, `progress=continue|end`).
//!
//! Shaped after `rust-srec/src/downloader/engine/utils/ffmpeg_parser.rs`'s
//! line-at-a-time field extraction, adapted from ffmpeg's human-readable
//! `frame=...time=...` format to its machine-readable `-progress` format.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub out_time_us: Option<i64>,
    pub total_size: Option<u64>,
    pub ended: bool,
}

/// Accumulates `key=value` lines into the latest progress snapshot. Ffmpeg
/// emits one full set of keys per reporting interval, terminated by a
/// `progress=continue` or `progress=end` line.
#[derive(Debug, Default)]
pub struct ProgressAccumulator {
    pending: ProgressSnapshot,
}

impl ProgressAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns `Some(snapshot)` when a `progress=` line
    /// completes the current batch.
    pub fn feed(&mut self, line: &str) -> Option<ProgressSnapshot> {
        let (key, value) = line.split_once('=')?;
        let key = key.trim();
        let value = value.trim();
        match key {
            "out_time_us" => {
                self.pending.out_time_us = value.parse().ok();
                None
            }
            "total_size" => {
                self.pending.total_size = value.parse().ok();
                None
            }
            "progress" => {
                self.pending.ended = value == "end";
                let snapshot = self.pending;
                self.pending = ProgressSnapshot::default();
                Some(snapshot)
            }
            _ => None,
        }
    }
}

/// Did `next` advance past `prev` in a way that counts as progress for the
/// stall watchdog?
pub fn advanced(prev: &ProgressSnapshot, next: &ProgressSnapshot) -> bool {
    let time_advanced = match (prev.out_time_us, next.out_time_us) {
        (Some(p), Some(n)) => n > p,
        (None, Some(_)) => true,
        _ => false,
    };
    let size_advanced = match (prev.total_size, next.total_size) {
        (Some(p), Some(n)) => n > p,
        (None, Some(_)) => true,
        _ => false,
    };
    time_advanced || size_advanced
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_accumulates_until_progress_line() {
        let mut acc = ProgressAccumulator::new();
        assert!(acc.feed("frame=100").is_none());
        assert!(acc.feed("out_time_us=4000000").is_none());
        assert!(acc.feed("total_size=102400").is_none());
        let snapshot = acc.feed("progress=continue").unwrap();
        assert_eq!(snapshot.out_time_us, Some(4_000_000));
        assert_eq!(snapshot.total_size, Some(102_400));
        assert!(!snapshot.ended);
    }

    #[test]
    fn progress_end_is_flagged() {
        let mut acc = ProgressAccumulator::new();
        acc.feed("out_time_us=1");
        let snapshot = acc.feed("progress=end").unwrap();
        assert!(snapshot.ended);
    }

    #[test]
    fn advanced_detects_time_or_size_growth() {
        let prev = ProgressSnapshot {
            out_time_us: Some(1_000_000),
            total_size: Some(1000),
            ended: false,
        };
        let stalled = ProgressSnapshot {
            out_time_us: Some(1_000_000),
            total_size: Some(1000),
            ended: false,
        };
        let advancing = ProgressSnapshot {
            out_time_us: Some(2_000_000),
            total_size: Some(1000),
            ended: false,
        };
        assert!(!advanced(&prev, &stalled));
        assert!(advanced(&prev, &advancing));
    }
}
