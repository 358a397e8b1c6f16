//! Exit/stderr classification.
//!
//! Pattern matching against captured stderr, the same "scan known substrings
//! then decide severity" approach rust-srec uses for segment-boundary
//! detection in `ffmpeg_parser.rs::is_segment_start`, generalized into a
//! small ordered rule table.

use crate::session::FailReasonClass;

/// What to do once a pattern has matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifiedAction {
    /// Retry once with fallback argv (`+igndts`, forced `cfr`).
    RetryWithFallback,
    /// Fail immediately, no retry.
    FailFast,
    /// Log only; not a failure on its own.
    WarnOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub reason: FailReasonClass,
    pub action: ClassifiedAction,
}

struct Rule {
    pattern: &'static str,
    reason: FailReasonClass,
    action: ClassifiedAction,
}

/// Ordered so the first (most specific) match wins.
const RULES: &[Rule] = &[
    Rule {
        pattern: "Non-monotonous DTS",
        reason: FailReasonClass::NonMonotonousDts,
        action: ClassifiedAction::RetryWithFallback,
    },
    Rule {
        pattern: "Invalid duration",
        reason: FailReasonClass::InvalidDuration,
        action: ClassifiedAction::FailFast,
    },
    Rule {
        pattern: "Timestamps unset",
        reason: FailReasonClass::TimestampsUnset,
        action: ClassifiedAction::WarnOnly,
    },
    Rule {
        pattern: "PES packet size mismatch",
        reason: FailReasonClass::PacketCorrupt,
        action: ClassifiedAction::WarnOnly,
    },
    Rule {
        pattern: "Packet corrupt",
        reason: FailReasonClass::PacketCorrupt,
        action: ClassifiedAction::WarnOnly,
    },
    Rule {
        pattern: "incomplete frame",
        reason: FailReasonClass::PacketCorrupt,
        action: ClassifiedAction::WarnOnly,
    },
    Rule {
        pattern: "Connection reset",
        reason: FailReasonClass::StreamConnectReset,
        action: ClassifiedAction::FailFast,
    },
    Rule {
        pattern: "End of file",
        reason: FailReasonClass::StreamConnectReset,
        action: ClassifiedAction::FailFast,
    },
];

/// Scan captured stderr for the highest-priority classification. Returns
/// `None` if nothing matched (caller should fall back to
/// `FailReasonClass::FFmpegExit`, an unclassified non-zero exit).
pub fn classify_stderr(stderr: &str) -> Option<Classification> {
    RULES
        .iter()
        .find(|rule| stderr.contains(rule.pattern))
        .map(|rule| Classification {
            reason: rule.reason,
            action: rule.action,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_monotonous_dts_triggers_retry() {
        let c = classify_stderr("[mpegts @ 0x1] Non-monotonous DTS in output stream").unwrap();
        assert_eq!(c.reason, FailReasonClass::NonMonotonousDts);
        assert_eq!(c.action, ClassifiedAction::RetryWithFallback);
    }

    #[test]
    fn invalid_duration_fails_fast() {
        let c = classify_stderr("Invalid duration specified for stream").unwrap();
        assert_eq!(c.reason, FailReasonClass::InvalidDuration);
        assert_eq!(c.action, ClassifiedAction::FailFast);
    }

    #[test]
    fn timestamps_unset_is_warn_only() {
        let c = classify_stderr("Timestamps unset, using guessed values").unwrap();
        assert_eq!(c.action, ClassifiedAction::WarnOnly);
    }

    #[test]
    fn low_severity_patterns_are_warn_only() {
        for pattern in ["PES packet size mismatch", "Packet corrupt", "incomplete frame"] {
            let c = classify_stderr(&format!("some prefix {pattern} some suffix")).unwrap();
            assert_eq!(c.action, ClassifiedAction::WarnOnly);
        }
    }

    #[test]
    fn unknown_stderr_is_unclassified() {
        assert!(classify_stderr("some harmless informational line").is_none());
    }
}
