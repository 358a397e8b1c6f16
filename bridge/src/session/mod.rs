//! C6 data model + store: Session, SessionState, Intent, and the
//! authoritative in-memory `SessionStore`.
//!
//! The state machine idiom (`can_transition_to`/`transition_to`, absorbing
//! terminal states) is ported from `rust-srec/src/domain/streamer/state.rs`.

pub mod store;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::Error;
use crate::profile::{HwAccelMode, OutputSpec};
use crate::tuner::TunerLease;

pub type SessionId = Uuid;

/// Session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    New,
    Starting,
    Priming,
    Ready,
    Draining,
    Stopping,
    Stopped,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Starting => "STARTING",
            Self::Priming => "PRIMING",
            Self::Ready => "READY",
            Self::Draining => "DRAINING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::Cancelled)
    }

    /// Validate a transition against the allowed-edges table below.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        if self.is_terminal() {
            // Terminal states are absorbing: no outgoing edges, not even to self.
            return false;
        }
        match (self, target) {
            (New, Starting) => true,
            (Starting, Priming) => true,
            (Priming, Ready) => true,
            (Ready, Draining) => true,
            (Draining, Stopping) => true,
            (Stopping, Stopped) => true,
            // Any non-terminal state can fail or be cancelled.
            (_, Failed) => true,
            (_, Cancelled) => true,
            _ => false,
        }
    }

    pub fn transition_to(&self, target: SessionState) -> Result<SessionState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `fail_reason_class` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FailReasonClass {
    LeaseBusy,
    TuneFailed,
    TuneTimeout,
    StartTimeout,
    PrimingTimeout,
    FFmpegStalled,
    FFmpegExit,
    StreamConnectReset,
    NonMonotonousDts,
    TimestampsUnset,
    InvalidDuration,
    PacketCorrupt,
    LeaseExpired,
    ClientDisconnect,
    Internal,
}

impl FailReasonClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeaseBusy => "LeaseBusy",
            Self::TuneFailed => "TuneFailed",
            Self::TuneTimeout => "TuneTimeout",
            Self::StartTimeout => "StartTimeout",
            Self::PrimingTimeout => "PrimingTimeout",
            Self::FFmpegStalled => "FFmpegStalled",
            Self::FFmpegExit => "FFmpegExit",
            Self::StreamConnectReset => "StreamConnectReset",
            Self::NonMonotonousDts => "NonMonotonousDTS",
            Self::TimestampsUnset => "TimestampsUnset",
            Self::InvalidDuration => "InvalidDuration",
            Self::PacketCorrupt => "PacketCorrupt",
            Self::LeaseExpired => "LeaseExpired",
            Self::ClientDisconnect => "ClientDisconnect",
            Self::Internal => "Internal",
        }
    }
}

/// An intent submitted to the IntentAPI.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    #[serde(rename = "stream.start")]
    Start {
        service_ref: String,
        profile_id: String,
        #[serde(default)]
        hw_accel_mode: HwAccelMode,
    },
    #[serde(rename = "stream.stop")]
    Stop { session_id: SessionId },
}

/// The central session entity.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub service_ref: String,
    pub profile_id: String,
    pub hw_accel_mode: HwAccelMode,
    pub state: SessionState,
    pub fail_reason_class: Option<FailReasonClass>,
    pub lease: Option<TunerLease>,
    pub output_spec: Option<OutputSpec>,
    pub work_dir: PathBuf,
    pub process_pid: Option<u32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub became_ready_at: Option<chrono::DateTime<chrono::Utc>>,
    pub terminal_at: Option<chrono::DateTime<chrono::Utc>>,
    pub lease_expires_at: chrono::DateTime<chrono::Utc>,
    pub last_progress_at: chrono::DateTime<chrono::Utc>,
    pub degraded: bool,
}

impl Session {
    pub fn new(
        service_ref: String,
        profile_id: String,
        hw_accel_mode: HwAccelMode,
        work_root: &std::path::Path,
        lease_ttl: chrono::Duration,
    ) -> Self {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();
        Self {
            id,
            service_ref,
            profile_id,
            hw_accel_mode,
            state: SessionState::New,
            fail_reason_class: None,
            lease: None,
            output_spec: None,
            work_dir: work_root.join(id.to_string()),
            process_pid: None,
            created_at: now,
            became_ready_at: None,
            terminal_at: None,
            lease_expires_at: now + lease_ttl,
            last_progress_at: now,
            degraded: false,
        }
    }

    /// Apply a validated transition, stamping the relevant timestamp.
    /// Timestamps are monotonically increasing.
    pub fn transition(&mut self, target: SessionState) -> Result<(), Error> {
        self.state = self.state.transition_to(target)?;
        let now = chrono::Utc::now();
        match target {
            SessionState::Ready => self.became_ready_at = Some(now),
            SessionState::Stopped | SessionState::Failed | SessionState::Cancelled => {
                self.terminal_at = Some(now);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn extend_lease(&mut self, ttl: chrono::Duration) {
        self.lease_expires_at = chrono::Utc::now() + ttl;
    }

    pub fn touch_progress(&mut self) {
        self.last_progress_at = chrono::Utc::now();
    }
}

/// Event published by `SessionStore` on every transition.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub state: SessionState,
    pub fail_reason_class: Option<FailReasonClass>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        use SessionState::*;
        assert!(New.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Priming));
        assert!(Priming.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn any_non_terminal_state_can_fail_or_cancel() {
        use SessionState::*;
        for s in [New, Starting, Priming, Ready, Draining, Stopping] {
            assert!(s.can_transition_to(Failed));
            assert!(s.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn terminal_states_are_absorbing() {
        use SessionState::*;
        for terminal in [Stopped, Failed, Cancelled] {
            for target in [New, Starting, Priming, Ready, Draining, Stopping, Stopped, Failed, Cancelled]
            {
                assert!(!terminal.can_transition_to(target), "{terminal:?} -> {target:?}");
            }
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        use SessionState::*;
        assert!(!New.can_transition_to(Ready));
        assert!(!Starting.can_transition_to(Stopped));
    }

    #[test]
    fn transition_stamps_became_ready_at() {
        let mut session = Session::new(
            "1:0:1:1:1:1:1:0:0:0:".into(),
            "safari".into(),
            HwAccelMode::Auto,
            std::path::Path::new("/tmp"),
            chrono::Duration::seconds(60),
        );
        session.transition(SessionState::Starting).unwrap();
        session.transition(SessionState::Priming).unwrap();
        assert!(session.became_ready_at.is_none());
        session.transition(SessionState::Ready).unwrap();
        assert!(session.became_ready_at.is_some());
    }
}
