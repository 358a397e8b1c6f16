//! C6: SessionStore — authoritative in-memory map plus a publish/subscribe
//! event bus, modeled on `rust-srec/src/config/events.rs`'s broadcaster
//! shape and the `DashMap`-as-concurrent-map idiom used throughout
//! `rust-srec/src/metrics/collector.rs`.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{FailReasonClass, Session, SessionEvent, SessionId, SessionState};
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;

const EVENT_BUS_CAPACITY: usize = 1024;

/// Authoritative session map. Reads never observe in-flight partial
/// mutations because every mutation happens through `update`/`transition`,
/// which hold the per-entry shard lock for the whole read-modify-write.
pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    bus: broadcast::Sender<SessionEvent>,
    metrics: Arc<dyn MetricsSink>,
}

impl SessionStore {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        let (bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            sessions: DashMap::new(),
            bus,
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.id, session);
        self.metrics.set_active_sessions(self.active_count() as u64);
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    pub fn exists(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Apply a state transition and publish the resulting event. Returns the
    /// error untouched if the transition is invalid so callers can decide
    /// whether that's a bug (it always is).
    pub fn transition(
        &self,
        id: &SessionId,
        target: SessionState,
        fail_reason_class: Option<FailReasonClass>,
    ) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::not_found("Session", id.to_string()))?;

        entry.transition(target)?;
        if fail_reason_class.is_some() {
            entry.fail_reason_class = fail_reason_class;
        }

        let event = SessionEvent {
            session_id: *id,
            state: target,
            fail_reason_class: entry.fail_reason_class,
        };
        drop(entry);

        match target {
            SessionState::Ready => self.metrics.incr_session_ready(),
            SessionState::Failed => {
                self.metrics
                    .incr_session_failed(fail_reason_class.map(|c| c.as_str()).unwrap_or("Internal"));
            }
            _ => {}
        }

        // A lagging/absent receiver is not an error: the store is still the
        // source of truth for polling readers.
        let _ = self.bus.send(event);
        Ok(())
    }

    /// Extend a session's lease (heartbeat). Returns `NotFound` if the
    /// session is absent or terminal.
    pub fn heartbeat(&self, id: &SessionId, ttl: chrono::Duration) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::not_found("Session", id.to_string()))?;
        if entry.state.is_terminal() {
            return Err(Error::not_found("Session", id.to_string()));
        }
        entry.extend_lease(ttl);
        Ok(())
    }

    pub fn touch_progress(&self, id: &SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.touch_progress();
        }
    }

    pub fn set_output_spec(&self, id: &SessionId, spec: crate::profile::OutputSpec) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.output_spec = Some(spec);
        }
    }

    pub fn set_lease(&self, id: &SessionId, lease: crate::tuner::TunerLease) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.lease = Some(lease);
        }
    }

    pub fn set_process_pid(&self, id: &SessionId, pid: Option<u32>) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.process_pid = pid;
        }
    }

    pub fn set_degraded(&self, id: &SessionId, degraded: bool) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.degraded = degraded;
        }
    }

    pub fn take_lease(&self, id: &SessionId) -> Option<crate::tuner::TunerLease> {
        self.sessions.get_mut(id).and_then(|mut e| e.lease.take())
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| !e.state.is_terminal())
            .count()
    }

    pub fn all(&self) -> Vec<Session> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Sweep sessions whose lease has expired without a heartbeat, moving
    /// them toward DRAINING with `LeaseExpired`. Returns the
    /// ids that were swept so the orchestrator can wake their supervisors.
    pub fn sweep_expired_leases(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<SessionId> {
        let mut swept = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            if entry.state.is_terminal() {
                continue;
            }
            if matches!(
                entry.state,
                SessionState::Starting | SessionState::Priming | SessionState::Ready
            ) && entry.lease_expires_at <= now
            {
                swept.push(entry.id);
            }
        }
        swept
    }
}
