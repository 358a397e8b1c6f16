//! C7: SessionOrchestrator — the per-session supervisor. Owns the admission
//! sequence, the running-session event loop, and the stop
//! path. One `tokio::spawn`ed task per session, the same "one task owns the
//! whole lifecycle" shape `FfmpegEngine::start` uses for a single download,
//! generalized to a state machine with retries.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::hls::HlsPackager;
use crate::metrics::MetricsSink;
use crate::process::{ArgvVariant, MediaProcessHandle, MediaProcessRunner, ProcessEvent, next_retry_variant};
use crate::profile::{HardwareProbe, HwAccelMode, OutputSpec};
use crate::receiver::ReceiverClient;
use crate::session::store::SessionStore;
use crate::session::{FailReasonClass, Session, SessionId, SessionState};
use crate::tuner::{LeasePurpose, TunerLeaseRegistry};

pub struct SessionOrchestrator {
    store: Arc<SessionStore>,
    tuners: Arc<TunerLeaseRegistry>,
    receiver: Arc<ReceiverClient>,
    process_runner: Arc<MediaProcessRunner>,
    config: Arc<BridgeConfig>,
    metrics: Arc<dyn MetricsSink>,
    hardware_probe: HardwareProbe,
    /// Cancellation handle for each non-terminal session's supervisor task,
    /// used by `stop_session` to reach a task it does not otherwise own.
    stop_tokens: Arc<DashMap<SessionId, CancellationToken>>,
}

impl Clone for SessionOrchestrator {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tuners: self.tuners.clone(),
            receiver: self.receiver.clone(),
            process_runner: self.process_runner.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            hardware_probe: self.hardware_probe,
            stop_tokens: self.stop_tokens.clone(),
        }
    }
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        tuners: Arc<TunerLeaseRegistry>,
        receiver: Arc<ReceiverClient>,
        process_runner: Arc<MediaProcessRunner>,
        config: Arc<BridgeConfig>,
        metrics: Arc<dyn MetricsSink>,
        hardware_probe: HardwareProbe,
    ) -> Self {
        Self {
            store,
            tuners,
            receiver,
            process_runner,
            config,
            metrics,
            hardware_probe,
            stop_tokens: Arc::new(DashMap::new()),
        }
    }

    /// Admit and launch a new session for a `stream.start` intent.
    /// Returns the new session id once a tuner lease is
    /// held; admission failures before that point are synchronous.
    pub async fn start_session(
        &self,
        service_ref: String,
        profile_id: String,
        hw_accel_mode: HwAccelMode,
    ) -> Result<SessionId> {
        let lease = self.tuners.acquire(LeasePurpose::Live).ok_or_else(|| {
            self.metrics.incr_lease_denied();
            Error::LeaseBusy
        })?;
        self.metrics
            .set_tuners_in_use(self.tuners.snapshot().used as u64);

        let lease_ttl = chrono::Duration::from_std(self.config.lease_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let mut session = Session::new(
            service_ref,
            profile_id,
            hw_accel_mode,
            &self.config.work_root,
            lease_ttl,
        );
        let id = session.id;
        session.lease = Some(lease);
        self.store.insert(session);
        self.metrics.incr_session_started();

        let token = CancellationToken::new();
        self.stop_tokens.insert(id, token.clone());

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.supervise(id, token).await;
        });

        Ok(id)
    }

    /// Request a running or admitting session to stop. Idempotent: stopping
    /// an already-terminal session is a no-op success, since the caller's
    /// desired end state already holds.
    pub async fn stop_session(&self, id: SessionId) -> Result<()> {
        let session = self
            .store
            .get(&id)
            .ok_or_else(|| Error::not_found("Session", id.to_string()))?;
        if session.state.is_terminal() {
            return Ok(());
        }
        if session.state == SessionState::Ready {
            self.store.transition(&id, SessionState::Draining, None)?;
        } else {
            self.store.transition(&id, SessionState::Cancelled, None)?;
        }
        if let Some(token) = self.stop_tokens.get(&id) {
            token.cancel();
        }
        Ok(())
    }

    async fn supervise(&self, id: SessionId, stop_token: CancellationToken) {
        let result = self.run_admission_and_stream(&id, &stop_token).await;

        if let Err(e) = &result {
            warn!(session_id = %id, error = %e, "session failed");
            let reason = classify_terminal_error(e);
            let _ = self.store.transition(&id, SessionState::Failed, Some(reason));
        }

        self.store_release_lease(&id);
        self.stop_tokens.remove(&id);
    }

    fn store_release_lease(&self, id: &SessionId) {
        if let Some(lease) = self.store.take_lease(id) {
            self.tuners.release(&lease);
            self.metrics
                .set_tuners_in_use(self.tuners.snapshot().used as u64);
        }
    }

    async fn run_admission_and_stream(
        &self,
        id: &SessionId,
        stop_token: &CancellationToken,
    ) -> Result<()> {
        if stop_token.is_cancelled() {
            self.store.transition(id, SessionState::Cancelled, None)?;
            return Ok(());
        }
        self.store.transition(id, SessionState::Starting, None)?;
        let session = self
            .store
            .get(id)
            .ok_or_else(|| Error::not_found("Session", id.to_string()))?;

        HlsPackager::ensure_work_dir(&session.work_dir).await?;

        // No per-request DVR override exists yet; the profile table's own
        // `dvr_window_sec` column decides.
        let output_spec = crate::profile::resolve(
            &session.profile_id,
            None,
            self.hardware_probe,
            session.hw_accel_mode,
            self.config.playlist_size_max,
        )
        .map_err(|e| Error::validation(e.to_string()))?;
        self.store.set_output_spec(id, output_spec.clone());

        let zap = tokio::select! {
            _ = stop_token.cancelled() => {
                self.store.transition(id, SessionState::Cancelled, None)?;
                return Ok(());
            }
            result = tokio::time::timeout(
                self.config.phase_deadline_start,
                self.receiver.zap_and_resolve_stream(&session.service_ref),
            ) => {
                match result {
                    Ok(Ok(zap)) => zap,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(Error::TuneFailed("tune timed out".into())),
                }
            }
        };

        if zap.encrypted {
            tokio::time::sleep(self.config.post_zap_delay_encrypted).await;
        }

        self.run_with_retries(id, stop_token, &zap.stream_url, &output_spec)
            .await
    }

    /// Run the media process, retrying with the escalating argv variants
    /// from `next_retry_variant` on classified retryable failures, then
    /// surface the last failure as terminal.
    async fn run_with_retries(
        &self,
        id: &SessionId,
        stop_token: &CancellationToken,
        stream_url: &str,
        output_spec: &OutputSpec,
    ) -> Result<()> {
        let session = self
            .store
            .get(id)
            .ok_or_else(|| Error::not_found("Session", id.to_string()))?;
        let mut variant = ArgvVariant::Primary;

        loop {
            let handle = self
                .process_runner
                .spawn(stream_url, output_spec, &session.work_dir, variant)?;
            self.store.set_process_pid(id, handle.pid());

            match self.drive_process(id, stop_token, handle, output_spec).await? {
                ProcessOutcome::Stopped => return Ok(()),
                ProcessOutcome::Succeeded => return Ok(()),
                ProcessOutcome::Failed(reason) => match next_retry_variant(variant, reason) {
                    Some(next) => {
                        info!(session_id = %id, ?reason, "retrying media process with fallback argv");
                        self.metrics.incr_retry(reason.as_str());
                        variant = next;
                        continue;
                    }
                    None => {
                        return Err(Error::Process(format!("media process failed: {reason:?}")));
                    }
                },
            }
        }
    }

    /// Drive one media-process attempt to completion: wait for readiness,
    /// transition through PRIMING/READY, watch for stalls and exits, and
    /// honor stop requests.
    async fn drive_process(
        &self,
        id: &SessionId,
        stop_token: &CancellationToken,
        mut handle: MediaProcessHandle,
        output_spec: &OutputSpec,
    ) -> Result<ProcessOutcome> {
        self.store.transition(id, SessionState::Priming, None)?;

        let priming_deadline = tokio::time::sleep(self.config.phase_deadline_priming);
        tokio::pin!(priming_deadline);
        let mut became_ready = false;

        loop {
            tokio::select! {
                _ = stop_token.cancelled() => {
                    handle.stop();
                    self.wait_for_exit(id, &mut handle).await;
                    if self.store.get(id).map(|s| s.state) == Some(SessionState::Draining) {
                        let _ = self.store.transition(id, SessionState::Stopping, None);
                        let _ = self.store.transition(id, SessionState::Stopped, None);
                    }
                    return Ok(ProcessOutcome::Stopped);
                }
                _ = &mut priming_deadline, if !became_ready => {
                    handle.stop();
                    self.wait_for_exit(id, &mut handle).await;
                    self.store.transition(id, SessionState::Failed, Some(FailReasonClass::PrimingTimeout))?;
                    return Ok(ProcessOutcome::Stopped);
                }
                event = handle.events.recv() => {
                    match event {
                        Some(ProcessEvent::Progress(_)) => {
                            self.store.touch_progress(id);
                            if !became_ready && HlsPackager::is_ready(&self.session_work_dir(id)?).await? {
                                self.store.transition(id, SessionState::Ready, None)?;
                                became_ready = true;
                            }
                            if became_ready {
                                let health = HlsPackager::health_check(&self.session_work_dir(id)?, output_spec).await?;
                                let degraded = matches!(health, crate::hls::HealthStatus::Degraded { .. });
                                self.store.set_degraded(id, degraded);
                            }
                        }
                        Some(ProcessEvent::Stalled) => {
                            warn!(session_id = %id, "media process stalled, stopping");
                            self.metrics.incr_stall();
                            handle.stop();
                            self.wait_for_exit(id, &mut handle).await;
                            self.store.transition(id, SessionState::Failed, Some(FailReasonClass::FFmpegStalled))?;
                            return Ok(ProcessOutcome::Stopped);
                        }
                        Some(ProcessEvent::Exited { success, fail_reason_class, .. }) => {
                            if success {
                                return Ok(ProcessOutcome::Succeeded);
                            }
                            return Ok(ProcessOutcome::Failed(
                                fail_reason_class.unwrap_or(FailReasonClass::FFmpegExit),
                            ));
                        }
                        None => {
                            return Ok(ProcessOutcome::Failed(FailReasonClass::Internal));
                        }
                    }
                }
            }
        }
    }

    /// Drain remaining events from a process we've asked to stop, without
    /// touching session state — callers decide the resulting terminal state.
    async fn wait_for_exit(&self, id: &SessionId, handle: &mut MediaProcessHandle) {
        let drained = tokio::time::timeout(self.config.phase_deadline_drain, async {
            while let Some(event) = handle.events.recv().await {
                if matches!(event, ProcessEvent::Exited { .. }) {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(session_id = %id, "media process did not exit within the drain deadline");
        }
    }

    fn session_work_dir(&self, id: &SessionId) -> Result<std::path::PathBuf> {
        self.store
            .get(id)
            .map(|s| s.work_dir)
            .ok_or_else(|| Error::not_found("Session", id.to_string()))
    }

    /// Periodic sweeper: move sessions whose lease expired without a
    /// heartbeat toward a `LeaseExpired` end, draining a live session through
    /// DRAINING/STOPPING rather than cutting it straight to CANCELLED.
    /// Intended to be driven by a `tokio::time::interval` in `main.rs`.
    pub async fn sweep_expired_leases(&self) {
        let now = chrono::Utc::now();
        for id in self.store.sweep_expired_leases(now) {
            info!(session_id = %id, "lease expired without heartbeat");
            let state = self.store.get(&id).map(|s| s.state);
            let target = if state == Some(SessionState::Ready) {
                SessionState::Draining
            } else {
                SessionState::Cancelled
            };
            let _ = self
                .store
                .transition(&id, target, Some(FailReasonClass::LeaseExpired));
            if let Some(token) = self.stop_tokens.get(&id) {
                token.cancel();
            }
        }
    }
}

enum ProcessOutcome {
    Stopped,
    Succeeded,
    Failed(FailReasonClass),
}

fn classify_terminal_error(err: &Error) -> FailReasonClass {
    match err {
        Error::TuneFailed(_) => FailReasonClass::TuneFailed,
        Error::ReceiverUnavailable(_) => FailReasonClass::TuneFailed,
        Error::Process(_) => FailReasonClass::FFmpegExit,
        Error::Validation(_) => FailReasonClass::Internal,
        _ => FailReasonClass::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_terminal_error_maps_tune_failures() {
        assert_eq!(
            classify_terminal_error(&Error::TuneFailed("x".into())),
            FailReasonClass::TuneFailed
        );
        assert_eq!(
            classify_terminal_error(&Error::ReceiverUnavailable("x".into())),
            FailReasonClass::TuneFailed
        );
    }
}
