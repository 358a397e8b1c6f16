//! `POST /api/v3/intents` — the IntentAPI.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::Serialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::session::{Intent, SessionState};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(submit_intent))
}

#[derive(Debug, Serialize)]
struct StartAccepted {
    session_id: crate::session::SessionId,
    state: SessionState,
    lease_expires_at: chrono::DateTime<chrono::Utc>,
    heartbeat_interval_sec: u64,
}

#[derive(Debug, Serialize)]
struct StopAccepted {
    session_id: crate::session::SessionId,
    state: SessionState,
}

async fn submit_intent(
    State(state): State<AppState>,
    Json(intent): Json<Intent>,
) -> ApiResult<Response> {
    match intent {
        Intent::Start {
            service_ref,
            profile_id,
            hw_accel_mode,
        } => {
            if service_ref.trim().is_empty() || profile_id.trim().is_empty() {
                return Err(ApiError::bad_request(
                    "service_ref and profile_id must not be empty",
                ));
            }

            let session_id = match state
                .orchestrator
                .start_session(service_ref, profile_id, hw_accel_mode)
                .await
            {
                Ok(id) => id,
                Err(crate::error::Error::LeaseBusy) => {
                    return Ok(tuner_slots_exhausted(&state));
                }
                Err(e) => return Err(e.into()),
            };

            let session = state
                .store
                .get(&session_id)
                .ok_or_else(|| ApiError::internal("session vanished immediately after creation"))?;

            let body = StartAccepted {
                session_id,
                state: session.state,
                lease_expires_at: session.lease_expires_at,
                heartbeat_interval_sec: state.config.heartbeat_interval.as_secs(),
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
        Intent::Stop { session_id } => {
            state.orchestrator.stop_session(session_id).await?;
            let session_state = state
                .store
                .get(&session_id)
                .map(|s| s.state)
                .unwrap_or(SessionState::Stopped);
            let body = StopAccepted {
                session_id,
                state: session_state,
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
    }
}

/// 409 + `TUNER_SLOTS_EXHAUSTED` + a `Retry-After` hint, derived from the
/// heartbeat interval since that's the next point capacity could plausibly
/// free up.
fn tuner_slots_exhausted(state: &AppState) -> Response {
    let mut headers = HeaderMap::new();
    let retry_after = state.config.heartbeat_interval.as_secs().max(1);
    headers.insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from_str(&retry_after.to_string()).unwrap_or(HeaderValue::from_static("5")),
    );
    let body = crate::api::error::ApiErrorResponse {
        code: "TUNER_SLOTS_EXHAUSTED".to_string(),
        message: "no tuner slots available".to_string(),
        details: None,
    };
    (StatusCode::CONFLICT, headers, Json(body)).into_response()
}
