//! `/api/v3/sessions/{id}` — session projection, heartbeat, and the nested
//! HLS surface.

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use serde::Serialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::hls;
use crate::api::server::AppState;
use crate::session::{FailReasonClass, SessionId, SessionState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_session))
        .route("/{id}/heartbeat", post(heartbeat))
        .nest("/{id}/hls", hls::router())
}

/// Session projection returned to clients.
#[derive(Debug, Serialize)]
struct SessionProjection {
    id: SessionId,
    state: SessionState,
    service_ref: String,
    profile_id: String,
    hw_accel_active: bool,
    lease_expires_at: chrono::DateTime<chrono::Utc>,
    last_heartbeat: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fail_reason_class: Option<FailReasonClass>,
    degraded: bool,
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<SessionProjection>> {
    let session = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("session {id} not found")))?;

    Ok(Json(SessionProjection {
        id: session.id,
        state: session.state,
        service_ref: session.service_ref,
        profile_id: session.profile_id,
        hw_accel_active: session.output_spec.map(|s| s.hw_accel).unwrap_or(false),
        lease_expires_at: session.lease_expires_at,
        last_heartbeat: session.last_progress_at,
        fail_reason_class: session.fail_reason_class,
        degraded: session.degraded,
    }))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<serde_json::Value>> {
    let lease_ttl = chrono::Duration::from_std(state.config.lease_ttl)
        .unwrap_or_else(|_| chrono::Duration::seconds(60));
    state.store.heartbeat(&id, lease_ttl)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
