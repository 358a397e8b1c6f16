//! `GET /api/v3/system/capacity` — a short-TTL cached capacity snapshot
//!: clients must not poll faster than every 5s, enforced
//! server-side with a cache rather than trusted to clients.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::header::CACHE_CONTROL;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use parking_lot::Mutex;
use serde::Serialize;

use crate::api::server::AppState;

const CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
struct CapacityBody {
    tuners: crate::tuner::CapacitySnapshot,
    sessions: SessionsBody,
    recordings: RecordingsBody,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct SessionsBody {
    active: u64,
}

#[derive(Debug, Clone, Serialize)]
struct RecordingsBody {
    active: u64,
    scheduled: u64,
}

struct Cache {
    body: Option<(Instant, CapacityBody)>,
}

/// Process-wide cache, analogous to the `DashMap`-backed caches
/// `rust-srec/src/config/cache.rs` keeps for hot config reads.
static CACHE: std::sync::OnceLock<Arc<Mutex<Cache>>> = std::sync::OnceLock::new();

fn cache() -> Arc<Mutex<Cache>> {
    CACHE
        .get_or_init(|| Arc::new(Mutex::new(Cache { body: None })))
        .clone()
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_capacity))
}

async fn get_capacity(State(state): State<AppState>) -> Response {
    let cache = cache();
    {
        let guard = cache.lock();
        if let Some((fetched_at, body)) = &guard.body
            && fetched_at.elapsed() < CACHE_TTL
        {
            return with_cache_header(Json(body.clone()));
        }
    }

    let snapshot = state.tuners.snapshot();
    let body = CapacityBody {
        tuners: snapshot,
        sessions: SessionsBody {
            active: state.store.active_count() as u64,
        },
        // Recording scheduling is out of core scope; always reported empty.
        recordings: RecordingsBody {
            active: 0,
            scheduled: 0,
        },
        timestamp: chrono::Utc::now(),
    };

    cache.lock().body = Some((Instant::now(), body.clone()));
    with_cache_header(Json(body))
}

fn with_cache_header(json: Json<CapacityBody>) -> Response {
    let mut response = json.into_response();
    response.headers_mut().insert(
        CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=5"),
    );
    response
}
