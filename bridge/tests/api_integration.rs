//! End-to-end exercises of the HTTP surface: admission denial under
//! exhausted tuner capacity, unknown-session lookups, and the HLS
//! playlist/segment serving contract. Shaped like
//! `rust-srec/src/api/routes/stream_proxy.rs`'s test module: build a real
//! `Router`, drive it with `tower::ServiceExt::oneshot`, and assert on the
//! response.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use bridge::api::routes::create_router;
use bridge::api::server::AppState;
use bridge::config::BridgeConfig;
use bridge::metrics::{InMemoryMetrics, MetricsSink};
use bridge::orchestrator::SessionOrchestrator;
use bridge::process::{MediaProcessRunner, ReceiverInputConfig};
use bridge::profile::{self, HardwareProbe, HwAccelMode};
use bridge::receiver::{ReceiverClient, ReceiverConfig};
use bridge::session::store::SessionStore;
use bridge::session::{Session, SessionState};
use bridge::tuner::{LeasePurpose, TunerLeaseRegistry};

fn test_config(work_root: std::path::PathBuf, tuner_slots: u32) -> BridgeConfig {
    BridgeConfig {
        receiver_base_url: "http://192.168.1.50".to_string(),
        receiver_credentials: None,
        receiver_user_agent: "VLC/3.0.18 LibVLC/3.0.18".to_string(),
        receiver_http_1_0: false,
        receiver_icy_metadata: false,
        receiver_attempt_timeout: Duration::from_secs(5),
        receiver_max_attempts: 3,
        tuner_slots,
        reserve_tuners_for_recording: 0,
        post_zap_delay_encrypted: Duration::from_millis(500),
        phase_deadline_start: Duration::from_secs(10),
        phase_deadline_priming: Duration::from_secs(30),
        phase_deadline_drain: Duration::from_secs(10),
        stall_grace: Duration::from_secs(30),
        stall_threshold: Duration::from_secs(90),
        dvr_window_sec_default: 10_800,
        segment_duration_sec_default: 6,
        segment_duration_sec_llhls: 4,
        playlist_size_max: 2000,
        lease_ttl: Duration::from_secs(60),
        heartbeat_interval: Duration::from_secs(20),
        media_binary_path: "/bin/true".to_string(),
        hw_accel_available: false,
        work_root,
        bind_address: "127.0.0.1".to_string(),
        port: 0,
    }
}

fn build_state(config: Arc<BridgeConfig>) -> AppState {
    let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetrics::new());
    let store = Arc::new(SessionStore::new(metrics.clone()));
    let tuners = Arc::new(TunerLeaseRegistry::new(
        config.tuner_slots,
        config.reserve_tuners_for_recording,
    ));
    let receiver = Arc::new(
        ReceiverClient::new(ReceiverConfig::from(config.as_ref())).expect("receiver client"),
    );
    let process_runner = Arc::new(MediaProcessRunner::new(
        config.media_binary_path.clone(),
        config.stall_grace,
        config.stall_threshold,
        ReceiverInputConfig {
            user_agent: config.receiver_user_agent.clone(),
            http_1_0: config.receiver_http_1_0,
            icy_metadata: config.receiver_icy_metadata,
            read_timeout: config.receiver_attempt_timeout,
        },
    ));
    let hardware_probe = HardwareProbe {
        has_gpu: config.hw_accel_available,
    };
    let orchestrator = Arc::new(SessionOrchestrator::new(
        store.clone(),
        tuners.clone(),
        receiver,
        process_runner,
        config.clone(),
        metrics,
        hardware_probe,
    ));

    AppState {
        store,
        tuners,
        orchestrator,
        config,
    }
}

#[tokio::test]
async fn start_intent_is_denied_with_409_when_tuner_slots_are_exhausted() {
    let work_root = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(work_root.path().to_path_buf(), 1));
    let state = build_state(config);

    // Occupy the one tuner slot directly, as an existing live session would.
    let held_lease = state.tuners.acquire(LeasePurpose::Live).unwrap();

    let app = create_router(state.clone());
    let request = Request::builder()
        .method("POST")
        .uri("/api/v3/intents")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"type":"stream.start","service_ref":"1:0:1:1:1:1:0:0:0:0:","profile_id":"safari"}"#,
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(response.headers().get(header::RETRY_AFTER).is_some());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["code"], "TUNER_SLOTS_EXHAUSTED");

    state.tuners.release(&held_lease);
}

#[tokio::test]
async fn capacity_snapshot_reflects_held_tuner_leases() {
    let work_root = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(work_root.path().to_path_buf(), 1));
    let state = build_state(config);
    state.tuners.acquire(LeasePurpose::Live).unwrap();

    let app = create_router(state);
    let request = Request::builder()
        .uri("/api/v3/system/capacity")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .unwrap()
            .to_str()
            .unwrap(),
        "private, max-age=5"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["tuners"]["total"], 1);
    assert_eq!(json["tuners"]["used"], 1);
    assert_eq!(json["tuners"]["available"], 0);
}

#[tokio::test]
async fn unknown_session_lookup_returns_404() {
    let work_root = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(work_root.path().to_path_buf(), 4));
    let state = build_state(config);

    let app = create_router(state);
    let request = Request::builder()
        .uri(format!("/api/v3/sessions/{}", uuid::Uuid::now_v7()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stopping_an_unknown_session_returns_404() {
    let work_root = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(work_root.path().to_path_buf(), 4));
    let state = build_state(config);

    let app = create_router(state);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v3/intents")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(
            r#"{{"type":"stream.stop","session_id":"{}"}}"#,
            uuid::Uuid::now_v7()
        )))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Puts a session directly into the `Ready` state pointing at a hand-built
/// `work_dir`, bypassing the orchestrator (which would spawn a real media
/// process) to exercise the HLS serving contract in isolation.
fn insert_ready_session(state: &AppState, work_dir: &std::path::Path) -> bridge::session::SessionId {
    let lease_ttl = chrono::Duration::seconds(60);
    let mut session = Session::new(
        "1:0:1:1:1:1:0:0:0:0:".to_string(),
        "safari".to_string(),
        HwAccelMode::Auto,
        work_dir.parent().unwrap(),
        lease_ttl,
    );
    let output_spec = profile::resolve(
        "safari",
        None,
        HardwareProbe { has_gpu: false },
        HwAccelMode::Auto,
        2000,
    )
    .unwrap();
    session.work_dir = work_dir.to_path_buf();
    session.output_spec = Some(output_spec);
    session.state = SessionState::Ready;
    let id = session.id;
    state.store.insert(session);
    id
}

#[tokio::test]
async fn hls_playlist_gets_dvr_start_offset_injected() {
    let work_root = tempfile::tempdir().unwrap();
    let session_dir = work_root.path().join("session");
    tokio::fs::create_dir_all(&session_dir).await.unwrap();
    tokio::fs::write(
        session_dir.join("index.m3u8"),
        "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg_000000000.m4s\n",
    )
    .await
    .unwrap();
    tokio::fs::write(session_dir.join("init.mp4"), b"fake-init-segment")
        .await
        .unwrap();

    let config = Arc::new(test_config(work_root.path().to_path_buf(), 4));
    let state = build_state(config);
    let id = insert_ready_session(&state, &session_dir);

    let app = create_router(state);
    let request = Request::builder()
        .uri(format!("/api/v3/sessions/{id}/hls/index.m3u8"))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "identity"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("#EXT-X-START:TIME-OFFSET=-10800"));
    assert!(body.find("#EXT-X-TARGETDURATION").unwrap() < body.find("#EXT-X-START").unwrap());
}

#[tokio::test]
async fn hls_segment_honors_range_header() {
    let work_root = tempfile::tempdir().unwrap();
    let session_dir = work_root.path().join("session");
    tokio::fs::create_dir_all(&session_dir).await.unwrap();
    tokio::fs::write(
        session_dir.join("index.m3u8"),
        "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg_000000000.m4s\n",
    )
    .await
    .unwrap();
    tokio::fs::write(session_dir.join("init.mp4"), b"0123456789")
        .await
        .unwrap();

    let config = Arc::new(test_config(work_root.path().to_path_buf(), 4));
    let state = build_state(config);
    let id = insert_ready_session(&state, &session_dir);

    let app = create_router(state);
    let request = Request::builder()
        .uri(format!("/api/v3/sessions/{id}/hls/init.mp4"))
        .header(header::RANGE, "bytes=0-3")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 0-3/10"
    );
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"0123");
}

#[tokio::test]
async fn hls_request_for_terminal_session_returns_gone() {
    let work_root = tempfile::tempdir().unwrap();
    let session_dir = work_root.path().join("session");
    tokio::fs::create_dir_all(&session_dir).await.unwrap();

    let config = Arc::new(test_config(work_root.path().to_path_buf(), 4));
    let state = build_state(config);
    let id = insert_ready_session(&state, &session_dir);
    state
        .store
        .transition(&id, SessionState::Cancelled, None)
        .unwrap();

    let app = create_router(state);
    let request = Request::builder()
        .uri(format!("/api/v3/sessions/{id}/hls/index.m3u8"))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn stopping_an_already_terminal_session_is_a_no_op_success() {
    let work_root = tempfile::tempdir().unwrap();
    let session_dir = work_root.path().join("session");
    tokio::fs::create_dir_all(&session_dir).await.unwrap();

    let config = Arc::new(test_config(work_root.path().to_path_buf(), 4));
    let state = build_state(config);
    let id = insert_ready_session(&state, &session_dir);
    state
        .store
        .transition(&id, SessionState::Cancelled, None)
        .unwrap();

    let app = create_router(state);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v3/intents")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(
            r#"{{"type":"stream.stop","session_id":"{id}"}}"#
        )))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["state"], "CANCELLED");
}

#[tokio::test]
async fn sweep_expired_leases_drains_a_ready_session_with_lease_expired_reason() {
    let work_root = tempfile::tempdir().unwrap();
    let session_dir = work_root.path().join("session");
    tokio::fs::create_dir_all(&session_dir).await.unwrap();

    let config = Arc::new(test_config(work_root.path().to_path_buf(), 4));
    let state = build_state(config);
    let id = insert_ready_session(&state, &session_dir);
    // Force the lease into the past so the sweep picks it up.
    state
        .store
        .set_lease(
            &id,
            state
                .tuners
                .acquire(LeasePurpose::Live)
                .expect("tuner slot"),
        );
    let mut session = state.store.get(&id).unwrap();
    session.lease_expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
    // Reinsert with the backdated lease; insert() overwrites in place.
    state.store.insert(session);

    state.orchestrator.sweep_expired_leases().await;

    let session = state.store.get(&id).unwrap();
    assert_eq!(session.state, SessionState::Draining);
    assert_eq!(
        session.fail_reason_class,
        Some(bridge::session::FailReasonClass::LeaseExpired)
    );
}
