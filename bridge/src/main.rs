//! Binary entrypoint: wires the core components together and runs the API
//! server until a shutdown signal arrives.
//!
//! Structured after `rust-srec/src/main.rs`'s shape (logging, env, service
//! construction, signal-driven graceful shutdown), without the
//! database/migration and notification steps that have no counterpart here.

use std::sync::Arc;

use tracing::{error, info, warn};

use bridge::api::server::{ApiServer, ApiServerConfig, AppState};
use bridge::config::BridgeConfig;
use bridge::logging::init_logging;
use bridge::metrics::{InMemoryMetrics, MetricsSink};
use bridge::orchestrator::SessionOrchestrator;
use bridge::process::{MediaProcessRunner, ReceiverInputConfig};
use bridge::profile::HardwareProbe;
use bridge::receiver::{ReceiverClient, ReceiverConfig};
use bridge::session::store::SessionStore;
use bridge::tuner::TunerLeaseRegistry;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const LEASE_SWEEP_INTERVAL_SEC: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard =
        init_logging(&log_dir).map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    info!("starting bridge v{}", env!("CARGO_PKG_VERSION"));

    dotenvy::dotenv().ok();
    let config = Arc::new(BridgeConfig::from_env()?);

    let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetrics::new());
    let store = Arc::new(SessionStore::new(metrics.clone()));
    let tuners = Arc::new(TunerLeaseRegistry::new(
        config.tuner_slots,
        config.reserve_tuners_for_recording,
    ));
    let receiver = Arc::new(ReceiverClient::new(ReceiverConfig::from(config.as_ref()))?);
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

    let sweep_orchestrator = orchestrator.clone();
    let sweep_interval = std::time::Duration::from_secs(LEASE_SWEEP_INTERVAL_SEC);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            sweep_orchestrator.sweep_expired_leases().await;
        }
    });

    let state = AppState {
        store,
        tuners,
        orchestrator,
        config: config.clone(),
    };
    let api_server = ApiServer::new(ApiServerConfig::from(config.as_ref()), state);
    let shutdown_token = api_server.cancel_token();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            error!(error = %e, "API server exited with an error");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = wait_for_sigterm() => {
            info!("received SIGTERM, shutting down");
        }
    }

    shutdown_token.cancel();
    if let Err(e) = server_handle.await {
        warn!(error = %e, "API server task did not shut down cleanly");
    }

    info!("bridge shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
