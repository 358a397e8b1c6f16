//! Static configuration snapshot loaded from the environment.
//!
//! A receiver/tuner bridge has a small, fixed set of knobs, so this
//! module exists only as a plain env-loaded snapshot. Unlike
//! `rust-srec/src/config/{cache,events,service}.rs`, there is
//! no database-backed cache or hot-reload broadcaster here — the snapshot is
//! read once at startup.

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration snapshot recognized by the core.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Receiver base URL, e.g. `http://192.168.1.50:80`.
    pub receiver_base_url: String,
    /// Optional HTTP Basic auth credentials for the receiver.
    pub receiver_credentials: Option<(String, String)>,
    /// User-Agent sent on every receiver request. Must resemble a well-known
    /// media player; some receiver firmwares terminate streams otherwise.
    pub receiver_user_agent: String,
    /// Force HTTP/1.0 when talking to the receiver.
    pub receiver_http_1_0: bool,
    /// Send `Icy-MetaData: 1` on stream requests.
    pub receiver_icy_metadata: bool,
    /// Per-attempt wall-clock timeout for receiver calls.
    pub receiver_attempt_timeout: Duration,
    /// Maximum receiver call attempts before surfacing `ReceiverUnavailable`.
    pub receiver_max_attempts: u32,

    /// Total tuner lease slots.
    pub tuner_slots: u32,
    /// Slots reserved for recordings; live sessions may not use them.
    pub reserve_tuners_for_recording: u32,

    /// Delay observed after a zap to an encrypted channel before opening the
    /// stream, to let the descrambler warm up.
    pub post_zap_delay_encrypted: Duration,

    pub phase_deadline_start: Duration,
    pub phase_deadline_priming: Duration,
    pub phase_deadline_drain: Duration,

    pub stall_grace: Duration,
    pub stall_threshold: Duration,

    /// 0 disables DVR globally.
    pub dvr_window_sec_default: u32,
    pub segment_duration_sec_default: u32,
    pub segment_duration_sec_llhls: u32,
    pub playlist_size_max: u32,

    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,

    /// Path to the media-processing binary (ffmpeg-compatible argv contract).
    pub media_binary_path: String,

    pub hw_accel_available: bool,

    /// Root directory under which each session gets its own `work_dir`.
    pub work_root: std::path::PathBuf,

    /// HTTP bind address for the API server.
    pub bind_address: String,
    pub port: u16,
}

impl BridgeConfig {
    /// Load from environment variables, applying documented defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self> {
        let receiver_base_url = std::env::var("RECEIVER_BASE_URL")
            .map_err(|_| Error::config("RECEIVER_BASE_URL is required"))?;

        let receiver_credentials = match (
            std::env::var("RECEIVER_USERNAME").ok(),
            std::env::var("RECEIVER_PASSWORD").ok(),
        ) {
            (Some(u), Some(p)) if !u.is_empty() => Some((u, p)),
            _ => None,
        };

        Ok(Self {
            receiver_base_url,
            receiver_credentials,
            receiver_user_agent: env_string(
                "RECEIVER_USER_AGENT",
                "VLC/3.0.18 LibVLC/3.0.18",
            ),
            receiver_http_1_0: env_bool("RECEIVER_HTTP_1_0", true),
            receiver_icy_metadata: env_bool("RECEIVER_ICY_METADATA", true),
            receiver_attempt_timeout: Duration::from_secs(env_u64("RECEIVER_ATTEMPT_TIMEOUT_SEC", 8)),
            receiver_max_attempts: env_u32("RECEIVER_MAX_ATTEMPTS", 3),

            tuner_slots: env_u32("TUNER_SLOTS", 4),
            reserve_tuners_for_recording: env_u32("RESERVE_TUNERS_FOR_RECORDING", 0),

            post_zap_delay_encrypted: Duration::from_secs(env_u64(
                "POST_ZAP_DELAY_ENCRYPTED_SEC",
                5,
            )),

            phase_deadline_start: Duration::from_secs(env_u64("PHASE_DEADLINE_START_SEC", 15)),
            phase_deadline_priming: Duration::from_secs(env_u64("PHASE_DEADLINE_PRIMING_SEC", 30)),
            phase_deadline_drain: Duration::from_secs(env_u64("PHASE_DEADLINE_DRAIN_SEC", 10)),

            stall_grace: Duration::from_secs(env_u64("STALL_GRACE_SEC", 30)),
            stall_threshold: Duration::from_secs(env_u64("STALL_THRESHOLD_SEC", 90)),

            dvr_window_sec_default: env_u32("DVR_WINDOW_SEC_DEFAULT", 10_800),
            segment_duration_sec_default: env_u32("SEGMENT_DURATION_SEC_DEFAULT", 6),
            segment_duration_sec_llhls: env_u32("SEGMENT_DURATION_SEC_LLHLS", 4),
            playlist_size_max: env_u32("PLAYLIST_SIZE_MAX", 2000),

            lease_ttl: Duration::from_secs(env_u64("LEASE_TTL_SEC", 60)),
            heartbeat_interval: Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SEC", 5)),

            media_binary_path: env_string("MEDIA_BINARY_PATH", "ffmpeg"),
            hw_accel_available: env_bool("HW_ACCEL_AVAILABLE", false),

            work_root: std::path::PathBuf::from(env_string("WORK_ROOT", "./work")),

            bind_address: env_string("API_BIND_ADDRESS", "0.0.0.0"),
            port: env_u32("API_PORT", 8080) as u16,
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
