//! C5: StreamProfileResolver — pure mapping from a named profile plus
//! client/hardware hints to a concrete `OutputSpec`.

use serde::{Deserialize, Serialize};

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Fmp4,
    Ts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    Copy,
    H264,
    Hevc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    Copy,
    Aac,
}

/// Requested hardware-acceleration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HwAccelMode {
    #[default]
    Auto,
    Force,
    Off,
}

/// Materialized output contract for a session. Immutable after STARTING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub container: Container,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub segment_duration_sec: u32,
    /// 0 = live-only, no DVR.
    pub dvr_window_sec: u32,
    /// 0 = unlimited (VOD).
    pub playlist_size: u32,
    pub llhls: bool,
    pub vod: bool,
    pub hw_accel: bool,
}

impl OutputSpec {
    /// `playlist_size = vod ? 0 : clamp(dvr_window_sec / segment_duration_sec, 3, playlist_size_max)`
    pub fn derive_playlist_size(
        vod: bool,
        dvr_window_sec: u32,
        segment_duration_sec: u32,
        playlist_size_max: u32,
    ) -> u32 {
        if vod || dvr_window_sec == 0 {
            return 0;
        }
        let raw = dvr_window_sec / segment_duration_sec.max(1);
        raw.clamp(3, playlist_size_max)
    }
}

/// A single row of the profile decision table.
struct ProfileRule {
    id: &'static str,
    container: Container,
    video_codec: VideoCodec,
    dvr_window_sec: u32,
    llhls: bool,
    requires_hw: bool,
}

const PROFILES: &[ProfileRule] = &[
    ProfileRule {
        id: "safari",
        container: Container::Fmp4,
        video_codec: VideoCodec::H264,
        dvr_window_sec: 10_800,
        llhls: false,
        requires_hw: false,
    },
    ProfileRule {
        id: "safari_hevc_hw",
        container: Container::Fmp4,
        video_codec: VideoCodec::Hevc,
        dvr_window_sec: 10_800,
        llhls: false,
        requires_hw: true,
    },
    ProfileRule {
        id: "low",
        container: Container::Ts,
        video_codec: VideoCodec::H264,
        dvr_window_sec: 0,
        llhls: false,
        requires_hw: false,
    },
    ProfileRule {
        id: "high",
        container: Container::Fmp4,
        video_codec: VideoCodec::Copy,
        dvr_window_sec: 10_800,
        llhls: false,
        requires_hw: false,
    },
    ProfileRule {
        id: "llhls",
        container: Container::Fmp4,
        video_codec: VideoCodec::Copy,
        dvr_window_sec: 10_800,
        llhls: true,
        requires_hw: false,
    },
    ProfileRule {
        id: "vod",
        container: Container::Fmp4,
        video_codec: VideoCodec::Copy,
        dvr_window_sec: 0,
        llhls: false,
        requires_hw: false,
    },
];

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown profile: {0}")]
    UnknownProfile(String),
    #[error("profile {0} requires hardware acceleration but none is available")]
    HardwareUnavailable(String),
}

/// A minimal hardware-probe result consumed by the resolver.
#[derive(Debug, Clone, Copy)]
pub struct HardwareProbe {
    pub has_gpu: bool,
}

/// Resolve a named profile plus hints into a concrete `OutputSpec`.
/// Pure function: no I/O, no side effects.
pub fn resolve(
    profile_id: &str,
    dvr_window_sec_override: Option<u32>,
    hardware_probe: HardwareProbe,
    hw_accel_mode: HwAccelMode,
    playlist_size_max: u32,
) -> Result<OutputSpec, ResolveError> {
    let rule = PROFILES
        .iter()
        .find(|r| r.id == profile_id)
        .ok_or_else(|| ResolveError::UnknownProfile(profile_id.to_string()))?;

    let hw_accel = match hw_accel_mode {
        HwAccelMode::Off => false,
        HwAccelMode::Force => true,
        HwAccelMode::Auto => hardware_probe.has_gpu,
    };

    if rule.requires_hw && !hw_accel {
        return Err(ResolveError::HardwareUnavailable(profile_id.to_string()));
    }

    let vod = rule.id == "vod";
    let segment_duration_sec = if rule.llhls { 4 } else { 6 };
    let dvr_window_sec = dvr_window_sec_override.unwrap_or(rule.dvr_window_sec);
    let playlist_size = OutputSpec::derive_playlist_size(
        vod,
        dvr_window_sec,
        segment_duration_sec,
        playlist_size_max,
    );

    Ok(OutputSpec {
        container: rule.container,
        video_codec: rule.video_codec,
        audio_codec: AudioCodec::Aac,
        segment_duration_sec,
        dvr_window_sec,
        playlist_size,
        llhls: rule.llhls,
        vod,
        hw_accel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safari_profile_matches_decision_table() {
        let spec = resolve(
            "safari",
            None,
            HardwareProbe { has_gpu: false },
            HwAccelMode::Auto,
            2000,
        )
        .unwrap();
        assert_eq!(spec.container, Container::Fmp4);
        assert_eq!(spec.dvr_window_sec, 10_800);
        assert!(!spec.llhls);
        assert_eq!(spec.segment_duration_sec, 6);
    }

    #[test]
    fn llhls_profile_uses_4s_segments() {
        let spec = resolve(
            "llhls",
            None,
            HardwareProbe { has_gpu: false },
            HwAccelMode::Auto,
            2000,
        )
        .unwrap();
        assert!(spec.llhls);
        assert_eq!(spec.segment_duration_sec, 4);
    }

    #[test]
    fn hw_force_without_gpu_fails() {
        let result = resolve(
            "safari_hevc_hw",
            None,
            HardwareProbe { has_gpu: false },
            HwAccelMode::Force,
            2000,
        );
        assert!(matches!(result, Err(ResolveError::HardwareUnavailable(_))));
    }

    #[test]
    fn hw_auto_follows_probe() {
        let spec = resolve(
            "high",
            None,
            HardwareProbe { has_gpu: true },
            HwAccelMode::Auto,
            2000,
        )
        .unwrap();
        assert!(spec.hw_accel);

        let spec_off = resolve(
            "high",
            None,
            HardwareProbe { has_gpu: true },
            HwAccelMode::Off,
            2000,
        )
        .unwrap();
        assert!(!spec_off.hw_accel);
    }

    #[test]
    fn unknown_profile_errors() {
        assert!(matches!(
            resolve("nonexistent", None, HardwareProbe { has_gpu: false }, HwAccelMode::Auto, 2000),
            Err(ResolveError::UnknownProfile(_))
        ));
    }

    #[test]
    fn playlist_size_formula_clamps_correctly() {
        // playlist_size = clamp(dvr_window_sec/segment_duration_sec, 3, 2000)
        // 10800/6 = 1800
        assert_eq!(
            OutputSpec::derive_playlist_size(false, 10_800, 6, 2000),
            1800
        );
    }

    #[test]
    fn playlist_size_clamps_to_minimum_three() {
        assert_eq!(OutputSpec::derive_playlist_size(false, 10, 6, 2000), 3);
    }

    #[test]
    fn playlist_size_clamps_to_maximum() {
        assert_eq!(
            OutputSpec::derive_playlist_size(false, 1_000_000, 1, 2000),
            2000
        );
    }

    #[test]
    fn vod_profile_has_no_bounded_playlist() {
        let spec = resolve(
            "vod",
            None,
            HardwareProbe { has_gpu: false },
            HwAccelMode::Auto,
            2000,
        )
        .unwrap();
        assert!(spec.vod);
        assert_eq!(spec.playlist_size, 0);
    }
}
