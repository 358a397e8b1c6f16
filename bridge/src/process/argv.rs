//! Argv construction for the media process.
//!
//! Shaped after `FfmpegEngine::build_args` in
//! `rust-srec/src/downloader/engine/ffmpeg.rs`: a plain `Vec<String>`
//! assembled section by section, with the output path always last.

use std::path::Path;
use std::time::Duration;

use crate::profile::{AudioCodec, Container, OutputSpec, VideoCodec};

/// Receiver input-stage parameters. A contract, not a preference: some
/// receiver firmwares terminate the stream without a recognized
/// User-Agent, HTTP/1.0, and `Icy-MetaData: 1`.
#[derive(Debug, Clone)]
pub struct ReceiverInputConfig {
    pub user_agent: String,
    pub http_1_0: bool,
    pub icy_metadata: bool,
    pub read_timeout: Duration,
}

/// Degradation applied after a retryable classified failure:
/// ignore discontinuous timestamps and force constant frame rate instead of
/// trusting source DTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgvVariant {
    /// Normal first attempt.
    Primary,
    /// Retry after a DTS-related classified failure.
    DtsFallback,
    /// Retry after a DTS-fallback retry also failed: force software H.264.
    TranscodeFallback,
}

/// Build the full argv (program name excluded) for one media-process run.
///
/// `stream_url` must be passed through verbatim — it carries the receiver's
/// port, which encodes descrambling state.
pub fn build_argv(
    stream_url: &str,
    output_spec: &OutputSpec,
    work_dir: &Path,
    variant: ArgvVariant,
    input: &ReceiverInputConfig,
) -> Vec<String> {
    let mut args = Vec::new();

    args.extend(["-y".to_string(), "-hide_banner".to_string()]);
    args.extend(["-loglevel".to_string(), "warning".to_string()]);

    if matches!(variant, ArgvVariant::DtsFallback | ArgvVariant::TranscodeFallback) {
        args.extend(["-fflags".to_string(), "+genpts+igndts".to_string()]);
    } else {
        args.extend(["-fflags".to_string(), "+genpts".to_string()]);
    }
    args.extend([
        "-avoid_negative_ts".to_string(),
        "make_zero".to_string(),
    ]);

    // Input stage: the media process opens the actual stream URL, so the
    // receiver's contract (UA, HTTP/1.0, Icy-MetaData) has to travel with it.
    args.push("-re".to_string());
    args.extend(["-f".to_string(), "mpegts".to_string()]);
    args.extend(["-user_agent".to_string(), input.user_agent.clone()]);
    if input.http_1_0 {
        args.extend(["-http_version".to_string(), "1.0".to_string()]);
    }
    if input.icy_metadata {
        args.extend(["-headers".to_string(), "Icy-MetaData: 1\r\n".to_string()]);
    }
    args.extend([
        "-rw_timeout".to_string(),
        input.read_timeout.as_micros().to_string(),
    ]);

    args.extend(["-i".to_string(), stream_url.to_string()]);

    // Video.
    let force_software_h264 = matches!(variant, ArgvVariant::TranscodeFallback);
    let video_codec = if force_software_h264 {
        VideoCodec::H264
    } else {
        output_spec.video_codec
    };
    match video_codec {
        VideoCodec::Copy => {
            args.extend(["-c:v".to_string(), "copy".to_string()]);
        }
        VideoCodec::H264 => {
            args.extend(["-c:v".to_string()]);
            if output_spec.hw_accel && !force_software_h264 {
                args.push("h264_vaapi".to_string());
            } else {
                args.push("libx264".to_string());
                args.extend([
                    "-preset".to_string(),
                    "veryfast".to_string(),
                    "-pix_fmt".to_string(),
                    "yuv420p".to_string(),
                ]);
            }
        }
        VideoCodec::Hevc => {
            args.extend(["-c:v".to_string()]);
            args.push(if output_spec.hw_accel {
                "hevc_vaapi".to_string()
            } else {
                "libx265".to_string()
            });
        }
    }
    if force_software_h264 {
        args.extend(["-vsync".to_string(), "cfr".to_string()]);
    }

    // Audio: always downmixed to stereo AAC unless passed through verbatim
    // — multichannel sources must not reach Safari/HLS.js clients as-is.
    match output_spec.audio_codec {
        AudioCodec::Copy => {
            args.extend(["-c:a".to_string(), "copy".to_string()]);
        }
        AudioCodec::Aac => {
            args.extend([
                "-c:a".to_string(),
                "aac".to_string(),
                "-ac".to_string(),
                "2".to_string(),
                "-ar".to_string(),
                "48000".to_string(),
            ]);
        }
    }

    args.extend(["-progress".to_string(), "pipe:2".to_string()]);

    if output_spec.vod {
        args.extend(build_vod_args(output_spec, work_dir));
    } else {
        args.extend(build_live_hls_args(output_spec, work_dir));
    }

    args
}

fn build_live_hls_args(output_spec: &OutputSpec, work_dir: &Path) -> Vec<String> {
    let mut args = Vec::new();
    args.extend(["-f".to_string(), "hls".to_string()]);
    args.extend([
        "-hls_time".to_string(),
        output_spec.segment_duration_sec.to_string(),
    ]);
    args.extend([
        "-hls_list_size".to_string(),
        output_spec.playlist_size.to_string(),
    ]);
    args.extend(["-hls_playlist_type".to_string(), "event".to_string()]);

    let mut flags = vec![
        "independent_segments",
        "program_date_time",
        "append_list",
        "delete_segments",
        "omit_endlist",
        "temp_file",
    ];
    if output_spec.llhls {
        flags.push("split_by_time");
    }
    args.extend(["-hls_flags".to_string(), flags.join("+")]);

    match output_spec.container {
        Container::Fmp4 => {
            args.extend(["-hls_segment_type".to_string(), "fmp4".to_string()]);
            args.extend([
                "-hls_fmp4_init_filename".to_string(),
                "init.mp4".to_string(),
            ]);
            args.extend([
                "-hls_segment_filename".to_string(),
                work_dir.join("seg_%09d.m4s").to_string_lossy().into_owned(),
            ]);
        }
        Container::Ts => {
            args.extend([
                "-hls_segment_filename".to_string(),
                work_dir.join("seg_%09d.ts").to_string_lossy().into_owned(),
            ]);
        }
    }

    args.push(work_dir.join("index.m3u8").to_string_lossy().into_owned());
    args
}

fn build_vod_args(output_spec: &OutputSpec, work_dir: &Path) -> Vec<String> {
    let mut args = Vec::new();
    match output_spec.container {
        Container::Fmp4 => {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
            args.push(work_dir.join("output.mp4").to_string_lossy().into_owned());
        }
        Container::Ts => {
            args.push(work_dir.join("output.ts").to_string_lossy().into_owned());
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{HardwareProbe, HwAccelMode};

    fn spec(vod: bool) -> OutputSpec {
        let mut spec = crate::profile::resolve(
            if vod { "vod" } else { "safari" },
            None,
            HardwareProbe { has_gpu: false },
            HwAccelMode::Auto,
            2000,
        )
        .unwrap();
        if vod {
            spec.vod = true;
        }
        spec
    }

    fn input() -> ReceiverInputConfig {
        ReceiverInputConfig {
            user_agent: "VLC/3.0.18 LibVLC/3.0.18".to_string(),
            http_1_0: true,
            icy_metadata: true,
            read_timeout: Duration::from_secs(8),
        }
    }

    #[test]
    fn live_argv_never_carries_copyts() {
        let args = build_argv(
            "http://192.168.1.50:8001/1:0:1:1:1:1:0:0:0:0:",
            &spec(false),
            Path::new("/tmp/work"),
            ArgvVariant::Primary,
            &input(),
        );
        assert!(!args.iter().any(|a| a == "-copyts"));
        assert!(!args.iter().any(|a| a == "-copytb"));
    }

    #[test]
    fn live_argv_has_hls_muxer_flags() {
        let args = build_argv(
            "http://host:1/x",
            &spec(false),
            Path::new("/tmp/work"),
            ArgvVariant::Primary,
            &input(),
        );
        let flags_idx = args.iter().position(|a| a == "-hls_flags").unwrap();
        let flags = &args[flags_idx + 1];
        for expected in [
            "independent_segments",
            "program_date_time",
            "append_list",
            "delete_segments",
            "omit_endlist",
            "temp_file",
        ] {
            assert!(flags.contains(expected), "missing {expected} in {flags}");
        }
        assert!(args.iter().any(|a| a == "event"));
    }

    #[test]
    fn live_argv_downmixes_audio_to_stereo_48k() {
        let args = build_argv(
            "http://host:1/x",
            &spec(false),
            Path::new("/tmp/work"),
            ArgvVariant::Primary,
            &input(),
        );
        let ac_idx = args.iter().position(|a| a == "-ac").unwrap();
        assert_eq!(args[ac_idx + 1], "2");
        let ar_idx = args.iter().position(|a| a == "-ar").unwrap();
        assert_eq!(args[ar_idx + 1], "48000");
    }

    #[test]
    fn dts_fallback_adds_igndts() {
        let args = build_argv(
            "http://host:1/x",
            &spec(false),
            Path::new("/tmp/work"),
            ArgvVariant::DtsFallback,
            &input(),
        );
        let fflags_idx = args.iter().position(|a| a == "-fflags").unwrap();
        assert!(args[fflags_idx + 1].contains("igndts"));
    }

    #[test]
    fn transcode_fallback_forces_software_h264_and_cfr() {
        let args = build_argv(
            "http://host:1/x",
            &spec(false),
            Path::new("/tmp/work"),
            ArgvVariant::TranscodeFallback,
            &input(),
        );
        assert!(args.iter().any(|a| a == "libx264"));
        assert!(args.iter().any(|a| a == "-vsync"));
    }

    #[test]
    fn vod_argv_targets_a_single_output_file_not_hls() {
        let args = build_argv(
            "http://host:1/x",
            &spec(true),
            Path::new("/tmp/work"),
            ArgvVariant::Primary,
            &input(),
        );
        assert!(!args.iter().any(|a| a == "-hls_time"));
        assert!(args.last().unwrap().ends_with("output.mp4"));
    }

    #[test]
    fn input_stage_carries_the_receiver_contract_before_dash_i() {
        let args = build_argv(
            "http://host:1/x",
            &spec(false),
            Path::new("/tmp/work"),
            ArgvVariant::Primary,
            &input(),
        );
        let i_idx = args.iter().position(|a| a == "-i").unwrap();
        assert!(args[..i_idx].iter().any(|a| a == "-re"));
        let ua_idx = args.iter().position(|a| a == "-user_agent").unwrap();
        assert!(ua_idx < i_idx);
        assert_eq!(args[ua_idx + 1], "VLC/3.0.18 LibVLC/3.0.18");
        assert!(args[..i_idx].iter().any(|a| a == "-http_version"));
        assert!(args[..i_idx].iter().any(|a| a.contains("Icy-MetaData")));
        assert!(args[..i_idx].iter().any(|a| a == "-rw_timeout"));
    }

    #[test]
    fn input_stage_omits_http_1_0_and_icy_metadata_when_disabled() {
        let disabled = ReceiverInputConfig {
            http_1_0: false,
            icy_metadata: false,
            ..input()
        };
        let args = build_argv(
            "http://host:1/x",
            &spec(false),
            Path::new("/tmp/work"),
            ArgvVariant::Primary,
            &disabled,
        );
        assert!(!args.iter().any(|a| a == "-http_version"));
        assert!(!args.iter().any(|a| a.contains("Icy-MetaData")));
    }
}
