//! Parsed receiver document models.
//!
//! The receiver's own web API returns small, loosely-structured text
//! documents (an m3u-ish playlist for stream resolution, pipe-delimited
//! lines for bouquets/services). Parsing is hand-rolled the way
//! `rust-srec/src/downloader/engine/utils/ffmpeg_parser.rs` hand-rolls
//! FFmpeg's key=value progress format rather than pulling in a grammar for
//! something this small.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZapResult {
    pub stream_url: String,
    pub encrypted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bouquet {
    pub service_ref: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub service_ref: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgEvent {
    pub service_ref: String,
    pub title: String,
    pub begin_unixtime: i64,
    pub duration_sec: u32,
}

/// Parse the receiver's `stream.m3u` document. The stream URL is whatever
/// non-comment line follows the header; its port encodes the descrambling
/// state, so the caller must never assume a fixed port.
/// `encrypted=true` is inferred from an `encrypted=` info tag some receiver
/// firmwares add, or from a URL query hint; absence of either means
/// free-to-air.
pub fn parse_stream_m3u(body: &str, service_ref: &str) -> Result<ZapResult> {
    let mut encrypted = false;
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("#EXTINF") {
            if line.to_ascii_lowercase().contains("encrypted=1")
                || line.to_ascii_lowercase().contains("scrambled=1")
            {
                encrypted = true;
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        // First non-comment, non-empty line is the stream URL.
        return Ok(ZapResult {
            stream_url: line.to_string(),
            encrypted,
        });
    }
    Err(Error::TuneFailed(format!(
        "receiver returned no stream URL for {service_ref}"
    )))
}

/// Parse a pipe-delimited bouquet listing: `serviceref|name` per line.
pub fn parse_bouquets(body: &str) -> Result<Vec<Bouquet>> {
    let mut out = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((service_ref, name)) = line.split_once('|') {
            out.push(Bouquet {
                service_ref: service_ref.to_string(),
                name: name.to_string(),
            });
        }
    }
    Ok(out)
}

/// Parse a pipe-delimited service listing: `serviceref|name` per line.
pub fn parse_services(body: &str) -> Result<Vec<Service>> {
    let mut out = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((service_ref, name)) = line.split_once('|') {
            out.push(Service {
                service_ref: service_ref.to_string(),
                name: name.to_string(),
            });
        }
    }
    Ok(out)
}

/// Parse a pipe-delimited EPG listing:
/// `serviceref|title|begin_unixtime|duration_sec` per line.
pub fn parse_epg(body: &str) -> Result<Vec<EpgEvent>> {
    let mut out = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 4 {
            continue;
        }
        let (Ok(begin_unixtime), Ok(duration_sec)) =
            (fields[2].parse::<i64>(), fields[3].parse::<u32>())
        else {
            continue;
        };
        out.push(EpgEvent {
            service_ref: fields[0].to_string(),
            title: fields[1].to_string(),
            begin_unixtime,
            duration_sec,
        });
    }
    Ok(out)
}
