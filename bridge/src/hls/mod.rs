//! C4: HLSPackager — everything about a session's on-disk HLS output that
//! isn't the media process itself: work-directory lifecycle, the readiness
//! predicate, the segment-count health check, and atomic metadata snapshots.
//!
//! The write-then-rename publish discipline is the same one
//! `rust-srec`'s database layer relies on indirectly through sqlx
//! transactions; here, with no database, `tempfile::NamedTempFile::persist`
//! plays that role directly for the one piece of state kept on disk.

use std::path::{Path, PathBuf};

use m3u8_rs::Playlist;

use crate::error::{Error, Result};
use crate::profile::OutputSpec;

pub struct HlsPackager;

impl HlsPackager {
    /// Create the session's work directory. Idempotent.
    pub async fn ensure_work_dir(work_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(work_dir).await?;
        Ok(())
    }

    fn playlist_path(work_dir: &Path) -> PathBuf {
        work_dir.join("index.m3u8")
    }

    /// Ready once the playlist exists, parses, and references at least one
    /// segment that actually exists on disk.
    pub async fn is_ready(work_dir: &Path) -> Result<bool> {
        let playlist_path = Self::playlist_path(work_dir);
        let bytes = match tokio::fs::read(&playlist_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::Io(e)),
        };

        let media_playlist = match m3u8_rs::parse_playlist_res(&bytes) {
            Ok(Playlist::MediaPlaylist(pl)) => pl,
            Ok(Playlist::MasterPlaylist(_)) => {
                return Err(Error::Playlist(
                    "expected a media playlist, got a master playlist".into(),
                ));
            }
            Err(e) => return Err(Error::Playlist(format!("{e:?}"))),
        };

        if media_playlist.segments.is_empty() {
            return Ok(false);
        }

        for segment in &media_playlist.segments {
            if tokio::fs::try_exists(work_dir.join(&segment.uri))
                .await
                .unwrap_or(false)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// A playlist that has drifted well past its configured window
    /// (`playlist_size + 10` segments present on disk) signals the muxer
    /// isn't pruning old segments; the session is marked degraded rather
    /// than torn down.
    pub async fn health_check(work_dir: &Path, output_spec: &OutputSpec) -> Result<HealthStatus> {
        if output_spec.vod || output_spec.playlist_size == 0 {
            return Ok(HealthStatus::Healthy);
        }

        let mut read_dir = tokio::fs::read_dir(work_dir).await?;
        let mut segment_count = 0u32;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("seg_") {
                segment_count += 1;
            }
        }

        let safety_margin = output_spec.playlist_size + 10;
        if segment_count > safety_margin {
            Ok(HealthStatus::Degraded { segment_count, safety_margin })
        } else {
            Ok(HealthStatus::Healthy)
        }
    }

    /// Atomically write `meta.json` for a session's work directory: write to
    /// a temp file in the same directory, then rename over the destination.
    pub fn persist_meta_sync(work_dir: &Path, json: &str) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(work_dir)?;
        use std::io::Write;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(work_dir.join("meta.json"))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded { segment_count: u32, safety_margin: u32 },
}
