//! `/api/v3/sessions/{id}/hls/*` — serves the live playlist and segments
//! straight off disk.
//!
//! Byte-range support and the streamed-body shape follow
//! `rust-srec/src/api/routes/stream_proxy.rs`'s
//! `axum::body::Body::from_stream` pattern, adapted from proxying an
//! upstream response to reading a local file.

use std::path::{Path as FsPath, PathBuf};

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::session::{SessionId, SessionState};

pub fn router() -> Router<AppState> {
    Router::new().route("/{*file}", get(serve_hls_file))
}

async fn serve_hls_file(
    State(state): State<AppState>,
    Path((id, file)): Path<(SessionId, String)>,
    headers: HeaderMap,
) -> Response {
    match serve(&state, id, &file, &headers).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn serve(
    state: &AppState,
    id: SessionId,
    file: &str,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let session = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("session {id} not found")))?;

    if session.state.is_terminal() {
        return Err(ApiError::gone("session has ended"));
    }
    if session.state != SessionState::Ready {
        return Err(ApiError::not_found("session is not ready to serve HLS output"));
    }

    // Reject path traversal and anything that isn't a bare filename.
    if file.contains("..") || file.contains('/') {
        return Err(ApiError::bad_request("invalid file path"));
    }

    let work_dir = session.work_dir.clone();
    if file == "index.m3u8" {
        return serve_playlist(&work_dir, session.output_spec.as_ref().map(|s| s.dvr_window_sec)).await;
    }

    let content_type = if file == "init.mp4" || file.ends_with(".m4s") {
        "video/mp4"
    } else if file.ends_with(".ts") {
        "video/mp2t"
    } else {
        return Err(ApiError::not_found("unknown HLS artifact"));
    };

    serve_segment(&work_dir.join(file), content_type, headers).await
}

/// Inject `#EXT-X-START:TIME-OFFSET=-<dvr_window_sec>` once, if DVR is
/// enabled and the playlist doesn't already carry a start tag.
async fn serve_playlist(work_dir: &FsPath, dvr_window_sec: Option<u32>) -> Result<Response, ApiError> {
    let path = work_dir.join("index.m3u8");
    let body = tokio::fs::read_to_string(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::not_found("playlist not yet available")
        } else {
            ApiError::internal(format!("failed to read playlist: {e}"))
        }
    })?;

    let body = match dvr_window_sec {
        Some(window) if window > 0 && !body.contains("#EXT-X-START") => {
            inject_start_offset(&body, window)
        }
        _ => body,
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CONTENT_ENCODING, "identity"),
        ],
        body,
    )
        .into_response())
}

fn inject_start_offset(playlist: &str, dvr_window_sec: u32) -> String {
    let tag = format!("#EXT-X-START:TIME-OFFSET=-{dvr_window_sec}\n");
    match playlist.find("#EXT-X-TARGETDURATION") {
        Some(idx) => {
            let line_end = playlist[idx..].find('\n').map(|n| idx + n + 1).unwrap_or(playlist.len());
            let mut out = String::with_capacity(playlist.len() + tag.len());
            out.push_str(&playlist[..line_end]);
            out.push_str(&tag);
            out.push_str(&playlist[line_end..]);
            out
        }
        None => format!("{tag}{playlist}"),
    }
}

/// Serve a segment/init file with `Content-Encoding: identity` and optional
/// byte-range support.
async fn serve_segment(path: &PathBuf, content_type: &'static str, headers: &HeaderMap) -> Result<Response, ApiError> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::not_found("segment not found")
        } else {
            ApiError::internal(format!("failed to open segment: {e}"))
        }
    })?;
    let metadata = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(format!("failed to stat segment: {e}")))?;
    let len = metadata.len();

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, len));

    let mut out_headers = HeaderMap::new();
    out_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    out_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
    out_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let (status, start, end) = match range {
        Some((start, end)) if start <= end && end < len => {
            out_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{len}"))
                    .unwrap_or(HeaderValue::from_static("bytes */*")),
            );
            (StatusCode::PARTIAL_CONTENT, start, end)
        }
        Some(_) => return Err(ApiError::new(StatusCode::RANGE_NOT_SATISFIABLE, "RANGE_NOT_SATISFIABLE", "invalid range")),
        None => (StatusCode::OK, 0, len.saturating_sub(1)),
    };

    let content_length = end.saturating_sub(start) + 1;
    out_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&content_length.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );

    if start > 0 {
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|e| ApiError::internal(format!("failed to seek segment: {e}")))?;
    }
    let stream = ReaderStream::new(file.take(content_length));
    let body = Body::from_stream(stream);

    let mut response = (status, body).into_response();
    *response.headers_mut() = out_headers;
    Ok(response)
}

/// Parses a single-range `bytes=start-end` header. Multi-range requests
/// aren't supported; no HLS player issues them in practice.
fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start_s, end_s) = spec.split_once('-')?;
    if start_s.is_empty() {
        let suffix_len: u64 = end_s.parse().ok()?;
        let start = len.saturating_sub(suffix_len);
        return Some((start, len.saturating_sub(1)));
    }
    let start: u64 = start_s.parse().ok()?;
    let end: u64 = if end_s.is_empty() {
        len.saturating_sub(1)
    } else {
        end_s.parse().ok()?
    };
    Some((start, end))
}
