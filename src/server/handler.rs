// Axum request handlers — translate API requests into engine and download operations.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use url::Url;

use crate::download;
use crate::engine::{MediaEngine, MediaMetadata};
use crate::error::ServiceError;
use crate::format::{resolve, RequestedFormat};
use crate::workspace::ScratchWorkspace;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn MediaEngine>,
    pub workspace: Arc<ScratchWorkspace>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/video-info", get(video_info_handler))
        .route("/api/formats", get(formats_handler))
        .route("/api/download", get(download_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct InfoParams {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    url: Option<String>,
    format: Option<String>,
}

/// URL-shape validation. Runs before anything touches the engine or disk.
fn validate_url(raw: Option<&str>) -> Result<String, ServiceError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::InvalidInput("missing url parameter".into()))?;

    let parsed = Url::parse(raw)
        .map_err(|_| ServiceError::InvalidInput(format!("malformed url: {}", raw)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ServiceError::InvalidInput(
            "url scheme must be http or https".into(),
        ));
    }
    if parsed.host_str().is_none() {
        return Err(ServiceError::InvalidInput("url has no host".into()));
    }
    Ok(raw.to_string())
}

/// Strip everything outside `[A-Za-z0-9_\s-]`, then collapse whitespace runs
/// to single underscores.
fn sanitize_filename(title: &str) -> String {
    let filtered: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let joined = filtered.split_whitespace().collect::<Vec<_>>().join("_");
    if joined.is_empty() {
        "download".to_string()
    } else {
        joined
    }
}

fn formats_json(metadata: &MediaMetadata) -> Vec<Value> {
    metadata
        .formats
        .iter()
        .map(|f| {
            json!({
                "format_id": f.format_id,
                "ext": f.ext,
                "resolution": f.resolution(),
                "filesize": f.filesize,
                "vcodec": f.vcodec,
                "acodec": f.acodec,
                "hasVideo": f.has_video(),
                "hasAudio": f.has_audio(),
            })
        })
        .collect()
}

/// GET /api/health
async fn health_handler() -> Response {
    Json(json!({
        "status": "OK",
        "message": "service is running",
    }))
    .into_response()
}

/// GET /api/video-info?url=
async fn video_info_handler(
    State(state): State<AppState>,
    Query(params): Query<InfoParams>,
) -> Result<Response, ServiceError> {
    let url = validate_url(params.url.as_deref())?;
    let metadata = state.engine.probe(&url).await?;

    Ok(Json(json!({
        "title": metadata.title,
        "thumbnail": metadata.thumbnail,
        "duration": metadata.duration_secs(),
        "author": metadata.author(),
        "formats": formats_json(&metadata),
    }))
    .into_response())
}

/// GET /api/formats?url=
async fn formats_handler(
    State(state): State<AppState>,
    Query(params): Query<InfoParams>,
) -> Result<Response, ServiceError> {
    let url = validate_url(params.url.as_deref())?;
    let metadata = state.engine.probe(&url).await?;
    Ok(Json(formats_json(&metadata)).into_response())
}

/// GET /api/download?url=&format=
///
/// Probes for the title, materializes the chosen variant, then streams it
/// out as an attachment. Once headers are sent any failure can only tear
/// the stream down; the body's cleanup guard removes the artifact on every
/// exit path, including client disconnect.
async fn download_handler(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ServiceError> {
    let url = validate_url(params.url.as_deref())?;
    let requested = RequestedFormat::parse(params.format.as_deref());
    let resolved = resolve(&requested);

    let metadata = state.engine.probe(&url).await?;
    let stream = download::run(state.engine.as_ref(), &state.workspace, &url, &resolved).await?;

    let filename = format!(
        "{}.{}",
        sanitize_filename(&metadata.title),
        resolved.declared_ext
    );
    info!(
        "download {} format={:?} as {} ({} bytes)",
        url,
        requested,
        filename,
        stream.len()
    );

    let mut resp_headers = HeaderMap::new();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(resolved.mime_type),
    );
    resp_headers.insert(
        header::CONTENT_LENGTH,
        stream.len().to_string().parse().unwrap(),
    );
    // The filename only contains sanitized ASCII, so this always parses.
    resp_headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}\"", filename)
            .parse()
            .unwrap(),
    );

    Ok((StatusCode::OK, resp_headers, Body::from_stream(stream)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_accepts_http_and_https() {
        assert!(validate_url(Some("https://example.com/watch?v=x")).is_ok());
        assert!(validate_url(Some("http://example.com/")).is_ok());
    }

    #[test]
    fn test_validate_url_rejects_bad_input() {
        assert!(validate_url(None).is_err());
        assert!(validate_url(Some("")).is_err());
        assert!(validate_url(Some("   ")).is_err());
        assert!(validate_url(Some("not-a-url")).is_err());
        assert!(validate_url(Some("ftp://example.com/file")).is_err());
        assert!(validate_url(Some("file:///etc/passwd")).is_err());
    }

    #[test]
    fn test_sanitize_filename_strips_and_collapses() {
        assert_eq!(sanitize_filename("My Video"), "My_Video");
        assert_eq!(
            sanitize_filename("Cool: Video! (official)  HD"),
            "Cool_Video_official_HD"
        );
        assert_eq!(sanitize_filename("tabs\tand\n newlines"), "tabs_and_newlines");
        assert_eq!(sanitize_filename("already_fine-name"), "already_fine-name");
    }

    #[test]
    fn test_sanitize_filename_empty_falls_back() {
        assert_eq!(sanitize_filename(""), "download");
        assert_eq!(sanitize_filename("!!!???"), "download");
    }
}
