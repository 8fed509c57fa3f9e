// Extraction engine boundary — metadata model and the trait the rest of the
// service programs against.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ServiceError;

pub mod ytdlp;

/// Metadata the engine reports for a source URL.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MediaMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Seconds. The engine may report fractions; the API rounds down.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

impl MediaMetadata {
    /// Uploader name with channel as fallback.
    pub fn author(&self) -> &str {
        self.uploader
            .as_deref()
            .or(self.channel.as_deref())
            .unwrap_or("unknown")
    }

    /// Duration clamped to a non-negative whole number of seconds.
    pub fn duration_secs(&self) -> u64 {
        self.duration.unwrap_or(0.0).max(0.0) as u64
    }
}

/// One stream variant as described by the engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FormatInfo {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
}

impl FormatInfo {
    pub fn has_video(&self) -> bool {
        matches!(self.vcodec.as_deref(), Some(codec) if codec != "none")
    }

    pub fn has_audio(&self) -> bool {
        matches!(self.acodec.as_deref(), Some(codec) if codec != "none")
    }

    /// `"<height>p"` when the engine reports a height, `"unknown"` otherwise.
    pub fn resolution(&self) -> String {
        match self.height {
            Some(h) => format!("{}p", h),
            None => "unknown".to_string(),
        }
    }
}

/// Progress update emitted while the engine materializes an artifact.
/// Observability only; never used for flow control.
#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    pub percent: f32,
}

/// The external extraction/download tool, invoked as a black box.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Fetch metadata for a source URL.
    async fn probe(&self, url: &str) -> Result<MediaMetadata, ServiceError>;

    /// Materialize the selected variant at (or near) `output`. The engine
    /// may substitute its own container extension; callers discover the real
    /// file afterwards. Blocks until the artifact is complete on disk.
    async fn download(
        &self,
        url: &str,
        selector: &str,
        output: &Path,
        progress: mpsc::UnboundedSender<DownloadProgress>,
    ) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_author_fallback() {
        let mut meta = MediaMetadata {
            uploader: Some("uploader".into()),
            channel: Some("channel".into()),
            ..Default::default()
        };
        assert_eq!(meta.author(), "uploader");

        meta.uploader = None;
        assert_eq!(meta.author(), "channel");

        meta.channel = None;
        assert_eq!(meta.author(), "unknown");
    }

    #[test]
    fn test_duration_rounds_down_and_clamps() {
        let mut meta = MediaMetadata {
            duration: Some(212.8),
            ..Default::default()
        };
        assert_eq!(meta.duration_secs(), 212);

        meta.duration = Some(-3.0);
        assert_eq!(meta.duration_secs(), 0);

        meta.duration = None;
        assert_eq!(meta.duration_secs(), 0);
    }

    #[test]
    fn test_format_codec_flags() {
        let format = FormatInfo {
            vcodec: Some("avc1.64001F".into()),
            acodec: Some("none".into()),
            height: Some(720),
            ..Default::default()
        };
        assert!(format.has_video());
        assert!(!format.has_audio());
        assert_eq!(format.resolution(), "720p");

        let audio_only = FormatInfo {
            vcodec: Some("none".into()),
            acodec: Some("opus".into()),
            ..Default::default()
        };
        assert!(!audio_only.has_video());
        assert!(audio_only.has_audio());
        assert_eq!(audio_only.resolution(), "unknown");
    }

    #[test]
    fn test_metadata_parses_engine_json() {
        let raw = serde_json::json!({
            "title": "A Video",
            "thumbnail": "https://example.com/t.jpg",
            "duration": 95.3,
            "uploader": "someone",
            "formats": [
                {"format_id": "22", "ext": "mp4", "height": 720,
                 "filesize": 1048576, "vcodec": "avc1", "acodec": "mp4a"},
                {"format_id": "251", "ext": "webm",
                 "vcodec": "none", "acodec": "opus"}
            ],
            "extractor": "ignored-extra-field"
        });
        let meta: MediaMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.title, "A Video");
        assert_eq!(meta.duration_secs(), 95);
        assert_eq!(meta.formats.len(), 2);
        assert!(meta.formats[0].has_video());
        assert!(!meta.formats[1].has_video());
    }
}
