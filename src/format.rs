// Format resolution — maps user-facing format names to engine selectors.

/// What the client asked for via the `format` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedFormat {
    Mp3,
    Mp4,
    /// Anything else. Treated like mp4; kept around for logging.
    Other(String),
}

impl RequestedFormat {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("mp3") => Self::Mp3,
            Some("mp4") | None => Self::Mp4,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

/// Engine-facing view of a format request. Derived once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFormat {
    /// Preference order over stream variants, in engine syntax.
    pub selector: &'static str,
    /// Containers the engine may legitimately produce for this request.
    pub accepted_exts: &'static [&'static str],
    /// Extension advertised to the client. For mp3 this is a repackaging
    /// label: the bytes may stay in their native audio container.
    pub declared_ext: &'static str,
    pub mime_type: &'static str,
}

const AUDIO_SELECTOR: &str =
    "bestaudio[ext=m4a]/bestaudio[ext=opus]/bestaudio[ext=webm]/bestaudio";
const AUDIO_EXTS: &[&str] = &["m4a", "opus", "webm", "mp3"];

const VIDEO_SELECTOR: &str = "best[ext=mp4]/best";
// The selector's `best` fallback can hand back a non-mp4 container, which is
// still a successful run; the declared extension stays mp4 either way.
const VIDEO_EXTS: &[&str] = &["mp4", "webm", "mkv"];

/// Pure mapping: no I/O, no side effects.
pub fn resolve(requested: &RequestedFormat) -> ResolvedFormat {
    match requested {
        RequestedFormat::Mp3 => ResolvedFormat {
            selector: AUDIO_SELECTOR,
            accepted_exts: AUDIO_EXTS,
            declared_ext: "mp3",
            mime_type: "audio/mpeg",
        },
        RequestedFormat::Mp4 | RequestedFormat::Other(_) => ResolvedFormat {
            selector: VIDEO_SELECTOR,
            accepted_exts: VIDEO_EXTS,
            declared_ext: "mp4",
            mime_type: "video/mp4",
        },
    }
}
