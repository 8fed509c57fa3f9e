use std::time::Duration;

use serde::Deserialize;

/// Interval between background sweep passes over the scratch directory.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Age past which an orphaned scratch entry is removed by the sweeper (1 hour).
pub const RETENTION_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Filename prefix the engine uses for partial/segmented files it drops
/// directly into the scratch root. Anything starting with this is fair game
/// for the sweeper regardless of age.
pub const FRAGMENT_MARKER: &str = "frag-";

/// Upper bound for a metadata probe against the engine.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum stderr bytes carried into an engine error message.
pub const STDERR_SNIPPET_MAX: usize = 500;

/// Top-level configuration for the proxy service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Directory used for in-flight download artifacts.
    pub scratch_dir: String,
    /// Path or name of the extraction engine binary.
    pub engine_bin: String,
    /// Hard deadline for a single engine download invocation, in seconds.
    /// Zero disables the deadline.
    pub download_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            scratch_dir: std::env::temp_dir()
                .join("fetchproxy")
                .to_string_lossy()
                .into_owned(),
            engine_bin: "yt-dlp".to_string(),
            download_timeout_secs: 30 * 60,
        }
    }
}

impl ServiceConfig {
    /// Build a config from defaults plus `FETCHPROXY_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("FETCHPROXY_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Ok(v) = std::env::var("FETCHPROXY_SCRATCH_DIR") {
            config.scratch_dir = v;
        }
        if let Ok(v) = std::env::var("FETCHPROXY_ENGINE_BIN") {
            config.engine_bin = v;
        }
        if let Ok(v) = std::env::var("FETCHPROXY_DOWNLOAD_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                config.download_timeout_secs = secs;
            }
        }
        config
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        if self.download_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.download_timeout_secs))
        }
    }
}
