// yt-dlp engine — spawns the binary, parses its JSON metadata and progress lines.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{DownloadProgress, MediaEngine, MediaMetadata};
use crate::config::{METADATA_TIMEOUT, STDERR_SNIPPET_MAX};
use crate::error::ServiceError;

pub struct YtDlpEngine {
    bin: String,
    download_timeout: Option<Duration>,
}

impl YtDlpEngine {
    pub fn new(bin: impl Into<String>, download_timeout: Option<Duration>) -> Self {
        Self {
            bin: bin.into(),
            download_timeout,
        }
    }

    /// Startup check: ask the binary for its version.
    pub async fn check_available(&self) -> Result<String, ServiceError> {
        let output = tokio::time::timeout(
            Duration::from_secs(10),
            Command::new(&self.bin)
                .arg("--version")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ServiceError::Timeout(Duration::from_secs(10)))?
        .map_err(|e| classify_spawn_error(&self.bin, e))?;

        if !output.status.success() {
            return Err(ServiceError::EngineUnavailable(format!(
                "{} --version exited with {}",
                self.bin, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    async fn probe(&self, url: &str) -> Result<MediaMetadata, ServiceError> {
        debug!("probing metadata for {}", url);

        let output = tokio::time::timeout(
            METADATA_TIMEOUT,
            Command::new(&self.bin)
                .args(["-j", "--no-playlist", "--no-warnings", url])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ServiceError::Timeout(METADATA_TIMEOUT))?
        .map_err(|e| classify_spawn_error(&self.bin, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServiceError::EngineFailed(failure_message(
                &stderr,
                output.status.code(),
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ServiceError::EngineFailed(format!("malformed metadata from engine: {}", e))
        })
    }

    async fn download(
        &self,
        url: &str,
        selector: &str,
        output: &Path,
        progress: mpsc::UnboundedSender<DownloadProgress>,
    ) -> Result<(), ServiceError> {
        // Let the engine substitute its chosen container extension.
        let template = output.with_extension("%(ext)s");
        let template = template.to_string_lossy();

        debug!("engine download selector={} output={}", selector, template);

        let mut child = Command::new(&self.bin)
            .args([
                "-f",
                selector,
                "-o",
                template.as_ref(),
                "--newline",
                "--no-playlist",
                "--no-warnings",
            ])
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| classify_spawn_error(&self.bin, e))?;

        // Progress lines arrive on stdout; forward the percentages as they come.
        let progress_task = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(percent) = parse_progress(&line) {
                        let _ = progress.send(DownloadProgress { percent });
                    }
                }
            })
        });

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
                buf
            })
        });

        let status = match self.download_timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("engine download exceeded {:?}, killing", limit);
                    let _ = child.kill().await;
                    return Err(ServiceError::Timeout(limit));
                }
            },
            None => child.wait().await?,
        };

        if let Some(task) = progress_task {
            let _ = task.await;
        }
        let stderr_text = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(ServiceError::EngineFailed(failure_message(
                &stderr_text,
                status.code(),
            )));
        }

        Ok(())
    }
}

/// A spawn failure means the binary itself is broken or absent — a deployment
/// problem, distinct from the engine running and failing.
fn classify_spawn_error(bin: &str, e: std::io::Error) -> ServiceError {
    match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            ServiceError::EngineUnavailable(format!("cannot execute {}: {}", bin, e))
        }
        _ => ServiceError::Io(e),
    }
}

fn failure_message(stderr: &str, exit_code: Option<i32>) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return match exit_code {
            Some(code) => format!("engine exited with code {}", code),
            None => "engine terminated by signal".to_string(),
        };
    }
    let mut snippet: String = trimmed.chars().take(STDERR_SNIPPET_MAX).collect();
    if snippet.len() < trimmed.len() {
        snippet.push_str("...");
    }
    snippet
}

/// Extract the percentage from a `[download]  42.3% of ...` progress line.
fn parse_progress(line: &str) -> Option<f32> {
    let rest = line.strip_prefix("[download]")?;
    let token = rest.split_whitespace().find(|t| t.ends_with('%'))?;
    token.trim_end_matches('%').parse().ok()
}
