// Download orchestration — runs the engine against a scratch artifact and
// exposes the result as a cleanup-guarded byte stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::engine::{DownloadProgress, MediaEngine};
use crate::error::ServiceError;
use crate::format::ResolvedFormat;
use crate::workspace::ScratchWorkspace;

/// Removes the session directory when dropped.
///
/// The guard rides inside the response body stream, so it fires on normal
/// exhaustion, on a mid-transfer read error, and when the client disconnects
/// and the body is dropped. One code path for every termination mode.
struct CleanupGuard {
    workspace: Arc<ScratchWorkspace>,
    prefix: String,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        // Single best-effort attempt; the sweep timer is the backstop and
        // may already have raced us, which cleanup treats as success.
        self.workspace.cleanup(&self.prefix);
    }
}

/// Finite, single-pass byte stream over a materialized artifact.
pub struct DownloadStream {
    inner: ReaderStream<File>,
    len: u64,
    _guard: CleanupGuard,
}

impl DownloadStream {
    /// Total artifact size, for the Content-Length header.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Stream for DownloadStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(Err(e))) = &polled {
            // Headers are long gone at this point; all we can do is log and
            // let the transport tear down. The guard still cleans up.
            warn!("stream read error mid-transfer: {}", e);
        }
        polled
    }
}

/// Invoke the engine and open the produced artifact for streaming.
///
/// The engine call is the long pole: it blocks until the complete file is on
/// disk, and only then do bytes start flowing to the client. Any failure
/// before the stream is handed out cleans the artifact here; afterwards the
/// stream's guard owns cleanup.
pub async fn run(
    engine: &dyn MediaEngine,
    workspace: &Arc<ScratchWorkspace>,
    url: &str,
    resolved: &ResolvedFormat,
) -> Result<DownloadStream, ServiceError> {
    let artifact = workspace.allocate(resolved.declared_ext)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<DownloadProgress>();
    let progress_prefix = artifact.prefix.clone();
    tokio::spawn(async move {
        let mut last_logged = f32::NEG_INFINITY;
        while let Some(update) = rx.recv().await {
            // Percent updates can be chatty; log in ~10% steps.
            if update.percent - last_logged >= 10.0 || update.percent >= 100.0 {
                debug!("download {} at {:.1}%", progress_prefix, update.percent);
                last_logged = update.percent;
            }
        }
    });

    if let Err(e) = engine
        .download(url, resolved.selector, &artifact.allocated_path, tx)
        .await
    {
        workspace.cleanup(&artifact.prefix);
        return Err(e);
    }

    // The engine picks the real container; find what it actually wrote.
    let actual = match workspace.locate(&artifact, resolved.accepted_exts) {
        Some(path) => path,
        None => {
            warn!(
                "engine reported success but session {} has no artifact",
                artifact.prefix
            );
            workspace.cleanup(&artifact.prefix);
            return Err(ServiceError::EngineOutputMissing);
        }
    };

    let file = match File::open(&actual).await {
        Ok(f) => f,
        Err(e) => {
            workspace.cleanup(&artifact.prefix);
            return Err(e.into());
        }
    };
    let len = match file.metadata().await {
        Ok(m) => m.len(),
        Err(e) => {
            workspace.cleanup(&artifact.prefix);
            return Err(e.into());
        }
    };

    debug!(
        "streaming artifact {} ({} bytes)",
        actual.display(),
        len
    );

    Ok(DownloadStream {
        inner: ReaderStream::new(file),
        len,
        _guard: CleanupGuard {
            workspace: Arc::clone(workspace),
            prefix: artifact.prefix,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DownloadProgress, MediaMetadata};
    use crate::format::{resolve, RequestedFormat};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::path::Path;

    /// Engine stub that writes a fixed payload, possibly under a different
    /// container extension than the allocated path asked for.
    struct StubEngine {
        ext: Option<&'static str>,
        payload: &'static [u8],
    }

    #[async_trait]
    impl MediaEngine for StubEngine {
        async fn probe(&self, _url: &str) -> Result<MediaMetadata, ServiceError> {
            Ok(MediaMetadata::default())
        }

        async fn download(
            &self,
            _url: &str,
            _selector: &str,
            output: &Path,
            progress: mpsc::UnboundedSender<DownloadProgress>,
        ) -> Result<(), ServiceError> {
            let _ = progress.send(DownloadProgress { percent: 100.0 });
            match self.ext {
                Some(ext) => std::fs::write(output.with_extension(ext), self.payload)?,
                None => {}
            }
            Ok(())
        }
    }

    fn test_workspace() -> (tempfile::TempDir, Arc<ScratchWorkspace>) {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Arc::new(ScratchWorkspace::new(tmp.path()).unwrap());
        (tmp, ws)
    }

    #[tokio::test]
    async fn test_full_consumption_cleans_up() {
        let (_tmp, ws) = test_workspace();
        let engine = StubEngine {
            ext: Some("mp4"),
            payload: b"video bytes",
        };
        let resolved = resolve(&RequestedFormat::Mp4);

        let mut stream = run(&engine, &ws, "https://example.com/v", &resolved)
            .await
            .unwrap();
        assert_eq!(stream.len(), 11);

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"video bytes");

        drop(stream);
        assert_eq!(std::fs::read_dir(ws.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_cleans_up() {
        let (_tmp, ws) = test_workspace();
        let engine = StubEngine {
            ext: Some("mp4"),
            payload: b"payload",
        };
        let resolved = resolve(&RequestedFormat::Mp4);

        let stream = run(&engine, &ws, "https://example.com/v", &resolved)
            .await
            .unwrap();
        // Simulated client disconnect: drop without reading a single byte.
        drop(stream);

        assert_eq!(std::fs::read_dir(ws.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_repackaged_container_is_located() {
        let (_tmp, ws) = test_workspace();
        let engine = StubEngine {
            ext: Some("opus"),
            payload: b"opus audio",
        };
        let resolved = resolve(&RequestedFormat::Mp3);

        let mut stream = run(&engine, &ws, "https://example.com/a", &resolved)
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"opus audio");
    }

    #[tokio::test]
    async fn test_video_fallback_container_is_served() {
        let (_tmp, ws) = test_workspace();
        // `best[ext=mp4]/best` fell through to a webm muxing.
        let engine = StubEngine {
            ext: Some("webm"),
            payload: b"webm video",
        };
        let resolved = resolve(&RequestedFormat::Mp4);

        let mut stream = run(&engine, &ws, "https://example.com/v", &resolved)
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"webm video");

        drop(stream);
        assert_eq!(std::fs::read_dir(ws.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_output_is_fatal_and_cleaned() {
        let (_tmp, ws) = test_workspace();
        let engine = StubEngine {
            ext: None,
            payload: b"",
        };
        let resolved = resolve(&RequestedFormat::Mp4);

        let err = match run(&engine, &ws, "https://example.com/v", &resolved).await {
            Err(e) => e,
            Ok(_) => panic!("expected a missing artifact to fail the run"),
        };
        assert!(matches!(err, ServiceError::EngineOutputMissing));
        assert_eq!(std::fs::read_dir(ws.root()).unwrap().count(), 0);
    }
}
