// Scratch workspace — per-session artifact directories plus the orphan sweeper.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{FRAGMENT_MARKER, RETENTION_THRESHOLD};

/// On-disk state for one download session.
///
/// Each session gets a private subdirectory named by its prefix, so cleanup
/// is a single recursive remove and two sessions can never collide on file
/// names no matter what the engine writes.
#[derive(Debug, Clone)]
pub struct TempArtifact {
    /// Unique per-session token, also the name of the session directory.
    pub prefix: String,
    /// The session's private directory under the scratch root.
    pub dir: PathBuf,
    /// Path the engine is instructed to write to. The engine may pick a
    /// different extension; the real file is discovered afterwards.
    pub allocated_path: PathBuf,
}

pub struct ScratchWorkspace {
    root: PathBuf,
}

impl ScratchWorkspace {
    /// Open (or create) the scratch directory. Idempotent.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh session directory and an output path inside it.
    ///
    /// The prefix combines current time and a random token, so it is unique
    /// across concurrent sessions without any existence check.
    pub fn allocate(&self, ext: &str) -> std::io::Result<TempArtifact> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let token = uuid::Uuid::new_v4().simple().to_string();
        let prefix = format!("dl_{}_{}", millis, &token[..8]);

        let dir = self.root.join(&prefix);
        fs::create_dir_all(&dir)?;
        let allocated_path = dir.join(format!("media.{}", ext));

        debug!("allocated artifact prefix={} path={}", prefix, allocated_path.display());
        Ok(TempArtifact {
            prefix,
            dir,
            allocated_path,
        })
    }

    /// Find the file the engine actually produced for `artifact`.
    ///
    /// The engine may have repackaged into a different container, so we take
    /// the first regular file in the session directory whose extension is in
    /// `accepted_exts`. Partial/fragment leftovers never match.
    pub fn locate(&self, artifact: &TempArtifact, accepted_exts: &[&str]) -> Option<PathBuf> {
        let entries = fs::read_dir(&artifact.dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let ext = match path.extension().and_then(|e| e.to_str()) {
                Some(e) => e.to_ascii_lowercase(),
                None => continue,
            };
            if accepted_exts.iter().any(|a| *a == ext) {
                return Some(path);
            }
        }
        None
    }

    /// Remove a session's directory and everything inside it.
    ///
    /// Best-effort single attempt; already-gone is success because the sweep
    /// timer may have beaten us to it. Never propagates — a failed delete
    /// must not mask the request outcome.
    pub fn cleanup(&self, prefix: &str) {
        let dir = self.root.join(prefix);
        if remove_quietly(&dir) {
            debug!("cleaned up session dir {}", dir.display());
        }
    }

    /// One full scan-and-clean pass over the scratch root.
    ///
    /// Fragment-marker entries go unconditionally; anything else older than
    /// the retention threshold goes too. Each removal is independent, so one
    /// bad entry never blocks the rest, and nothing here can fail the caller.
    pub fn sweep(&self) {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) => {
                warn!("sweep: cannot read scratch dir {}: {}", self.root.display(), e);
                return;
            }
        };

        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name.starts_with(FRAGMENT_MARKER) {
                if remove_quietly(&path) {
                    removed += 1;
                }
                continue;
            }

            if is_older_than(&path, RETENTION_THRESHOLD) && remove_quietly(&path) {
                debug!("sweep: removed stale entry {}", name);
                removed += 1;
            }
        }

        if removed > 0 {
            info!("sweep pass removed {} scratch entries", removed);
        }
    }
}

/// Remove a file or directory, logging failure instead of returning it.
/// Returns whether the entry is gone afterwards (already-absent counts).
fn remove_quietly(path: &Path) -> bool {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

fn is_older_than(path: &Path, threshold: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > threshold)
        .unwrap_or(false)
}

/// Background task that sweeps the scratch directory on a fixed interval.
///
/// Owned by the server: started at init, stopped at shutdown. This is the
/// backstop for artifacts orphaned by crashes or connections killed before
/// the per-request cleanup ran.
pub struct Sweeper {
    workspace: Arc<ScratchWorkspace>,
    interval: Duration,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    pub fn new(workspace: Arc<ScratchWorkspace>, interval: Duration) -> Self {
        Self {
            workspace,
            interval,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the sweep loop. Idempotent: a second call is a no-op.
    pub fn start(&self) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }

        let workspace = Arc::clone(&self.workspace);
        let interval = self.interval;
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so the loop waits
            // a full interval before the first pass.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let ws = Arc::clone(&workspace);
                        // Sweep does blocking fs work; keep it off the runtime threads.
                        let _ = tokio::task::spawn_blocking(move || ws.sweep()).await;
                    }
                }
            }
        });

        *guard = Some(handle);
    }

    /// Cancel the sweep loop and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
