// Lifecycle tests for the background sweeper.

use std::sync::Arc;
use std::time::Duration;

use fetchproxy::config::FRAGMENT_MARKER;
use fetchproxy::workspace::{ScratchWorkspace, Sweeper};

#[tokio::test]
async fn test_sweeper_removes_orphans_on_interval() {
    let tmp = tempfile::tempdir().unwrap();
    let workspace = Arc::new(ScratchWorkspace::new(tmp.path()).unwrap());

    // A fragment the engine left behind, as after a crash mid-download.
    let frag = tmp.path().join(format!("{}0042.bin", FRAGMENT_MARKER));
    std::fs::write(&frag, b"orphan").unwrap();

    let sweeper = Sweeper::new(Arc::clone(&workspace), Duration::from_millis(100));
    sweeper.start();

    let mut cleaned = false;
    for _ in 0..30 {
        if !frag.exists() {
            cleaned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(cleaned, "sweeper never removed the fragment file");

    sweeper.stop().await;
}

#[tokio::test]
async fn test_sweeper_start_is_idempotent_and_stop_is_clean() {
    let tmp = tempfile::tempdir().unwrap();
    let workspace = Arc::new(ScratchWorkspace::new(tmp.path()).unwrap());

    let sweeper = Sweeper::new(workspace, Duration::from_millis(50));
    sweeper.start();
    sweeper.start();

    tokio::time::sleep(Duration::from_millis(120)).await;

    sweeper.stop().await;
    // Stopping twice must not hang or panic.
    sweeper.stop().await;
}

#[tokio::test]
async fn test_sweeper_spares_fresh_session_dirs() {
    let tmp = tempfile::tempdir().unwrap();
    let workspace = Arc::new(ScratchWorkspace::new(tmp.path()).unwrap());

    let artifact = workspace.allocate("mp4").unwrap();
    std::fs::write(&artifact.allocated_path, b"in flight").unwrap();

    let sweeper = Sweeper::new(Arc::clone(&workspace), Duration::from_millis(50));
    sweeper.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    sweeper.stop().await;

    // Fresh artifacts are far younger than the retention threshold.
    assert!(artifact.allocated_path.exists());
}
