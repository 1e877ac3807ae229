//! Integration tests for the background artifact sweep task.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use vidsight_api::background::artifact_sweep;
use vidsight_core::store::ArtifactStore;

async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn cancellation_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        ArtifactStore::open(dir.path(), Duration::from_secs(3600))
            .await
            .unwrap(),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(artifact_sweep::run(
        store,
        Duration::from_secs(300),
        Duration::from_secs(60),
        cancel.clone(),
    ));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("sweep task did not stop")
        .unwrap();
}

#[tokio::test]
async fn expired_artifacts_are_swept() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ArtifactStore::open(dir.path(), Duration::ZERO).await.unwrap());
    let artifact = store.put("processed_old.mp4", b"old").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(artifact_sweep::run(
        Arc::clone(&store),
        Duration::from_millis(10),
        Duration::from_millis(10),
        cancel.clone(),
    ));

    assert!(wait_until(|| !artifact.path.exists()).await);
    assert!(store.is_empty().await);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn failed_cycle_does_not_kill_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("processed");
    let store = Arc::new(ArtifactStore::open(&root, Duration::ZERO).await.unwrap());
    std::fs::remove_dir(&root).unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(artifact_sweep::run(
        Arc::clone(&store),
        Duration::from_secs(3600),
        Duration::from_millis(10),
        cancel.clone(),
    ));

    // Let at least one cycle fail, then move the directory back in place
    // holding a leftover file that is already past the TTL.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    let staging = dir.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();
    let staged = staging.join("processed_leftover.mp4");
    std::fs::write(&staged, b"x").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&staged)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(60))
        .unwrap();
    std::fs::rename(&staging, &root).unwrap();
    let leftover = root.join("processed_leftover.mp4");

    assert!(wait_until(|| !leftover.exists()).await);

    cancel.cancel();
    handle.await.unwrap();
}
