//! E5: two concurrent lock holders on the same path serialise; the one that
//! arrives second and can't wait long enough raises a timeout.

use std::time::Duration;
use vmstate_core::error::ErrorKind;
use vmstate_core::lock::LockManager;

#[tokio::test]
async fn second_locker_times_out_while_the_first_holds_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.qcow2");
    tokio::fs::write(&path, b"data").await.unwrap();

    let mgr = LockManager::new(false);
    let path_for_holder = path.clone();
    let holder = tokio::spawn(async move {
        mgr.with_lock(&path_for_holder, Duration::from_secs(5), || async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(())
        })
        .await
    });

    // Give the holder a moment to win the race and take the lock first.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let contender = LockManager::new(false);
    let result = contender.with_lock(&path, Duration::from_secs(1), || async { Ok(()) }).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);

    holder.await.unwrap().unwrap();
}
