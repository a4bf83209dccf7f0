use std::time::Duration;

use hondana_core::models::ItemKind;
use hondana_core::traits::ItemCache;
use tokio_util::sync::CancellationToken;

use crate::common::{setup_test_db, setup_test_db_with};

#[tokio::test]
async fn opens_in_wal_mode() {
    let (db, dir) = setup_test_db().await;

    let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
    assert!(dir.path().join("db").join("cache.db").exists());
}

#[tokio::test]
async fn schema_setup_is_idempotent() {
    let (db, _dir) = setup_test_db().await;
    db.item_repo()
        .put("s1", "m1", ItemKind::Manga, "{}")
        .await
        .unwrap();

    db.setup_schema().await.unwrap();
    db.setup_schema().await.unwrap();

    assert_eq!(db.item_repo().count(None, None).await.unwrap(), 1);
}

#[tokio::test]
async fn checkpoint_merges_the_log() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.item_repo();
    for i in 0..50 {
        repo.put("s1", &format!("m{i}"), ItemKind::Manga, "{}")
            .await
            .unwrap();
    }
    assert!(db.wal_size().await.unwrap() > 0);

    let stats = db.checkpoint().await.unwrap();
    assert!(!stats.busy);
    assert_eq!(stats.checkpointed_frames, stats.log_frames);
}

#[tokio::test]
async fn checkpoint_monitor_stops_on_cancel() {
    let (db, _dir) = setup_test_db_with(|c| {
        c.wal_limit_bytes = 0;
        c.checkpoint_interval = Duration::from_millis(20);
    })
    .await;
    db.item_repo()
        .put("s1", "m1", ItemKind::Manga, "{}")
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let monitor = db.spawn_checkpoint_monitor(cancel.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), monitor)
        .await
        .expect("monitor did not stop")
        .unwrap();

    // The database stays usable after the monitor's checkpoints.
    assert_eq!(db.item_repo().count(None, None).await.unwrap(), 1);
}
