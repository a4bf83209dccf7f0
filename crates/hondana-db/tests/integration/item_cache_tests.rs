use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use hondana_core::models::{ItemKind, TtlPolicy};
use hondana_core::traits::ItemCache;
use hondana_db::{Database, DatabaseConfig, timestamp_key};

use crate::common::{setup_test_db, setup_test_db_with};

#[tokio::test]
async fn upsert_keeps_one_row_with_latest_payload() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.item_repo();
    let t1 = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
    let t2 = t1 + TimeDelta::minutes(5);

    repo.put_at("s1", "m1", ItemKind::Manga, r#"{"name":"First"}"#, t1)
        .await
        .unwrap();
    repo.put_at("s1", "m1", ItemKind::Manga, r#"{"name":"Second"}"#, t2)
        .await
        .unwrap();

    assert_eq!(repo.count(Some("s1"), Some(ItemKind::Manga)).await.unwrap(), 1);
    let payload = repo
        .get_at("s1", "m1", ItemKind::Manga, Duration::from_secs(3600), t2)
        .await
        .unwrap();
    assert_eq!(payload.as_deref(), Some(r#"{"name":"Second"}"#));
    assert_eq!(
        repo.timestamp_of("s1", "m1", ItemKind::Manga).await.unwrap(),
        Some(timestamp_key(t2))
    );
}

#[tokio::test]
async fn read_expires_only_same_source_and_kind() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.item_repo();
    let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = old + TimeDelta::days(1);

    repo.put_at("a", "x", ItemKind::Manga, "{}", old).await.unwrap();
    repo.put_at("a", "y", ItemKind::Chapter, "[]", old).await.unwrap();
    repo.put_at("b", "x", ItemKind::Manga, "{}", old).await.unwrap();

    let hit = repo
        .get_at("a", "x", ItemKind::Manga, Duration::from_secs(1), now)
        .await
        .unwrap();
    assert_eq!(hit, None);

    assert_eq!(repo.count(Some("a"), Some(ItemKind::Manga)).await.unwrap(), 0);
    assert_eq!(repo.count(Some("a"), Some(ItemKind::Chapter)).await.unwrap(), 1);
    assert_eq!(repo.count(Some("b"), Some(ItemKind::Manga)).await.unwrap(), 1);
}

#[tokio::test]
async fn fresh_row_is_returned() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.item_repo();
    let written = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    repo.put_at("s1", "one piece", ItemKind::Search, r#"{"items":[]}"#, written)
        .await
        .unwrap();

    let within = written + TimeDelta::minutes(119);
    let payload = repo
        .get_at("s1", "one piece", ItemKind::Search, Duration::from_secs(7200), within)
        .await
        .unwrap();
    assert!(payload.is_some());

    let beyond = written + TimeDelta::minutes(121);
    let payload = repo
        .get_at("s1", "one piece", ItemKind::Search, Duration::from_secs(7200), beyond)
        .await
        .unwrap();
    assert!(payload.is_none());
}

#[tokio::test]
async fn disabled_writes_are_a_no_op() {
    let (db, _dir) = setup_test_db_with(|c| c.writes_enabled = false).await;
    let repo = db.item_repo();
    assert!(!repo.writes_enabled());

    repo.put("s1", "m1", ItemKind::Manga, "{}").await.unwrap();

    assert_eq!(repo.count(None, None).await.unwrap(), 0);
    let payload = repo
        .get("s1", "m1", ItemKind::Manga, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(payload, None);
}

#[tokio::test]
async fn item_cache_trait_roundtrip() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.item_repo();

    repo.put("s1", "m1|1", ItemKind::Chapter, r#"[{"src":"a","headers":[]}]"#)
        .await
        .unwrap();
    let payload = repo
        .get("s1", "m1|1", ItemKind::Chapter, Duration::from_secs(3600))
        .await
        .unwrap()
        .unwrap();

    let pages: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(pages[0]["src"], "a");
}

#[tokio::test]
async fn prune_applies_each_kinds_ttl() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.item_repo();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let three_hours_ago = now - TimeDelta::hours(3);

    // Older than the search (2h) and chapter (1h) TTLs, within manga (7d)
    // and chapter list (~1 month).
    for kind in ItemKind::ALL {
        repo.put_at("s1", "k", kind, "{}", three_hours_ago).await.unwrap();
    }

    let removed = repo.prune_at(&TtlPolicy::default(), now).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(repo.count(None, Some(ItemKind::Search)).await.unwrap(), 0);
    assert_eq!(repo.count(None, Some(ItemKind::Chapter)).await.unwrap(), 0);
    assert_eq!(repo.count(None, Some(ItemKind::Manga)).await.unwrap(), 1);
    assert_eq!(repo.count(None, Some(ItemKind::Chapters)).await.unwrap(), 1);
}

#[tokio::test]
async fn secondary_process_shares_the_file() {
    let (primary, dir) = setup_test_db().await;
    primary
        .item_repo()
        .put("s1", "m1", ItemKind::Manga, r#"{"name":"Foo"}"#)
        .await
        .unwrap();

    let config = DatabaseConfig::at(primary.path());
    assert!(!config.primary);
    let secondary = Database::open(&config).await.unwrap();

    let payload = secondary
        .item_repo()
        .get("s1", "m1", ItemKind::Manga, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(payload.as_deref(), Some(r#"{"name":"Foo"}"#));

    secondary
        .item_repo()
        .put("s1", "m2", ItemKind::Manga, "{}")
        .await
        .unwrap();
    assert_eq!(primary.item_repo().count(Some("s1"), None).await.unwrap(), 2);

    secondary.close().await;
    primary.close().await;
    drop(dir);
}
