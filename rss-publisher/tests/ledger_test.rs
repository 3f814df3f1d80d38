mod common;

use chrono::{TimeZone, Utc};
use common::init_tracing;
use rss_publisher::types::*;
use rss_publisher::{MemoryLedger, SqliteLedger};
use tracing::info;

async fn check_uniqueness_rules(ledger: &dyn PostLedger) {
    assert!(ledger
        .record("guid-1", "https://news.example.com/a", "Phone X Launched", None)
        .await
        .unwrap());

    // Same identity, same link, same slug: each alone is enough to collide
    assert!(!ledger
        .record("guid-1", "https://news.example.com/b", "Other story", None)
        .await
        .unwrap());
    assert!(!ledger
        .record("guid-2", "https://news.example.com/a", "Other story", None)
        .await
        .unwrap());
    assert!(!ledger
        .record("guid-3", "https://news.example.com/c", "Phone X launched!", None)
        .await
        .unwrap());
    assert_eq!(ledger.count().await.unwrap(), 1);

    assert!(ledger.exists("guid-1", "-", "").await.unwrap());
    assert!(ledger.exists("-", "https://news.example.com/a", "").await.unwrap());
    assert!(ledger.exists("-", "-", "phone-x-launched").await.unwrap());
    assert!(!ledger.exists("guid-9", "https://news.example.com/z", "phone-y").await.unwrap());

    // Titles without any slug characters never collide with each other
    assert!(ledger.record("guid-4", "https://news.example.com/d", "!!!", None).await.unwrap());
    assert!(ledger.record("guid-5", "https://news.example.com/e", "???", None).await.unwrap());
    assert!(!ledger.exists("guid-6", "https://news.example.com/f", "").await.unwrap());
    assert_eq!(ledger.count().await.unwrap(), 3);
}

async fn check_title_prefix(ledger: &dyn PostLedger) {
    ledger
        .record("guid-1", "https://news.example.com/a", "Apple unveils the new iPhone", None)
        .await
        .unwrap();

    assert!(ledger.exists_title_prefix("apple-unveils").await.unwrap());
    assert!(ledger.exists_title_prefix("apple-unveils-the-new-iphone").await.unwrap());
    // Prefixes only match on word boundaries
    assert!(!ledger.exists_title_prefix("apple-unveil").await.unwrap());
    assert!(!ledger.exists_title_prefix("google").await.unwrap());
    assert!(!ledger.exists_title_prefix("").await.unwrap());
}

#[tokio::test]
async fn test_memory_ledger_rules() {
    init_tracing();
    check_uniqueness_rules(&MemoryLedger::new()).await;
    check_title_prefix(&MemoryLedger::new()).await;
}

#[tokio::test]
async fn test_sqlite_ledger_rules() {
    init_tracing();
    check_uniqueness_rules(&SqliteLedger::in_memory().await.unwrap()).await;
    check_title_prefix(&SqliteLedger::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn test_sqlite_ledger_survives_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posted.db");
    let published = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    {
        let ledger = SqliteLedger::open(&path).await.unwrap();
        assert!(ledger
            .record("guid-1", "https://news.example.com/a", "Phone X Launched", Some(published))
            .await
            .unwrap());
        ledger.close().await;
    }

    let reopened = SqliteLedger::open(&path).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);
    assert!(reopened.exists("guid-1", "-", "").await.unwrap());
    assert!(!reopened
        .record("guid-1", "https://news.example.com/a", "Phone X Launched", Some(published))
        .await
        .unwrap());

    let recent = reopened.recent(10).await.unwrap();
    info!("Recent posts: {:?}", recent);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].title_slug, "phone-x-launched");
    assert_eq!(recent[0].published_at, Some(published));
    reopened.close().await;
}

#[tokio::test]
async fn test_recent_lists_newest_first() {
    let ledger = SqliteLedger::in_memory().await.unwrap();
    for n in 1..=3 {
        ledger
            .record(
                &format!("guid-{}", n),
                &format!("https://news.example.com/{}", n),
                &format!("Story {}", n),
                None,
            )
            .await
            .unwrap();
    }

    let recent = ledger.recent(2).await.unwrap();
    let ids: Vec<&str> = recent.iter().map(|r| r.identity.as_str()).collect();
    assert_eq!(ids, vec!["guid-3", "guid-2"]);
}
