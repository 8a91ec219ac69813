//! Reconciliation against the SQLite store, including persistence across
//! reopening the database file.

mod common;

use std::sync::Arc;

use common::fixtures::*;
use marketscrape::model::ExtractedAsset;
use marketscrape::reconcile::{Reconciler, UpsertOutcome};
use marketscrape::store::{AssetStore, SqliteStore};
use marketscrape::testing::ScriptedSession;
use tempfile::TempDir;

fn bitcoin() -> ExtractedAsset {
    ExtractedAsset {
        rank: Some(1),
        symbol: Some("BTC".to_string()),
        slug: Some("bitcoin".to_string()),
        market_cap: Some(1.32e12),
        supply: Some("19.8M".to_string()),
        change: Some("-1.25".to_string()),
        ..ExtractedAsset::new("Bitcoin", 67012.08)
    }
}

fn in_memory() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().expect("open in-memory store"))
}

#[tokio::test]
async fn test_upsert_twice_keeps_one_record() {
    let store = in_memory();
    let reconciler = Reconciler::new(store.clone());

    assert_eq!(reconciler.upsert(&bitcoin()).await.unwrap(), UpsertOutcome::Created);
    let first = store.find_by_name("Bitcoin").await.unwrap().unwrap();

    assert_eq!(reconciler.upsert(&bitcoin()).await.unwrap(), UpsertOutcome::Updated);
    let second = store.find_by_name("Bitcoin").await.unwrap().unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.price, first.price);
    assert_eq!(second.supply, first.supply);
}

#[tokio::test]
async fn test_unresolved_fields_keep_stored_values() {
    let store = in_memory();
    let reconciler = Reconciler::new(store.clone());
    reconciler.upsert(&bitcoin()).await.unwrap();

    // A lazily rendered row: only name and price resolved this time.
    reconciler
        .upsert(&ExtractedAsset::new("Bitcoin", 68000.0))
        .await
        .unwrap();

    let stored = store.find_by_name("Bitcoin").await.unwrap().unwrap();
    assert_eq!(stored.price, 68000.0);
    assert_eq!(stored.supply, "19.8M");
    assert_eq!(stored.rank, 1);
    assert_eq!(stored.symbol, "BTC");
    assert_eq!(stored.market_cap, 1.32e12);
    assert_eq!(stored.change, "-1.25");
}

#[tokio::test]
async fn test_slug_synthesized_from_name() {
    let store = in_memory();
    let reconciler = Reconciler::new(store.clone());

    reconciler
        .upsert(&ExtractedAsset::new("Shiba  Inu", 0.00001834))
        .await
        .unwrap();

    let stored = store.find_by_slug("shiba-inu").await.unwrap().expect("found by synthesized slug");
    assert_eq!(stored.name, "Shiba  Inu");
    assert_eq!(stored.rank, 0);
    assert!(!stored.has_rank());
}

#[tokio::test]
async fn test_list_orders_by_rank_with_unranked_last() {
    let store = in_memory();
    let reconciler = Reconciler::new(store.clone());

    let mut third = ExtractedAsset::new("Tether", 1.0);
    third.rank = Some(3);
    let mut second = ExtractedAsset::new("Ethereum", 3101.47);
    second.rank = Some(2);
    for asset in [ExtractedAsset::new("Unranked", 0.5), third, bitcoin(), second] {
        reconciler.upsert(&asset).await.unwrap();
    }

    let names: Vec<String> = store.list(0, 10).await.unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["Bitcoin", "Ethereum", "Tether", "Unranked"]);

    let page: Vec<String> = store.list(1, 2).await.unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(page, vec!["Ethereum", "Tether"]);
}

#[tokio::test]
async fn test_run_persists_across_reopen() {
    let tmp = TempDir::new().expect("create temp dir");
    let db_path = tmp.path().join("data").join("assets.db");

    {
        let store = Arc::new(SqliteStore::open(&db_path).expect("open store"));
        let session = ScriptedSession::new().with_page(&page_url(1), ranked_page(1, 25));
        let summary = pipeline(store, 10, 100).run(&session).await;
        assert_eq!(summary.created, 25);
    }

    assert!(db_path.exists(), "parent directory and database file are created");

    let reopened = Arc::new(SqliteStore::open(&db_path).expect("reopen store"));
    assert_eq!(reopened.count().await.unwrap(), 25);

    let record = reopened.find_by_slug("coin-7").await.unwrap().unwrap();
    assert_eq!(record.rank, 7);
    assert_eq!(record.price, 1007.5);

    let session = ScriptedSession::new().with_page(&page_url(1), ranked_page(1, 25));
    let summary = pipeline(reopened.clone(), 10, 100).run(&session).await;
    assert_eq!(summary.created, 0);
    assert_eq!(summary.updated, 25);
    assert_eq!(reopened.count().await.unwrap(), 25);
}
