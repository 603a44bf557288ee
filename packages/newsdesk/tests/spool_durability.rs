//! Durability of the file-backed retry spool and job ledger across a
//! process restart (modeled as closing and reopening the database).

#![cfg(feature = "sqlite")]

use std::time::Duration;

use futures::StreamExt;
use newsdesk::testing::MockCallbackSink;
use newsdesk::{
    redeliver, Job, JobKind, JobLedger, JobParams, JobState, RetrySpool, SqliteStore,
};
use serde_json::json;
use tempfile::TempDir;

const GATEWAY: &str = "http://gateway/results";

#[tokio::test]
async fn test_parked_item_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("newsdesk.db");

    let parked = {
        let store = SqliteStore::open(&path).await.unwrap();
        let item = store
            .park(GATEWAY, json!({"mediaId": "abc"}), "503 Service Unavailable")
            .await
            .unwrap();
        store.close().await;
        item
    };

    let store = SqliteStore::open(&path).await.unwrap();
    let drained: Vec<_> = store.drain(GATEWAY).collect().await;
    assert_eq!(drained.len(), 1);

    let item = drained.into_iter().next().unwrap().unwrap();
    assert_eq!(item.id, parked.id);
    assert_eq!(item.payload["mediaId"], "abc");
    assert_eq!(item.last_error.as_deref(), Some("503 Service Unavailable"));

    // Still parked until acked
    assert_eq!(store.pending(GATEWAY).await.unwrap(), 1);
    assert!(store.ack(&item).await.unwrap());
    assert_eq!(store.pending(GATEWAY).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unacked_claim_is_redelivered_after_crash() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("newsdesk.db");

    {
        let store = SqliteStore::open(&path).await.unwrap();
        store.park(GATEWAY, json!({"n": 1}), "timeout").await.unwrap();

        // A drain claims the item and dies before acking
        let claimed = store
            .claim_next(GATEWAY, 0, uuid::Uuid::new_v4(), Duration::from_millis(1))
            .await
            .unwrap();
        assert!(claimed.is_some());
        store.close().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let store = SqliteStore::open(&path).await.unwrap();
    let sink = MockCallbackSink::new();
    let report = redeliver(&store, &sink, GATEWAY).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(sink.delivered(), vec![json!({"n": 1})]);
    assert_eq!(store.pending(GATEWAY).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_redelivery_keeps_item() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("newsdesk.db")).await.unwrap();
    store.park(GATEWAY, json!({"n": 1}), "timeout").await.unwrap();

    let sink = MockCallbackSink::new().down();
    let report = redeliver(&store, &sink, GATEWAY).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(store.pending(GATEWAY).await.unwrap(), 1);

    sink.set_down(false);
    let report = redeliver(&store, &sink, GATEWAY).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(store.pending(GATEWAY).await.unwrap(), 0);
}

#[tokio::test]
async fn test_started_job_is_reclaimable_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("newsdesk.db");
    let job = Job::builder()
        .kind(JobKind::SingleImage)
        .input_ref("scans/front.jpg")
        .params(JobParams::new().with_language("en"))
        .build();

    {
        let store = SqliteStore::open(&path).await.unwrap();
        store.insert(&job).await.unwrap();
        store.claim("crashed", Duration::from_millis(1)).await.unwrap();
        store.close().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let store = SqliteStore::open(&path).await.unwrap();
    assert_eq!(store.requeue_expired().await.unwrap(), 1);

    let record = store
        .claim("replacement", Duration::from_secs(60))
        .await
        .unwrap()
        .expect("job is claimable again");
    assert_eq!(record.id(), job.id);
    assert_eq!(record.state, JobState::Started);
    assert_eq!(record.attempts, 2);
}
