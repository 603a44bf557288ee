//! Ledger and spool behavior against a real Postgres.
//!
//! Needs a Docker daemon: `cargo test -p newsdesk-server -- --ignored`

mod common;

use std::time::Duration;

use futures::StreamExt;
use newsdesk::{
    redeliver, redeliver_all, Dispatcher, Job, JobKind, JobOutcome, JobParams, JobState,
    MockCallbackSink, StoreError,
};
use serde_json::json;
use test_context::test_context;

use crate::common::TestHarness;

const GATEWAY: &str = "http://gateway/results";

fn single_image_job() -> Job {
    Job::builder()
        .kind(JobKind::SingleImage)
        .input_ref("scans/front.jpg")
        .params(JobParams::new().with_language("en"))
        .build()
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_job_is_claimed_once(ctx: &TestHarness) {
    let ledger = &ctx.stores.ledger;
    let job = single_image_job();
    ledger.insert(&job).await.unwrap();

    let first = ledger.claim("w1", Duration::from_secs(60)).await.unwrap();
    let second = ledger.claim("w2", Duration::from_secs(60)).await.unwrap();

    let record = first.expect("first claim wins");
    assert_eq!(record.id(), job.id);
    assert_eq!(record.state, JobState::Started);
    assert_eq!(record.worker_id.as_deref(), Some("w1"));
    assert!(second.is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_stale_owner_cannot_complete(ctx: &TestHarness) {
    let ledger = &ctx.stores.ledger;
    let job = single_image_job();
    ledger.insert(&job).await.unwrap();

    ledger.claim("slow", Duration::from_millis(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ledger.requeue_expired().await.unwrap(), 1);
    ledger
        .claim("fast", Duration::from_secs(60))
        .await
        .unwrap()
        .expect("requeued job is claimable");

    let stale = ledger
        .complete(job.id, "slow", &JobOutcome::Failure("late".into()))
        .await;
    assert!(matches!(stale, Err(StoreError::LeaseLost { .. })));

    ledger
        .complete(job.id, "fast", &JobOutcome::Failure("conversion failed".into()))
        .await
        .unwrap();
    let record = ledger.get(job.id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Failure);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.error.as_deref(), Some("conversion failed"));
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_dispatcher_round_trip(ctx: &TestHarness) {
    let dispatcher = Dispatcher::new(ctx.stores.ledger.clone());
    let id = dispatcher
        .submit(
            JobKind::SingleImage,
            Some("scans/front.jpg".into()),
            JobParams::new().with_language("en"),
        )
        .await
        .unwrap();

    let status = dispatcher.status(id).await.unwrap();
    assert_eq!(status.state, JobState::Pending);
    assert_eq!(status.kind, JobKind::SingleImage);
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_spool_drains_in_park_order(ctx: &TestHarness) {
    let spool = &ctx.stores.spool;
    for n in 0..3 {
        spool.park(GATEWAY, json!({ "n": n }), "timeout").await.unwrap();
    }
    spool
        .park("http://other/results", json!({ "n": 99 }), "timeout")
        .await
        .unwrap();

    let drained: Vec<_> = spool.drain(GATEWAY).collect().await;
    let order: Vec<_> = drained
        .into_iter()
        .map(|item| item.unwrap().payload["n"].clone())
        .collect();
    assert_eq!(order, vec![json!(0), json!(1), json!(2)]);
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redeliver_acks_only_successes(ctx: &TestHarness) {
    let spool = &ctx.stores.spool;
    spool.park(GATEWAY, json!({ "n": 1 }), "timeout").await.unwrap();

    let sink = MockCallbackSink::new().down();
    let report = redeliver(spool.as_ref(), &sink, GATEWAY).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(spool.pending(GATEWAY).await.unwrap(), 1);

    sink.set_down(false);
    let report = redeliver(spool.as_ref(), &sink, GATEWAY).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(spool.pending(GATEWAY).await.unwrap(), 0);
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redeliver_all_covers_every_destination(ctx: &TestHarness) {
    let spool = &ctx.stores.spool;
    spool.park(GATEWAY, json!({ "n": 1 }), "timeout").await.unwrap();
    spool
        .park("http://callbacks/jobs", json!({ "n": 2 }), "503")
        .await
        .unwrap();
    assert_eq!(
        spool.destinations().await.unwrap(),
        vec!["http://callbacks/jobs".to_string(), GATEWAY.to_string()]
    );

    let sink = MockCallbackSink::new();
    let report = redeliver_all(spool.as_ref(), &sink).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert!(spool.destinations().await.unwrap().is_empty());
}
