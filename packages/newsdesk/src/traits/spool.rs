//! Retry spool trait.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::traits::stages::CallbackSink;
use crate::types::spool::{RedeliveryReport, RetryItem};

/// How long a drain holds an item before another drain may take it over.
pub const DRAIN_CLAIM_LEASE: Duration = Duration::from_secs(300);

/// Durable store of outbound payloads that failed delivery.
///
/// Items are never lost between `park` and a matching `ack`: a drain that
/// crashes mid-item leaves it claimed only until the claim lease runs out.
#[async_trait]
pub trait RetrySpool: Send + Sync {
    /// Persist an undelivered payload.
    async fn park(
        &self,
        destination: &str,
        payload: serde_json::Value,
        error: &str,
    ) -> Result<RetryItem>;

    /// Claim the next item for `destination` with `seq > after_seq` that is
    /// unclaimed or whose claim expired.
    async fn claim_next(
        &self,
        destination: &str,
        after_seq: i64,
        claimant: Uuid,
        lease: Duration,
    ) -> Result<Option<RetryItem>>;

    /// Remove an item after successful redelivery. Returns false if the item
    /// is gone or claimed by someone else.
    async fn ack(&self, item: &RetryItem) -> Result<bool>;

    /// Record another failed redelivery and release the claim.
    async fn bump(&self, item: &RetryItem, error: &str) -> Result<()>;

    /// Items currently parked for `destination`.
    async fn pending(&self, destination: &str) -> Result<usize>;

    /// Every destination with at least one parked item, sorted.
    async fn destinations(&self) -> Result<Vec<String>>;

    /// Lazily claim every item parked for `destination`, oldest first.
    ///
    /// Finite: the cursor only moves forward, so a bumped item is not seen
    /// again by the same drain. Restartable: a new drain starts from the
    /// beginning of whatever is still parked.
    fn drain<'a>(&'a self, destination: &'a str) -> BoxStream<'a, Result<RetryItem>> {
        let claimant = Uuid::new_v4();
        Box::pin(async_stream::try_stream! {
            let mut cursor = 0i64;
            while let Some(item) = self
                .claim_next(destination, cursor, claimant, DRAIN_CLAIM_LEASE)
                .await?
            {
                cursor = item.seq;
                yield item;
            }
        })
    }
}

/// Replay every parked item for `destination` once, acking deliveries and
/// bumping failures.
pub async fn redeliver(
    spool: &dyn RetrySpool,
    sink: &dyn CallbackSink,
    destination: &str,
) -> Result<RedeliveryReport> {
    use futures::StreamExt;

    let mut report = RedeliveryReport::default();
    let mut items = spool.drain(destination);

    while let Some(item) = items.next().await {
        let item = item?;
        match sink.deliver(&item.destination, &item.payload).await {
            Ok(()) => {
                spool.ack(&item).await?;
                report.delivered += 1;
                debug!(item_id = %item.id, destination = %destination, "redelivered spooled payload");
            }
            Err(e) => {
                warn!(
                    item_id = %item.id,
                    attempts = item.attempt_count + 1,
                    error = %e,
                    "redelivery failed, keeping item parked"
                );
                spool.bump(&item, &e.to_string()).await?;
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Replay the spool for every destination that has parked items.
pub async fn redeliver_all(
    spool: &dyn RetrySpool,
    sink: &dyn CallbackSink,
) -> Result<RedeliveryReport> {
    let mut total = RedeliveryReport::default();
    for destination in spool.destinations().await? {
        let report = redeliver(spool, sink, &destination).await?;
        total.delivered += report.delivered;
        total.failed += report.failed;
    }
    Ok(total)
}
