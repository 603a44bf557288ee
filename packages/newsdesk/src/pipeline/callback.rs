//! Outbound delivery with immediate retries, falling back to the spool.

use tracing::{info, warn};

use crate::error::Result;
use crate::traits::spool::RetrySpool;
use crate::traits::stages::CallbackSink;
use crate::types::config::RetryPolicy;
use crate::types::result::DeliveryOutcome;

/// Deliver `payload`, retrying per `policy`; park it in the spool once the
/// budget runs out. Only a spool write failure is an error.
pub async fn deliver_or_park(
    sink: &dyn CallbackSink,
    spool: &dyn RetrySpool,
    policy: &RetryPolicy,
    destination: &str,
    payload: serde_json::Value,
) -> Result<DeliveryOutcome> {
    let max = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match sink.deliver(destination, &payload).await {
            Ok(()) => {
                info!(destination = %destination, attempt, "payload delivered");
                return Ok(DeliveryOutcome::Delivered {
                    destination: destination.to_string(),
                });
            }
            Err(e) if attempt < max => {
                warn!(destination = %destination, attempt, error = %e, "delivery failed, retrying");
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
            Err(e) => {
                warn!(
                    destination = %destination,
                    attempts = attempt,
                    error = %e,
                    "delivery retries exhausted, parking payload"
                );
                let item = spool.park(destination, payload, &e.to_string()).await?;
                return Ok(DeliveryOutcome::Parked {
                    destination: destination.to_string(),
                    item_id: item.id,
                });
            }
        }
    }
}
