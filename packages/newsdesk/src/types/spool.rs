//! Retry spool items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An outbound delivery that exhausted its immediate retry budget.
///
/// Lives in the spool from `park` until a successful redelivery is acked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryItem {
    pub id: Uuid,
    /// Monotonic spool sequence; drains walk items in this order
    pub seq: i64,
    pub destination: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Drain that currently holds this item
    pub claimed_by: Option<Uuid>,
}

/// Outcome of replaying the spool for one or more destinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}
