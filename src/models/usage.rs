//! Usage ledger models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::BillingError;

/// Timestamp format used in invoice artifacts and metering queries.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A half-open [start, end) billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, BillingError> {
        if start >= end {
            return Err(BillingError::Window {
                start: start.format(DATE_FORMAT).to_string(),
                end: end.format(DATE_FORMAT).to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Interval intersection test on half-open ranges. Touching endpoints
    /// (a.end == b.start) do not overlap.
    pub fn overlaps(&self, other: &BillingWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// One committed usage fact: a volume of some service consumed by a
/// resource over [start, end). Rows are append-only and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageEntry {
    pub entry_id: Uuid,
    pub tenant_id: String,
    pub resource_id: String,
    pub service: String,
    pub volume: Decimal,
    #[sqlx(rename = "start_time")]
    pub start: DateTime<Utc>,
    #[sqlx(rename = "end_time")]
    pub end: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording a usage window in the ledger.
#[derive(Debug, Clone)]
pub struct RecordUsage {
    pub tenant_id: String,
    pub resource_id: String,
    pub service: String,
    pub volume: Decimal,
    pub window: BillingWindow,
}
