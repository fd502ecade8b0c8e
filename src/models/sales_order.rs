//! Sales order model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A closed billing period per (tenant, resource). The sales-order ledger
/// carries the same range-exclusion discipline as the usage ledger, minus
/// the service dimension: a period is either billed or not.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SalesOrder {
    pub order_id: Uuid,
    pub tenant_id: String,
    pub resource_id: String,
    #[sqlx(rename = "start_time")]
    pub start: DateTime<Utc>,
    #[sqlx(rename = "end_time")]
    pub end: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}
