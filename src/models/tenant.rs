//! Tenant and resource models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A billable tenant. Ids are opaque strings issued by the identity
/// service and stable across sessions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub info: Option<String>,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

/// A metered resource (vm, volume, ...) owned by exactly one tenant.
/// `metadata` is an opaque string-to-string mapping used for invoice
/// display and service enumeration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Resource {
    pub id: String,
    pub tenant_id: String,
    pub metadata: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl Resource {
    /// Resource type tag from metadata, used to group invoice lines.
    pub fn resource_type(&self) -> &str {
        self.metadata
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
    }
}

/// A tenant as reported by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}
