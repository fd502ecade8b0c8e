//! Error taxonomy for the billing pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the usage ledger, rating engine, and invoice builder.
///
/// Overlap and AlreadyBilled are the ledger exclusion errors: they signal
/// "already counted" and are never retried. Fetch is retried with backoff
/// inside the metering client before it reaches a caller.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("usage window overlaps an existing entry for service '{service}' on resource {resource_id} (tenant {tenant_id})")]
    Overlap {
        tenant_id: String,
        resource_id: String,
        service: String,
    },

    #[error("period already billed for resource {resource_id} (tenant {tenant_id})")]
    AlreadyBilled {
        tenant_id: String,
        resource_id: String,
    },

    #[error("no rate configured for service '{service}' in region '{region}'")]
    RateNotFound { service: String, region: String },

    #[error("usage fetch failed: {message}")]
    Fetch { message: String },

    #[error("invoice is closed")]
    InvoiceClosed,

    #[error("invoice artifact already exists at {0}")]
    ArtifactExists(PathBuf),

    #[error("invalid billing window: start {start} is not before end {end}")]
    Window { start: String, end: String },

    #[error("database error: {0}")]
    Database(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for BillingError {
    fn from(err: config::ConfigError) -> Self {
        BillingError::Config(anyhow::Error::new(err))
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Fetch {
            message: err.to_string(),
        }
    }
}
