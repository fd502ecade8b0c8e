//! Identity provider: tenant enumeration contract and HTTP client.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::IdentityConfig;
use crate::error::BillingError;
use crate::models::TenantRecord;

/// Tenant enumeration contract. Ignore-list filtering happens in the
/// billing runner, upstream of the core pipeline.
#[async_trait]
pub trait TenantProvider: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<TenantRecord>, BillingError>;
}

#[derive(Debug, Deserialize)]
struct TenantListResponse {
    tenants: Vec<TenantRecord>,
}

/// Keystone-style HTTP client for the identity service.
pub struct IdentityClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl IdentityClient {
    pub fn new(config: &IdentityConfig) -> Result<Self, BillingError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| BillingError::Config(anyhow::Error::new(e)))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl TenantProvider for IdentityClient {
    #[instrument(skip(self))]
    async fn list_tenants(&self) -> Result<Vec<TenantRecord>, BillingError> {
        let url = format!("{}/v2.0/tenants", self.base_url);
        let mut request = self.http.get(&url);
        if let Some(token) = &self.auth_token {
            request = request.header("X-Auth-Token", token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BillingError::Fetch {
                message: format!("{} returned {}", url, status),
            });
        }

        let body: TenantListResponse = response.json().await?;
        debug!(tenants = body.tenants.len(), "Fetched tenant list");
        Ok(body.tenants)
    }
}
