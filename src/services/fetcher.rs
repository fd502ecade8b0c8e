//! Usage fetcher: the metering service's query contract and its HTTP client.
//!
//! The core depends only on [`UsageFetcher`]; [`MeteringClient`] is the
//! production implementation against a Ceilometer-style meters API.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::config::MeteringConfig;
use crate::error::BillingError;
use crate::models::{BillingWindow, DATE_FORMAT};

/// One raw usage sample as reported by the metering service.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageSample {
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
    pub volume: Decimal,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Query contract for raw usage. Implementations may block on I/O; callers
/// treat a failure as fatal for the affected resource only.
#[async_trait]
pub trait UsageFetcher: Send + Sync {
    async fn fetch(
        &self,
        tenant_id: &str,
        meter: &str,
        window: &BillingWindow,
    ) -> Result<Vec<UsageSample>, BillingError>;
}

/// HTTP client for the metering API. Transient failures (transport errors,
/// 5xx, 429) are retried with exponential backoff within a configured time
/// budget; anything else surfaces immediately as a fetch error.
pub struct MeteringClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    lead_in: chrono::Duration,
    retry_budget: std::time::Duration,
}

impl MeteringClient {
    pub fn new(config: &MeteringConfig) -> Result<Self, BillingError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BillingError::Config(anyhow::Error::new(e)))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            lead_in: chrono::Duration::minutes(config.lead_in_minutes),
            retry_budget: std::time::Duration::from_secs(config.retry_budget_secs),
        })
    }

    /// Query filters: tenant scoping plus a timestamp range with the
    /// configured lead-in before the window and a strict upper bound at its
    /// end. The lead-in captures usage that began before the window but is
    /// still active.
    fn query_filters(&self, tenant_id: &str, window: &BillingWindow) -> serde_json::Value {
        let from = window.start - self.lead_in;
        json!({
            "q": [
                { "field": "project_id", "op": "eq", "value": tenant_id },
                { "field": "timestamp", "op": "ge", "value": from.format(DATE_FORMAT).to_string() },
                { "field": "timestamp", "op": "lt", "value": window.end.format(DATE_FORMAT).to_string() },
            ]
        })
    }

    async fn fetch_once(
        &self,
        tenant_id: &str,
        meter: &str,
        window: &BillingWindow,
    ) -> Result<Vec<UsageSample>, backoff::Error<BillingError>> {
        let url = format!("{}/v2/meters/{}", self.base_url, meter);
        let mut request = self
            .http
            .get(&url)
            .json(&self.query_filters(tenant_id, window));
        if let Some(token) = &self.auth_token {
            request = request.header("X-Auth-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| backoff::Error::transient(BillingError::from(e)))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<Vec<UsageSample>>()
                .await
                .map_err(|e| backoff::Error::permanent(BillingError::from(e)))
        } else {
            let err = BillingError::Fetch {
                message: format!("{} returned {}", url, status),
            };
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                warn!(meter = %meter, status = %status, "Transient metering failure, will retry");
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            }
        }
    }
}

#[async_trait]
impl UsageFetcher for MeteringClient {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, meter = %meter))]
    async fn fetch(
        &self,
        tenant_id: &str,
        meter: &str,
        window: &BillingWindow,
    ) -> Result<Vec<UsageSample>, BillingError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_budget),
            ..ExponentialBackoff::default()
        };

        let samples = backoff::future::retry(backoff, || self.fetch_once(tenant_id, meter, window))
            .await?;

        debug!(samples = samples.len(), "Fetched usage samples");
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn query_filters_apply_lead_in_and_strict_upper_bound() {
        let client = MeteringClient::new(&MeteringConfig {
            url: "http://metering:8777".to_string(),
            auth_token: None,
            lead_in_minutes: 10,
            request_timeout_secs: 30,
            retry_budget_secs: 60,
        })
        .unwrap();

        let window = BillingWindow::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();

        let filters = client.query_filters("tenant-1", &window);
        let q = filters["q"].as_array().unwrap();
        assert_eq!(q[0]["value"], "tenant-1");
        assert_eq!(q[1]["op"], "ge");
        assert_eq!(q[1]["value"], "2026-02-28T23:50:00");
        assert_eq!(q[2]["op"], "lt");
        assert_eq!(q[2]["value"], "2026-04-01T00:00:00");
    }
}
