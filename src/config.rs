//! Billing run configuration.
//!
//! All settings flow through an explicit [`BillingConfig`] handed to each
//! component's constructor; there is no process-wide mutable state.

use std::path::PathBuf;

use config::{Config as Cfg, File};
use serde::Deserialize;

use crate::error::BillingError;

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub database: DatabaseConfig,
    pub metering: MeteringConfig,
    pub identity: IdentityConfig,
    pub rating: RatingConfig,
    pub output: OutputConfig,
    /// Tenants excluded from billing entirely, by name.
    #[serde(default)]
    pub ignore_tenants: Vec<String>,
    /// Meters queried per tenant; the meter name doubles as the ledger
    /// service name.
    #[serde(default = "default_meters")]
    pub meters: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MeteringConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Minutes of lead-in queried before the billing window so usage that
    /// began earlier but is still active is captured.
    #[serde(default = "default_lead_in_minutes")]
    pub lead_in_minutes: i64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Total time budget for retrying a transient fetch failure before it
    /// becomes fatal for that resource.
    #[serde(default = "default_retry_budget_secs")]
    pub retry_budget_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RatingConfig {
    pub rates_file: PathBuf,
    #[serde(default = "default_region")]
    pub region: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Invoice filename template; `{tenant}`, `{start}` and `{end}` are
    /// substituted per billing run.
    #[serde(default = "default_output_file")]
    pub file_template: String,
}

fn default_service_name() -> String {
    "usage-billing".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_lead_in_minutes() -> i64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_budget_secs() -> u64 {
    60
}

fn default_region() -> String {
    "wellington".to_string()
}

fn default_output_file() -> String {
    "{tenant}-{start}-{end}.csv".to_string()
}

fn default_meters() -> Vec<String> {
    vec![
        "instance".to_string(),
        "volume.size".to_string(),
        "bandwidth-out".to_string(),
    ]
}

impl BillingConfig {
    /// Load configuration from an optional `configuration` file plus
    /// `APP__`-prefixed environment variables.
    pub fn from_env() -> Result<Self, BillingError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
