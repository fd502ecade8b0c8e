//! Services module for the billing pipeline.

pub mod billing_run;
pub mod database;
pub mod fetcher;
pub mod identity;
pub mod rates;
pub mod rating;

pub use billing_run::{BillingRunner, RunSummary, TenantRunReport};
pub use database::Database;
pub use fetcher::{MeteringClient, UsageFetcher, UsageSample};
pub use identity::{IdentityClient, TenantProvider};
pub use rates::RateTable;
pub use rating::rate_usage;
