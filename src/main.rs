//! Batch billing run entry point.
//!
//! Usage: `usage-billing <window-start> <window-end>` with timestamps in
//! `%Y-%m-%dT%H:%M:%S` (UTC). Everything else comes from configuration.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use usage_billing::config::BillingConfig;
use usage_billing::models::{BillingWindow, DATE_FORMAT};
use usage_billing::observability::init_tracing;
use usage_billing::services::{BillingRunner, Database, IdentityClient, MeteringClient, RateTable};

fn parse_stamp(raw: &str) -> Result<chrono::DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = BillingConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(&config.log_level);

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} <window-start> <window-end>", args[0]);
        std::process::exit(2);
    }
    let window = parse_stamp(&args[1])
        .and_then(|start| {
            parse_stamp(&args[2]).and_then(|end| {
                BillingWindow::new(start, end).map_err(|e| e.to_string())
            })
        })
        .map_err(|e| {
            eprintln!("{}", e);
            std::io::Error::other(e)
        })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        window_start = %window.start.format(DATE_FORMAT),
        window_end = %window.end.format(DATE_FORMAT),
        region = %config.rating.region,
        "Starting billing run"
    );

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(to_io)?;
    db.health_check().await.map_err(to_io)?;
    db.run_migrations().await.map_err(to_io)?;

    let rates = RateTable::from_file(&config.rating.rates_file).map_err(to_io)?;
    let fetcher = MeteringClient::new(&config.metering).map_err(to_io)?;
    let provider = IdentityClient::new(&config.identity).map_err(to_io)?;

    let runner = BillingRunner::new(Arc::new(db), rates, config);
    let reports = runner
        .bill_all(&fetcher, &provider, &window)
        .await
        .map_err(to_io)?;

    let mut any_success = false;
    let mut any_failure = false;
    for report in &reports {
        match &report.outcome {
            Ok(summary) => {
                tracing::info!(
                    tenant_id = %report.tenant_id,
                    tenant_name = %report.tenant_name,
                    resources_processed = summary.resources_processed,
                    resources_billed = summary.resources_billed,
                    resources_failed = summary.resources_failed,
                    resources_skipped = summary.resources_skipped,
                    "Tenant run summary"
                );
                for (subject, reason) in &summary.failures {
                    tracing::warn!(tenant_id = %report.tenant_id, subject = %subject, reason = %reason, "Billing failure");
                }
                if summary.fully_failed() {
                    any_failure = true;
                } else {
                    any_success = true;
                }
            }
            Err(e) => {
                tracing::error!(tenant_id = %report.tenant_id, error = %e, "Tenant run failed");
                any_failure = true;
            }
        }
    }

    if any_failure && !any_success {
        tracing::error!("Billing run failed for all tenants");
        std::process::exit(1);
    }

    tracing::info!("Billing run complete");
    Ok(())
}

fn to_io(err: usage_billing::error::BillingError) -> std::io::Error {
    std::io::Error::other(err.to_string())
}
