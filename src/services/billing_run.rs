//! Billing run orchestrator.
//!
//! One run per tenant and billing window: fetch raw usage, commit it to the
//! usage ledger (the overlap constraint deduplicates re-runs), rate what the
//! ledger holds, and emit a closed invoice artifact with the sales-order
//! commit riding the same transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::models::invoice::{artifact_path, display_amount};
use crate::models::{BillingWindow, Invoice, RecordUsage, Resource, TenantRecord};
use crate::services::database::Database;
use crate::services::fetcher::{UsageFetcher, UsageSample};
use crate::services::identity::TenantProvider;
use crate::services::rates::RateTable;
use crate::services::rating::rate_usage;

/// Per-tenant outcome counters for one billing run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub resources_processed: u32,
    pub resources_billed: u32,
    pub resources_failed: u32,
    pub resources_skipped: u32,
    /// Failure reasons keyed by subject: a resource id, or `meter:<name>`
    /// when a whole meter's fetch failed before its resources were known.
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    pub fn billed_any(&self) -> bool {
        self.resources_billed > 0
    }

    /// Everything that was attempted failed, including runs where every
    /// fetch failed before any resource could be processed.
    pub fn fully_failed(&self) -> bool {
        self.resources_billed == 0 && self.resources_skipped == 0 && !self.failures.is_empty()
    }
}

/// Outcome of one tenant's billing run within a full run.
#[derive(Debug)]
pub struct TenantRunReport {
    pub tenant_id: String,
    pub tenant_name: String,
    pub outcome: Result<RunSummary, BillingError>,
}

pub struct BillingRunner {
    db: Arc<Database>,
    rates: RateTable,
    config: BillingConfig,
}

impl BillingRunner {
    pub fn new(db: Arc<Database>, rates: RateTable, config: BillingConfig) -> Self {
        Self { db, rates, config }
    }

    /// Bill every tenant the provider reports, minus the configured
    /// ignore-list. Tenant runs are independent: one tenant's failure does
    /// not stop the others.
    pub async fn bill_all(
        &self,
        fetcher: &dyn UsageFetcher,
        provider: &dyn TenantProvider,
        window: &BillingWindow,
    ) -> Result<Vec<TenantRunReport>, BillingError> {
        let tenants = provider.list_tenants().await?;
        let mut reports = Vec::with_capacity(tenants.len());

        for tenant in tenants {
            if self.config.ignore_tenants.contains(&tenant.name) {
                debug!(tenant_id = %tenant.id, tenant_name = %tenant.name, "Tenant ignored by config");
                continue;
            }
            let outcome = self.bill_tenant(fetcher, &tenant, window).await;
            if let Err(e) = &outcome {
                warn!(tenant_id = %tenant.id, error = %e, "Tenant billing run failed");
            }
            reports.push(TenantRunReport {
                tenant_id: tenant.id.clone(),
                tenant_name: tenant.name.clone(),
                outcome,
            });
        }

        Ok(reports)
    }

    /// Run the full pipeline for one tenant.
    #[instrument(skip(self, fetcher, tenant), fields(tenant_id = %tenant.id, tenant_name = %tenant.name))]
    pub async fn bill_tenant(
        &self,
        fetcher: &dyn UsageFetcher,
        tenant: &TenantRecord,
        window: &BillingWindow,
    ) -> Result<RunSummary, BillingError> {
        let mut summary = RunSummary::default();

        self.db.upsert_tenant(tenant).await?;
        self.ingest_usage(fetcher, tenant, window, &mut summary)
            .await?;

        // Rate everything the ledger holds for this window, resource by
        // resource in ascending id order so artifacts are reproducible.
        let resources = self.db.billed_resources(&tenant.id, window).await?;
        let mut invoice = Invoice::new(&tenant.name, *window);
        let mut billed: Vec<String> = Vec::new();

        for resource in &resources {
            summary.resources_processed += 1;

            if self
                .db
                .period_already_billed(&tenant.id, &resource.id, window)
                .await?
            {
                debug!(resource_id = %resource.id, "Period already invoiced, skipping");
                summary.resources_skipped += 1;
                continue;
            }

            match self.bill_resource(resource, window, &mut invoice).await {
                Ok(subtotal) => {
                    info!(resource_id = %resource.id, subtotal = %subtotal, "Resource rated");
                    billed.push(resource.id.clone());
                    summary.resources_billed += 1;
                }
                Err(e) => {
                    warn!(resource_id = %resource.id, error = %e, "Resource billing failed");
                    summary.resources_failed += 1;
                    summary.failures.push((resource.id.clone(), e.to_string()));
                }
            }
        }

        if billed.is_empty() {
            info!("No billable resources in window");
            return Ok(summary);
        }

        self.commit_invoice(tenant, window, invoice, &billed).await?;

        info!(
            resources_processed = summary.resources_processed,
            resources_billed = summary.resources_billed,
            resources_failed = summary.resources_failed,
            resources_skipped = summary.resources_skipped,
            "Billing run complete"
        );

        Ok(summary)
    }

    /// Fetch raw usage for every configured meter and commit it to the
    /// usage ledger. An overlap rejection means the window was already
    /// ingested by a previous run and is treated as success.
    async fn ingest_usage(
        &self,
        fetcher: &dyn UsageFetcher,
        tenant: &TenantRecord,
        window: &BillingWindow,
        summary: &mut RunSummary,
    ) -> Result<(), BillingError> {
        for meter in &self.config.meters {
            let samples = match fetcher.fetch(&tenant.id, meter, window).await {
                Ok(samples) => samples,
                Err(e) => {
                    // Fatal for this meter's resources only.
                    warn!(meter = %meter, error = %e, "Usage fetch failed");
                    summary
                        .failures
                        .push((format!("meter:{}", meter), e.to_string()));
                    continue;
                }
            };

            for (resource_id, group) in group_by_resource(samples) {
                let metadata = group
                    .last()
                    .map(|s| s.metadata.clone())
                    .unwrap_or_else(|| serde_json::json!({}));
                self.db
                    .upsert_resource(&tenant.id, &resource_id, &metadata)
                    .await?;

                let volume = window_volume(&group, window);
                let record = RecordUsage {
                    tenant_id: tenant.id.clone(),
                    resource_id: resource_id.clone(),
                    service: meter.clone(),
                    volume,
                    window: *window,
                };
                match self.db.record_usage(&record).await {
                    Ok(_) => {}
                    Err(BillingError::Overlap { .. }) => {
                        debug!(resource_id = %resource_id, service = %meter, "Window already ingested");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Rate one resource and append its invoice lines. Returns the exact
    /// subtotal folded into the invoice total.
    async fn bill_resource(
        &self,
        resource: &Resource,
        window: &BillingWindow,
        invoice: &mut Invoice,
    ) -> Result<Decimal, BillingError> {
        let services = self
            .db
            .usage_services(&resource.tenant_id, &resource.id, window)
            .await?;

        let mut entries = Vec::new();
        for service in &services {
            entries.extend(
                self.db
                    .query_usage(&resource.tenant_id, &resource.id, service, window)
                    .await?,
            );
        }

        let rated = rate_usage(&resource.id, &entries, &self.config.rating.region, &self.rates)?;

        let res_type = resource.resource_type().to_string();
        invoice.add_line(&res_type, vec![resource.id.clone()])?;

        // Metadata header/value rows, keyed deterministically.
        let metadata: BTreeMap<String, String> = resource
            .metadata
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(k, v)| {
                        let value = match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let headers: Vec<String> = metadata.keys().map(|k| format!("{}:", k)).collect();
        let values: Vec<String> = metadata.values().cloned().collect();
        invoice.add_line(&res_type, headers)?;
        invoice.add_line(&res_type, values)?;

        invoice.add_line(
            &res_type,
            vec![
                "service:".to_string(),
                "usage:".to_string(),
                "rate:".to_string(),
                "cost:".to_string(),
            ],
        )?;

        for line in &rated.lines {
            invoice.add_line(
                &res_type,
                vec![
                    line.service.clone(),
                    line.volume.to_string(),
                    line.rate.to_string(),
                    display_amount(line.cost).to_string(),
                ],
            )?;
        }

        invoice.add_line(
            &res_type,
            vec![
                "total cost:".to_string(),
                display_amount(rated.subtotal).to_string(),
            ],
        )?;
        invoice.add_line(&res_type, vec![])?;

        invoice.add_subtotal(rated.subtotal)?;
        Ok(rated.subtotal)
    }

    /// Commit sales orders for every billed resource and close the invoice
    /// in one transaction. The artifact write sits inside the transaction's
    /// lifetime: a failed write rolls the ledger back, and a failed commit
    /// after a successful write removes the artifact again.
    async fn commit_invoice(
        &self,
        tenant: &TenantRecord,
        window: &BillingWindow,
        mut invoice: Invoice,
        billed: &[String],
    ) -> Result<(), BillingError> {
        let path = artifact_path(&self.config.output, &tenant.name, window);
        let mut tx = self.db.begin().await?;

        for resource_id in billed {
            match Database::commit_sales_order(&mut tx, &tenant.id, resource_id, window).await {
                Ok(order) => {
                    debug!(order_id = %order.order_id, resource_id = %resource_id, "Sales order committed");
                }
                Err(e) => {
                    tx.rollback().await.ok();
                    return Err(e);
                }
            }
        }

        if let Err(e) = invoice.close(&path) {
            tx.rollback().await.ok();
            return Err(e);
        }

        if let Err(e) = tx.commit().await {
            // Compensating path: the artifact exists but the ledger does
            // not record the period, so remove the artifact again.
            std::fs::remove_file(&path).ok();
            return Err(BillingError::Database(anyhow::anyhow!(
                "Failed to commit sales orders: {}",
                e
            )));
        }

        info!(
            path = %path.display(),
            total = %display_amount(invoice.total()),
            resources = billed.len(),
            "Invoice closed"
        );
        Ok(())
    }
}

/// Volume billable to the window. Samples stamped before the window start
/// arrive via the fetch lead-in so still-active resources and their
/// metadata are discovered; their volume belongs to the previous window's
/// invoice and must not be counted again here.
fn window_volume(group: &[UsageSample], window: &BillingWindow) -> Decimal {
    group
        .iter()
        .filter(|s| s.timestamp >= window.start && s.timestamp < window.end)
        .map(|s| s.volume)
        .sum()
}

fn group_by_resource(samples: Vec<UsageSample>) -> BTreeMap<String, Vec<UsageSample>> {
    let mut groups: BTreeMap<String, Vec<UsageSample>> = BTreeMap::new();
    for sample in samples {
        groups.entry(sample.resource_id.clone()).or_default().push(sample);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn sample(resource_id: &str, volume: Decimal) -> UsageSample {
        UsageSample {
            resource_id: resource_id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            volume,
            metadata: serde_json::json!({ "type": "vm" }),
        }
    }

    #[test]
    fn samples_group_by_resource_in_stable_order() {
        let groups = group_by_resource(vec![
            sample("b", dec!(1)),
            sample("a", dec!(2)),
            sample("b", dec!(3)),
        ]);

        let keys: Vec<&String> = groups.keys().collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(groups["b"].len(), 2);

        let volume: Decimal = groups["b"].iter().map(|s| s.volume).sum();
        assert_eq!(volume, dec!(4));
    }

    #[test]
    fn lead_in_samples_carry_metadata_but_no_volume() {
        let window = BillingWindow::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();

        // Stamped inside the fetch lead-in, before the window opens: it
        // was already billed by the previous window's run.
        let mut pre_window = sample("a", dec!(5));
        pre_window.timestamp = Utc.with_ymd_and_hms(2026, 2, 28, 23, 55, 0).unwrap();
        let in_window = sample("a", dec!(7));

        let group = vec![pre_window, in_window];
        assert_eq!(window_volume(&group, &window), dec!(7));
    }

    #[test]
    fn summary_failure_classification() {
        let mut summary = RunSummary::default();
        assert!(!summary.fully_failed());

        summary.resources_failed = 2;
        summary
            .failures
            .push(("vm-1".to_string(), "no rate".to_string()));
        assert!(summary.fully_failed());

        summary.resources_billed = 1;
        assert!(!summary.fully_failed());
        assert!(summary.billed_any());
    }
}
