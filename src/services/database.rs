//! Database service: the usage ledger and sales-order ledger.
//!
//! The non-overlap invariants live in the storage layer itself (Postgres
//! `EXCLUDE USING gist` range constraints, see the migrations) rather than
//! as application-level check-then-insert, so two concurrent billing runs
//! colliding on the same window resolve to exactly one success and one
//! overlap error.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::{
    BillingWindow, RecordUsage, Resource, SalesOrder, Tenant, TenantRecord, UsageEntry,
};

/// SQLSTATE raised by Postgres when an exclusion constraint rejects a row.
const EXCLUSION_VIOLATION: &str = "23P01";

fn is_exclusion_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(EXCLUSION_VIOLATION)
    )
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "usage-billing"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, BillingError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), BillingError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), BillingError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BillingError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Begin a transaction, used to couple sales-order commits to a
    /// successful invoice close.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, BillingError> {
        self.pool.begin().await.map_err(|e| {
            BillingError::Database(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    // -------------------------------------------------------------------------
    // Tenant and resource metadata
    // -------------------------------------------------------------------------

    /// Insert or refresh a tenant from the identity provider.
    #[instrument(skip(self, record), fields(tenant_id = %record.id))]
    pub async fn upsert_tenant(&self, record: &TenantRecord) -> Result<Tenant, BillingError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (id, name, info)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = $2, info = $3
            RETURNING id, name, info, active, created_utc
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to upsert tenant: {}", e)))?;

        Ok(tenant)
    }

    /// Insert or refresh a resource discovered from metering samples.
    #[instrument(skip(self, metadata), fields(tenant_id = %tenant_id, resource_id = %resource_id))]
    pub async fn upsert_resource(
        &self,
        tenant_id: &str,
        resource_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<Resource, BillingError> {
        let resource = sqlx::query_as::<_, Resource>(
            r#"
            INSERT INTO resources (id, tenant_id, metadata)
            VALUES ($1, $2, $3)
            ON CONFLICT (id, tenant_id) DO UPDATE SET metadata = $3
            RETURNING id, tenant_id, metadata, created_utc
            "#,
        )
        .bind(resource_id)
        .bind(tenant_id)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            BillingError::Database(anyhow::anyhow!("Failed to upsert resource: {}", e))
        })?;

        Ok(resource)
    }

    /// Resources with usage intersecting the window, ascending by id, so
    /// billing runs render lines in a reproducible order.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn billed_resources(
        &self,
        tenant_id: &str,
        window: &BillingWindow,
    ) -> Result<Vec<Resource>, BillingError> {
        let resources = sqlx::query_as::<_, Resource>(
            r#"
            SELECT r.id, r.tenant_id, r.metadata, r.created_utc
            FROM resources r
            WHERE r.tenant_id = $1
              AND EXISTS (
                  SELECT 1 FROM usage_entries u
                  WHERE u.tenant_id = r.tenant_id
                    AND u.resource_id = r.id
                    AND u.start_time < $3
                    AND u.end_time > $2
              )
            ORDER BY r.id
            "#,
        )
        .bind(tenant_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to list resources: {}", e)))?;

        Ok(resources)
    }

    // -------------------------------------------------------------------------
    // Usage ledger
    // -------------------------------------------------------------------------

    /// Record a usage window in the ledger.
    ///
    /// A single INSERT; the table's exclusion constraint rejects any row
    /// whose interval intersects an existing entry for the same
    /// (tenant, resource, service), which maps to [`BillingError::Overlap`].
    #[instrument(
        skip(self, input),
        fields(tenant_id = %input.tenant_id, resource_id = %input.resource_id, service = %input.service)
    )]
    pub async fn record_usage(&self, input: &RecordUsage) -> Result<UsageEntry, BillingError> {
        let entry_id = Uuid::new_v4();
        let entry = sqlx::query_as::<_, UsageEntry>(
            r#"
            INSERT INTO usage_entries (entry_id, tenant_id, resource_id, service, volume, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING entry_id, tenant_id, resource_id, service, volume, start_time, end_time, created_utc
            "#,
        )
        .bind(entry_id)
        .bind(&input.tenant_id)
        .bind(&input.resource_id)
        .bind(&input.service)
        .bind(input.volume)
        .bind(input.window.start)
        .bind(input.window.end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_exclusion_violation(&e) {
                BillingError::Overlap {
                    tenant_id: input.tenant_id.clone(),
                    resource_id: input.resource_id.clone(),
                    service: input.service.clone(),
                }
            } else {
                BillingError::Database(anyhow::anyhow!("Failed to record usage: {}", e))
            }
        })?;

        info!(
            entry_id = %entry.entry_id,
            volume = %entry.volume,
            "Usage recorded"
        );

        Ok(entry)
    }

    /// Usage entries for one service intersecting the window, ascending by
    /// start time.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, resource_id = %resource_id, service = %service))]
    pub async fn query_usage(
        &self,
        tenant_id: &str,
        resource_id: &str,
        service: &str,
        window: &BillingWindow,
    ) -> Result<Vec<UsageEntry>, BillingError> {
        let entries = sqlx::query_as::<_, UsageEntry>(
            r#"
            SELECT entry_id, tenant_id, resource_id, service, volume, start_time, end_time, created_utc
            FROM usage_entries
            WHERE tenant_id = $1
              AND resource_id = $2
              AND service = $3
              AND start_time < $5
              AND end_time > $4
            ORDER BY start_time
            "#,
        )
        .bind(tenant_id)
        .bind(resource_id)
        .bind(service)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to query usage: {}", e)))?;

        Ok(entries)
    }

    /// Distinct services recorded for a resource in the window, ascending,
    /// used to enumerate invoice lines.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, resource_id = %resource_id))]
    pub async fn usage_services(
        &self,
        tenant_id: &str,
        resource_id: &str,
        window: &BillingWindow,
    ) -> Result<Vec<String>, BillingError> {
        let services: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT service
            FROM usage_entries
            WHERE tenant_id = $1
              AND resource_id = $2
              AND start_time < $4
              AND end_time > $3
            ORDER BY service
            "#,
        )
        .bind(tenant_id)
        .bind(resource_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(anyhow::anyhow!("Failed to list services: {}", e)))?;

        Ok(services)
    }

    // -------------------------------------------------------------------------
    // Sales-order ledger
    // -------------------------------------------------------------------------

    /// Advisory pre-check: has this (tenant, resource) period already been
    /// invoiced? The exclusion constraint in [`Self::commit_sales_order`]
    /// remains the authoritative guard under concurrency.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, resource_id = %resource_id))]
    pub async fn period_already_billed(
        &self,
        tenant_id: &str,
        resource_id: &str,
        window: &BillingWindow,
    ) -> Result<bool, BillingError> {
        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT order_id
            FROM sales_orders
            WHERE tenant_id = $1
              AND resource_id = $2
              AND start_time < $4
              AND end_time > $3
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(resource_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            BillingError::Database(anyhow::anyhow!("Failed to check sales orders: {}", e))
        })?;

        Ok(existing.is_some())
    }

    /// Mark a (tenant, resource) period as invoiced, inside the caller's
    /// transaction so the commit rides or falls with the invoice close.
    /// An overlapping period maps to [`BillingError::AlreadyBilled`].
    pub async fn commit_sales_order(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: &str,
        resource_id: &str,
        window: &BillingWindow,
    ) -> Result<SalesOrder, BillingError> {
        let order_id = Uuid::new_v4();
        let order = sqlx::query_as::<_, SalesOrder>(
            r#"
            INSERT INTO sales_orders (order_id, tenant_id, resource_id, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING order_id, tenant_id, resource_id, start_time, end_time, created_utc
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .bind(resource_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if is_exclusion_violation(&e) {
                BillingError::AlreadyBilled {
                    tenant_id: tenant_id.to_string(),
                    resource_id: resource_id.to_string(),
                }
            } else {
                BillingError::Database(anyhow::anyhow!("Failed to commit sales order: {}", e))
            }
        })?;

        Ok(order)
    }
}
