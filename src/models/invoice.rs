//! Invoice builder and rated line models.
//!
//! An [`Invoice`] is a transient, single-use builder owned by the billing
//! run that created it. It moves Open -> Closed exactly once; closing
//! writes the delimited artifact and freezes the line collection.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::config::OutputConfig;
use crate::error::BillingError;
use crate::models::usage::{BillingWindow, DATE_FORMAT};

/// One rated invoice line: a service's usage, unit rate, and exact cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatedLine {
    pub service: String,
    pub volume: Decimal,
    pub rate: Decimal,
    pub cost: Decimal,
}

/// All rated lines for one resource plus the exact (unrounded) subtotal.
#[derive(Debug, Clone, Serialize)]
pub struct RatedResource {
    pub resource_id: String,
    pub lines: Vec<RatedLine>,
    pub subtotal: Decimal,
}

/// Round a monetary amount to two decimal places for display. Applied only
/// at output time; running totals keep full precision.
pub fn display_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Ordered lines for one resource type.
#[derive(Debug, Clone)]
pub struct LineGroup {
    pub resource_type: String,
    pub lines: Vec<Vec<String>>,
}

#[derive(Debug)]
pub struct Invoice {
    tenant: String,
    window: BillingWindow,
    groups: Vec<LineGroup>,
    total: Decimal,
    closed: bool,
}

impl Invoice {
    pub fn new(tenant: &str, window: BillingWindow) -> Self {
        Self {
            tenant: tenant.to_string(),
            window,
            groups: Vec::new(),
            total: Decimal::ZERO,
            closed: false,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn window(&self) -> &BillingWindow {
        &self.window
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Exact running total across all resource subtotals.
    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn groups(&self) -> &[LineGroup] {
        &self.groups
    }

    /// Append a line to the given resource type's group. Groups are kept in
    /// first-insertion order.
    pub fn add_line(&mut self, resource_type: &str, fields: Vec<String>) -> Result<(), BillingError> {
        if self.closed {
            return Err(BillingError::InvoiceClosed);
        }
        match self
            .groups
            .iter_mut()
            .find(|g| g.resource_type == resource_type)
        {
            Some(group) => group.lines.push(fields),
            None => self.groups.push(LineGroup {
                resource_type: resource_type.to_string(),
                lines: vec![fields],
            }),
        }
        Ok(())
    }

    /// Fold a resource's exact subtotal into the invoice total. Rounding
    /// happens once, at render time.
    pub fn add_subtotal(&mut self, subtotal: Decimal) -> Result<(), BillingError> {
        if self.closed {
            return Err(BillingError::InvoiceClosed);
        }
        self.total += subtotal;
        Ok(())
    }

    /// Render the artifact: header framing, each group's lines in insertion
    /// order separated by blank lines, then the grand total rounded once.
    pub fn render(&self) -> String {
        let mut rows: Vec<String> = Vec::new();
        rows.push(",from,until".to_string());
        rows.push(format!(
            "usage range:,{},{}",
            self.window.start.format(DATE_FORMAT),
            self.window.end.format(DATE_FORMAT)
        ));
        rows.push(String::new());

        for group in &self.groups {
            for line in &group.lines {
                rows.push(line.join(","));
            }
            rows.push(String::new());
        }

        rows.push(String::new());
        rows.push(format!("invoice total cost:,{}", display_amount(self.total)));
        rows.push(String::new());
        rows.join("\n")
    }

    /// Close the invoice and write the artifact to `path`.
    ///
    /// Refuses to overwrite an existing file: invoices are write-once. After
    /// a successful close every further mutation fails with
    /// [`BillingError::InvoiceClosed`]. A failed write leaves the invoice
    /// open so the surrounding transaction can roll back and retry.
    pub fn close(&mut self, path: &Path) -> Result<(), BillingError> {
        if self.closed {
            return Err(BillingError::InvoiceClosed);
        }
        if path.exists() {
            return Err(BillingError::ArtifactExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        self.closed = true;
        Ok(())
    }
}

/// Resolve the artifact path for a tenant's billing window from the
/// configured filename template.
pub fn artifact_path(output: &OutputConfig, tenant: &str, window: &BillingWindow) -> PathBuf {
    let filename = output
        .file_template
        .replace("{tenant}", tenant)
        .replace("{start}", &format_stamp(window.start))
        .replace("{end}", &format_stamp(window.end));
    output.directory.join(filename)
}

fn format_stamp(ts: DateTime<Utc>) -> String {
    ts.format(DATE_FORMAT).to_string()
}
