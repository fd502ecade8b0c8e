//! Rating engine: converts raw usage entries into billable lines.
//!
//! Pure in-memory computation. All arithmetic stays in arbitrary-precision
//! decimals; rounding to two places happens only when lines are rendered.

use rust_decimal::Decimal;

use crate::error::BillingError;
use crate::models::{RatedLine, RatedResource, UsageEntry};
use crate::services::rates::RateTable;

/// Rate every usage entry for a resource: `cost = volume * rate`. The
/// returned subtotal is the exact, unrounded sum of costs so that invoice
/// totals never compound per-line rounding error.
pub fn rate_usage(
    resource_id: &str,
    entries: &[UsageEntry],
    region: &str,
    rates: &RateTable,
) -> Result<RatedResource, BillingError> {
    let mut lines = Vec::with_capacity(entries.len());
    let mut subtotal = Decimal::ZERO;

    for entry in entries {
        let rate = rates.rate(&entry.service, region)?;
        let cost = entry.volume * rate;
        subtotal += cost;
        lines.push(RatedLine {
            service: entry.service.clone(),
            volume: entry.volume,
            rate,
            cost,
        });
    }

    Ok(RatedResource {
        resource_id: resource_id.to_string(),
        lines,
        subtotal,
    })
}
