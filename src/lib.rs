//! Usage rating and invoice generation for metered multi-tenant clouds.
//!
//! Raw usage is pulled from a metering service, committed to an
//! overlap-checked usage ledger, rated against a price list, and written
//! out as a closed invoice artifact with a matching sales-order record.

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod services;
