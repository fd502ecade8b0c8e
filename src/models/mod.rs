//! Data model for the usage ledger and invoice pipeline.

pub mod invoice;
pub mod sales_order;
pub mod tenant;
pub mod usage;

pub use invoice::{Invoice, LineGroup, RatedLine, RatedResource};
pub use sales_order::SalesOrder;
pub use tenant::{Resource, Tenant, TenantRecord};
pub use usage::{BillingWindow, RecordUsage, UsageEntry, DATE_FORMAT};
