pub mod api;
pub mod invoicing;
pub mod models;
pub mod resolver;
pub mod usage;

pub use api::{assemble, usage_license, LicenseDescriptor, LicenseEnvelope, UsageCounters};
pub use invoicing::{billing_period, payment_reference, InvoiceIssuer, ReconcileOutcome};
pub use models::{AccountProfile, BillingSettings, Invoice, PlanTier, PricedTier, UsageSnapshot};
pub use resolver::{resolve, TierResolution};
pub use usage::UsageReader;
