use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: metering-models -> plan catalog entry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PlanTier {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub base_price_cents: i64,
    pub usage_limit: i64,
    /// Per-unit charge for products beyond `usage_limit`; zero for every
    /// tier except the highest.
    pub overage_unit_cost_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// A catalog tier with its simulated total for the current usage. Derived
/// per request, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct PricedTier {
    #[serde(flatten)]
    pub tier: PlanTier,
    pub simulated_total_cents: i64,
    pub over_limit: bool,
}

/// Measured usage, read fresh on every request.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageSnapshot {
    pub product_count: i64,
    pub branch_count: i64,
    pub user_count: i64,
}

/// Flat per-unit surcharges added to every tier's base price.
#[derive(Debug, Clone, Copy, Default)]
pub struct BillingSettings {
    pub extra_user_unit_cost_cents: i64,
    pub extra_branch_unit_cost_cents: i64,
}

/// key: metering-models -> account billing state
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AccountProfile {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Currently applied plan tier code; the only column the metering core
    /// writes.
    pub selected_plan: String,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
}

impl AccountProfile {
    /// Human-readable name for invoice references; falls back to the email
    /// local part when no name is on file.
    pub fn display_name(&self) -> String {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let name = name.trim();
        if name.is_empty() {
            self.email.split('@').next().unwrap_or("account").to_string()
        } else {
            name.to_string()
        }
    }
}

/// key: metering-models -> issued invoice
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    pub account_id: Uuid,
    pub period: String,
    pub amount_cents: i64,
    pub status: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub payment_reference: String,
    pub reminder_count: i32,
    pub created_at: DateTime<Utc>,
}
