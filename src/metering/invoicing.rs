use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::models::{AccountProfile, PricedTier};

/// key: metering-invoicing -> tier persistence and per-period invoice issuance
#[derive(Clone)]
pub struct InvoiceIssuer {
    pool: PgPool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReconcileOutcome {
    pub tier_changed: bool,
    pub invoice_created: bool,
}

/// Calendar month used as the invoice idempotency key.
pub fn billing_period(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

/// Deterministic, human-traceable payment reference. Advisory only; the
/// `(account_id, period)` constraint is what enforces uniqueness.
pub fn payment_reference(email: &str, display_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update([0x1f]);
    hasher.update(display_name.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let initials: String = display_name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .map(|c| c.to_ascii_uppercase())
        .take(3)
        .collect();
    let initials = if initials.is_empty() {
        "SF".to_string()
    } else {
        initials
    };
    format!("SF-{}-{}", initials, digest[..8].to_uppercase())
}

impl InvoiceIssuer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persists the resolved tier when it differs from the stored one and,
    /// independently of any tier transition, makes sure a paid resolution has
    /// an invoice for the current period. Gating issuance on the billing
    /// period instead of the free-to-paid edge means a failed insert is
    /// retried on the next request within the same period.
    pub async fn reconcile(
        &self,
        profile: &AccountProfile,
        resolved: &PricedTier,
        baseline_code: &str,
        now: DateTime<Utc>,
    ) -> AppResult<ReconcileOutcome> {
        let tier_changed = profile.selected_plan != resolved.tier.code;
        if tier_changed {
            sqlx::query("UPDATE profiles SET selected_plan = $1, updated_at = NOW() WHERE id = $2")
                .bind(&resolved.tier.code)
                .bind(profile.id)
                .execute(&self.pool)
                .await
                .map_err(|err| {
                    tracing::error!(
                        ?err,
                        account_id = %profile.id,
                        stage = "tier-persist",
                        "failed to persist resolved tier"
                    );
                    AppError::Db(err)
                })?;
            tracing::info!(
                account_id = %profile.id,
                from = %profile.selected_plan,
                to = %resolved.tier.code,
                "stored plan tier updated"
            );
        }

        let mut invoice_created = false;
        if resolved.tier.code != baseline_code {
            invoice_created = self.ensure_invoice(profile, resolved, now).await?;
        }

        Ok(ReconcileOutcome {
            tier_changed,
            invoice_created,
        })
    }

    async fn ensure_invoice(
        &self,
        profile: &AccountProfile,
        resolved: &PricedTier,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let period = billing_period(now);

        // Cheap pre-check; the unique constraint below is the actual
        // idempotency guarantee under concurrency.
        let existing: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM invoices WHERE account_id = $1 AND period = $2")
                .bind(profile.id)
                .bind(&period)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let invoice_date = now.date_naive();
        let due_date = invoice_date + Duration::days(14);
        let reference = payment_reference(&profile.email, &profile.display_name());

        let result = sqlx::query(
            r#"
            INSERT INTO invoices (
                account_id,
                period,
                amount_cents,
                status,
                invoice_date,
                due_date,
                payment_reference,
                reminder_count
            ) VALUES ($1, $2, $3, 'open', $4, $5, $6, 0)
            ON CONFLICT (account_id, period) DO NOTHING
            "#,
        )
        .bind(profile.id)
        .bind(&period)
        .bind(resolved.simulated_total_cents)
        .bind(invoice_date)
        .bind(due_date)
        .bind(&reference)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            tracing::error!(
                ?err,
                account_id = %profile.id,
                %period,
                stage = "invoice-insert",
                "failed to insert invoice"
            );
            AppError::Db(err)
        })?;

        if result.rows_affected() == 0 {
            // a concurrent request issued it first; idempotent success
            tracing::debug!(account_id = %profile.id, %period, "invoice already present");
            return Ok(false);
        }

        tracing::info!(
            account_id = %profile.id,
            %period,
            amount_cents = resolved.simulated_total_cents,
            reference = %reference,
            "invoice issued"
        );
        Ok(true)
    }
}
