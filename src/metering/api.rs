use axum::{extract::Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::invoicing::InvoiceIssuer;
use super::models::{AccountProfile, PlanTier, PricedTier, UsageSnapshot};
use super::resolver::{self, TierResolution};
use super::usage::UsageReader;

/// key: metering-api -> usage/license endpoint
///
/// Pipeline: profile read, concurrent usage snapshot, pure tier resolution,
/// tier/invoice reconciliation, envelope assembly. The rate limit gate runs
/// as middleware before this handler.
pub async fn usage_license(
    Extension(pool): Extension<PgPool>,
    AuthUser { account_id }: AuthUser,
) -> AppResult<Json<LicenseEnvelope>> {
    let profile = sqlx::query_as::<_, AccountProfile>(
        "SELECT id, email, first_name, last_name, selected_plan, blocked, created_at \
         FROM profiles WHERE id = $1",
    )
    .bind(account_id)
    .fetch_optional(&pool)
    .await
    .map_err(|err| {
        tracing::error!(?err, %account_id, stage = "profile-read", "profile query failed");
        AppError::DataUnavailable("account profile could not be read".into())
    })?
    .ok_or(AppError::Unauthorized)?;

    if profile.blocked {
        tracing::warn!(%account_id, "blocked account refused");
        return Err(AppError::Unauthorized);
    }

    let tiers = sqlx::query_as::<_, PlanTier>(
        "SELECT id, code, name, base_price_cents, usage_limit, overage_unit_cost_cents, created_at \
         FROM plan_tiers",
    )
    .fetch_all(&pool)
    .await
    .map_err(|err| {
        tracing::error!(?err, %account_id, stage = "catalog-read", "plan catalog query failed");
        AppError::DataUnavailable("plan catalog could not be read".into())
    })?;

    let reader = UsageReader::new(pool.clone());
    let usage = reader.load(account_id).await?;
    let settings = reader.settings().await?;

    let resolution = resolver::resolve(&usage, tiers, &settings)?;

    let issuer = InvoiceIssuer::new(pool);
    issuer
        .reconcile(
            &profile,
            resolution.active(),
            config::BASELINE_PLAN_CODE.as_str(),
            Utc::now(),
        )
        .await?;

    Ok(Json(assemble(&profile, usage, resolution)))
}

/// Pure mapping from resolved state to the client payload.
pub fn assemble(
    profile: &AccountProfile,
    usage: UsageSnapshot,
    resolution: TierResolution,
) -> LicenseEnvelope {
    let active = resolution.active();
    let active_plan_id = active.tier.code.clone();
    let license = LicenseDescriptor {
        license_type: active.tier.name.clone(),
        monthly_price_cents: active.simulated_total_cents,
        is_active: true,
    };
    LicenseEnvelope {
        account_created_at: profile.created_at,
        license,
        usage: UsageCounters {
            total_products: usage.product_count,
            total_branches: usage.branch_count,
            total_users: usage.user_count,
        },
        available_plans: resolution.tiers,
        // mirrors active_plan_id today; kept separate so a future
        // recommendation pass can diverge from the applied tier
        recommended_plan_id: active_plan_id.clone(),
        active_plan_id,
    }
}

#[derive(Debug, Serialize)]
pub struct LicenseEnvelope {
    pub account_created_at: DateTime<Utc>,
    pub license: LicenseDescriptor,
    pub usage: UsageCounters,
    pub available_plans: Vec<PricedTier>,
    pub active_plan_id: String,
    pub recommended_plan_id: String,
}

#[derive(Debug, Serialize)]
pub struct LicenseDescriptor {
    pub license_type: String,
    pub monthly_price_cents: i64,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct UsageCounters {
    pub total_products: i64,
    pub total_branches: i64,
    pub total_users: i64,
}
