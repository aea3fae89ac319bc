use crate::error::{AppError, AppResult};

use super::models::{BillingSettings, PlanTier, PricedTier, UsageSnapshot};

/// Outcome of a tier resolution: the full priced table plus which entry is
/// active for the measured usage.
#[derive(Debug, Clone)]
pub struct TierResolution {
    pub tiers: Vec<PricedTier>,
    pub active_index: usize,
}

impl TierResolution {
    pub fn active(&self) -> &PricedTier {
        &self.tiers[self.active_index]
    }
}

/// key: metering-resolver -> deterministic tier selection and pricing
///
/// Pure function: no I/O, no hidden state. The active tier is the first whose
/// `usage_limit` covers the product count; usage beyond the highest tier is
/// charged per unit instead of rejected. A malformed catalog (duplicate
/// limits, negative amounts) fails loudly rather than picking an arbitrary
/// tier.
pub fn resolve(
    usage: &UsageSnapshot,
    mut tiers: Vec<PlanTier>,
    settings: &BillingSettings,
) -> AppResult<TierResolution> {
    if tiers.is_empty() {
        return Err(AppError::Configuration("plan catalog is empty".into()));
    }
    for tier in &tiers {
        if tier.base_price_cents < 0 || tier.overage_unit_cost_cents < 0 {
            return Err(AppError::Configuration(format!(
                "tier {} has a negative amount",
                tier.code
            )));
        }
        if tier.usage_limit < 0 {
            return Err(AppError::Configuration(format!(
                "tier {} has a negative usage limit",
                tier.code
            )));
        }
    }

    tiers.sort_by_key(|tier| tier.usage_limit);
    if let Some(pair) = tiers
        .windows(2)
        .find(|pair| pair[0].usage_limit == pair[1].usage_limit)
    {
        return Err(AppError::Configuration(format!(
            "tiers {} and {} share usage limit {}",
            pair[0].code, pair[1].code, pair[0].usage_limit
        )));
    }

    let surcharge = (usage.user_count - 1).max(0) * settings.extra_user_unit_cost_cents
        + (usage.branch_count - 1).max(0) * settings.extra_branch_unit_cost_cents;

    let last = tiers.len() - 1;
    let tiers: Vec<PricedTier> = tiers
        .into_iter()
        .enumerate()
        .map(|(index, tier)| {
            let over_limit = usage.product_count > tier.usage_limit;
            let mut simulated_total_cents = tier.base_price_cents + surcharge;
            if index == last && over_limit {
                simulated_total_cents +=
                    (usage.product_count - tier.usage_limit) * tier.overage_unit_cost_cents;
            }
            PricedTier {
                tier,
                simulated_total_cents,
                over_limit,
            }
        })
        .collect();

    let active_index = tiers
        .iter()
        .position(|priced| usage.product_count <= priced.tier.usage_limit)
        .unwrap_or(last);

    Ok(TierResolution {
        tiers,
        active_index,
    })
}
