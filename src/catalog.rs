use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{BillingError, BillingResult};

pub const METRIC_EMAIL_SENDS: &str = "email_sends";
pub const METRIC_SMS_SENDS: &str = "sms_sends";
pub const METRIC_LANDING_PAGES: &str = "landing_pages";
pub const METRIC_SEATS: &str = "seats";
pub const METRIC_DOMAINS: &str = "domains";
pub const METRIC_AI_AGENTS: &str = "ai_agents";
pub const METRIC_CAMPAIGNS: &str = "campaigns";

pub const KNOWN_METRICS: &[&str] = &[
    METRIC_EMAIL_SENDS,
    METRIC_SMS_SENDS,
    METRIC_LANDING_PAGES,
    METRIC_SEATS,
    METRIC_DOMAINS,
    METRIC_AI_AGENTS,
    METRIC_CAMPAIGNS,
];

/// key: plan-catalog -> per-metric entitlement ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Limited(i64),
    Unlimited,
}

impl Limit {
    pub fn as_option(self) -> Option<i64> {
        match self {
            Limit::Limited(value) => Some(value),
            Limit::Unlimited => None,
        }
    }

    /// `Unlimited` ranks above every finite limit.
    fn exceeds(self, other: Limit) -> bool {
        match (self, other) {
            (Limit::Unlimited, Limit::Unlimited) => false,
            (Limit::Unlimited, Limit::Limited(_)) => true,
            (Limit::Limited(_), Limit::Unlimited) => false,
            (Limit::Limited(a), Limit::Limited(b)) => a > b,
        }
    }
}

/// key: plan-catalog -> static tier definitions
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Plan {
    pub id: &'static str,
    pub name: &'static str,
}

pub const PLAN_FREE: &str = "free";
pub const PLAN_STARTER: &str = "starter";
pub const PLAN_GROWTH: &str = "growth";
pub const PLAN_SCALE: &str = "scale";

/// Plans ordered by tier, cheapest first. The `suggested_upgrade` scan
/// depends on this ordering.
pub const PLANS: &[Plan] = &[
    Plan {
        id: PLAN_FREE,
        name: "Free",
    },
    Plan {
        id: PLAN_STARTER,
        name: "Starter",
    },
    Plan {
        id: PLAN_GROWTH,
        name: "Growth",
    },
    Plan {
        id: PLAN_SCALE,
        name: "Scale",
    },
];

/// key: billing-sku -> purchasable catalog entries
///
/// A SKU is either a plan change or an add-on bundle; the tag is resolved
/// once here so settlement is a plain match over the two cases.
#[derive(Debug, Clone, Copy)]
pub enum SkuKind {
    Plan { plan: &'static str },
    Addon { add_ons: &'static [(&'static str, i64)] },
}

#[derive(Debug, Clone, Copy)]
pub struct BillingSku {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: SkuKind,
    pub amount_cents: i64,
    pub currency: &'static str,
}

pub const SKUS: &[BillingSku] = &[
    BillingSku {
        id: "plan-starter-monthly",
        name: "Starter plan (monthly)",
        kind: SkuKind::Plan { plan: PLAN_STARTER },
        amount_cents: 2_900,
        currency: "USD",
    },
    BillingSku {
        id: "plan-growth-monthly",
        name: "Growth plan (monthly)",
        kind: SkuKind::Plan { plan: PLAN_GROWTH },
        amount_cents: 9_900,
        currency: "USD",
    },
    BillingSku {
        id: "plan-scale-monthly",
        name: "Scale plan (monthly)",
        kind: SkuKind::Plan { plan: PLAN_SCALE },
        amount_cents: 29_900,
        currency: "USD",
    },
    BillingSku {
        id: "addon-email-10k",
        name: "Extra 10,000 email sends",
        kind: SkuKind::Addon {
            add_ons: &[(METRIC_EMAIL_SENDS, 10_000)],
        },
        amount_cents: 1_500,
        currency: "USD",
    },
    BillingSku {
        id: "addon-sms-1k",
        name: "Extra 1,000 SMS sends",
        kind: SkuKind::Addon {
            add_ons: &[(METRIC_SMS_SENDS, 1_000)],
        },
        amount_cents: 1_900,
        currency: "USD",
    },
    BillingSku {
        id: "addon-seats-5",
        name: "Extra 5 seats",
        kind: SkuKind::Addon {
            add_ons: &[(METRIC_SEATS, 5)],
        },
        amount_cents: 2_500,
        currency: "USD",
    },
    BillingSku {
        id: "addon-pages-10",
        name: "Extra 10 landing pages",
        kind: SkuKind::Addon {
            add_ons: &[(METRIC_LANDING_PAGES, 10)],
        },
        amount_cents: 900,
        currency: "USD",
    },
];

pub fn find_plan(id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|plan| plan.id == id)
}

pub fn find_sku(id: &str) -> Option<&'static BillingSku> {
    SKUS.iter().find(|sku| sku.id == id)
}

/// key: limit-resolver -> base ceiling per plan and metric
///
/// Total over the known metric set; anything else is a configuration error
/// and fails closed rather than reading as unlimited.
pub fn base_limit(plan: &str, metric: &str) -> BillingResult<Limit> {
    if !KNOWN_METRICS.contains(&metric) {
        return Err(BillingError::UnknownMetric(metric.to_string()));
    }
    let table: &[(&str, Limit)] = match plan {
        PLAN_FREE => &[
            (METRIC_EMAIL_SENDS, Limit::Limited(200)),
            (METRIC_SMS_SENDS, Limit::Limited(0)),
            (METRIC_LANDING_PAGES, Limit::Limited(1)),
            (METRIC_SEATS, Limit::Limited(1)),
            (METRIC_DOMAINS, Limit::Limited(0)),
            (METRIC_AI_AGENTS, Limit::Limited(0)),
            (METRIC_CAMPAIGNS, Limit::Limited(2)),
        ],
        PLAN_STARTER => &[
            (METRIC_EMAIL_SENDS, Limit::Limited(5_000)),
            (METRIC_SMS_SENDS, Limit::Limited(500)),
            (METRIC_LANDING_PAGES, Limit::Limited(5)),
            (METRIC_SEATS, Limit::Limited(3)),
            (METRIC_DOMAINS, Limit::Limited(1)),
            (METRIC_AI_AGENTS, Limit::Limited(1)),
            (METRIC_CAMPAIGNS, Limit::Limited(20)),
        ],
        PLAN_GROWTH => &[
            (METRIC_EMAIL_SENDS, Limit::Limited(50_000)),
            (METRIC_SMS_SENDS, Limit::Limited(5_000)),
            (METRIC_LANDING_PAGES, Limit::Limited(25)),
            (METRIC_SEATS, Limit::Limited(10)),
            (METRIC_DOMAINS, Limit::Limited(3)),
            (METRIC_AI_AGENTS, Limit::Limited(5)),
            (METRIC_CAMPAIGNS, Limit::Unlimited),
        ],
        PLAN_SCALE => &[
            (METRIC_EMAIL_SENDS, Limit::Unlimited),
            (METRIC_SMS_SENDS, Limit::Limited(50_000)),
            (METRIC_LANDING_PAGES, Limit::Unlimited),
            (METRIC_SEATS, Limit::Limited(25)),
            (METRIC_DOMAINS, Limit::Limited(10)),
            (METRIC_AI_AGENTS, Limit::Limited(25)),
            (METRIC_CAMPAIGNS, Limit::Unlimited),
        ],
        other => return Err(BillingError::UnknownPlan(other.to_string())),
    };
    table
        .iter()
        .find(|(name, _)| *name == metric)
        .map(|(_, limit)| *limit)
        .ok_or_else(|| BillingError::UnknownMetric(metric.to_string()))
}

/// key: limit-resolver -> effective ceiling with add-on stacking
///
/// An unlimited base wins regardless of add-ons; otherwise stacked add-on
/// capacity is additive on top of the plan's base limit.
pub fn effective_limit(
    plan: &str,
    add_ons: &BTreeMap<String, i64>,
    metric: &str,
) -> BillingResult<Limit> {
    match base_limit(plan, metric)? {
        Limit::Unlimited => Ok(Limit::Unlimited),
        Limit::Limited(base) => {
            let extra = add_ons.get(metric).copied().unwrap_or(0);
            Ok(Limit::Limited(base + extra))
        }
    }
}

/// key: billing-error -> actionable upgrade path
#[derive(Debug, Clone, Serialize)]
pub struct SuggestedUpgrade {
    pub sku: String,
    pub name: String,
    pub amount_cents: i64,
    pub currency: String,
}

impl SuggestedUpgrade {
    fn from_sku(sku: &BillingSku) -> Self {
        Self {
            sku: sku.id.to_string(),
            name: sku.name.to_string(),
            amount_cents: sku.amount_cents,
            currency: sku.currency.to_string(),
        }
    }
}

/// Cheapest SKU whose resulting limit accommodates at least one more unit of
/// `metric`: either a plan tier with a strictly higher base limit or an
/// add-on bundle covering the metric.
pub fn suggested_upgrade(plan: &str, metric: &str) -> Option<SuggestedUpgrade> {
    let current = base_limit(plan, metric).ok()?;
    SKUS.iter()
        .filter(|sku| match sku.kind {
            SkuKind::Plan { plan: candidate } => base_limit(candidate, metric)
                .map(|limit| limit.exceeds(current))
                .unwrap_or(false),
            SkuKind::Addon { add_ons } => add_ons
                .iter()
                .any(|(name, quantity)| *name == metric && *quantity > 0),
        })
        .min_by_key(|sku| sku.amount_cents)
        .map(SuggestedUpgrade::from_sku)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limit_stacks_add_ons_on_base() {
        let mut add_ons = BTreeMap::new();
        add_ons.insert(METRIC_EMAIL_SENDS.to_string(), 10_000);
        let limit = effective_limit(PLAN_STARTER, &add_ons, METRIC_EMAIL_SENDS).unwrap();
        assert_eq!(limit, Limit::Limited(15_000));
    }

    #[test]
    fn effective_limit_is_monotone_in_add_on_count() {
        let mut previous = -1;
        for extra in [0, 1, 10, 500, 10_000] {
            let mut add_ons = BTreeMap::new();
            add_ons.insert(METRIC_SEATS.to_string(), extra);
            let limit = effective_limit(PLAN_STARTER, &add_ons, METRIC_SEATS)
                .unwrap()
                .as_option()
                .unwrap();
            assert!(limit >= previous, "limit regressed at add_on={extra}");
            previous = limit;
        }
    }

    #[test]
    fn unlimited_base_ignores_add_ons() {
        let mut add_ons = BTreeMap::new();
        add_ons.insert(METRIC_CAMPAIGNS.to_string(), 5);
        let limit = effective_limit(PLAN_GROWTH, &add_ons, METRIC_CAMPAIGNS).unwrap();
        assert_eq!(limit, Limit::Unlimited);
    }

    #[test]
    fn unknown_metric_fails_closed() {
        let add_ons = BTreeMap::new();
        let err = effective_limit(PLAN_FREE, &add_ons, "carrier_pigeons").unwrap_err();
        assert!(matches!(err, crate::error::BillingError::UnknownMetric(_)));
    }

    #[test]
    fn unknown_plan_fails_closed() {
        let add_ons = BTreeMap::new();
        let err = effective_limit("enterprise-bespoke", &add_ons, METRIC_SEATS).unwrap_err();
        assert!(matches!(err, crate::error::BillingError::UnknownPlan(_)));
    }

    #[test]
    fn suggested_upgrade_prefers_cheapest_accommodating_sku() {
        // Landing pages on the free plan: the 10-page add-on at $9 undercuts
        // every plan tier.
        let upgrade = suggested_upgrade(PLAN_FREE, METRIC_LANDING_PAGES).unwrap();
        assert_eq!(upgrade.sku, "addon-pages-10");

        // Domains have no add-on SKU, so the next plan tier wins.
        let upgrade = suggested_upgrade(PLAN_FREE, METRIC_DOMAINS).unwrap();
        assert_eq!(upgrade.sku, "plan-starter-monthly");
    }

    #[test]
    fn suggested_upgrade_skips_tiers_without_headroom() {
        // Campaigns are already unlimited on growth; only add-on SKUs (none
        // exist for campaigns) could help, so there is no suggestion.
        assert!(suggested_upgrade(PLAN_GROWTH, METRIC_CAMPAIGNS).is_none());
    }
}
