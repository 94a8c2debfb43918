use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{find_sku, SkuKind, SuggestedUpgrade, PLAN_GROWTH, PLAN_SCALE, PLAN_STARTER};
use crate::error::{BillingError, BillingResult};
use crate::store::SharedStore;
use crate::subscriptions::{SubscriptionRecord, SubscriptionStatus, SubscriptionStore};

pub const CAP_PUBLISH: &str = "publish";
pub const CAP_EXPORT: &str = "export";
pub const CAP_CUSTOM_DOMAIN: &str = "custom_domain";
pub const CAP_SMS: &str = "sms";
pub const CAP_AI_AGENTS: &str = "ai_agents";
pub const CAP_TEAM_SEATS: &str = "team_seats";
pub const CAP_REMOVE_BRANDING: &str = "remove_branding";

/// key: entitlement-tier -> plan/status collapsed to one of four tiers
///
/// A `past_due` or `canceled` subscription is forced to `Free` regardless of
/// its nominal plan, so a payment failure revokes premium capabilities
/// uniformly without touching call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementTier {
    Free,
    Tier1,
    Tier2,
    Tier3,
}

pub fn plan_tier(plan: &str) -> EntitlementTier {
    match plan {
        PLAN_STARTER => EntitlementTier::Tier1,
        PLAN_GROWTH => EntitlementTier::Tier2,
        PLAN_SCALE => EntitlementTier::Tier3,
        _ => EntitlementTier::Free,
    }
}

pub fn subscription_tier(record: &SubscriptionRecord) -> EntitlementTier {
    match record.status {
        SubscriptionStatus::PastDue | SubscriptionStatus::Canceled => EntitlementTier::Free,
        SubscriptionStatus::Trial | SubscriptionStatus::Active => plan_tier(&record.plan),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureGate {
    pub allowed: bool,
    pub reason: String,
}

/// key: entitlement-summary -> derived per-request, never cached
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementSummary {
    pub plan: String,
    pub status: SubscriptionStatus,
    pub is_trial: bool,
    pub tier: EntitlementTier,
    pub add_ons: BTreeMap<String, i64>,
    pub features: BTreeMap<String, FeatureGate>,
}

/// Fixed feature matrix per tier. Each capability carries the minimum tier
/// that unlocks it plus the human-readable reason shown on denial.
const FEATURE_MATRIX: &[(&str, EntitlementTier, &str)] = &[
    (CAP_PUBLISH, EntitlementTier::Tier1, "publishing pages requires the Starter plan or higher"),
    (CAP_EXPORT, EntitlementTier::Tier2, "exporting data requires the Growth plan or higher"),
    (CAP_CUSTOM_DOMAIN, EntitlementTier::Tier1, "custom domains require the Starter plan or higher"),
    (CAP_SMS, EntitlementTier::Tier1, "SMS sending requires the Starter plan or higher"),
    (CAP_AI_AGENTS, EntitlementTier::Tier1, "AI agents require the Starter plan or higher"),
    (CAP_TEAM_SEATS, EntitlementTier::Tier2, "team seats require the Growth plan or higher"),
    (CAP_REMOVE_BRANDING, EntitlementTier::Tier3, "removing branding requires the Scale plan"),
];

pub fn tier_features(tier: EntitlementTier) -> BTreeMap<String, FeatureGate> {
    FEATURE_MATRIX
        .iter()
        .map(|(capability, required, denial_reason)| {
            let allowed = tier >= *required;
            let reason = if allowed {
                "included with the current plan".to_string()
            } else {
                (*denial_reason).to_string()
            };
            (capability.to_string(), FeatureGate { allowed, reason })
        })
        .collect()
}

/// key: entitlement-resolver -> feature gates from subscription state
#[derive(Clone)]
pub struct EntitlementResolver {
    subscriptions: SubscriptionStore,
}

impl EntitlementResolver {
    pub fn new(store: SharedStore) -> Self {
        Self {
            subscriptions: SubscriptionStore::new(store),
        }
    }

    pub async fn resolve_entitlements(&self, tenant_id: &str) -> BillingResult<EntitlementSummary> {
        let record = self.subscriptions.load_or_default(tenant_id).await?;
        let tier = subscription_tier(&record);
        Ok(EntitlementSummary {
            plan: record.plan.clone(),
            status: record.status,
            is_trial: record.status == SubscriptionStatus::Trial,
            tier,
            add_ons: record.add_ons,
            features: tier_features(tier),
        })
    }

    /// Gate for high-value actions (publish, export). Raises `FeatureAccess`
    /// with a concrete upgrade path when the tier lacks the capability.
    pub async fn require_feature(&self, tenant_id: &str, capability: &str) -> BillingResult<()> {
        let summary = self.resolve_entitlements(tenant_id).await?;
        match summary.features.get(capability) {
            Some(gate) if gate.allowed => Ok(()),
            Some(gate) => Err(BillingError::FeatureAccess {
                capability: capability.to_string(),
                reason: gate.reason.clone(),
                suggested_upgrade: upgrade_for_capability(capability),
            }),
            None => Err(BillingError::BadRequest(format!(
                "unknown capability `{capability}`"
            ))),
        }
    }
}

/// Cheapest plan SKU whose tier unlocks the capability.
fn upgrade_for_capability(capability: &str) -> Option<SuggestedUpgrade> {
    let required = FEATURE_MATRIX
        .iter()
        .find(|(name, _, _)| *name == capability)
        .map(|(_, tier, _)| *tier)?;
    ["plan-starter-monthly", "plan-growth-monthly", "plan-scale-monthly"]
        .iter()
        .filter_map(|id| find_sku(id))
        .filter(|sku| match sku.kind {
            SkuKind::Plan { plan } => plan_tier(plan) >= required,
            SkuKind::Addon { .. } => false,
        })
        .min_by_key(|sku| sku.amount_cents)
        .map(|sku| SuggestedUpgrade {
            sku: sku.id.to_string(),
            name: sku.name.to_string(),
            amount_cents: sku.amount_cents,
            currency: sku.currency.to_string(),
        })
}
