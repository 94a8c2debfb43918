use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{effective_limit, suggested_upgrade, Limit};
use crate::error::{BillingError, BillingResult, PlanLimitDetail};
use crate::store::SharedStore;
use crate::subscriptions::{SubscriptionRecord, SubscriptionStore};

/// Billing period key for a calendar-month window, e.g. `2026-08`. The
/// period key is part of the counter's storage key, so closed periods are
/// never addressed for writes again and stay retained for audit.
pub fn period_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

fn counter_key(tenant_id: &str, metric: &str, period: &str) -> String {
    format!("usage/{tenant_id}/{metric}/{period}")
}

/// key: usage-guard -> read-only quota snapshot
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub metric: String,
    pub period: String,
    pub count: i64,
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageCharge {
    pub metric: String,
    #[serde(default = "default_increment")]
    pub increment: i64,
}

fn default_increment() -> i64 {
    1
}

/// key: usage-guard -> enforcement surface for billable actions
///
/// `check` is advisory and may be stale the moment it returns; only
/// `enforce`'s atomic increment is the source of truth for quota decisions.
#[derive(Clone)]
pub struct UsageGuard {
    store: SharedStore,
    subscriptions: SubscriptionStore,
}

impl UsageGuard {
    pub fn new(store: SharedStore) -> Self {
        let subscriptions = SubscriptionStore::new(store.clone());
        Self {
            store,
            subscriptions,
        }
    }

    async fn current_count(&self, key: &str) -> BillingResult<i64> {
        let doc = self.store.get(key).await.map_err(BillingError::Store)?;
        Ok(doc
            .as_ref()
            .and_then(|value| value.get("count"))
            .and_then(|value| value.as_i64())
            .unwrap_or(0))
    }

    /// Pre-flight check that never consumes quota. Raises `PlanLimit` once
    /// the counter has reached the effective limit.
    pub async fn check_usage_limit(
        &self,
        tenant_id: &str,
        metric: &str,
    ) -> BillingResult<UsageSnapshot> {
        let subscription = self.subscriptions.load_or_default(tenant_id).await?;
        let limit = effective_limit(&subscription.plan, &subscription.add_ons, metric)?;
        let period = period_key(Utc::now());
        let count = self
            .current_count(&counter_key(tenant_id, metric, &period))
            .await?;

        if let Limit::Limited(limit) = limit {
            if count >= limit {
                return Err(limit_error(&subscription, metric, limit, count));
            }
        }
        Ok(UsageSnapshot {
            metric: metric.to_string(),
            period,
            count,
            limit: limit.as_option(),
            remaining: limit.as_option().map(|limit| limit - count),
        })
    }

    /// Atomically reserves `increment` units of quota. The post-increment
    /// value is compared against the effective limit; a veto rolls the
    /// increment back before raising `PlanLimit`, so committed counters
    /// never exceed the limit even under concurrent enforcement.
    pub async fn enforce_usage_limit(
        &self,
        tenant_id: &str,
        metric: &str,
        increment: i64,
    ) -> BillingResult<i64> {
        self.enforce_usage_limit_at(tenant_id, metric, increment, Utc::now())
            .await
    }

    pub async fn enforce_usage_limit_at(
        &self,
        tenant_id: &str,
        metric: &str,
        increment: i64,
        now: DateTime<Utc>,
    ) -> BillingResult<i64> {
        if increment <= 0 {
            return Err(BillingError::BadRequest(format!(
                "usage increment must be positive, got {increment}"
            )));
        }
        let subscription = self.subscriptions.load_or_default(tenant_id).await?;
        let period = period_key(now);
        self.enforce_one(&subscription, tenant_id, metric, increment, &period)
            .await
    }

    /// Applies several increments as one logical action. All metrics are
    /// resolved against the catalog before anything is applied; on any veto
    /// the already applied increments are rolled back, so either every
    /// charge commits or none does.
    pub async fn enforce_usage_limits(
        &self,
        tenant_id: &str,
        charges: &[UsageCharge],
    ) -> BillingResult<BTreeMap<String, i64>> {
        self.enforce_usage_limits_at(tenant_id, charges, Utc::now())
            .await
    }

    /// The billing period is derived once from `now` and shared by every
    /// increment and by the rollback loop, so a request straddling a period
    /// boundary cannot decrement a different period than it charged.
    pub async fn enforce_usage_limits_at(
        &self,
        tenant_id: &str,
        charges: &[UsageCharge],
        now: DateTime<Utc>,
    ) -> BillingResult<BTreeMap<String, i64>> {
        let period = period_key(now);
        let subscription = self.subscriptions.load_or_default(tenant_id).await?;
        for charge in charges {
            if charge.increment <= 0 {
                return Err(BillingError::BadRequest(format!(
                    "usage increment must be positive, got {}",
                    charge.increment
                )));
            }
            // Fail closed on configuration errors before any mutation.
            effective_limit(&subscription.plan, &subscription.add_ons, &charge.metric)?;
        }

        let mut committed: Vec<&UsageCharge> = Vec::with_capacity(charges.len());
        let mut counts = BTreeMap::new();
        for charge in charges {
            match self
                .enforce_one(
                    &subscription,
                    tenant_id,
                    &charge.metric,
                    charge.increment,
                    &period,
                )
                .await
            {
                Ok(count) => {
                    counts.insert(charge.metric.clone(), count);
                    committed.push(charge);
                }
                Err(err) => {
                    for applied in committed.iter().rev() {
                        let key = counter_key(tenant_id, &applied.metric, &period);
                        if let Err(rollback) =
                            self.store.increment(&key, "count", -applied.increment).await
                        {
                            tracing::error!(
                                ?rollback,
                                %tenant_id,
                                metric = %applied.metric,
                                "failed to roll back usage increment"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(counts)
    }

    async fn enforce_one(
        &self,
        subscription: &SubscriptionRecord,
        tenant_id: &str,
        metric: &str,
        increment: i64,
        period: &str,
    ) -> BillingResult<i64> {
        let limit = effective_limit(&subscription.plan, &subscription.add_ons, metric)?;
        let key = counter_key(tenant_id, metric, period);
        let next = self
            .store
            .increment(&key, "count", increment)
            .await
            .map_err(BillingError::Store)?;

        if let Limit::Limited(limit) = limit {
            if next > limit {
                self.store
                    .increment(&key, "count", -increment)
                    .await
                    .map_err(BillingError::Store)?;
                return Err(limit_error(subscription, metric, limit, next - increment));
            }
        }
        tracing::debug!(%tenant_id, metric, count = next, "usage increment committed");
        Ok(next)
    }
}

fn limit_error(
    subscription: &SubscriptionRecord,
    metric: &str,
    limit: i64,
    current_usage: i64,
) -> BillingError {
    BillingError::PlanLimit(Box::new(PlanLimitDetail {
        metric: metric.to_string(),
        limit,
        current_usage,
        plan: subscription.plan.clone(),
        status: subscription.status,
        suggested_upgrade: suggested_upgrade(&subscription.plan, metric),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_key_is_calendar_month() {
        let now = DateTime::parse_from_rfc3339("2026-08-29T11:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(period_key(now), "2026-08");
    }
}
