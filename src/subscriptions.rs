use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config;
use crate::error::{BillingError, BillingResult};
use crate::store::SharedStore;

/// key: subscription-status -> lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Canceled,
}

/// key: subscription-record -> per-tenant billing state
///
/// Created lazily with free-tier defaults on first read. `add_ons` holds
/// cumulative stacked capacity independent of the plan; `last_order_id` is
/// the settlement idempotency guard and never regresses to an already
/// processed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub tenant_id: String,
    pub plan: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub add_ons: BTreeMap<String, i64>,
    #[serde(default)]
    pub last_order_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    fn default_for(tenant_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            plan: config::DEFAULT_PLAN.clone(),
            status: SubscriptionStatus::Trial,
            add_ons: BTreeMap::new(),
            last_order_id: None,
            updated_at: now,
        }
    }
}

/// key: subscription-store -> persistence over the document store
#[derive(Clone)]
pub struct SubscriptionStore {
    store: SharedStore,
}

impl SubscriptionStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn key(tenant_id: &str) -> String {
        format!("subscriptions/{tenant_id}")
    }

    pub async fn load_or_default(&self, tenant_id: &str) -> BillingResult<SubscriptionRecord> {
        let key = Self::key(tenant_id);
        if let Some(doc) = self.store.get(&key).await.map_err(BillingError::Store)? {
            return serde_json::from_value(doc)
                .map_err(|err| BillingError::Store(anyhow!("corrupt subscription record: {err}")));
        }
        let record = SubscriptionRecord::default_for(tenant_id, Utc::now());
        let doc = serde_json::to_value(&record)
            .map_err(|err| BillingError::Store(anyhow!("serialize subscription: {err}")))?;
        self.store.set(&key, doc).await.map_err(BillingError::Store)?;
        tracing::info!(%tenant_id, plan = %record.plan, "created default subscription record");
        Ok(record)
    }

    /// Atomically claims an external order id as processed. Returns `false`
    /// when the id is already the most recently settled order, closing the
    /// race between concurrent first deliveries of one confirmation.
    /// Redeliveries of older orders are rejected upstream against the
    /// settlement event ledger.
    pub async fn claim_order(&self, tenant_id: &str, order_id: &str) -> BillingResult<bool> {
        // Ensure the record exists before the conditional write.
        self.load_or_default(tenant_id).await?;
        self.store
            .claim_field(&Self::key(tenant_id), "last_order_id", json!(order_id))
            .await
            .map_err(BillingError::Store)
    }

    /// Overwrites the plan and reactivates the subscription (plan SKU
    /// settlement path).
    pub async fn apply_plan(&self, tenant_id: &str, plan: &str) -> BillingResult<()> {
        self.load_or_default(tenant_id).await?;
        self.store
            .merge(
                &Self::key(tenant_id),
                json!({
                    "plan": plan,
                    "status": SubscriptionStatus::Active,
                    "updated_at": Utc::now(),
                }),
            )
            .await
            .map_err(BillingError::Store)
    }

    /// Increments stacked add-on capacity (add-on SKU settlement path).
    /// Add-ons accumulate across purchases, they are never overwritten.
    pub async fn stack_add_ons(
        &self,
        tenant_id: &str,
        add_ons: &[(&str, i64)],
    ) -> BillingResult<()> {
        self.load_or_default(tenant_id).await?;
        let key = Self::key(tenant_id);
        for (metric, quantity) in add_ons {
            self.store
                .increment(&key, &format!("add_ons.{metric}"), *quantity)
                .await
                .map_err(BillingError::Store)?;
        }
        self.store
            .merge(&key, json!({"updated_at": Utc::now()}))
            .await
            .map_err(BillingError::Store)
    }

    /// Moves the subscription through its lifecycle without touching plan or
    /// add-ons (dunning and cancellation live outside this core; they call
    /// in through here).
    pub async fn set_status(
        &self,
        tenant_id: &str,
        status: SubscriptionStatus,
    ) -> BillingResult<()> {
        self.load_or_default(tenant_id).await?;
        self.store
            .merge(
                &Self::key(tenant_id),
                json!({"status": status, "updated_at": Utc::now()}),
            )
            .await
            .map_err(BillingError::Store)
    }
}
