use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{find_sku, SkuKind};
use crate::error::{BillingError, BillingResult};
use crate::gateway::{CaptureStatus, SharedGateway};
use crate::store::SharedStore;
use crate::subscriptions::SubscriptionStore;

/// key: billing-event -> append-only settlement record
///
/// Keyed by `(tenant, order)` in the store, so exactly one event can exist
/// per distinct external order id. Never mutated after the append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub event_type: String,
    pub order_id: String,
    pub sku: String,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    pub applied: bool,
    pub notes: Vec<String>,
}

impl SettlementOutcome {
    fn skipped(note: impl Into<String>) -> Self {
        Self {
            applied: false,
            notes: vec![note.into()],
        }
    }
}

/// key: billing-settlement -> exactly-once payment application
///
/// Every entry point that settles an order (REST capture, webhook) funnels
/// through [`SettlementService::settle`]. Idempotency rests on two pieces:
/// the event ledger keyed by `(tenant, order)` rejects redeliveries of any
/// previously settled order, and the subscription store's conditional order
/// claim closes the race between concurrent first deliveries.
#[derive(Clone)]
pub struct SettlementService {
    store: SharedStore,
    subscriptions: SubscriptionStore,
    gateway: SharedGateway,
}

impl SettlementService {
    pub fn new(store: SharedStore, gateway: SharedGateway) -> Self {
        let subscriptions = SubscriptionStore::new(store.clone());
        Self {
            store,
            subscriptions,
            gateway,
        }
    }

    fn event_key(tenant_id: &str, order_id: &str) -> String {
        format!("billing_events/{tenant_id}/{order_id}")
    }

    pub async fn settle(&self, tenant_id: &str, order_id: &str) -> BillingResult<SettlementOutcome> {
        // The append-only event ledger is the processed-order record: a
        // redelivery of any already-settled order, however old, is skipped
        // here. `last_order_id` alone would only dedupe consecutive
        // deliveries of the same order.
        if self.event_for_order(tenant_id, order_id).await?.is_some() {
            tracing::info!(%tenant_id, %order_id, "order already settled, skipping");
            return Ok(SettlementOutcome::skipped("billing:order-already-processed"));
        }
        // Cheap precheck covering the window where the most recent order has
        // claimed its id but not yet appended its event; the authoritative
        // guard for concurrent first deliveries is the conditional claim
        // below.
        let subscription = self.subscriptions.load_or_default(tenant_id).await?;
        if subscription.last_order_id.as_deref() == Some(order_id) {
            tracing::info!(%tenant_id, %order_id, "order already settled, skipping");
            return Ok(SettlementOutcome::skipped("billing:order-already-processed"));
        }

        let capture = self
            .gateway
            .capture_order(order_id)
            .await
            .map_err(BillingError::Gateway)?;
        match capture.status {
            CaptureStatus::Completed => {}
            CaptureStatus::Pending => {
                tracing::info!(%tenant_id, %order_id, "capture not completed yet, deferring settlement");
                return Ok(SettlementOutcome::skipped("billing:capture-pending"));
            }
            CaptureStatus::Declined => {
                tracing::warn!(%tenant_id, %order_id, "capture declined, nothing to settle");
                return Ok(SettlementOutcome::skipped("billing:capture-declined"));
            }
        }

        let Some(reference) = capture.reference.as_deref() else {
            tracing::error!(%tenant_id, %order_id, "capture carried no sku reference");
            return Ok(SettlementOutcome::skipped("billing:sku-missing"));
        };
        let Some(sku) = find_sku(reference) else {
            // Fail safe: a completed capture we cannot attribute is logged
            // and left untouched, never guessed into a mutation.
            tracing::error!(%tenant_id, %order_id, reference, "capture references unknown sku");
            return Ok(SettlementOutcome::skipped(format!(
                "billing:sku-unknown:{reference}"
            )));
        };

        // Single atomic conditional write closing the race between two
        // concurrent deliveries of the same confirmation.
        if !self.subscriptions.claim_order(tenant_id, order_id).await? {
            tracing::info!(%tenant_id, %order_id, "lost settlement race, order already claimed");
            return Ok(SettlementOutcome::skipped("billing:order-already-processed"));
        }

        let mut notes = Vec::new();
        match sku.kind {
            SkuKind::Plan { plan } => {
                self.subscriptions.apply_plan(tenant_id, plan).await?;
                notes.push(format!("billing:plan-applied:{plan}"));
            }
            SkuKind::Addon { add_ons } => {
                self.subscriptions.stack_add_ons(tenant_id, add_ons).await?;
                for (metric, quantity) in add_ons {
                    notes.push(format!("billing:addon-stacked:{metric}:+{quantity}"));
                }
            }
        }

        let event = BillingEvent {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            event_type: "payment_captured".to_string(),
            order_id: order_id.to_string(),
            sku: sku.id.to_string(),
            amount_cents: capture.amount_cents,
            currency: capture.currency.clone(),
            created_at: Utc::now(),
        };
        let doc = serde_json::to_value(&event)
            .map_err(|err| BillingError::Store(anyhow!("serialize billing event: {err}")))?;
        self.store
            .set(&Self::event_key(tenant_id, order_id), doc)
            .await
            .map_err(BillingError::Store)?;

        tracing::info!(
            %tenant_id,
            %order_id,
            sku = sku.id,
            amount_cents = capture.amount_cents,
            "payment settled"
        );
        Ok(SettlementOutcome {
            applied: true,
            notes,
        })
    }

    /// Audit lookup for the event appended at settlement, if any.
    pub async fn event_for_order(
        &self,
        tenant_id: &str,
        order_id: &str,
    ) -> BillingResult<Option<BillingEvent>> {
        let doc = self
            .store
            .get(&Self::event_key(tenant_id, order_id))
            .await
            .map_err(BillingError::Store)?;
        doc.map(|value| {
            serde_json::from_value(value)
                .map_err(|err| BillingError::Store(anyhow!("corrupt billing event: {err}")))
        })
        .transpose()
    }
}
