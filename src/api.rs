use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::catalog::{self, SkuKind};
use crate::entitlements::{EntitlementResolver, EntitlementSummary};
use crate::error::{BillingError, BillingResult};
use crate::gateway::SharedGateway;
use crate::identity::TenantContext;
use crate::settlement::{SettlementOutcome, SettlementService};
use crate::store::SharedStore;
use crate::usage::{UsageCharge, UsageGuard, UsageSnapshot};

/// key: billing-api -> rest endpoints (thin glue, decisions live in the
/// library modules)
pub async fn list_plans() -> Json<Value> {
    let plans: Vec<Value> = catalog::PLANS
        .iter()
        .map(|plan| {
            let limits: BTreeMap<&str, Option<i64>> = catalog::KNOWN_METRICS
                .iter()
                .filter_map(|metric| {
                    catalog::base_limit(plan.id, metric)
                        .ok()
                        .map(|limit| (*metric, limit.as_option()))
                })
                .collect();
            json!({ "id": plan.id, "name": plan.name, "limits": limits })
        })
        .collect();
    let skus: Vec<Value> = catalog::SKUS
        .iter()
        .map(|sku| {
            let kind = match sku.kind {
                SkuKind::Plan { plan } => json!({ "type": "plan", "plan": plan }),
                SkuKind::Addon { add_ons } => {
                    let add_ons: BTreeMap<&str, i64> = add_ons.iter().copied().collect();
                    json!({ "type": "addon", "add_ons": add_ons })
                }
            };
            json!({
                "id": sku.id,
                "name": sku.name,
                "kind": kind,
                "amount_cents": sku.amount_cents,
                "currency": sku.currency,
            })
        })
        .collect();
    Json(json!({ "plans": plans, "skus": skus }))
}

pub async fn get_entitlements(
    Extension(store): Extension<SharedStore>,
    context: TenantContext,
) -> BillingResult<Json<EntitlementSummary>> {
    let resolver = EntitlementResolver::new(store);
    let summary = resolver.resolve_entitlements(&context.tenant_id).await?;
    Ok(Json(summary))
}

/// Gate consumed by high-value actions (publish, export) before they run.
/// Denials surface as 402 with a concrete upgrade path.
pub async fn require_feature(
    Extension(store): Extension<SharedStore>,
    context: TenantContext,
    Path(capability): Path<String>,
) -> BillingResult<Json<Value>> {
    let resolver = EntitlementResolver::new(store);
    resolver
        .require_feature(&context.tenant_id, &capability)
        .await?;
    Ok(Json(json!({ "capability": capability, "allowed": true })))
}

#[derive(Debug, Deserialize)]
pub struct QuotaCheckRequest {
    pub metric: String,
}

pub async fn check_quota(
    Extension(store): Extension<SharedStore>,
    context: TenantContext,
    Json(payload): Json<QuotaCheckRequest>,
) -> BillingResult<Json<UsageSnapshot>> {
    let guard = UsageGuard::new(store);
    let snapshot = guard
        .check_usage_limit(&context.tenant_id, &payload.metric)
        .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct QuotaEnforceRequest {
    pub charges: Vec<UsageCharge>,
}

#[derive(Debug, Serialize)]
pub struct QuotaEnforceResponse {
    pub counts: BTreeMap<String, i64>,
}

pub async fn enforce_quota(
    Extension(store): Extension<SharedStore>,
    context: TenantContext,
    Json(payload): Json<QuotaEnforceRequest>,
) -> BillingResult<Json<QuotaEnforceResponse>> {
    if payload.charges.is_empty() {
        return Err(BillingError::BadRequest(
            "at least one charge is required".to_string(),
        ));
    }
    let guard = UsageGuard::new(store);
    let counts = guard
        .enforce_usage_limits(&context.tenant_id, &payload.charges)
        .await?;
    Ok(Json(QuotaEnforceResponse { counts }))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub sku: String,
}

pub async fn create_order(
    Extension(gateway): Extension<SharedGateway>,
    context: TenantContext,
    Json(payload): Json<CreateOrderRequest>,
) -> BillingResult<Json<Value>> {
    let sku = catalog::find_sku(&payload.sku)
        .ok_or_else(|| BillingError::UnknownSku(payload.sku.clone()))?;
    let order_id = gateway
        .create_order(sku.id, sku.amount_cents, sku.currency)
        .await
        .map_err(BillingError::Gateway)?;
    tracing::info!(tenant_id = %context.tenant_id, sku = sku.id, %order_id, "order created");
    Ok(Json(json!({ "order_id": order_id })))
}

pub async fn capture_order(
    Extension(store): Extension<SharedStore>,
    Extension(gateway): Extension<SharedGateway>,
    context: TenantContext,
    Path(order_id): Path<String>,
) -> BillingResult<Json<SettlementOutcome>> {
    let service = SettlementService::new(store, gateway);
    let outcome = service.settle(&context.tenant_id, &order_id).await?;
    Ok(Json(outcome))
}

/// key: webhooks-billing -> gateway redelivery entrypoint
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub event: String,
    pub tenant_id: String,
    pub order_id: String,
}

/// Webhook deliveries settle through the exact same
/// [`SettlementService::settle`] path as the REST capture endpoint, so both
/// entry points share one idempotency guard.
pub async fn payment_webhook(
    Extension(store): Extension<SharedStore>,
    Extension(gateway): Extension<SharedGateway>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, BillingError> {
    verify_signature(&headers, &body)?;

    let payload: PaymentWebhookRequest = serde_json::from_slice(&body)
        .map_err(|err| BillingError::BadRequest(format!("malformed webhook payload: {err}")))?;
    match payload.event.as_str() {
        "payment.captured" | "checkout.order.approved" => {
            let service = SettlementService::new(store, gateway);
            let outcome = service
                .settle(&payload.tenant_id, &payload.order_id)
                .await?;
            tracing::info!(
                tenant_id = %payload.tenant_id,
                order_id = %payload.order_id,
                applied = outcome.applied,
                "webhook settlement processed"
            );
            Ok(StatusCode::ACCEPTED)
        }
        other => {
            tracing::debug!(event = other, "ignoring unhandled webhook event");
            Ok(StatusCode::ACCEPTED)
        }
    }
}

fn verify_signature(headers: &HeaderMap, body: &[u8]) -> Result<(), BillingError> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let Some(secret) = crate::config::PAYMENT_WEBHOOK_SECRET.as_deref() else {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET unset, rejecting webhook delivery");
        return Err(BillingError::Unauthorized);
    };
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(BillingError::Unauthorized)?;
    let expected = {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    };
    if expected != signature {
        return Err(BillingError::Unauthorized);
    }
    Ok(())
}
