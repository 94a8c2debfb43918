use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config;

/// key: payment-gateway -> capture outcome
///
/// Any status other than `Completed` means the order is not settled yet.
/// `Pending` is always safe to retry; `Declined` is terminal but still
/// mutates nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Completed,
    Pending,
    Declined,
}

#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub status: CaptureStatus,
    /// SKU reference recorded at order creation, echoed back by the gateway
    /// in the capture's purchase unit.
    pub reference: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
}

/// key: payment-gateway -> external collaborator interface
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, sku_id: &str, amount_cents: i64, currency: &str)
        -> Result<String>;
    async fn capture_order(&self, order_id: &str) -> Result<CaptureResult>;
}

pub type SharedGateway = Arc<dyn PaymentGateway>;

/// key: payment-gateway-http -> orders API adapter
///
/// Capture round trips are bounded by `PAYMENT_GATEWAY_TIMEOUT_SECS`; a
/// timeout surfaces as `Pending` ("not yet settled"), never as failure, so
/// a later retry or webhook can finish settlement.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(*config::PAYMENT_GATEWAY_TIMEOUT_SECS))
            .build()
            .context("failed to build payment gateway client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_order(
        &self,
        sku_id: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<String> {
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": sku_id,
                "amount": { "value": amount_cents, "currency_code": currency },
            }],
        });
        let response: Value = self
            .client
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .json(&body)
            .send()
            .await
            .context("order creation request failed")?
            .error_for_status()
            .context("order creation rejected")?
            .json()
            .await
            .context("order creation returned malformed body")?;
        response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("order creation response missing id"))
    }

    async fn capture_order(&self, order_id: &str) -> Result<CaptureResult> {
        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{order_id}/capture",
                self.base_url
            ))
            .json(&json!({}))
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                tracing::warn!(%order_id, "gateway capture timed out, treating as not yet settled");
                return Ok(CaptureResult {
                    status: CaptureStatus::Pending,
                    reference: None,
                    amount_cents: 0,
                    currency: String::new(),
                });
            }
            Err(err) => return Err(err).context("capture request failed"),
        };
        let payload: Value = response
            .error_for_status()
            .context("capture rejected")?
            .json()
            .await
            .context("capture returned malformed body")?;

        let status = match payload.get("status").and_then(Value::as_str) {
            Some("COMPLETED") => CaptureStatus::Completed,
            Some("DECLINED") | Some("VOIDED") => CaptureStatus::Declined,
            _ => CaptureStatus::Pending,
        };
        let unit = payload
            .get("purchase_units")
            .and_then(|units| units.get(0));
        let reference = unit
            .and_then(|unit| unit.get("reference_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let amount_cents = unit
            .and_then(|unit| unit.pointer("/amount/value"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let currency = unit
            .and_then(|unit| unit.pointer("/amount/currency_code"))
            .and_then(Value::as_str)
            .unwrap_or("USD")
            .to_string();

        Ok(CaptureResult {
            status,
            reference,
            amount_cents,
            currency,
        })
    }
}

#[derive(Debug, Clone)]
struct SandboxOrder {
    sku_id: String,
    amount_cents: i64,
    currency: String,
    status: CaptureStatus,
}

/// key: payment-gateway-sandbox -> scripted adapter for tests and dev
///
/// Orders created through the trait capture as `Completed`; tests can stage
/// orders in other states to exercise deferred and declined paths.
#[derive(Default)]
pub struct SandboxGateway {
    orders: DashMap<String, SandboxOrder>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Stages an order with an explicit capture status.
    pub fn stage(&self, order_id: &str, sku_id: &str, amount_cents: i64, status: CaptureStatus) {
        self.orders.insert(
            order_id.to_string(),
            SandboxOrder {
                sku_id: sku_id.to_string(),
                amount_cents,
                currency: "USD".to_string(),
                status,
            },
        );
    }

    /// Flips a staged order to `Completed`, simulating the gateway finishing
    /// an initially pending capture.
    pub fn complete(&self, order_id: &str) {
        if let Some(mut order) = self.orders.get_mut(order_id) {
            order.status = CaptureStatus::Completed;
        }
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_order(
        &self,
        sku_id: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<String> {
        let order_id = format!("SBX-{}", Uuid::new_v4());
        self.orders.insert(
            order_id.clone(),
            SandboxOrder {
                sku_id: sku_id.to_string(),
                amount_cents,
                currency: currency.to_string(),
                status: CaptureStatus::Completed,
            },
        );
        Ok(order_id)
    }

    async fn capture_order(&self, order_id: &str) -> Result<CaptureResult> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| anyhow!("unknown sandbox order `{order_id}`"))?;
        Ok(CaptureResult {
            status: order.status,
            reference: Some(order.sku_id.clone()),
            amount_cents: order.amount_cents,
            currency: order.currency.clone(),
        })
    }
}
