use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::catalog::SuggestedUpgrade;
use crate::subscriptions::SubscriptionStatus;

/// key: billing-error -> quota veto payload
#[derive(Debug, Clone, Serialize)]
pub struct PlanLimitDetail {
    pub metric: String,
    pub limit: i64,
    pub current_usage: i64,
    pub plan: String,
    pub status: SubscriptionStatus,
    pub suggested_upgrade: Option<SuggestedUpgrade>,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("plan limit reached for `{}`: {}/{}", .0.metric, .0.current_usage, .0.limit)]
    PlanLimit(Box<PlanLimitDetail>),
    #[error("current plan does not include `{capability}`")]
    FeatureAccess {
        capability: String,
        reason: String,
        suggested_upgrade: Option<SuggestedUpgrade>,
    },
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),
    #[error("unknown plan `{0}`")]
    UnknownPlan(String),
    #[error("unknown sku reference `{0}`")]
    UnknownSku(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
    #[error("payment gateway error: {0}")]
    Gateway(#[source] anyhow::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        tracing::error!(?self);
        match self {
            BillingError::PlanLimit(detail) => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({
                    "error": "plan_limit",
                    "detail": *detail,
                })),
            )
                .into_response(),
            BillingError::FeatureAccess {
                capability,
                reason,
                suggested_upgrade,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({
                    "error": "feature_access",
                    "capability": capability,
                    "reason": reason,
                    "suggested_upgrade": suggested_upgrade,
                })),
            )
                .into_response(),
            BillingError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
            }
            BillingError::Forbidden => (StatusCode::FORBIDDEN, "forbidden").into_response(),
            BillingError::UnknownMetric(_)
            | BillingError::UnknownPlan(_)
            | BillingError::UnknownSku(_) => {
                // Configuration errors fail loudly outside production and
                // degrade to a deny in production.
                if *crate::config::PRODUCTION_MODE {
                    (StatusCode::FORBIDDEN, "denied").into_response()
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
                }
            }
            BillingError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            BillingError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "store error").into_response()
            }
            BillingError::Gateway(_) => {
                (StatusCode::BAD_GATEWAY, "payment gateway error").into_response()
            }
        }
    }
}
