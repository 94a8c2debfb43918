use axum::{
    routing::{get, post},
    Router,
};

use crate::api;

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/billing/plans", get(api::list_plans))
        .route("/api/billing/entitlements", get(api::get_entitlements))
        .route(
            "/api/billing/features/:capability",
            get(api::require_feature),
        )
        .route("/api/billing/quota/check", post(api::check_quota))
        .route("/api/billing/quota/enforce", post(api::enforce_quota))
        .route("/api/billing/orders", post(api::create_order))
        .route(
            "/api/billing/orders/:order_id/capture",
            post(api::capture_order),
        )
        .route("/api/webhooks/payments", post(api::payment_webhook))
}
