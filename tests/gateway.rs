use httpmock::prelude::*;
use serde_json::json;

use metering::gateway::{CaptureStatus, HttpGateway, PaymentGateway};

// key: gateway-tests -> http adapter wire behavior

/// All tests in this binary pin the capture timeout so the slow-gateway
/// test stays fast regardless of which test touches the config first.
fn test_gateway(server: &MockServer) -> HttpGateway {
    std::env::set_var("PAYMENT_GATEWAY_TIMEOUT_SECS", "2");
    HttpGateway::new(server.base_url()).unwrap()
}

#[tokio::test]
async fn create_order_posts_the_purchase_unit_and_returns_the_id() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/checkout/orders")
            .json_body_partial(
                json!({
                    "intent": "CAPTURE",
                    "purchase_units": [{
                        "reference_id": "plan-starter-monthly",
                        "amount": { "value": 2900, "currency_code": "USD" },
                    }],
                })
                .to_string(),
            );
        then.status(201).json_body(json!({ "id": "ORD-123" }));
    });

    let gateway = test_gateway(&server);
    let order_id = gateway
        .create_order("plan-starter-monthly", 2_900, "USD")
        .await
        .unwrap();
    assert_eq!(order_id, "ORD-123");
    mock.assert();
}

#[tokio::test]
async fn completed_capture_parses_status_and_reference() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v2/checkout/orders/ORD-123/capture");
        then.status(200).json_body(json!({
            "status": "COMPLETED",
            "purchase_units": [{
                "reference_id": "plan-starter-monthly",
                "amount": { "value": 2900, "currency_code": "USD" },
            }],
        }));
    });

    let gateway = test_gateway(&server);
    let capture = gateway.capture_order("ORD-123").await.unwrap();
    assert_eq!(capture.status, CaptureStatus::Completed);
    assert_eq!(capture.reference.as_deref(), Some("plan-starter-monthly"));
    assert_eq!(capture.amount_cents, 2_900);
    assert_eq!(capture.currency, "USD");
}

#[tokio::test]
async fn non_completed_statuses_map_to_pending_or_declined() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v2/checkout/orders/ORD-P/capture");
        then.status(200)
            .json_body(json!({ "status": "PAYER_ACTION_REQUIRED", "purchase_units": [] }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/v2/checkout/orders/ORD-D/capture");
        then.status(200)
            .json_body(json!({ "status": "DECLINED", "purchase_units": [] }));
    });

    let gateway = test_gateway(&server);
    let pending = gateway.capture_order("ORD-P").await.unwrap();
    assert_eq!(pending.status, CaptureStatus::Pending);
    let declined = gateway.capture_order("ORD-D").await.unwrap();
    assert_eq!(declined.status, CaptureStatus::Declined);
}

#[tokio::test]
async fn capture_timeout_reads_as_not_yet_settled() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v2/checkout/orders/ORD-SLOW/capture");
        then.status(200)
            .json_body(json!({
                "status": "COMPLETED",
                "purchase_units": [{ "reference_id": "plan-starter-monthly" }],
            }))
            .delay(std::time::Duration::from_secs(4));
    });

    // The gateway answers after the 2s client timeout: the adapter must
    // report a pending capture, never an error, so settlement stays
    // deferrable and safe to retry.
    let gateway = test_gateway(&server);
    let capture = gateway.capture_order("ORD-SLOW").await.unwrap();
    assert_eq!(capture.status, CaptureStatus::Pending);
    assert_eq!(capture.reference, None);
}

#[tokio::test]
async fn http_errors_propagate_for_callers_to_retry() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v2/checkout/orders/ORD-500/capture");
        then.status(500);
    });

    let gateway = test_gateway(&server);
    assert!(gateway.capture_order("ORD-500").await.is_err());
}
