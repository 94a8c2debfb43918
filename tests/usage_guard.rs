use serde_json::json;

use metering::catalog::{METRIC_CAMPAIGNS, METRIC_EMAIL_SENDS, METRIC_LANDING_PAGES};
use metering::error::BillingError;
use metering::store::{DocumentStore, MemoryStore};
use metering::usage::{period_key, UsageCharge, UsageGuard};

// key: usage-tests -> atomic enforcement, rollback, check purity

#[tokio::test]
async fn concurrent_enforcement_never_oversells_quota() {
    let store = MemoryStore::shared();
    // Free plan: campaigns limit is 2.
    let guard = UsageGuard::new(store.clone());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let guard = guard.clone();
        handles.push(tokio::spawn(async move {
            guard.enforce_usage_limit("t1", METRIC_CAMPAIGNS, 1).await
        }));
    }

    let mut successes = 0;
    let mut vetoes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(BillingError::PlanLimit(_)) => vetoes += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 2, "exactly the limit may succeed");
    assert_eq!(vetoes, 18);

    let key = format!("usage/t1/{METRIC_CAMPAIGNS}/{}", period_key(chrono::Utc::now()));
    let doc = store.get(&key).await.unwrap().unwrap();
    assert_eq!(doc["count"], json!(2), "committed counter equals the limit");
}

#[tokio::test]
async fn add_ons_stack_on_base_limit_and_veto_carries_detail() {
    let store = MemoryStore::shared();
    store
        .set(
            "subscriptions/t1",
            json!({
                "tenant_id": "t1",
                "plan": "starter",
                "status": "active",
                "add_ons": { "landing_pages": 10 },
                "last_order_id": null,
                "updated_at": "2026-08-01T00:00:00Z",
            }),
        )
        .await
        .unwrap();
    let guard = UsageGuard::new(store);

    // Starter base is 5; the add-on lifts the effective limit to 15.
    for _ in 0..15 {
        guard
            .enforce_usage_limit("t1", METRIC_LANDING_PAGES, 1)
            .await
            .unwrap();
    }
    let err = guard
        .enforce_usage_limit("t1", METRIC_LANDING_PAGES, 1)
        .await
        .unwrap_err();
    let BillingError::PlanLimit(detail) = err else {
        panic!("expected a plan limit veto");
    };
    assert_eq!(detail.metric, METRIC_LANDING_PAGES);
    assert_eq!(detail.limit, 15);
    assert_eq!(detail.current_usage, 15);
    assert_eq!(detail.plan, "starter");
    let upgrade = detail.suggested_upgrade.expect("veto must carry an upgrade path");
    assert_eq!(upgrade.sku, "addon-pages-10");
}

#[tokio::test]
async fn check_never_mutates_the_counter() {
    let store = MemoryStore::shared();
    let guard = UsageGuard::new(store.clone());

    guard
        .enforce_usage_limit("t1", METRIC_EMAIL_SENDS, 3)
        .await
        .unwrap();
    for _ in 0..5 {
        let snapshot = guard
            .check_usage_limit("t1", METRIC_EMAIL_SENDS)
            .await
            .unwrap();
        assert_eq!(snapshot.count, 3);
    }
    let key = format!(
        "usage/t1/{METRIC_EMAIL_SENDS}/{}",
        period_key(chrono::Utc::now())
    );
    let doc = store.get(&key).await.unwrap().unwrap();
    assert_eq!(doc["count"], json!(3));
}

#[tokio::test]
async fn check_vetoes_at_the_limit_without_mutation() {
    let store = MemoryStore::shared();
    let guard = UsageGuard::new(store.clone());

    // Free plan: campaigns limit 2.
    guard
        .enforce_usage_limit("t1", METRIC_CAMPAIGNS, 2)
        .await
        .unwrap();
    let err = guard.check_usage_limit("t1", METRIC_CAMPAIGNS).await.unwrap_err();
    assert!(matches!(err, BillingError::PlanLimit(_)));

    let key = format!("usage/t1/{METRIC_CAMPAIGNS}/{}", period_key(chrono::Utc::now()));
    let doc = store.get(&key).await.unwrap().unwrap();
    assert_eq!(doc["count"], json!(2));
}

#[tokio::test]
async fn multi_metric_enforcement_is_all_or_nothing() {
    let store = MemoryStore::shared();
    let guard = UsageGuard::new(store.clone());

    let charges = vec![
        UsageCharge {
            metric: METRIC_EMAIL_SENDS.to_string(),
            increment: 1,
        },
        UsageCharge {
            metric: METRIC_CAMPAIGNS.to_string(),
            increment: 1,
        },
    ];
    // Free plan allows 2 campaigns; the first two composite actions pass.
    for _ in 0..2 {
        guard.enforce_usage_limits("t1", &charges).await.unwrap();
    }
    let err = guard.enforce_usage_limits("t1", &charges).await.unwrap_err();
    assert!(matches!(err, BillingError::PlanLimit(_)));

    // The email increment applied before the campaign veto must be rolled
    // back: both counters still reflect two committed actions.
    let period = period_key(chrono::Utc::now());
    let emails = store
        .get(&format!("usage/t1/{METRIC_EMAIL_SENDS}/{period}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(emails["count"], json!(2));
    let campaigns = store
        .get(&format!("usage/t1/{METRIC_CAMPAIGNS}/{period}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(campaigns["count"], json!(2));
}

#[tokio::test]
async fn rollback_targets_the_period_that_was_charged() {
    let store = MemoryStore::shared();
    let guard = UsageGuard::new(store.clone());

    // Exhaust the free campaign quota inside a past billing period, then
    // veto a composite charge dated to that same period. The email
    // increment must be undone in that period, not in the current one.
    let past = chrono::DateTime::parse_from_rfc3339("2026-01-31T23:59:59Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    guard
        .enforce_usage_limit_at("t1", METRIC_CAMPAIGNS, 2, past)
        .await
        .unwrap();

    let charges = vec![
        UsageCharge {
            metric: METRIC_EMAIL_SENDS.to_string(),
            increment: 1,
        },
        UsageCharge {
            metric: METRIC_CAMPAIGNS.to_string(),
            increment: 1,
        },
    ];
    let err = guard
        .enforce_usage_limits_at("t1", &charges, past)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::PlanLimit(_)));

    let january = store
        .get(&format!("usage/t1/{METRIC_EMAIL_SENDS}/2026-01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        january["count"],
        json!(0),
        "the charged period must be rolled back to its prior value"
    );
    let current = store
        .get(&format!(
            "usage/t1/{METRIC_EMAIL_SENDS}/{}",
            period_key(chrono::Utc::now())
        ))
        .await
        .unwrap();
    assert!(
        current.is_none(),
        "no counter outside the charged period may be touched"
    );
}

#[tokio::test]
async fn unlimited_metrics_never_veto() {
    let store = MemoryStore::shared();
    store
        .set(
            "subscriptions/t1",
            json!({
                "tenant_id": "t1",
                "plan": "growth",
                "status": "active",
                "add_ons": {},
                "last_order_id": null,
                "updated_at": "2026-08-01T00:00:00Z",
            }),
        )
        .await
        .unwrap();
    let guard = UsageGuard::new(store);

    // Campaigns are unlimited on growth.
    let count = guard
        .enforce_usage_limit("t1", METRIC_CAMPAIGNS, 1_000_000)
        .await
        .unwrap();
    assert_eq!(count, 1_000_000);
}

#[tokio::test]
async fn unknown_metric_fails_closed_before_any_mutation() {
    let store = MemoryStore::shared();
    let guard = UsageGuard::new(store.clone());

    let charges = vec![
        UsageCharge {
            metric: METRIC_EMAIL_SENDS.to_string(),
            increment: 1,
        },
        UsageCharge {
            metric: "carrier_pigeons".to_string(),
            increment: 1,
        },
    ];
    let err = guard.enforce_usage_limits("t1", &charges).await.unwrap_err();
    assert!(matches!(err, BillingError::UnknownMetric(_)));

    let period = period_key(chrono::Utc::now());
    let emails = store
        .get(&format!("usage/t1/{METRIC_EMAIL_SENDS}/{period}"))
        .await
        .unwrap();
    assert!(emails.is_none(), "no counter may be touched on config errors");
}

#[tokio::test]
async fn non_positive_increments_are_rejected() {
    let guard = UsageGuard::new(MemoryStore::shared());
    let err = guard
        .enforce_usage_limit("t1", METRIC_EMAIL_SENDS, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::BadRequest(_)));
}
