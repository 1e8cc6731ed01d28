//! Entitlement gate and quota ledger tests
//!
//! Exercises plan limit enforcement, the race-free conditional increment,
//! unlimited tiers, and the anonymous-owner denial.

mod helpers;

use fab_dp::db::subscriptions;
use fab_dp::entitlement::EntitlementGate;
use fab_dp::models::{PlanType, ResourceType};
use helpers::test_pool;

#[tokio::test]
async fn unknown_users_default_to_a_free_plan() {
    let (pool, _dir) = test_pool().await;
    let gate = EntitlementGate::new(pool.clone());

    let entitlement = gate.authorize("new-user", ResourceType::Stl).await.unwrap();
    assert!(entitlement.allowed);
    // Free plan: 10 STL downloads, one consumed
    assert_eq!(entitlement.remaining, Some(9));

    let summary = gate.usage("new-user").await.unwrap();
    assert_eq!(summary.plan_type, PlanType::Free);
}

#[tokio::test]
async fn zero_limit_resources_are_denied_without_consuming() {
    let (pool, _dir) = test_pool().await;
    let gate = EntitlementGate::new(pool.clone());

    // Free plan includes no STEP downloads at all
    let entitlement = gate.authorize("user-1", ResourceType::Step).await.unwrap();
    assert!(!entitlement.allowed);
    assert_eq!(entitlement.remaining, Some(0));

    let summary = gate.usage("user-1").await.unwrap();
    let step = summary
        .resources
        .iter()
        .find(|r| r.resource_type == ResourceType::Step)
        .unwrap();
    assert_eq!(step.used, 0);
}

#[tokio::test]
async fn grants_exactly_the_limit_then_denies() {
    let (pool, _dir) = test_pool().await;
    let gate = EntitlementGate::new(pool.clone());

    // Free plan allows exactly one manufacturing quote per period
    let first = gate
        .authorize("user-1", ResourceType::ManufacturingQuote)
        .await
        .unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, Some(0));

    let second = gate
        .authorize("user-1", ResourceType::ManufacturingQuote)
        .await
        .unwrap();
    assert!(!second.allowed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_requests_never_exceed_the_limit() {
    let (pool, _dir) = test_pool().await;
    let gate = EntitlementGate::new(pool.clone());

    // Warm the subscription row so the burst races only on the ledger
    subscriptions::get_or_create_plan(&pool, "racer", chrono::Utc::now())
        .await
        .unwrap();

    // Free plan: 10 STL downloads. Fire 25 concurrent requests.
    let mut handles = Vec::new();
    for _ in 0..25 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.authorize("racer", ResourceType::Stl).await.unwrap()
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().allowed {
            granted += 1;
        }
    }

    assert_eq!(granted, 10, "no double-grant under race");

    let summary = gate.usage("racer").await.unwrap();
    let stl = summary
        .resources
        .iter()
        .find(|r| r.resource_type == ResourceType::Stl)
        .unwrap();
    assert_eq!(stl.used, 10);
    assert_eq!(stl.remaining, Some(0));
}

#[tokio::test]
async fn business_stl_downloads_are_unlimited() {
    let (pool, _dir) = test_pool().await;
    let gate = EntitlementGate::new(pool.clone());

    subscriptions::upsert_plan(&pool, "biz-user", PlanType::Business, chrono::Utc::now())
        .await
        .unwrap();

    for _ in 0..50 {
        let entitlement = gate.authorize("biz-user", ResourceType::Stl).await.unwrap();
        assert!(entitlement.allowed);
        assert_eq!(entitlement.remaining, None);
    }

    // STEP stays bounded even on business
    for _ in 0..10 {
        assert!(gate.authorize("biz-user", ResourceType::Step).await.unwrap().allowed);
    }
    assert!(!gate.authorize("biz-user", ResourceType::Step).await.unwrap().allowed);
}

#[tokio::test]
async fn anonymous_users_are_always_denied() {
    let (pool, _dir) = test_pool().await;
    let gate = EntitlementGate::new(pool.clone());

    let entitlement = gate.authorize("anonymous", ResourceType::Stl).await.unwrap();
    assert!(!entitlement.allowed);

    let entitlement = gate.authorize("", ResourceType::Stl).await.unwrap();
    assert!(!entitlement.allowed);
}

#[tokio::test]
async fn plan_upgrades_take_effect_for_subsequent_grants() {
    let (pool, _dir) = test_pool().await;
    let gate = EntitlementGate::new(pool.clone());

    // Exhaust the free quote allowance
    assert!(gate
        .authorize("upgrader", ResourceType::ManufacturingQuote)
        .await
        .unwrap()
        .allowed);
    assert!(!gate
        .authorize("upgrader", ResourceType::ManufacturingQuote)
        .await
        .unwrap()
        .allowed);

    // Billing webhook upgrades the plan; the period resets with it
    subscriptions::upsert_plan(&pool, "upgrader", PlanType::Pro, chrono::Utc::now())
        .await
        .unwrap();

    let entitlement = gate
        .authorize("upgrader", ResourceType::ManufacturingQuote)
        .await
        .unwrap();
    assert!(entitlement.allowed);
}
