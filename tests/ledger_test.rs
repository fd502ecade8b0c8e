//! Usage ledger and sales-order ledger integration tests.
//!
//! These need a running PostgreSQL (set `TEST_DATABASE_URL`) and are
//! ignored by default; run them with `cargo test -- --ignored`.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::TestDb;
use rust_decimal_macros::dec;
use serial_test::serial;
use usage_billing::error::BillingError;
use usage_billing::models::{BillingWindow, RecordUsage};
use usage_billing::services::Database;

fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

fn window(start_hour: u32, end_hour: u32) -> BillingWindow {
    BillingWindow::new(ts(1, start_hour), ts(1, end_hour)).unwrap()
}

fn record(tenant: &str, resource: &str, w: BillingWindow) -> RecordUsage {
    RecordUsage {
        tenant_id: tenant.to_string(),
        resource_id: resource.to_string(),
        service: "bandwidth-out".to_string(),
        volume: dec!(100),
        window: w,
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn overlapping_inserts_accept_exactly_one_in_either_order() {
    let harness = TestDb::spawn().await;
    harness.seed_resource("t1", "r1").await;
    harness.seed_resource("t1", "r2").await;

    let a = window(0, 2);
    let b = window(1, 3);

    // a first, b rejected.
    harness.db.record_usage(&record("t1", "r1", a)).await.unwrap();
    let err = harness.db.record_usage(&record("t1", "r1", b)).await.unwrap_err();
    assert!(matches!(err, BillingError::Overlap { .. }));

    // b first on a fresh resource, a rejected: order must not matter.
    harness.db.record_usage(&record("t1", "r2", b)).await.unwrap();
    let err = harness.db.record_usage(&record("t1", "r2", a)).await.unwrap_err();
    assert!(matches!(err, BillingError::Overlap { .. }));

    harness.cleanup().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn concurrent_overlapping_inserts_resolve_to_one_success() {
    let harness = TestDb::spawn().await;
    harness.seed_resource("t1", "r1").await;

    let a = record("t1", "r1", window(0, 2));
    let b = record("t1", "r1", window(1, 3));

    let (res_a, res_b) = tokio::join!(harness.db.record_usage(&a), harness.db.record_usage(&b));
    let successes = [&res_a, &res_b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one concurrent insert must win");

    let loser = if res_a.is_ok() { res_b } else { res_a };
    assert!(matches!(loser.unwrap_err(), BillingError::Overlap { .. }));

    harness.cleanup().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn touching_half_open_windows_are_both_accepted() {
    let harness = TestDb::spawn().await;
    harness.seed_resource("t1", "r1").await;

    harness
        .db
        .record_usage(&record("t1", "r1", window(0, 1)))
        .await
        .unwrap();
    harness
        .db
        .record_usage(&record("t1", "r1", window(1, 2)))
        .await
        .unwrap();

    harness.cleanup().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn overlap_is_scoped_to_the_service_dimension() {
    let harness = TestDb::spawn().await;
    harness.seed_resource("t1", "r1").await;

    let w = window(0, 2);
    harness.db.record_usage(&record("t1", "r1", w)).await.unwrap();

    let mut other_service = record("t1", "r1", w);
    other_service.service = "instance".to_string();
    harness.db.record_usage(&other_service).await.unwrap();

    harness.cleanup().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn query_usage_returns_window_intersecting_entries_ascending() {
    let harness = TestDb::spawn().await;
    harness.seed_resource("t1", "r1").await;

    harness.db.record_usage(&record("t1", "r1", window(4, 6))).await.unwrap();
    harness.db.record_usage(&record("t1", "r1", window(0, 2))).await.unwrap();
    harness.db.record_usage(&record("t1", "r1", window(8, 10))).await.unwrap();

    let entries = harness
        .db
        .query_usage("t1", "r1", "bandwidth-out", &window(1, 7))
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert!(entries[0].start < entries[1].start);
    assert_eq!(entries[0].start, ts(1, 0));
    assert_eq!(entries[1].start, ts(1, 4));

    harness.cleanup().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn rebilling_a_committed_period_is_rejected() {
    let harness = TestDb::spawn().await;
    harness.seed_resource("t1", "r1").await;

    let w = window(0, 12);
    let mut tx = harness.db.begin().await.unwrap();
    Database::commit_sales_order(&mut tx, "t1", "r1", &w).await.unwrap();
    tx.commit().await.unwrap();

    assert!(harness.db.period_already_billed("t1", "r1", &w).await.unwrap());

    let mut tx = harness.db.begin().await.unwrap();
    let err = Database::commit_sales_order(&mut tx, "t1", "r1", &window(6, 18))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::AlreadyBilled { .. }));
    tx.rollback().await.unwrap();

    harness.cleanup().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL (TEST_DATABASE_URL)"]
async fn second_ingest_of_the_same_window_commits_zero_rows() {
    let harness = TestDb::spawn().await;
    harness.seed_resource("t1", "r1").await;

    let w = window(0, 12);
    harness.db.record_usage(&record("t1", "r1", w)).await.unwrap();
    let err = harness.db.record_usage(&record("t1", "r1", w)).await.unwrap_err();
    assert!(matches!(err, BillingError::Overlap { .. }));

    let entries = harness
        .db
        .query_usage("t1", "r1", "bandwidth-out", &w)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);

    harness.cleanup().await;
}
