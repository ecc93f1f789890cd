//! Integration tests for reservation and settlement against SQLite

use std::sync::{Arc, Mutex};

use allowance_core::db::Database;
use allowance_core::services::quota::{
    QuotaError, QuotaLedger, RefundFailure, SettlementOutcome, SettlementWorker, TokenLimits,
};
use allowance_core::services::usage::ReferenceClock;
use allowance_core::{Metering, MeteringConfig};
use chrono::{FixedOffset, TimeZone, Utc};
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let db = Database::open(db_path).await.expect("Failed to create test database");
    (db, temp_dir)
}

fn test_clock() -> ReferenceClock {
    let tz = FixedOffset::east_opt(8 * 3600).unwrap();
    ReferenceClock::fixed(tz, Utc.with_ymd_and_hms(2026, 6, 1, 6, 0, 0).unwrap())
}

async fn metering_with(balance: i64) -> (Metering, TempDir) {
    let (db, dir) = create_test_db().await;
    let metering = Metering::with_clock(&db, MeteringConfig::default(), test_clock());
    metering.ledger.open_account("acct", balance).await.unwrap();
    (metering, dir)
}

#[tokio::test]
async fn test_reserved_call_settles_to_actual_cost() {
    let (m, _dir) = metering_with(1_000).await;

    let pending = m
        .gate
        .decide_reservation("acct", 100, TokenLimits::limited(100))
        .await
        .unwrap();
    assert_eq!(pending.reserved(), 100);
    assert_eq!(m.ledger.balance("acct").await.unwrap(), 900);

    let outcome = pending.complete(80, Some("model-a")).await.unwrap();
    assert_eq!(
        outcome,
        SettlementOutcome::Settled {
            reserved: 100,
            actual: 80,
            delta: 20
        }
    );
    assert_eq!(m.ledger.balance("acct").await.unwrap(), 920);

    // Settlement stamps usage with the reference clock, so it lands in today
    assert_eq!(m.usage.today_usage("acct").await.unwrap(), 80);
}

#[tokio::test]
async fn test_trusted_call_skips_reservation() {
    let (m, _dir) = metering_with(1_000_000).await;

    let pending = m
        .gate
        .decide_reservation("acct", 100, TokenLimits::unlimited())
        .await
        .unwrap();
    assert!(pending.is_trusted());
    assert_eq!(m.ledger.balance("acct").await.unwrap(), 1_000_000);

    pending.complete(300, None).await.unwrap();
    assert_eq!(m.ledger.balance("acct").await.unwrap(), 999_700);
}

#[tokio::test]
async fn test_insufficient_balance_changes_nothing() {
    let (m, _dir) = metering_with(50).await;

    let err = m
        .gate
        .decide_reservation("acct", 100, TokenLimits::unlimited())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        QuotaError::InsufficientBalance {
            balance: 50,
            needed: 100
        }
    );
    assert_eq!(m.ledger.balance("acct").await.unwrap(), 50);
    assert_eq!(m.usage.today_usage("acct").await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_call_is_refunded() {
    let (m, _dir) = metering_with(1_000).await;

    let pending = m
        .gate
        .decide_reservation("acct", 250, TokenLimits::limited(0))
        .await
        .unwrap();
    assert_eq!(pending.fail(), SettlementOutcome::Refunded { amount: 250 });

    m.shutdown().await;
    assert_eq!(m.ledger.balance("acct").await.unwrap(), 1_000);
    assert_eq!(m.usage.today_usage("acct").await.unwrap(), 0);
}

#[tokio::test]
async fn test_aborted_call_is_refunded() {
    let (m, _dir) = metering_with(1_000).await;

    let gate = m.gate.clone();
    let call = tokio::spawn(async move {
        let _pending = gate
            .decide_reservation("acct", 300, TokenLimits::limited(0))
            .await
            .unwrap();
        std::future::pending::<()>().await;
    });

    // Wait until the reservation is visible, then cancel the call.
    while m.ledger.balance("acct").await.unwrap() == 1_000 {
        tokio::task::yield_now().await;
    }
    call.abort();
    let _ = call.await;

    m.shutdown().await;
    assert_eq!(m.ledger.balance("acct").await.unwrap(), 1_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_overdraw() {
    let (m, _dir) = metering_with(100).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let gate = m.gate.clone();
        handles.push(tokio::spawn(async move {
            gate.decide_reservation("acct", 30, TokenLimits::limited(30))
                .await
        }));
    }

    let mut held = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(pending) => held.push(pending),
            Err(e) => assert!(
                matches!(
                    e,
                    QuotaError::InsufficientBalance { .. } | QuotaError::PreConsumeFailed(_)
                ),
                "unexpected error {:?}",
                e
            ),
        }
    }

    assert!(held.len() <= 3);
    let balance = m.ledger.balance("acct").await.unwrap();
    assert_eq!(balance, 100 - 30 * held.len() as i64);

    for pending in held {
        pending.complete(30, None).await.unwrap();
    }
    assert!(m.ledger.balance("acct").await.unwrap() >= 0);
}

#[tokio::test]
async fn test_refund_failure_reaches_reporter() {
    let (db, _dir) = create_test_db().await;
    let m = Metering::with_clock(&db, MeteringConfig::default(), test_clock());

    let failures: Arc<Mutex<Vec<RefundFailure>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let worker = SettlementWorker::new(m.ledger.clone())
        .with_error_reporter(move |f| sink.lock().unwrap().push(f.clone()));

    // Nothing was reserved for this account, and it doesn't exist.
    let _ = worker.track("missing", 40, false).fail();
    worker.drain().await;

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].amount, 40);
    assert!(matches!(failures[0].error, QuotaError::AccountNotFound(_)));
}
