//! Post-call settlement
//!
//! Every reservation taken by the gate is wrapped in a [`PendingSettlement`]
//! guard. The guard is consumed by exactly one of:
//!
//! - [`PendingSettlement::complete`]: the call succeeded, apply
//!   `reserved - actual` synchronously
//! - [`PendingSettlement::fail`]: the call failed, hand the reservation to the
//!   background refund worker
//! - `Drop`: the caller lost the guard (panic, cancelled future), treated as
//!   a failure
//!
//! Refunds run as detached tokio tasks. They outlive the worker that spawned
//! them, and a `TaskTracker` lets shutdown [`SettlementWorker::drain`] them.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use super::display::format_quota;
use super::ledger::{QuotaError, QuotaLedger};
use crate::services::usage::UsageWindowAggregator;

// ============================================================================
// Types
// ============================================================================

/// A refund that could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundFailure {
    pub account_id: String,
    pub amount: i64,
    pub error: QuotaError,
}

/// Sink for refund failures, called from the refund task
pub type RefundErrorReporter = Arc<dyn Fn(&RefundFailure) + Send + Sync>;

/// What happened to a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Call succeeded and `delta = reserved - actual` was applied to the balance
    Settled { reserved: i64, actual: i64, delta: i64 },
    /// Call failed and the reservation was handed to the refund worker
    Refunded { amount: i64 },
}

// ============================================================================
// SettlementWorker
// ============================================================================

/// Applies settlement deltas and runs asynchronous refunds
#[derive(Clone)]
pub struct SettlementWorker {
    ledger: Arc<dyn QuotaLedger>,
    usage: Option<UsageWindowAggregator>,
    reporter: RefundErrorReporter,
    refunds: TaskTracker,
}

impl fmt::Debug for SettlementWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementWorker")
            .field("records_usage", &self.usage.is_some())
            .finish_non_exhaustive()
    }
}

impl SettlementWorker {
    pub fn new(ledger: Arc<dyn QuotaLedger>) -> Self {
        // Kept closed so `wait` resolves whenever no refund is in flight.
        let refunds = TaskTracker::new();
        refunds.close();
        Self {
            ledger,
            usage: None,
            reporter: Arc::new(|_| {}),
            refunds,
        }
    }

    /// Record a usage entry for every successful settlement, stamped with
    /// the aggregator's clock
    pub fn with_usage(mut self, usage: UsageWindowAggregator) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Forward refund failures to `reporter` in addition to the error log
    pub fn with_error_reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&RefundFailure) + Send + Sync + 'static,
    {
        self.reporter = Arc::new(reporter);
        self
    }

    /// The ledger this worker settles against
    pub fn ledger(&self) -> &Arc<dyn QuotaLedger> {
        &self.ledger
    }

    /// Wrap an already-taken reservation in a settlement guard
    pub fn track(&self, account_id: &str, reserved: i64, trusted: bool) -> PendingSettlement {
        PendingSettlement {
            account_id: account_id.to_string(),
            reserved,
            trusted,
            worker: self.clone(),
            open: true,
        }
    }

    /// Return `amount` to the account on a background task
    ///
    /// Returns `false` when nothing was scheduled, either because the amount
    /// is zero or because there is no runtime to run the task on (the failure
    /// is reported in that case).
    pub fn schedule_refund(&self, account_id: String, amount: i64) -> bool {
        if amount <= 0 {
            return false;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                let failure = RefundFailure {
                    account_id,
                    amount,
                    error: QuotaError::UpdateFailed(
                        "no async runtime available to run refund".to_string(),
                    ),
                };
                log::error!(
                    "[quota:settle] Refund of {} to {} lost: {}",
                    format_quota(failure.amount),
                    failure.account_id,
                    failure.error
                );
                (self.reporter)(&failure);
                return false;
            }
        };

        let ledger = Arc::clone(&self.ledger);
        let reporter = Arc::clone(&self.reporter);

        self.refunds
            .spawn_on(run_refund(ledger, reporter, account_id, amount), &handle);
        true
    }

    /// Number of refund tasks that have not finished yet
    pub fn pending_refunds(&self) -> usize {
        self.refunds.len()
    }

    /// Wait for every outstanding refund, including ones scheduled while waiting
    pub async fn drain(&self) {
        let pending = self.refunds.len();
        if pending > 0 {
            log::debug!("[quota:settle] Draining {} refund task(s)", pending);
        }
        self.refunds.wait().await;
    }

    async fn record_usage(&self, account_id: &str, cost: i64, model: Option<&str>) {
        let Some(usage) = &self.usage else {
            return;
        };
        let at = usage.clock().now_utc();
        if let Err(e) = usage.log().record(account_id, cost, model, at).await {
            log::warn!("[usage] Failed to record usage for {}: {}", account_id, e);
        }
    }
}

async fn run_refund(
    ledger: Arc<dyn QuotaLedger>,
    reporter: RefundErrorReporter,
    account_id: String,
    amount: i64,
) {
    match ledger.adjust(&account_id, amount).await {
        Ok(()) => {
            log::info!(
                "[quota:settle] Refunded {} to {}",
                format_quota(amount),
                account_id
            );
        }
        Err(error) => {
            log::error!(
                "[quota:settle] Refund of {} to {} failed: {}",
                format_quota(amount),
                account_id,
                error
            );
            reporter(&RefundFailure {
                account_id,
                amount,
                error,
            });
        }
    }
}

// ============================================================================
// PendingSettlement
// ============================================================================

/// A reservation awaiting the outcome of its call
///
/// Settling consumes the guard, so a reservation is settled at most once.
/// Dropping it unsettled refunds the reservation.
#[must_use = "dropping a reservation unsettled refunds it"]
pub struct PendingSettlement {
    account_id: String,
    reserved: i64,
    trusted: bool,
    worker: SettlementWorker,
    open: bool,
}

impl fmt::Debug for PendingSettlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSettlement")
            .field("account_id", &self.account_id)
            .field("reserved", &self.reserved)
            .field("trusted", &self.trusted)
            .field("open", &self.open)
            .finish()
    }
}

impl PendingSettlement {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Amount taken from the balance up front (0 for trusted calls)
    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    /// Whether the gate skipped the reservation because the balance was trusted
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Settle by call outcome
    pub async fn settle(
        self,
        actual_cost: i64,
        succeeded: bool,
    ) -> Result<SettlementOutcome, QuotaError> {
        if succeeded {
            self.complete(actual_cost, None).await
        } else {
            Ok(self.fail())
        }
    }

    /// The call succeeded and cost `actual_cost`
    ///
    /// A negative cost is rejected and the guard is dropped, which refunds
    /// the reservation. If the correction itself cannot be written the guard
    /// is still consumed; [`QuotaError::SettlementFailed`] carries the delta
    /// to re-apply through [`QuotaLedger::adjust`].
    pub async fn complete(
        mut self,
        actual_cost: i64,
        model: Option<&str>,
    ) -> Result<SettlementOutcome, QuotaError> {
        if actual_cost < 0 {
            return Err(QuotaError::InvalidAmount(format!(
                "actual cost must be non-negative, got {}",
                actual_cost
            )));
        }

        // Close before awaiting: a cancelled adjust must not also trigger the
        // drop refund.
        self.open = false;

        let delta = self.reserved - actual_cost;
        if delta != 0 {
            self.worker
                .ledger
                .adjust(&self.account_id, delta)
                .await
                .map_err(|e| {
                    log::error!(
                        "[quota:settle] Settlement delta {} for {} failed: {}",
                        delta,
                        self.account_id,
                        e
                    );
                    QuotaError::SettlementFailed {
                        reserved: self.reserved,
                        delta,
                        reason: e.to_string(),
                    }
                })?;
        }

        log::info!(
            "[quota:settle] {} settled: reserved {}, actual {}, delta {}",
            self.account_id,
            format_quota(self.reserved),
            format_quota(actual_cost),
            delta
        );

        self.worker
            .record_usage(&self.account_id, actual_cost, model)
            .await;

        Ok(SettlementOutcome::Settled {
            reserved: self.reserved,
            actual: actual_cost,
            delta,
        })
    }

    /// The call failed; refund the whole reservation in the background
    pub fn fail(mut self) -> SettlementOutcome {
        self.open = false;
        if self.reserved > 0 {
            log::debug!(
                "[quota:settle] Call failed for {}, refunding {}",
                self.account_id,
                format_quota(self.reserved)
            );
            self.worker
                .schedule_refund(self.account_id.clone(), self.reserved);
        }
        SettlementOutcome::Refunded {
            amount: self.reserved,
        }
    }
}

impl Drop for PendingSettlement {
    fn drop(&mut self) {
        if !self.open || self.reserved <= 0 {
            return;
        }
        log::warn!(
            "[quota:settle] Reservation of {} for {} dropped unsettled, refunding",
            format_quota(self.reserved),
            self.account_id
        );
        self.worker
            .schedule_refund(self.account_id.clone(), self.reserved);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::services::quota::MemoryQuotaLedger;

    async fn reserved_worker(balance: i64, reserve: i64) -> (SettlementWorker, PendingSettlement) {
        let ledger = Arc::new(MemoryQuotaLedger::with_accounts([("acct", balance)]));
        ledger.reserve("acct", reserve).await.unwrap();
        let worker = SettlementWorker::new(ledger);
        let pending = worker.track("acct", reserve, false);
        (worker, pending)
    }

    #[tokio::test]
    async fn test_success_returns_unused_reservation() {
        let (worker, pending) = reserved_worker(1000, 100).await;
        let outcome = pending.complete(80, Some("model-a")).await.unwrap();

        assert_eq!(
            outcome,
            SettlementOutcome::Settled {
                reserved: 100,
                actual: 80,
                delta: 20
            }
        );
        assert_eq!(worker.ledger().balance("acct").await.unwrap(), 920);
    }

    #[tokio::test]
    async fn test_success_charges_overrun() {
        let (worker, pending) = reserved_worker(1000, 100).await;
        pending.settle(130, true).await.unwrap();
        assert_eq!(worker.ledger().balance("acct").await.unwrap(), 870);
    }

    #[tokio::test]
    async fn test_trusted_call_charges_full_cost() {
        let ledger = Arc::new(MemoryQuotaLedger::with_accounts([("acct", 1_000_000)]));
        let worker = SettlementWorker::new(ledger);
        let pending = worker.track("acct", 0, true);
        assert!(pending.is_trusted());

        pending.complete(300, None).await.unwrap();
        assert_eq!(worker.ledger().balance("acct").await.unwrap(), 999_700);
    }

    #[tokio::test]
    async fn test_failure_refunds_after_drain() {
        let (worker, pending) = reserved_worker(1000, 100).await;
        assert_eq!(pending.fail(), SettlementOutcome::Refunded { amount: 100 });

        worker.drain().await;
        assert_eq!(worker.pending_refunds(), 0);
        assert_eq!(worker.ledger().balance("acct").await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_failure_with_zero_reservation_schedules_nothing() {
        let ledger = Arc::new(MemoryQuotaLedger::with_accounts([("acct", 1000)]));
        let worker = SettlementWorker::new(ledger);
        let pending = worker.track("acct", 0, true);

        assert_eq!(pending.fail(), SettlementOutcome::Refunded { amount: 0 });
        assert_eq!(worker.pending_refunds(), 0);
        assert_eq!(worker.ledger().balance("acct").await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_dropped_guard_refunds() {
        let (worker, pending) = reserved_worker(500, 200).await;
        drop(pending);

        worker.drain().await;
        assert_eq!(worker.ledger().balance("acct").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_negative_cost_rejected_and_refunded() {
        let (worker, pending) = reserved_worker(500, 200).await;
        let err = pending.complete(-1, None).await.unwrap_err();
        assert!(matches!(err, QuotaError::InvalidAmount(_)));

        worker.drain().await;
        assert_eq!(worker.ledger().balance("acct").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_refund_failure_is_reported() {
        let failures: Arc<Mutex<Vec<RefundFailure>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);

        let worker = SettlementWorker::new(Arc::new(MemoryQuotaLedger::new()))
            .with_error_reporter(move |f| sink.lock().unwrap().push(f.clone()));

        // Account doesn't exist, so the refund adjust fails.
        let _ = worker.track("ghost", 75, false).fail();
        worker.drain().await;

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].account_id, "ghost");
        assert_eq!(failures[0].amount, 75);
        assert_eq!(
            failures[0].error,
            QuotaError::AccountNotFound("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn test_refund_survives_dropped_worker() {
        let ledger = Arc::new(MemoryQuotaLedger::with_accounts([("acct", 1000)]));
        ledger.reserve("acct", 100).await.unwrap();

        let worker = SettlementWorker::new(ledger.clone());
        let _ = worker.track("acct", 100, false).fail();
        drop(worker);

        for _ in 0..100 {
            if ledger.balance("acct").await.unwrap() == 1000 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ledger.balance("acct").await.unwrap(), 1000);
    }

    /// Balance stays readable but every write fails
    struct ReadOnlyLedger(MemoryQuotaLedger);

    #[async_trait::async_trait]
    impl QuotaLedger for ReadOnlyLedger {
        async fn balance(&self, account_id: &str) -> Result<i64, QuotaError> {
            self.0.balance(account_id).await
        }

        async fn reserve(&self, _account_id: &str, _amount: i64) -> Result<(), QuotaError> {
            Err(QuotaError::UpdateFailed("disk full".to_string()))
        }

        async fn adjust(&self, _account_id: &str, _delta: i64) -> Result<(), QuotaError> {
            Err(QuotaError::UpdateFailed("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_correction_reports_delta() {
        let ledger = Arc::new(ReadOnlyLedger(MemoryQuotaLedger::with_accounts([("acct", 900)])));
        let worker = SettlementWorker::new(ledger);

        let err = worker
            .track("acct", 100, false)
            .complete(80, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QuotaError::SettlementFailed {
                reserved: 100,
                delta: 20,
                reason: "Update failed: disk full".to_string(),
            }
        );
        // Guard was consumed, so no drop refund was scheduled on top.
        assert_eq!(worker.pending_refunds(), 0);
    }

    #[test]
    fn test_refund_without_runtime_is_reported() {
        let failures: Arc<Mutex<Vec<RefundFailure>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let worker = SettlementWorker::new(Arc::new(MemoryQuotaLedger::new()))
            .with_error_reporter(move |f| sink.lock().unwrap().push(f.clone()));

        assert!(!worker.schedule_refund("acct".to_string(), 10));
        assert_eq!(failures.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_outcome_serializes_with_kind() {
        let json = serde_json::to_value(SettlementOutcome::Refunded { amount: 5 }).unwrap();
        assert_eq!(json["kind"], "refunded");
        assert_eq!(json["amount"], 5);
    }
}
