//! Pre-consumption gate
//!
//! Decides, before a metered call runs, how much quota to hold back. Accounts
//! whose balance is comfortably above the trust threshold skip the hold
//! entirely and are charged in full at settlement.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::display::format_quota;
use super::ledger::{QuotaError, QuotaLedger};
use super::settlement::{PendingSettlement, SettlementWorker};
use crate::config::MeteringConfig;

// ============================================================================
// Types
// ============================================================================

/// Limits of the access token the call arrives with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimits {
    /// Token has no allowance cap of its own
    pub unlimited: bool,
    /// Allowance left on the token (ignored when `unlimited`)
    pub remaining: i64,
}

impl TokenLimits {
    pub fn unlimited() -> Self {
        Self {
            unlimited: true,
            remaining: 0,
        }
    }

    pub fn limited(remaining: i64) -> Self {
        Self {
            unlimited: false,
            remaining,
        }
    }
}

/// How much to reserve for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum ReservationPlan {
    /// Reserve this amount up front
    Hold(i64),
    /// Balance and token are trusted, reserve nothing
    Trusted,
}

impl ReservationPlan {
    pub fn amount(&self) -> i64 {
        match self {
            ReservationPlan::Hold(amount) => *amount,
            ReservationPlan::Trusted => 0,
        }
    }
}

/// Pure reservation decision
///
/// 1. a non-positive balance fails
/// 2. a balance that can't cover the request fails
/// 3. a balance strictly above `trust_threshold` is trusted when the token is
///    unlimited or still has more than `trust_threshold` left
pub fn plan_reservation(
    balance: i64,
    requested: i64,
    token: TokenLimits,
    trust_threshold: i64,
) -> Result<ReservationPlan, QuotaError> {
    if requested < 0 {
        return Err(QuotaError::InvalidAmount(format!(
            "requested quota must be non-negative, got {}",
            requested
        )));
    }
    if balance <= 0 || balance - requested < 0 {
        return Err(QuotaError::InsufficientBalance {
            balance,
            needed: requested,
        });
    }

    if balance > trust_threshold && (token.unlimited || token.remaining > trust_threshold) {
        return Ok(ReservationPlan::Trusted);
    }

    Ok(ReservationPlan::Hold(requested))
}

// ============================================================================
// PreConsumptionGate
// ============================================================================

/// Takes reservations against a [`QuotaLedger`] and hands back settlement guards
#[derive(Debug, Clone)]
pub struct PreConsumptionGate {
    worker: SettlementWorker,
    trust_threshold: i64,
}

impl PreConsumptionGate {
    pub fn new(worker: SettlementWorker, trust_threshold: i64) -> Self {
        Self {
            worker,
            trust_threshold,
        }
    }

    pub fn from_config(worker: SettlementWorker, config: &MeteringConfig) -> Self {
        Self::new(worker, config.trust_threshold)
    }

    pub fn trust_threshold(&self) -> i64 {
        self.trust_threshold
    }

    pub fn worker(&self) -> &SettlementWorker {
        &self.worker
    }

    fn ledger(&self) -> &Arc<dyn QuotaLedger> {
        self.worker.ledger()
    }

    /// Decide and take the reservation for one call
    ///
    /// The returned guard must be settled once the call finishes; dropping it
    /// refunds whatever was reserved.
    pub async fn decide_reservation(
        &self,
        account_id: &str,
        requested: i64,
        token: TokenLimits,
    ) -> Result<PendingSettlement, QuotaError> {
        let balance = self.ledger().balance(account_id).await?;

        let plan = plan_reservation(balance, requested, token, self.trust_threshold).map_err(|e| {
            log::debug!("[quota:gate] {} refused: {}", account_id, e);
            e
        })?;

        let amount = plan.amount();
        if amount > 0 {
            self.ledger()
                .reserve(account_id, amount)
                .await
                .map_err(|e| {
                    log::warn!("[quota:gate] Reserve for {} failed: {}", account_id, e);
                    QuotaError::PreConsumeFailed(e.to_string())
                })?;
            log::info!(
                "[quota:gate] {} reserved {}, balance before {}",
                account_id,
                format_quota(amount),
                format_quota(balance)
            );
        } else if plan == ReservationPlan::Trusted {
            log::info!(
                "[quota:gate] {} balance {} is trusted, no reservation",
                account_id,
                format_quota(balance)
            );
        }

        Ok(self
            .worker
            .track(account_id, amount, plan == ReservationPlan::Trusted))
    }
}

// ============================================================================
// Tests
// ============================================================================
