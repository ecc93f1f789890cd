//! Quota ledger trait and error types
//!
//! Defines the interface every balance store must implement, plus the error
//! taxonomy shared by the gate, settlement and check-in paths.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors produced by the quota protocol
///
/// Every variant is terminal for the call that produced it; none of them is
/// retried inside the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    /// Check-in is switched off by configuration
    #[error("Check-in is not enabled")]
    FeatureDisabled,

    /// Balance cannot cover the requested amount
    #[error("Insufficient balance: remaining {balance}, needed {needed}")]
    InsufficientBalance { balance: i64, needed: i64 },

    /// The atomic reserve failed after the balance check passed
    #[error("Pre-consume failed: {0}")]
    PreConsumeFailed(String),

    /// Storage read failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Storage write failed
    #[error("Update failed: {0}")]
    UpdateFailed(String),

    /// The success-path correction could not be written; the account is
    /// still charged `reserved` and `delta` has to be applied by the caller
    #[error("Settlement failed after reserving {reserved}: delta {delta} not applied ({reason})")]
    SettlementFailed {
        reserved: i64,
        delta: i64,
        reason: String,
    },

    /// No balance row exists for the account
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// A check-in record already exists for this account and day
    #[error("Already checked in today ({date})")]
    AlreadyCheckedIn { date: String },

    /// Yesterday's usage is below the configured minimum
    #[error("Check-in requires yesterday's usage of at least {required}, yesterday's usage was {actual}")]
    NotEligible { required: i64, actual: i64 },

    /// Negative or otherwise unusable amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed input (e.g. a month that isn't `YYYY-MM`)
    #[error("Validation error: {0}")]
    Validation(String),
}

impl QuotaError {
    /// Wrap a storage read error with context
    pub fn query(context: &str, err: impl std::fmt::Display) -> Self {
        QuotaError::QueryFailed(format!("{}: {}", context, err))
    }

    /// Wrap a storage write error with context
    pub fn update(context: &str, err: impl std::fmt::Display) -> Self {
        QuotaError::UpdateFailed(format!("{}: {}", context, err))
    }
}

// ============================================================================
// Ledger Trait
// ============================================================================

/// Exclusive owner of account balances
///
/// Implementations must make `reserve` a single atomic check-and-decrement:
/// two concurrent reservations whose sum exceeds the balance must never both
/// succeed. `adjust` is an unconditional signed addition.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use allowance_core::services::quota::{QuotaError, QuotaLedger};
///
/// struct RemoteLedger;
///
/// #[async_trait]
/// impl QuotaLedger for RemoteLedger {
///     async fn balance(&self, account_id: &str) -> Result<i64, QuotaError> {
///         todo!()
///     }
///
///     async fn reserve(&self, account_id: &str, amount: i64) -> Result<(), QuotaError> {
///         todo!()
///     }
///
///     async fn adjust(&self, account_id: &str, delta: i64) -> Result<(), QuotaError> {
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Current spendable balance
    async fn balance(&self, account_id: &str) -> Result<i64, QuotaError>;

    /// Atomically take `amount` from the balance, failing if it would go negative
    async fn reserve(&self, account_id: &str, amount: i64) -> Result<(), QuotaError>;

    /// Apply a signed delta (refund/award when positive, consumption when negative)
    async fn adjust(&self, account_id: &str, delta: i64) -> Result<(), QuotaError>;
}

/// Reject negative reservation amounts before touching storage
pub(crate) fn check_reserve_amount(amount: i64) -> Result<(), QuotaError> {
    if amount < 0 {
        return Err(QuotaError::InvalidAmount(format!(
            "reservation must be non-negative, got {}",
            amount
        )));
    }
    Ok(())
}

// ============================================================================
// In-memory Ledger
// ============================================================================

/// Process-local ledger keyed by account id
///
/// Serializes every mutation behind one mutex. Useful for embedding the
/// gate in a single process and for tests.
#[derive(Debug, Default)]
pub struct MemoryQuotaLedger {
    balances: Mutex<HashMap<String, i64>>,
}

impl MemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger pre-populated with the given balances
    pub fn with_accounts<I, K>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        let balances = accounts.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            balances: Mutex::new(balances),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        // A panic while holding the guard can't leave a half-applied delta,
        // so the map is still consistent.
        self.balances.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl QuotaLedger for MemoryQuotaLedger {
    async fn balance(&self, account_id: &str) -> Result<i64, QuotaError> {
        self.lock()
            .get(account_id)
            .copied()
            .ok_or_else(|| QuotaError::AccountNotFound(account_id.to_string()))
    }

    async fn reserve(&self, account_id: &str, amount: i64) -> Result<(), QuotaError> {
        check_reserve_amount(amount)?;

        let mut balances = self.lock();
        let balance = balances
            .get_mut(account_id)
            .ok_or_else(|| QuotaError::AccountNotFound(account_id.to_string()))?;

        if *balance < amount {
            return Err(QuotaError::InsufficientBalance {
                balance: *balance,
                needed: amount,
            });
        }
        *balance -= amount;
        Ok(())
    }

    async fn adjust(&self, account_id: &str, delta: i64) -> Result<(), QuotaError> {
        let mut balances = self.lock();
        let balance = balances
            .get_mut(account_id)
            .ok_or_else(|| QuotaError::AccountNotFound(account_id.to_string()))?;
        *balance = balance
            .checked_add(delta)
            .ok_or_else(|| QuotaError::UpdateFailed(format!("balance overflow for {}", account_id)))?;
        Ok(())
    }
}
