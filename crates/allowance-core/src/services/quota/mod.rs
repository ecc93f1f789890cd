//! Quota reservation and settlement
//!
//! Protects account balances against overdraft while metered calls run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ PreConsumptionGate                                      │
//! │   - decide_reservation() -> PendingSettlement           │
//! └─────────────────────────────────────────────────────────┘
//!          │ reserve()                     │
//!          ▼                               ▼
//! ┌────────────────────────┐   ┌────────────────────────────┐
//! │ trait QuotaLedger      │◄──│ SettlementWorker           │
//! │   - balance()          │   │   - complete(): adjust()   │
//! │   - reserve()          │   │   - fail(): spawn refund   │
//! │   - adjust()           │   │   - drain()                │
//! └────────────────────────┘   └────────────────────────────┘
//!     │              │
//!     ▼              ▼
//! ┌────────┐    ┌────────┐
//! │ SQLite │    │ Memory │
//! └────────┘    └────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use allowance_core::services::quota::{
//!     PreConsumptionGate, SettlementWorker, SqliteQuotaLedger, TokenLimits,
//! };
//!
//! let ledger = Arc::new(SqliteQuotaLedger::new(pool));
//! let gate = PreConsumptionGate::new(SettlementWorker::new(ledger), 500_000);
//!
//! let pending = gate.decide_reservation("acct", 1_000, TokenLimits::unlimited()).await?;
//! match run_call().await {
//!     Ok(cost) => { pending.complete(cost, Some("model")).await?; }
//!     Err(_) => { pending.fail(); }
//! }
//! ```

pub mod display;
pub mod gate;
pub mod ledger;
pub mod settlement;
pub mod store;

pub use display::{format_quota, QUOTA_PER_UNIT};

pub use gate::{plan_reservation, PreConsumptionGate, ReservationPlan, TokenLimits};

pub use ledger::{MemoryQuotaLedger, QuotaError, QuotaLedger};

pub use settlement::{
    PendingSettlement, RefundErrorReporter, RefundFailure, SettlementOutcome, SettlementWorker,
};

pub use store::SqliteQuotaLedger;
