//! # allowance-core
//!
//! Quota metering core for per-call APIs.
//!
//! This crate provides:
//! - Database setup and migrations (`db` module)
//! - Metering configuration (`config` module)
//! - Reservation, settlement, usage windows and check-in (`services` module)
//! - Unified error handling (`error` module)

pub mod config;
pub mod db;
pub mod error;
pub mod services;

// Re-exports for convenience
pub use config::{CheckinSettings, MeteringConfig};
pub use db::{get_db_path, Database};
pub use error::{Error, Result};

pub use services::{
    create_metering, format_quota, BonusPolicy, CheckinDay, CheckinLedger, CheckinReceipt,
    CheckinStats, CheckinStatus, FixedBonus, MemoryQuotaLedger, Metering, PendingSettlement,
    PreConsumptionGate, QuotaError, QuotaLedger, RandomBonus, ReferenceClock, RefundFailure,
    SettlementOutcome, SettlementWorker, SqliteQuotaLedger, TokenLimits, UsageLog, UsageRecord,
    UsageWindow, UsageWindowAggregator,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
