//! Services module

pub mod checkin;
pub mod metering;
pub mod quota;
pub mod usage;

pub use checkin::{
    BonusPolicy, CheckinDay, CheckinLedger, CheckinReceipt, CheckinStats, CheckinStatus,
    FixedBonus, RandomBonus,
};
pub use metering::{create_metering, Metering};
pub use quota::{
    format_quota, MemoryQuotaLedger, PendingSettlement, PreConsumptionGate, QuotaError,
    QuotaLedger, RefundFailure, SettlementOutcome, SettlementWorker, SqliteQuotaLedger,
    TokenLimits,
};
pub use usage::{ReferenceClock, UsageLog, UsageRecord, UsageWindow, UsageWindowAggregator};
