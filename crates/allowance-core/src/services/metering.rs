//! Metering wiring
//!
//! Builds the gate, settlement worker, usage aggregator and check-in ledger
//! over one database so callers don't have to assemble them by hand.

use std::sync::Arc;

use crate::config::MeteringConfig;
use crate::db::Database;
use crate::error::Result;
use crate::services::checkin::CheckinLedger;
use crate::services::quota::{PreConsumptionGate, SettlementWorker, SqliteQuotaLedger};
use crate::services::usage::{ReferenceClock, UsageLog, UsageWindowAggregator};

/// All metering components sharing one SQLite pool
#[derive(Debug, Clone)]
pub struct Metering {
    pub config: MeteringConfig,
    pub ledger: Arc<SqliteQuotaLedger>,
    pub usage: UsageWindowAggregator,
    pub worker: SettlementWorker,
    pub gate: PreConsumptionGate,
    pub checkin: CheckinLedger,
}

impl Metering {
    /// Wire everything up on the system clock
    pub fn new(db: &Database, config: MeteringConfig) -> Result<Self> {
        config.validate()?;
        let clock = ReferenceClock::from_config(&config)?;
        Ok(Self::with_clock(db, config, clock))
    }

    /// Wire everything up on an explicit clock
    pub fn with_clock(db: &Database, config: MeteringConfig, clock: ReferenceClock) -> Self {
        let ledger = Arc::new(SqliteQuotaLedger::new(db.pool.clone()));
        let usage = UsageWindowAggregator::new(UsageLog::new(db.pool.clone()), clock);

        let worker = SettlementWorker::new(ledger.clone()).with_usage(usage.clone());
        let gate = PreConsumptionGate::from_config(worker.clone(), &config);
        let checkin = CheckinLedger::new(db.pool.clone(), config.checkin.clone(), usage.clone());

        log::debug!(
            "[metering] Ready: trust threshold {}, timezone {}",
            config.trust_threshold,
            clock.timezone()
        );

        Self {
            config,
            ledger,
            usage,
            worker,
            gate,
            checkin,
        }
    }

    /// Wait for outstanding refunds before shutting down
    pub async fn shutdown(&self) {
        self.worker.drain().await;
    }
}

/// Create the metering components from the environment configuration
pub fn create_metering(db: &Database) -> Result<Metering> {
    Metering::new(db, MeteringConfig::from_env()?)
}
