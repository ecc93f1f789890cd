//! Usage windows
//!
//! Sums recorded usage over closed time windows computed in the reference
//! timezone. Check-in eligibility reads yesterday's window.

pub mod clock;
pub mod store;

pub use clock::{month_bounds, ReferenceClock, UsageWindow};
pub use store::{UsageLog, UsageRecord};

use chrono::{DateTime, Utc};

use crate::services::quota::QuotaError;

/// Usage sums over reference-timezone windows
#[derive(Debug, Clone)]
pub struct UsageWindowAggregator {
    log: UsageLog,
    clock: ReferenceClock,
}

impl UsageWindowAggregator {
    pub fn new(log: UsageLog, clock: ReferenceClock) -> Self {
        Self { log, clock }
    }

    pub fn clock(&self) -> &ReferenceClock {
        &self.clock
    }

    pub fn log(&self) -> &UsageLog {
        &self.log
    }

    /// Total usage with `start <= t <= end`
    pub async fn sum_usage(
        &self,
        account_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, QuotaError> {
        self.log.sum_usage(account_id, start, end).await
    }

    pub async fn sum_window(&self, account_id: &str, window: UsageWindow) -> Result<i64, QuotaError> {
        self.sum_usage(account_id, window.start, window.end).await
    }

    /// Usage over `[00:00:00, 23:59:59]` of yesterday
    pub async fn yesterday_usage(&self, account_id: &str) -> Result<i64, QuotaError> {
        self.sum_window(account_id, self.clock.yesterday_window()).await
    }

    /// Usage from today's midnight until now
    pub async fn today_usage(&self, account_id: &str) -> Result<i64, QuotaError> {
        self.sum_window(account_id, self.clock.today_window()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::{Duration, FixedOffset, TimeZone};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_yesterday_and_today() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("agg.db")).await.unwrap();
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        // 2026-05-02 10:00 at UTC+8
        let now = Utc.with_ymd_and_hms(2026, 5, 2, 2, 0, 0).unwrap();
        let clock = ReferenceClock::fixed(tz, now);
        let log = UsageLog::new(db.pool);
        let agg = UsageWindowAggregator::new(log.clone(), clock);

        let yesterday = clock.yesterday_window();
        log.record("acct", 300, None, yesterday.start).await.unwrap();
        log.record("acct", 200, None, yesterday.end).await.unwrap();
        log.record("acct", 7, None, yesterday.end + Duration::seconds(1)).await.unwrap();
        log.record("acct", 1_000, None, now + Duration::hours(1)).await.unwrap();

        assert_eq!(agg.yesterday_usage("acct").await.unwrap(), 500);
        assert_eq!(agg.today_usage("acct").await.unwrap(), 7);
        assert_eq!(agg.yesterday_usage("nobody").await.unwrap(), 0);
    }
}
