//! Check-in payload types

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Result of a successful check-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinReceipt {
    pub account_id: String,
    /// Reference-timezone date, `YYYY-MM-DD`
    pub checkin_date: String,
    pub quota_awarded: i64,
}

/// One day's check-in within a month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CheckinDay {
    pub checkin_date: String,
    pub quota_awarded: i64,
}

/// Check-in history for one account and month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinStats {
    /// `YYYY-MM`
    pub month: String,
    pub records: Vec<CheckinDay>,
    pub checkin_count: i64,
    pub total_awarded: i64,
    pub all_time_count: i64,
    pub all_time_awarded: i64,
    pub checked_in_today: bool,
}

/// Everything a client needs to render the check-in panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinStatus {
    pub enabled: bool,
    pub min_bonus: i64,
    pub max_bonus: i64,
    pub min_required_usage: i64,
    pub yesterday_usage: i64,
    pub stats: CheckinStats,
}
