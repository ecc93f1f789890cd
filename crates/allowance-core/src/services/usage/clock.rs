//! Reference-timezone clock
//!
//! All day boundaries (yesterday's usage window, check-in dates, month stats)
//! are computed in one fixed timezone, independent of the host's local zone.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MeteringConfig;
use crate::error::Result;
use crate::services::quota::QuotaError;

/// Seconds from a day's first instant to its last whole second
const LAST_SECOND_OF_DAY: i64 = 24 * 60 * 60 - 1;

/// Closed time interval `[start, end]`, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UsageWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy)]
enum TimeSource {
    System,
    Fixed(DateTime<Utc>),
}

/// Source of "now" and day boundaries in the reference timezone
#[derive(Debug, Clone, Copy)]
pub struct ReferenceClock {
    tz: FixedOffset,
    source: TimeSource,
}

impl ReferenceClock {
    /// Clock that follows the system time
    pub fn new(tz: FixedOffset) -> Self {
        Self {
            tz,
            source: TimeSource::System,
        }
    }

    /// Clock pinned to one instant
    pub fn fixed(tz: FixedOffset, now: DateTime<Utc>) -> Self {
        Self {
            tz,
            source: TimeSource::Fixed(now),
        }
    }

    pub fn from_config(config: &MeteringConfig) -> Result<Self> {
        Ok(Self::new(config.reference_timezone()?))
    }

    pub fn timezone(&self) -> FixedOffset {
        self.tz
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        match self.source {
            TimeSource::System => Utc::now(),
            TimeSource::Fixed(at) => at,
        }
    }

    /// Current time in the reference timezone
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.now_utc().with_timezone(&self.tz)
    }

    /// Calendar date in the reference timezone
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    pub fn yesterday(&self) -> NaiveDate {
        self.today() - Duration::days(1)
    }

    /// `YYYY-MM` of the current reference month
    pub fn current_month(&self) -> String {
        self.now().format("%Y-%m").to_string()
    }

    /// First instant of `day` in the reference timezone
    pub fn start_of(&self, day: NaiveDate) -> DateTime<Utc> {
        self.local_to_utc(day.and_time(NaiveTime::MIN))
    }

    /// `[00:00:00, 23:59:59]` of `day` in the reference timezone
    pub fn day_window(&self, day: NaiveDate) -> UsageWindow {
        let start = self.start_of(day);
        UsageWindow::new(start, start + Duration::seconds(LAST_SECOND_OF_DAY))
    }

    pub fn yesterday_window(&self) -> UsageWindow {
        self.day_window(self.yesterday())
    }

    /// `[00:00:00 today, now]`
    pub fn today_window(&self) -> UsageWindow {
        UsageWindow::new(self.start_of(self.today()), self.now_utc())
    }

    fn local_to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        // Fixed offsets have exactly one UTC instant per local time.
        let utc = local - Duration::seconds(i64::from(self.tz.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(utc, Utc)
    }
}

/// First and last calendar day of a `YYYY-MM` month
pub fn month_bounds(month: &str) -> std::result::Result<(NaiveDate, NaiveDate), QuotaError> {
    let invalid = || QuotaError::Validation(format!("invalid month {:?}, expected YYYY-MM", month));

    if month.len() != 7 {
        return Err(invalid());
    }
    let first = NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d").map_err(|_| invalid())?;
    let next_month = first
        .checked_add_months(chrono::Months::new(1))
        .ok_or_else(invalid)?;
    Ok((first, next_month - Duration::days(1)))
}
