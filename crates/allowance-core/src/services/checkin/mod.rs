//! Daily check-in
//!
//! Once per reference-timezone day an account may claim a bonus. When a
//! minimum usage is configured, yesterday's usage must reach it first.
//!
//! The check-in record and the balance credit are written in one
//! transaction; the `UNIQUE(account_id, checkin_date)` constraint is what
//! stops two concurrent check-ins on the same day.

pub mod bonus;
pub mod types;

pub use bonus::{BonusPolicy, FixedBonus, RandomBonus};
pub use types::{CheckinDay, CheckinReceipt, CheckinStats, CheckinStatus};

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::CheckinSettings;
use crate::services::quota::store::apply_delta;
use crate::services::quota::{format_quota, QuotaError};
use crate::services::usage::{month_bounds, UsageWindowAggregator};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Check-in records and bonus awards
#[derive(Clone)]
pub struct CheckinLedger {
    pool: SqlitePool,
    settings: CheckinSettings,
    usage: UsageWindowAggregator,
    bonus: Arc<dyn BonusPolicy>,
}

impl std::fmt::Debug for CheckinLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckinLedger")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CheckinLedger {
    pub fn new(pool: SqlitePool, settings: CheckinSettings, usage: UsageWindowAggregator) -> Self {
        Self {
            pool,
            settings,
            usage,
            bonus: Arc::new(RandomBonus),
        }
    }

    pub fn with_bonus_policy(mut self, policy: impl BonusPolicy + 'static) -> Self {
        self.bonus = Arc::new(policy);
        self
    }

    pub fn settings(&self) -> &CheckinSettings {
        &self.settings
    }

    fn today(&self) -> NaiveDate {
        self.usage.clock().today()
    }

    /// Claim today's bonus
    pub async fn checkin(&self, account_id: &str) -> Result<CheckinReceipt, QuotaError> {
        if !self.settings.enabled {
            return Err(QuotaError::FeatureDisabled);
        }

        let date = self.today().format(DATE_FORMAT).to_string();
        if self.has_checked_in(account_id, &date).await? {
            return Err(QuotaError::AlreadyCheckedIn { date });
        }

        self.check_eligibility(account_id).await?;

        let bonus = self
            .bonus
            .pick(self.settings.min_bonus, self.settings.max_bonus);
        let now = self.usage.clock().now_utc().timestamp();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QuotaError::update("Failed to start check-in", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO checkins (id, account_id, checkin_date, quota_awarded, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(account_id)
        .bind(&date)
        .bind(bonus)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            return Err(match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    QuotaError::AlreadyCheckedIn { date }
                }
                other => QuotaError::update("Failed to write check-in", other),
            });
        }

        // Rolled back on drop if the account doesn't exist.
        apply_delta(&mut *tx, account_id, bonus).await?;

        tx.commit()
            .await
            .map_err(|e| QuotaError::update("Failed to commit check-in", e))?;

        log::info!(
            "[checkin] {} checked in on {}, awarded {}",
            account_id,
            date,
            format_quota(bonus)
        );

        Ok(CheckinReceipt {
            account_id: account_id.to_string(),
            checkin_date: date,
            quota_awarded: bonus,
        })
    }

    /// Yesterday's usage if it meets the configured minimum
    ///
    /// Returns 0 without querying when no minimum is configured.
    pub async fn check_eligibility(&self, account_id: &str) -> Result<i64, QuotaError> {
        let required = self.settings.min_required_usage;
        if required <= 0 {
            return Ok(0);
        }

        let actual = self.usage.yesterday_usage(account_id).await.map_err(|e| {
            log::warn!("[checkin] Usage lookup for {} failed: {}", account_id, e);
            e
        })?;

        if actual < required {
            log::debug!(
                "[checkin] {} not eligible: yesterday {} < required {}",
                account_id,
                format_quota(actual),
                format_quota(required)
            );
            return Err(QuotaError::NotEligible { required, actual });
        }
        Ok(actual)
    }

    /// Whether a record exists for `date` (`YYYY-MM-DD`)
    pub async fn has_checked_in(&self, account_id: &str, date: &str) -> Result<bool, QuotaError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM checkins WHERE account_id = ? AND checkin_date = ?",
        )
        .bind(account_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QuotaError::query("Failed to read check-in", e))?;

        Ok(count > 0)
    }

    /// Check-in history for `month` (`YYYY-MM`, defaults to the current month)
    pub async fn get_stats(
        &self,
        account_id: &str,
        month: Option<&str>,
    ) -> Result<CheckinStats, QuotaError> {
        let month = month
            .map(str::to_string)
            .unwrap_or_else(|| self.usage.clock().current_month());
        let (first, last) = month_bounds(&month)?;

        let records = sqlx::query_as::<_, CheckinDay>(
            r#"
            SELECT checkin_date, quota_awarded
            FROM checkins
            WHERE account_id = ? AND checkin_date >= ? AND checkin_date <= ?
            ORDER BY checkin_date
            "#,
        )
        .bind(account_id)
        .bind(first.format(DATE_FORMAT).to_string())
        .bind(last.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QuotaError::query("Failed to read check-in history", e))?;

        let (all_time_count, all_time_awarded): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(quota_awarded), 0) FROM checkins WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QuotaError::query("Failed to read check-in totals", e))?;

        let today = self.today().format(DATE_FORMAT).to_string();
        let checked_in_today = self.has_checked_in(account_id, &today).await?;

        Ok(CheckinStats {
            month,
            checkin_count: records.len() as i64,
            total_awarded: records.iter().map(|r| r.quota_awarded).sum(),
            records,
            all_time_count,
            all_time_awarded,
            checked_in_today,
        })
    }

    /// Settings, yesterday's usage and month stats in one payload
    ///
    /// A failed usage lookup shows as 0 rather than failing the status.
    pub async fn status(
        &self,
        account_id: &str,
        month: Option<&str>,
    ) -> Result<CheckinStatus, QuotaError> {
        if !self.settings.enabled {
            return Err(QuotaError::FeatureDisabled);
        }

        let stats = self.get_stats(account_id, month).await?;
        let yesterday_usage = match self.usage.yesterday_usage(account_id).await {
            Ok(usage) => usage,
            Err(e) => {
                log::warn!("[checkin] Yesterday's usage unavailable for {}: {}", account_id, e);
                0
            }
        };

        Ok(CheckinStatus {
            enabled: self.settings.enabled,
            min_bonus: self.settings.min_bonus,
            max_bonus: self.settings.max_bonus,
            min_required_usage: self.settings.min_required_usage,
            yesterday_usage,
            stats,
        })
    }
}
