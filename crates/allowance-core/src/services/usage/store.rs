//! Usage log storage
//!
//! Append-only record of what each settled call actually cost.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::services::quota::QuotaError;

/// One settled call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UsageRecord {
    pub id: String,
    pub account_id: String,
    pub cost: i64,
    pub model: Option<String>,
    /// Unix seconds
    pub created_at: i64,
}

impl UsageRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created_at, 0)
            .single()
            .unwrap_or_default()
    }
}

/// Reader/writer for the `usage_logs` table
#[derive(Debug, Clone)]
pub struct UsageLog {
    pool: SqlitePool,
}

impl UsageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a usage record
    pub async fn record(
        &self,
        account_id: &str,
        cost: i64,
        model: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<UsageRecord, QuotaError> {
        if cost < 0 {
            return Err(QuotaError::InvalidAmount(format!(
                "usage cost must be non-negative, got {}",
                cost
            )));
        }

        let record = UsageRecord {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            cost,
            model: model.map(str::to_string),
            created_at: at.timestamp(),
        };

        sqlx::query(
            r#"
            INSERT INTO usage_logs (id, account_id, cost, model, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.account_id)
        .bind(record.cost)
        .bind(&record.model)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| QuotaError::update("Failed to record usage", e))?;

        log::debug!("[usage] Recorded {} for {}", cost, account_id);
        Ok(record)
    }

    /// Total cost with `start <= created_at <= end`; 0 when nothing matches
    pub async fn sum_usage(
        &self,
        account_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, QuotaError> {
        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(cost), 0)
            FROM usage_logs
            WHERE account_id = ? AND created_at >= ? AND created_at <= ?
            "#,
        )
        .bind(account_id)
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QuotaError::query("Failed to sum usage", e))?;

        Ok(total)
    }

    /// Records in `[start, end]`, newest first
    pub async fn list(
        &self,
        account_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UsageRecord>, QuotaError> {
        sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT id, account_id, cost, model, created_at
            FROM usage_logs
            WHERE account_id = ? AND created_at >= ? AND created_at <= ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(account_id)
        .bind(start.timestamp())
        .bind(end.timestamp())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QuotaError::query("Failed to list usage", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn create_log() -> (UsageLog, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::open(temp_dir.path().join("usage.db"))
            .await
            .expect("Failed to create test database");
        (UsageLog::new(db.pool), temp_dir)
    }

    #[tokio::test]
    async fn test_sum_empty_is_zero() {
        let (log, _dir) = create_log().await;
        let now = Utc::now();
        assert_eq!(log.sum_usage("acct", now - Duration::days(1), now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sum_inclusive_bounds() {
        let (log, _dir) = create_log().await;
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = start + Duration::seconds(59);

        log.record("acct", 10, None, start - Duration::seconds(1)).await.unwrap();
        log.record("acct", 20, Some("m"), start).await.unwrap();
        log.record("acct", 30, None, end).await.unwrap();
        log.record("acct", 40, None, end + Duration::seconds(1)).await.unwrap();
        log.record("other", 99, None, start).await.unwrap();

        assert_eq!(log.sum_usage("acct", start, end).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_record_rejects_negative_cost() {
        let (log, _dir) = create_log().await;
        let err = log.record("acct", -5, None, Utc::now()).await.unwrap_err();
        assert!(matches!(err, QuotaError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let (log, _dir) = create_log().await;
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        log.record("acct", 1, None, base).await.unwrap();
        log.record("acct", 2, Some("model-b"), base + Duration::minutes(1)).await.unwrap();

        let records = log
            .list("acct", base, base + Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cost, 2);
        assert_eq!(records[0].model.as_deref(), Some("model-b"));
        assert_eq!(records[1].timestamp(), base);
    }
}
