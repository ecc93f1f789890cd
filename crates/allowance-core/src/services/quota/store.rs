//! Quota storage layer
//!
//! SQLite-backed [`QuotaLedger`]. Every balance mutation is one conditional
//! `UPDATE` statement, so SQLite's write lock is the per-account
//! serialization point.

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool};

use super::ledger::{check_reserve_amount, QuotaError, QuotaLedger};

// ============================================================================
// SqliteQuotaLedger
// ============================================================================

/// Balance store backed by the `accounts` table
#[derive(Debug, Clone)]
pub struct SqliteQuotaLedger {
    pool: SqlitePool,
}

impl SqliteQuotaLedger {
    /// Create a new ledger with the given database pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an account with an initial balance
    ///
    /// Returns `false` if the account already existed (its balance is left
    /// untouched).
    pub async fn open_account(&self, account_id: &str, initial: i64) -> Result<bool, QuotaError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO accounts (id, quota, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(account_id)
        .bind(initial)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| QuotaError::update("Failed to open account", e))?;

        let created = result.rows_affected() == 1;
        if created {
            log::info!("[quota:store] Opened account {} with balance {}", account_id, initial);
        }
        Ok(created)
    }

    /// List every account and its balance, ordered by id
    pub async fn list_accounts(&self) -> Result<Vec<(String, i64)>, QuotaError> {
        sqlx::query_as::<_, (String, i64)>("SELECT id, quota FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QuotaError::query("Failed to list accounts", e))
    }
}

#[async_trait]
impl QuotaLedger for SqliteQuotaLedger {
    async fn balance(&self, account_id: &str) -> Result<i64, QuotaError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT quota FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QuotaError::query("Failed to read balance", e))?;

        row.map(|(quota,)| quota)
            .ok_or_else(|| QuotaError::AccountNotFound(account_id.to_string()))
    }

    async fn reserve(&self, account_id: &str, amount: i64) -> Result<(), QuotaError> {
        check_reserve_amount(amount)?;
        if amount == 0 {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET quota = quota - ?, updated_at = ?
            WHERE id = ? AND quota >= ?
            "#,
        )
        .bind(amount)
        .bind(chrono::Utc::now().timestamp())
        .bind(account_id)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(|e| QuotaError::update("Failed to reserve quota", e))?;

        if result.rows_affected() == 0 {
            // Either the account is gone or a concurrent call got there first.
            let balance = self.balance(account_id).await?;
            log::debug!(
                "[quota:store] Reserve of {} refused for {} (balance {})",
                amount,
                account_id,
                balance
            );
            return Err(QuotaError::InsufficientBalance {
                balance,
                needed: amount,
            });
        }

        Ok(())
    }

    async fn adjust(&self, account_id: &str, delta: i64) -> Result<(), QuotaError> {
        apply_delta(&self.pool, account_id, delta).await
    }
}

/// Unconditionally add `delta` to an account's balance
///
/// Generic over the executor so check-in can run it inside the same
/// transaction that writes its record.
pub(crate) async fn apply_delta<'e, E>(executor: E, account_id: &str, delta: i64) -> Result<(), QuotaError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET quota = quota + ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(delta)
    .bind(chrono::Utc::now().timestamp())
    .bind(account_id)
    .execute(executor)
    .await
    .map_err(|e| QuotaError::update("Failed to adjust quota", e))?;

    if result.rows_affected() == 0 {
        return Err(QuotaError::AccountNotFound(account_id.to_string()));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
