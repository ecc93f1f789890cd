//! Database module - SQLx with SQLite

use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database state
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Create a new database connection with default path
    pub async fn new() -> Result<Self> {
        let db_path = get_db_path()?;
        Self::open(db_path).await
    }

    /// Create a new database connection with a specific path
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        log::info!("Connecting to database: {}", db_path.display());

        // WAL + busy timeout: concurrent ledger writers queue up instead of
        // failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        log::info!("Running database migrations...");

        // Accounts own the spendable balance
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                quota INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Append-only usage records (one per completed call)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_logs (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                cost INTEGER NOT NULL,
                model TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Window sums filter on (account_id, created_at)
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_usage_logs_account_created ON usage_logs(account_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        // One check-in per account per reference-timezone day
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkins (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                checkin_date TEXT NOT NULL,
                quota_awarded INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(account_id, checkin_date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkins_account_date ON checkins(account_id, checkin_date)",
        )
        .execute(&self.pool)
        .await?;

        log::info!("Database migrations completed");
        Ok(())
    }
}

/// Get database file path
/// Priority: ALLOWANCE_DB_PATH env var > default app data directory
pub fn get_db_path() -> Result<PathBuf> {
    // Check for environment variable override
    if let Ok(path) = std::env::var("ALLOWANCE_DB_PATH") {
        return Ok(PathBuf::from(path));
    }

    // Default: use app data directory
    let dirs = directories::ProjectDirs::from("com", "allowance", "Allowance")
        .ok_or_else(|| Error::config("Could not determine project directories"))?;

    Ok(dirs.data_dir().join("allowance.db"))
}
