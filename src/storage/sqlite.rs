//! SQLite storage implementation.
//!
//! Provides persistent storage that several processes can share through one
//! database file. Expiry is stored as wall-clock unix milliseconds, and each
//! conditional operation is a single SQL statement.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Sqlite;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{Store, StoreError, WriteOp};

const UPSERT_SQL: &str = r#"
    INSERT INTO kv (key, value, expires_at) VALUES (?, ?, NULL)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = NULL
"#;
const DELETE_SQL: &str = "DELETE FROM kv WHERE key = ?";
const SET_ADD_SQL: &str = "INSERT OR IGNORE INTO set_members (set_key, member) VALUES (?, ?)";
const SET_REMOVE_SQL: &str = "DELETE FROM set_members WHERE set_key = ? AND member = ?";

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(backend)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(backend)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(now: i64, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.saturating_add(ttl_ms)
}

/// Build the statement for one unconditional write.
fn write_query(op: &WriteOp) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    match op {
        WriteOp::Set { key, value } => sqlx::query(UPSERT_SQL)
            .bind(key.as_str())
            .bind(value.as_str()),
        WriteOp::Delete { key } => sqlx::query(DELETE_SQL).bind(key.as_str()),
        WriteOp::SetAdd { set, member } => sqlx::query(SET_ADD_SQL)
            .bind(set.as_str())
            .bind(member.as_str()),
        WriteOp::SetRemove { set, member } => sqlx::query(SET_REMOVE_SQL)
            .bind(set.as_str())
            .bind(member.as_str()),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let op = WriteOp::set(key, value);
        write_query(&op)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        // Expired leftovers are invisible but still occupy the row.
        sqlx::query(DELETE_SQL)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let op = WriteOp::set_add(set, member);
        write_query(&op)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let op = WriteOp::set_remove(set, member);
        write_query(&op)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT member FROM set_members WHERE set_key = ? ORDER BY member")
                .bind(set)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        Ok(rows.into_iter().map(|(member,)| member).collect())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = now_millis();
        // The conflict branch only fires over an expired row.
        let result = sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            WHERE kv.expires_at IS NOT NULL AND kv.expires_at <= ?
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry_millis(now, ttl))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM kv WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(expected)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = now_millis();
        let result = sqlx::query(
            r#"
            UPDATE kv SET expires_at = ?
            WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(expiry_millis(now, ttl))
        .bind(key)
        .bind(expected)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for op in &ops {
            write_query(op).execute(&mut *tx).await.map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}
