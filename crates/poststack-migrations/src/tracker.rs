//! Database-side record of applied migrations and the exclusive migration lock.
//!
//! Tracker tables live in a dedicated schema (default `poststack`), distinct from the
//! application schema, so that dropping the app schema never orphans tracking state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use poststack_core::{PoststackError, PoststackResult};
use sqlx::{PgPool, Row};

/// A tracker row recording one applied migration.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: String,
    pub description: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub execution_ms: Option<i32>,
    pub forward_checksum_recorded: String,
    pub forward_sql_snapshot: Option<String>,
    pub rollback_sql_snapshot: Option<String>,
    pub applied_by: Option<String>,
}

/// The singleton `migration_lock` row.
#[derive(Debug, Clone)]
pub struct MigrationLock {
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
}

/// Default staleness threshold past which a held lock is reported as a `stuck_lock`
/// diagnostic rather than retried silently.
pub const DEFAULT_STALE_THRESHOLD: ChronoDuration = ChronoDuration::minutes(5);

pub struct MigrationTracker {
    pool: PgPool,
    schema: String,
}

impl MigrationTracker {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", self.schema, table)
    }

    /// Idempotent bootstrap: creates the schema and tracker tables if absent, and
    /// inserts the singleton lock row if missing.
    pub async fn bootstrap(&self) -> PoststackResult<()> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await
            .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        let applied_migrations = self.qualified("applied_migrations");
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {applied_migrations} (
                version TEXT PRIMARY KEY,
                description TEXT,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                execution_ms INT,
                forward_checksum TEXT NOT NULL,
                forward_sql TEXT,
                rollback_sql TEXT,
                applied_by TEXT
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        let migration_lock = self.qualified("migration_lock");
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {migration_lock} (
                id INT PRIMARY KEY CHECK (id = 1),
                locked BOOLEAN NOT NULL,
                locked_at TIMESTAMPTZ,
                locked_by TEXT
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        sqlx::query(&format!(
            "INSERT INTO {migration_lock} (id, locked) VALUES (1, false)
             ON CONFLICT (id) DO NOTHING"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        let tracker_meta = self.qualified("tracker_meta");
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {tracker_meta} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        sqlx::query(&format!(
            "INSERT INTO {tracker_meta} (key, value) VALUES ('schema_version', '1')
             ON CONFLICT (key) DO NOTHING"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        Ok(())
    }

    /// Attempt to acquire the exclusive migration lock for `holder`.
    ///
    /// Succeeds iff the lock was free. If already held and the hold is older than
    /// `stale_threshold`, the acquisition still fails (the operator must run
    /// diagnostics and repair explicitly) but the caller can distinguish this case via
    /// [`MigrationTracker::lock_state`].
    pub async fn acquire_lock(&self, holder: &str) -> PoststackResult<bool> {
        let table = self.qualified("migration_lock");
        let result = sqlx::query(&format!(
            "UPDATE {table} SET locked = true, locked_at = now(), locked_by = $1
             WHERE id = 1 AND locked = false"
        ))
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    /// Release the lock unconditionally. Called on every exit path, including failure.
    pub async fn release_lock(&self) -> PoststackResult<()> {
        let table = self.qualified("migration_lock");
        sqlx::query(&format!(
            "UPDATE {table} SET locked = false, locked_at = NULL, locked_by = NULL WHERE id = 1"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;
        Ok(())
    }

    /// Force-clear the lock regardless of who holds it. Used by `repair(["stuck_lock"])`.
    pub async fn force_clear_lock(&self) -> PoststackResult<()> {
        self.release_lock().await
    }

    pub async fn lock_state(&self) -> PoststackResult<MigrationLock> {
        let table = self.qualified("migration_lock");
        let row = sqlx::query(&format!("SELECT locked, locked_at, locked_by FROM {table} WHERE id = 1"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        Ok(MigrationLock {
            locked: row.try_get("locked").unwrap_or(false),
            locked_at: row.try_get("locked_at").ok(),
            locked_by: row.try_get("locked_by").ok(),
        })
    }

    /// Whether `lock.locked_at` is older than `stale_threshold`, the condition that
    /// surfaces a `stuck_lock` diagnostic.
    pub fn is_stale(lock: &MigrationLock, stale_threshold: ChronoDuration, now: DateTime<Utc>) -> bool {
        match lock.locked_at {
            Some(locked_at) => lock.locked && now - locked_at > stale_threshold,
            None => false,
        }
    }

    pub async fn applied_migrations(&self) -> PoststackResult<Vec<AppliedMigration>> {
        let table = self.qualified("applied_migrations");
        let rows = sqlx::query(&format!(
            "SELECT version, description, applied_at, execution_ms, forward_checksum,
                    forward_sql, rollback_sql, applied_by
             FROM {table} ORDER BY version"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| AppliedMigration {
                version: row.get("version"),
                description: row.try_get("description").ok(),
                applied_at: row.get("applied_at"),
                execution_ms: row.try_get("execution_ms").ok(),
                forward_checksum_recorded: row.get("forward_checksum"),
                forward_sql_snapshot: row.try_get("forward_sql").ok(),
                rollback_sql_snapshot: row.try_get("rollback_sql").ok(),
                applied_by: row.try_get("applied_by").ok(),
            })
            .collect())
    }

    /// Insert one AppliedMigration row inside the caller's transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_applied(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        version: &str,
        description: &str,
        execution_ms: i32,
        forward_checksum: &str,
        forward_sql: &str,
        rollback_sql: Option<&str>,
        applied_by: &str,
    ) -> PoststackResult<()> {
        let table = self.qualified("applied_migrations");
        sqlx::query(&format!(
            "INSERT INTO {table}
                (version, description, execution_ms, forward_checksum, forward_sql, rollback_sql, applied_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(version)
        .bind(description)
        .bind(execution_ms)
        .bind(forward_checksum)
        .bind(forward_sql)
        .bind(rollback_sql)
        .bind(applied_by)
        .execute(&mut **tx)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;
        Ok(())
    }

    pub async fn delete_applied(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        version: &str,
    ) -> PoststackResult<()> {
        let table = self.qualified("applied_migrations");
        sqlx::query(&format!("DELETE FROM {table} WHERE version = $1"))
            .bind(version)
            .execute(&mut **tx)
            .await
            .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;
        Ok(())
    }

    pub async fn update_checksum(&self, version: &str, checksum: &str) -> PoststackResult<()> {
        let table = self.qualified("applied_migrations");
        sqlx::query(&format!("UPDATE {table} SET forward_checksum = $1 WHERE version = $2"))
            .bind(checksum)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;
        Ok(())
    }

    /// Table names currently visible in `schema`, used by [`crate::diagnostics`] to
    /// cross-check the tracker against the observable application schema.
    pub async fn schema_tables(&self, schema: &str) -> PoststackResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = $1",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

        Ok(rows.into_iter().map(|row| row.get("table_name")).collect())
    }

    pub async fn begin(&self) -> PoststackResult<sqlx::Transaction<'_, sqlx::Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_lock_detection_respects_threshold() {
        let now = Utc::now();
        let lock = MigrationLock {
            locked: true,
            locked_at: Some(now - ChronoDuration::minutes(10)),
            locked_by: Some("pid-1".to_string()),
        };
        assert!(MigrationTracker::is_stale(&lock, DEFAULT_STALE_THRESHOLD, now));

        let fresh = MigrationLock {
            locked: true,
            locked_at: Some(now - ChronoDuration::seconds(5)),
            locked_by: Some("pid-1".to_string()),
        };
        assert!(!MigrationTracker::is_stale(&fresh, DEFAULT_STALE_THRESHOLD, now));
    }

    #[test]
    fn unlocked_row_is_never_stale() {
        let now = Utc::now();
        let lock = MigrationLock {
            locked: false,
            locked_at: Some(now - ChronoDuration::hours(1)),
            locked_by: None,
        };
        assert!(!MigrationTracker::is_stale(&lock, DEFAULT_STALE_THRESHOLD, now));
    }
}
