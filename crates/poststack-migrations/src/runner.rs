//! Transactional forward/rollback execution, lock acquisition, drift reporting.

use crate::store::{self, Migration};
use crate::tracker::{AppliedMigration, MigrationTracker, DEFAULT_STALE_THRESHOLD};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use poststack_core::{Cancellation, PoststackError, PoststackResult};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Snapshot of migration state, combining the on-disk store and the database tracker.
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current_version: Option<String>,
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<Migration>,
    pub is_locked: bool,
    pub lock_holder: Option<String>,
}

/// One checksum drift observation produced by `verify()`.
#[derive(Debug, Clone)]
pub struct ChecksumDrift {
    pub version: String,
    pub recorded: String,
    pub current: String,
}

pub struct MigrationRunner {
    dir: PathBuf,
    tracker: MigrationTracker,
    stale_threshold: ChronoDuration,
    holder: String,
}

impl MigrationRunner {
    pub fn new(dir: impl Into<PathBuf>, tracker: MigrationTracker, holder: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            tracker,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            holder: holder.into(),
        }
    }

    pub fn with_stale_threshold(mut self, threshold: ChronoDuration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tracker(&self) -> &MigrationTracker {
        &self.tracker
    }

    fn discover(&self) -> PoststackResult<Vec<Migration>> {
        store::discover(&self.dir)
    }

    pub async fn status(&self) -> PoststackResult<MigrationStatus> {
        self.tracker.bootstrap().await?;
        let migrations = self.discover()?;
        let applied = self.tracker.applied_migrations().await?;
        let lock = self.tracker.lock_state().await?;

        let applied_versions: std::collections::HashSet<_> =
            applied.iter().map(|a| a.version.clone()).collect();
        let pending: Vec<Migration> = migrations
            .into_iter()
            .filter(|m| !applied_versions.contains(&m.version))
            .collect();

        let current_version = applied
            .iter()
            .max_by_key(|a| store::version_sort_key(&a.version))
            .map(|a| a.version.clone());

        Ok(MigrationStatus {
            current_version,
            applied,
            pending,
            is_locked: lock.locked,
            lock_holder: lock.locked_by,
        })
    }

    /// Apply all pending migrations with `version <= target` (or all, if `target` is
    /// `None`), strictly in ascending version order. Equivalent to
    /// [`MigrationRunner::migrate_cancellable`] with a cancellation handle that is
    /// never triggered.
    pub async fn migrate(&self, target: Option<&str>) -> PoststackResult<Vec<String>> {
        self.migrate_cancellable(target, &Cancellation::new()).await
    }

    /// As [`MigrationRunner::migrate`], but checked against `cancel` before each
    /// migration. Cancelling mid-run rolls back only the in-flight migration's
    /// transaction (handled by [`MigrationRunner::apply_one`]); every migration
    /// committed before the cancellation was observed remains applied.
    pub async fn migrate_cancellable(
        &self,
        target: Option<&str>,
        cancel: &Cancellation,
    ) -> PoststackResult<Vec<String>> {
        self.tracker.bootstrap().await?;

        let acquired = self.tracker.acquire_lock(&self.holder).await?;
        if !acquired {
            let lock = self.tracker.lock_state().await?;
            return Err(PoststackError::LockHeld {
                holder: lock.locked_by.unwrap_or_default(),
                since: lock.locked_at.unwrap_or_else(Utc::now),
            });
        }

        let result = self.migrate_locked(target, cancel).await;

        self.tracker.release_lock().await?;
        result
    }

    async fn migrate_locked(
        &self,
        target: Option<&str>,
        cancel: &Cancellation,
    ) -> PoststackResult<Vec<String>> {
        let migrations = self.discover()?;
        let applied = self.tracker.applied_migrations().await?;
        let applied_versions: std::collections::HashSet<_> =
            applied.iter().map(|a| a.version.clone()).collect();

        let highest_applied = applied
            .iter()
            .map(|a| store::version_sort_key(&a.version))
            .max()
            .unwrap_or(0);

        let target_key = target.map(store::version_sort_key);

        let mut applied_this_run = Vec::new();

        for migration in migrations {
            if applied_versions.contains(&migration.version) {
                continue;
            }
            let key = store::version_sort_key(&migration.version);
            if let Some(target_key) = target_key {
                if key > target_key {
                    continue;
                }
            }
            if key < highest_applied {
                return Err(PoststackError::PartialMigration {
                    version: migration.version.clone(),
                });
            }

            cancel.check()?;
            self.apply_one(&migration, cancel).await?;
            applied_this_run.push(migration.version.clone());
        }

        Ok(applied_this_run)
    }

    async fn apply_one(&self, migration: &Migration, cancel: &Cancellation) -> PoststackResult<()> {
        info!(version = %migration.version, "applying migration");
        let started = Instant::now();

        let mut tx = self.tracker.begin().await?;

        let exec_result = tokio::select! {
            result = sqlx::query(&migration.forward_sql).execute(&mut *tx) => result,
            _ = cancel.cancelled() => {
                // Dropping `tx` here rolls it back; nothing has been committed.
                drop(tx);
                return Err(PoststackError::Cancelled);
            }
        };

        if let Err(e) = exec_result {
            let _ = tx.rollback().await;
            return Err(PoststackError::MigrationFailed {
                version: migration.version.clone(),
                cause: e.to_string(),
            });
        }

        let execution_ms = started.elapsed().as_millis() as i32;
        self.tracker
            .record_applied(
                &mut tx,
                &migration.version,
                &migration.description,
                execution_ms,
                &migration.forward_checksum,
                &migration.forward_sql,
                migration.rollback_sql.as_deref(),
                &self.holder,
            )
            .await?;

        tx.commit()
            .await
            .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;
        Ok(())
    }

    /// Roll back every AppliedMigration with `version > target`, in descending order,
    /// using the snapshot stored at apply time rather than the current on-disk file.
    pub async fn rollback(&self, target: &str) -> PoststackResult<Vec<String>> {
        let acquired = self.tracker.acquire_lock(&self.holder).await?;
        if !acquired {
            let lock = self.tracker.lock_state().await?;
            return Err(PoststackError::LockHeld {
                holder: lock.locked_by.unwrap_or_default(),
                since: lock.locked_at.unwrap_or_else(Utc::now),
            });
        }

        let result = self.rollback_locked(target).await;
        self.tracker.release_lock().await?;
        result
    }

    async fn rollback_locked(&self, target: &str) -> PoststackResult<Vec<String>> {
        let target_key = store::version_sort_key(target);
        let mut applied = self.tracker.applied_migrations().await?;
        applied.sort_by_key(|a| std::cmp::Reverse(store::version_sort_key(&a.version)));

        let mut rolled_back = Vec::new();
        for applied_migration in applied {
            let key = store::version_sort_key(&applied_migration.version);
            if key <= target_key {
                continue;
            }

            let rollback_sql = applied_migration
                .rollback_sql_snapshot
                .clone()
                .ok_or_else(|| PoststackError::MigrationFailed {
                    version: applied_migration.version.clone(),
                    cause: "no rollback snapshot stored for this migration".to_string(),
                })?;

            let mut tx = self.tracker.begin().await?;
            sqlx::query(&rollback_sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| PoststackError::MigrationFailed {
                    version: applied_migration.version.clone(),
                    cause: e.to_string(),
                })?;

            self.tracker
                .delete_applied(&mut tx, &applied_migration.version)
                .await?;

            tx.commit()
                .await
                .map_err(|e| PoststackError::DatabaseUnreachable(e.to_string()))?;

            rolled_back.push(applied_migration.version.clone());
        }

        Ok(rolled_back)
    }

    /// Compare recorded checksums to current file checksums without mutating state.
    pub async fn verify(&self) -> PoststackResult<Vec<ChecksumDrift>> {
        let migrations = self.discover()?;
        let applied = self.tracker.applied_migrations().await?;

        let mut drifts = Vec::new();
        for applied_migration in &applied {
            if let Some(current) = migrations.iter().find(|m| m.version == applied_migration.version) {
                if current.forward_checksum != applied_migration.forward_checksum_recorded {
                    warn!(version = %applied_migration.version, "checksum drift detected");
                    drifts.push(ChecksumDrift {
                        version: applied_migration.version.clone(),
                        recorded: applied_migration.forward_checksum_recorded.clone(),
                        current: current.forward_checksum.clone(),
                    });
                }
            }
        }
        Ok(drifts)
    }

    pub fn stale_threshold(&self) -> ChronoDuration {
        self.stale_threshold
    }

    pub fn is_lock_stale(&self, locked_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - locked_at > self.stale_threshold
    }
}
