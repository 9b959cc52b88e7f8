//! Detect inconsistencies between the on-disk migration set and the database tracker;
//! classify them, and offer safe vs. forced repair actions.

use crate::runner::MigrationRunner;
use crate::tracker::MigrationTracker;
use chrono::Utc;
use poststack_core::PoststackResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The schema conventionally inspected for application objects (§6.4: "name
/// conventionally `public`"). The dedicated tracker schema is never scanned here.
const APPLICATION_SCHEMA: &str = "public";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// The closed set of diagnosable inconsistencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingTracking,
    MissingFile,
    ChecksumMismatch,
    StuckLock,
    OrphanedSchema,
    PartialMigration,
    DuplicateVersion,
    RollbackMissing,
    InvalidMigration,
    CorruptedData,
}

impl IssueKind {
    pub fn severity(self) -> Severity {
        match self {
            IssueKind::MissingTracking => Severity::High,
            IssueKind::MissingFile => Severity::High,
            IssueKind::ChecksumMismatch => Severity::Medium,
            IssueKind::StuckLock => Severity::High,
            IssueKind::OrphanedSchema => Severity::Low,
            IssueKind::PartialMigration => Severity::High,
            IssueKind::DuplicateVersion => Severity::Critical,
            IssueKind::RollbackMissing => Severity::Low,
            IssueKind::InvalidMigration => Severity::Medium,
            IssueKind::CorruptedData => Severity::Critical,
        }
    }

    pub fn auto_fixable(self) -> bool {
        matches!(
            self,
            IssueKind::MissingTracking
                | IssueKind::ChecksumMismatch
                | IssueKind::StuckLock
                | IssueKind::PartialMigration
                | IssueKind::InvalidMigration
        )
    }

    /// Whether fixing this kind mutates or destroys data that cannot be recomputed
    /// from the current on-disk/tracker state (requires `force=true`). Overwriting a
    /// mismatched checksum is not one of these: the replacement value is recomputed
    /// from the on-disk file, not discarded, so `repair` applies it without `force`.
    pub fn requires_force(self) -> bool {
        matches!(self, IssueKind::InvalidMigration)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub version: Option<String>,
    pub description: String,
    pub details: String,
    pub suggested_fix: String,
    pub auto_fixable: bool,
}

impl DiagnosticIssue {
    fn new(kind: IssueKind, version: Option<String>, description: impl Into<String>, details: impl Into<String>, suggested_fix: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            version,
            description: description.into(),
            details: details.into(),
            suggested_fix: suggested_fix.into(),
            auto_fixable: kind.auto_fixable(),
        }
    }
}

/// One repair action taken (or, in dry-run, that would be taken).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAction {
    pub kind: IssueKind,
    pub version: Option<String>,
    pub description: String,
    pub applied: bool,
}

pub struct Diagnostics<'a> {
    runner: &'a MigrationRunner,
}

impl<'a> Diagnostics<'a> {
    pub fn new(runner: &'a MigrationRunner) -> Self {
        Self { runner }
    }

    fn tracker(&self) -> &MigrationTracker {
        self.runner.tracker()
    }

    /// Cross-check the store, tracker, and lock state, returning every detected issue.
    pub async fn diagnose(&self) -> PoststackResult<Vec<DiagnosticIssue>> {
        let mut issues = Vec::new();

        let status = self.runner.status().await?;
        let drifts = self.runner.verify().await?;

        for applied in &status.applied {
            if applied.rollback_sql_snapshot.is_none() {
                issues.push(DiagnosticIssue::new(
                    IssueKind::RollbackMissing,
                    Some(applied.version.clone()),
                    "applied migration has no rollback snapshot",
                    format!("version {} was applied without a rollback file", applied.version),
                    "none (requires a human-authored rollback file replayed manually)",
                ));
            }
        }

        for drift in drifts {
            issues.push(DiagnosticIssue::new(
                IssueKind::ChecksumMismatch,
                Some(drift.version.clone()),
                "recorded checksum does not match current file content",
                format!("recorded={} current={}", drift.recorded, drift.current),
                "repair to update the recorded checksum to match the on-disk file",
            ));
        }

        for applied in &status.applied {
            let has_file = status
                .pending
                .iter()
                .any(|m| m.version == applied.version)
                || crate::store::discover(self.runner.dir())?
                    .iter()
                    .any(|m| m.version == applied.version);
            if !has_file {
                issues.push(DiagnosticIssue::new(
                    IssueKind::MissingFile,
                    Some(applied.version.clone()),
                    "applied migration has no matching file on disk",
                    format!("version {} is tracked but its source file is gone", applied.version),
                    "none (investigate manually; rollback still works from the stored snapshot)",
                ));
            }
        }

        if status.is_locked {
            let lock = self.tracker().lock_state().await?;
            if let Some(locked_at) = lock.locked_at {
                if self.runner.is_lock_stale(locked_at, Utc::now()) {
                    issues.push(DiagnosticIssue::new(
                        IssueKind::StuckLock,
                        None,
                        "migration lock held past the staleness threshold",
                        format!(
                            "locked_by={} locked_at={}",
                            lock.locked_by.clone().unwrap_or_default(),
                            locked_at
                        ),
                        "repair to clear the lock",
                    ));
                }
            }
        }

        let all_migrations = crate::store::discover(self.runner.dir())?;
        let existing_tables: HashSet<String> = self
            .tracker()
            .schema_tables(APPLICATION_SCHEMA)
            .await?
            .into_iter()
            .collect();

        // missing_tracking: a pending migration whose CREATE TABLE objects are already
        // present in the application schema — its SQL ran through some other channel
        // (a prior interrupted run, a manual `psql` session) without being recorded.
        for pending in &status.pending {
            let objects = crate::store::created_table_names(&pending.forward_sql);
            if !objects.is_empty() && objects.iter().all(|t| existing_tables.contains(t)) {
                issues.push(DiagnosticIssue::new(
                    IssueKind::MissingTracking,
                    Some(pending.version.clone()),
                    "schema objects exist that should have been produced by a pending migration",
                    format!(
                        "version {} is not tracked but its tables ({}) already exist",
                        pending.version,
                        objects.join(", ")
                    ),
                    "recover to insert the tracker row from the on-disk migration",
                ));
            }
        }

        // orphaned_schema: a table with no corresponding migration at all, applied or
        // pending. Low severity, no auto-fix — this is informational only.
        let known_objects: HashSet<String> = all_migrations
            .iter()
            .flat_map(|m| crate::store::created_table_names(&m.forward_sql))
            .collect();
        for table in &existing_tables {
            if !known_objects.contains(table) {
                issues.push(DiagnosticIssue::new(
                    IssueKind::OrphanedSchema,
                    None,
                    "schema object has no corresponding migration",
                    format!("table '{table}' in schema '{APPLICATION_SCHEMA}' matches no discovered migration"),
                    "none (investigate manually; likely created outside the migration set)",
                ));
            }
        }

        Ok(issues)
    }

    /// Apply the auto-fixable subset of `issues`. Set `force` to additionally allow
    /// fixes that discard state unrecoverable from current on-disk/tracker content.
    /// Pass `dry_run = true` to compute the action list without mutating state.
    pub async fn repair(
        &self,
        issues: &[DiagnosticIssue],
        force: bool,
        dry_run: bool,
    ) -> PoststackResult<Vec<RepairAction>> {
        let mut actions = Vec::new();

        for issue in issues {
            if !issue.auto_fixable {
                continue;
            }
            if issue.kind.requires_force() && !force {
                continue;
            }

            let applied = if dry_run {
                false
            } else {
                match issue.kind {
                    IssueKind::StuckLock => {
                        self.tracker().force_clear_lock().await?;
                        true
                    }
                    IssueKind::ChecksumMismatch => {
                        if let Some(version) = &issue.version {
                            if let Some(migration) = crate::store::discover(self.runner.dir())?
                                .into_iter()
                                .find(|m| &m.version == version)
                            {
                                self.tracker()
                                    .update_checksum(version, &migration.forward_checksum)
                                    .await?;
                            }
                        }
                        true
                    }
                    IssueKind::MissingTracking => {
                        if let Some(version) = &issue.version {
                            let recovered = self.recover(std::slice::from_ref(version)).await?;
                            !recovered.is_empty()
                        } else {
                            false
                        }
                    }
                    IssueKind::PartialMigration | IssueKind::InvalidMigration => {
                        // No tracker residue model currently produces these kinds from
                        // diagnose(); repair() accepts them for forward compatibility
                        // with hand-constructed DiagnosticIssues but performs no action.
                        false
                    }
                    _ => false,
                }
            };

            actions.push(RepairAction {
                kind: issue.kind,
                version: issue.version.clone(),
                description: issue.suggested_fix.clone(),
                applied,
            });
        }

        Ok(actions)
    }

    /// Convenience running the common "applied but not tracked" recovery pathway:
    /// for each given version whose schema objects already exist, insert an
    /// AppliedMigration row using the current file contents as the snapshot.
    pub async fn recover(&self, versions: &[String]) -> PoststackResult<Vec<RepairAction>> {
        let migrations = crate::store::discover(self.runner.dir())?;
        let mut actions = Vec::new();

        for version in versions {
            let Some(migration) = migrations.iter().find(|m| &m.version == version) else {
                continue;
            };

            let mut tx = self.tracker().begin().await?;
            self.tracker()
                .record_applied(
                    &mut tx,
                    &migration.version,
                    &migration.description,
                    0,
                    &migration.forward_checksum,
                    &migration.forward_sql,
                    migration.rollback_sql.as_deref(),
                    "recover",
                )
                .await?;
            tx.commit()
                .await
                .map_err(|e| poststack_core::PoststackError::DatabaseUnreachable(e.to_string()))?;

            actions.push(RepairAction {
                kind: IssueKind::MissingTracking,
                version: Some(version.clone()),
                description: "inserted tracker row from on-disk migration".to_string(),
                applied: true,
            });
        }

        Ok(actions)
    }

    /// Run `diagnose()`, then `recover()` every `missing_tracking` version it finds.
    /// With `dry_run = true`, reports the planned inserts without mutating the tracker
    /// — this is the "applied-but-not-tracked" convenience named in the design: the
    /// operator does not need to enumerate versions themselves.
    pub async fn recover_all(&self, dry_run: bool) -> PoststackResult<Vec<RepairAction>> {
        let issues = self.diagnose().await?;
        let versions: Vec<String> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::MissingTracking)
            .filter_map(|i| i.version.clone())
            .collect();

        if dry_run {
            return Ok(versions
                .into_iter()
                .map(|version| RepairAction {
                    kind: IssueKind::MissingTracking,
                    version: Some(version),
                    description: "would insert tracker row from on-disk migration".to_string(),
                    applied: false,
                })
                .collect());
        }

        self.recover(&versions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mismatch_does_not_require_force() {
        assert!(!IssueKind::ChecksumMismatch.requires_force());
        assert!(IssueKind::ChecksumMismatch.auto_fixable());
    }

    #[test]
    fn invalid_migration_requires_force() {
        assert!(IssueKind::InvalidMigration.requires_force());
    }

    #[test]
    fn critical_kinds_are_not_auto_fixable() {
        assert!(!IssueKind::DuplicateVersion.auto_fixable());
        assert!(!IssueKind::CorruptedData.auto_fixable());
    }
}
