//! Run-once bookkeeping for data migrations.
//!
//! A migration is skipped when the ledger already holds a successful entry
//! with the same description and checksum. Bumping the checksum re-runs it,
//! and `force` re-runs it regardless. Dry runs never touch the ledger.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::migration::{Migration, MigrationReport, SyntheticTokenAllowanceOwnerMigration};
use crate::store::SqliteStore;

/// One row of `migration_history`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub description: String,
    pub checksum: i32,
    pub applied_at: DateTime<Utc>,
    pub execution_ms: u64,
    pub corrected: u64,
    pub success: bool,
}

impl LedgerEntry {
    fn from_report(report: &MigrationReport) -> Self {
        Self {
            description: report.description.clone(),
            checksum: report.checksum,
            applied_at: Utc::now(),
            execution_ms: report.elapsed_ms,
            corrected: report.corrected(),
            success: report.rows.total().conflicts == 0,
        }
    }
}

/// Persistent record of applied migrations
pub trait MigrationLedger {
    /// Checksum of the latest successful entry for `description`
    fn applied_checksum(&self, description: &str) -> Result<Option<i32>>;

    fn record_migration(&mut self, entry: &LedgerEntry) -> Result<()>;

    /// Every entry, oldest first
    fn applied_migrations(&self) -> Result<Vec<LedgerEntry>>;
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl MigrationLedger for SqliteStore {
    fn applied_checksum(&self, description: &str) -> Result<Option<i32>> {
        let mut stmt = self.connection().prepare(
            "SELECT checksum FROM migration_history
             WHERE description = ?1 AND success = 1
             ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![description])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn record_migration(&mut self, entry: &LedgerEntry) -> Result<()> {
        self.connection().execute(
            "INSERT INTO migration_history
             (description, checksum, applied_at, execution_ms, corrected, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.description,
                entry.checksum,
                entry.applied_at.timestamp_millis(),
                to_i64(entry.execution_ms),
                to_i64(entry.corrected),
                entry.success,
            ],
        )?;
        Ok(())
    }

    fn applied_migrations(&self) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.connection().prepare(
            "SELECT description, checksum, applied_at, execution_ms, corrected, success
             FROM migration_history ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let applied_at: i64 = row.get(2)?;
                let execution_ms: i64 = row.get(3)?;
                let corrected: i64 = row.get(4)?;
                Ok(LedgerEntry {
                    description: row.get(0)?,
                    checksum: row.get(1)?,
                    applied_at: DateTime::from_timestamp_millis(applied_at).unwrap_or_default(),
                    execution_ms: u64::try_from(execution_ms).unwrap_or_default(),
                    corrected: u64::try_from(corrected).unwrap_or_default(),
                    success: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// What the runner did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    /// Already applied with this checksum
    Skipped { description: String, checksum: i32 },
    /// Ran and was recorded
    Applied(MigrationReport),
    /// Ran without writing; nothing recorded
    DryRun(MigrationReport),
}

impl RunOutcome {
    #[must_use]
    pub fn report(&self) -> Option<&MigrationReport> {
        match self {
            Self::Skipped { .. } => None,
            Self::Applied(report) | Self::DryRun(report) => Some(report),
        }
    }
}

/// Runs migrations at most once per checksum
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationRunner {
    force: bool,
}

impl MigrationRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run even when the ledger says the migration is applied
    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn run<S, M>(&self, store: &mut S, migration: &M) -> Result<RunOutcome>
    where
        S: MigrationLedger + ?Sized,
        M: Migration<S> + ?Sized,
    {
        let description = migration.description().to_string();
        let checksum = migration.checksum();
        let dry_run = migration.is_dry_run();

        if !self.force && !dry_run {
            if let Some(applied) = store.applied_checksum(&description)? {
                if applied == checksum {
                    info!(
                        migration = %description,
                        checksum,
                        "Migration already applied; skipping"
                    );
                    return Ok(RunOutcome::Skipped {
                        description,
                        checksum,
                    });
                }
                info!(
                    migration = %description,
                    applied_checksum = applied,
                    checksum,
                    "Migration checksum changed; re-running"
                );
            }
        }

        let report = match migration.run(store) {
            Ok(report) => report,
            Err(err) => {
                if !dry_run {
                    let failed = LedgerEntry {
                        description,
                        checksum,
                        applied_at: Utc::now(),
                        execution_ms: 0,
                        corrected: 0,
                        success: false,
                    };
                    if let Err(record_err) = store.record_migration(&failed) {
                        warn!(error = %record_err, "Could not record failed migration");
                    }
                }
                return Err(err);
            }
        };

        if dry_run {
            return Ok(RunOutcome::DryRun(report));
        }
        let entry = LedgerEntry::from_report(&report);
        if !entry.success {
            warn!(
                migration = %entry.description,
                conflicts = report.rows.total().conflicts,
                "Rows changed during the run; not marking the migration as applied"
            );
        }
        store.record_migration(&entry)?;
        Ok(RunOutcome::Applied(report))
    }
}

/// Open the configured database and run the owner backfill on a blocking
/// thread.
pub async fn run_migration_async(config: Config, force: bool) -> Result<RunOutcome> {
    config.validate()?;
    let db_path: PathBuf = config.storage.db_path.clone();
    let busy_timeout = config.storage.busy_timeout();
    let migration = SyntheticTokenAllowanceOwnerMigration::from_config(&config.migration);

    tokio::task::spawn_blocking(move || {
        let mut store = SqliteStore::open(&db_path, busy_timeout)?;
        MigrationRunner::new().force(force).run(&mut store, &migration)
    })
    .await
    .map_err(|e| Error::Runtime(format!("migration task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::fixtures::{DomainBuilder, FamilyKind};

    fn seeded() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut builder = DomainBuilder::new();
        for kind in FamilyKind::ALL {
            builder.allowance_family(kind, 2).persist(&mut store).unwrap();
        }
        store
    }

    struct Versioned(i32);

    impl Migration<SqliteStore> for Versioned {
        fn description(&self) -> &str {
            crate::migration::OWNER_BACKFILL_DESCRIPTION
        }

        fn checksum(&self) -> i32 {
            self.0
        }

        fn run(&self, store: &mut SqliteStore) -> Result<MigrationReport> {
            SyntheticTokenAllowanceOwnerMigration::new(10).run(store)
        }
    }

    struct Failing;

    impl Migration<SqliteStore> for Failing {
        fn description(&self) -> &str {
            "failing"
        }

        fn checksum(&self) -> i32 {
            1
        }

        fn run(&self, _store: &mut SqliteStore) -> Result<MigrationReport> {
            Err(StorageError::Unavailable("disk I/O error".to_string()).into())
        }
    }

    #[test]
    fn first_run_applies_and_records() {
        let mut store = seeded();
        let migration = SyntheticTokenAllowanceOwnerMigration::new(4);
        let outcome = MigrationRunner::new().run(&mut store, &migration).unwrap();

        let RunOutcome::Applied(report) = outcome else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert_eq!(report.corrected(), 3);

        let entries = store.applied_migrations().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].checksum, 1);
        assert_eq!(entries[0].corrected, 3);
        assert!(entries[0].success);
        assert_eq!(
            store
                .applied_checksum(crate::migration::OWNER_BACKFILL_DESCRIPTION)
                .unwrap(),
            Some(1)
        );
    }

    #[test]
    fn second_run_is_skipped() {
        let mut store = seeded();
        let migration = SyntheticTokenAllowanceOwnerMigration::new(4);
        MigrationRunner::new().run(&mut store, &migration).unwrap();
        let outcome = MigrationRunner::new().run(&mut store, &migration).unwrap();

        assert!(matches!(outcome, RunOutcome::Skipped { checksum: 1, .. }));
        assert_eq!(store.applied_migrations().unwrap().len(), 1);
    }

    #[test]
    fn force_reruns_with_zero_corrections() {
        let mut store = seeded();
        let migration = SyntheticTokenAllowanceOwnerMigration::new(4);
        MigrationRunner::new().run(&mut store, &migration).unwrap();
        let outcome = MigrationRunner::new()
            .force(true)
            .run(&mut store, &migration)
            .unwrap();

        let report = outcome.report().unwrap();
        assert_eq!(report.corrected(), 0);
        assert_eq!(store.applied_migrations().unwrap().len(), 2);
    }

    #[test]
    fn changed_checksum_reruns() {
        let mut store = seeded();
        MigrationRunner::new().run(&mut store, &Versioned(1)).unwrap();
        let outcome = MigrationRunner::new().run(&mut store, &Versioned(2)).unwrap();

        assert!(matches!(outcome, RunOutcome::Applied(_)));
        let checksums: Vec<i32> = store
            .applied_migrations()
            .unwrap()
            .iter()
            .map(|e| e.checksum)
            .collect();
        assert_eq!(checksums, vec![1, 2]);
    }

    #[test]
    fn dry_run_is_never_recorded() {
        let mut store = seeded();
        let before = store.state_fingerprint().unwrap();
        let migration = SyntheticTokenAllowanceOwnerMigration::new(4).dry_run(true);
        let outcome = MigrationRunner::new().run(&mut store, &migration).unwrap();

        let RunOutcome::DryRun(report) = outcome else {
            panic!("expected DryRun, got {outcome:?}");
        };
        assert_eq!(report.needs_correction(), 3);
        assert!(store.applied_migrations().unwrap().is_empty());
        assert_eq!(store.state_fingerprint().unwrap(), before);
    }

    #[test]
    fn failure_is_recorded_and_not_treated_as_applied() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let err = MigrationRunner::new().run(&mut store, &Failing).unwrap_err();
        assert!(err.is_retryable());

        let entries = store.applied_migrations().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert_eq!(store.applied_checksum("failing").unwrap(), None);
    }

    #[test]
    fn run_with_conflicts_is_not_marked_applied() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut builder = DomainBuilder::new();
        let families = [
            builder.allowance_family(FamilyKind::Incorrect, 0),
            builder.allowance_family(FamilyKind::Incorrect, 0),
        ];
        for family in &families {
            family.persist(&mut store).unwrap();
        }
        // A concurrent writer touching row 2 while row 1 is corrected.
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER concurrent_writer AFTER UPDATE OF owner ON token_allowance
                 WHEN NEW.id = 1
                 BEGIN UPDATE token_allowance SET owner = 777 WHERE id = 2; END;",
            )
            .unwrap();
        let migration = SyntheticTokenAllowanceOwnerMigration::new(10);

        let first = MigrationRunner::new().run(&mut store, &migration).unwrap();
        let report = first.report().unwrap();
        assert_eq!(report.rows.current.conflicts, 1);
        assert_eq!(report.corrected(), 1);
        assert!(!store.applied_migrations().unwrap()[0].success);
        assert_eq!(
            store
                .applied_checksum(crate::migration::OWNER_BACKFILL_DESCRIPTION)
                .unwrap(),
            None
        );

        store
            .connection()
            .execute_batch("DROP TRIGGER concurrent_writer;")
            .unwrap();
        let second = MigrationRunner::new().run(&mut store, &migration).unwrap();
        let RunOutcome::Applied(report) = second else {
            panic!("expected Applied, got {second:?}");
        };
        assert_eq!(report.corrected(), 1);
        for family in &families {
            let current = &family.current;
            let found = store
                .find_current(current.payer_account_id, current.spender, current.token_id)
                .unwrap()
                .unwrap();
            assert_eq!(found.allowance, family.expected_current());
        }

        let third = MigrationRunner::new().run(&mut store, &migration).unwrap();
        assert!(matches!(third, RunOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn async_entry_point_runs_against_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("backfill.db");
        {
            let mut store =
                SqliteStore::open(&db_path, std::time::Duration::from_millis(500)).unwrap();
            DomainBuilder::new()
                .allowance_family(FamilyKind::Incorrect, 1)
                .persist(&mut store)
                .unwrap();
        }

        let mut config = Config::default();
        config.storage.db_path = db_path;
        let outcome = run_migration_async(config.clone(), false).await.unwrap();
        assert_eq!(outcome.report().map(MigrationReport::corrected), Some(2));

        let again = run_migration_async(config, false).await.unwrap();
        assert!(matches!(again, RunOutcome::Skipped { .. }));
    }
}
