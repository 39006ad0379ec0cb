//! The owner backfill as a runnable migration.
//!
//! # Pipeline
//!
//! 1. Build the correlation index from every contract result
//! 2. Walk `token_allowance` then `token_allowance_history` in chunks
//! 3. Decide each row against the index and write the corrections of each
//!    chunk in one transaction
//!
//! Nothing is cached between runs. A failed run leaves every committed chunk
//! in place and the next run converges from scratch.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::applier::{ApplyStats, CorrectionApplier};
use crate::correlation::{CorrelationIndex, IndexStats};
use crate::error::Result;
use crate::scanner::DefectScanner;
use crate::store::{AllowanceStore, CorrelationSource};

/// A data migration identified by description and checksum.
pub trait Migration<S: ?Sized> {
    /// Stable name recorded in the migration ledger
    fn description(&self) -> &str;

    /// Version of the migration body. A ledger entry only counts as applied
    /// when both description and checksum match.
    fn checksum(&self) -> i32;

    /// Dry runs compute their report without writing and are never recorded
    /// in the ledger.
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Run to completion against `store`.
    fn run(&self, store: &mut S) -> Result<MigrationReport>;
}

/// Outcome of one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub description: String,
    pub checksum: i32,
    pub dry_run: bool,
    pub index: IndexStats,
    pub rows: ApplyStats,
    pub chunks: u64,
    pub elapsed_ms: u64,
}

impl MigrationReport {
    /// Rows actually rewritten across both tables
    #[must_use]
    pub fn corrected(&self) -> u64 {
        self.rows.total().corrected
    }

    /// Rows that would be rewritten by a non-dry run
    #[must_use]
    pub fn needs_correction(&self) -> u64 {
        self.rows.total().needs_correction
    }
}

/// Stable ledger name of [`SyntheticTokenAllowanceOwnerMigration`]
pub const OWNER_BACKFILL_DESCRIPTION: &str = "Backfill synthetic token allowance owner";

/// Repairs `owner` on synthetic token allowances, current and historical,
/// from the sender of the contract result that created each version.
#[derive(Debug, Clone)]
pub struct SyntheticTokenAllowanceOwnerMigration {
    batch_size: usize,
    dry_run: bool,
}

impl Default for SyntheticTokenAllowanceOwnerMigration {
    fn default() -> Self {
        Self::new(crate::config::MigrationConfig::default().batch_size)
    }
}

impl SyntheticTokenAllowanceOwnerMigration {
    /// Static checksum; bump when the correction rule changes.
    pub const CHECKSUM: i32 = 1;

    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            dry_run: false,
        }
    }

    /// Build from the `[migration]` config section
    #[must_use]
    pub fn from_config(config: &crate::config::MigrationConfig) -> Self {
        Self::new(config.batch_size).dry_run(config.dry_run)
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<S> Migration<S> for SyntheticTokenAllowanceOwnerMigration
where
    S: AllowanceStore + CorrelationSource + ?Sized,
{
    fn description(&self) -> &str {
        OWNER_BACKFILL_DESCRIPTION
    }

    fn checksum(&self) -> i32 {
        Self::CHECKSUM
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    #[instrument(skip_all, fields(batch_size = self.batch_size, dry_run = self.dry_run))]
    fn run(&self, store: &mut S) -> Result<MigrationReport> {
        let started = Instant::now();

        let index = CorrelationIndex::build(&*store)?;
        let applier = CorrectionApplier::new(&index).dry_run(self.dry_run);
        let mut scanner = DefectScanner::new(self.batch_size);
        let mut rows = ApplyStats::default();
        let mut chunks = 0u64;

        while let Some(chunk) = scanner.next_chunk(&*store)? {
            applier.apply_chunk(store, &chunk, &mut rows)?;
            chunks += 1;
        }

        let report = MigrationReport {
            description: OWNER_BACKFILL_DESCRIPTION.to_string(),
            checksum: Self::CHECKSUM,
            dry_run: self.dry_run,
            index: index.stats(),
            rows,
            chunks,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        info!(
            checksum = report.checksum,
            dry_run = report.dry_run,
            chunks = report.chunks,
            current_corrected = report.rows.current.corrected,
            history_corrected = report.rows.history.corrected,
            needs_correction = report.needs_correction(),
            duplicates = report.index.duplicates,
            elapsed_ms = report.elapsed_ms,
            "Owner backfill finished"
        );
        Ok(report)
    }
}
