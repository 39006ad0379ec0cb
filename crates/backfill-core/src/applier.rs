//! Per-row correction decisions and their application.
//!
//! Each candidate is judged on its own `(payer, timestamp_range.lower)`:
//!
//! | join key | index     | stored owner     | outcome                    |
//! |----------|-----------|------------------|----------------------------|
//! | missing  | n/a       | any              | [`Decision::MissingJoinKey`] |
//! | present  | miss      | any              | [`Decision::Uncorrelated`]   |
//! | present  | hit `V`   | `V`              | [`Decision::AlreadyCorrect`] |
//! | present  | hit `V`   | anything but `V` | [`Decision::Correct`]        |
//!
//! Only `Correct` produces a write. Current rows and history rows go through
//! the same rule independently, so a history version is repaired from its own
//! contract result and never from the current row's.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::correlation::CorrelationIndex;
use crate::error::Result;
use crate::model::{AllowanceTable, Correction, EntityId};
use crate::scanner::{Candidate, Chunk};
use crate::store::AllowanceStore;

/// Outcome for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Decision {
    /// The row has no payer and cannot be correlated
    MissingJoinKey,
    /// No contract result created this version
    Uncorrelated,
    /// The stored owner already matches the contract result sender
    AlreadyCorrect,
    /// The stored owner must be overwritten
    Correct {
        /// Encoded owner as stored
        from: Option<i64>,
        to: EntityId,
    },
}

/// Decide what to do with `candidate`.
#[must_use]
pub fn decide(index: &CorrelationIndex, candidate: &Candidate) -> Decision {
    let Some(key) = candidate.join_key else {
        return Decision::MissingJoinKey;
    };
    match index.lookup(&key) {
        None => Decision::Uncorrelated,
        Some(sender) if candidate.owner == Some(sender.id()) => Decision::AlreadyCorrect,
        Some(sender) => Decision::Correct {
            from: candidate.owner,
            to: sender,
        },
    }
}

/// Outcome counters for one table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub examined: u64,
    pub missing_join_key: u64,
    pub uncorrelated: u64,
    pub already_correct: u64,
    /// Corrections decided
    pub needs_correction: u64,
    /// Corrections that actually landed
    pub corrected: u64,
    /// Corrections skipped because the row changed after it was scanned
    pub conflicts: u64,
}

impl TableStats {
    fn record(&mut self, decision: &Decision) {
        self.examined += 1;
        match decision {
            Decision::MissingJoinKey => self.missing_join_key += 1,
            Decision::Uncorrelated => self.uncorrelated += 1,
            Decision::AlreadyCorrect => self.already_correct += 1,
            Decision::Correct { .. } => self.needs_correction += 1,
        }
    }

    /// Fold another table's counters into this one
    pub fn merge(&mut self, other: &Self) {
        self.examined += other.examined;
        self.missing_join_key += other.missing_join_key;
        self.uncorrelated += other.uncorrelated;
        self.already_correct += other.already_correct;
        self.needs_correction += other.needs_correction;
        self.corrected += other.corrected;
        self.conflicts += other.conflicts;
    }
}

/// Counters for both tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStats {
    pub current: TableStats,
    pub history: TableStats,
}

impl ApplyStats {
    #[must_use]
    pub fn table(&self, table: AllowanceTable) -> &TableStats {
        match table {
            AllowanceTable::Current => &self.current,
            AllowanceTable::History => &self.history,
        }
    }

    fn table_mut(&mut self, table: AllowanceTable) -> &mut TableStats {
        match table {
            AllowanceTable::Current => &mut self.current,
            AllowanceTable::History => &mut self.history,
        }
    }

    /// Sum over both tables
    #[must_use]
    pub fn total(&self) -> TableStats {
        let mut total = self.current;
        total.merge(&self.history);
        total
    }
}

/// Applies decisions for one chunk at a time
pub struct CorrectionApplier<'a> {
    index: &'a CorrelationIndex,
    dry_run: bool,
}

impl<'a> CorrectionApplier<'a> {
    #[must_use]
    pub fn new(index: &'a CorrelationIndex) -> Self {
        Self {
            index,
            dry_run: false,
        }
    }

    /// Decide and count, but never write
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Decide every candidate in `chunk` and write the corrections in one
    /// transaction. Counters are added to `stats`.
    pub fn apply_chunk<S: AllowanceStore + ?Sized>(
        &self,
        store: &mut S,
        chunk: &Chunk,
        stats: &mut ApplyStats,
    ) -> Result<()> {
        let table_stats = stats.table_mut(chunk.table);
        let mut corrections = Vec::new();

        for candidate in &chunk.candidates {
            let decision = decide(self.index, candidate);
            table_stats.record(&decision);
            if let Decision::Correct { from, to } = decision {
                corrections.push(Correction {
                    row: candidate.row,
                    expected_owner: from,
                    owner: to,
                });
            }
        }

        if corrections.is_empty() {
            return Ok(());
        }

        if self.dry_run {
            debug!(
                table = %chunk.table,
                chunk = chunk.ordinal,
                would_correct = corrections.len(),
                "Dry run; skipping writes"
            );
            return Ok(());
        }

        let updated = store.apply_corrections(&corrections)?;
        let conflicts = corrections.len().saturating_sub(updated);
        table_stats.corrected += updated as u64;
        table_stats.conflicts += conflicts as u64;

        if conflicts > 0 {
            warn!(
                table = %chunk.table,
                chunk = chunk.ordinal,
                conflicts,
                "Rows changed after they were scanned; they will be picked up on the next run"
            );
        }
        debug!(
            table = %chunk.table,
            chunk = chunk.ordinal,
            corrected = updated,
            "Applied chunk"
        );
        Ok(())
    }
}
