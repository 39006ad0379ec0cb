//! Candidate enumeration over the current table and the history shadow.
//!
//! Every row is a candidate; whether it is actually wrong is decided later
//! against the correlation index. The scanner walks `token_allowance` and
//! then `token_allowance_history` by rowid, one bounded chunk at a time, and
//! keeps only an in-memory cursor. A new scanner always starts from the
//! beginning.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::Result;
use crate::model::{AllowanceTable, JoinKey, RowRef, StoredAllowance};
use crate::store::AllowanceStore;

/// One row to evaluate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub row: RowRef,
    /// `None` when the row has no payer, or one that does not decode
    pub join_key: Option<JoinKey>,
    /// Encoded owner currently stored, compared and guarded as-is
    pub owner: Option<i64>,
}

impl From<&StoredAllowance> for Candidate {
    fn from(stored: &StoredAllowance) -> Self {
        Self {
            row: stored.row,
            join_key: stored.allowance.join_key(),
            owner: stored.allowance.owner.map(|owner| owner.id()),
        }
    }
}

/// A chunk of candidates from a single table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub table: AllowanceTable,
    /// Ordinal of this chunk within its table, starting at 0
    pub ordinal: u64,
    pub candidates: Vec<Candidate>,
}

/// Keyset cursor over both allowance tables.
#[derive(Debug, Clone)]
pub struct DefectScanner {
    batch_size: usize,
    /// Index into [`AllowanceTable::ALL`]
    position: usize,
    after: Option<i64>,
    ordinal: u64,
}

impl DefectScanner {
    /// Scanner over current rows then history rows, `batch_size` rows per chunk.
    ///
    /// A zero `batch_size` is treated as 1.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            position: 0,
            after: None,
            ordinal: 0,
        }
    }

    /// Read the next chunk, or `None` once both tables are exhausted.
    pub fn next_chunk<S: AllowanceStore + ?Sized>(&mut self, store: &S) -> Result<Option<Chunk>> {
        while let Some(table) = AllowanceTable::ALL.get(self.position).copied() {
            let page = store.scan_candidates(table, self.after, self.batch_size)?;
            if page.is_empty() {
                self.advance_table();
                continue;
            }

            self.after = page.last().map(|candidate| candidate.row.rowid);
            let exhausted = page.len() < self.batch_size;
            let chunk = Chunk {
                table,
                ordinal: self.ordinal,
                candidates: page,
            };
            trace!(
                table = %table,
                chunk = chunk.ordinal,
                rows = chunk.candidates.len(),
                "Scanned chunk"
            );

            self.ordinal += 1;
            if exhausted {
                self.advance_table();
            }
            return Ok(Some(chunk));
        }
        Ok(None)
    }

    fn advance_table(&mut self) {
        self.position += 1;
        self.after = None;
        self.ordinal = 0;
    }
}
