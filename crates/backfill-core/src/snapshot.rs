//! Full-state snapshots of both allowance tables.
//!
//! A snapshot holds every current and history row in rowid order. Two runs of
//! the backfill are equivalent when the snapshots taken after each of them
//! compare equal, or more cheaply when their SHA-256 fingerprints do.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::model::{AllowanceTable, StoredAllowance};
use crate::store::{AllowanceStore, SqliteStore};

const CAPTURE_PAGE_SIZE: usize = 1_000;

/// Every allowance row, current and historical
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub current: Vec<StoredAllowance>,
    pub history: Vec<StoredAllowance>,
}

impl StateSnapshot {
    /// Read both tables through the paginated store interface.
    pub fn capture<S: AllowanceStore + ?Sized>(store: &S) -> Result<Self> {
        Ok(Self {
            current: capture_table(store, AllowanceTable::Current)?,
            history: capture_table(store, AllowanceTable::History)?,
        })
    }

    #[must_use]
    pub fn rows(&self, table: AllowanceTable) -> &[StoredAllowance] {
        match table {
            AllowanceTable::Current => &self.current,
            AllowanceTable::History => &self.history,
        }
    }

    /// Hex SHA-256 over every column of every row, table by table.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for table in AllowanceTable::ALL {
            hasher.update(table.table_name().as_bytes());
            hasher.update([0u8]);
            for stored in self.rows(table) {
                let a = &stored.allowance;
                hasher.update(stored.row.rowid.to_le_bytes());
                hasher.update(a.amount.to_le_bytes());
                update_optional(&mut hasher, a.owner.map(|id| id.id()));
                update_optional(&mut hasher, a.payer_account_id.map(|id| id.id()));
                hasher.update(a.spender.id().to_le_bytes());
                hasher.update(a.token_id.id().to_le_bytes());
                hasher.update(a.timestamp_range.lower.to_le_bytes());
                update_optional(&mut hasher, a.timestamp_range.upper);
            }
        }
        hex::encode(hasher.finalize())
    }
}

fn update_optional(hasher: &mut Sha256, value: Option<i64>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update(v.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
}

fn capture_table<S: AllowanceStore + ?Sized>(
    store: &S,
    table: AllowanceTable,
) -> Result<Vec<StoredAllowance>> {
    let mut rows = Vec::new();
    let mut after = None;
    loop {
        let page = store.scan_page(table, after, CAPTURE_PAGE_SIZE)?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.row.rowid);
        let done = page.len() < CAPTURE_PAGE_SIZE;
        rows.extend(page);
        if done {
            break;
        }
    }
    Ok(rows)
}

impl SqliteStore {
    /// Fingerprint of both allowance tables
    pub fn state_fingerprint(&self) -> Result<String> {
        Ok(StateSnapshot::capture(self)?.fingerprint())
    }
}
