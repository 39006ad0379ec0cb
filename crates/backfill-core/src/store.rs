//! SQLite-backed allowance and contract result storage.
//!
//! The backfill only needs three capabilities from storage, expressed as
//! traits so the correction pipeline can run against any backend:
//!
//! - [`CorrelationSource`]: enumerate every contract result once per run
//! - [`AllowanceStore::scan_page`] and [`AllowanceStore::scan_candidates`]:
//!   keyset-paginated reads of the current and history allowance tables
//! - [`AllowanceStore::apply_corrections`]: in-place owner updates, one short
//!   transaction per call
//!
//! [`SqliteStore`] implements both over rusqlite. It also carries the insert
//! helpers used by the test-data builder and the `seed` command; the
//! correction pipeline itself never inserts or deletes allowance rows.

use std::path::Path;
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Row, params};
use tracing::{debug, warn};

use crate::error::{Error, Result, StorageError};
use crate::model::{
    AllowanceTable, ContractResult, Correction, EntityId, JoinKey, RowRef, StoredAllowance,
    TimestampRange, TokenAllowance,
};
use crate::scanner::Candidate;

/// Schema for the allowance tables, the contract result table and the
/// migration ledger.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS token_allowance (
    id INTEGER PRIMARY KEY,
    amount INTEGER NOT NULL,
    owner INTEGER,
    payer_account_id INTEGER,
    spender INTEGER NOT NULL,
    token_id INTEGER NOT NULL,
    timestamp_lower INTEGER NOT NULL,
    timestamp_upper INTEGER,
    UNIQUE (payer_account_id, spender, token_id)
);

CREATE TABLE IF NOT EXISTS token_allowance_history (
    id INTEGER PRIMARY KEY,
    amount INTEGER NOT NULL,
    owner INTEGER,
    payer_account_id INTEGER,
    spender INTEGER NOT NULL,
    token_id INTEGER NOT NULL,
    timestamp_lower INTEGER NOT NULL,
    timestamp_upper INTEGER NOT NULL,
    CHECK (timestamp_upper > timestamp_lower)
);
CREATE INDEX IF NOT EXISTS idx_token_allowance_history_identity
    ON token_allowance_history (payer_account_id, spender, token_id, timestamp_lower);

CREATE TABLE IF NOT EXISTS contract_result (
    id INTEGER PRIMARY KEY,
    consensus_timestamp INTEGER NOT NULL,
    contract_id INTEGER NOT NULL,
    payer_account_id INTEGER,
    sender_id INTEGER,
    gas_used INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_contract_result_payer_timestamp
    ON contract_result (payer_account_id, consensus_timestamp);

CREATE TABLE IF NOT EXISTS migration_history (
    id INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    checksum INTEGER NOT NULL,
    applied_at INTEGER NOT NULL,
    execution_ms INTEGER NOT NULL,
    corrected INTEGER NOT NULL,
    success INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_migration_history_description
    ON migration_history (description, id);
"#;

const ALLOWANCE_COLUMNS: &str =
    "id, amount, owner, payer_account_id, spender, token_id, timestamp_lower, timestamp_upper";

/// Source of ground-truth owners
pub trait CorrelationSource {
    /// Visit every contract result in insertion order.
    fn for_each_contract_result(&self, visit: &mut dyn FnMut(ContractResult)) -> Result<()>;
}

/// Versioned allowance storage: current table plus history shadow
pub trait AllowanceStore {
    /// Up to `limit` rows of `table` with rowid greater than `after`,
    /// ordered by rowid.
    fn scan_page(
        &self,
        table: AllowanceTable,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredAllowance>>;

    /// Like [`AllowanceStore::scan_page`], reduced to what the correction
    /// rule reads. A row whose payer does not decode yields no join key
    /// instead of failing the page.
    fn scan_candidates(
        &self,
        table: AllowanceTable,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let page = self.scan_page(table, after, limit)?;
        Ok(page.iter().map(Candidate::from).collect())
    }

    /// Apply owner corrections atomically. A correction only lands if the
    /// row still holds `expected_owner`. Returns the number of rows updated.
    fn apply_corrections(&mut self, corrections: &[Correction]) -> Result<usize>;
}

impl ToSql for EntityId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.id()))
    }
}

impl FromSql for EntityId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let encoded = i64::column_result(value)?;
        Self::decode(encoded).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn read_allowance(table: AllowanceTable, row: &Row<'_>) -> rusqlite::Result<StoredAllowance> {
    Ok(StoredAllowance {
        row: RowRef {
            table,
            rowid: row.get(0)?,
        },
        allowance: TokenAllowance {
            amount: row.get(1)?,
            owner: row.get(2)?,
            payer_account_id: row.get(3)?,
            spender: row.get(4)?,
            token_id: row.get(5)?,
            timestamp_range: TimestampRange {
                lower: row.get(6)?,
                upper: row.get(7)?,
            },
        },
    })
}

/// Decode a nullable entity column, treating a bad value as absent.
fn lenient_entity(table: &str, column: &str, rowid: i64, raw: Option<i64>) -> Option<EntityId> {
    let raw = raw?;
    match EntityId::decode(raw) {
        Ok(id) => Some(id),
        Err(err) => {
            warn!(table, column, rowid, error = %err, "Ignoring undecodable entity id");
            None
        }
    }
}

fn read_candidate(table: AllowanceTable, row: &Row<'_>) -> rusqlite::Result<Candidate> {
    let rowid: i64 = row.get(0)?;
    let payer = lenient_entity(table.table_name(), "payer_account_id", rowid, row.get(2)?);
    let lower: i64 = row.get(3)?;
    Ok(Candidate {
        row: RowRef { table, rowid },
        join_key: payer.map(|payer| JoinKey {
            payer,
            timestamp: lower,
        }),
        owner: row.get(1)?,
    })
}

fn read_contract_result(row: &Row<'_>) -> rusqlite::Result<ContractResult> {
    let rowid: i64 = row.get(0)?;
    let payer = lenient_entity("contract_result", "payer_account_id", rowid, row.get(3)?);
    let sender = lenient_entity("contract_result", "sender_id", rowid, row.get(4)?);
    Ok(ContractResult {
        consensus_timestamp: row.get(1)?,
        contract_id: row.get(2)?,
        payer_account_id: payer,
        sender_id: sender,
        gas_used: row.get(5)?,
    })
}

/// Map a row read failure, reporting values that do not decode as
/// [`StorageError::InvalidRow`] rather than an unavailable database.
fn read_error(table: &str, err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::FromSqlConversionFailure(column, _, cause) => StorageError::InvalidRow {
            table: table.to_string(),
            details: format!("column {column}: {cause}"),
        }
        .into(),
        other => other.into(),
    }
}

/// rusqlite-backed store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        debug!(db_path = %path.display(), "Opened allowance database");
        Self::from_connection(conn)
    }

    /// Fresh in-memory database with the schema applied
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, creating missing tables
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StorageError::Schema(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Underlying connection, for ad-hoc queries and tests
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert an allowance version into `table`.
    pub fn insert_allowance(
        &mut self,
        table: AllowanceTable,
        allowance: &TokenAllowance,
    ) -> Result<RowRef> {
        if table == AllowanceTable::History && allowance.timestamp_range.is_open() {
            return Err(StorageError::InvalidRow {
                table: table.table_name().to_string(),
                details: "history rows need a closed timestamp range".to_string(),
            }
            .into());
        }
        let sql = format!(
            "INSERT INTO {} (amount, owner, payer_account_id, spender, token_id, timestamp_lower, timestamp_upper)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            table.table_name()
        );
        self.conn.execute(
            &sql,
            params![
                allowance.amount,
                allowance.owner,
                allowance.payer_account_id,
                allowance.spender,
                allowance.token_id,
                allowance.timestamp_range.lower,
                allowance.timestamp_range.upper,
            ],
        )?;
        Ok(RowRef {
            table,
            rowid: self.conn.last_insert_rowid(),
        })
    }

    /// Insert a contract result, returning its rowid.
    pub fn insert_contract_result(&mut self, result: &ContractResult) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO contract_result (consensus_timestamp, contract_id, payer_account_id, sender_id, gas_used)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.consensus_timestamp,
                result.contract_id,
                result.payer_account_id,
                result.sender_id,
                result.gas_used,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Run `f` inside one write transaction, rolling back if it fails.
    ///
    /// Meant for bulk inserts; `apply_corrections` opens its own transaction
    /// and must not be called from `f`.
    pub fn in_transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// The current version of an identity key, if any
    pub fn find_current(
        &self,
        payer: Option<EntityId>,
        spender: EntityId,
        token_id: EntityId,
    ) -> Result<Option<StoredAllowance>> {
        let mut rows = self.find_identity(AllowanceTable::Current, payer, spender, token_id)?;
        Ok(rows.pop())
    }

    /// Every history version of an identity key, oldest first
    pub fn find_history(
        &self,
        payer: Option<EntityId>,
        spender: EntityId,
        token_id: EntityId,
    ) -> Result<Vec<StoredAllowance>> {
        self.find_identity(AllowanceTable::History, payer, spender, token_id)
    }

    fn find_identity(
        &self,
        table: AllowanceTable,
        payer: Option<EntityId>,
        spender: EntityId,
        token_id: EntityId,
    ) -> Result<Vec<StoredAllowance>> {
        let sql = format!(
            "SELECT {ALLOWANCE_COLUMNS} FROM {}
             WHERE payer_account_id IS ?1 AND spender = ?2 AND token_id = ?3
             ORDER BY timestamp_lower, id",
            table.table_name()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![payer, spender, token_id], |row| {
                read_allowance(table, row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| read_error(table.table_name(), e))?;
        Ok(rows)
    }

    /// Every row of `table`, in rowid order
    pub fn list_allowances(&self, table: AllowanceTable) -> Result<Vec<StoredAllowance>> {
        let sql = format!(
            "SELECT {ALLOWANCE_COLUMNS} FROM {} ORDER BY id",
            table.table_name()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| read_allowance(table, row))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| read_error(table.table_name(), e))?;
        Ok(rows)
    }

    /// Every contract result, in insertion order
    pub fn list_contract_results(&self) -> Result<Vec<ContractResult>> {
        let mut results = Vec::new();
        self.for_each_contract_result(&mut |result| results.push(result))?;
        Ok(results)
    }

    /// Row count of one allowance table
    pub fn count(&self, table: AllowanceTable) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.table_name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Row count of `contract_result`
    pub fn count_contract_results(&self) -> Result<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM contract_result", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl CorrelationSource for SqliteStore {
    fn for_each_contract_result(&self, visit: &mut dyn FnMut(ContractResult)) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT id, consensus_timestamp, contract_id, payer_account_id, sender_id, gas_used
             FROM contract_result ORDER BY id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            visit(read_contract_result(row).map_err(|e| read_error("contract_result", e))?);
        }
        Ok(())
    }
}

impl AllowanceStore for SqliteStore {
    fn scan_page(
        &self,
        table: AllowanceTable,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredAllowance>> {
        let sql = format!(
            "SELECT {ALLOWANCE_COLUMNS} FROM {} WHERE id > ?1 ORDER BY id LIMIT ?2",
            table.table_name()
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![after.unwrap_or(i64::MIN), limit], |row| {
                read_allowance(table, row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| read_error(table.table_name(), e))?;
        Ok(rows)
    }

    fn scan_candidates(
        &self,
        table: AllowanceTable,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let sql = format!(
            "SELECT id, owner, payer_account_id, timestamp_lower FROM {}
             WHERE id > ?1 ORDER BY id LIMIT ?2",
            table.table_name()
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![after.unwrap_or(i64::MIN), limit], |row| {
                read_candidate(table, row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| read_error(table.table_name(), e))?;
        Ok(rows)
    }

    fn apply_corrections(&mut self, corrections: &[Correction]) -> Result<usize> {
        if corrections.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut updated = 0;
        {
            let mut current = tx.prepare(
                "UPDATE token_allowance SET owner = ?1 WHERE id = ?2 AND owner IS ?3",
            )?;
            let mut history = tx.prepare(
                "UPDATE token_allowance_history SET owner = ?1 WHERE id = ?2 AND owner IS ?3",
            )?;
            for correction in corrections {
                let stmt = match correction.row.table {
                    AllowanceTable::Current => &mut current,
                    AllowanceTable::History => &mut history,
                };
                updated += stmt.execute(params![
                    correction.owner,
                    correction.row.rowid,
                    correction.expected_owner,
                ])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowance(payer: Option<i64>, owner: Option<i64>, range: TimestampRange) -> TokenAllowance {
        TokenAllowance {
            amount: 10,
            owner: owner.map(EntityId::of_num),
            payer_account_id: payer.map(EntityId::of_num),
            spender: EntityId::of_num(600),
            token_id: EntityId::of_num(700),
            timestamp_range: range,
        }
    }

    #[test]
    fn insert_and_list_roundtrip_nullable_columns() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let row = allowance(None, None, TimestampRange::at_least(100));
        let rowref = store.insert_allowance(AllowanceTable::Current, &row).unwrap();

        let listed = store.list_allowances(AllowanceTable::Current).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].row, rowref);
        assert_eq!(listed[0].allowance, row);
    }

    #[test]
    fn history_rejects_open_ranges() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .insert_allowance(
                AllowanceTable::History,
                &allowance(Some(1), None, TimestampRange::at_least(5)),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Storage(StorageError::InvalidRow { .. })
        ));
    }

    #[test]
    fn current_identity_is_unique() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let row = allowance(Some(1), Some(2), TimestampRange::at_least(5));
        store.insert_allowance(AllowanceTable::Current, &row).unwrap();
        let err = store
            .insert_allowance(AllowanceTable::Current, &row)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Storage(StorageError::Unavailable(_))
        ));
    }

    #[test]
    fn scan_page_paginates_by_rowid() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        for i in 0..5 {
            let row = TokenAllowance {
                token_id: EntityId::of_num(700 + i),
                ..allowance(Some(1), None, TimestampRange::closed_open(i, i + 1))
            };
            store.insert_allowance(AllowanceTable::History, &row).unwrap();
        }

        let first = store.scan_page(AllowanceTable::History, None, 2).unwrap();
        assert_eq!(first.len(), 2);
        let after = first.last().map(|r| r.row.rowid);
        let second = store.scan_page(AllowanceTable::History, after, 2).unwrap();
        assert_eq!(second.len(), 2);
        assert!(second[0].row.rowid > first[1].row.rowid);
        let third = store
            .scan_page(AllowanceTable::History, second.last().map(|r| r.row.rowid), 2)
            .unwrap();
        assert_eq!(third.len(), 1);
        let done = store
            .scan_page(AllowanceTable::History, third.last().map(|r| r.row.rowid), 2)
            .unwrap();
        assert!(done.is_empty());
    }

    #[test]
    fn apply_corrections_only_touches_owner() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let row = allowance(Some(1), Some(1001), TimestampRange::at_least(50));
        let rowref = store.insert_allowance(AllowanceTable::Current, &row).unwrap();

        let updated = store
            .apply_corrections(&[Correction {
                row: rowref,
                expected_owner: Some(1001),
                owner: EntityId::of_num(2001),
            }])
            .unwrap();
        assert_eq!(updated, 1);

        let listed = store.list_allowances(AllowanceTable::Current).unwrap();
        let expected = TokenAllowance {
            owner: Some(EntityId::of_num(2001)),
            ..row
        };
        assert_eq!(listed[0].allowance, expected);
    }

    #[test]
    fn apply_corrections_skips_rows_changed_underneath() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let row = allowance(Some(1), None, TimestampRange::closed_open(1, 2));
        let rowref = store.insert_allowance(AllowanceTable::History, &row).unwrap();

        let updated = store
            .apply_corrections(&[Correction {
                row: rowref,
                expected_owner: Some(42),
                owner: EntityId::of_num(2001),
            }])
            .unwrap();
        assert_eq!(updated, 0);
        assert_eq!(
            store.list_allowances(AllowanceTable::History).unwrap()[0]
                .allowance
                .owner,
            None
        );
    }

    #[test]
    fn contract_results_visit_in_insertion_order() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        for ts in [30, 10, 20] {
            store
                .insert_contract_result(&ContractResult {
                    consensus_timestamp: ts,
                    contract_id: EntityId::of_num(900),
                    payer_account_id: Some(EntityId::of_num(1)),
                    sender_id: None,
                    gas_used: 0,
                })
                .unwrap();
        }
        let timestamps: Vec<i64> = store
            .list_contract_results()
            .unwrap()
            .iter()
            .map(|r| r.consensus_timestamp)
            .collect();
        assert_eq!(timestamps, vec![30, 10, 20]);
        assert_eq!(store.count_contract_results().unwrap(), 3);
    }

    #[test]
    fn find_by_identity_returns_current_and_ordered_history() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let current = allowance(Some(1), Some(5), TimestampRange::at_least(30));
        store.insert_allowance(AllowanceTable::Current, &current).unwrap();
        for range in [
            TimestampRange::closed_open(20, 30),
            TimestampRange::closed_open(10, 20),
        ] {
            store
                .insert_allowance(AllowanceTable::History, &allowance(Some(1), Some(5), range))
                .unwrap();
        }

        let spender = EntityId::of_num(600);
        let token = EntityId::of_num(700);
        let found = store
            .find_current(Some(EntityId::of_num(1)), spender, token)
            .unwrap()
            .unwrap();
        assert_eq!(found.allowance, current);
        assert!(store.find_current(None, spender, token).unwrap().is_none());

        let lowers: Vec<i64> = store
            .find_history(Some(EntityId::of_num(1)), spender, token)
            .unwrap()
            .iter()
            .map(|r| r.allowance.timestamp_range.lower)
            .collect();
        assert_eq!(lowers, vec![10, 20]);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let row = allowance(Some(1), None, TimestampRange::at_least(1));
        let result: Result<()> = store.in_transaction(|store| {
            store.insert_allowance(AllowanceTable::Current, &row)?;
            store.insert_allowance(AllowanceTable::Current, &row)?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(store.count(AllowanceTable::Current).unwrap(), 0);

        store
            .in_transaction(|store| store.insert_allowance(AllowanceTable::Current, &row))
            .unwrap();
        assert_eq!(store.count(AllowanceTable::Current).unwrap(), 1);
    }

    #[test]
    fn undecodable_entities_do_not_fail_candidate_scans() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO token_allowance
                 (amount, owner, payer_account_id, spender, token_id, timestamp_lower)
                 VALUES (1, -5, -3, 600, 700, 10)",
                [],
            )
            .unwrap();

        let candidates = store
            .scan_candidates(AllowanceTable::Current, None, 10)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].join_key, None);
        assert_eq!(candidates[0].owner, Some(-5));

        let err = store.list_allowances(AllowanceTable::Current).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Storage(StorageError::InvalidRow { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn undecodable_contract_result_fields_read_as_absent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO contract_result
                 (consensus_timestamp, contract_id, payer_account_id, sender_id)
                 VALUES (10, 900, 1, -8)",
                [],
            )
            .unwrap();

        let results = store.list_contract_results().unwrap();
        assert_eq!(results[0].payer_account_id, Some(EntityId::of_num(1)));
        assert_eq!(results[0].sender_id, None);
    }

    #[test]
    fn open_file_database_persists_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backfill.db");
        {
            let mut store = SqliteStore::open(&path, Duration::from_millis(100)).unwrap();
            store
                .insert_allowance(
                    AllowanceTable::Current,
                    &allowance(Some(3), None, TimestampRange::at_least(9)),
                )
                .unwrap();
        }
        let store = SqliteStore::open(&path, Duration::from_millis(100)).unwrap();
        assert_eq!(store.count(AllowanceTable::Current).unwrap(), 1);
        assert_eq!(store.count(AllowanceTable::History).unwrap(), 0);
    }
}
