//! Deterministic test-data builders.
//!
//! [`DomainBuilder`] hands out drafts of allowances and contract results whose
//! ids and timestamps come from an owned [`Sequence`], so two builders never
//! share state and every run of a test sees the same data.
//!
//! ```no_run
//! # use backfill_core::fixtures::{DomainBuilder, FamilyKind};
//! # use backfill_core::store::SqliteStore;
//! let mut store = SqliteStore::open_in_memory()?;
//! let mut builder = DomainBuilder::new();
//! let allowance = builder
//!     .token_allowance()
//!     .customize(|a| a.amount = 42)
//!     .persist(&mut store)?;
//! builder
//!     .allowance_family(FamilyKind::Incorrect, 2)
//!     .persist(&mut store)?;
//! # Ok::<(), backfill_core::Error>(())
//! ```
//!
//! [`BulkBuilder`] produces many families from a weighted mix of kinds for
//! seeding larger databases.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::model::{
    AllowanceTable, ContractResult, EntityId, StoredAllowance, TimestampRange, TokenAllowance,
};
use crate::store::SqliteStore;

/// First id handed out by [`Sequence::new`]
const FIRST_ID: i64 = 1_000;
/// First timestamp handed out by [`Sequence::new`]
const FIRST_TIMESTAMP: i64 = 1_700_000_000_000_000_000;
/// Gap between consecutive timestamps; leaves room for history versions
/// immediately before each current row.
const TIMESTAMP_STEP: i64 = 1_000;
/// Entity num bits of an encoded id
const NUM_MASK: i64 = 0xFFFF_FFFF;

/// Source of unique ids and increasing timestamps
#[derive(Debug, Clone)]
pub struct Sequence {
    next_id: i64,
    next_timestamp: i64,
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequence {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(FIRST_ID, FIRST_TIMESTAMP)
    }

    #[must_use]
    pub fn starting_at(id: i64, timestamp: i64) -> Self {
        Self {
            next_id: id,
            next_timestamp: timestamp,
        }
    }

    pub fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn next_entity(&mut self) -> EntityId {
        EntityId::of_num(self.next_id())
    }

    pub fn next_timestamp(&mut self) -> i64 {
        let timestamp = self.next_timestamp;
        self.next_timestamp += TIMESTAMP_STEP;
        timestamp
    }
}

/// An allowance that has not been persisted yet
#[derive(Debug, Clone)]
pub struct AllowanceDraft {
    table: AllowanceTable,
    allowance: TokenAllowance,
}

impl AllowanceDraft {
    #[must_use]
    pub fn customize(mut self, f: impl FnOnce(&mut TokenAllowance)) -> Self {
        f(&mut self.allowance);
        self
    }

    #[must_use]
    pub fn build(self) -> TokenAllowance {
        self.allowance
    }

    pub fn persist(self, store: &mut SqliteStore) -> Result<StoredAllowance> {
        let row = store.insert_allowance(self.table, &self.allowance)?;
        Ok(StoredAllowance {
            row,
            allowance: self.allowance,
        })
    }
}

/// A contract result that has not been persisted yet
#[derive(Debug, Clone)]
pub struct ContractResultDraft {
    result: ContractResult,
}

impl ContractResultDraft {
    #[must_use]
    pub fn customize(mut self, f: impl FnOnce(&mut ContractResult)) -> Self {
        f(&mut self.result);
        self
    }

    #[must_use]
    pub fn build(self) -> ContractResult {
        self.result
    }

    pub fn persist(self, store: &mut SqliteStore) -> Result<ContractResult> {
        store.insert_contract_result(&self.result)?;
        Ok(self.result)
    }
}

/// Shape of a generated allowance family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyKind {
    /// Every version has a contract result whose sender differs from the owner
    Incorrect,
    /// No contract results and a null owner
    Uncorrelated,
    /// Every version has a contract result whose sender equals the owner
    AlreadyCorrect,
}

impl FamilyKind {
    pub const ALL: [Self; 3] = [Self::Incorrect, Self::Uncorrelated, Self::AlreadyCorrect];
}

/// One identity key: the current version, its history and the contract
/// results that created them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowanceFamily {
    pub kind: FamilyKind,
    pub current: TokenAllowance,
    /// Oldest first
    pub history: Vec<TokenAllowance>,
    pub contract_results: Vec<ContractResult>,
}

impl AllowanceFamily {
    pub fn persist(&self, store: &mut SqliteStore) -> Result<()> {
        store.insert_allowance(AllowanceTable::Current, &self.current)?;
        for version in &self.history {
            store.insert_allowance(AllowanceTable::History, version)?;
        }
        for result in &self.contract_results {
            store.insert_contract_result(result)?;
        }
        Ok(())
    }

    /// `version` as it should read after the backfill
    #[must_use]
    pub fn corrected(&self, version: &TokenAllowance) -> TokenAllowance {
        let sender = version.join_key().and_then(|key| {
            self.contract_results
                .iter()
                .rev()
                .filter(|r| r.join_key() == Some(key))
                .find_map(|r| r.sender_id)
        });
        TokenAllowance {
            owner: sender.or(version.owner),
            ..version.clone()
        }
    }

    #[must_use]
    pub fn expected_current(&self) -> TokenAllowance {
        self.corrected(&self.current)
    }

    #[must_use]
    pub fn expected_history(&self) -> Vec<TokenAllowance> {
        self.history.iter().map(|v| self.corrected(v)).collect()
    }
}

/// Builder for domain rows backed by its own [`Sequence`]
#[derive(Debug, Clone, Default)]
pub struct DomainBuilder {
    sequence: Sequence,
}

impl DomainBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sequence(sequence: Sequence) -> Self {
        Self { sequence }
    }

    pub fn sequence(&mut self) -> &mut Sequence {
        &mut self.sequence
    }

    /// Builder whose sequence starts past every id and timestamp already in
    /// `store`, so generated rows never collide with existing ones.
    pub fn continuing(store: &SqliteStore) -> Result<Self> {
        let (max_num, max_timestamp) = high_water_marks(store)?;
        let id = max_num.map_or(FIRST_ID, |num| (num + 1).max(FIRST_ID));
        let timestamp = max_timestamp.map_or(FIRST_TIMESTAMP, |ts| {
            (ts + 2 * TIMESTAMP_STEP).max(FIRST_TIMESTAMP)
        });
        Ok(Self::with_sequence(Sequence::starting_at(id, timestamp)))
    }

    /// Current allowance with a fresh identity and an open range
    pub fn token_allowance(&mut self) -> AllowanceDraft {
        AllowanceDraft {
            table: AllowanceTable::Current,
            allowance: self.allowance(),
        }
    }

    /// History allowance with a fresh identity and a one-nanosecond range
    pub fn token_allowance_history(&mut self) -> AllowanceDraft {
        let mut allowance = self.allowance();
        let lower = allowance.timestamp_range.lower;
        allowance.timestamp_range = TimestampRange::closed_open(lower, lower + 1);
        AllowanceDraft {
            table: AllowanceTable::History,
            allowance,
        }
    }

    fn allowance(&mut self) -> TokenAllowance {
        let owner = self.sequence.next_entity();
        TokenAllowance {
            amount: self.sequence.next_id(),
            owner: Some(owner),
            payer_account_id: Some(owner),
            spender: self.sequence.next_entity(),
            token_id: self.sequence.next_entity(),
            timestamp_range: TimestampRange::at_least(self.sequence.next_timestamp()),
        }
    }

    /// Contract result with a fresh payer, sender and timestamp
    pub fn contract_result(&mut self) -> ContractResultDraft {
        ContractResultDraft {
            result: ContractResult {
                consensus_timestamp: self.sequence.next_timestamp(),
                contract_id: self.sequence.next_entity(),
                payer_account_id: Some(self.sequence.next_entity()),
                sender_id: Some(self.sequence.next_entity()),
                gas_used: 21_000,
            },
        }
    }

    /// A current allowance plus `history_depth` earlier versions at
    /// `lower - depth .. lower - 1`, each with its own contract result and
    /// sender when the kind is correlated.
    pub fn allowance_family(&mut self, kind: FamilyKind, history_depth: usize) -> AllowanceFamily {
        let stale_owner = self.sequence.next_entity();
        let mut current = self.token_allowance().build();
        current.owner = match kind {
            FamilyKind::Uncorrelated => None,
            FamilyKind::Incorrect | FamilyKind::AlreadyCorrect => Some(stale_owner),
        };

        let lower = current.timestamp_range.lower;
        let depth = i64::try_from(history_depth).unwrap_or(i64::MAX);
        let history: Vec<TokenAllowance> = (1..=depth)
            .rev()
            .map(|offset| TokenAllowance {
                amount: current.amount + offset,
                timestamp_range: TimestampRange::closed_open(lower - offset, lower - offset + 1),
                ..current.clone()
            })
            .collect();

        let mut family = AllowanceFamily {
            kind,
            current,
            history,
            contract_results: Vec::new(),
        };
        if kind == FamilyKind::Uncorrelated {
            return family;
        }

        let payer = family.current.payer_account_id;
        let versions = family
            .history
            .iter_mut()
            .chain(std::iter::once(&mut family.current));
        for version in versions {
            let sender = self.sequence.next_entity();
            if kind == FamilyKind::AlreadyCorrect {
                version.owner = Some(sender);
            }
            family.contract_results.push(
                self.contract_result()
                    .customize(|r| {
                        r.consensus_timestamp = version.timestamp_range.lower;
                        r.payer_account_id = payer;
                        r.sender_id = Some(sender);
                    })
                    .build(),
            );
        }
        family
    }
}

const ENTITY_COLUMNS: [(&str, &str); 11] = [
    ("token_allowance", "owner"),
    ("token_allowance", "payer_account_id"),
    ("token_allowance", "spender"),
    ("token_allowance", "token_id"),
    ("token_allowance_history", "owner"),
    ("token_allowance_history", "payer_account_id"),
    ("token_allowance_history", "spender"),
    ("token_allowance_history", "token_id"),
    ("contract_result", "contract_id"),
    ("contract_result", "payer_account_id"),
    ("contract_result", "sender_id"),
];

/// Largest entity num and largest timestamp present in `store`
fn high_water_marks(store: &SqliteStore) -> Result<(Option<i64>, Option<i64>)> {
    let nums = ENTITY_COLUMNS
        .iter()
        .map(|(table, column)| format!("SELECT MAX({column} & {NUM_MASK}) AS v FROM {table}"))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    let conn = store.connection();
    let max_num: Option<i64> =
        conn.query_row(&format!("SELECT MAX(v) FROM ({nums})"), [], |row| row.get(0))?;
    let max_timestamp: Option<i64> = conn.query_row(
        "SELECT MAX(v) FROM (
             SELECT MAX(timestamp_lower) AS v FROM token_allowance
             UNION ALL SELECT MAX(timestamp_upper) FROM token_allowance_history
             UNION ALL SELECT MAX(consensus_timestamp) FROM contract_result
         )",
        [],
        |row| row.get(0),
    )?;
    Ok((max_num, max_timestamp))
}

/// Weighted bulk generator of allowance families.
///
/// Kinds are assigned round-robin over the mix expanded by weight, so the
/// output is fully determined by the settings.
#[derive(Debug, Clone)]
pub struct BulkBuilder {
    count: usize,
    history_depth: usize,
    mix: Vec<(FamilyKind, u32)>,
}

impl Default for BulkBuilder {
    fn default() -> Self {
        Self {
            count: 100,
            history_depth: 2,
            mix: FamilyKind::ALL.iter().map(|kind| (*kind, 1)).collect(),
        }
    }
}

/// Per-kind totals of a bulk seed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSummary {
    pub families: u64,
    pub incorrect: u64,
    pub uncorrelated: u64,
    pub already_correct: u64,
    pub current_rows: u64,
    pub history_rows: u64,
    pub contract_results: u64,
}

impl BulkBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    #[must_use]
    pub fn history_depth(mut self, history_depth: usize) -> Self {
        self.history_depth = history_depth;
        self
    }

    /// Replace the mix. Kinds with weight 0 are never generated.
    #[must_use]
    pub fn mix(mut self, mix: impl IntoIterator<Item = (FamilyKind, u32)>) -> Self {
        self.mix = mix.into_iter().collect();
        self
    }

    fn validate(&self) -> Result<Vec<FamilyKind>> {
        if self.count == 0 {
            return Err(ConfigError::Invalid("family count must be positive".to_string()).into());
        }
        if i64::try_from(self.history_depth).is_ok_and(|depth| depth >= TIMESTAMP_STEP) {
            return Err(ConfigError::Invalid(format!(
                "history depth must be below {TIMESTAMP_STEP}"
            ))
            .into());
        }
        let cycle: Vec<FamilyKind> = self
            .mix
            .iter()
            .flat_map(|(kind, weight)| std::iter::repeat_n(*kind, *weight as usize))
            .collect();
        if cycle.is_empty() {
            return Err(
                ConfigError::Invalid("family mix must contain a positive weight".to_string())
                    .into(),
            );
        }
        Ok(cycle)
    }

    /// Generate the families without touching storage
    pub fn build(&self, builder: &mut DomainBuilder) -> Result<Vec<AllowanceFamily>> {
        let cycle = self.validate()?;
        Ok((0..self.count)
            .map(|i| builder.allowance_family(cycle[i % cycle.len()], self.history_depth))
            .collect())
    }

    /// Generate and insert every family in one transaction
    pub fn persist(
        &self,
        builder: &mut DomainBuilder,
        store: &mut SqliteStore,
    ) -> Result<SeedSummary> {
        let families = self.build(builder)?;
        store.in_transaction(|store| {
            let mut summary = SeedSummary::default();
            for family in &families {
                family.persist(store)?;
                summary.families += 1;
                match family.kind {
                    FamilyKind::Incorrect => summary.incorrect += 1,
                    FamilyKind::Uncorrelated => summary.uncorrelated += 1,
                    FamilyKind::AlreadyCorrect => summary.already_correct += 1,
                }
                summary.current_rows += 1;
                summary.history_rows += family.history.len() as u64;
                summary.contract_results += family.contract_results.len() as u64;
            }
            Ok(summary)
        })
    }
}
