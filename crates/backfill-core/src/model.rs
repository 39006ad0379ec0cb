//! Domain types: entity ids, validity ranges, token allowances and the
//! contract results they are correlated against.
//!
//! A [`TokenAllowance`] is a versioned record. Its identity is
//! `(payer_account_id, spender, token_id)`; each version is valid over a
//! half-open [`TimestampRange`]. The current version lives in
//! `token_allowance`, superseded versions in `token_allowance_history`.
//!
//! A [`ContractResult`] records which contract sent the transaction that
//! created an allowance version. Its `sender_id` is the authoritative owner
//! of any allowance version created by the same payer at the same consensus
//! timestamp.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const SHARD_BITS: u32 = 15;
const REALM_BITS: u32 = 16;
const NUM_BITS: u32 = 32;
const SHARD_MASK: i64 = (1 << SHARD_BITS) - 1;
const REALM_MASK: i64 = (1 << REALM_BITS) - 1;
const NUM_MASK: i64 = (1 << NUM_BITS) - 1;

/// A `shard.realm.num` entity, persisted as a single encoded `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    pub shard: i64,
    pub realm: i64,
    pub num: i64,
}

/// Error parsing or decoding an [`EntityId`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityIdError {
    #[error("invalid entity id {0:?}: expected shard.realm.num")]
    Format(String),

    #[error("entity id component out of range: {0}")]
    OutOfRange(String),
}

impl EntityId {
    /// Build an id, rejecting components that do not fit the encoding
    pub fn new(shard: i64, realm: i64, num: i64) -> Result<Self, EntityIdError> {
        if !(0..=SHARD_MASK).contains(&shard)
            || !(0..=REALM_MASK).contains(&realm)
            || !(0..=NUM_MASK).contains(&num)
        {
            return Err(EntityIdError::OutOfRange(format!("{shard}.{realm}.{num}")));
        }
        Ok(Self { shard, realm, num })
    }

    /// Shorthand for `0.0.num`
    ///
    /// Only the low 32 bits of `num` are kept, so anything above
    /// `u32::MAX` wraps to a different entity. Use [`EntityId::new`] for
    /// checked construction.
    #[must_use]
    pub fn of_num(num: i64) -> Self {
        Self {
            shard: 0,
            realm: 0,
            num: num & NUM_MASK,
        }
    }

    /// Encoded form stored in the database
    #[must_use]
    pub fn id(&self) -> i64 {
        (self.shard << (REALM_BITS + NUM_BITS)) | (self.realm << NUM_BITS) | self.num
    }

    /// Decode a stored id
    pub fn decode(encoded: i64) -> Result<Self, EntityIdError> {
        if encoded < 0 {
            return Err(EntityIdError::OutOfRange(encoded.to_string()));
        }
        Ok(Self {
            shard: (encoded >> (REALM_BITS + NUM_BITS)) & SHARD_MASK,
            realm: (encoded >> NUM_BITS) & REALM_MASK,
            num: encoded & NUM_MASK,
        })
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let [shard, realm, num] = parts.as_slice() else {
            return Err(EntityIdError::Format(s.to_string()));
        };
        let parse = |part: &str| {
            part.parse::<i64>()
                .map_err(|_| EntityIdError::Format(s.to_string()))
        };
        Self::new(parse(*shard)?, parse(*realm)?, parse(*num)?)
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.to_string()
    }
}

/// Half-open validity interval `[lower, upper)` in consensus nanoseconds.
/// `upper == None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampRange {
    pub lower: i64,
    pub upper: Option<i64>,
}

impl TimestampRange {
    /// `[lower, ∞)`
    #[must_use]
    pub fn at_least(lower: i64) -> Self {
        Self { lower, upper: None }
    }

    /// `[lower, upper)`
    #[must_use]
    pub fn closed_open(lower: i64, upper: i64) -> Self {
        Self {
            lower,
            upper: Some(upper),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.upper.is_none()
    }

    #[must_use]
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.lower && self.upper.is_none_or(|upper| timestamp < upper)
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let self_before_other = self.upper.is_some_and(|upper| upper <= other.lower);
        let other_before_self = other.upper.is_some_and(|upper| upper <= self.lower);
        !self_before_other && !other_before_self
    }
}

/// One version of a token allowance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenAllowance {
    pub amount: i64,
    /// Derived field repaired by the backfill
    pub owner: Option<EntityId>,
    /// Missing on rows written before the payer was recorded
    pub payer_account_id: Option<EntityId>,
    pub spender: EntityId,
    pub token_id: EntityId,
    pub timestamp_range: TimestampRange,
}

impl TokenAllowance {
    /// The instant this version was created
    #[must_use]
    pub fn timestamp_lower(&self) -> i64 {
        self.timestamp_range.lower
    }

    /// Correlation key, if the row carries the fields it needs
    #[must_use]
    pub fn join_key(&self) -> Option<JoinKey> {
        self.payer_account_id.map(|payer| JoinKey {
            payer,
            timestamp: self.timestamp_range.lower,
        })
    }
}

/// Result of a contract call; `sender_id` is the contract that acted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractResult {
    pub consensus_timestamp: i64,
    pub contract_id: EntityId,
    pub payer_account_id: Option<EntityId>,
    pub sender_id: Option<EntityId>,
    pub gas_used: i64,
}

impl ContractResult {
    #[must_use]
    pub fn join_key(&self) -> Option<JoinKey> {
        self.payer_account_id.map(|payer| JoinKey {
            payer,
            timestamp: self.consensus_timestamp,
        })
    }
}

/// `(payer, creation instant)`, the 1:1 join between an allowance version
/// and the contract result that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JoinKey {
    pub payer: EntityId,
    pub timestamp: i64,
}

/// Which allowance table a row lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceTable {
    Current,
    History,
}

impl AllowanceTable {
    pub const ALL: [Self; 2] = [Self::Current, Self::History];

    #[must_use]
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Current => "token_allowance",
            Self::History => "token_allowance_history",
        }
    }
}

impl fmt::Display for AllowanceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Storage identity of one allowance row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowRef {
    pub table: AllowanceTable,
    pub rowid: i64,
}

/// An allowance row as read back from storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAllowance {
    pub row: RowRef,
    pub allowance: TokenAllowance,
}

/// An owner overwrite for one row, guarded by the value it was decided against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub row: RowRef,
    /// Encoded owner as read; it need not decode to an [`EntityId`]
    pub expected_owner: Option<i64>,
    pub owner: EntityId,
}
