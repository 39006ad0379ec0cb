//! Correlation index: `(payer, consensus timestamp) -> sender`.
//!
//! Built from a full pass over the contract result table at the start of
//! every run and never persisted. Contract results without a payer or without
//! a sender carry no ownership signal and are skipped.
//!
//! Upstream guarantees at most one contract result per `(payer, timestamp)`.
//! If that is ever violated the index does not fail: the last row seen (the
//! highest rowid) wins and the override is counted in [`IndexStats`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{ContractResult, EntityId, JoinKey};
use crate::store::CorrelationSource;

/// Counters gathered while building the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Contract results read
    pub scanned: u64,
    /// Distinct join keys indexed
    pub indexed: u64,
    /// Rows skipped for a missing payer
    pub missing_payer: u64,
    /// Rows skipped for a missing sender
    pub missing_sender: u64,
    /// Keys seen more than once; the later row replaced the earlier one
    pub duplicates: u64,
}

/// Ground-truth owner lookup
#[derive(Debug, Clone, Default)]
pub struct CorrelationIndex {
    owners: HashMap<JoinKey, EntityId>,
    stats: IndexStats,
}

impl CorrelationIndex {
    /// Build the index from every row `source` yields.
    pub fn build<S: CorrelationSource + ?Sized>(source: &S) -> Result<Self> {
        let mut index = Self::default();
        source.for_each_contract_result(&mut |result| index.insert(&result))?;

        if index.stats.duplicates > 0 {
            warn!(
                duplicates = index.stats.duplicates,
                "Multiple contract results share a payer and timestamp; keeping the last one seen"
            );
        }
        debug!(
            scanned = index.stats.scanned,
            indexed = index.stats.indexed,
            missing_payer = index.stats.missing_payer,
            missing_sender = index.stats.missing_sender,
            "Built correlation index"
        );
        Ok(index)
    }

    /// Build from an in-memory sequence, in order
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a ContractResult>,
    {
        let mut index = Self::default();
        for result in results {
            index.insert(result);
        }
        index
    }

    fn insert(&mut self, result: &ContractResult) {
        self.stats.scanned += 1;

        let Some(key) = result.join_key() else {
            self.stats.missing_payer += 1;
            return;
        };
        let Some(sender) = result.sender_id else {
            self.stats.missing_sender += 1;
            return;
        };

        match self.owners.entry(key) {
            Entry::Occupied(mut slot) => {
                self.stats.duplicates += 1;
                debug!(
                    payer = %key.payer,
                    timestamp = key.timestamp,
                    replaced = %slot.get(),
                    sender = %sender,
                    "Duplicate correlation key"
                );
                slot.insert(sender);
            }
            Entry::Vacant(slot) => {
                self.stats.indexed += 1;
                slot.insert(sender);
            }
        }
    }

    /// Authoritative owner for `key`, if any contract result created it
    #[must_use]
    pub fn lookup(&self, key: &JoinKey) -> Option<EntityId> {
        self.owners.get(key).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn result(payer: Option<i64>, sender: Option<i64>, timestamp: i64) -> ContractResult {
        ContractResult {
            consensus_timestamp: timestamp,
            contract_id: EntityId::of_num(900),
            payer_account_id: payer.map(EntityId::of_num),
            sender_id: sender.map(EntityId::of_num),
            gas_used: 21_000,
        }
    }

    fn key(payer: i64, timestamp: i64) -> JoinKey {
        JoinKey {
            payer: EntityId::of_num(payer),
            timestamp,
        }
    }

    #[test]
    fn lookup_requires_payer_and_timestamp_match() {
        let index = CorrelationIndex::from_results(&[result(Some(1), Some(2001), 100)]);
        assert_eq!(index.lookup(&key(1, 100)), Some(EntityId::of_num(2001)));
        assert_eq!(index.lookup(&key(1, 101)), None);
        assert_eq!(index.lookup(&key(2, 100)), None);
    }

    #[test]
    fn rows_without_payer_or_sender_are_skipped() {
        let index = CorrelationIndex::from_results(&[
            result(None, Some(2001), 100),
            result(Some(1), None, 100),
        ]);
        assert!(index.is_empty());
        let stats = index.stats();
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.missing_payer, 1);
        assert_eq!(stats.missing_sender, 1);
    }

    #[test]
    fn duplicate_keys_keep_last_seen() {
        let index = CorrelationIndex::from_results(&[
            result(Some(1), Some(2001), 100),
            result(Some(1), Some(3001), 100),
        ]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(&key(1, 100)), Some(EntityId::of_num(3001)));
        assert_eq!(index.stats().duplicates, 1);
        assert_eq!(index.stats().indexed, 1);
    }

    #[test]
    fn build_from_store_uses_insertion_order_for_ties() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_contract_result(&result(Some(7), Some(2001), 55))
            .unwrap();
        store
            .insert_contract_result(&result(Some(7), Some(4001), 55))
            .unwrap();
        store
            .insert_contract_result(&result(Some(8), Some(5001), 56))
            .unwrap();

        let index = CorrelationIndex::build(&store).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup(&key(7, 55)), Some(EntityId::of_num(4001)));
        assert_eq!(index.lookup(&key(8, 56)), Some(EntityId::of_num(5001)));
        assert_eq!(index.stats().duplicates, 1);
    }

    #[test]
    fn empty_source_builds_empty_index() {
        let store = SqliteStore::open_in_memory().unwrap();
        let index = CorrelationIndex::build(&store).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.stats(), IndexStats::default());
    }
}
