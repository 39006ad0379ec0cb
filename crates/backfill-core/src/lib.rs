//! backfill-core: Owner backfill for synthetic token allowances
//!
//! Repairs the `owner` of token allowances created by contract calls, in both
//! the current table and its history shadow, using the sender recorded in the
//! matching contract result as the source of truth.
//!
//! # Architecture
//!
//! ```text
//! contract_result ──► CorrelationIndex ─────────────┐
//!                                                   ▼
//! token_allowance ─┐                         CorrectionApplier ──► owner updates
//!                  ├─► DefectScanner ─► Chunk ──────┘
//! token_allowance_history ─┘
//! ```
//!
//! # Modules
//!
//! - `model`: Entity ids, timestamp ranges, allowances and contract results
//! - `store`: Storage traits and the SQLite implementation
//! - `correlation`: `(payer, timestamp) -> sender` index
//! - `scanner`: Chunked candidate enumeration over both tables
//! - `applier`: Per-row decisions and guarded owner updates
//! - `migration`: The backfill as a checksummed migration
//! - `runner`: Run-once ledger and async entry point
//! - `snapshot`: Full-state capture and SHA-256 fingerprint
//! - `fixtures`: Deterministic test-data builders
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod applier;
pub mod config;
pub mod correlation;
pub mod error;
pub mod fixtures;
pub mod logging;
pub mod migration;
pub mod model;
pub mod runner;
pub mod scanner;
pub mod snapshot;
pub mod store;

pub use error::{ConfigError, Error, Result, StorageError};
pub use migration::{Migration, MigrationReport, SyntheticTokenAllowanceOwnerMigration};
pub use runner::{MigrationLedger, MigrationRunner, RunOutcome};
pub use store::{AllowanceStore, CorrelationSource, SqliteStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
