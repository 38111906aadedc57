//! ChipLedger Core
//!
//! Concurrency-safe credit ledger for a family chip economy: children earn
//! chips for completing tasks, spend them on rewards, and parents can
//! manually adjust balances.
//!
//! # Architecture
//!
//! - **Versioned balance cells**: one `{balance, version}` cell per account,
//!   written only through a compare-and-swap commit
//! - **Append-only log**: every balance change leaves an immutable,
//!   per-account ordered entry
//! - **Idempotency guard**: retried requests replay their original outcome
//!   instead of re-applying
//! - **Bounded retries**: version conflicts reload and retry with jittered
//!   backoff; contention is per account only
//!
//! # Invariants
//!
//! - Balance reconstruction: balance == Σ(entry.delta) for all time
//! - No double-spend: a balance never goes below zero through spends
//! - Append-only: entries never modified or deleted
//! - Linearizable per account: the CAS commit is the sole serialization point

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications, clippy::all)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use catalog::Catalog;
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use storage::Storage;
pub use types::{
    Account, AccountId, CachedOutcome, CauseRef, EntryType, IdempotencyRecord, LedgerEntry,
    Reward, Task,
};
