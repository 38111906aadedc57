//! Main ledger orchestration layer
//!
//! This module ties together the versioned account store, the entry log, and
//! the idempotency guard into a high-level API for the chip economy.
//!
//! Every mutating operation follows the same shape: consult the idempotency
//! guard, read the current balance cell, compute the candidate balance, and
//! attempt a conditional commit. A version conflict means another writer won
//! the race; the operation reloads and retries against the new baseline, up
//! to a bound, with jittered backoff. Last committed wins; no update is
//! silently lost.
//!
//! # Example
//!
//! ```no_run
//! use chip_ledger::types::AccountId;
//! use chip_ledger::{Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> chip_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!     let child = AccountId::new("child-emma");
//!
//!     let balance = ledger
//!         .award(&child, 10, None, "earn-cleanroom-2026-08-23", "parent-1")
//!         .await?;
//!     assert_eq!(balance, 10);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    catalog::Catalog,
    error::{Error, Result},
    metrics::Metrics,
    storage::{CasOutcome, Storage},
    types::{
        Account, AccountId, CachedOutcome, CauseRef, EntryType, IdempotencyRecord, LedgerEntry,
    },
    Config,
};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

/// Main ledger interface.
///
/// The only component allowed to write balances; callers issue operations and
/// render `balance`/`history` results, never touching the cells directly.
pub struct Ledger {
    /// Durable store (balance cells, entry log, idempotency table, catalog)
    storage: Arc<Storage>,

    /// Task/reward catalog sharing the same store
    catalog: Catalog,

    /// Prometheus metrics
    metrics: Metrics,

    /// Configuration
    config: Config,

    /// In-process gate serializing requests that share an idempotency key
    in_flight: DashMap<(AccountId, String), Arc<Mutex<()>>>,
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let catalog = Catalog::new(storage.clone());
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        Ok(Self {
            storage,
            catalog,
            metrics,
            config,
            in_flight: DashMap::new(),
        })
    }

    /// Explicitly create an account with a zero balance.
    ///
    /// Accounts are also created implicitly by the first award or adjustment.
    pub fn create_account(&self, account_id: &AccountId) -> Result<Account> {
        let account = Account {
            account_id: account_id.clone(),
            balance: 0,
            version: 0,
            updated_at: Utc::now(),
        };

        if self.storage.insert_account(&account)? {
            Ok(account)
        } else {
            Err(Error::AccountExists(account_id.to_string()))
        }
    }

    /// Award chips for a completed task. Returns the new balance.
    pub async fn award(
        &self,
        account_id: &AccountId,
        amount: u32,
        cause: Option<CauseRef>,
        idempotency_key: &str,
        actor_id: &str,
    ) -> Result<i64> {
        if amount == 0 {
            return Err(Error::InvalidAmount(
                "award amount must be positive".to_string(),
            ));
        }

        self.apply(
            account_id,
            amount as i64,
            EntryType::Earn,
            cause,
            None,
            idempotency_key,
            actor_id,
        )
        .await
    }

    /// Spend chips on a reward. Returns the new balance, or
    /// [`Error::InsufficientBalance`] if the account cannot cover it.
    pub async fn spend(
        &self,
        account_id: &AccountId,
        amount: u32,
        cause: Option<CauseRef>,
        idempotency_key: &str,
        actor_id: &str,
    ) -> Result<i64> {
        if amount == 0 {
            return Err(Error::InvalidAmount(
                "spend amount must be positive".to_string(),
            ));
        }

        self.apply(
            account_id,
            -(amount as i64),
            EntryType::Spend,
            cause,
            None,
            idempotency_key,
            actor_id,
        )
        .await
    }

    /// Manually adjust a balance by a signed delta.
    ///
    /// Whether the result may go below zero is governed by
    /// `policy.allow_negative_adjust`.
    pub async fn adjust(
        &self,
        account_id: &AccountId,
        delta: i64,
        reason: &str,
        idempotency_key: &str,
        actor_id: &str,
    ) -> Result<i64> {
        if delta == 0 {
            return Err(Error::InvalidAmount(
                "adjustment delta must be nonzero".to_string(),
            ));
        }

        self.apply(
            account_id,
            delta,
            EntryType::Adjust,
            None,
            Some(reason.to_string()),
            idempotency_key,
            actor_id,
        )
        .await
    }

    /// Get current balance
    pub fn balance(&self, account_id: &AccountId) -> Result<i64> {
        self.storage
            .get_account(account_id)?
            .map(|account| account.balance)
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))
    }

    /// Get up to `limit` ledger entries in ascending sequence order
    pub fn history(&self, account_id: &AccountId, limit: usize) -> Result<Vec<LedgerEntry>> {
        if self.storage.get_account(account_id)?.is_none() {
            return Err(Error::AccountNotFound(account_id.to_string()));
        }
        self.storage.get_entries(account_id, limit)
    }

    /// Check the balance reconstruction invariant.
    ///
    /// Folds the full entry log and compares against the stored balance; a
    /// mismatch indicates storage corruption.
    pub fn verify_balance(&self, account_id: &AccountId) -> Result<bool> {
        let account = self
            .storage
            .get_account(account_id)?
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;

        let entries = self.storage.get_entries(account_id, usize::MAX)?;
        let folded: i64 = entries.iter().map(|entry| entry.delta).sum();

        Ok(folded == account.balance)
    }

    /// Task/reward catalog
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run one operation through the idempotency gate.
    ///
    /// Requests racing on the same `(account, key)` serialize here; a loser
    /// finds the winner's record and returns the cached outcome instead of
    /// re-running against the store. The gate is an in-process fast path
    /// only: exactly-once is guaranteed by the durable key check inside
    /// [`Storage::commit_entry`], so a request slipping past the gate (for
    /// example after a predecessor's entry was dropped) still cannot commit
    /// a second entry.
    async fn apply(
        &self,
        account_id: &AccountId,
        delta: i64,
        entry_type: EntryType,
        cause: Option<CauseRef>,
        reason: Option<String>,
        idempotency_key: &str,
        actor_id: &str,
    ) -> Result<i64> {
        let gate_key = (account_id.clone(), idempotency_key.to_string());
        let gate = self
            .in_flight
            .entry(gate_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = gate.lock().await;
            self.apply_serialized(
                account_id,
                delta,
                entry_type,
                cause,
                reason,
                idempotency_key,
                actor_id,
            )
            .await
        };

        // Late arrivals for this key read the durable record instead
        self.in_flight.remove(&gate_key);

        result
    }

    async fn apply_serialized(
        &self,
        account_id: &AccountId,
        delta: i64,
        entry_type: EntryType,
        cause: Option<CauseRef>,
        reason: Option<String>,
        idempotency_key: &str,
        actor_id: &str,
    ) -> Result<i64> {
        if let Some(record) = self.storage.get_idempotency(account_id, idempotency_key)? {
            if !record.is_expired(Utc::now()) {
                self.metrics.record_replay();
                tracing::debug!(
                    account_id = %account_id,
                    idempotency_key,
                    "Replay served from idempotency cache"
                );
                return self.cached_result(account_id, delta, &record);
            }
        }

        let ttl = ChronoDuration::seconds(self.config.idempotency.ttl_secs as i64);
        let mut snapshot = self.storage.get_account(account_id)?;

        for attempt in 1..=self.config.retry.max_attempts {
            let (balance, expected_version) = match &snapshot {
                Some(account) => (account.balance, Some(account.version)),
                None => {
                    if entry_type == EntryType::Spend {
                        return Err(Error::AccountNotFound(account_id.to_string()));
                    }
                    // First award/adjust creates the account implicitly
                    (0, None)
                }
            };

            let new_balance = balance.checked_add(delta).ok_or_else(|| {
                Error::InvalidAmount(format!(
                    "delta {} would overflow balance {}",
                    delta, balance
                ))
            })?;
            let forbids_negative = match entry_type {
                EntryType::Earn => false,
                EntryType::Spend => true,
                EntryType::Adjust => !self.config.policy.allow_negative_adjust,
            };

            if new_balance < 0 && forbids_negative {
                // Cache the rejection so a retried request returns the same
                // outcome instead of re-validating against fresher state
                let record = IdempotencyRecord {
                    account_id: account_id.clone(),
                    idempotency_key: idempotency_key.to_string(),
                    outcome: CachedOutcome::InsufficientBalance { balance },
                    expires_at: Utc::now() + ttl,
                };
                if !self.storage.put_idempotency_if_absent(&record)? {
                    if let Some(existing) =
                        self.storage.get_idempotency(account_id, idempotency_key)?
                    {
                        return self.cached_result(account_id, delta, &existing);
                    }
                }

                self.metrics.record_rejection();
                return Err(Error::InsufficientBalance {
                    account_id: account_id.to_string(),
                    balance,
                    requested: delta.saturating_abs(),
                });
            }

            let next_version = expected_version.map_or(1, |v| v + 1);
            let committed_at = Utc::now();
            let entry = LedgerEntry {
                entry_id: Uuid::now_v7(),
                account_id: account_id.clone(),
                sequence: next_version,
                delta,
                entry_type,
                cause: cause.clone(),
                reason: reason.clone(),
                resulting_balance: new_balance,
                idempotency_key: idempotency_key.to_string(),
                actor_id: actor_id.to_string(),
                created_at: committed_at,
            };
            let account = Account {
                account_id: account_id.clone(),
                balance: new_balance,
                version: next_version,
                updated_at: committed_at,
            };
            let record = IdempotencyRecord {
                account_id: account_id.clone(),
                idempotency_key: idempotency_key.to_string(),
                outcome: CachedOutcome::Committed {
                    entry_id: entry.entry_id,
                    resulting_balance: new_balance,
                },
                expires_at: committed_at + ttl,
            };

            match self
                .storage
                .commit_entry(expected_version, &account, &entry, &record)?
            {
                CasOutcome::Committed => {
                    self.metrics.record_commit(entry_type.as_str(), attempt);
                    tracing::debug!(
                        account_id = %account_id,
                        sequence = next_version,
                        delta,
                        balance = new_balance,
                        attempt,
                        "Operation committed"
                    );
                    return Ok(new_balance);
                }
                CasOutcome::Replayed(existing) => {
                    // A duplicate of this request won between our guard check
                    // and the commit; its recorded outcome stands
                    self.metrics.record_replay();
                    tracing::debug!(
                        account_id = %account_id,
                        idempotency_key,
                        "Duplicate commit refused, replaying recorded outcome"
                    );
                    return self.cached_result(account_id, delta, &existing);
                }
                CasOutcome::Conflict(current) => {
                    self.metrics.record_conflict();

                    // The winner may have carried this very key; check before
                    // burning another attempt
                    if let Some(existing) =
                        self.storage.get_idempotency(account_id, idempotency_key)?
                    {
                        if !existing.is_expired(Utc::now()) {
                            self.metrics.record_replay();
                            return self.cached_result(account_id, delta, &existing);
                        }
                    }

                    tracing::debug!(
                        account_id = %account_id,
                        attempt,
                        "Version conflict, retrying against new baseline"
                    );
                    snapshot = current;

                    let cap = (self.config.retry.backoff_base_ms * attempt as u64)
                        .min(self.config.retry.backoff_cap_ms)
                        .max(1);
                    let jitter = rand::thread_rng().gen_range(0..=cap);
                    sleep(Duration::from_millis(jitter)).await;
                }
            }
        }

        tracing::warn!(
            account_id = %account_id,
            attempts = self.config.retry.max_attempts,
            "Giving up after repeated version conflicts"
        );
        Err(Error::ConflictExceededRetries {
            account_id: account_id.to_string(),
            attempts: self.config.retry.max_attempts,
        })
    }

    /// Turn a cached outcome back into the result the original attempt saw
    fn cached_result(
        &self,
        account_id: &AccountId,
        delta: i64,
        record: &IdempotencyRecord,
    ) -> Result<i64> {
        match &record.outcome {
            CachedOutcome::Committed {
                resulting_balance, ..
            } => Ok(*resulting_balance),
            CachedOutcome::InsufficientBalance { balance } => Err(Error::InsufficientBalance {
                account_id: account_id.to_string(),
                balance: *balance,
                requested: delta.saturating_abs(),
            }),
        }
    }
}
