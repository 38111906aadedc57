//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Versioned balance cells (key: account_id)
//! - `entries` - Append-only entry log (key: account_id ++ sequence)
//! - `idempotency` - Deduplication records (key: account_id ++ idempotency_key)
//! - `tasks` - Task catalog (key: task_id)
//! - `rewards` - Reward catalog (key: reward_id)
//!
//! Composite keys length-prefix the account id, so ids may contain any bytes
//! without one account's key range overlapping another's.
//!
//! # Conditional commit
//!
//! The load-bearing contract is [`Storage::commit_entry`]: the balance cell is
//! updated only if it still holds the version the caller observed, and the
//! cell, the log entry, and the idempotency record land in one atomic
//! `WriteBatch`. An unexpired record for the same idempotency key
//! short-circuits the commit and hands the recorded outcome back instead of
//! writing a duplicate. The compare steps run under a per-account stripe lock
//! so the read-compare-write is indivisible; no lock is held across anything
//! slower than a single RocksDB write.

use crate::{
    error::{Error, Result},
    types::{Account, AccountId, IdempotencyRecord, LedgerEntry, Reward, Task},
    Config,
};
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_ENTRIES: &str = "entries";
const CF_IDEMPOTENCY: &str = "idempotency";
const CF_TASKS: &str = "tasks";
const CF_REWARDS: &str = "rewards";

/// Number of per-account lock stripes
const LOCK_STRIPES: usize = 64;

/// Outcome of a conditional commit
#[derive(Debug)]
pub enum CasOutcome {
    /// The version matched; the batch was written
    Committed,
    /// Another writer won the race; holds the cell as it is now
    Conflict(Option<Account>),
    /// An unexpired record already exists for this idempotency key; nothing
    /// was written and the caller must surface the recorded outcome
    Replayed(IdempotencyRecord),
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,

    /// Stripe locks making the compare step of a commit indivisible
    stripes: Vec<Mutex<()>>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TASKS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_REWARDS, Self::cf_options_hot()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();

        Ok(Self {
            db: Arc::new(db),
            stripes,
        })
    }

    // Column family options

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        // Entries are written once and scanned in order
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Frequently read point lookups, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::StoreUnavailable(format!("Column family {} not found", name)))
    }

    fn stripe(&self, account_id: &AccountId) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        account_id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % LOCK_STRIPES]
    }

    // Key helpers
    //
    // Composite keys carry a big-endian length prefix on the account id, so
    // an id like "a" never shares a key range with "a|b" or "ab".

    fn composite_key(account_id: &AccountId, suffix: &[u8]) -> Vec<u8> {
        let id = account_id.as_str().as_bytes();
        let mut key = Vec::with_capacity(4 + id.len() + suffix.len());
        key.extend_from_slice(&(id.len() as u32).to_be_bytes());
        key.extend_from_slice(id);
        key.extend_from_slice(suffix);
        key
    }

    fn entry_key(account_id: &AccountId, sequence: u64) -> Vec<u8> {
        Self::composite_key(account_id, &sequence.to_be_bytes())
    }

    fn entry_prefix(account_id: &AccountId) -> Vec<u8> {
        Self::composite_key(account_id, &[])
    }

    fn idempotency_key(account_id: &AccountId, idempotency_key: &str) -> Vec<u8> {
        Self::composite_key(account_id, idempotency_key.as_bytes())
    }

    // Account operations

    /// Get account by ID
    pub fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        match self.db.get_cf(cf, account_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Insert account if absent; returns false if one already exists
    pub fn insert_account(&self, account: &Account) -> Result<bool> {
        let _guard = self.stripe(&account.account_id).lock();

        if self.get_account(&account.account_id)?.is_some() {
            return Ok(false);
        }

        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let value = bincode::serialize(account)?;
        self.db
            .put_cf(cf, account.account_id.as_str().as_bytes(), &value)?;

        tracing::debug!(account_id = %account.account_id, "Account created");

        Ok(true)
    }

    /// Conditionally commit one operation.
    ///
    /// Writes the new balance cell, the log entry, and the idempotency record
    /// in one atomic batch, but only if the cell still holds
    /// `expected_version` (`None` = the cell must not exist yet). On a
    /// mismatch nothing is written and the current cell is returned.
    ///
    /// The idempotency key is re-checked under the same stripe lock: if an
    /// unexpired record already exists (a duplicate of this request committed
    /// or was rejected after the caller's last check), the commit is refused
    /// and the record returned, so one key can never produce two entries.
    pub fn commit_entry(
        &self,
        expected_version: Option<u64>,
        account: &Account,
        entry: &LedgerEntry,
        record: &IdempotencyRecord,
    ) -> Result<CasOutcome> {
        let _guard = self.stripe(&account.account_id).lock();

        if let Some(existing) =
            self.get_idempotency(&record.account_id, &record.idempotency_key)?
        {
            if !existing.is_expired(Utc::now()) {
                return Ok(CasOutcome::Replayed(existing));
            }
        }

        let current = self.get_account(&account.account_id)?;
        let version_matches = match (&expected_version, &current) {
            (None, None) => true,
            (Some(v), Some(cur)) => cur.version == *v,
            _ => false,
        };

        if !version_matches {
            return Ok(CasOutcome::Conflict(current));
        }

        let mut batch = WriteBatch::default();

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        batch.put_cf(
            cf_accounts,
            account.account_id.as_str().as_bytes(),
            bincode::serialize(account)?,
        );

        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        batch.put_cf(
            cf_entries,
            Self::entry_key(&entry.account_id, entry.sequence),
            bincode::serialize(entry)?,
        );

        let cf_idem = self.cf_handle(CF_IDEMPOTENCY)?;
        batch.put_cf(
            cf_idem,
            Self::idempotency_key(&record.account_id, &record.idempotency_key),
            bincode::serialize(record)?,
        );

        self.db.write(batch)?;

        tracing::debug!(
            account_id = %entry.account_id,
            sequence = entry.sequence,
            delta = entry.delta,
            entry_type = %entry.entry_type,
            "Entry committed"
        );

        Ok(CasOutcome::Committed)
    }

    // Entry log operations

    /// Get up to `limit` entries for an account in ascending sequence order
    pub fn get_entries(&self, account_id: &AccountId, limit: usize) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let prefix = Self::entry_prefix(account_id);

        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(bincode::deserialize::<LedgerEntry>(&value)?);
            if entries.len() >= limit {
                break;
            }
        }

        Ok(entries)
    }

    // Idempotency operations

    /// Get deduplication record for `(account_id, idempotency_key)`
    pub fn get_idempotency(
        &self,
        account_id: &AccountId,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        let key = Self::idempotency_key(account_id, idempotency_key);

        match self.db.get_cf(cf, &key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Insert a deduplication record if none is present (or the present one
    /// has expired); returns false when an unexpired record already exists.
    ///
    /// Used for outcomes that commit no entry, e.g. an insufficient-balance
    /// rejection; committed outcomes ride along in [`Storage::commit_entry`].
    pub fn put_idempotency_if_absent(&self, record: &IdempotencyRecord) -> Result<bool> {
        let _guard = self.stripe(&record.account_id).lock();

        if let Some(existing) = self.get_idempotency(&record.account_id, &record.idempotency_key)? {
            if !existing.is_expired(Utc::now()) {
                return Ok(false);
            }
        }

        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        let key = Self::idempotency_key(&record.account_id, &record.idempotency_key);
        self.db.put_cf(cf, &key, bincode::serialize(record)?)?;

        Ok(true)
    }

    // Catalog operations

    /// Put task (create or replace)
    pub fn put_task(&self, task: &Task) -> Result<()> {
        let cf = self.cf_handle(CF_TASKS)?;
        self.db
            .put_cf(cf, task.task_id.as_bytes(), bincode::serialize(task)?)?;
        Ok(())
    }

    /// Get task by ID
    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let cf = self.cf_handle(CF_TASKS)?;
        match self.db.get_cf(cf, task_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Delete task by ID
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        let cf = self.cf_handle(CF_TASKS)?;
        self.db.delete_cf(cf, task_id.as_bytes())?;
        Ok(())
    }

    /// List all tasks
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let cf = self.cf_handle(CF_TASKS)?;
        let mut tasks = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            tasks.push(bincode::deserialize::<Task>(&value)?);
        }
        Ok(tasks)
    }

    /// Put reward (create or replace)
    pub fn put_reward(&self, reward: &Reward) -> Result<()> {
        let cf = self.cf_handle(CF_REWARDS)?;
        self.db
            .put_cf(cf, reward.reward_id.as_bytes(), bincode::serialize(reward)?)?;
        Ok(())
    }

    /// Get reward by ID
    pub fn get_reward(&self, reward_id: &str) -> Result<Option<Reward>> {
        let cf = self.cf_handle(CF_REWARDS)?;
        match self.db.get_cf(cf, reward_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Delete reward by ID
    pub fn delete_reward(&self, reward_id: &str) -> Result<()> {
        let cf = self.cf_handle(CF_REWARDS)?;
        self.db.delete_cf(cf, reward_id.as_bytes())?;
        Ok(())
    }

    /// List all rewards
    pub fn list_rewards(&self) -> Result<Vec<Reward>> {
        let cf = self.cf_handle(CF_REWARDS)?;
        let mut rewards = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            rewards.push(bincode::deserialize::<Reward>(&value)?);
        }
        Ok(rewards)
    }
}
