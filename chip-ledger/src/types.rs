//! Core types for the chip ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (integer chip amounts, no floats)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier (one per reward-earning person).
///
/// Any string is a valid id; the storage layer's composite keys are
/// length-prefixed, so ids need no reserved characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Versioned balance cell, the single source of truth for one account.
///
/// `version` increments on every successful write and is the value the
/// storage layer's conditional commit is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account this balance belongs to
    pub account_id: AccountId,

    /// Current chip balance
    pub balance: i64,

    /// Monotonically increasing write version
    pub version: u64,

    /// Last successful write timestamp
    pub updated_at: DateTime<Utc>,
}

/// Kind of balance-changing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    /// Chips earned by completing a task
    Earn = 1,
    /// Chips spent on a reward
    Spend = 2,
    /// Manual parent adjustment
    Adjust = 3,
}

impl EntryType {
    /// Stable lowercase name (used in logs and metrics labels)
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Earn => "earn",
            EntryType::Spend => "spend",
            EntryType::Adjust => "adjust",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to the catalog item that caused an entry.
///
/// A plain reference: deleting the task or reward later never alters
/// committed entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CauseRef {
    /// Completed task
    Task(String),
    /// Redeemed reward
    Reward(String),
}

impl fmt::Display for CauseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CauseRef::Task(id) => write!(f, "task:{}", id),
            CauseRef::Reward(id) => write!(f, "reward:{}", id),
        }
    }
}

/// Immutable ledger entry, one per committed operation.
///
/// Entries are write-once and form the audit trail; `resulting_balance` of
/// entry N equals that of entry N-1 plus `delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub entry_id: Uuid,

    /// Account this entry belongs to
    pub account_id: AccountId,

    /// Strictly increasing per-account sequence (== account version at commit)
    pub sequence: u64,

    /// Signed balance change
    pub delta: i64,

    /// Kind of operation
    pub entry_type: EntryType,

    /// Task or reward that caused this entry
    pub cause: Option<CauseRef>,

    /// Free-form reason (manual adjustments)
    pub reason: Option<String>,

    /// Balance snapshot after this entry
    pub resulting_balance: i64,

    /// Caller-chosen deduplication token
    pub idempotency_key: String,

    /// Who performed the operation
    pub actor_id: String,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

/// Outcome cached for replay of a retried request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedOutcome {
    /// Operation committed an entry
    Committed {
        /// Entry written by the original attempt
        entry_id: Uuid,
        /// Balance after the original attempt
        resulting_balance: i64,
    },
    /// Operation was definitively rejected for insufficient balance
    InsufficientBalance {
        /// Balance observed by the original attempt
        balance: i64,
    },
}

/// Durable record of one logical operation attempt.
///
/// Keyed by `(account_id, idempotency_key)`; replays return the cached
/// outcome verbatim without touching the balance cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Account the operation targeted
    pub account_id: AccountId,

    /// Caller-chosen deduplication token
    pub idempotency_key: String,

    /// Cached result of the original attempt
    pub outcome: CachedOutcome,

    /// Expiry bound (records are reclaimable after this)
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Whether this record's deduplication window has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Task definition (catalog row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub task_id: String,
    /// Display name
    pub name: String,
    /// Description shown to the child
    pub description: String,
    /// Chips awarded on completion
    pub chip_value: u32,
    /// Whether the task can be completed repeatedly
    pub recurring: bool,
    /// Whether the task is currently offered
    pub active: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Reward definition (catalog row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    /// Unique reward ID
    pub reward_id: String,
    /// Display name
    pub name: String,
    /// Description shown to the child
    pub description: String,
    /// Chips required to redeem
    pub chip_cost: u32,
    /// Whether the reward is currently offered
    pub active: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_account_id_display() {
        let account = AccountId::new("child-emma");
        assert_eq!(account.as_str(), "child-emma");
        assert_eq!(account.to_string(), "child-emma");
    }

    #[test]
    fn test_entry_type_names() {
        assert_eq!(EntryType::Earn.as_str(), "earn");
        assert_eq!(EntryType::Spend.as_str(), "spend");
        assert_eq!(EntryType::Adjust.as_str(), "adjust");
    }

    #[test]
    fn test_cause_ref_display() {
        assert_eq!(CauseRef::Task("t1".into()).to_string(), "task:t1");
        assert_eq!(CauseRef::Reward("r1".into()).to_string(), "reward:r1");
    }

    #[test]
    fn test_idempotency_record_expiry() {
        let now = Utc::now();
        let record = IdempotencyRecord {
            account_id: AccountId::new("child-emma"),
            idempotency_key: "k1".to_string(),
            outcome: CachedOutcome::Committed {
                entry_id: Uuid::now_v7(),
                resulting_balance: 10,
            },
            expires_at: now + Duration::hours(24),
        };

        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::hours(25)));
    }
}
