//! The storage contract the ledger runs on.
//!
//! [`LedgerStore`] covers the read side and registry plumbing;
//! [`LedgerTxn`] is the only way to append an entry or mark a voter as
//! having voted, and its effects become visible all at once on commit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mongodb::error::{Error as DbError, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use thiserror::Error;

use crate::ledger::chain::EntryHash;
use crate::model::{
    db::{Candidate, LedgerEntry, NewCandidate, VoterRecord},
    mongodb::{is_write_conflict, Id},
};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Transaction lost a race with a concurrent writer")]
    Conflict,
    #[error("Ledger entry with hash {0} already exists")]
    DuplicateEntry(EntryHash),
    #[error("Voter {0} is already registered")]
    DuplicateVoter(Id),
}

impl StoreError {
    /// Could re-running the whole transaction succeed?
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict | Self::DuplicateEntry(_) => true,
            Self::Db(err) => {
                is_write_conflict(err) || err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
            }
            Self::DuplicateVoter(_) => false,
        }
    }
}

/// The newest point of the chain, as seen from inside a casting transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    /// Hash of the most recent entry, or genesis if the ledger is empty.
    pub latest_hash: EntryHash,
    /// Creation time of the most recent entry, if any.
    pub latest_created_at: Option<DateTime<Utc>>,
    /// Sequence number reserved for the entry this transaction will append.
    pub sequence: u64,
}

/// Size and time span of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainBounds {
    pub total_entries: u64,
    pub first_entry_at: Option<DateTime<Utc>>,
    pub last_entry_at: Option<DateTime<Utc>>,
}

/// A persistent ledger with its voter registry and candidate directory.
#[rocket::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start an atomic unit of work. Dropping it without committing discards it.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTxn>>;

    async fn voter(&self, voter_id: Id) -> StoreResult<Option<VoterRecord>>;

    /// Create an unverified, not-yet-voted record for an account.
    async fn register_voter(&self, voter_id: Id) -> StoreResult<VoterRecord>;

    /// Record a successful external verification. Returns `None` if the voter
    /// is not registered.
    async fn mark_verified(&self, voter_id: Id) -> StoreResult<Option<VoterRecord>>;

    async fn candidate_exists(&self, candidate_id: Id) -> StoreResult<bool>;

    async fn candidates(&self) -> StoreResult<Vec<Candidate>>;

    async fn insert_candidate(&self, candidate: NewCandidate) -> StoreResult<Candidate>;

    /// Every entry in chain order (`created_at`, then `sequence`), read from a
    /// single consistent snapshot.
    async fn entries(&self) -> StoreResult<Vec<LedgerEntry>>;

    /// One page of entries in chain order, plus the total number of entries.
    async fn entries_page(&self, skip: u64, limit: u64) -> StoreResult<(Vec<LedgerEntry>, u64)>;

    async fn entry_by_hash(&self, entry_hash: &EntryHash) -> StoreResult<Option<LedgerEntry>>;

    /// Number of entries per candidate.
    async fn vote_counts(&self) -> StoreResult<HashMap<Id, u64>>;

    async fn chain_bounds(&self) -> StoreResult<ChainBounds>;
}

/// An open casting transaction.
#[rocket::async_trait]
pub trait LedgerTxn: Send {
    /// Read a voter record as of this transaction.
    async fn voter(&mut self, voter_id: Id) -> StoreResult<Option<VoterRecord>>;

    /// Read the latest hash and reserve the next sequence number. After this
    /// call, no other casting transaction can commit an entry that this one
    /// does not know about without one of the two failing.
    async fn chain_tip(&mut self) -> StoreResult<ChainTip>;

    async fn append(&mut self, entry: &LedgerEntry) -> StoreResult<()>;

    /// Flip `has_voted` for a verified voter who has not voted yet. Returns
    /// false if no such voter exists as of this transaction.
    async fn mark_voted(
        &mut self,
        voter_id: Id,
        voted_at: DateTime<Utc>,
        confirmation_id: &EntryHash,
    ) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn abort(self: Box<Self>) -> StoreResult<()>;
}
