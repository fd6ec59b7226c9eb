//! An in-process [`LedgerStore`].
//!
//! Casting transactions are serialized by a single writer mutex held from
//! `begin` until commit or abort. Writes are staged inside the transaction
//! and applied under a short write lock at commit, so readers only ever wait
//! for that final step and never observe a half-applied cast.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::ledger::{
    chain::EntryHash,
    store::{ChainBounds, ChainTip, LedgerStore, LedgerTxn, StoreError, StoreResult},
};
use crate::model::{
    db::{Candidate, LedgerEntry, NewCandidate, VoterRecord},
    mongodb::Id,
};

#[derive(Default)]
struct MemoryState {
    voters: HashMap<Id, VoterRecord>,
    candidates: Vec<Candidate>,
    /// Entries in commit order.
    entries: Vec<LedgerEntry>,
    next_sequence: u64,
}

impl MemoryState {
    fn chain_order(&self) -> Vec<LedgerEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|entry| (entry.created_at, entry.sequence));
        entries
    }

    fn latest(&self) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .max_by_key(|entry| (entry.created_at, entry.sequence))
    }
}

/// A ledger held entirely in memory. Cloning shares the same ledger.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    writer: Arc<Mutex<()>>,
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate stored entries directly, bypassing every ledger rule.
    #[cfg(test)]
    pub(crate) async fn tamper<F>(&self, f: F)
    where
        F: FnOnce(&mut Vec<LedgerEntry>),
    {
        f(&mut self.state.write().await.entries);
    }
}

#[rocket::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTxn>> {
        let writer = self.writer.clone().lock_owned().await;
        Ok(Box::new(MemoryTxn {
            _writer: writer,
            state: self.state.clone(),
            sequence: None,
            entry: None,
            voted: None,
        }))
    }

    async fn voter(&self, voter_id: Id) -> StoreResult<Option<VoterRecord>> {
        Ok(self.state.read().await.voters.get(&voter_id).cloned())
    }

    async fn register_voter(&self, voter_id: Id) -> StoreResult<VoterRecord> {
        let mut state = self.state.write().await;
        if state.voters.contains_key(&voter_id) {
            return Err(StoreError::DuplicateVoter(voter_id));
        }
        let record = VoterRecord::new(voter_id);
        state.voters.insert(voter_id, record.clone());
        Ok(record)
    }

    async fn mark_verified(&self, voter_id: Id) -> StoreResult<Option<VoterRecord>> {
        let mut state = self.state.write().await;
        Ok(state.voters.get_mut(&voter_id).map(|record| {
            if !record.verified {
                record.verified = true;
                record.verified_at = Some(Utc::now());
            }
            record.clone()
        }))
    }

    async fn candidate_exists(&self, candidate_id: Id) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state.candidates.iter().any(|c| c.id == candidate_id))
    }

    async fn candidates(&self) -> StoreResult<Vec<Candidate>> {
        let mut candidates = self.state.read().await.candidates.clone();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(candidates)
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> StoreResult<Candidate> {
        let candidate = Candidate {
            id: Id::new(),
            candidate,
        };
        self.state.write().await.candidates.push(candidate.clone());
        Ok(candidate)
    }

    async fn entries(&self) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self.state.read().await.chain_order())
    }

    async fn entries_page(&self, skip: u64, limit: u64) -> StoreResult<(Vec<LedgerEntry>, u64)> {
        let entries = self.state.read().await.chain_order();
        let total = entries.len() as u64;
        let page = entries
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    async fn entry_by_hash(&self, entry_hash: &EntryHash) -> StoreResult<Option<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .find(|entry| &entry.entry_hash == entry_hash)
            .cloned())
    }

    async fn vote_counts(&self) -> StoreResult<HashMap<Id, u64>> {
        let mut counts = HashMap::new();
        for entry in &self.state.read().await.entries {
            *counts.entry(entry.candidate_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn chain_bounds(&self) -> StoreResult<ChainBounds> {
        let state = self.state.read().await;
        Ok(ChainBounds {
            total_entries: state.entries.len() as u64,
            first_entry_at: state.entries.iter().map(|e| e.created_at).min(),
            last_entry_at: state.latest().map(|e| e.created_at),
        })
    }
}

/// A casting transaction holding the writer lock.
struct MemoryTxn {
    _writer: OwnedMutexGuard<()>,
    state: Arc<RwLock<MemoryState>>,
    sequence: Option<u64>,
    entry: Option<LedgerEntry>,
    voted: Option<(Id, DateTime<Utc>, EntryHash)>,
}

#[rocket::async_trait]
impl LedgerTxn for MemoryTxn {
    async fn voter(&mut self, voter_id: Id) -> StoreResult<Option<VoterRecord>> {
        let mut record = self.state.read().await.voters.get(&voter_id).cloned();
        if let (Some(record), Some((id, voted_at, confirmation_id))) = (&mut record, &self.voted) {
            if *id == voter_id {
                record.has_voted = true;
                record.voted_at = Some(*voted_at);
                record.vote_confirmation_id = Some(*confirmation_id);
            }
        }
        Ok(record)
    }

    async fn chain_tip(&mut self) -> StoreResult<ChainTip> {
        let state = self.state.read().await;
        let latest = state.latest();
        let sequence = state.next_sequence;
        self.sequence = Some(sequence);
        Ok(ChainTip {
            latest_hash: latest.map_or_else(EntryHash::genesis, |e| e.entry_hash),
            latest_created_at: latest.map(|e| e.created_at),
            sequence,
        })
    }

    async fn append(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        if self.entry.is_some() {
            return Err(StoreError::Conflict);
        }
        self.entry = Some(entry.clone());
        Ok(())
    }

    async fn mark_voted(
        &mut self,
        voter_id: Id,
        voted_at: DateTime<Utc>,
        confirmation_id: &EntryHash,
    ) -> StoreResult<bool> {
        let eligible = matches!(
            self.voter(voter_id).await?,
            Some(record) if record.verified && !record.has_voted
        );
        if eligible {
            self.voted = Some((voter_id, voted_at, *confirmation_id));
        }
        Ok(eligible)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTxn {
            _writer,
            state,
            sequence,
            entry,
            voted,
        } = *self;
        let mut state = state.write().await;

        if let Some(entry) = &entry {
            if state
                .entries
                .iter()
                .any(|existing| existing.entry_hash == entry.entry_hash)
            {
                return Err(StoreError::DuplicateEntry(entry.entry_hash));
            }
        }
        if let Some((voter_id, _, _)) = &voted {
            match state.voters.get(voter_id) {
                Some(record) if !record.has_voted => {}
                _ => return Err(StoreError::Conflict),
            }
        }

        // Nothing below can fail, so the commit is all-or-nothing.
        if let Some(sequence) = sequence {
            state.next_sequence = state.next_sequence.max(sequence + 1);
        }
        if let Some(entry) = entry {
            state.entries.push(entry);
        }
        if let Some((voter_id, voted_at, confirmation_id)) = voted {
            if let Some(record) = state.voters.get_mut(&voter_id) {
                record.has_voted = true;
                record.voted_at = Some(voted_at);
                record.vote_confirmation_id = Some(confirmation_id);
            }
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
