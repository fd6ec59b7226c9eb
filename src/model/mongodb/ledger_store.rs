//! A [`LedgerStore`] on a MongoDB replica set.
//!
//! Casting transactions run with snapshot read concern and majority write
//! concern. Each one increments the [`ChainHead`] document before reading the
//! newest entry, so of two overlapping casts MongoDB aborts one with a
//! transient write conflict.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::warn;
use mongodb::{
    bson::{self, doc, DateTime as BsonDateTime, Document},
    error::{Error as DbError, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{
        Acknowledgment, FindOneOptions, FindOptions, ReadConcern, SessionOptions,
        TransactionOptions, WriteConcern,
    },
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;
use serde::Deserialize;

use crate::ledger::{
    chain::EntryHash,
    store::{ChainBounds, ChainTip, LedgerStore, LedgerTxn, StoreError, StoreResult},
};
use crate::model::db::{Candidate, LedgerEntry, NewCandidate, VoterRecord};

use super::{
    chain_head::{ensure_chain_head_exists, ChainHead},
    ensure_indexes_exist, is_duplicate_key_error, Coll, Id,
};

/// How many times a commit with an unknown outcome is re-sent.
const COMMIT_RETRIES: u32 = 3;

fn chain_order() -> Document {
    doc! { "created_at": 1, "sequence": 1 }
}

fn reverse_chain_order() -> Document {
    doc! { "created_at": -1, "sequence": -1 }
}

#[derive(Clone)]
pub struct MongoLedgerStore {
    client: Client,
    voters: Coll<VoterRecord>,
    entries: Coll<LedgerEntry>,
    candidates: Coll<Candidate>,
    heads: Coll<ChainHead>,
}

impl MongoLedgerStore {
    /// Prepare `db` for use as a ledger: indexes and the chain head.
    pub async fn connect(client: Client, db: &Database) -> Result<Self, DbError> {
        ensure_indexes_exist(db).await?;
        let store = Self {
            client,
            voters: Coll::from_db(db),
            entries: Coll::from_db(db),
            candidates: Coll::from_db(db),
            heads: Coll::from_db(db),
        };
        ensure_chain_head_exists(&store.heads, &store.entries).await?;
        Ok(store)
    }

    async fn snapshot_session(&self) -> StoreResult<ClientSession> {
        let options = SessionOptions::builder().snapshot(true).build();
        Ok(self.client.start_session(options).await?)
    }
}

/// Per-candidate tally as produced by the aggregation pipeline.
#[derive(Deserialize)]
struct CandidateVotes {
    #[serde(rename = "_id")]
    candidate_id: Id,
    votes: u64,
}

#[rocket::async_trait]
impl LedgerStore for MongoLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTxn>> {
        let mut session = self.client.start_session(None).await?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        session.start_transaction(options).await?;
        Ok(Box::new(MongoLedgerTxn {
            session,
            store: self.clone(),
        }))
    }

    async fn voter(&self, voter_id: Id) -> StoreResult<Option<VoterRecord>> {
        Ok(self.voters.find_one(voter_id.as_doc(), None).await?)
    }

    async fn register_voter(&self, voter_id: Id) -> StoreResult<VoterRecord> {
        let record = VoterRecord::new(voter_id);
        match self.voters.insert_one(&record, None).await {
            Ok(_) => Ok(record),
            Err(e) if is_duplicate_key_error(&e) => Err(StoreError::DuplicateVoter(voter_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_verified(&self, voter_id: Id) -> StoreResult<Option<VoterRecord>> {
        let filter = doc! { "_id": *voter_id, "verified": false };
        let update = doc! {
            "$set": {
                "verified": true,
                "verified_at": BsonDateTime::now(),
            }
        };
        self.voters.update_one(filter, update, None).await?;
        self.voter(voter_id).await
    }

    async fn candidate_exists(&self, candidate_id: Id) -> StoreResult<bool> {
        Ok(self
            .candidates
            .find_one(candidate_id.as_doc(), None)
            .await?
            .is_some())
    }

    async fn candidates(&self) -> StoreResult<Vec<Candidate>> {
        let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
        Ok(self
            .candidates
            .find(None, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> StoreResult<Candidate> {
        let candidate = Candidate {
            id: Id::new(),
            candidate,
        };
        self.candidates.insert_one(&candidate, None).await?;
        Ok(candidate)
    }

    async fn entries(&self) -> StoreResult<Vec<LedgerEntry>> {
        // Ensure we read a consistent snapshot of the whole chain.
        let mut session = self.snapshot_session().await?;
        let options = FindOptions::builder().sort(chain_order()).build();
        let mut cursor = self
            .entries
            .find_with_session(None, options, &mut session)
            .await?;
        let mut entries = Vec::new();
        while let Some(entry) = cursor.next(&mut session).await {
            entries.push(entry?);
        }
        Ok(entries)
    }

    async fn entries_page(&self, skip: u64, limit: u64) -> StoreResult<(Vec<LedgerEntry>, u64)> {
        let mut session = self.snapshot_session().await?;
        let options = FindOptions::builder()
            .sort(chain_order())
            .skip(skip)
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .build();
        let mut cursor = self
            .entries
            .find_with_session(None, options, &mut session)
            .await?;
        let mut page = Vec::new();
        while let Some(entry) = cursor.next(&mut session).await {
            page.push(entry?);
        }
        let total = self
            .entries
            .count_documents_with_session(None, None, &mut session)
            .await?;
        Ok((page, total))
    }

    async fn entry_by_hash(&self, entry_hash: &EntryHash) -> StoreResult<Option<LedgerEntry>> {
        let filter = doc! { "entry_hash": entry_hash.to_hex() };
        Ok(self.entries.find_one(filter, None).await?)
    }

    async fn vote_counts(&self) -> StoreResult<HashMap<Id, u64>> {
        let pipeline = [doc! {
            "$group": {
                "_id": "$candidate_id",
                "votes": { "$sum": 1 },
            }
        }];
        let mut cursor = self.entries.aggregate(pipeline, None).await?;
        let mut counts = HashMap::new();
        while let Some(doc) = cursor.try_next().await? {
            let tally: CandidateVotes = bson::from_document(doc).map_err(DbError::from)?;
            counts.insert(tally.candidate_id, tally.votes);
        }
        Ok(counts)
    }

    async fn chain_bounds(&self) -> StoreResult<ChainBounds> {
        let mut session = self.snapshot_session().await?;
        let total_entries = self
            .entries
            .count_documents_with_session(None, None, &mut session)
            .await?;
        let first = FindOneOptions::builder().sort(chain_order()).build();
        let first_entry_at = self
            .entries
            .find_one_with_session(None, first, &mut session)
            .await?
            .map(|entry| entry.created_at);
        let last = FindOneOptions::builder().sort(reverse_chain_order()).build();
        let last_entry_at = self
            .entries
            .find_one_with_session(None, last, &mut session)
            .await?
            .map(|entry| entry.created_at);
        Ok(ChainBounds {
            total_entries,
            first_entry_at,
            last_entry_at,
        })
    }
}

/// A casting transaction on its own session.
struct MongoLedgerTxn {
    session: ClientSession,
    store: MongoLedgerStore,
}

#[rocket::async_trait]
impl LedgerTxn for MongoLedgerTxn {
    async fn voter(&mut self, voter_id: Id) -> StoreResult<Option<VoterRecord>> {
        Ok(self
            .store
            .voters
            .find_one_with_session(voter_id.as_doc(), None, &mut self.session)
            .await?)
    }

    async fn chain_tip(&mut self) -> StoreResult<ChainTip> {
        // Write the head first, so any concurrent cast conflicts with this one.
        let sequence = ChainHead::claim_next(&self.store.heads, &mut self.session).await?;
        let options = FindOneOptions::builder()
            .sort(reverse_chain_order())
            .build();
        let latest = self
            .store
            .entries
            .find_one_with_session(None, options, &mut self.session)
            .await?;
        Ok(ChainTip {
            latest_hash: latest
                .as_ref()
                .map_or_else(EntryHash::genesis, |entry| entry.entry_hash),
            latest_created_at: latest.map(|entry| entry.created_at),
            sequence,
        })
    }

    async fn append(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        match self
            .store
            .entries
            .insert_one_with_session(entry, None, &mut self.session)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => Err(StoreError::DuplicateEntry(entry.entry_hash)),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_voted(
        &mut self,
        voter_id: Id,
        voted_at: DateTime<Utc>,
        confirmation_id: &EntryHash,
    ) -> StoreResult<bool> {
        let filter = doc! {
            "_id": *voter_id,
            "verified": true,
            "has_voted": false,
        };
        let update = doc! {
            "$set": {
                "has_voted": true,
                "voted_at": BsonDateTime::from_chrono(voted_at),
                "vote_confirmation_id": confirmation_id.to_hex(),
            }
        };
        let result = self
            .store
            .voters
            .update_one_with_session(filter, update, None, &mut self.session)
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let mut retries = 0;
        loop {
            match self.session.commit_transaction().await {
                Err(e)
                    if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                        && retries < COMMIT_RETRIES =>
                {
                    retries += 1;
                    warn!("Commit outcome unknown, re-sending ({retries}/{COMMIT_RETRIES}): {e}");
                }
                result => return Ok(result?),
            }
        }
    }

    async fn abort(mut self: Box<Self>) -> StoreResult<()> {
        Ok(self.session.abort_transaction().await?)
    }
}
