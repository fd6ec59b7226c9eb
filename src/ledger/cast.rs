//! Casting a vote: one atomic transaction that appends a chain entry and
//! marks the voter as having voted.

use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, warn};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::ledger::{
    chain::{compute_entry_hash, CasterSecret, EntryHash},
    eligibility::check_eligibility,
    events::LedgerEvent,
    store::LedgerTxn,
    VoteError, VoteLedger,
};
use crate::model::{db::LedgerEntry, mongodb::Id};

/// Proof of a recorded vote, handed back to the voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastReceipt {
    /// The hash of the new ledger entry.
    pub confirmation_id: EntryHash,
    pub cast_at: DateTime<Utc>,
}

impl VoteLedger {
    /// Record `voter_id`'s vote for `candidate_id`.
    ///
    /// Either the entry is appended and the voter marked as having voted, or
    /// nothing is written at all. Transient conflicts are retried, each time
    /// going back through the eligibility gate.
    pub async fn cast_vote(&self, voter_id: Id, candidate_id: Id) -> Result<CastReceipt, VoteError> {
        let mut attempts = 0;
        let result = self
            .cast_with_retries(voter_id, candidate_id, &mut attempts)
            .await;
        if let Err(ref err) = result {
            self.events
                .emit(LedgerEvent::vote_not_recorded(voter_id, attempts, err));
        }
        result
    }

    async fn cast_with_retries(
        &self,
        voter_id: Id,
        candidate_id: Id,
        attempts: &mut u32,
    ) -> Result<CastReceipt, VoteError> {
        // The voter is judged before the ballot.
        self.eligibility(voter_id).await?;
        if !self.store.candidate_exists(candidate_id).await? {
            return Err(VoteError::CandidateNotFound(candidate_id));
        }

        loop {
            *attempts += 1;
            if *attempts > 1 {
                self.eligibility(voter_id).await?;
            }
            match self.cast_once(voter_id, candidate_id).await {
                Err(VoteError::VoteCastFailed(err))
                    if err.is_transient() && *attempts < self.cast_attempts =>
                {
                    debug!("Cast attempt {attempts} hit a transient failure, retrying: {err}");
                }
                result => return result,
            }
        }
    }

    async fn cast_once(&self, voter_id: Id, candidate_id: Id) -> Result<CastReceipt, VoteError> {
        let mut txn = self.store.begin().await?;
        match append_vote(&mut txn, voter_id, candidate_id).await {
            Ok((receipt, sequence)) => {
                txn.commit().await?;
                self.events.emit(LedgerEvent::VoteCast {
                    sequence,
                    cast_at: receipt.cast_at,
                });
                Ok(receipt)
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort().await {
                    warn!("Failed to abort casting transaction: {abort_err}");
                }
                Err(err)
            }
        }
    }
}

/// Everything a cast writes, inside `txn`. Returns the receipt and the entry's
/// sequence number.
async fn append_vote(
    txn: &mut Box<dyn LedgerTxn>,
    voter_id: Id,
    candidate_id: Id,
) -> Result<(CastReceipt, u64), VoteError> {
    // Authoritative re-check, as of this transaction.
    let voter = txn.voter(voter_id).await?;
    check_eligibility(voter.as_ref())?;

    let tip = txn.chain_tip().await?;
    let created_at = next_created_at(tip.latest_created_at);
    let secret = CasterSecret::generate(OsRng);
    let entry_hash = compute_entry_hash(candidate_id, &secret, created_at, &tip.latest_hash);

    let entry = LedgerEntry::new(
        candidate_id,
        entry_hash,
        tip.latest_hash,
        created_at,
        tip.sequence,
    );
    txn.append(&entry).await?;

    if !txn.mark_voted(voter_id, created_at, &entry_hash).await? {
        return Err(VoteError::AlreadyVoted);
    }

    let receipt = CastReceipt {
        confirmation_id: entry_hash,
        cast_at: created_at,
    };
    Ok((receipt, tip.sequence))
}

/// The current time at the millisecond precision stored in the database, but
/// never earlier than the chain's newest entry.
fn next_created_at(latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(3);
    latest.map_or(now, |latest| now.max(latest))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use chrono::Duration;
    use rocket::futures::future::join_all;

    use super::*;
    use crate::ledger::{
        chain::ChainFailure,
        events::{RecordingSink, RejectionReason},
        memory::MemoryLedgerStore,
        store::{ChainBounds, ChainTip, LedgerStore, StoreError, StoreResult},
    };
    use crate::model::db::{Candidate, NewCandidate, VoterRecord};

    struct Fixture {
        ledger: VoteLedger,
        store: Arc<MemoryLedgerStore>,
        events: Arc<RecordingSink>,
        candidate_a: Id,
        candidate_b: Id,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let events = Arc::new(RecordingSink::default());
        let ledger = VoteLedger::new(store.clone()).with_events(events.clone());
        let candidate_a = store
            .insert_candidate(NewCandidate::example1())
            .await
            .unwrap()
            .id;
        let candidate_b = store
            .insert_candidate(NewCandidate::example2())
            .await
            .unwrap()
            .id;
        Fixture {
            ledger,
            store,
            events,
            candidate_a,
            candidate_b,
        }
    }

    async fn verified_voter(ledger: &VoteLedger) -> Id {
        let id = Id::new();
        ledger.store().register_voter(id).await.unwrap();
        ledger.store().mark_verified(id).await.unwrap();
        id
    }

    #[rocket::async_test]
    async fn votes_form_a_chain() {
        let f = fixture().await;
        let (v1, v2, v3) = (
            verified_voter(&f.ledger).await,
            verified_voter(&f.ledger).await,
            verified_voter(&f.ledger).await,
        );

        let r1 = f.ledger.cast_vote(v1, f.candidate_a).await.unwrap();
        let r2 = f.ledger.cast_vote(v2, f.candidate_b).await.unwrap();
        let r3 = f.ledger.cast_vote(v3, f.candidate_a).await.unwrap();

        let entries = f.store.entries().await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].prev_hash.is_genesis());
        assert_eq!(entries[0].entry_hash, r1.confirmation_id);
        assert_eq!(entries[1].prev_hash, r1.confirmation_id);
        assert_eq!(entries[1].entry_hash, r2.confirmation_id);
        assert_eq!(entries[2].prev_hash, r2.confirmation_id);
        assert_eq!(entries[2].entry_hash, r3.confirmation_id);
        assert!(entries.iter().all(|e| !e.audit_flag && e.audited_at.is_none()));

        let verification = f.ledger.verify_chain().await.unwrap();
        assert!(verification.is_valid());
        assert_eq!(verification.verified_count, 3);

        let counts = f.ledger.vote_counts().await.unwrap();
        assert_eq!(
            counts,
            HashMap::from([(f.candidate_a, 2), (f.candidate_b, 1)])
        );

        for (voter, receipt) in [(v1, r1), (v2, r2), (v3, r3)] {
            let record = f.store.voter(voter).await.unwrap().unwrap();
            assert!(record.has_voted);
            assert_eq!(record.voted_at, Some(receipt.cast_at));
            assert_eq!(record.vote_confirmation_id, Some(receipt.confirmation_id));
        }
    }

    #[rocket::async_test]
    async fn second_vote_is_rejected() {
        let f = fixture().await;
        let voter = verified_voter(&f.ledger).await;

        let receipt = f.ledger.cast_vote(voter, f.candidate_a).await.unwrap();
        let err = f.ledger.cast_vote(voter, f.candidate_b).await.unwrap_err();
        assert!(matches!(err, VoteError::AlreadyVoted));
        assert!(!err.is_retryable());

        assert_eq!(f.store.entries().await.unwrap().len(), 1);
        let record = f.store.voter(voter).await.unwrap().unwrap();
        assert_eq!(record.vote_confirmation_id, Some(receipt.confirmation_id));

        let events = f.events.events();
        assert!(matches!(events[0], LedgerEvent::VoteCast { sequence: 0, .. }));
        assert_eq!(
            events[1],
            LedgerEvent::VoteRejected {
                voter_id: voter.into(),
                reason: RejectionReason::AlreadyVoted,
            }
        );
    }

    #[rocket::async_test]
    async fn ineligible_voters_write_nothing() {
        let f = fixture().await;

        let unknown = Id::new();
        assert!(matches!(
            f.ledger.cast_vote(unknown, f.candidate_a).await,
            Err(VoteError::NotRegistered)
        ));

        let unverified = Id::new();
        f.store.register_voter(unverified).await.unwrap();
        assert!(matches!(
            f.ledger.cast_vote(unverified, f.candidate_a).await,
            Err(VoteError::NotVerified)
        ));

        let voter = verified_voter(&f.ledger).await;
        let missing = Id::new();
        assert!(matches!(
            f.ledger.cast_vote(voter, missing).await,
            Err(VoteError::CandidateNotFound(id)) if id == missing
        ));

        assert!(f.store.entries().await.unwrap().is_empty());
        let record = f.store.voter(voter).await.unwrap().unwrap();
        assert!(!record.has_voted);
        assert_eq!(record.vote_confirmation_id, None);
        assert!(f
            .events
            .events()
            .iter()
            .all(|e| matches!(e, LedgerEvent::VoteRejected { .. })));
    }

    #[rocket::async_test]
    async fn ineligibility_outranks_unknown_candidate() {
        let f = fixture().await;
        let missing = Id::new();

        let voter = verified_voter(&f.ledger).await;
        f.ledger.cast_vote(voter, f.candidate_a).await.unwrap();
        assert!(matches!(
            f.ledger.cast_vote(voter, missing).await,
            Err(VoteError::AlreadyVoted)
        ));

        assert!(matches!(
            f.ledger.cast_vote(Id::new(), missing).await,
            Err(VoteError::NotRegistered)
        ));

        let unverified = Id::new();
        f.store.register_voter(unverified).await.unwrap();
        assert!(matches!(
            f.ledger.cast_vote(unverified, missing).await,
            Err(VoteError::NotVerified)
        ));

        assert_eq!(f.store.entries().await.unwrap().len(), 1);
        let rejections: Vec<_> = f
            .events
            .events()
            .into_iter()
            .filter_map(|e| match e {
                LedgerEvent::VoteRejected { reason, .. } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(
            rejections,
            [
                RejectionReason::AlreadyVoted,
                RejectionReason::NotRegistered,
                RejectionReason::NotVerified,
            ]
        );
    }

    #[rocket::async_test]
    async fn concurrent_votes_from_one_voter() {
        let f = fixture().await;
        let voter = verified_voter(&f.ledger).await;

        let casts = (0..16).map(|i| {
            let ledger = f.ledger.clone();
            let candidate = if i % 2 == 0 { f.candidate_a } else { f.candidate_b };
            rocket::tokio::spawn(async move { ledger.cast_vote(voter, candidate).await })
        });
        let results: Vec<_> = join_all(casts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let successes: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(successes.len(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| matches!(err, VoteError::AlreadyVoted)));

        let entries = f.store.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_hash, successes[0].confirmation_id);
    }

    #[rocket::async_test]
    async fn concurrent_votes_from_many_voters() {
        let f = fixture().await;
        let mut voters = Vec::new();
        for _ in 0..20 {
            voters.push(verified_voter(&f.ledger).await);
        }

        let casts = voters.iter().map(|&voter| {
            let ledger = f.ledger.clone();
            let candidate = f.candidate_a;
            rocket::tokio::spawn(async move { ledger.cast_vote(voter, candidate).await })
        });
        for joined in join_all(casts).await {
            joined.unwrap().unwrap();
        }

        let verification = f.ledger.verify_chain().await.unwrap();
        assert!(verification.is_valid());
        assert_eq!(verification.verified_count, 20);

        // Every entry has a distinct predecessor.
        let entries = f.store.entries().await.unwrap();
        let mut prev_hashes: Vec<_> = entries.iter().map(|e| e.prev_hash).collect();
        prev_hashes.sort_by_key(|hash| hash.to_hex());
        prev_hashes.dedup();
        assert_eq!(prev_hashes.len(), 20);
    }

    #[rocket::async_test]
    async fn emptied_ledger_restarts_from_genesis() {
        let f = fixture().await;
        let voter = verified_voter(&f.ledger).await;
        f.ledger.cast_vote(voter, f.candidate_a).await.unwrap();

        f.store.tamper(|entries| entries.clear()).await;

        let voter = verified_voter(&f.ledger).await;
        f.ledger.cast_vote(voter, f.candidate_b).await.unwrap();
        let entries = f.store.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].prev_hash.is_genesis());
        assert!(f.ledger.verify_chain().await.unwrap().is_valid());
    }

    #[rocket::async_test]
    async fn corrupted_link_is_detected() {
        let f = fixture().await;
        for candidate in [f.candidate_a, f.candidate_b, f.candidate_a] {
            let voter = verified_voter(&f.ledger).await;
            f.ledger.cast_vote(voter, candidate).await.unwrap();
        }
        let ordered = f.store.entries().await.unwrap();
        let (second, third) = (ordered[1].id, ordered[2].id);

        f.store
            .tamper(|entries| {
                let entry = entries.iter_mut().find(|e| e.id == third).unwrap();
                entry.entry.prev_hash = EntryHash::from([0xee; 32]);
            })
            .await;

        let verification = f.ledger.verify_chain().await.unwrap();
        assert_eq!(
            verification.failure,
            Some(ChainFailure::BrokenLink {
                entry_id: third,
                previous_entry_id: second,
            })
        );
        assert_eq!(verification.verified_count, 2);
        assert!(matches!(
            f.events.events().last(),
            Some(LedgerEvent::ChainVerificationFailed { verified_count: 2, .. })
        ));
    }

    #[rocket::async_test]
    async fn changed_candidate_is_not_detected() {
        let f = fixture().await;
        let voter = verified_voter(&f.ledger).await;
        f.ledger.cast_vote(voter, f.candidate_a).await.unwrap();

        let candidate_b = f.candidate_b;
        f.store
            .tamper(|entries| entries[0].entry.candidate_id = candidate_b)
            .await;

        // Only linkage is covered by verification.
        assert!(f.ledger.verify_chain().await.unwrap().is_valid());
        assert_eq!(
            f.ledger.vote_counts().await.unwrap(),
            HashMap::from([(candidate_b, 1)])
        );
    }

    #[rocket::async_test]
    async fn created_at_never_goes_backwards() {
        let f = fixture().await;
        let voter = verified_voter(&f.ledger).await;
        f.ledger.cast_vote(voter, f.candidate_a).await.unwrap();

        // Pretend the newest entry came from a clock running ahead of ours.
        let ahead = Utc::now().trunc_subsecs(3) + Duration::hours(1);
        f.store
            .tamper(|entries| entries[0].entry.created_at = ahead)
            .await;

        let voter = verified_voter(&f.ledger).await;
        let receipt = f.ledger.cast_vote(voter, f.candidate_b).await.unwrap();
        assert_eq!(receipt.cast_at, ahead);

        // Same timestamp, so the sequence decides the order.
        let entries = f.store.entries().await.unwrap();
        assert_eq!(entries[1].entry_hash, receipt.confirmation_id);
        assert!(f.ledger.verify_chain().await.unwrap().is_valid());
    }

    /// Delegates to a memory store, failing the first `failures` commits.
    struct FlakyStore {
        inner: MemoryLedgerStore,
        failures: AtomicU32,
    }

    struct FlakyTxn {
        inner: Box<dyn LedgerTxn>,
        fail: bool,
    }

    #[rocket::async_trait]
    impl LedgerTxn for FlakyTxn {
        async fn voter(&mut self, voter_id: Id) -> StoreResult<Option<VoterRecord>> {
            self.inner.voter(voter_id).await
        }

        async fn chain_tip(&mut self) -> StoreResult<ChainTip> {
            self.inner.chain_tip().await
        }

        async fn append(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
            self.inner.append(entry).await
        }

        async fn mark_voted(
            &mut self,
            voter_id: Id,
            voted_at: DateTime<Utc>,
            confirmation_id: &EntryHash,
        ) -> StoreResult<bool> {
            self.inner
                .mark_voted(voter_id, voted_at, confirmation_id)
                .await
        }

        async fn commit(self: Box<Self>) -> StoreResult<()> {
            if self.fail {
                self.inner.abort().await?;
                return Err(StoreError::Conflict);
            }
            self.inner.commit().await
        }

        async fn abort(self: Box<Self>) -> StoreResult<()> {
            self.inner.abort().await
        }
    }

    #[rocket::async_trait]
    impl LedgerStore for FlakyStore {
        async fn begin(&self) -> StoreResult<Box<dyn LedgerTxn>> {
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Ok(Box::new(FlakyTxn {
                inner: self.inner.begin().await?,
                fail,
            }))
        }

        async fn voter(&self, voter_id: Id) -> StoreResult<Option<VoterRecord>> {
            self.inner.voter(voter_id).await
        }

        async fn register_voter(&self, voter_id: Id) -> StoreResult<VoterRecord> {
            self.inner.register_voter(voter_id).await
        }

        async fn mark_verified(&self, voter_id: Id) -> StoreResult<Option<VoterRecord>> {
            self.inner.mark_verified(voter_id).await
        }

        async fn candidate_exists(&self, candidate_id: Id) -> StoreResult<bool> {
            self.inner.candidate_exists(candidate_id).await
        }

        async fn candidates(&self) -> StoreResult<Vec<Candidate>> {
            self.inner.candidates().await
        }

        async fn insert_candidate(&self, candidate: NewCandidate) -> StoreResult<Candidate> {
            self.inner.insert_candidate(candidate).await
        }

        async fn entries(&self) -> StoreResult<Vec<LedgerEntry>> {
            self.inner.entries().await
        }

        async fn entries_page(
            &self,
            skip: u64,
            limit: u64,
        ) -> StoreResult<(Vec<LedgerEntry>, u64)> {
            self.inner.entries_page(skip, limit).await
        }

        async fn entry_by_hash(&self, entry_hash: &EntryHash) -> StoreResult<Option<LedgerEntry>> {
            self.inner.entry_by_hash(entry_hash).await
        }

        async fn vote_counts(&self) -> StoreResult<HashMap<Id, u64>> {
            self.inner.vote_counts().await
        }

        async fn chain_bounds(&self) -> StoreResult<ChainBounds> {
            self.inner.chain_bounds().await
        }
    }

    async fn flaky_ledger(failures: u32) -> (VoteLedger, Arc<RecordingSink>, Id, Id) {
        let store = FlakyStore {
            inner: MemoryLedgerStore::new(),
            failures: AtomicU32::new(failures),
        };
        let candidate = store
            .insert_candidate(NewCandidate::example1())
            .await
            .unwrap()
            .id;
        let events = Arc::new(RecordingSink::default());
        let ledger = VoteLedger::new(Arc::new(store)).with_events(events.clone());
        let voter = verified_voter(&ledger).await;
        (ledger, events, voter, candidate)
    }

    #[rocket::async_test]
    async fn transient_failures_are_retried() {
        let (ledger, _, voter, candidate) = flaky_ledger(2).await;
        let receipt = ledger.cast_vote(voter, candidate).await.unwrap();

        let entries = ledger.store().entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_hash, receipt.confirmation_id);
    }

    #[rocket::async_test]
    async fn retries_are_bounded() {
        let (ledger, events, voter, candidate) = flaky_ledger(5).await;
        let ledger = ledger.with_cast_attempts(3);

        let err = ledger.cast_vote(voter, candidate).await.unwrap_err();
        assert!(matches!(err, VoteError::VoteCastFailed(StoreError::Conflict)));
        assert!(err.is_retryable());
        assert!(ledger.store().entries().await.unwrap().is_empty());
        assert!(!ledger.store().voter(voter).await.unwrap().unwrap().has_voted);
        assert!(matches!(
            events.events().last(),
            Some(LedgerEvent::VoteCastFailed { attempts: 3, .. })
        ));

        // The remaining two failures are used up, then the retry succeeds.
        ledger.cast_vote(voter, candidate).await.unwrap();
    }
}
