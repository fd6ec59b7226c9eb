//! Read-only views of the ledger for auditors and voters.
//!
//! Nothing here takes the casting writer lock. Each call sees a consistent
//! ledger, though two calls may see it at different sizes.

use std::collections::HashMap;

use chrono::Utc;
use log::info;

use crate::ledger::{
    chain::{self, ChainVerification, EntryHash},
    events::LedgerEvent,
    store::StoreResult,
    VoteError, VoteLedger,
};
use crate::model::{
    api::{
        chain::{
            ChainExport, ChainHealth, ChainLinkDesc, ChainStatus, IntegrityReport, VoteCountDesc,
        },
        pagination::{Paginated, PaginationRequest},
        vote::VoterConfirmation,
    },
    db::LedgerEntry,
    mongodb::Id,
};

impl VoteLedger {
    /// Walk the whole chain from a single snapshot and report the result to
    /// the audit log.
    pub async fn verify_chain(&self) -> StoreResult<ChainVerification> {
        let entries = self.store.entries().await?;
        let verification = chain::verify_chain(&entries);
        info!(
            "Verified {}/{} ledger entries",
            verification.verified_count, verification.total_entries
        );
        self.events.emit(LedgerEvent::chain_verified(&verification));
        Ok(verification)
    }

    /// Number of votes per candidate ID.
    pub async fn vote_counts(&self) -> StoreResult<HashMap<Id, u64>> {
        self.store.vote_counts().await
    }

    /// Votes per candidate, joined with the candidate directory. Candidates
    /// without votes are listed with zero. Ordered by votes, most first, then
    /// by name.
    pub async fn vote_distribution(&self) -> StoreResult<Vec<VoteCountDesc>> {
        let mut counts = self.store.vote_counts().await?;
        let mut distribution: Vec<_> = self
            .store
            .candidates()
            .await?
            .into_iter()
            .map(|candidate| VoteCountDesc {
                candidate_id: candidate.id.into(),
                votes: counts.remove(&candidate.id).unwrap_or(0),
                name: Some(candidate.candidate.name),
                party: Some(candidate.candidate.party),
            })
            .collect();
        // Whatever is left refers to candidates no longer in the directory.
        distribution.extend(counts.into_iter().map(|(id, votes)| VoteCountDesc {
            candidate_id: id.into(),
            name: None,
            party: None,
            votes,
        }));
        distribution.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.name.cmp(&b.name)));
        Ok(distribution)
    }

    /// One page of the chain in chain order, without candidate references.
    pub async fn chain_page(
        &self,
        pagination: &PaginationRequest,
    ) -> StoreResult<Paginated<ChainLinkDesc>> {
        let (entries, total) = self
            .store
            .entries_page(pagination.skip(), pagination.page_size().into())
            .await?;
        let links = entries.into_iter().map(ChainLinkDesc::from).collect();
        Ok(pagination.to_paginated(total, links))
    }

    pub async fn health(&self) -> StoreResult<ChainHealth> {
        Ok(self.store.chain_bounds().await?.into())
    }

    /// Verdict and health together.
    pub async fn status(&self) -> StoreResult<ChainStatus> {
        let verification = self.verify_chain().await?;
        let health = self.health().await?;
        Ok(ChainStatus {
            verification: verification.into(),
            health,
        })
    }

    pub async fn integrity_report(&self, auditor_id: Id) -> StoreResult<IntegrityReport> {
        let verification = self.verify_chain().await?;
        let health = self.health().await?;
        let vote_distribution = self.vote_distribution().await?;
        Ok(IntegrityReport {
            generated_at: Utc::now(),
            generated_by: auditor_id.into(),
            verification: verification.into(),
            health,
            vote_distribution,
        })
    }

    /// The full chain for offline verification.
    pub async fn export_chain(&self) -> StoreResult<ChainExport> {
        let entries = self.store.entries().await?;
        Ok(ChainExport {
            exported_at: Utc::now(),
            entries: entries.into_iter().map(ChainLinkDesc::from).collect(),
        })
    }

    /// The voter's own voting state.
    pub async fn confirmation(&self, voter_id: Id) -> Result<VoterConfirmation, VoteError> {
        let record = self
            .store
            .voter(voter_id)
            .await?
            .ok_or(VoteError::NotRegistered)?;
        Ok(record.into())
    }

    /// Look up the entry a confirmation ID refers to.
    pub async fn entry_for_confirmation(
        &self,
        confirmation_id: &EntryHash,
    ) -> StoreResult<Option<LedgerEntry>> {
        self.store.entry_by_hash(confirmation_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::{events::RecordingSink, memory::MemoryLedgerStore, store::LedgerStore};
    use crate::model::{api::ApiId, db::NewCandidate};

    async fn cast(ledger: &VoteLedger, candidate: Id) -> EntryHash {
        let voter = Id::new();
        ledger.store().register_voter(voter).await.unwrap();
        ledger.store().mark_verified(voter).await.unwrap();
        ledger.cast_vote(voter, candidate).await.unwrap().confirmation_id
    }

    #[rocket::async_test]
    async fn empty_ledger() {
        let events = Arc::new(RecordingSink::default());
        let ledger = VoteLedger::in_memory().with_events(events.clone());

        let verification = ledger.verify_chain().await.unwrap();
        assert!(verification.is_valid());
        assert_eq!(verification.verified_count, 0);
        assert_eq!(
            events.events(),
            vec![LedgerEvent::ChainVerified { verified_count: 0 }]
        );

        let health = ledger.health().await.unwrap();
        assert_eq!(health.total_entries, 0);
        assert_eq!(health.first_entry_at, None);
        assert!(ledger.export_chain().await.unwrap().entries.is_empty());
        assert!(ledger.vote_counts().await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn distribution_and_pages() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = VoteLedger::new(store.clone());
        let a = store
            .insert_candidate(NewCandidate::example1())
            .await
            .unwrap();
        let b = store
            .insert_candidate(NewCandidate::example2())
            .await
            .unwrap();

        let mut hashes = Vec::new();
        for candidate in [b.id, a.id, b.id, b.id, a.id] {
            hashes.push(cast(&ledger, candidate).await);
        }

        let distribution = ledger.vote_distribution().await.unwrap();
        assert_eq!(distribution.len(), 2);
        assert_eq!(distribution[0].candidate_id, ApiId::from(b.id));
        assert_eq!(distribution[0].votes, 3);
        assert_eq!(distribution[0].name.as_deref(), Some(b.name.as_str()));
        assert_eq!(distribution[1].votes, 2);

        let page = ledger
            .chain_page(&PaginationRequest::new(2, 2))
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 5);
        let page_hashes: Vec<_> = page.items.iter().map(|l| l.entry_hash).collect();
        assert_eq!(page_hashes, hashes[2..4]);

        let export = ledger.export_chain().await.unwrap();
        assert_eq!(export.entries.len(), 5);
        assert!(chain::verify_chain(&export.entries).is_valid());

        let entry = ledger
            .entry_for_confirmation(&hashes[3])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.candidate_id, b.id);
        assert_eq!(
            ledger
                .entry_for_confirmation(&EntryHash::from([9; 32]))
                .await
                .unwrap(),
            None
        );
    }

    #[rocket::async_test]
    async fn report_names_the_auditor() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = VoteLedger::new(store.clone());
        let a = store
            .insert_candidate(NewCandidate::example1())
            .await
            .unwrap();
        cast(&ledger, a.id).await;

        let auditor = Id::new();
        let report = ledger.integrity_report(auditor).await.unwrap();
        assert_eq!(report.generated_by, ApiId::from(auditor));
        assert!(report.verification.is_valid);
        assert_eq!(report.health.total_entries, 1);
        assert_eq!(report.vote_distribution[0].votes, 1);

        let status = ledger.status().await.unwrap();
        assert_eq!(status.verification.verified_count, 1);
    }

    #[rocket::async_test]
    async fn confirmation_reflects_the_vote() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = VoteLedger::new(store.clone());
        let candidate = store
            .insert_candidate(NewCandidate::example1())
            .await
            .unwrap();

        assert!(matches!(
            ledger.confirmation(Id::new()).await,
            Err(VoteError::NotRegistered)
        ));

        let voter = Id::new();
        store.register_voter(voter).await.unwrap();
        store.mark_verified(voter).await.unwrap();
        let before = ledger.confirmation(voter).await.unwrap();
        assert!(!before.has_voted);
        assert_eq!(before.confirmation_id, None);

        let receipt = ledger.cast_vote(voter, candidate.id).await.unwrap();
        let after = ledger.confirmation(voter).await.unwrap();
        assert!(after.has_voted);
        assert_eq!(after.voted_at, Some(receipt.cast_at));
        assert_eq!(after.confirmation_id, Some(receipt.confirmation_id));
        assert!(ledger
            .entry_for_confirmation(&receipt.confirmation_id)
            .await
            .unwrap()
            .is_some());
    }
}
