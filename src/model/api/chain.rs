use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::{
    chain::{ChainLink, ChainVerification, EntryHash},
    store::ChainBounds,
};
use crate::model::{db::LedgerEntry, mongodb::Id};

use super::ApiId;

/// A ledger entry as shown to auditors: its place in the chain, without the
/// candidate it was cast for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLinkDesc {
    pub id: ApiId,
    pub entry_hash: EntryHash,
    pub prev_hash: EntryHash,
    pub created_at: DateTime<Utc>,
    pub audit_flag: bool,
    pub audited_at: Option<DateTime<Utc>>,
}

impl From<LedgerEntry> for ChainLinkDesc {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id.into(),
            entry_hash: entry.entry.entry_hash,
            prev_hash: entry.entry.prev_hash,
            created_at: entry.entry.created_at,
            audit_flag: entry.entry.audit_flag,
            audited_at: entry.entry.audited_at,
        }
    }
}

impl ChainLink for ChainLinkDesc {
    fn link_id(&self) -> Id {
        *self.id
    }

    fn entry_hash(&self) -> &EntryHash {
        &self.entry_hash
    }

    fn prev_hash(&self) -> &EntryHash {
        &self.prev_hash
    }
}

/// Where a chain walk failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFailureDesc {
    /// "invalid genesis" or "broken link".
    pub reason: String,
    pub entry_id: ApiId,
    pub previous_entry_id: Option<ApiId>,
}

/// The verdict of a chain walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerificationDesc {
    pub is_valid: bool,
    pub verified_count: u64,
    pub total_entries: u64,
    pub failure: Option<ChainFailureDesc>,
}

impl From<ChainVerification> for ChainVerificationDesc {
    fn from(verification: ChainVerification) -> Self {
        Self {
            is_valid: verification.is_valid(),
            verified_count: verification.verified_count,
            total_entries: verification.total_entries,
            failure: verification.failure.map(|failure| ChainFailureDesc {
                reason: failure.reason().to_string(),
                entry_id: failure.entry_id().into(),
                previous_entry_id: failure.previous_entry_id().map(ApiId::from),
            }),
        }
    }
}

/// Votes received by one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCountDesc {
    pub candidate_id: ApiId,
    /// `None` if the candidate is no longer in the directory.
    pub name: Option<String>,
    pub party: Option<String>,
    pub votes: u64,
}

/// Size and pace of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainHealth {
    pub total_entries: u64,
    pub first_entry_at: Option<DateTime<Utc>>,
    pub last_entry_at: Option<DateTime<Utc>>,
    /// Average rate between the first and last entry. Zero until the ledger
    /// spans a measurable amount of time.
    pub votes_per_hour: f64,
}

impl From<ChainBounds> for ChainHealth {
    fn from(bounds: ChainBounds) -> Self {
        let votes_per_hour = match (bounds.first_entry_at, bounds.last_entry_at) {
            (Some(first), Some(last)) if last > first => {
                let hours = (last - first).num_milliseconds() as f64 / 3_600_000.0;
                bounds.total_entries as f64 / hours
            }
            _ => 0.0,
        };
        Self {
            total_entries: bounds.total_entries,
            first_entry_at: bounds.first_entry_at,
            last_entry_at: bounds.last_entry_at,
            votes_per_hour,
        }
    }
}

/// Overall system status for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub verification: ChainVerificationDesc,
    pub health: ChainHealth,
}

/// A point-in-time integrity report, attributed to the auditor who requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub generated_at: DateTime<Utc>,
    pub generated_by: ApiId,
    pub verification: ChainVerificationDesc,
    pub health: ChainHealth,
    pub vote_distribution: Vec<VoteCountDesc>,
}

/// The complete chain, in chain order, for offline verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainExport {
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<ChainLinkDesc>,
}
