use thiserror::Error;

use crate::ledger::store::StoreError;
use crate::model::mongodb::Id;

/// Why a vote was not recorded.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("No voter record exists for this account")]
    NotRegistered,
    #[error("Voter has not been verified")]
    NotVerified,
    #[error("Voter has already voted")]
    AlreadyVoted,
    #[error("Candidate {0} not found")]
    CandidateNotFound(Id),
    /// Nothing was written; the same request may be sent again.
    #[error("Vote could not be recorded, please retry: {0}")]
    VoteCastFailed(#[from] StoreError),
}

impl VoteError {
    /// Is it safe and sensible for the caller to send the same request again?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VoteCastFailed(_))
    }
}
