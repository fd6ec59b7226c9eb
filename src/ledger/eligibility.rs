//! The precondition every vote must pass, both before and inside the casting
//! transaction.

use serde::{Deserialize, Serialize};

use crate::ledger::{VoteError, VoteLedger};
use crate::model::{db::VoterRecord, mongodb::Id};

/// The first eligibility rule a voter record breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligibility {
    NotRegistered,
    NotVerified,
    AlreadyVoted,
}

impl From<Ineligibility> for VoteError {
    fn from(reason: Ineligibility) -> Self {
        match reason {
            Ineligibility::NotRegistered => Self::NotRegistered,
            Ineligibility::NotVerified => Self::NotVerified,
            Ineligibility::AlreadyVoted => Self::AlreadyVoted,
        }
    }
}

/// Check the rules in order: registered, verified, not yet voted.
pub fn check_eligibility(record: Option<&VoterRecord>) -> Result<(), Ineligibility> {
    match record {
        None => Err(Ineligibility::NotRegistered),
        Some(record) if !record.verified => Err(Ineligibility::NotVerified),
        Some(record) if record.has_voted => Err(Ineligibility::AlreadyVoted),
        Some(_) => Ok(()),
    }
}

impl VoteLedger {
    /// Read the voter's current record and run the gate over it. Performs no
    /// writes.
    pub async fn eligibility(&self, voter_id: Id) -> Result<VoterRecord, VoteError> {
        let record = self.store.voter(voter_id).await?;
        check_eligibility(record.as_ref())?;
        // The gate only passes for an existing record.
        record.ok_or(VoteError::NotRegistered)
    }
}
