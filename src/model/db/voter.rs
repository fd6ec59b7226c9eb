use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::chain::EntryHash;
use crate::model::mongodb::{optional_datetime, Id};

/// A voter's eligibility and voting state, keyed by their account ID.
///
/// `has_voted`, `voted_at` and `vote_confirmation_id` are only ever written by
/// the casting transaction, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    #[serde(rename = "_id")]
    pub id: Id,
    /// Set by the external verification step.
    pub verified: bool,
    #[serde(with = "optional_datetime", default)]
    pub verified_at: Option<DateTime<Utc>>,
    pub has_voted: bool,
    #[serde(with = "optional_datetime", default)]
    pub voted_at: Option<DateTime<Utc>>,
    /// The hash of the ledger entry created when this voter voted.
    #[serde(default)]
    pub vote_confirmation_id: Option<EntryHash>,
}

impl VoterRecord {
    /// A freshly registered, unverified voter.
    pub fn new(id: Id) -> Self {
        Self {
            id,
            verified: false,
            verified_at: None,
            has_voted: false,
            voted_at: None,
            vote_confirmation_id: None,
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl VoterRecord {
        pub fn example_verified() -> Self {
            Self {
                verified: true,
                verified_at: Some(Utc::now()),
                ..Self::new(Id::new())
            }
        }
    }
}
