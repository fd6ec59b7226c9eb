use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::chain::EntryHash;
use crate::model::db::VoterRecord;

use super::ApiId;

/// Body of a cast-vote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastRequest {
    pub candidate_id: ApiId,
}

/// A voter's view of their own voting state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterConfirmation {
    pub has_voted: bool,
    pub voted_at: Option<DateTime<Utc>>,
    pub confirmation_id: Option<EntryHash>,
}

impl From<VoterRecord> for VoterConfirmation {
    fn from(record: VoterRecord) -> Self {
        Self {
            has_voted: record.has_voted,
            voted_at: record.voted_at,
            confirmation_id: record.vote_confirmation_id,
        }
    }
}

/// A voter record as shown to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterDesc {
    pub id: ApiId,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub has_voted: bool,
}

impl From<VoterRecord> for VoterDesc {
    fn from(record: VoterRecord) -> Self {
        Self {
            id: record.id.into(),
            verified: record.verified,
            verified_at: record.verified_at,
            has_voted: record.has_voted,
        }
    }
}

/// Body of a voter registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVoterRequest {
    pub voter_id: ApiId,
}
