use serde::{Deserialize, Serialize};

use crate::model::db::Candidate;

use super::ApiId;

/// A candidate as listed to voters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDesc {
    pub id: ApiId,
    pub name: String,
    pub party: String,
    pub description: String,
}

impl From<Candidate> for CandidateDesc {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            name: candidate.candidate.name,
            party: candidate.candidate.party,
            description: candidate.candidate.description,
        }
    }
}
