use jsonwebtoken::errors::Error as JwtError;
use log::{debug, error};
use mongodb::bson::oid::Error as OidError;
use rocket::{
    http::Status,
    response::{self, status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::ledger::{store::StoreError, VoteError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("Malformed ID: {0}")]
    OidParse(#[from] OidError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: String) -> Self {
        Self::Status(Status::NotFound, format!("{what} not found"))
    }

    pub fn bad_request(reason: String) -> Self {
        Self::Status(Status::BadRequest, reason)
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Vote(err) => match err {
                VoteError::NotRegistered | VoteError::NotVerified => Status::Forbidden,
                VoteError::AlreadyVoted => Status::Conflict,
                VoteError::CandidateNotFound(_) => Status::NotFound,
                VoteError::VoteCastFailed(_) => Status::ServiceUnavailable,
            },
            Self::Store(err) => match err {
                StoreError::DuplicateVoter(_) => Status::Conflict,
                _ if err.is_transient() => Status::ServiceUnavailable,
                _ => Status::InternalServerError,
            },
            // Expired, immature, badly signed, or garbled: all mean "sign in again".
            Self::Jwt(_) => Status::Unauthorized,
            Self::OidParse(_) => Status::BadRequest,
            Self::Status(status, _) => *status,
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{self}");
        } else {
            debug!("{self}");
        }
        // Never leak database internals to clients.
        let message = match self {
            Self::Store(StoreError::Db(_)) => status.reason_lossy().to_string(),
            Self::Vote(VoteError::VoteCastFailed(_)) => {
                "Vote could not be recorded, please retry".to_string()
            }
            other => other.to_string(),
        };
        Custom(status, Json(ErrorBody { error: message })).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mongodb::Id;

    #[test]
    fn vote_errors_are_distinguishable() {
        let status = |err: VoteError| Error::from(err).status();
        assert_eq!(status(VoteError::NotRegistered), Status::Forbidden);
        assert_eq!(status(VoteError::NotVerified), Status::Forbidden);
        assert_eq!(status(VoteError::AlreadyVoted), Status::Conflict);
        assert_eq!(
            status(VoteError::CandidateNotFound(Id::new())),
            Status::NotFound
        );
        assert_eq!(
            status(VoteError::VoteCastFailed(StoreError::Conflict)),
            Status::ServiceUnavailable
        );
    }

    #[test]
    fn malformed_id_is_a_bad_request() {
        let err: Error = "nope".parse::<Id>().unwrap_err().into();
        assert_eq!(err.status(), Status::BadRequest);
        assert_eq!(
            Error::Store(StoreError::DuplicateVoter(Id::new())).status(),
            Status::Conflict
        );
    }
}
