//! Audit events describing what happened to the ledger.
//!
//! Events are fire-and-forget: a sink cannot fail a vote or roll one back,
//! and no event ever pairs a voter with a ledger entry.

use chrono::{DateTime, Utc};
use log::{log, Level};
use rocket::serde::json::serde_json;
use serde::Serialize;

use crate::ledger::{chain::ChainVerification, VoteError};
use crate::model::{api::ApiId, mongodb::Id};

/// Log target that audit events are written to.
pub const AUDIT_TARGET: &str = "audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NotRegistered,
    NotVerified,
    AlreadyVoted,
    CandidateNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// An entry was committed. Carries no voter reference.
    VoteCast {
        sequence: u64,
        cast_at: DateTime<Utc>,
    },
    VoteRejected {
        voter_id: ApiId,
        reason: RejectionReason,
    },
    VoteCastFailed {
        voter_id: ApiId,
        attempts: u32,
        error: String,
    },
    ChainVerified {
        verified_count: u64,
    },
    ChainVerificationFailed {
        reason: &'static str,
        entry_id: ApiId,
        previous_entry_id: Option<ApiId>,
        verified_count: u64,
    },
}

impl LedgerEvent {
    /// The event describing a vote that was not recorded.
    pub fn vote_not_recorded(voter_id: Id, attempts: u32, err: &VoteError) -> Self {
        let voter_id = voter_id.into();
        let reason = match err {
            VoteError::NotRegistered => RejectionReason::NotRegistered,
            VoteError::NotVerified => RejectionReason::NotVerified,
            VoteError::AlreadyVoted => RejectionReason::AlreadyVoted,
            VoteError::CandidateNotFound(_) => RejectionReason::CandidateNotFound,
            VoteError::VoteCastFailed(source) => {
                return Self::VoteCastFailed {
                    voter_id,
                    attempts,
                    error: source.to_string(),
                }
            }
        };
        Self::VoteRejected { voter_id, reason }
    }

    /// The event describing the outcome of a chain walk.
    pub fn chain_verified(verification: &ChainVerification) -> Self {
        match verification.failure {
            None => Self::ChainVerified {
                verified_count: verification.verified_count,
            },
            Some(failure) => Self::ChainVerificationFailed {
                reason: failure.reason(),
                entry_id: failure.entry_id().into(),
                previous_entry_id: failure.previous_entry_id().map(ApiId::from),
                verified_count: verification.verified_count,
            },
        }
    }

    /// How loudly this event should be reported.
    pub fn level(&self) -> Level {
        match self {
            Self::VoteCast { .. } | Self::ChainVerified { .. } => Level::Info,
            Self::VoteRejected { .. } => Level::Warn,
            Self::VoteCastFailed { .. } | Self::ChainVerificationFailed { .. } => Level::Error,
        }
    }
}

/// Receives ledger events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LedgerEvent);
}

/// Writes each event as one JSON line to the [`AUDIT_TARGET`] log target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: LedgerEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => log!(target: AUDIT_TARGET, event.level(), "{line}"),
            Err(e) => log!(target: AUDIT_TARGET, Level::Error, "Unserializable event {event:?}: {e}"),
        }
    }
}

/// Keeps every event in memory for inspection.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink(std::sync::Mutex<Vec<LedgerEvent>>);

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.0.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit(&self, event: LedgerEvent) {
        self.0.lock().unwrap().push(event);
    }
}
