use rocket::{response::status::Created, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    ledger::VoteLedger,
    model::{
        api::{
            auth::{Admin, AuthToken},
            candidate::CandidateDesc,
            vote::{RegisterVoterRequest, VoterDesc},
        },
        db::NewCandidate,
        mongodb::Id,
    },
};

pub fn routes() -> Vec<Route> {
    routes![create_candidate, register_voter, verify_voter]
}

#[post("/admin/candidates", data = "<candidate>", format = "json")]
async fn create_candidate(
    _token: AuthToken<Admin>,
    candidate: Json<NewCandidate>,
    ledger: &State<VoteLedger>,
) -> Result<Created<Json<CandidateDesc>>> {
    if candidate.name.trim().is_empty() {
        return Err(Error::bad_request(
            "Candidate name must not be empty".to_string(),
        ));
    }
    let candidate = ledger.store().insert_candidate(candidate.0).await?;
    info!("Added candidate {} ({})", candidate.id, candidate.name);
    Ok(Created::new("/candidates").body(Json(candidate.into())))
}

/// Open a voter record for an account. The voter cannot vote until verified.
#[post("/admin/voters", data = "<request>", format = "json")]
async fn register_voter(
    _token: AuthToken<Admin>,
    request: Json<RegisterVoterRequest>,
    ledger: &State<VoteLedger>,
) -> Result<Json<VoterDesc>> {
    let voter = ledger
        .store()
        .register_voter(request.voter_id.into())
        .await?;
    Ok(Json(voter.into()))
}

/// Record that the voter passed external verification. Idempotent.
#[post("/admin/voters/<voter_id>/verify")]
async fn verify_voter(
    _token: AuthToken<Admin>,
    voter_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Json<VoterDesc>> {
    let voter = ledger
        .store()
        .mark_verified(voter_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
    Ok(Json(voter.into()))
}
