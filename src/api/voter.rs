use rocket::{
    response::status::Created,
    serde::json::Json,
    Route, State,
};

use crate::{
    error::Result,
    ledger::{CastReceipt, VoteLedger},
    model::api::{
        auth::{AuthToken, Voter},
        vote::{CastRequest, VoterConfirmation},
    },
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, confirmation]
}

/// Cast the signed-in voter's single vote.
#[post("/voter/vote", data = "<request>", format = "json")]
async fn cast_vote(
    token: AuthToken<Voter>,
    request: Json<CastRequest>,
    ledger: &State<VoteLedger>,
) -> Result<Created<Json<CastReceipt>>> {
    let receipt = ledger
        .cast_vote(token.id(), request.candidate_id.into())
        .await?;
    Ok(Created::new(uri!(confirmation).to_string()).body(Json(receipt)))
}

#[get("/voter/confirmation")]
async fn confirmation(
    token: AuthToken<Voter>,
    ledger: &State<VoteLedger>,
) -> Result<Json<VoterConfirmation>> {
    let confirmation = ledger.confirmation(token.id()).await?;
    Ok(Json(confirmation))
}
