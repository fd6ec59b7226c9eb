use rocket::{serde::json::Json, Route, State};

use crate::{
    error::Result,
    ledger::VoteLedger,
    model::api::candidate::CandidateDesc,
};

pub fn routes() -> Vec<Route> {
    routes![candidates]
}

#[get("/candidates")]
async fn candidates(ledger: &State<VoteLedger>) -> Result<Json<Vec<CandidateDesc>>> {
    let candidates = ledger.store().candidates().await?;
    Ok(Json(candidates.into_iter().map(CandidateDesc::from).collect()))
}
