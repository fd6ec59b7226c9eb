use rocket::{serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    ledger::{chain::EntryHash, VoteLedger},
    model::api::{
        auth::{Auditor, AuthToken},
        chain::{
            ChainExport, ChainLinkDesc, ChainStatus, ChainVerificationDesc, IntegrityReport,
            VoteCountDesc,
        },
        pagination::{Paginated, PaginationRequest},
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        vote_count,
        chain,
        verify_chain,
        status,
        integrity_report,
        export_chain,
        entry,
    ]
}

#[get("/auditor/vote-count")]
async fn vote_count(
    _token: AuthToken<Auditor>,
    ledger: &State<VoteLedger>,
) -> Result<Json<Vec<VoteCountDesc>>> {
    Ok(Json(ledger.vote_distribution().await?))
}

#[get("/auditor/chain?<pagination..>")]
async fn chain(
    _token: AuthToken<Auditor>,
    pagination: PaginationRequest,
    ledger: &State<VoteLedger>,
) -> Result<Json<Paginated<ChainLinkDesc>>> {
    Ok(Json(ledger.chain_page(&pagination).await?))
}

#[get("/auditor/verify-chain")]
async fn verify_chain(
    token: AuthToken<Auditor>,
    ledger: &State<VoteLedger>,
) -> Result<Json<ChainVerificationDesc>> {
    info!("Chain verification requested by auditor {}", token.id());
    let verification = ledger.verify_chain().await?;
    Ok(Json(verification.into()))
}

#[get("/auditor/status")]
async fn status(
    _token: AuthToken<Auditor>,
    ledger: &State<VoteLedger>,
) -> Result<Json<ChainStatus>> {
    Ok(Json(ledger.status().await?))
}

#[get("/auditor/integrity-report")]
async fn integrity_report(
    token: AuthToken<Auditor>,
    ledger: &State<VoteLedger>,
) -> Result<Json<IntegrityReport>> {
    Ok(Json(ledger.integrity_report(token.id()).await?))
}

#[get("/auditor/chain/export")]
async fn export_chain(
    token: AuthToken<Auditor>,
    ledger: &State<VoteLedger>,
) -> Result<Json<ChainExport>> {
    let export = ledger.export_chain().await?;
    info!(
        "Auditor {} exported {} ledger entries",
        token.id(),
        export.entries.len()
    );
    Ok(Json(export))
}

/// Find the entry a voter's confirmation ID refers to.
#[get("/auditor/entry/<confirmation_id>")]
async fn entry(
    _token: AuthToken<Auditor>,
    confirmation_id: &str,
    ledger: &State<VoteLedger>,
) -> Result<Json<ChainLinkDesc>> {
    let hash: EntryHash = confirmation_id
        .parse()
        .map_err(|err| Error::bad_request(format!("Malformed confirmation ID: {err}")))?;
    let entry = ledger
        .entry_for_confirmation(&hash)
        .await?
        .ok_or_else(|| Error::not_found(format!("Entry {hash}")))?;
    Ok(Json(entry.into()))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{Cookie, Status},
        local::asynchronous::Client,
    };
    use serde::de::DeserializeOwned;

    use crate::api::test_utils::{login, verified_voter};
    use crate::ledger::chain;
    use crate::model::{
        api::{auth::Voter, ApiId},
        db::NewCandidate,
        mongodb::Id,
    };

    use super::*;

    /// Cast votes for the given candidates in order, one fresh voter each.
    async fn cast_all(ledger: &VoteLedger, candidates: &[Id]) -> Vec<EntryHash> {
        let mut hashes = Vec::new();
        for &candidate_id in candidates {
            let voter_id = verified_voter(ledger).await;
            let receipt = ledger.cast_vote(voter_id, candidate_id).await.unwrap();
            hashes.push(receipt.confirmation_id);
        }
        hashes
    }

    async fn get_json<'c, T: DeserializeOwned + Send + 'static>(
        client: &'c Client,
        cookie: &Cookie<'static>,
        uri: &'c str,
    ) -> T {
        let response = client.get(uri).cookie(cookie.clone()).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        response.into_json().await.unwrap()
    }

    #[backend_test]
    async fn counts_and_pages(client: Client, ledger: VoteLedger) {
        let a = ledger
            .store()
            .insert_candidate(NewCandidate::example1())
            .await
            .unwrap();
        let b = ledger
            .store()
            .insert_candidate(NewCandidate::example2())
            .await
            .unwrap();
        let hashes = cast_all(&ledger, &[a.id, b.id, a.id]).await;
        let auditor = login::<Auditor>(&client, Id::new());

        let counts: Vec<VoteCountDesc> =
            get_json(&client, &auditor, &uri!(vote_count).to_string()).await;
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].candidate_id, ApiId::from(a.id));
        assert_eq!(counts[0].votes, 2);
        assert_eq!(counts[1].candidate_id, ApiId::from(b.id));
        assert_eq!(counts[1].votes, 1);

        let page: Paginated<ChainLinkDesc> = get_json(
            &client,
            &auditor,
            "/auditor/chain?page_num=2&page_size=2",
        )
        .await;
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].entry_hash, hashes[2]);
        assert_eq!(page.items[0].prev_hash, hashes[1]);

        // Defaults apply without query parameters.
        let page: Paginated<ChainLinkDesc> =
            get_json(&client, &auditor, "/auditor/chain").await;
        assert_eq!(page.pagination.page_num, 1);
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[0].prev_hash, EntryHash::genesis());
    }

    #[backend_test]
    async fn verification_and_reports(client: Client, ledger: VoteLedger) {
        let a = ledger
            .store()
            .insert_candidate(NewCandidate::example1())
            .await
            .unwrap();
        cast_all(&ledger, &[a.id, a.id]).await;
        let auditor_id = Id::new();
        let auditor = login::<Auditor>(&client, auditor_id);

        let verification: ChainVerificationDesc =
            get_json(&client, &auditor, &uri!(verify_chain).to_string()).await;
        assert!(verification.is_valid);
        assert_eq!(verification.verified_count, 2);
        assert_eq!(verification.total_entries, 2);

        let status: ChainStatus = get_json(&client, &auditor, &uri!(status).to_string()).await;
        assert!(status.verification.is_valid);
        assert_eq!(status.health.total_entries, 2);
        assert!(status.health.first_entry_at <= status.health.last_entry_at);

        let report: IntegrityReport =
            get_json(&client, &auditor, &uri!(integrity_report).to_string()).await;
        assert_eq!(report.generated_by, ApiId::from(auditor_id));
        assert_eq!(report.vote_distribution[0].votes, 2);

        let export: ChainExport =
            get_json(&client, &auditor, &uri!(export_chain).to_string()).await;
        assert_eq!(export.entries.len(), 2);
        assert!(chain::verify_chain(&export.entries).is_valid());
    }

    #[backend_test]
    async fn entry_by_confirmation(client: Client, ledger: VoteLedger) {
        let a = ledger
            .store()
            .insert_candidate(NewCandidate::example1())
            .await
            .unwrap();
        let hashes = cast_all(&ledger, &[a.id, a.id]).await;
        let auditor = login::<Auditor>(&client, Id::new());

        let found: ChainLinkDesc = get_json(
            &client,
            &auditor,
            &uri!(entry(hashes[1].to_string())).to_string(),
        )
        .await;
        assert_eq!(found.entry_hash, hashes[1]);
        assert_eq!(found.prev_hash, hashes[0]);

        let unknown = EntryHash::from([7; EntryHash::LEN]).to_string();
        let response = client
            .get(uri!(entry(unknown)))
            .cookie(auditor.clone())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        let response = client
            .get(uri!(entry("not-hex")))
            .cookie(auditor)
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test]
    async fn auditor_rights_required(client: Client, ledger: VoteLedger) {
        let voter = login::<Voter>(&client, verified_voter(&ledger).await);
        for uri in [
            uri!(vote_count).to_string(),
            "/auditor/chain".to_string(),
            uri!(verify_chain).to_string(),
            uri!(status).to_string(),
            uri!(integrity_report).to_string(),
            uri!(export_chain).to_string(),
            uri!(entry(EntryHash::genesis().to_string())).to_string(),
        ] {
            let response = client.get(uri.as_str()).dispatch().await;
            assert_eq!(Status::Unauthorized, response.status(), "{uri}");
            let response = client
                .get(uri.as_str())
                .cookie(voter.clone())
                .dispatch()
                .await;
            assert_eq!(Status::Forbidden, response.status(), "{uri}");
        }
    }
}
