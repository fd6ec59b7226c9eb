use mongodb::{
    bson::doc,
    error::Error as DbError,
    options::{FindOneAndUpdateOptions, FindOneOptions, ReturnDocument, UpdateOptions},
    ClientSession,
};
use serde::{Deserialize, Serialize};

use crate::model::db::LedgerEntry;

use super::Coll;

/// ID of the single head document.
pub const CHAIN_HEAD_ID: &str = "head";

/// The chain's write point. Every casting transaction increments it, so two
/// transactions that overlap always write-conflict on this document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHead {
    #[serde(rename = "_id")]
    pub id: String,
    /// Sequence number the next entry will receive.
    pub next_sequence: u64,
}

impl ChainHead {
    /// Atomically reserve the next sequence number within `session`'s transaction.
    pub async fn claim_next(
        heads: &Coll<ChainHead>,
        session: &mut ClientSession,
    ) -> Result<u64, DbError> {
        let update = doc! {
            "$inc": { "next_sequence": 1_i64 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::Before)
            .upsert(true)
            .build();
        let head = heads
            .find_one_and_update_with_session(
                doc! { "_id": CHAIN_HEAD_ID },
                update,
                options,
                session,
            )
            .await?;
        // An upsert returns nothing and starts the count at 1.
        Ok(head.map_or(0, |head| head.next_sequence))
    }
}

/// Ensure the head document exists and is ahead of every stored entry.
///
/// This operation is idempotent.
pub async fn ensure_chain_head_exists(
    heads: &Coll<ChainHead>,
    entries: &Coll<LedgerEntry>,
) -> Result<(), DbError> {
    let options = FindOneOptions::builder()
        .sort(doc! { "sequence": -1 })
        .build();
    let next_sequence = entries
        .find_one(None, options)
        .await?
        .map_or(0, |entry| entry.sequence + 1);
    let next_sequence = i64::try_from(next_sequence).unwrap_or(i64::MAX);

    let update = doc! {
        "$max": { "next_sequence": next_sequence }
    };
    let options = UpdateOptions::builder().upsert(true).build();
    heads
        .update_one(doc! { "_id": CHAIN_HEAD_ID }, update, options)
        .await?;
    Ok(())
}
