use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{Candidate, LedgerEntry, VoterRecord};

use super::chain_head::ChainHead;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for VoterRecord {
    const NAME: &'static str = "voters";
}

impl MongoCollection for LedgerEntry {
    const NAME: &'static str = "ledger_entries";
}

impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}

impl MongoCollection for ChainHead {
    const NAME: &'static str = "chain";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();
    let entries = Coll::<LedgerEntry>::from_db(db);

    // No two entries may share a hash.
    let hash_index = IndexModel::builder()
        .keys(doc! {"entry_hash": 1})
        .options(unique.clone())
        .build();
    entries.create_index(hash_index, None).await?;

    let sequence_index = IndexModel::builder()
        .keys(doc! {"sequence": 1})
        .options(unique)
        .build();
    entries.create_index(sequence_index, None).await?;

    // Chain order.
    let order_index = IndexModel::builder()
        .keys(doc! {"created_at": 1, "sequence": 1})
        .build();
    entries.create_index(order_index, None).await?;

    // Tallying.
    let candidate_index = IndexModel::builder()
        .keys(doc! {"candidate_id": 1})
        .build();
    entries.create_index(candidate_index, None).await?;

    Ok(())
}
