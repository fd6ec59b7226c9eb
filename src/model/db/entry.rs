use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::ledger::chain::{ChainLink, EntryHash};
use crate::model::mongodb::{optional_datetime, Id};

/// Core ledger entry data, as stored in the database.
///
/// There is intentionally no field referring to the voter who cast this entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntryCore {
    /// The candidate this vote was cast for.
    pub candidate_id: Id,
    /// This entry's own digest. Unique across the ledger.
    pub entry_hash: EntryHash,
    /// The digest of the chronologically previous entry, or genesis.
    pub prev_hash: EntryHash,
    /// Creation time; the chain's ordering key.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    /// Commit sequence number, breaking `created_at` ties.
    pub sequence: u64,
    /// Advisory auditor metadata, not covered by chain verification.
    pub audit_flag: bool,
    #[serde(with = "optional_datetime", default)]
    pub audited_at: Option<DateTime<Utc>>,
}

/// A ledger entry with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub entry: LedgerEntryCore,
}

impl LedgerEntry {
    /// Create a fresh, unaudited entry with a new ID.
    pub fn new(
        candidate_id: Id,
        entry_hash: EntryHash,
        prev_hash: EntryHash,
        created_at: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            id: Id::new(),
            entry: LedgerEntryCore {
                candidate_id,
                entry_hash,
                prev_hash,
                created_at,
                sequence,
                audit_flag: false,
                audited_at: None,
            },
        }
    }
}

impl Deref for LedgerEntry {
    type Target = LedgerEntryCore;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

impl ChainLink for LedgerEntry {
    fn link_id(&self) -> Id {
        self.id
    }

    fn entry_hash(&self) -> &EntryHash {
        &self.entry.entry_hash
    }

    fn prev_hash(&self) -> &EntryHash {
        &self.entry.prev_hash
    }
}
