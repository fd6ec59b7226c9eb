//! The hash chain: digests binding each ledger entry to its predecessor,
//! and the end-to-end walk that checks those bindings.

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use rand::{CryptoRng, RngCore};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::mongodb::Id;

const HASH_LEN: usize = 32;

/// A SHA-256 digest identifying one ledger entry, rendered as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHash([u8; HASH_LEN]);

impl EntryHash {
    /// Digest length in bytes.
    pub const LEN: usize = HASH_LEN;

    /// The placeholder `prev_hash` of the first entry ever created: 64 zeros.
    pub const fn genesis() -> Self {
        Self([0; HASH_LEN])
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl From<[u8; HASH_LEN]> for EntryHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl Display for EntryHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for EntryHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntryHash({})", self.to_hex())
    }
}

/// Failure to parse an [`EntryHash`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryHashParseError {
    #[error("entry hash is not valid hex: {0}")]
    Encoding(#[from] data_encoding::DecodeError),
    #[error("entry hash must be 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for EntryHash {
    type Err = EntryHashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER_PERMISSIVE.decode(s.as_bytes())?;
        let bytes: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| EntryHashParseError::Length(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for EntryHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EntryHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(D::Error::custom)
    }
}

/// Per-cast randomness mixed into the entry hash. Never stored, never logged.
pub struct CasterSecret([u8; 32]);

impl CasterSecret {
    /// Draw a fresh secret from a cryptographically secure source.
    pub fn generate(mut rng: impl RngCore + CryptoRng) -> Self {
        let mut bytes = [0; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Compute the hash of a new entry.
///
/// The input is the candidate reference, the caster secret, the creation time
/// in milliseconds, and the predecessor's hash. Every field has a fixed width,
/// so the concatenation is unambiguous. The voter's identity is never an input.
pub fn compute_entry_hash(
    candidate_id: Id,
    secret: &CasterSecret,
    created_at: DateTime<Utc>,
    prev_hash: &EntryHash,
) -> EntryHash {
    let mut hasher = Sha256::new();
    hasher.update(candidate_id.bytes());
    hasher.update(secret.0);
    hasher.update(created_at.timestamp_millis().to_be_bytes());
    hasher.update(prev_hash.as_bytes());
    EntryHash(hasher.finalize().into())
}

/// Anything that takes part in the chain: stored entries and exported links.
pub trait ChainLink {
    fn link_id(&self) -> Id;
    fn entry_hash(&self) -> &EntryHash;
    fn prev_hash(&self) -> &EntryHash;
}

/// The first point at which a chain fails verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFailure {
    /// The chronologically first entry does not point at the genesis value.
    InvalidGenesis { entry_id: Id },
    /// An entry does not point at its immediate predecessor.
    BrokenLink { entry_id: Id, previous_entry_id: Id },
}

impl ChainFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidGenesis { .. } => "invalid genesis",
            Self::BrokenLink { .. } => "broken link",
        }
    }

    pub fn entry_id(&self) -> Id {
        match self {
            Self::InvalidGenesis { entry_id } | Self::BrokenLink { entry_id, .. } => *entry_id,
        }
    }

    pub fn previous_entry_id(&self) -> Option<Id> {
        match self {
            Self::InvalidGenesis { .. } => None,
            Self::BrokenLink {
                previous_entry_id, ..
            } => Some(*previous_entry_id),
        }
    }
}

/// Verdict of a full chain walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainVerification {
    /// Number of entries confirmed before the first failure (or all of them).
    pub verified_count: u64,
    /// Number of entries walked.
    pub total_entries: u64,
    pub failure: Option<ChainFailure>,
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        self.failure.is_none()
    }

    /// Turn a failed verdict into a [`ChainIntegrityBreach`].
    pub fn ensure_intact(&self) -> Result<u64, ChainIntegrityBreach> {
        match self.failure {
            None => Ok(self.verified_count),
            Some(failure) => Err(ChainIntegrityBreach {
                failure,
                verified_count: self.verified_count,
            }),
        }
    }
}

/// A critical finding: the stored chain does not link up. Never repaired automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("chain integrity breach ({}) at entry {}", .failure.reason(), .failure.entry_id())]
pub struct ChainIntegrityBreach {
    pub failure: ChainFailure,
    pub verified_count: u64,
}

/// Walk `entries`, which must be in chain order, and check every link.
///
/// An empty chain is trivially valid. Walking continues after a failure only to
/// count the remaining entries.
pub fn verify_chain<'a, L, I>(entries: I) -> ChainVerification
where
    L: ChainLink + 'a,
    I: IntoIterator<Item = &'a L>,
{
    let mut verification = ChainVerification {
        verified_count: 0,
        total_entries: 0,
        failure: None,
    };
    let mut previous: Option<&L> = None;

    for entry in entries {
        verification.total_entries += 1;
        if verification.failure.is_none() {
            let failure = match previous {
                None if !entry.prev_hash().is_genesis() => Some(ChainFailure::InvalidGenesis {
                    entry_id: entry.link_id(),
                }),
                Some(prev) if entry.prev_hash() != prev.entry_hash() => {
                    Some(ChainFailure::BrokenLink {
                        entry_id: entry.link_id(),
                        previous_entry_id: prev.link_id(),
                    })
                }
                _ => None,
            };
            match failure {
                Some(failure) => verification.failure = Some(failure),
                None => verification.verified_count += 1,
            }
        }
        previous = Some(entry);
    }

    verification
}
