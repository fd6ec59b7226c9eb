//! The vote ledger: an append-only, hash-chained record of cast votes.

use std::sync::Arc;

pub mod audit;
pub mod cast;
pub mod chain;
pub mod eligibility;
mod error;
pub mod events;
pub mod memory;
pub mod store;

pub use cast::CastReceipt;
pub use error::VoteError;

use events::{EventSink, LogEventSink};
use memory::MemoryLedgerStore;
use store::LedgerStore;

/// How many times a cast is attempted before giving up on transient conflicts.
pub const DEFAULT_CAST_ATTEMPTS: u32 = 3;

/// Handle on the ledger, shared as managed state. Cheap to clone.
#[derive(Clone)]
pub struct VoteLedger {
    store: Arc<dyn LedgerStore>,
    events: Arc<dyn EventSink>,
    cast_attempts: u32,
}

impl VoteLedger {
    /// A ledger over `store` that reports events to the audit log.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            events: Arc::new(LogEventSink),
            cast_attempts: DEFAULT_CAST_ATTEMPTS,
        }
    }

    /// A fresh, empty ledger held in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()))
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Set the cast attempt limit. At least one attempt is always made.
    pub fn with_cast_attempts(mut self, attempts: u32) -> Self {
        self.cast_attempts = attempts.max(1);
        self
    }

    pub fn cast_attempts(&self) -> u32 {
        self.cast_attempts
    }

    /// The underlying store, for registry and directory plumbing.
    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }
}
