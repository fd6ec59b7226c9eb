mod bson;
mod chain_head;
mod collection;
mod errors;
mod ledger_store;

pub use bson::{optional_datetime, Id};
pub use chain_head::{ensure_chain_head_exists, ChainHead, CHAIN_HEAD_ID};
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use errors::{is_duplicate_key_error, is_write_conflict};
pub use ledger_store::MongoLedgerStore;
