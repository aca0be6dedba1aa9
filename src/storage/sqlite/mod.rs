//! SQLite implementations of storage interfaces.

mod ledger_store;

pub use ledger_store::SqliteLedgerStore;
