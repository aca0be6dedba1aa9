//! Abstract interfaces for tallybook components.
//!
//! These traits define the contract for durable ledger storage: the
//! three-way write (event, counter, audit entry) and the read-side counts
//! that back reconciliation.

pub mod ledger_store;

pub use ledger_store::{LedgerStore, Result, StorageError};
