//! Tallybook - counted-event ledger
//!
//! Records resource access events (views, downloads) while keeping three
//! representations consistent as one atomic unit: an append-only event row,
//! a denormalized per-resource counter, and an audit trail entry. Provides
//! reconciliation and repair primitives for detecting and correcting drift
//! between the three.

pub mod config;
pub mod interfaces;
pub mod ledger;
pub mod model;
pub mod storage;
pub mod utils;

pub use ledger::{Ledger, LedgerError};
pub use model::{AccessEvent, AuditAction, AuditEntry, Context, EventKind, Reconciliation};
