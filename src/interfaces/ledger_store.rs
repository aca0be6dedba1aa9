//! Ledger storage interface.

use async_trait::async_trait;

use crate::model::{AccessEvent, Context, EventKind};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Resource not found: resource_id={resource_id}")]
    ResourceNotFound { resource_id: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Interface for durable ledger persistence.
///
/// Implementations:
/// - `SqliteLedgerStore`: SQLite storage (default)
/// - `PostgresLedgerStore`: PostgreSQL storage
/// - `MockLedgerStore`: in-memory storage for tests
///
/// The counter columns on the resource row must only ever be mutated by
/// `record_access` (atomic increment) and `repair_counter` (recompute from
/// events); no other write path may touch them.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create tables and indexes if they do not exist.
    async fn init(&self) -> Result<()>;

    /// Insert a resource row with both counters at zero.
    ///
    /// Provisioning hook for the wrapping application's upload flow and for
    /// tests; the ledger itself never calls this.
    async fn create_resource(&self, resource_id: i64) -> Result<()>;

    /// Apply the three writes for one access as a single atomic unit:
    /// insert the event row, increment the matching counter by one, and
    /// insert the audit entry. Either all three commit or none do.
    ///
    /// `occurred_at` is assigned here, at insert time, and shared by the
    /// event row and the audit row. Returns `ResourceNotFound` (with zero
    /// effects) when `resource_id` has no resource row.
    async fn record_access(
        &self,
        resource_id: i64,
        actor_id: Option<i64>,
        kind: EventKind,
        context: &Context,
    ) -> Result<AccessEvent>;

    /// Read the denormalized counter for a resource and kind.
    ///
    /// Returns `ResourceNotFound` when the resource row is absent.
    async fn counter_value(&self, resource_id: i64, kind: EventKind) -> Result<u64>;

    /// Count AccessEvent rows for a resource and kind.
    async fn event_count(&self, resource_id: i64, kind: EventKind) -> Result<u64>;

    /// Count audit entries for a resource and the action mapped from `kind`.
    async fn audit_count(&self, resource_id: i64, kind: EventKind) -> Result<u64>;

    /// Overwrite the counter with the authoritative AccessEvent count,
    /// atomically with respect to concurrent `record_access` calls, and
    /// return the corrected value.
    ///
    /// Returns `ResourceNotFound` when the resource row is absent.
    async fn repair_counter(&self, resource_id: i64, kind: EventKind) -> Result<u64>;
}
