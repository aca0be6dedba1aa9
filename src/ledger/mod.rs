//! The counted-event ledger service.
//!
//! Records discrete access events (view, download) against a resource,
//! keeping three representations consistent as one atomic unit: an
//! append-only event row, a denormalized counter on the resource, and an
//! audit trail entry. Exposes a reconciliation check that detects drift
//! between the three, and a corrective repair that recomputes the counter
//! from the authoritative event count.
//!
//! This is the only write path for the resource counters. Application code
//! must never update `view_count`/`download_count` directly.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::interfaces::{LedgerStore, StorageError};
use crate::model::{AccessEvent, Context, EventKind, Reconciliation, MAX_CONTEXT_BYTES};

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors returned to the ledger's callers.
///
/// `StorageUnavailable` is transient: the caller may retry the whole
/// `record_access` call from scratch. The ledger itself never retries, and
/// retries are not idempotent (each successful call records a new event).
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Resource not found: resource_id={resource_id}")]
    ResourceNotFound { resource_id: i64 },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ResourceNotFound { resource_id } => {
                LedgerError::ResourceNotFound { resource_id }
            }
            other => LedgerError::StorageUnavailable(other),
        }
    }
}

/// The counted-event ledger.
///
/// Thin stateless facade over a [`LedgerStore`]; safe to share and call
/// concurrently from independent request handlers. Operations perform
/// durable-storage I/O and may suspend; callers must not hold locks across
/// them.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    /// Create a ledger over the given store.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Record one access against a resource.
    ///
    /// On success exactly three durable effects are visible: a new
    /// AccessEvent row, the matching counter incremented by one, and a
    /// matching audit entry — all committed as a single atomic unit. On any
    /// error, zero effects are left behind.
    pub async fn record_access(
        &self,
        resource_id: i64,
        actor_id: Option<i64>,
        kind: EventKind,
        context: &Context,
    ) -> Result<AccessEvent> {
        let context_bytes = serde_json::to_vec(context)
            .map_err(|e| LedgerError::InvalidInput {
                reason: format!("unserializable context: {e}"),
            })?
            .len();
        if context_bytes > MAX_CONTEXT_BYTES {
            return Err(LedgerError::InvalidInput {
                reason: format!(
                    "context too large: {context_bytes} bytes exceeds {MAX_CONTEXT_BYTES}"
                ),
            });
        }

        let event = self
            .store
            .record_access(resource_id, actor_id, kind, context)
            .await?;

        debug!(
            resource_id,
            actor_id,
            kind = %kind,
            event_id = event.event_id,
            "Recorded access"
        );

        Ok(event)
    }

    /// Check the three-way count invariant for one resource and kind.
    ///
    /// Read-only; never mutates state. The three counts are computed
    /// independently: a scan of AccessEvent rows, the resource counter
    /// field, and a scan of audit entries.
    pub async fn reconcile(&self, resource_id: i64, kind: EventKind) -> Result<Reconciliation> {
        // Counter read first: it doubles as the resource existence check.
        let counter_value = self.store.counter_value(resource_id, kind).await?;
        let event_count = self.store.event_count(resource_id, kind).await?;
        let audit_count = self.store.audit_count(resource_id, kind).await?;

        let report = Reconciliation::new(event_count, counter_value, audit_count);
        if !report.in_sync {
            warn!(
                resource_id,
                kind = %kind,
                event_count,
                counter_value,
                audit_count,
                "Ledger drift detected"
            );
        }

        Ok(report)
    }

    /// Recompute a drifted counter from the authoritative AccessEvent count
    /// and write it back, returning the corrected value.
    ///
    /// Idempotent: running it twice in a row produces the same value. Audit
    /// entries are never rewritten; divergence there is reported by
    /// [`Ledger::reconcile`] but not corrected, since the trail is
    /// append-only.
    pub async fn repair(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        let corrected = self.store.repair_counter(resource_id, kind).await?;
        info!(resource_id, kind = %kind, corrected, "Repaired counter from event count");
        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockLedgerStore;
    use serde_json::json;

    fn ledger_with_mock() -> (Ledger, Arc<MockLedgerStore>) {
        let store = Arc::new(MockLedgerStore::new());
        (Ledger::new(store.clone()), store)
    }

    fn small_context() -> Context {
        let mut context = Context::new();
        context.insert("ip".to_string(), json!("127.0.0.1"));
        context
    }

    #[tokio::test]
    async fn test_record_then_reconcile_in_sync() {
        let (ledger, store) = ledger_with_mock();
        store.create_resource(1).await.unwrap();

        for _ in 0..4 {
            ledger
                .record_access(1, Some(9), EventKind::View, &small_context())
                .await
                .unwrap();
        }

        let report = ledger.reconcile(1, EventKind::View).await.unwrap();
        assert_eq!(report.event_count, 4);
        assert_eq!(report.counter_value, 4);
        assert_eq!(report.audit_count, 4);
        assert!(report.in_sync);
    }

    #[tokio::test]
    async fn test_audit_entry_written_per_event() {
        let (ledger, store) = ledger_with_mock();
        store.create_resource(1).await.unwrap();

        let event = ledger
            .record_access(1, Some(2), EventKind::Download, &small_context())
            .await
            .unwrap();

        let entries = store.audit_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].resource_id, Some(1));
        assert_eq!(entries[0].action, crate::model::AuditAction::ResourceDownloaded);
        assert_eq!(entries[0].occurred_at, event.occurred_at);
    }

    #[tokio::test]
    async fn test_missing_resource_maps_to_not_found() {
        let (ledger, _store) = ledger_with_mock();

        let err = ledger
            .record_access(999999, Some(1), EventKind::View, &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ResourceNotFound { resource_id: 999999 }
        ));

        let err = ledger.reconcile(999999, EventKind::View).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ResourceNotFound { resource_id: 999999 }
        ));
    }

    #[tokio::test]
    async fn test_oversized_context_rejected_before_storage() {
        let (ledger, store) = ledger_with_mock();
        store.create_resource(1).await.unwrap();

        let mut context = Context::new();
        context.insert("blob".to_string(), json!("x".repeat(MAX_CONTEXT_BYTES)));

        let err = ledger
            .record_access(1, None, EventKind::View, &context)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput { .. }));

        // Nothing reached the store.
        let report = ledger.reconcile(1, EventKind::View).await.unwrap();
        assert_eq!(report.event_count, 0);
        assert!(report.in_sync);
    }

    #[tokio::test]
    async fn test_storage_failure_maps_to_unavailable() {
        let (ledger, store) = ledger_with_mock();
        store.create_resource(1).await.unwrap();
        store.set_fail_on_record(true).await;

        let err = ledger
            .record_access(1, None, EventKind::View, &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));

        // A failed call recorded nothing.
        store.set_fail_on_record(false).await;
        let report = ledger.reconcile(1, EventKind::View).await.unwrap();
        assert_eq!(report.event_count, 0);
        assert_eq!(report.counter_value, 0);
    }

    #[tokio::test]
    async fn test_legacy_drift_reconcile_and_repair() {
        let (ledger, store) = ledger_with_mock();
        store.create_resource(22).await.unwrap();
        store.force_counter(22, EventKind::View, 5).await;

        let report = ledger.reconcile(22, EventKind::View).await.unwrap();
        assert_eq!(report.event_count, 0);
        assert_eq!(report.counter_value, 5);
        assert_eq!(report.audit_count, 0);
        assert!(!report.in_sync);

        assert_eq!(ledger.repair(22, EventKind::View).await.unwrap(), 0);
        assert_eq!(ledger.repair(22, EventKind::View).await.unwrap(), 0);

        let report = ledger.reconcile(22, EventKind::View).await.unwrap();
        assert_eq!(report.counter_value, 0);
        assert!(report.in_sync);
    }

    #[cfg(feature = "sqlite")]
    mod sqlite_backed {
        use super::*;
        use crate::storage::SqliteLedgerStore;
        use sqlx::sqlite::SqlitePoolOptions;

        async fn sqlite_ledger() -> (Ledger, Arc<SqliteLedgerStore>) {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .unwrap();
            let store = Arc::new(SqliteLedgerStore::new(pool));
            store.init().await.unwrap();
            (Ledger::new(store.clone()), store)
        }

        #[tokio::test]
        async fn test_three_sequential_downloads() {
            let (ledger, store) = sqlite_ledger().await;
            store.create_resource(22).await.unwrap();

            for _ in 0..3 {
                ledger
                    .record_access(22, Some(7), EventKind::Download, &small_context())
                    .await
                    .unwrap();
            }

            let report = ledger.reconcile(22, EventKind::Download).await.unwrap();
            assert_eq!(report.event_count, 3);
            assert_eq!(report.counter_value, 3);
            assert_eq!(report.audit_count, 3);
            assert!(report.in_sync);

            // Views untouched by download traffic.
            let report = ledger.reconcile(22, EventKind::View).await.unwrap();
            assert_eq!(report.counter_value, 0);
            assert!(report.in_sync);
        }

        #[tokio::test]
        async fn test_concurrent_views_reconcile_clean() {
            let (ledger, store) = sqlite_ledger().await;
            store.create_resource(1).await.unwrap();

            let tasks: Vec<_> = (0..16)
                .map(|i| {
                    let ledger = ledger.clone();
                    tokio::spawn(async move {
                        ledger
                            .record_access(1, Some(i), EventKind::View, &Context::new())
                            .await
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }

            let report = ledger.reconcile(1, EventKind::View).await.unwrap();
            assert_eq!(report.counter_value, 16);
            assert!(report.in_sync);
        }
    }
}
