//! Mock storage implementations for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::interfaces::{LedgerStore, Result, StorageError};
use crate::model::{AccessEvent, AuditEntry, Context, EventKind};

/// Counters for one resource row.
#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    view_count: u64,
    download_count: u64,
}

/// All ledger state behind a single lock, so the tri-write is trivially
/// atomic.
#[derive(Default)]
struct State {
    resources: HashMap<i64, Counters>,
    events: Vec<AccessEvent>,
    audit: Vec<AuditEntry>,
}

/// Mock ledger store that keeps everything in memory.
#[derive(Default)]
pub struct MockLedgerStore {
    state: RwLock<State>,
    fail_on_record: RwLock<bool>,
    fail_on_read: RwLock<bool>,
}

impl MockLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `record_access` calls fail with a database error,
    /// leaving no effects behind.
    pub async fn set_fail_on_record(&self, fail: bool) {
        *self.fail_on_record.write().await = fail;
    }

    /// Make read-side operations fail with a database error.
    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    /// Seed a drifted counter directly, bypassing the ledger write path.
    /// Simulates legacy writes that predate the ledger.
    pub async fn force_counter(&self, resource_id: i64, kind: EventKind, value: u64) {
        let mut state = self.state.write().await;
        let counters = state.resources.entry(resource_id).or_default();
        match kind {
            EventKind::View => counters.view_count = value,
            EventKind::Download => counters.download_count = value,
        }
    }

    /// Snapshot of recorded audit entries, for assertions.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.clone()
    }

    fn unavailable() -> StorageError {
        StorageError::Database(sqlx::Error::PoolClosed)
    }
}

#[async_trait]
impl LedgerStore for MockLedgerStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn create_resource(&self, resource_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        state.resources.entry(resource_id).or_default();
        Ok(())
    }

    async fn record_access(
        &self,
        resource_id: i64,
        actor_id: Option<i64>,
        kind: EventKind,
        context: &Context,
    ) -> Result<AccessEvent> {
        if *self.fail_on_record.read().await {
            return Err(Self::unavailable());
        }

        let mut state = self.state.write().await;
        let counters = state
            .resources
            .get_mut(&resource_id)
            .ok_or(StorageError::ResourceNotFound { resource_id })?;
        match kind {
            EventKind::View => counters.view_count += 1,
            EventKind::Download => counters.download_count += 1,
        }

        let occurred_at = Utc::now();
        let event = AccessEvent {
            event_id: state.events.len() as i64 + 1,
            resource_id,
            actor_id,
            kind,
            occurred_at,
            context: context.clone(),
        };
        state.events.push(event.clone());

        let entry = AuditEntry {
            entry_id: state.audit.len() as i64 + 1,
            actor_id,
            action: kind.audit_action(),
            resource_id: Some(resource_id),
            occurred_at,
            details: serde_json::Value::Object(context.clone()),
        };
        state.audit.push(entry);

        Ok(event)
    }

    async fn counter_value(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        if *self.fail_on_read.read().await {
            return Err(Self::unavailable());
        }

        let state = self.state.read().await;
        let counters = state
            .resources
            .get(&resource_id)
            .ok_or(StorageError::ResourceNotFound { resource_id })?;
        Ok(match kind {
            EventKind::View => counters.view_count,
            EventKind::Download => counters.download_count,
        })
    }

    async fn event_count(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        if *self.fail_on_read.read().await {
            return Err(Self::unavailable());
        }

        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.resource_id == resource_id && e.kind == kind)
            .count() as u64)
    }

    async fn audit_count(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        if *self.fail_on_read.read().await {
            return Err(Self::unavailable());
        }

        let action = kind.audit_action();
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.resource_id == Some(resource_id) && e.action == action)
            .count() as u64)
    }

    async fn repair_counter(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        if *self.fail_on_read.read().await {
            return Err(Self::unavailable());
        }

        let mut state = self.state.write().await;
        let authoritative = state
            .events
            .iter()
            .filter(|e| e.resource_id == resource_id && e.kind == kind)
            .count() as u64;
        let counters = state
            .resources
            .get_mut(&resource_id)
            .ok_or(StorageError::ResourceNotFound { resource_id })?;
        match kind {
            EventKind::View => counters.view_count = authoritative,
            EventKind::Download => counters.download_count = authoritative,
        }
        Ok(authoritative)
    }
}
