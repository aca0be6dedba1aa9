//! SQLite LedgerStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::interfaces::{LedgerStore, Result, StorageError};
use crate::model::{AccessEvent, Context, EventKind};
use crate::storage::schema::{
    AccessEvents, AuditEntries, Resources, CREATE_LEDGER_TABLES_SQLITE,
};

/// SQLite implementation of LedgerStore.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Create a new SQLite ledger store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn counter_column(kind: EventKind) -> Resources {
        match kind {
            EventKind::View => Resources::ViewCount,
            EventKind::Download => Resources::DownloadCount,
        }
    }

    /// Apply the three writes within an already-started transaction.
    ///
    /// Order matters for the existence check: the counter increment goes
    /// first because its rows-affected tells us whether the resource exists
    /// without a separate SELECT.
    async fn apply_access(
        conn: &mut SqliteConnection,
        resource_id: i64,
        actor_id: Option<i64>,
        kind: EventKind,
        context: &Context,
    ) -> Result<AccessEvent> {
        let counter = Self::counter_column(kind);
        let query = Query::update()
            .table(Resources::Table)
            .value(
                Self::counter_column(kind),
                Expr::col(counter).add(1),
            )
            .and_where(Expr::col(Resources::ResourceId).eq(resource_id))
            .to_string(SqliteQueryBuilder);

        let updated = sqlx::query(&query).execute(&mut *conn).await?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::ResourceNotFound { resource_id });
        }

        let occurred_at = Utc::now();
        let occurred_at_str = occurred_at.to_rfc3339();
        let context_json = serde_json::to_string(context)?;

        let query = Query::insert()
            .into_table(AccessEvents::Table)
            .columns([
                AccessEvents::ResourceId,
                AccessEvents::ActorId,
                AccessEvents::Kind,
                AccessEvents::OccurredAt,
                AccessEvents::Context,
            ])
            .values_panic([
                resource_id.into(),
                actor_id.into(),
                kind.as_str().into(),
                occurred_at_str.clone().into(),
                context_json.clone().into(),
            ])
            .to_string(SqliteQueryBuilder);

        let inserted = sqlx::query(&query).execute(&mut *conn).await?;
        let event_id = inserted.last_insert_rowid();

        let query = Query::insert()
            .into_table(AuditEntries::Table)
            .columns([
                AuditEntries::ActorId,
                AuditEntries::Action,
                AuditEntries::ResourceId,
                AuditEntries::OccurredAt,
                AuditEntries::Details,
            ])
            .values_panic([
                actor_id.into(),
                kind.audit_action().as_str().into(),
                resource_id.into(),
                occurred_at_str.into(),
                context_json.into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;

        Ok(AccessEvent {
            event_id,
            resource_id,
            actor_id,
            kind,
            occurred_at,
            context: context.clone(),
        })
    }

    async fn count_where(&self, query: String) -> Result<u64> {
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_LEDGER_TABLES_SQLITE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_resource(&self, resource_id: i64) -> Result<()> {
        let query = Query::insert()
            .into_table(Resources::Table)
            .columns([
                Resources::ResourceId,
                Resources::ViewCount,
                Resources::DownloadCount,
            ])
            .values_panic([resource_id.into(), 0.into(), 0.into()])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_access(
        &self,
        resource_id: i64,
        actor_id: Option<i64>,
        kind: EventKind,
        context: &Context,
    ) -> Result<AccessEvent> {
        // BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
        // when concurrent DEFERRED transactions race to upgrade from shared to
        // exclusive.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::apply_access(&mut conn, resource_id, actor_id, kind, context).await;

        match result {
            Ok(event) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(event)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn counter_value(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        let counter = Self::counter_column(kind);
        let query = Query::select()
            .column(counter)
            .from(Resources::Table)
            .and_where(Expr::col(Resources::ResourceId).eq(resource_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => {
                let value: i64 = row.get(0);
                u64::try_from(value).map_err(|_| {
                    StorageError::CorruptRow(format!(
                        "negative counter for resource {resource_id}: {value}"
                    ))
                })
            }
            None => Err(StorageError::ResourceNotFound { resource_id }),
        }
    }

    async fn event_count(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        let query = Query::select()
            .expr(Expr::col(AccessEvents::EventId).count())
            .from(AccessEvents::Table)
            .and_where(Expr::col(AccessEvents::ResourceId).eq(resource_id))
            .and_where(Expr::col(AccessEvents::Kind).eq(kind.as_str()))
            .to_string(SqliteQueryBuilder);

        self.count_where(query).await
    }

    async fn audit_count(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        let query = Query::select()
            .expr(Expr::col(AuditEntries::EntryId).count())
            .from(AuditEntries::Table)
            .and_where(Expr::col(AuditEntries::ResourceId).eq(resource_id))
            .and_where(Expr::col(AuditEntries::Action).eq(kind.audit_action().as_str()))
            .to_string(SqliteQueryBuilder);

        self.count_where(query).await
    }

    async fn repair_counter(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        // Single statement with a correlated subquery: atomic with respect to
        // concurrent record_access calls, idempotent by construction.
        let counter = Self::counter_column(kind);
        let query = format!(
            "UPDATE resources SET {col} = \
             (SELECT COUNT(*) FROM access_events \
              WHERE resource_id = $1 AND kind = $2) \
             WHERE resource_id = $1 RETURNING {col}",
            col = sea_query::Iden::to_string(&counter),
        );

        let row = sqlx::query(&query)
            .bind(resource_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let value: i64 = row.get(0);
                Ok(value as u64)
            }
            None => Err(StorageError::ResourceNotFound { resource_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    // A single connection so every pooled handle sees the same in-memory
    // database.
    async fn test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn test_store() -> SqliteLedgerStore {
        let store = SqliteLedgerStore::new(test_pool().await);
        store.init().await.unwrap();
        store
    }

    fn test_context() -> Context {
        let mut context = Context::new();
        context.insert("ip".to_string(), json!("127.0.0.1"));
        context.insert("client".to_string(), json!("test-agent/1.0"));
        context
    }

    #[tokio::test]
    async fn test_record_access_applies_all_three_writes() {
        let store = test_store().await;
        store.create_resource(1).await.unwrap();

        let event = store
            .record_access(1, Some(7), EventKind::View, &test_context())
            .await
            .unwrap();

        assert_eq!(event.resource_id, 1);
        assert_eq!(event.actor_id, Some(7));
        assert_eq!(event.kind, EventKind::View);
        assert_eq!(store.counter_value(1, EventKind::View).await.unwrap(), 1);
        assert_eq!(store.event_count(1, EventKind::View).await.unwrap(), 1);
        assert_eq!(store.audit_count(1, EventKind::View).await.unwrap(), 1);
        // The other counter is untouched
        assert_eq!(store.counter_value(1, EventKind::Download).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_event_ids_are_monotonic() {
        let store = test_store().await;
        store.create_resource(1).await.unwrap();

        let first = store
            .record_access(1, None, EventKind::View, &Context::new())
            .await
            .unwrap();
        let second = store
            .record_access(1, None, EventKind::View, &Context::new())
            .await
            .unwrap();

        assert!(second.event_id > first.event_id);
    }

    #[tokio::test]
    async fn test_audit_entry_shares_event_timestamp() {
        let store = test_store().await;
        store.create_resource(1).await.unwrap();

        let event = store
            .record_access(1, Some(3), EventKind::Download, &Context::new())
            .await
            .unwrap();

        let row = sqlx::query(
            "SELECT occurred_at, action, actor_id FROM audit_entries WHERE resource_id = 1",
        )
        .fetch_one(&store.pool)
        .await
        .unwrap();

        let occurred_at: String = row.get("occurred_at");
        let action: String = row.get("action");
        let actor_id: Option<i64> = row.get("actor_id");

        assert_eq!(occurred_at, event.occurred_at.to_rfc3339());
        assert_eq!(action, "resource_downloaded");
        assert_eq!(actor_id, Some(3));
    }

    #[tokio::test]
    async fn test_missing_resource_leaves_no_effects() {
        let store = test_store().await;

        let err = store
            .record_access(999999, Some(1), EventKind::View, &Context::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::ResourceNotFound { resource_id: 999999 }
        ));
        assert_eq!(store.event_count(999999, EventKind::View).await.unwrap(), 0);
        assert_eq!(store.audit_count(999999, EventKind::View).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mid_transaction_failure_rolls_back_everything() {
        let store = test_store().await;
        store.create_resource(1).await.unwrap();

        // Make the last write of the unit fail: the audit insert hits a
        // missing table after the counter update and event insert succeeded.
        sqlx::query("DROP TABLE audit_entries")
            .execute(&store.pool)
            .await
            .unwrap();

        let result = store
            .record_access(1, Some(7), EventKind::View, &test_context())
            .await;
        assert!(matches!(result, Err(StorageError::Database(_))));

        // Zero of the three effects are visible, never one or two.
        assert_eq!(store.counter_value(1, EventKind::View).await.unwrap(), 0);
        assert_eq!(store.event_count(1, EventKind::View).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_no_updates() {
        let store = std::sync::Arc::new(test_store().await);
        store.create_resource(1).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_access(1, Some(i), EventKind::View, &Context::new())
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.counter_value(1, EventKind::View).await.unwrap(), 20);
        assert_eq!(store.event_count(1, EventKind::View).await.unwrap(), 20);
        assert_eq!(store.audit_count(1, EventKind::View).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_repair_counter_recomputes_from_events() {
        let store = test_store().await;
        store.create_resource(22).await.unwrap();

        // Legacy drift: counter bumped outside the ledger, no events behind it.
        sqlx::query("UPDATE resources SET view_count = 5 WHERE resource_id = 22")
            .execute(&store.pool)
            .await
            .unwrap();
        assert_eq!(store.counter_value(22, EventKind::View).await.unwrap(), 5);

        let repaired = store.repair_counter(22, EventKind::View).await.unwrap();
        assert_eq!(repaired, 0);

        // Idempotent: a second run yields the same value.
        let repaired = store.repair_counter(22, EventKind::View).await.unwrap();
        assert_eq!(repaired, 0);
        assert_eq!(store.counter_value(22, EventKind::View).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repair_counter_missing_resource() {
        let store = test_store().await;

        let err = store.repair_counter(404, EventKind::View).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::ResourceNotFound { resource_id: 404 }
        ));
    }

    #[tokio::test]
    async fn test_counter_value_missing_resource() {
        let store = test_store().await;

        let err = store.counter_value(404, EventKind::Download).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::ResourceNotFound { resource_id: 404 }
        ));
    }

    #[tokio::test]
    async fn test_context_round_trips_through_storage() {
        let store = test_store().await;
        store.create_resource(1).await.unwrap();

        let context = test_context();
        store
            .record_access(1, None, EventKind::View, &context)
            .await
            .unwrap();

        let row = sqlx::query("SELECT context FROM access_events WHERE resource_id = 1")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let stored: String = row.get("context");
        let parsed: Context = serde_json::from_str(&stored).unwrap();

        assert_eq!(parsed, context);
    }
}
