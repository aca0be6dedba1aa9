//! PostgreSQL LedgerStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, PostgresQueryBuilder, Query};
use sqlx::{PgConnection, PgPool, Row};

use crate::interfaces::{LedgerStore, Result, StorageError};
use crate::model::{AccessEvent, Context, EventKind};
use crate::storage::schema::{AccessEvents, AuditEntries, CREATE_LEDGER_TABLES_POSTGRES};

/// PostgreSQL implementation of LedgerStore.
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Create a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn counter_column(kind: EventKind) -> &'static str {
        match kind {
            EventKind::View => "view_count",
            EventKind::Download => "download_count",
        }
    }

    /// Apply the three writes within an already-started transaction.
    ///
    /// The counter increment goes first: its rows-affected doubles as the
    /// resource existence check.
    async fn apply_access(
        conn: &mut PgConnection,
        resource_id: i64,
        actor_id: Option<i64>,
        kind: EventKind,
        context: &Context,
    ) -> Result<AccessEvent> {
        let col = Self::counter_column(kind);
        let query = format!(
            "UPDATE resources SET {col} = {col} + 1 WHERE resource_id = $1"
        );
        let updated = sqlx::query(&query)
            .bind(resource_id)
            .execute(&mut *conn)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::ResourceNotFound { resource_id });
        }

        let occurred_at = Utc::now();
        let occurred_at_str = occurred_at.to_rfc3339();
        let context_json = serde_json::to_string(context)?;

        let row = sqlx::query(
            "INSERT INTO access_events (resource_id, actor_id, kind, occurred_at, context) \
             VALUES ($1, $2, $3, $4, $5) RETURNING event_id",
        )
        .bind(resource_id)
        .bind(actor_id)
        .bind(kind.as_str())
        .bind(&occurred_at_str)
        .bind(&context_json)
        .fetch_one(&mut *conn)
        .await?;
        let event_id: i64 = row.get("event_id");

        sqlx::query(
            "INSERT INTO audit_entries (actor_id, action, resource_id, occurred_at, details) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(actor_id)
        .bind(kind.audit_action().as_str())
        .bind(resource_id)
        .bind(&occurred_at_str)
        .bind(&context_json)
        .execute(&mut *conn)
        .await?;

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
impl LedgerStore for PostgresLedgerStore {
    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_LEDGER_TABLES_POSTGRES)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_resource(&self, resource_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO resources (resource_id, view_count, download_count) VALUES ($1, 0, 0)",
        )
        .bind(resource_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_access(
        &self,
        resource_id: i64,
        actor_id: Option<i64>,
        kind: EventKind,
        context: &Context,
    ) -> Result<AccessEvent> {
        let mut tx = self.pool.begin().await?;

        let result = Self::apply_access(&mut tx, resource_id, actor_id, kind, context).await;

        match result {
            Ok(event) => {
                tx.commit().await?;
                Ok(event)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn counter_value(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        let col = Self::counter_column(kind);
        let query = format!("SELECT {col} FROM resources WHERE resource_id = $1");

        let row = sqlx::query(&query)
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;

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
            .to_string(PostgresQueryBuilder);

        self.count_where(query).await
    }

    async fn audit_count(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        let query = Query::select()
            .expr(Expr::col(AuditEntries::EntryId).count())
            .from(AuditEntries::Table)
            .and_where(Expr::col(AuditEntries::ResourceId).eq(resource_id))
            .and_where(Expr::col(AuditEntries::Action).eq(kind.audit_action().as_str()))
            .to_string(PostgresQueryBuilder);

        self.count_where(query).await
    }

    async fn repair_counter(&self, resource_id: i64, kind: EventKind) -> Result<u64> {
        let col = Self::counter_column(kind);
        let query = format!(
            "UPDATE resources SET {col} = \
             (SELECT COUNT(*) FROM access_events \
              WHERE resource_id = $1 AND kind = $2) \
             WHERE resource_id = $1 RETURNING {col}",
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
