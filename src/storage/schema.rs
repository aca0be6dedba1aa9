//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Resources table schema.
///
/// Only the two counter columns are ledger-owned; the wider application may
/// carry additional columns (title, uploader) that the ledger never reads.
#[derive(Iden)]
pub enum Resources {
    Table,
    #[iden = "resource_id"]
    ResourceId,
    #[iden = "view_count"]
    ViewCount,
    #[iden = "download_count"]
    DownloadCount,
}

/// Access events table schema.
#[derive(Iden)]
pub enum AccessEvents {
    Table,
    #[iden = "event_id"]
    EventId,
    #[iden = "resource_id"]
    ResourceId,
    #[iden = "actor_id"]
    ActorId,
    #[iden = "kind"]
    Kind,
    #[iden = "occurred_at"]
    OccurredAt,
    #[iden = "context"]
    Context,
}

/// Audit entries table schema.
#[derive(Iden)]
pub enum AuditEntries {
    Table,
    #[iden = "entry_id"]
    EntryId,
    #[iden = "actor_id"]
    ActorId,
    #[iden = "action"]
    Action,
    #[iden = "resource_id"]
    ResourceId,
    #[iden = "occurred_at"]
    OccurredAt,
    #[iden = "details"]
    Details,
}

/// SQL for creating the ledger tables (SQLite dialect).
pub const CREATE_LEDGER_TABLES_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS resources (
    resource_id INTEGER PRIMARY KEY,
    view_count INTEGER NOT NULL DEFAULT 0 CHECK (view_count >= 0),
    download_count INTEGER NOT NULL DEFAULT 0 CHECK (download_count >= 0)
);

CREATE TABLE IF NOT EXISTS access_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_id INTEGER NOT NULL REFERENCES resources(resource_id),
    actor_id INTEGER,
    kind TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_access_events_resource_kind
    ON access_events(resource_id, kind);

CREATE TABLE IF NOT EXISTS audit_entries (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id INTEGER,
    action TEXT NOT NULL,
    resource_id INTEGER,
    occurred_at TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_audit_entries_resource_action
    ON audit_entries(resource_id, action);
"#;

/// SQL for creating the ledger tables (PostgreSQL dialect).
pub const CREATE_LEDGER_TABLES_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS resources (
    resource_id BIGINT PRIMARY KEY,
    view_count BIGINT NOT NULL DEFAULT 0 CHECK (view_count >= 0),
    download_count BIGINT NOT NULL DEFAULT 0 CHECK (download_count >= 0)
);

CREATE TABLE IF NOT EXISTS access_events (
    event_id BIGSERIAL PRIMARY KEY,
    resource_id BIGINT NOT NULL REFERENCES resources(resource_id),
    actor_id BIGINT,
    kind TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_access_events_resource_kind
    ON access_events(resource_id, kind);

CREATE TABLE IF NOT EXISTS audit_entries (
    entry_id BIGSERIAL PRIMARY KEY,
    actor_id BIGINT,
    action TEXT NOT NULL,
    resource_id BIGINT,
    occurred_at TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_audit_entries_resource_action
    ON audit_entries(resource_id, action);
"#;
