//! Domain types for the counted-event ledger.
//!
//! Identifiers are `i64` to match the relational schema the ledger fronts
//! (`resources`, `users`, integer keys throughout).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum serialized size of an access-event context payload, in bytes.
pub const MAX_CONTEXT_BYTES: usize = 4096;

/// Free-form auxiliary data attached to an access event (ip address,
/// client string). Stored opaquely, never interpreted.
pub type Context = Map<String, Value>;

/// The kind of a recorded access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    View,
    Download,
}

impl EventKind {
    /// Stable textual form, used for storage and CLI arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::View => "view",
            EventKind::Download => "download",
        }
    }

    /// The audit action written alongside an event of this kind.
    pub fn audit_action(&self) -> AuditAction {
        match self {
            EventKind::View => AuditAction::ResourceViewed,
            EventKind::Download => AuditAction::ResourceDownloaded,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unparseable event kinds at the boundary (HTTP path segments,
/// CLI arguments).
#[derive(Debug, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl std::str::FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(EventKind::View),
            "download" => Ok(EventKind::Download),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

/// Actions recorded in the system-wide activity trail.
///
/// The ledger only ever writes `ResourceViewed` and `ResourceDownloaded`;
/// the remaining variants belong to the wrapping application (login flow,
/// resource CRUD) which shares the same audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    Logout,
    ResourceCreated,
    ResourceUpdated,
    ResourceDeleted,
    ResourceViewed,
    ResourceDownloaded,
}

impl AuditAction {
    /// Stable textual form, used for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::ResourceCreated => "resource_created",
            AuditAction::ResourceUpdated => "resource_updated",
            AuditAction::ResourceDeleted => "resource_deleted",
            AuditAction::ResourceViewed => "resource_viewed",
            AuditAction::ResourceDownloaded => "resource_downloaded",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable record of a single resource access.
///
/// `event_id` is assigned at insert time and monotonically increasing;
/// insertion order is the only ordering guarantee. `occurred_at` is set by
/// the store, never by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessEvent {
    pub event_id: i64,
    pub resource_id: i64,
    /// Acting user, or `None` for anonymous access.
    pub actor_id: Option<i64>,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    pub context: Context,
}

/// One immutable record in the system-wide activity trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub entry_id: i64,
    pub actor_id: Option<i64>,
    pub action: AuditAction,
    pub resource_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub details: Value,
}

/// Result of a three-way drift check for one resource and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Authoritative count of AccessEvent rows.
    pub event_count: u64,
    /// Denormalized counter on the resource row.
    pub counter_value: u64,
    /// Count of matching audit entries.
    pub audit_count: u64,
    /// True when all three agree.
    pub in_sync: bool,
}

impl Reconciliation {
    pub fn new(event_count: u64, counter_value: u64, audit_count: u64) -> Self {
        Self {
            event_count,
            counter_value,
            audit_count,
            in_sync: event_count == counter_value && counter_value == audit_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_round_trip() {
        for kind in [EventKind::View, EventKind::Download] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_event_kind_rejects_unknown() {
        let err = "edit".parse::<EventKind>().unwrap_err();
        assert_eq!(err.0, "edit");
    }

    #[test]
    fn test_audit_action_mapping() {
        assert_eq!(EventKind::View.audit_action(), AuditAction::ResourceViewed);
        assert_eq!(
            EventKind::Download.audit_action(),
            AuditAction::ResourceDownloaded
        );
    }

    #[test]
    fn test_reconciliation_in_sync() {
        assert!(Reconciliation::new(3, 3, 3).in_sync);
        assert!(!Reconciliation::new(0, 5, 0).in_sync);
        assert!(!Reconciliation::new(3, 3, 2).in_sync);
    }
}
