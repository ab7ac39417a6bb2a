// ── Shared domain types ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── TabId ────────────────────────────────────────────────────────────

/// Ownership key for tab-scoped subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(String);

impl TabId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TabId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<&ViewId> for TabId {
    fn from(view: &ViewId) -> Self {
        Self(view.as_str().to_owned())
    }
}

// ── ViewId ───────────────────────────────────────────────────────────

/// Identifies a navigable view. Views and tab-scoped subscription buckets
/// correspond one to one; the fallback placeholder is the only view with
/// no subscriptions of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewId(String);

/// Name of the safe placeholder view the fallback controller navigates to.
pub const FALLBACK_VIEW: &str = "fallback";

impl ViewId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The safe placeholder view.
    pub fn fallback() -> Self {
        Self(FALLBACK_VIEW.to_owned())
    }

    pub fn is_fallback(&self) -> bool {
        self.0 == FALLBACK_VIEW
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// ── EventEnvelope ────────────────────────────────────────────────────

/// What a registered callback receives for one dispatched event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event key this payload belongs to.
    pub key: String,

    /// Opaque payload as delivered by the server.
    pub payload: serde_json::Value,

    /// Whether this delivery carries the privileged variant.
    pub privileged: bool,

    /// When the layer received the event.
    pub received_at: DateTime<Utc>,
}

// ── PrivilegeContext ─────────────────────────────────────────────────

/// Caller-side privilege facts consulted when deciding which payload
/// variant an event is stored and dispatched as.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivilegeContext {
    /// The session currently holds elevated privilege.
    pub elevated: bool,

    /// The payload itself arrived explicitly marked privileged.
    pub payload_privileged: bool,
}
