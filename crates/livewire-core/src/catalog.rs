// ── Event categorization tables ──
//
// Pure lookup tables deciding which event keys are core (always
// subscribed), admin-only, tab-scoped, and which are exempt from
// privileged payload variants. Loaded once at startup from the document
// the server serves and treated as immutable for the process lifetime --
// the predicates here are referentially transparent.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::CoreError;

/// Immutable event categorization tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventCatalog {
    /// Always-subscribed events needed for baseline application state,
    /// in subscription order.
    #[serde(default)]
    core: Vec<String>,

    /// Events available only while the session holds elevated privilege,
    /// in subscription order.
    #[serde(default)]
    admin: Vec<String>,

    /// Events that never have a privileged payload variant, even while
    /// the session is elevated.
    #[serde(default, rename = "no_privileged_variant")]
    exempt: HashSet<String>,

    /// Per-tab required events, keyed by tab id.
    #[serde(default)]
    tabs: HashMap<String, Vec<String>>,
}

impl EventCatalog {
    /// Build a catalog directly from its tables. Used in tests and by
    /// embedders that ship a static catalog.
    pub fn new(
        core: Vec<String>,
        admin: Vec<String>,
        exempt: HashSet<String>,
        tabs: HashMap<String, Vec<String>>,
    ) -> Self {
        Self { core, admin, exempt, tabs }
    }

    /// Parse the catalog document served by the controller.
    pub fn from_document(document: serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(document).map_err(|e| CoreError::CatalogUnavailable {
            message: e.to_string(),
        })
    }

    // ── Predicates ───────────────────────────────────────────────────

    pub fn is_core_event(&self, event: &str) -> bool {
        self.core.iter().any(|e| e == event)
    }

    pub fn is_admin_event(&self, event: &str) -> bool {
        self.admin.iter().any(|e| e == event)
    }

    /// Whether an event can carry a privileged payload variant. Events on
    /// the exemption list always dispatch the standard payload, elevated
    /// or not.
    pub fn event_has_privileged_variant(&self, event: &str) -> bool {
        !self.exempt.contains(event)
    }

    // ── Table accessors ──────────────────────────────────────────────

    /// Core events in subscription order.
    pub fn core_events(&self) -> &[String] {
        &self.core
    }

    /// Admin-only events in subscription order.
    pub fn admin_events(&self) -> &[String] {
        &self.admin
    }

    /// Required events for one tab. Unknown tabs have no required events.
    pub fn tab_events(&self, tab: &str) -> &[String] {
        self.tabs.get(tab).map_or(&[], Vec::as_slice)
    }
}
