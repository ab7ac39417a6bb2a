// ── Shared payload store ──
//
// Latest payload per event key, kept in standard and privileged variants.
// Feeder subscriptions route data here without an owning callback; views
// read it on demand. Mutated only through its own operations.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

/// Latest stored payload for one event key.
#[derive(Debug, Clone, Default)]
struct StoredPayload {
    standard: Option<serde_json::Value>,
    privileged: Option<serde_json::Value>,
}

/// Latest-value cache fed by dispatch.
pub struct PayloadStore {
    latest: DashMap<String, StoredPayload>,
    last_event_at: watch::Sender<Option<DateTime<Utc>>>,
}

impl PayloadStore {
    pub fn new() -> Self {
        let (last_event_at, _) = watch::channel(None);
        Self {
            latest: DashMap::new(),
            last_event_at,
        }
    }

    /// Record the latest payload for `event`, in the variant slot the
    /// dispatch rules selected.
    pub fn record(&self, event: &str, payload: serde_json::Value, privileged: bool) {
        let mut entry = self.latest.entry(event.to_owned()).or_default();
        if privileged {
            entry.privileged = Some(payload);
        } else {
            entry.standard = Some(payload);
        }
        drop(entry);
        self.last_event_at.send_replace(Some(Utc::now()));
    }

    /// Read the latest payload for `event`. With `allow_privileged`, the
    /// privileged variant wins when both are present.
    pub fn latest(&self, event: &str, allow_privileged: bool) -> Option<serde_json::Value> {
        let entry = self.latest.get(event)?;
        if allow_privileged {
            entry.privileged.clone().or_else(|| entry.standard.clone())
        } else {
            entry.standard.clone()
        }
    }

    /// Discard every privileged payload variant. Called when elevated
    /// privilege ends; standard variants are untouched.
    pub fn purge_privileged(&self) {
        let mut purged = 0usize;
        for mut entry in self.latest.iter_mut() {
            if entry.privileged.take().is_some() {
                purged += 1;
            }
        }
        // Drop entries that held only a privileged variant.
        self.latest
            .retain(|_, payload| payload.standard.is_some() || payload.privileged.is_some());
        tracing::debug!(purged, "privileged payload cache cleared");
    }

    /// Number of event keys with at least one stored variant.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// When the most recent event was recorded, if any.
    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        *self.last_event_at.borrow()
    }

    /// Observe recording activity.
    pub fn last_event_changed(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_event_at.subscribe()
    }
}

impl Default for PayloadStore {
    fn default() -> Self {
        Self::new()
    }
}
