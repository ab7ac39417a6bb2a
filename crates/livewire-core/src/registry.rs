// ── Subscription registry ──
//
// Holds every active subscription and its callback bookkeeping, routes
// subscribe requests to the right low-level channel strategy, and
// dispatches inbound events to matching callbacks. The registry
// exclusively owns all Subscription and CallbackEntry records; consumers
// interact only through these operations, and none of them ever returns
// an error across the public boundary -- misuse is downgraded, stale
// references are tolerated, and callback faults are isolated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use livewire_api::Teardown;

use crate::catalog::EventCatalog;
use crate::connection::ConnectionLifecycle;
use crate::error::CoreError;
use crate::model::{EventEnvelope, PrivilegeContext, TabId};
use crate::store::PayloadStore;

// ── SubscriptionType ─────────────────────────────────────────────────

/// Which low-level channel strategy a subscription uses, and how its
/// cleanup is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum SubscriptionType {
    /// Always-on baseline events.
    Core,
    /// Available only while the session holds elevated privilege.
    Admin,
    /// Owned by one tab; bulk-cleared on view switch.
    Tab,
    /// Ad hoc interest with generic `on` semantics.
    Standard,
}

// ── Callback bookkeeping ─────────────────────────────────────────────

/// Callback invoked for each dispatched event. The `Err` channel is the
/// fault path: dispatch logs it and carries on with the remaining
/// callbacks.
pub type EventCallback = Arc<dyn Fn(&EventEnvelope) -> Result<(), CoreError> + Send + Sync>;

/// Stored separately from [`Subscription`] so feeder subscriptions can
/// omit an entry entirely.
pub struct CallbackEntry {
    pub id: Uuid,
    pub event: String,
    pub created_at: DateTime<Utc>,
    callback: EventCallback,
}

// ── Subscription ─────────────────────────────────────────────────────

/// One listener's interest in one event.
pub struct Subscription {
    /// Unique id derived from (event, type, tab, callback) plus a
    /// monotonic sequence number -- never reused.
    pub id: String,
    pub event: String,
    pub kind: SubscriptionType,
    pub tab: Option<TabId>,
    /// Absent for feeder subscriptions, which route data into the shared
    /// payload store without an owning listener.
    pub callback_id: Option<Uuid>,
    /// Take-once slot: repeated teardown attempts are side-effect free
    /// beyond the first.
    teardown: Mutex<Option<Teardown>>,
}

impl Subscription {
    fn take_teardown(&self) -> Option<Teardown> {
        self.teardown.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Options for [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Register without callback bookkeeping; dispatch skips the
    /// subscription silently and data reaches the payload store only.
    pub feeder: bool,
}

// ── UnsubscribeGuard ─────────────────────────────────────────────────

/// Handle returned by `subscribe`. Calling [`unsubscribe`](Self::unsubscribe)
/// repeatedly is safe: teardown runs through the registry exactly once.
#[derive(Clone)]
pub struct UnsubscribeGuard {
    registry: Weak<SubscriptionRegistry>,
    id: Option<String>,
}

impl UnsubscribeGuard {
    /// A guard that does nothing, handed out when registration itself
    /// was refused (e.g. a tab subscription without a tab id).
    pub(crate) fn noop() -> Self {
        Self {
            registry: Weak::new(),
            id: None,
        }
    }

    /// The registered subscription id, or `None` for a no-op guard.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn unsubscribe(&self) {
        if let (Some(registry), Some(id)) = (self.registry.upgrade(), self.id.as_deref()) {
            registry.unsubscribe_from_event(id);
        }
    }
}

// ── Stats ────────────────────────────────────────────────────────────

/// Snapshot of live subscription counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionStats {
    pub total: usize,
    pub by_type: HashMap<SubscriptionType, usize>,
    pub by_tab: HashMap<String, usize>,
    pub by_event: HashMap<String, usize>,
}

// ── SubscriptionRegistry ─────────────────────────────────────────────

/// Central registry for all live event subscriptions.
pub struct SubscriptionRegistry {
    channels: Arc<ConnectionLifecycle>,
    store: Arc<PayloadStore>,
    /// Catalog slot, installed once during startup and replaced only on
    /// an explicit reset. Empty until then, which classifies everything
    /// as Standard.
    catalog: watch::Sender<Arc<EventCatalog>>,

    subscriptions: DashMap<String, Arc<Subscription>>,
    callbacks: DashMap<Uuid, Arc<CallbackEntry>>,
    /// Registration-ordered subscription ids per event key.
    by_event: DashMap<String, Vec<String>>,
    /// Subscription ids per owning tab.
    by_tab: DashMap<TabId, Vec<String>>,
    /// Monotonic sequence folded into every id so ids are never reused.
    sequence: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(channels: Arc<ConnectionLifecycle>, store: Arc<PayloadStore>) -> Self {
        let (catalog, _) = watch::channel(Arc::new(EventCatalog::default()));
        Self {
            channels,
            store,
            catalog,
            subscriptions: DashMap::new(),
            callbacks: DashMap::new(),
            by_event: DashMap::new(),
            by_tab: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    // ── Catalog ──────────────────────────────────────────────────────

    pub fn install_catalog(&self, catalog: Arc<EventCatalog>) {
        self.catalog.send_replace(catalog);
    }

    pub fn catalog(&self) -> Arc<EventCatalog> {
        self.catalog.borrow().clone()
    }

    // ── Subscribe ────────────────────────────────────────────────────

    /// Register interest in `event`.
    ///
    /// Requesting `Core` for a non-core event or `Admin` for a non-admin
    /// event downgrades silently to `Standard` with a warning -- this is
    /// recoverable misuse, never an error. A `Tab` request without a tab
    /// id registers nothing and returns a no-op guard.
    ///
    /// Identical (event, type, tab) registrations are deliberately NOT
    /// deduplicated: each caller owns an independent lifecycle and gets
    /// its own channel.
    pub fn subscribe(
        self: &Arc<Self>,
        event: &str,
        callback: EventCallback,
        kind: SubscriptionType,
        tab: Option<TabId>,
        opts: SubscribeOptions,
    ) -> UnsubscribeGuard {
        let callback = if opts.feeder { None } else { Some(callback) };
        self.register(event, callback, kind, tab)
    }

    /// Register a feeder: no callback bookkeeping, payloads reach the
    /// shared store only.
    pub fn subscribe_feeder(
        self: &Arc<Self>,
        event: &str,
        kind: SubscriptionType,
        tab: Option<TabId>,
    ) -> UnsubscribeGuard {
        self.register(event, None, kind, tab)
    }

    /// Convenience wrapper for core-event listeners.
    pub fn subscribe_to_core_event(
        self: &Arc<Self>,
        event: &str,
        callback: EventCallback,
    ) -> UnsubscribeGuard {
        self.register(event, Some(callback), SubscriptionType::Core, None)
    }

    /// Convenience wrapper for admin-event listeners.
    pub fn subscribe_to_admin_event(
        self: &Arc<Self>,
        event: &str,
        callback: EventCallback,
    ) -> UnsubscribeGuard {
        self.register(event, Some(callback), SubscriptionType::Admin, None)
    }

    /// Convenience wrapper for tab-scoped listeners.
    pub fn subscribe_to_tab_event(
        self: &Arc<Self>,
        event: &str,
        callback: EventCallback,
        tab: TabId,
    ) -> UnsubscribeGuard {
        self.register(event, Some(callback), SubscriptionType::Tab, Some(tab))
    }

    fn register(
        self: &Arc<Self>,
        event: &str,
        callback: Option<EventCallback>,
        requested: SubscriptionType,
        tab: Option<TabId>,
    ) -> UnsubscribeGuard {
        let kind = self.validate_type(event, requested);

        if kind == SubscriptionType::Tab && tab.is_none() {
            warn!(event, "tab subscription without a tab id, nothing registered");
            return UnsubscribeGuard::noop();
        }
        let tab = if kind == SubscriptionType::Tab { tab } else { None };

        // Four distinct channel strategies, one per subscription type.
        let teardown = match kind {
            SubscriptionType::Core => self.channels.subscribe_core(event),
            SubscriptionType::Admin => self.channels.subscribe_admin(event),
            SubscriptionType::Tab => {
                // Checked above; unreachable fallback keeps this total.
                let tab_id = tab.as_ref().map(TabId::as_str).unwrap_or_default();
                self.channels.subscribe_tab(event, tab_id)
            }
            SubscriptionType::Standard => self.channels.announce_interest(event),
        };

        let callback_id = callback.map(|callback| {
            let entry = Arc::new(CallbackEntry {
                id: Uuid::new_v4(),
                event: event.to_owned(),
                created_at: Utc::now(),
                callback,
            });
            let id = entry.id;
            self.callbacks.insert(id, entry);
            id
        });

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let id = subscription_id(event, kind, tab.as_ref(), callback_id, sequence);

        let subscription = Arc::new(Subscription {
            id: id.clone(),
            event: event.to_owned(),
            kind,
            tab: tab.clone(),
            callback_id,
            teardown: Mutex::new(Some(teardown)),
        });

        self.subscriptions.insert(id.clone(), subscription);
        self.by_event.entry(event.to_owned()).or_default().push(id.clone());
        if let Some(tab) = tab {
            self.by_tab.entry(tab).or_default().push(id.clone());
        }

        trace!(subscription = %id, %kind, "subscription registered");

        UnsubscribeGuard {
            registry: Arc::downgrade(self),
            id: Some(id),
        }
    }

    /// Downgrade category misuse to `Standard`, warning but never failing.
    fn validate_type(&self, event: &str, requested: SubscriptionType) -> SubscriptionType {
        let catalog = self.catalog();
        match requested {
            SubscriptionType::Core if !catalog.is_core_event(event) => {
                warn!(event, "requested Core for a non-core event, downgrading to Standard");
                SubscriptionType::Standard
            }
            SubscriptionType::Admin if !catalog.is_admin_event(event) => {
                warn!(event, "requested Admin for a non-admin event, downgrading to Standard");
                SubscriptionType::Standard
            }
            other => other,
        }
    }

    // ── Unsubscribe ──────────────────────────────────────────────────

    /// The only path that performs teardown.
    ///
    /// Unknown ids are tolerated quietly (duplicate or late unsubscribes
    /// during reconnection races are expected); a best-effort retract is
    /// attempted from the id's leading event-name token.
    pub fn unsubscribe_from_event(&self, subscription_id: &str) {
        let Some((_, subscription)) = self.subscriptions.remove(subscription_id) else {
            if let Some(event) = leading_event_token(subscription_id) {
                self.channels.retract_interest(&event);
            }
            debug!(subscription = subscription_id, "unsubscribe for unknown id, best-effort cleanup");
            return;
        };

        self.run_teardown(&subscription);
        self.forget(&subscription);
    }

    /// Invoke the stored teardown once; on failure fall back to a direct
    /// retract by event name. Failures are logged, never thrown.
    fn run_teardown(&self, subscription: &Subscription) {
        if let Some(teardown) = subscription.take_teardown() {
            if let Err(e) = teardown() {
                warn!(
                    subscription = %subscription.id,
                    event = %subscription.event,
                    error = %e,
                    "channel teardown failed, retracting by event name"
                );
                self.channels.retract_interest(&subscription.event);
            }
        }
    }

    /// Remove all bookkeeping for a subscription already out of the
    /// primary map.
    fn forget(&self, subscription: &Subscription) {
        if let Some(callback_id) = subscription.callback_id {
            self.callbacks.remove(&callback_id);
        }

        if let Some(mut ids) = self.by_event.get_mut(&subscription.event) {
            ids.retain(|id| id != &subscription.id);
            let now_empty = ids.is_empty();
            drop(ids);
            if now_empty {
                self.by_event.remove_if(&subscription.event, |_, ids| ids.is_empty());
            }
        }

        if let Some(tab) = &subscription.tab {
            if let Some(mut ids) = self.by_tab.get_mut(tab) {
                ids.retain(|id| id != &subscription.id);
                let now_empty = ids.is_empty();
                drop(ids);
                if now_empty {
                    // Last subscription for this tab: drop the bucket.
                    self.by_tab.remove_if(tab, |_, ids| ids.is_empty());
                }
            }
        }
    }

    // ── Bulk cleanup ─────────────────────────────────────────────────

    /// Drop every subscription owned by `tab`: one bulk transport call,
    /// then local bookkeeping removal. No-op for tabs with nothing
    /// registered.
    pub fn clear_tab_subscriptions(&self, tab: &TabId) {
        let Some((_, ids)) = self.by_tab.remove(tab) else {
            return;
        };

        self.channels.clear_tab(tab.as_str());

        for id in &ids {
            if let Some((_, subscription)) = self.subscriptions.remove(id) {
                // The bulk call already dropped the channels server-side;
                // consume the teardown so it cannot fire later.
                drop(subscription.take_teardown());
                if let Some(callback_id) = subscription.callback_id {
                    self.callbacks.remove(&callback_id);
                }
                if let Some(mut event_ids) = self.by_event.get_mut(&subscription.event) {
                    event_ids.retain(|i| i != id);
                }
            }
        }
        self.by_event.retain(|_, ids| !ids.is_empty());

        debug!(%tab, dropped = ids.len(), "tab subscriptions cleared");
    }

    /// Drop every subscription of one type, used when elevated privilege
    /// ends. Each channel is torn down individually.
    pub fn clear_subscriptions_by_type(&self, kind: SubscriptionType) {
        let ids: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &ids {
            self.unsubscribe_from_event(id);
        }

        debug!(%kind, dropped = ids.len(), "subscriptions cleared by type");
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Deliver one inbound event to every matching callback.
    ///
    /// The matching subscriptions are snapshotted before any callback
    /// runs, so a callback unsubscribing (itself or others) during the
    /// pass cannot disturb delivery to subscriptions already enumerated.
    /// A callback fault is logged and isolated; feeders are skipped
    /// silently.
    pub fn dispatch(&self, event: &str, payload: serde_json::Value, ctx: PrivilegeContext) {
        let catalog = self.catalog();
        let privileged = catalog.event_has_privileged_variant(event)
            && (ctx.elevated || ctx.payload_privileged || catalog.is_admin_event(event));

        self.store.record(event, payload.clone(), privileged);

        // Snapshot-then-iterate: collect (subscription, callback) pairs
        // up front.
        let ids: Vec<String> = match self.by_event.get(event) {
            Some(ids) => ids.clone(),
            None => return,
        };
        let snapshot: Vec<(Arc<Subscription>, Option<Arc<CallbackEntry>>)> = ids
            .iter()
            .filter_map(|id| self.subscriptions.get(id).map(|s| Arc::clone(s.value())))
            .map(|s| {
                let entry = s.callback_id.and_then(|id| {
                    self.callbacks.get(&id).map(|e| Arc::clone(e.value()))
                });
                (s, entry)
            })
            .collect();

        let envelope = EventEnvelope {
            key: event.to_owned(),
            payload,
            privileged,
            received_at: Utc::now(),
        };

        for (subscription, entry) in snapshot {
            let Some(entry) = entry else {
                trace!(subscription = %subscription.id, event, "feeder subscription, skipping");
                continue;
            };
            if let Err(e) = (entry.callback)(&envelope) {
                warn!(
                    subscription = %subscription.id,
                    event,
                    error = %e,
                    "callback fault during dispatch, remaining callbacks still run"
                );
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn subscriptions_by_tab(&self, tab: &TabId) -> Vec<Arc<Subscription>> {
        self.by_tab.get(tab).map_or_else(Vec::new, |ids| {
            ids.iter()
                .filter_map(|id| self.subscriptions.get(id).map(|s| Arc::clone(s.value())))
                .collect()
        })
    }

    pub fn subscriptions_by_event(&self, event: &str) -> Vec<Arc<Subscription>> {
        self.by_event.get(event).map_or_else(Vec::new, |ids| {
            ids.iter()
                .filter_map(|id| self.subscriptions.get(id).map(|s| Arc::clone(s.value())))
                .collect()
        })
    }

    pub fn stats(&self) -> SubscriptionStats {
        let mut stats = SubscriptionStats::default();
        for entry in self.subscriptions.iter() {
            let subscription = entry.value();
            stats.total += 1;
            *stats.by_type.entry(subscription.kind).or_default() += 1;
            *stats.by_event.entry(subscription.event.clone()).or_default() += 1;
            if let Some(tab) = &subscription.tab {
                *stats.by_tab.entry(tab.as_str().to_owned()).or_default() += 1;
            }
        }
        stats
    }
}

// ── Id helpers ───────────────────────────────────────────────────────

/// Separator between id tokens. Event keys and tab ids are opaque
/// strings, so both are escaped before joining; the leading token of an
/// id then always recovers the exact event name for best-effort cleanup.
const ID_SEPARATOR: char = '#';

fn encode_token(raw: &str) -> String {
    raw.replace('%', "%25").replace(ID_SEPARATOR, "%23")
}

fn decode_token(encoded: &str) -> String {
    encoded.replace("%23", "#").replace("%25", "%")
}

fn subscription_id(
    event: &str,
    kind: SubscriptionType,
    tab: Option<&TabId>,
    callback_id: Option<Uuid>,
    sequence: u64,
) -> String {
    let event = encode_token(event);
    let tab = tab.map_or_else(|| "-".to_owned(), |t| encode_token(t.as_str()));
    let callback = callback_id.map_or_else(|| "feeder".to_owned(), |id| id.to_string());
    format!("{event}{ID_SEPARATOR}{kind}{ID_SEPARATOR}{tab}{ID_SEPARATOR}{callback}{ID_SEPARATOR}{sequence}")
}

fn leading_event_token(subscription_id: &str) -> Option<String> {
    subscription_id
        .split(ID_SEPARATOR)
        .next()
        .filter(|s| !s.is_empty())
        .map(decode_token)
}

// ── Tests ────────────────────────────────────────────────────────────
