// ── Connection lifecycle ──
//
// Owns the underlying transport: bounded connect, observable connection
// state, per-channel subscribe/unsubscribe with reconnect debouncing, and
// the pump task that drains inbound events into the registry's dispatch
// path. Transport faults never propagate to consumers -- they surface as
// state transitions and fallback escalation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livewire_api::{EventTransport, Teardown};

use crate::config::LinkConfig;
use crate::error::CoreError;
use crate::fallback::FallbackController;
use crate::model::PrivilegeContext;
use crate::registry::SubscriptionRegistry;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

// ── ConnectionLifecycle ──────────────────────────────────────────────

/// Lifecycle wrapper around the wire transport.
///
/// All channel traffic from the registry flows through here so the
/// debounce window can absorb duplicate subscribe requests during rapid
/// view-switch churn and reconnection races.
pub struct ConnectionLifecycle {
    transport: Arc<dyn EventTransport>,
    state: watch::Sender<ConnectionState>,
    /// Wire-channel bookkeeping per debounce key (`scope#event#tab`).
    ledger: Arc<DashMap<String, ChannelEntry>>,
    debounce_window: Duration,
    connect_timeout: Duration,
    cancel: CancellationToken,
}

/// Bookkeeping for one debounce key.
struct ChannelEntry {
    last_announce: Instant,
    /// Live wire channels for this key: announces minus teardowns.
    wire: usize,
}

impl ConnectionLifecycle {
    pub fn new(transport: Arc<dyn EventTransport>, config: &LinkConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            state,
            ledger: Arc::new(DashMap::new()),
            debounce_window: config.debounce_window,
            connect_timeout: config.connect_timeout,
            cancel: CancellationToken::new(),
        }
    }

    // ── Connect / disconnect ─────────────────────────────────────────

    /// Open the transport, bounded by the configured connect timeout.
    /// On expiry or failure the state moves to `Failed` and the error is
    /// returned for the caller (startup orchestrator) to act on.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.state.send_replace(ConnectionState::Connecting);

        match tokio::time::timeout(self.connect_timeout, self.transport.connect()).await {
            Ok(Ok(())) => {
                self.state.send_replace(ConnectionState::Connected);
                info!("event transport connected");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state.send_replace(ConnectionState::Failed);
                Err(e.into())
            }
            Err(_) => {
                self.state.send_replace(ConnectionState::Failed);
                Err(CoreError::Timeout {
                    timeout_secs: self.connect_timeout.as_secs(),
                })
            }
        }
    }

    /// Close the transport and stop background pumps.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        self.transport.disconnect().await;
        self.state.send_replace(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    // ── Privileged operations (delegated) ────────────────────────────

    pub async fn authenticate_as_admin(&self, token: &str) -> Result<bool, CoreError> {
        Ok(self.transport.authenticate_as_admin(token).await?)
    }

    pub async fn fetch_catalog(&self) -> Result<serde_json::Value, CoreError> {
        Ok(self.transport.fetch_catalog().await?)
    }

    // ── Channel subscription (debounced) ─────────────────────────────

    pub fn subscribe_core(&self, event: &str) -> Teardown {
        self.debounced("core", event, None, || self.transport.subscribe_core_event(event))
    }

    pub fn subscribe_admin(&self, event: &str) -> Teardown {
        self.debounced("admin", event, None, || self.transport.subscribe_admin_event(event))
    }

    pub fn subscribe_tab(&self, event: &str, tab: &str) -> Teardown {
        self.debounced("tab", event, Some(tab), || {
            self.transport.subscribe_tab_event(event, tab)
        })
    }

    pub fn announce_interest(&self, event: &str) -> Teardown {
        self.debounced("standard", event, None, || self.transport.announce_interest(event))
    }

    pub fn retract_interest(&self, event: &str) {
        self.transport.retract_interest(event);
    }

    pub fn clear_tab(&self, tab: &str) {
        // The bulk call drops every wire channel owned by the tab, so the
        // ledger entries for its keys are gone too.
        let suffix = format!("#{tab}");
        self.ledger
            .retain(|key, _| !(key.starts_with("tab#") && key.ends_with(&suffix)));
        self.transport.clear_tab_subscriptions(tab);
    }

    /// Defer a wire announce when an identical channel is still
    /// established from a request within the debounce window. A deferred
    /// registration piggybacks on the live channel and owes nothing on
    /// the wire; once the key's last channel is torn down, the next
    /// request announces immediately regardless of the window.
    fn debounced(
        &self,
        scope: &str,
        event: &str,
        tab: Option<&str>,
        announce: impl FnOnce() -> Teardown,
    ) -> Teardown {
        let key = format!("{scope}#{event}#{}", tab.unwrap_or("-"));
        let now = Instant::now();

        let deferred = {
            let mut entry = self.ledger.entry(key.clone()).or_insert(ChannelEntry {
                last_announce: now,
                wire: 0,
            });
            let defer = entry.wire > 0
                && now.duration_since(entry.last_announce) < self.debounce_window;
            if !defer {
                entry.last_announce = now;
                entry.wire += 1;
            }
            defer
        };

        if deferred {
            debug!(scope, event, "identical channel live within debounce window, announce deferred");
            return Box::new(|| Ok(()));
        }

        let inner = announce();
        let ledger = Arc::clone(&self.ledger);
        Box::new(move || {
            if let Some(mut entry) = ledger.get_mut(&key) {
                entry.wire = entry.wire.saturating_sub(1);
            }
            inner()
        })
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn state_changed(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Drain inbound transport events into the registry's dispatch path.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        registry: Arc<SubscriptionRegistry>,
        elevated: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let mut rx = self.transport.inbound();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => {
                            let ctx = PrivilegeContext {
                                elevated: elevated.load(Ordering::SeqCst),
                                payload_privileged: event.privileged,
                            };
                            registry.dispatch(&event.key, event.payload.clone(), ctx);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event pump lagged behind inbound stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("inbound stream closed, event pump exiting");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Track transport up/down transitions: update the observable state
    /// and escalate drops to the fallback controller. Re-establishment
    /// is the recovery for a channel drop, so the fallback is released
    /// when the transport comes back.
    pub fn spawn_state_watch(
        self: &Arc<Self>,
        fallback: Arc<FallbackController>,
    ) -> JoinHandle<()> {
        let mut rx = self.transport.connection_changed();
        let state = self.state.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut was_up = *rx.borrow();
            let mut attempt: u32 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            state.send_replace(ConnectionState::Failed);
                            fallback.activate("event transport terminated");
                            break;
                        }
                        let up = *rx.borrow_and_update();
                        if up && !was_up {
                            attempt = 0;
                            state.send_replace(ConnectionState::Connected);
                            fallback.deactivate();
                        } else if !up && was_up {
                            attempt += 1;
                            state.send_replace(ConnectionState::Reconnecting { attempt });
                            fallback.activate("live event channel disconnected");
                        }
                        was_up = up;
                    }
                }
            }
        })
    }
}
