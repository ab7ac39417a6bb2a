#![allow(dead_code)]
// In-memory `EventTransport` fake shared by the integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use livewire_api::{Error, EventTransport, Teardown, WireEvent};

/// How the fake answers `authenticate_as_admin`.
#[derive(Debug, Clone, Copy)]
pub enum AuthOutcome {
    Accept,
    Reject,
    WireFailure,
}

/// Records every call the subscription layer makes against the wire and
/// lets tests inject inbound events and connection transitions.
pub struct MockTransport {
    catalog_document: Mutex<serde_json::Value>,
    auth_outcome: Mutex<AuthOutcome>,
    fail_connect: AtomicBool,
    fail_teardowns: AtomicBool,

    sent: Mutex<Vec<(String, serde_json::Value)>>,
    announces: Mutex<Vec<String>>,
    retracts: Mutex<Vec<String>>,
    cleared_tabs: Mutex<Vec<String>>,
    torn_down: Arc<Mutex<Vec<String>>>,

    events: broadcast::Sender<Arc<WireEvent>>,
    connected: watch::Sender<bool>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_catalog(serde_json::json!({}))
    }

    pub fn with_catalog(document: serde_json::Value) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (connected, _) = watch::channel(false);
        Arc::new(Self {
            catalog_document: Mutex::new(document),
            auth_outcome: Mutex::new(AuthOutcome::Accept),
            fail_connect: AtomicBool::new(false),
            fail_teardowns: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            announces: Mutex::new(Vec::new()),
            retracts: Mutex::new(Vec::new()),
            cleared_tabs: Mutex::new(Vec::new()),
            torn_down: Arc::new(Mutex::new(Vec::new())),
            events,
            connected,
        })
    }

    // ── Test controls ────────────────────────────────────────────────

    pub fn set_auth_outcome(&self, outcome: AuthOutcome) {
        *self.auth_outcome.lock().unwrap() = outcome;
    }

    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_teardown_failure(&self, fail: bool) {
        self.fail_teardowns.store(fail, Ordering::SeqCst);
    }

    /// Flip the observable connection state, as the real transport does
    /// around drops and re-establishment.
    pub fn set_connected(&self, up: bool) {
        self.connected.send_replace(up);
    }

    /// Push one server event into the inbound stream.
    pub fn push_event(&self, key: &str, payload: serde_json::Value, privileged: bool) {
        let _ = self.events.send(Arc::new(WireEvent {
            key: key.to_owned(),
            payload,
            privileged,
            tab: None,
        }));
    }

    // ── Recorded wire traffic ────────────────────────────────────────

    pub fn announces(&self) -> Vec<String> {
        self.announces.lock().unwrap().clone()
    }

    pub fn retracts(&self) -> Vec<String> {
        self.retracts.lock().unwrap().clone()
    }

    pub fn cleared_tabs(&self) -> Vec<String> {
        self.cleared_tabs.lock().unwrap().clone()
    }

    pub fn torn_down(&self) -> Vec<String> {
        self.torn_down.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(String, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }

    fn announce(&self, label: String) -> Teardown {
        self.announces.lock().unwrap().push(label.clone());
        let torn_down = Arc::clone(&self.torn_down);
        let fail = self.fail_teardowns.load(Ordering::SeqCst);
        Box::new(move || {
            if fail {
                return Err(Error::SendDropped {
                    message_type: "unsubscribe".into(),
                });
            }
            torn_down.lock().unwrap().push(label);
            Ok(())
        })
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    async fn connect(&self) -> Result<(), Error> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connect("connection refused".into()));
        }
        self.connected.send_replace(true);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.send_replace(false);
    }

    async fn authenticate_as_admin(&self, _token: &str) -> Result<bool, Error> {
        match *self.auth_outcome.lock().unwrap() {
            AuthOutcome::Accept => Ok(true),
            AuthOutcome::Reject => Ok(false),
            AuthOutcome::WireFailure => Err(Error::NotConnected),
        }
    }

    async fn fetch_catalog(&self) -> Result<serde_json::Value, Error> {
        Ok(self.catalog_document.lock().unwrap().clone())
    }

    fn send(&self, message_type: &str, payload: serde_json::Value) {
        self.sent.lock().unwrap().push((message_type.to_owned(), payload));
    }

    fn subscribe_core_event(&self, event: &str) -> Teardown {
        self.announce(format!("core:{event}"))
    }

    fn subscribe_admin_event(&self, event: &str) -> Teardown {
        self.announce(format!("admin:{event}"))
    }

    fn subscribe_tab_event(&self, event: &str, tab: &str) -> Teardown {
        self.announce(format!("tab:{event}@{tab}"))
    }

    fn announce_interest(&self, event: &str) -> Teardown {
        self.announce(format!("standard:{event}"))
    }

    fn retract_interest(&self, event: &str) {
        self.retracts.lock().unwrap().push(event.to_owned());
    }

    fn clear_tab_subscriptions(&self, tab: &str) {
        self.cleared_tabs.lock().unwrap().push(tab.to_owned());
    }

    fn inbound(&self) -> broadcast::Receiver<Arc<WireEvent>> {
        self.events.subscribe()
    }

    fn connection_changed(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

/// Catalog document used across the integration tests.
pub fn sample_catalog() -> serde_json::Value {
    serde_json::json!({
        "core": ["system:stats", "system:health"],
        "admin": ["admin:sessions", "admin:audit"],
        "no_privileged_variant": ["system:health"],
        "tabs": {
            "dhcp": ["dhcp:leases", "dhcp:reservations"],
            "mining": ["mining:hashrate"]
        }
    })
}

/// Give spawned background tasks a scheduler pass.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}

/// Poll `cond` until it holds or the deadline passes.
pub async fn wait_for(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within deadline"
        );
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
