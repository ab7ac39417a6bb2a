//! The transport seam consumed by `livewire-core`.
//!
//! Everything the subscription layer needs from the wire is expressed as
//! the [`EventTransport`] trait: connect/disconnect, detached sends,
//! per-channel interest announcements with owned teardown closures, admin
//! authentication, and the inbound event stream. The production
//! implementation is [`WsTransport`](crate::websocket::WsTransport);
//! tests drive the layer with an in-memory fake.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::error::Error;

/// Owned closure that reverses one low-level channel subscription.
///
/// Invoked at most once by the subscription layer; the teardown itself may
/// fail (e.g. the writer channel already closed), in which case the caller
/// falls back to a direct retract by event name.
pub type Teardown = Box<dyn FnOnce() -> Result<(), Error> + Send>;

// ── WireEvent ────────────────────────────────────────────────────────

/// A server-pushed event as it arrives off the wire.
///
/// `payload` is opaque to the transport -- the subscription layer decides
/// how to store and dispatch it. `privileged` is set when the server
/// explicitly marked the payload as the elevated variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    /// Event key, e.g. `"dhcp:leases"`, `"system:stats"`.
    pub key: String,

    /// Opaque payload for this event.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Server marked this payload as the privileged variant.
    #[serde(default)]
    pub privileged: bool,

    /// Tab the server scoped this event to, if any.
    #[serde(default)]
    pub tab: Option<String>,
}

// ── EventTransport ───────────────────────────────────────────────────

/// Duplex event channel to the server.
///
/// Announce/retract operations are synchronous and never fail at this
/// boundary: they enqueue detached frames whose outcome is not awaited by
/// design. Only connection-shaped operations (`connect`,
/// `authenticate_as_admin`, `fetch_catalog`) surface errors.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Open the connection. Resolves once the channel is established;
    /// reconnection after later drops is the transport's own business.
    async fn connect(&self) -> Result<(), Error>;

    /// Close the connection and stop background work.
    async fn disconnect(&self);

    /// Elevate the session. Returns `Ok(false)` when the server refuses
    /// the token, `Err` on wire-level failure.
    async fn authenticate_as_admin(&self, token: &str) -> Result<bool, Error>;

    /// Fetch the event catalog document served by the controller.
    async fn fetch_catalog(&self) -> Result<serde_json::Value, Error>;

    /// Detached send: the frame is enqueued and its result never awaited.
    /// This is an intentional one-way operation, not a missing error path.
    fn send(&self, message_type: &str, payload: serde_json::Value);

    /// Announce interest in a core event. Returns the owned teardown.
    fn subscribe_core_event(&self, event: &str) -> Teardown;

    /// Announce interest in an admin-only event. Returns the owned teardown.
    fn subscribe_admin_event(&self, event: &str) -> Teardown;

    /// Announce interest in a tab-scoped event. Returns the owned teardown.
    fn subscribe_tab_event(&self, event: &str, tab: &str) -> Teardown;

    /// Announce ad hoc interest in an event (generic `on` semantics).
    /// Returns the owned teardown.
    fn announce_interest(&self, event: &str) -> Teardown;

    /// Best-effort retract by event name, used when no teardown closure
    /// is available (stale ids, failed teardowns).
    fn retract_interest(&self, event: &str);

    /// Drop every channel scoped to `tab` in one server round trip.
    fn clear_tab_subscriptions(&self, tab: &str);

    /// Subscribe to the raw inbound event stream.
    fn inbound(&self) -> broadcast::Receiver<Arc<WireEvent>>;

    /// Observe connection up/down transitions.
    fn connection_changed(&self) -> watch::Receiver<bool>;
}
