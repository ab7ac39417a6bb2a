//! WebSocket transport with auto-reconnect.
//!
//! Production [`EventTransport`] implementation: connects to the
//! controller's event endpoint, streams parsed events through a
//! [`tokio::sync::broadcast`] channel, and reconnects with exponential
//! backoff + jitter. Outbound frames (interest announcements, commands)
//! are detached: they are queued to a writer task and their results are
//! never awaited.
//!
//! # Example
//!
//! ```rust,ignore
//! use livewire_api::websocket::{WsTransport, ReconnectConfig};
//! use livewire_api::transport::EventTransport;
//! use url::Url;
//!
//! let ws_url = Url::parse("wss://192.168.1.1/ws/events")?;
//! let transport = WsTransport::new(ws_url, ReconnectConfig::default());
//!
//! transport.connect().await?;
//! let mut rx = transport.inbound();
//! while let Ok(event) = rx.recv().await {
//!     println!("{}: {}", event.key, event.payload);
//! }
//! transport.disconnect().await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::{EventTransport, Teardown, WireEvent};

// ── Channel capacities and bounds ────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── WsTransport ──────────────────────────────────────────────────────

/// WebSocket-backed [`EventTransport`].
///
/// Holds no per-subscription state: channel bookkeeping lives in the
/// subscription layer. This type only moves frames.
pub struct WsTransport {
    url: Url,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<Arc<WireEvent>>,
    connected: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<String>,
    /// Taken by the background loop on first connect.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    started: AtomicBool,
}

impl WsTransport {
    pub fn new(url: Url, reconnect: ReconnectConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (connected, _) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        Self {
            url,
            reconnect,
            cancel: CancellationToken::new(),
            event_tx,
            connected,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            started: AtomicBool::new(false),
        }
    }

    /// Enqueue a raw frame for the writer. Detached: a closed writer
    /// channel is logged and the frame dropped.
    fn enqueue(&self, frame: String) {
        if self.outbound.send(frame).is_err() {
            tracing::debug!("outbound channel closed, frame dropped");
        }
    }

    /// Build and enqueue an announce/retract frame for one channel.
    fn send_channel_frame(&self, action: &str, scope: &str, event: &str, tab: Option<&str>) {
        let frame = serde_json::json!({
            "type": action,
            "data": { "scope": scope, "event": event, "tab": tab },
        });
        self.enqueue(frame.to_string());
    }

    /// Build a teardown closure that retracts one channel subscription.
    ///
    /// The closure owns a writer handle so it stays valid after `self`
    /// is gone; it reports [`Error::SendDropped`] if the writer closed.
    fn make_teardown(&self, scope: &str, event: &str, tab: Option<&str>) -> Teardown {
        let outbound = self.outbound.clone();
        let frame = serde_json::json!({
            "type": "unsubscribe",
            "data": { "scope": scope, "event": event, "tab": tab },
        })
        .to_string();
        let event = event.to_owned();

        Box::new(move || {
            outbound
                .send(frame)
                .map_err(|_| Error::SendDropped { message_type: format!("unsubscribe:{event}") })
        })
    }

    /// Send a request frame and wait for the reply event carrying
    /// `reply_key`, bounded by [`REPLY_TIMEOUT`].
    async fn request(
        &self,
        message_type: &str,
        payload: serde_json::Value,
        reply_key: &str,
    ) -> Result<serde_json::Value, Error> {
        // Subscribe before sending so the reply cannot race past us.
        let mut rx = self.event_tx.subscribe();
        self.send(message_type, payload);

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.key == reply_key => return Ok(event.payload.clone()),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "inbound stream lagged while awaiting reply");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::NotConnected),
                }
            }
        };

        match tokio::time::timeout(REPLY_TIMEOUT, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::ReplyTimeout {
                reply_key: reply_key.to_owned(),
                timeout_secs: REPLY_TIMEOUT.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl EventTransport for WsTransport {
    async fn connect(&self) -> Result<(), Error> {
        if !self.started.swap(true, Ordering::SeqCst) {
            let Some(rx) = self.outbound_rx.lock().await.take() else {
                return Err(Error::NotConnected);
            };
            let url = self.url.clone();
            let event_tx = self.event_tx.clone();
            let connected = self.connected.clone();
            let reconnect = self.reconnect.clone();
            let cancel = self.cancel.clone();

            tokio::spawn(async move {
                ws_loop(url, event_tx, connected, rx, reconnect, cancel).await;
            });
        }

        // Resolve once the loop reports an established channel. The
        // caller bounds this wait with its own connect timeout.
        let mut rx = self.connected.subscribe();
        rx.wait_for(|up| *up)
            .await
            .map(|_| ())
            .map_err(|_| Error::Connect("connection loop gave up".into()))
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        self.connected.send_replace(false);
        tracing::debug!("transport disconnect requested");
    }

    async fn authenticate_as_admin(&self, token: &str) -> Result<bool, Error> {
        let reply = self
            .request("auth:admin", serde_json::json!({ "token": token }), "auth:result")
            .await?;
        Ok(reply["ok"].as_bool().unwrap_or(false))
    }

    async fn fetch_catalog(&self) -> Result<serde_json::Value, Error> {
        self.request("catalog:get", serde_json::Value::Null, "catalog").await
    }

    fn send(&self, message_type: &str, payload: serde_json::Value) {
        let frame = serde_json::json!({ "type": message_type, "data": payload });
        self.enqueue(frame.to_string());
    }

    fn subscribe_core_event(&self, event: &str) -> Teardown {
        self.send_channel_frame("subscribe", "core", event, None);
        self.make_teardown("core", event, None)
    }

    fn subscribe_admin_event(&self, event: &str) -> Teardown {
        self.send_channel_frame("subscribe", "admin", event, None);
        self.make_teardown("admin", event, None)
    }

    fn subscribe_tab_event(&self, event: &str, tab: &str) -> Teardown {
        self.send_channel_frame("subscribe", "tab", event, Some(tab));
        self.make_teardown("tab", event, Some(tab))
    }

    fn announce_interest(&self, event: &str) -> Teardown {
        self.send_channel_frame("subscribe", "standard", event, None);
        self.make_teardown("standard", event, None)
    }

    fn retract_interest(&self, event: &str) {
        self.send_channel_frame("unsubscribe", "standard", event, None);
    }

    fn clear_tab_subscriptions(&self, tab: &str) {
        let frame = serde_json::json!({
            "type": "unsubscribe_tab",
            "data": { "tab": tab },
        });
        self.enqueue(frame.to_string());
    }

    fn inbound(&self) -> broadcast::Receiver<Arc<WireEvent>> {
        self.event_tx.subscribe()
    }

    fn connection_changed(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read/write → on error, backoff → reconnect.
async fn ws_loop(
    url: Url,
    event_tx: broadcast::Sender<Arc<WireEvent>>,
    connected: watch::Sender<bool>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = run_connection(&url, &event_tx, &connected, &mut outbound_rx, &cancel) => {
                connected.send_replace(false);
                match result {
                    // Clean disconnect (server close frame or stream ended).
                    // Reset attempt counter and reconnect immediately.
                    Ok(()) => {
                        tracing::info!("WebSocket disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "WebSocket error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "WebSocket reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = backoff_delay(attempt, &reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "Waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }

    connected.send_replace(false);
    tracing::debug!("WebSocket loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection, then pump frames both ways until
/// it drops.
async fn run_connection(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<WireEvent>>,
    connected: &watch::Sender<bool>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %url, "Connecting to WebSocket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::Connect(e.to_string()))?;

    tracing::info!("WebSocket connected");
    connected.send_replace(true);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { return Ok(()) };
                if let Err(e) = write.send(tungstenite::Message::text(frame)).await {
                    return Err(Error::Connect(e.to_string()));
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "WebSocket close frame received"
                            );
                        } else {
                            tracing::info!("WebSocket close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::Connect(e.to_string()));
                    }
                    None => {
                        // Stream ended without a close frame
                        tracing::info!("WebSocket stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Raw envelope the server sends over the WebSocket.
///
/// All messages have the shape
/// `{ "meta": { "message": "...", "privileged": bool }, "data": [...] }`.
/// `message` is `"events"` for discrete event batches; any other value is
/// a reply or state dump, surfaced as a single event keyed by the message
/// type itself.
#[derive(Debug, Deserialize)]
struct WsEnvelope {
    meta: WsMeta,
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WsMeta {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    privileged: bool,
    #[serde(default)]
    tab: Option<String>,
}

/// Parse a WebSocket text frame and broadcast any events found inside.
fn parse_and_broadcast(text: &str, event_tx: &broadcast::Sender<Arc<WireEvent>>) {
    let envelope: WsEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse WebSocket envelope");
            return;
        }
    };

    let msg_type = envelope.meta.message.as_deref().unwrap_or("");

    for data in envelope.data {
        let event = match msg_type {
            "events" => match serde_json::from_value::<WireEvent>(data.clone()) {
                Ok(evt) => evt,
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        msg_type,
                        "Could not deserialize event, constructing from raw data"
                    );
                    event_from_raw(msg_type, &envelope.meta, &data)
                }
            },
            // Replies and state dumps -- synthesize an event keyed by the
            // message type so request/reply consumers can match on it.
            _ => event_from_raw(msg_type, &envelope.meta, &data),
        };

        // Ignore send errors -- just means no active subscribers right now
        let _ = event_tx.send(Arc::new(event));
    }
}

/// Build a [`WireEvent`] from raw JSON when typed deserialization fails
/// or the message is a reply/unknown type.
fn event_from_raw(msg_type: &str, meta: &WsMeta, data: &serde_json::Value) -> WireEvent {
    WireEvent {
        key: data["key"].as_str().unwrap_or(msg_type).to_owned(),
        payload: data.clone(),
        privileged: data["privileged"].as_bool().unwrap_or(meta.privileged),
        tab: data["tab"]
            .as_str()
            .map(String::from)
            .or_else(|| meta.tab.clone()),
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    // Not cryptographically random, but good enough for backoff spread.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
