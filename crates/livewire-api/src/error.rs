use thiserror::Error;

/// Top-level error type for the `livewire-api` crate.
///
/// Covers every failure mode of the wire transport: connection,
/// authentication, channel lifecycle, and envelope decoding.
/// `livewire-core` maps these into its own diagnostics -- consumers
/// never see these raw.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// WebSocket connection failed (refused, DNS failure, TLS, upgrade).
    #[error("WebSocket connection failed: {0}")]
    Connect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    /// Connection establishment exceeded the configured bound.
    #[error("Connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Operation attempted while the transport is not connected.
    #[error("Transport is not connected")]
    NotConnected,

    // ── Authentication ──────────────────────────────────────────────
    /// Privilege elevation rejected by the server.
    #[error("Admin authentication failed: {message}")]
    Authentication { message: String },

    // ── Channel lifecycle ───────────────────────────────────────────
    /// An outbound frame could not be handed to the writer task.
    /// The channel to the writer is closed, so the send was dropped.
    #[error("Outbound channel closed -- frame for '{message_type}' dropped")]
    SendDropped { message_type: String },

    // ── Data ────────────────────────────────────────────────────────
    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Server reply could not be decoded, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// A request/reply exchange (auth, catalog fetch) got no reply in time.
    #[error("No '{reply_key}' reply within {timeout_secs}s")]
    ReplyTimeout { reply_key: String, timeout_secs: u64 },
}

impl Error {
    /// Returns `true` if this error indicates the connection itself is
    /// down and a reconnect might resolve it.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Error::Connect(_) | Error::Closed { .. } | Error::Timeout { .. } | Error::NotConnected
        )
    }
}
