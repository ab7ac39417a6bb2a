// ── Core error types ──
//
// Consumer-facing errors from livewire-core. These are NOT wire-specific --
// consumers never see WebSocket close codes or JSON parse failures directly.
// The `From<livewire_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.
//
// Note the propagation policy from the error-handling design: registry and
// fallback operations never return these across their public boundary.
// `CoreError` surfaces only from startup/connection driving calls and as
// the fault channel of dispatched callbacks.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Admin authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Transport disconnected")]
    TransportDisconnected,

    #[error("Connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Startup errors ───────────────────────────────────────────────
    #[error("Startup failed during {phase}: {cause}")]
    StartupFailed { phase: String, cause: String },

    #[error("Startup phase regression: {from} -> {to}")]
    PhaseRegression { from: String, to: String },

    // ── Catalog errors ───────────────────────────────────────────────
    #[error("Event catalog could not be loaded: {message}")]
    CatalogUnavailable { message: String },

    // ── Callback faults ──────────────────────────────────────────────
    /// Returned by a dispatched callback to signal a handling fault.
    /// Dispatch logs it and keeps going; it never escapes `dispatch`.
    #[error("Callback fault: {message}")]
    CallbackFault { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<livewire_api::Error> for CoreError {
    fn from(err: livewire_api::Error) -> Self {
        match err {
            livewire_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            livewire_api::Error::Connect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            livewire_api::Error::Closed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("channel closed (code {code}): {reason}"),
            },
            livewire_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            livewire_api::Error::NotConnected => CoreError::TransportDisconnected,
            livewire_api::Error::SendDropped { message_type } => {
                tracing::debug!(message_type, "outbound frame dropped, transport is down");
                CoreError::TransportDisconnected
            }
            livewire_api::Error::InvalidUrl(e) => CoreError::Internal(format!("invalid URL: {e}")),
            livewire_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("deserialization error: {message}"))
            }
            livewire_api::Error::ReplyTimeout { reply_key: _, timeout_secs } => {
                CoreError::Timeout { timeout_secs }
            }
        }
    }
}
