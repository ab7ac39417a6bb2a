// ── Runtime connection configuration ──
//
// Describes *how* to reach the event endpoint and how the resilience
// machinery is tuned. Carries credential data and timing knobs, but never
// touches disk -- the embedding application constructs a `LinkConfig` and
// hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// Configuration for one live event link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// WebSocket endpoint serving the event stream.
    pub url: Url,

    /// Token used for privilege elevation. `None` means the session can
    /// never enter admin mode.
    pub admin_token: Option<SecretString>,

    /// Bound on connection establishment and module loading. On expiry
    /// the fallback controller is engaged instead of hanging.
    /// Default: 15s.
    pub connect_timeout: Duration,

    /// Window within which an identical channel subscribe request is
    /// deferred rather than duplicated, absorbing rapid view-switch
    /// churn during reconnects. Default: 500ms.
    pub debounce_window: Duration,
}

impl LinkConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            admin_token: None,
            connect_timeout: Duration::from_secs(15),
            debounce_window: Duration::from_millis(500),
        }
    }

    pub fn with_admin_token(mut self, token: SecretString) -> Self {
        self.admin_token = Some(token);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }
}
