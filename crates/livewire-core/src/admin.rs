// ── Admin mode management ──
//
// Thin orchestrator over registry bulk operations: entering elevated mode
// authenticates and subscribes the whole Admin category; exiting clears it
// and discards privileged cached payloads. The elevated flag itself is
// shared with the dispatch path so inbound events pick the right payload
// variant.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::connection::ConnectionLifecycle;
use crate::fallback::FallbackController;
use crate::registry::{SubscriptionRegistry, SubscriptionType};
use crate::startup::StartupOrchestrator;
use crate::store::PayloadStore;

/// Drives privilege elevation and de-elevation.
pub struct AdminModeManager {
    registry: Arc<SubscriptionRegistry>,
    channels: Arc<ConnectionLifecycle>,
    store: Arc<PayloadStore>,
    startup: Arc<StartupOrchestrator>,
    fallback: Arc<FallbackController>,
    elevated: Arc<AtomicBool>,
}

impl AdminModeManager {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        channels: Arc<ConnectionLifecycle>,
        store: Arc<PayloadStore>,
        startup: Arc<StartupOrchestrator>,
        fallback: Arc<FallbackController>,
        elevated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            channels,
            store,
            startup,
            fallback,
            elevated,
        }
    }

    /// Enter elevated mode: authenticate, then bulk-subscribe the Admin
    /// category as feeders. Returns whether the session is now elevated.
    ///
    /// Refused until startup has reached `Ready` -- the Admin category
    /// cannot be churned over a half-established session. A rejected
    /// token is a quiet `false`; a wire-level failure is escalated to
    /// the fallback controller. Neither throws.
    pub async fn enter(&self, token: &SecretString) -> bool {
        if !self.startup.is_ready() {
            warn!(
                phase = %self.startup.current_phase(),
                "admin enter refused before startup is ready"
            );
            return false;
        }

        if self.elevated.load(Ordering::SeqCst) {
            debug!("already elevated, admin enter is a no-op");
            return true;
        }

        match self.channels.authenticate_as_admin(token.expose_secret()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("admin token rejected by server");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "admin authentication failed at the transport");
                self.fallback.activate("admin authentication failed");
                return false;
            }
        }

        self.elevated.store(true, Ordering::SeqCst);

        let catalog = self.registry.catalog();
        for event in catalog.admin_events() {
            self.registry.subscribe_feeder(event, SubscriptionType::Admin, None);
        }
        info!(admin_events = catalog.admin_events().len(), "elevated mode entered");
        true
    }

    /// Exit elevated mode: clear every Admin subscription and purge the
    /// privileged payload cache. No-op if not elevated.
    pub fn exit(&self) {
        if !self.elevated.swap(false, Ordering::SeqCst) {
            return;
        }
        self.registry.clear_subscriptions_by_type(SubscriptionType::Admin);
        self.store.purge_privileged();
        info!("elevated mode exited, privileged data discarded");
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated.load(Ordering::SeqCst)
    }
}
