// ── LiveLink facade ──
//
// The main entry point for consumers. Constructs every component of the
// subscription layer exactly once -- registry, payload store, connection
// lifecycle, startup orchestrator, fallback controller, admin and tab
// managers -- and wires them together with explicit references instead of
// hidden global state. Cheaply cloneable via `Arc`.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use secrecy::SecretString;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use livewire_api::EventTransport;

use crate::admin::AdminModeManager;
use crate::config::LinkConfig;
use crate::connection::{ConnectionLifecycle, ConnectionState};
use crate::error::CoreError;
use crate::fallback::{FallbackController, FallbackState};
use crate::model::{TabId, ViewId};
use crate::registry::{
    EventCallback, SubscribeOptions, Subscription, SubscriptionRegistry, SubscriptionStats,
    SubscriptionType, UnsubscribeGuard,
};
use crate::startup::{StartupOrchestrator, StartupPhase};
use crate::store::PayloadStore;
use crate::tabs::TabLifecycleManager;

/// Handle to one live event link.
#[derive(Clone)]
pub struct LiveLink {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    config: LinkConfig,
    channels: Arc<ConnectionLifecycle>,
    registry: Arc<SubscriptionRegistry>,
    store: Arc<PayloadStore>,
    startup: Arc<StartupOrchestrator>,
    fallback: Arc<FallbackController>,
    admin: AdminModeManager,
    tabs: TabLifecycleManager,
    elevated: Arc<AtomicBool>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LiveLink {
    /// Wire up the full layer over `transport`, starting at
    /// `initial_view`. Nothing happens on the wire until
    /// [`start()`](Self::start).
    pub fn new(
        config: LinkConfig,
        transport: Arc<dyn EventTransport>,
        initial_view: ViewId,
    ) -> Self {
        let (nav, _) = watch::channel(initial_view);
        let elevated = Arc::new(AtomicBool::new(false));

        let channels = Arc::new(ConnectionLifecycle::new(transport, &config));
        let store = Arc::new(PayloadStore::new());
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&channels),
            Arc::clone(&store),
        ));
        let startup = Arc::new(StartupOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&channels),
        ));
        let fallback = Arc::new(FallbackController::new(nav.clone()));
        let admin = AdminModeManager::new(
            Arc::clone(&registry),
            Arc::clone(&channels),
            Arc::clone(&store),
            Arc::clone(&startup),
            Arc::clone(&fallback),
            Arc::clone(&elevated),
        );
        let tabs = TabLifecycleManager::new(Arc::clone(&registry), Arc::clone(&startup), nav);

        Self {
            inner: Arc::new(LinkInner {
                config,
                channels,
                registry,
                store,
                startup,
                fallback,
                admin,
                tabs,
                elevated,
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the background pumps and drive the boot sequence to Ready.
    ///
    /// A startup fault is fatal to boot: the phase lands on `Error` and
    /// the error is returned; the caller resets explicitly to retry.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut handles = self.inner.task_handles.lock().await;
        if handles.is_empty() {
            handles.push(self.inner.channels.spawn_event_pump(
                Arc::clone(&self.inner.registry),
                Arc::clone(&self.inner.elevated),
            ));
            handles.push(
                self.inner
                    .channels
                    .spawn_state_watch(Arc::clone(&self.inner.fallback)),
            );
        }
        drop(handles);

        self.inner.startup.run().await
    }

    /// Disconnect and stop all background work.
    pub async fn shutdown(&self) {
        self.inner.channels.disconnect().await;
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("link shut down");
    }

    /// Reset a failed boot back to `Idle` so `start` can run again.
    pub async fn reset(&self) {
        self.inner.startup.reset().await;
        info!("link reset");
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    // ── Subscriptions (delegate to the registry) ─────────────────────

    pub fn subscribe(
        &self,
        event: &str,
        callback: EventCallback,
        kind: SubscriptionType,
        tab: Option<TabId>,
        opts: SubscribeOptions,
    ) -> UnsubscribeGuard {
        self.inner.registry.subscribe(event, callback, kind, tab, opts)
    }

    pub fn subscribe_to_core_event(&self, event: &str, callback: EventCallback) -> UnsubscribeGuard {
        self.inner.registry.subscribe_to_core_event(event, callback)
    }

    pub fn subscribe_to_admin_event(&self, event: &str, callback: EventCallback) -> UnsubscribeGuard {
        self.inner.registry.subscribe_to_admin_event(event, callback)
    }

    pub fn subscribe_to_tab_event(
        &self,
        event: &str,
        callback: EventCallback,
        tab: TabId,
    ) -> UnsubscribeGuard {
        self.inner.registry.subscribe_to_tab_event(event, callback, tab)
    }

    pub fn clear_tab_subscriptions(&self, tab: &TabId) {
        self.inner.registry.clear_tab_subscriptions(tab);
    }

    pub fn clear_subscriptions_by_type(&self, kind: SubscriptionType) {
        self.inner.registry.clear_subscriptions_by_type(kind);
    }

    pub fn subscriptions_by_tab(&self, tab: &TabId) -> Vec<Arc<Subscription>> {
        self.inner.registry.subscriptions_by_tab(tab)
    }

    pub fn subscriptions_by_event(&self, event: &str) -> Vec<Arc<Subscription>> {
        self.inner.registry.subscriptions_by_event(event)
    }

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.inner.registry.stats()
    }

    // ── Fallback ─────────────────────────────────────────────────────

    pub fn activate_fallback(&self, reason: &str) {
        self.inner.fallback.activate(reason);
    }

    pub fn deactivate_fallback(&self) {
        self.inner.fallback.deactivate();
    }

    pub fn is_fallback_mode(&self) -> bool {
        self.inner.fallback.is_active()
    }

    pub fn fallback_reason(&self) -> Option<String> {
        self.inner.fallback.reason()
    }

    pub fn fallback_state(&self) -> FallbackState {
        self.inner.fallback.state()
    }

    pub fn fallback(&self) -> &Arc<FallbackController> {
        &self.inner.fallback
    }

    // ── Views / privilege ────────────────────────────────────────────

    pub fn switch_view(&self, view: &ViewId) {
        self.inner.tabs.switch_to(view);
    }

    pub fn active_view(&self) -> ViewId {
        self.inner.tabs.active_view()
    }

    pub fn view_changed(&self) -> watch::Receiver<ViewId> {
        self.inner.tabs.view_changed()
    }

    /// Elevate using the configured admin token.
    pub async fn enter_admin_mode(&self) -> bool {
        let Some(token) = self.inner.config.admin_token.clone() else {
            debug!("no admin token configured, elevation unavailable");
            return false;
        };
        self.inner.admin.enter(&token).await
    }

    /// Elevate with an explicit token.
    pub async fn enter_admin_mode_with(&self, token: &SecretString) -> bool {
        self.inner.admin.enter(token).await
    }

    pub fn exit_admin_mode(&self) {
        self.inner.admin.exit();
    }

    pub fn is_elevated(&self) -> bool {
        self.inner.admin.is_elevated()
    }

    // ── State observation ────────────────────────────────────────────

    pub fn current_startup_phase(&self) -> StartupPhase {
        self.inner.startup.current_phase()
    }

    pub fn startup_phase_changed(&self) -> watch::Receiver<StartupPhase> {
        self.inner.startup.phase_changed()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.channels.state()
    }

    pub fn connection_state_changed(&self) -> watch::Receiver<ConnectionState> {
        self.inner.channels.state_changed()
    }

    pub fn store(&self) -> &Arc<PayloadStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }
}
