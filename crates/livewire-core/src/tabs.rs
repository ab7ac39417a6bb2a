// ── Tab lifecycle management ──
//
// On active-view change: tear down the previous view's tab-scoped
// subscriptions, establish the new view's required events from the
// catalog, then navigate. Subscription churn is gated on the Ready
// startup phase so a half-initialized registry is never touched.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::{TabId, ViewId};
use crate::registry::{SubscriptionRegistry, SubscriptionType};
use crate::startup::StartupOrchestrator;

/// Drives view switches and the subscription churn they imply.
pub struct TabLifecycleManager {
    registry: Arc<SubscriptionRegistry>,
    startup: Arc<StartupOrchestrator>,
    nav: watch::Sender<ViewId>,
}

impl TabLifecycleManager {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        startup: Arc<StartupOrchestrator>,
        nav: watch::Sender<ViewId>,
    ) -> Self {
        Self {
            registry,
            startup,
            nav,
        }
    }

    /// Switch the active view.
    ///
    /// Tears down the old tab's subscriptions, establishes the new tab's
    /// catalog events as feeders, and navigates. Refused (with a warning)
    /// before the startup phase reaches Ready.
    pub fn switch_to(&self, view: &ViewId) {
        if !self.startup.is_ready() {
            warn!(view = %view, "view switch before Ready, no subscription churn issued");
            return;
        }

        let previous = self.nav.borrow().clone();
        if previous == *view {
            debug!(view = %view, "view already active");
            return;
        }

        if !previous.is_fallback() {
            self.registry.clear_tab_subscriptions(&TabId::from(&previous));
        }

        let catalog = self.registry.catalog();
        for event in catalog.tab_events(view.as_str()) {
            self.registry
                .subscribe_feeder(event, SubscriptionType::Tab, Some(TabId::from(view)));
        }

        self.nav.send_replace(view.clone());
        debug!(from = %previous, to = %view, "active view switched");
    }

    pub fn active_view(&self) -> ViewId {
        self.nav.borrow().clone()
    }

    pub fn view_changed(&self) -> watch::Receiver<ViewId> {
        self.nav.subscribe()
    }
}
