// ── Fallback recovery ──
//
// Recovery state machine that forcibly switches the active view to a safe
// placeholder when the live channel or a dependent module fails, and
// restores the captured view once recovery succeeds. One instance per
// process, created at start and reset in place -- never recreated.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::model::ViewId;

// ── FallbackState ────────────────────────────────────────────────────

/// The single process-wide fallback record.
#[derive(Debug, Clone, Default)]
pub struct FallbackState {
    pub is_active: bool,
    pub reason: Option<String>,
    /// View captured on the Inactive→Active edge, restored on deactivate.
    pub last_active_view: Option<ViewId>,
    pub activated_at: Option<DateTime<Utc>>,
}

// ── FallbackController ───────────────────────────────────────────────

/// Engages and releases fallback mode.
///
/// Navigation happens through the shared view channel; no other component
/// mutates the fallback record.
pub struct FallbackController {
    state: watch::Sender<FallbackState>,
    nav: watch::Sender<ViewId>,
    /// While a recovery probe is in flight, placeholder re-activation is
    /// suppressed to avoid flapping.
    recovering: AtomicBool,
}

impl FallbackController {
    pub fn new(nav: watch::Sender<ViewId>) -> Self {
        let (state, _) = watch::channel(FallbackState::default());
        Self {
            state,
            nav,
            recovering: AtomicBool::new(false),
        }
    }

    // ── Activation ───────────────────────────────────────────────────

    /// Engage fallback mode and navigate to the placeholder view.
    ///
    /// Idempotent: re-activating while active records the newest reason
    /// but does not overwrite the captured view or activation time.
    /// Suppressed while a recovery probe is in flight.
    pub fn activate(&self, reason: &str) {
        if self.recovering.load(Ordering::SeqCst) {
            debug!(reason, "fallback activation suppressed during recovery probe");
            return;
        }

        let current_view = self.nav.borrow().clone();
        self.state.send_modify(|state| {
            if !state.is_active {
                state.is_active = true;
                state.last_active_view = Some(current_view);
                state.activated_at = Some(Utc::now());
            }
            state.reason = Some(reason.to_owned());
        });

        warn!(reason, "fallback mode engaged");
        self.nav.send_replace(ViewId::fallback());
    }

    /// Release fallback mode.
    ///
    /// Restores the captured view when it was a real view; navigation is
    /// left untouched otherwise. A deactivate with no prior activate is a
    /// no-op.
    pub fn deactivate(&self) {
        let mut restored: Option<ViewId> = None;
        let mut was_active = false;

        self.state.send_modify(|state| {
            was_active = state.is_active;
            if !state.is_active {
                return;
            }
            state.is_active = false;
            state.reason = None;
            state.activated_at = None;
            restored = state.last_active_view.take();
        });

        if !was_active {
            return;
        }

        match restored {
            Some(view) if !view.is_fallback() => {
                info!(view = %view, "fallback released, restoring view");
                self.nav.send_replace(view);
            }
            _ => {
                info!("fallback released, no view to restore");
            }
        }
    }

    // ── Recovery probes ──────────────────────────────────────────────

    /// Mark a recovery attempt as in flight. Returns `false` when a probe
    /// is already running.
    pub fn begin_recovery(&self) -> bool {
        !self.recovering.swap(true, Ordering::SeqCst)
    }

    pub fn end_recovery(&self) {
        self.recovering.store(false, Ordering::SeqCst);
    }

    /// Run an advisory recovery probe. On success the fallback is
    /// released; either way the suppression window is closed afterwards.
    /// Returns `false` if a probe was already in flight or the probe
    /// itself failed.
    pub async fn run_recovery<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        if !self.begin_recovery() {
            debug!("recovery probe already in flight");
            return false;
        }

        let recovered = probe().await;
        if recovered {
            self.deactivate();
        } else {
            debug!("recovery probe failed, staying in fallback");
        }
        self.end_recovery();
        recovered
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn is_active(&self) -> bool {
        self.state.borrow().is_active
    }

    pub fn reason(&self) -> Option<String> {
        self.state.borrow().reason.clone()
    }

    pub fn state(&self) -> FallbackState {
        self.state.borrow().clone()
    }

    pub fn state_changed(&self) -> watch::Receiver<FallbackState> {
        self.state.subscribe()
    }
}
