// ── Startup orchestration ──
//
// Phase state machine sequencing catalog loading, core subscription
// establishment, and transport connection before the layer is declared
// ready. Progress is strictly forward; any step failure escapes to the
// terminal `Error` phase with a human-readable cause and halts -- no
// automatic retry, the caller resets explicitly.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::catalog::EventCatalog;
use crate::connection::ConnectionLifecycle;
use crate::error::CoreError;
use crate::registry::{SubscriptionRegistry, SubscriptionType, UnsubscribeGuard};

// ── StartupPhase ─────────────────────────────────────────────────────

/// One step in the ordered boot sequence.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum StartupPhase {
    Idle,
    CoreInitializing,
    CoreInitialized,
    ConnectionEstablishing,
    ConnectionEstablished,
    Ready,
    /// Terminal failure, reachable from any non-terminal phase.
    Error { cause: String },
}

impl StartupPhase {
    /// Position in the forward order; `Error` sits outside it.
    fn order(&self) -> Option<u8> {
        match self {
            StartupPhase::Idle => Some(0),
            StartupPhase::CoreInitializing => Some(1),
            StartupPhase::CoreInitialized => Some(2),
            StartupPhase::ConnectionEstablishing => Some(3),
            StartupPhase::ConnectionEstablished => Some(4),
            StartupPhase::Ready => Some(5),
            StartupPhase::Error { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StartupPhase::Ready | StartupPhase::Error { .. })
    }
}

// ── StartupOrchestrator ──────────────────────────────────────────────

/// Drives the boot sequence and owns the single process-wide phase
/// record. Created once at application start; reset-in-place only.
pub struct StartupOrchestrator {
    phase: watch::Sender<StartupPhase>,
    registry: Arc<SubscriptionRegistry>,
    channels: Arc<ConnectionLifecycle>,
    /// Guards for the core feeder subscriptions established during boot,
    /// held so an explicit reset can release them.
    core_guards: Mutex<Vec<UnsubscribeGuard>>,
}

impl StartupOrchestrator {
    pub fn new(registry: Arc<SubscriptionRegistry>, channels: Arc<ConnectionLifecycle>) -> Self {
        let (phase, _) = watch::channel(StartupPhase::Idle);
        Self {
            phase,
            registry,
            channels,
            core_guards: Mutex::new(Vec::new()),
        }
    }

    // ── Boot sequence ────────────────────────────────────────────────

    /// Run the boot sequence from `Idle` to `Ready`.
    ///
    /// Only the `Ready` phase makes subscription and dispatch operations
    /// authoritative; callers gate tab/admin churn on it.
    pub async fn run(&self) -> Result<(), CoreError> {
        if *self.phase.borrow() != StartupPhase::Idle {
            let current = self.phase.borrow().clone();
            warn!(phase = %current, "startup requested outside Idle, reset first");
            return Err(CoreError::Internal(format!(
                "startup already driven (phase {current}), reset to retry"
            )));
        }

        // Phase 1: load the catalog and establish core feeders.
        self.advance(StartupPhase::CoreInitializing).await;
        let catalog = match self.load_catalog().await {
            Ok(catalog) => catalog,
            Err(e) => return Err(self.fail("CoreInitializing", &e)),
        };
        let mut guards = self.core_guards.lock().await;
        for event in catalog.core_events() {
            guards.push(self.registry.subscribe_feeder(event, SubscriptionType::Core, None));
        }
        debug!(core_events = guards.len(), "core feeder subscriptions established");
        drop(guards);
        self.advance(StartupPhase::CoreInitialized).await;

        // Phase 2: open the transport (bounded by the connect timeout).
        self.advance(StartupPhase::ConnectionEstablishing).await;
        if let Err(e) = self.channels.connect().await {
            return Err(self.fail("ConnectionEstablishing", &e));
        }
        self.advance(StartupPhase::ConnectionEstablished).await;

        self.advance(StartupPhase::Ready).await;
        info!("startup complete, subscription layer ready");
        Ok(())
    }

    async fn load_catalog(&self) -> Result<Arc<EventCatalog>, CoreError> {
        let document = self.channels.fetch_catalog().await?;
        let catalog = Arc::new(EventCatalog::from_document(document)?);
        self.registry.install_catalog(Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Reset to `Idle` so the caller can retry a failed boot. Releases
    /// the core feeders established by the previous attempt.
    pub async fn reset(&self) {
        let mut guards = self.core_guards.lock().await;
        for guard in guards.drain(..) {
            guard.unsubscribe();
        }
        drop(guards);
        self.phase.send_replace(StartupPhase::Idle);
        debug!("startup orchestrator reset to Idle");
    }

    // ── Phase bookkeeping ────────────────────────────────────────────

    async fn advance(&self, next: StartupPhase) {
        let current = self.phase.borrow().clone();
        match (current.order(), next.order()) {
            (Some(from), Some(to)) if to == from + 1 => {}
            _ => {
                // Should be impossible with the sequential driver above;
                // logged rather than asserted so a bug cannot panic boot.
                warn!(from = %current, to = %next, "non-sequential startup phase transition");
            }
        }
        debug!(phase = %next, "startup phase");
        self.phase.send_replace(next);
        // Let any phase watcher on the same runtime observe this value
        // before the next transition overwrites it.
        tokio::task::yield_now().await;
    }

    fn fail(&self, step: &str, error: &CoreError) -> CoreError {
        let cause = format!("{step}: {error}");
        warn!(%cause, "startup failed");
        self.phase.send_replace(StartupPhase::Error { cause: cause.clone() });
        CoreError::StartupFailed {
            phase: step.to_owned(),
            cause: error.to_string(),
        }
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn current_phase(&self) -> StartupPhase {
        self.phase.borrow().clone()
    }

    pub fn phase_changed(&self) -> watch::Receiver<StartupPhase> {
        self.phase.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        *self.phase.borrow() == StartupPhase::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_is_strictly_forward() {
        let phases = [
            StartupPhase::Idle,
            StartupPhase::CoreInitializing,
            StartupPhase::CoreInitialized,
            StartupPhase::ConnectionEstablishing,
            StartupPhase::ConnectionEstablished,
            StartupPhase::Ready,
        ];
        for window in phases.windows(2) {
            assert!(window[0].order() < window[1].order());
        }
        assert!(StartupPhase::Error { cause: "x".into() }.order().is_none());
    }

    #[test]
    fn terminal_phases() {
        assert!(StartupPhase::Ready.is_terminal());
        assert!(StartupPhase::Error { cause: "boom".into() }.is_terminal());
        assert!(!StartupPhase::ConnectionEstablishing.is_terminal());
    }
}
