//! Event subscription and connection-resilience layer between
//! `livewire-api` and UI consumers.
//!
//! This crate owns the subscription registry, the startup sequencing, and
//! the degraded-mode handling for a live event link:
//!
//! - **[`LiveLink`]** — Central facade managing the full lifecycle:
//!   [`start()`](LiveLink::start) spawns the inbound event pump and the
//!   transport state watch, then drives the boot sequence (catalog fetch,
//!   core channels, connection) to `Ready`.
//!
//! - **[`SubscriptionRegistry`]** — Central ledger of every active
//!   subscription (`DashMap` indexes by id, event, and tab) plus the
//!   dispatch path that fans inbound payloads out to callbacks with
//!   per-callback fault isolation.
//!
//! - **[`StartupOrchestrator`]** — Strictly forward phase machine
//!   (`Idle → … → Ready`) observable through a `watch` channel.
//!
//! - **[`FallbackController`]** — Degraded-mode switch that parks the
//!   active view on the fallback view while the event channel is down and
//!   restores it on recovery.
//!
//! - **[`AdminModeManager`]** / **[`TabLifecycleManager`]** — Privilege
//!   elevation (admin channel set, privileged payload purge on exit) and
//!   per-view channel churn.

pub mod admin;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod fallback;
pub mod link;
pub mod model;
pub mod registry;
pub mod startup;
pub mod store;
pub mod tabs;

// ── Primary re-exports ──────────────────────────────────────────────
pub use admin::AdminModeManager;
pub use catalog::EventCatalog;
pub use config::LinkConfig;
pub use connection::{ConnectionLifecycle, ConnectionState};
pub use error::CoreError;
pub use fallback::{FallbackController, FallbackState};
pub use link::LiveLink;
pub use model::{EventEnvelope, PrivilegeContext, TabId, ViewId};
pub use registry::{
    EventCallback, SubscribeOptions, Subscription, SubscriptionRegistry, SubscriptionStats,
    SubscriptionType, UnsubscribeGuard,
};
pub use startup::{StartupOrchestrator, StartupPhase};
pub use store::PayloadStore;
pub use tabs::TabLifecycleManager;
