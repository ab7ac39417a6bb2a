#![allow(clippy::unwrap_used)]
// Integration tests for `SubscriptionRegistry` against an in-memory
// transport fake.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use url::Url;

use livewire_core::{
    ConnectionLifecycle, CoreError, EventCatalog, LinkConfig, PayloadStore, PrivilegeContext,
    SubscriptionRegistry, SubscriptionType, TabId,
};

use support::MockTransport;

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    transport: Arc<MockTransport>,
    registry: Arc<SubscriptionRegistry>,
    store: Arc<PayloadStore>,
}

fn harness() -> Harness {
    harness_with_window(Duration::from_secs(3600))
}

fn harness_with_window(window: Duration) -> Harness {
    let transport = MockTransport::new();
    let config = LinkConfig::new(Url::parse("ws://127.0.0.1:1/events").unwrap())
        .with_debounce_window(window);
    let channels = Arc::new(ConnectionLifecycle::new(
        transport.clone() as Arc<dyn livewire_api::EventTransport>,
        &config,
    ));
    let store = Arc::new(PayloadStore::new());
    let registry = Arc::new(SubscriptionRegistry::new(channels, store.clone()));
    registry.install_catalog(Arc::new(
        EventCatalog::from_document(support::sample_catalog()).unwrap(),
    ));
    Harness {
        transport,
        registry,
        store,
    }
}

fn counting_callback(counter: &Arc<AtomicUsize>) -> livewire_core::EventCallback {
    let counter = Arc::clone(counter);
    Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

fn standard_ctx() -> PrivilegeContext {
    PrivilegeContext {
        elevated: false,
        payload_privileged: false,
    }
}

// ── Unsubscribe semantics ───────────────────────────────────────────

#[test]
fn test_unsubscribe_is_idempotent() {
    let h = harness();
    let counter = Arc::new(AtomicUsize::new(0));
    let guard = h
        .registry
        .subscribe_to_core_event("system:stats", counting_callback(&counter));

    guard.unsubscribe();
    guard.unsubscribe();
    guard.unsubscribe();

    assert_eq!(h.transport.torn_down(), vec!["core:system:stats"]);
    assert_eq!(h.registry.stats().total, 0);

    // The torn-down subscription no longer receives dispatches.
    h.registry
        .dispatch("system:stats", serde_json::json!({}), standard_ctx());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unknown_id_falls_back_to_retract_by_event_name() {
    let h = harness();
    h.registry
        .unsubscribe_from_event("ghost:event#Standard#-#feeder#99");
    assert_eq!(h.transport.retracts(), vec!["ghost:event"]);
}

#[test]
fn test_failed_teardown_falls_back_to_retract() {
    let h = harness();
    h.transport.set_teardown_failure(true);
    let guard = h
        .registry
        .subscribe_to_core_event("system:stats", Arc::new(|_| Ok(())));

    guard.unsubscribe();

    assert!(h.transport.torn_down().is_empty());
    assert_eq!(h.transport.retracts(), vec!["system:stats"]);
    assert_eq!(h.registry.stats().total, 0);
}

// ── Category validation ─────────────────────────────────────────────

#[test]
fn test_installed_catalog_is_visible_without_observers() {
    // Nothing subscribes to the catalog slot; installation must still
    // take effect for every later classification.
    let h = harness();
    assert!(h.registry.catalog().is_core_event("system:stats"));
    assert!(h.registry.catalog().is_admin_event("admin:audit"));
    assert!(!h.registry.catalog().is_core_event("dhcp:leases"));
}

#[test]
fn test_category_misuse_downgrades_to_standard() {
    let h = harness();
    h.registry
        .subscribe_to_core_event("dhcp:leases", Arc::new(|_| Ok(())));
    h.registry
        .subscribe_to_admin_event("system:stats", Arc::new(|_| Ok(())));

    let leases = h.registry.subscriptions_by_event("dhcp:leases");
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].kind, SubscriptionType::Standard);

    let stats = h.registry.subscriptions_by_event("system:stats");
    assert_eq!(stats[0].kind, SubscriptionType::Standard);

    // Downgraded subscriptions announce on the standard channel.
    assert_eq!(
        h.transport.announces(),
        vec!["standard:dhcp:leases", "standard:system:stats"]
    );
}

#[test]
fn test_tab_subscription_without_tab_registers_nothing() {
    let h = harness();
    let guard = h.registry.subscribe(
        "dhcp:leases",
        Arc::new(|_| Ok(())),
        SubscriptionType::Tab,
        None,
        Default::default(),
    );

    assert!(guard.id().is_none());
    assert_eq!(h.registry.stats().total, 0);
    assert!(h.transport.announces().is_empty());
    guard.unsubscribe();
}

// ── Tab cleanup ─────────────────────────────────────────────────────

#[test]
fn test_tab_cleanup_is_scoped_to_one_tab() {
    let h = harness();
    let dhcp = TabId::from("dhcp");
    let mining = TabId::from("mining");

    h.registry
        .subscribe_to_tab_event("dhcp:leases", Arc::new(|_| Ok(())), dhcp.clone());
    h.registry
        .subscribe_to_tab_event("dhcp:reservations", Arc::new(|_| Ok(())), dhcp.clone());
    h.registry
        .subscribe_to_tab_event("mining:hashrate", Arc::new(|_| Ok(())), mining.clone());

    h.registry.clear_tab_subscriptions(&dhcp);

    assert_eq!(h.transport.cleared_tabs(), vec!["dhcp"]);
    assert!(h.registry.subscriptions_by_tab(&dhcp).is_empty());
    assert_eq!(h.registry.subscriptions_by_tab(&mining).len(), 1);
    assert!(h.registry.subscriptions_by_event("dhcp:leases").is_empty());

    // The bulk call replaced per-channel teardowns; none may fire.
    assert!(h.transport.torn_down().is_empty());

    // Clearing an unknown tab is a no-op.
    h.registry.clear_tab_subscriptions(&TabId::from("unknown"));
    assert_eq!(h.transport.cleared_tabs(), vec!["dhcp"]);
}

#[test]
fn test_clear_by_type_drops_only_that_type() {
    let h = harness();
    h.registry
        .subscribe_to_admin_event("admin:sessions", Arc::new(|_| Ok(())));
    h.registry
        .subscribe_to_admin_event("admin:audit", Arc::new(|_| Ok(())));
    h.registry
        .subscribe_to_core_event("system:stats", Arc::new(|_| Ok(())));

    h.registry.clear_subscriptions_by_type(SubscriptionType::Admin);

    let stats = h.registry.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_type.get(&SubscriptionType::Core), Some(&1));
    assert_eq!(
        h.transport.torn_down(),
        vec!["admin:admin:sessions", "admin:admin:audit"]
    );
}

// ── Dispatch ────────────────────────────────────────────────────────

#[test]
fn test_callback_fault_does_not_disturb_siblings() {
    let h = harness();
    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));

    h.registry
        .subscribe_to_core_event("system:stats", counting_callback(&before));
    h.registry.subscribe_to_core_event(
        "system:stats",
        Arc::new(|_| {
            Err(CoreError::CallbackFault {
                message: "listener exploded".into(),
            })
        }),
    );
    h.registry
        .subscribe_to_core_event("system:stats", counting_callback(&after));

    h.registry
        .dispatch("system:stats", serde_json::json!({"cpu": 40}), standard_ctx());

    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dispatch_snapshot_survives_mid_pass_unsubscribe() {
    let h = harness();
    let sibling_hits = Arc::new(AtomicUsize::new(0));

    let sibling = h
        .registry
        .subscribe_to_core_event("system:stats", counting_callback(&sibling_hits));

    // First callback unsubscribes the sibling during the pass; the
    // snapshot already enumerated it, so it is still delivered to.
    let saboteur = sibling.clone();
    h.registry.subscribe_to_core_event(
        "system:stats",
        Arc::new(move |_| {
            saboteur.unsubscribe();
            Ok(())
        }),
    );

    h.registry
        .dispatch("system:stats", serde_json::json!({}), standard_ctx());
    assert_eq!(sibling_hits.load(Ordering::SeqCst), 1);

    // The next pass no longer includes it.
    h.registry
        .dispatch("system:stats", serde_json::json!({}), standard_ctx());
    assert_eq!(sibling_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_feeders_route_to_store_without_callbacks() {
    let h = harness();
    let hits = Arc::new(AtomicUsize::new(0));

    h.registry
        .subscribe_feeder("system:stats", SubscriptionType::Core, None);
    h.registry
        .subscribe_to_core_event("system:stats", counting_callback(&hits));

    h.registry
        .dispatch("system:stats", serde_json::json!({"cpu": 12}), standard_ctx());

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.store.latest("system:stats", false),
        Some(serde_json::json!({"cpu": 12}))
    );
}

#[test]
fn test_privileged_variant_selection() {
    let h = harness();

    // Standard context on a core event lands in the standard slot.
    h.registry
        .dispatch("system:stats", serde_json::json!({"cpu": 1}), standard_ctx());
    assert_eq!(
        h.store.latest("system:stats", true),
        Some(serde_json::json!({"cpu": 1}))
    );

    // Elevated context selects the privileged slot.
    h.registry.dispatch(
        "system:stats",
        serde_json::json!({"cpu": 1, "perproc": []}),
        PrivilegeContext {
            elevated: true,
            payload_privileged: false,
        },
    );
    assert_eq!(
        h.store.latest("system:stats", false),
        Some(serde_json::json!({"cpu": 1}))
    );
    assert_eq!(
        h.store.latest("system:stats", true),
        Some(serde_json::json!({"cpu": 1, "perproc": []}))
    );

    // Admin-category events are privileged regardless of context.
    h.registry
        .dispatch("admin:audit", serde_json::json!({"entries": 2}), standard_ctx());
    assert_eq!(h.store.latest("admin:audit", false), None);
    assert_eq!(
        h.store.latest("admin:audit", true),
        Some(serde_json::json!({"entries": 2}))
    );

    // Exempt events never store a privileged variant, even elevated.
    h.registry.dispatch(
        "system:health",
        serde_json::json!({"ok": true}),
        PrivilegeContext {
            elevated: true,
            payload_privileged: true,
        },
    );
    assert_eq!(
        h.store.latest("system:health", false),
        Some(serde_json::json!({"ok": true}))
    );
}

// ── Debounce ────────────────────────────────────────────────────────

#[test]
fn test_duplicate_channel_requests_are_debounced() {
    let h = harness();

    let first = h
        .registry
        .subscribe_to_core_event("system:stats", Arc::new(|_| Ok(())));
    let second = h
        .registry
        .subscribe_to_core_event("system:stats", Arc::new(|_| Ok(())));

    // One wire announce, two independent registrations.
    assert_eq!(h.transport.announces(), vec!["core:system:stats"]);
    assert_eq!(h.registry.stats().total, 2);

    // The deferred registration rides the live channel, so its removal
    // owes the wire nothing.
    second.unsubscribe();
    assert!(h.transport.retracts().is_empty());
    assert!(h.transport.torn_down().is_empty());

    first.unsubscribe();
    assert_eq!(h.transport.torn_down(), vec!["core:system:stats"]);
}

#[test]
fn test_deferred_unsubscribe_leaves_the_live_channel_intact() {
    let h = harness();
    let hits = Arc::new(AtomicUsize::new(0));

    let keeper = h
        .registry
        .subscribe_to_core_event("system:stats", counting_callback(&hits));
    let rider = h
        .registry
        .subscribe_to_core_event("system:stats", Arc::new(|_| Ok(())));

    rider.unsubscribe();

    // Events still flow to the remaining listener over the original
    // channel, which was neither torn down nor retracted.
    h.registry
        .dispatch("system:stats", serde_json::json!({"cpu": 3}), standard_ctx());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(h.transport.retracts().is_empty());
    assert!(h.transport.torn_down().is_empty());

    keeper.unsubscribe();
    assert_eq!(h.transport.torn_down(), vec!["core:system:stats"]);
}

#[test]
fn test_resubscribe_after_unsubscribe_reopens_the_channel() {
    let h = harness();

    let first = h
        .registry
        .subscribe_to_core_event("system:stats", Arc::new(|_| Ok(())));
    first.unsubscribe();
    assert_eq!(h.transport.torn_down(), vec!["core:system:stats"]);

    // No channel is live any more, so the next request must announce
    // immediately even though the window has not elapsed.
    let second = h
        .registry
        .subscribe_to_core_event("system:stats", Arc::new(|_| Ok(())));
    assert_eq!(
        h.transport.announces(),
        vec!["core:system:stats", "core:system:stats"]
    );

    second.unsubscribe();
    assert_eq!(
        h.transport.torn_down(),
        vec!["core:system:stats", "core:system:stats"]
    );
}

// ── Stats ───────────────────────────────────────────────────────────

#[test]
fn test_stats_agree_with_live_records() {
    let h = harness();
    h.registry
        .subscribe_to_core_event("system:stats", Arc::new(|_| Ok(())));
    h.registry
        .subscribe_to_core_event("system:health", Arc::new(|_| Ok(())));
    h.registry
        .subscribe_to_tab_event("dhcp:leases", Arc::new(|_| Ok(())), TabId::from("dhcp"));
    h.registry
        .subscribe_feeder("mining:hashrate", SubscriptionType::Tab, Some(TabId::from("mining")));

    let stats = h.registry.stats();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.by_type.values().sum::<usize>(), stats.total);
    assert_eq!(stats.by_event.values().sum::<usize>(), stats.total);
    assert_eq!(stats.by_type.get(&SubscriptionType::Core), Some(&2));
    assert_eq!(stats.by_type.get(&SubscriptionType::Tab), Some(&2));
    assert_eq!(stats.by_tab.get("dhcp"), Some(&1));
    assert_eq!(stats.by_tab.get("mining"), Some(&1));
}
