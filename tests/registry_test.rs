//! Subscription Registry Integration Tests
//!
//! Drives the registry against the in-memory ledger on a paused Tokio clock,
//! so grace periods and retries elapse deterministically.
//!
//! Run with: cargo test --test registry_test -- --nocapture

mod common;

use common::*;
use ledger_sync::{EntityKind, MemoryLedger, Network, SubscriptionKey, Unsubscribe, WalletAccount};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const NET: Network = Network::Testnet;

fn funded_ledger(ids: &[&str]) -> Arc<MemoryLedger> {
    let ledger = Arc::new(MemoryLedger::new());
    for id in ids {
        ledger.set_account(NET, record(id, "10"));
    }
    ledger
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_equal_keys_share_one_connection() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let registry = registry(&ledger, test_config());
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let registry = registry.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { registry.acquire(&key) }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let _first = registry.subscribe(&key, |_| {});
    let _second = registry.acquire(&key).subscribe(|_| {});
    let _ = registry.get_latest(&key);
    settle().await;

    let calls = ledger.calls();
    assert_eq!(calls.watch_account, 1);
    assert_eq!(calls.fetch_account, 1);
    assert_eq!(ledger.open_watches(), 1);

    let stats = registry.stats();
    assert_eq!(stats.subscriptions, 1);
    assert_eq!(stats.listeners, 2);
}

#[tokio::test(start_paused = true)]
async fn test_different_kinds_and_networks_are_separate() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let registry = registry(&ledger, test_config());

    let _a = registry.subscribe(&SubscriptionKey::account_state(&id, NET).unwrap(), |_| {});
    let _b = registry.subscribe(&SubscriptionKey::recent_transactions(&id, NET).unwrap(), |_| {});
    let _c = registry.subscribe(&SubscriptionKey::account_state(&id, Network::Mainnet).unwrap(), |_| {});
    settle().await;

    assert_eq!(registry.stats().subscriptions, 3);
    assert_eq!(ledger.open_watches(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cosigner_key_targets_remote_account() {
    init_logging();

    let remote = account_id(2);
    let ledger = funded_ledger(&[&remote]);
    let registry = registry(&ledger, test_config());

    let cosigner = WalletAccount::cosigner("w1", "Shared", &account_id(1), &remote, NET).unwrap();
    let key = SubscriptionKey::for_account(EntityKind::AccountState, &cosigner);
    assert_eq!(key.account_id(), remote);

    let _listening = registry.subscribe(&key, |_| {});
    settle().await;
    assert!(registry.get_latest(&key).is_activated());
}

// ============================================================================
// Synchronous reads
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_latest_is_available_before_first_fetch() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    ledger.set_fetch_delay(Some(Duration::from_secs(1)));
    let registry = registry(&ledger, test_config());
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    let placeholder = registry.get_latest(&key);
    assert!(placeholder.is_loading());
    assert!(!placeholder.is_activated());
    assert!(placeholder.as_account_state().unwrap().balances.is_empty());

    let _listening = registry.subscribe(&key, |_| {});
    settle().await;
    assert!(registry.get_latest(&key).is_loading());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let loaded = registry.account_state(&id, NET).unwrap();
    assert!(!loaded.loading);
    assert!(loaded.activated);
    assert_eq!(loaded.native_balance(), "10".parse::<Decimal>().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_account_id_is_rejected() {
    init_logging();

    let registry = registry(&Arc::new(MemoryLedger::new()), test_config());
    assert!(registry.account_state("not-an-account", NET).is_err());
    assert_eq!(registry.stats().subscriptions, 0);
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_listeners_run_in_registration_order() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let registry = registry(&ledger, test_config());
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for label in 1..=3 {
        let order = order.clone();
        handles.push(registry.subscribe(&key, move |_| order.lock().unwrap().push(label)));
    }
    settle().await;
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);

    ledger.emit_effect(&id, NET, ledger_sync::EffectKind::AccountCredited, 2);
    settle().await;
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_does_not_replay_current_value() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let registry = registry(&ledger, test_config());
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    let _first = registry.subscribe(&key, |_| {});
    settle().await;
    assert!(registry.get_latest(&key).is_activated());

    let (seen, listener) = recorder();
    let _late = registry.subscribe(&key, listener);
    settle().await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_during_notification() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let registry = registry(&ledger, test_config());
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));

    let log1 = calls.clone();
    let _l1 = registry.subscribe(&key, move |_| log1.lock().unwrap().push("l1"));

    let log2 = calls.clone();
    let own_handle = slot.clone();
    let l2 = registry.subscribe(&key, move |_| {
        log2.lock().unwrap().push("l2");
        let handle = own_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.unsubscribe();
        }
    });
    *slot.lock().unwrap() = Some(l2);

    let log3 = calls.clone();
    let _l3 = registry.subscribe(&key, move |_| log3.lock().unwrap().push("l3"));

    // First push: l2 removes itself mid-pass, l3 still runs
    settle().await;
    assert_eq!(*calls.lock().unwrap(), vec!["l1", "l2", "l3"]);
    assert_eq!(registry.stats().listeners, 2);

    ledger.emit_effect(&id, NET, ledger_sync::EffectKind::AccountDebited, 2);
    settle().await;
    assert_eq!(*calls.lock().unwrap(), vec!["l1", "l2", "l3", "l1", "l3"]);
}

#[tokio::test(start_paused = true)]
async fn test_listener_may_subscribe_from_callback() {
    init_logging();

    let first = account_id(1);
    let second = account_id(2);
    let ledger = funded_ledger(&[&first, &second]);
    let registry = registry(&ledger, test_config());

    let nested: Arc<Mutex<Vec<Unsubscribe>>> = Arc::new(Mutex::new(Vec::new()));
    let inner_registry = registry.clone();
    let inner_key = SubscriptionKey::account_state(&second, NET).unwrap();
    let holder = nested.clone();
    let _outer = registry.subscribe(&SubscriptionKey::account_state(&first, NET).unwrap(), move |_| {
        let handle = inner_registry.subscribe(&inner_key, |_| {});
        holder.lock().unwrap().push(handle);
    });

    settle().await;
    settle().await;
    assert_eq!(nested.lock().unwrap().len(), 1);
    assert_eq!(registry.stats().subscriptions, 2);
    assert!(registry.account_state(&second, NET).unwrap().activated);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_is_idempotent() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let registry = registry(&ledger, test_config());
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    let _keep = registry.subscribe(&key, |_| {});
    let handle = registry.subscribe(&key, |_| {});
    let id_of = handle.id();

    handle.unsubscribe();
    handle.unsubscribe();
    drop(handle);

    assert_eq!(registry.stats().listeners, 1);
    assert!(!registry.release(&key, id_of));
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_grace_period_keeps_subscription_warm() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let registry = registry(&ledger, test_config());
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    let handle = registry.subscribe(&key, |_| {});
    settle().await;
    drop(handle);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(registry.is_open(&key));
    assert_eq!(ledger.open_watches(), 1);

    // Remount within the grace period reuses the connection
    let handle = registry.subscribe(&key, |_| {});
    settle().await;
    assert_eq!(ledger.calls().watch_account, 1);
    drop(handle);

    // The first timer fires here but no longer applies
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(registry.is_open(&key));

    tokio::time::sleep(Duration::from_secs(4)).await;
    settle().await;
    assert!(!registry.is_open(&key));
    assert_eq!(ledger.open_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_subscriptions_are_bounded() {
    init_logging();

    let ids: Vec<String> = (1..=3).map(account_id).collect();
    let ledger = funded_ledger(&ids.iter().map(String::as_str).collect::<Vec<_>>());
    let config = ledger_sync::SyncConfig {
        grace_period: Duration::from_secs(60),
        max_idle_subscriptions: 2,
        ..test_config()
    };
    let registry = registry(&ledger, config);
    let keys: Vec<SubscriptionKey> = ids
        .iter()
        .map(|id| SubscriptionKey::account_state(id, NET).unwrap())
        .collect();

    let handles: Vec<Unsubscribe> = keys.iter().map(|key| registry.subscribe(key, |_| {})).collect();
    settle().await;
    assert_eq!(ledger.open_watches(), 3);

    // Unsubscribed first, evicted first
    for handle in handles {
        handle.unsubscribe();
    }
    settle().await;

    assert!(!registry.is_open(&keys[0]));
    assert!(registry.is_open(&keys[1]));
    assert!(registry.is_open(&keys[2]));
    assert_eq!(registry.stats().idle, 2);
    assert_eq!(ledger.open_watches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_idle_bound_closes_on_last_unsubscribe() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let config = ledger_sync::SyncConfig {
        grace_period: Duration::from_secs(60),
        max_idle_subscriptions: 0,
        ..test_config()
    };
    let registry = registry(&ledger, config);
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    let handle = registry.subscribe(&key, |_| {});
    settle().await;
    assert!(registry.is_open(&key));
    assert!(registry.get_latest(&key).is_activated());

    handle.unsubscribe();
    settle().await;
    assert!(!registry.is_open(&key));
    assert_eq!(registry.stats().idle, 0);
    assert_eq!(ledger.open_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_without_listener_closes_after_grace() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let registry = registry(&ledger, test_config());
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    let subscription = registry.acquire(&key);
    settle().await;
    assert!(registry.is_open(&key));
    assert!(subscription.latest().is_activated());
    assert_eq!(registry.stats().idle, 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!registry.is_open(&key));
    assert_eq!(ledger.open_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_read_with_zero_grace_opens_nothing() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let config = ledger_sync::SyncConfig {
        grace_period: Duration::ZERO,
        ..test_config()
    };
    let registry = registry(&ledger, config);
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    for _ in 0..3 {
        assert!(registry.get_latest(&key).is_loading());
        settle().await;
    }
    assert_eq!(registry.stats().subscriptions, 0);
    assert_eq!(ledger.calls().watch_account, 0);

    // A listener still opens it
    let _handle = registry.subscribe(&key, |_| {});
    settle().await;
    assert!(registry.get_latest(&key).is_activated());
    assert_eq!(ledger.calls().watch_account, 1);
}

#[tokio::test(start_paused = true)]
async fn test_update_for_closed_subscription_is_discarded() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    ledger.set_fetch_delay(Some(Duration::from_secs(1)));
    let config = ledger_sync::SyncConfig {
        grace_period: Duration::ZERO,
        ..test_config()
    };
    let registry = registry(&ledger, config);
    let key = SubscriptionKey::account_state(&id, NET).unwrap();

    // Fetch still in flight when the only listener leaves
    let (stale, listener) = recorder();
    let handle = registry.subscribe(&key, listener);
    settle().await;
    drop(handle);
    assert!(!registry.is_open(&key));

    let (fresh, listener) = recorder();
    let _handle = registry.subscribe(&key, listener);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(stale.lock().unwrap().is_empty());
    assert_eq!(fresh.lock().unwrap().len(), 1);
    assert!(registry.get_latest(&key).is_activated());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_every_watch() {
    init_logging();

    let id = account_id(1);
    let ledger = funded_ledger(&[&id]);
    let registry = registry(&ledger, test_config());

    let _a = registry.subscribe(&SubscriptionKey::account_state(&id, NET).unwrap(), |_| {});
    let _b = registry.subscribe(&SubscriptionKey::recent_transactions(&id, NET).unwrap(), |_| {});
    settle().await;
    assert_eq!(ledger.open_watches(), 2);

    registry.shutdown();
    settle().await;

    assert_eq!(registry.stats().subscriptions, 0);
    assert_eq!(ledger.open_watches(), 0);
}
