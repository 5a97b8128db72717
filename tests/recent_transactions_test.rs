//! Recent Transactions Subscription Tests
//!
//! Run with: cargo test --test recent_transactions_test -- --nocapture

mod common;

use common::*;
use ledger_sync::{MemoryLedger, Network, RecentTransactionsState, SubscriptionKey, SyncConfig};
use std::sync::Arc;
use std::time::Duration;

const NET: Network = Network::Testnet;

fn hashes(state: &RecentTransactionsState) -> Vec<String> {
    state.transactions.iter().map(|t| t.hash.clone()).collect()
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_streamed_transactions_sorted_by_close_time() {
    init_logging();

    let id = account_id(1);
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_account(NET, record(&id, "10"));
    ledger.set_transactions(&id, NET, vec![tx("t0", 5)]);
    let registry = registry(&ledger, test_config());

    let key = SubscriptionKey::recent_transactions(&id, NET).unwrap();
    let _handle = registry.subscribe(&key, |_| {});
    settle().await;

    let state = registry.recent_transactions(&id, NET).unwrap();
    assert!(!state.loading);
    assert!(state.activated);
    assert_eq!(hashes(&state), vec!["t0"]);

    ledger.push_transaction(&id, NET, tx("t1", 10));
    ledger.push_transaction(&id, NET, tx("t3", 30));
    ledger.push_transaction(&id, NET, tx("t2", 20));
    settle().await;

    let state = registry.recent_transactions(&id, NET).unwrap();
    assert_eq!(hashes(&state), vec!["t3", "t2", "t1", "t0"]);
    assert_eq!(ledger.calls().fetch_transactions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_transaction_is_not_republished() {
    init_logging();

    let id = account_id(1);
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_account(NET, record(&id, "10"));
    let registry = registry(&ledger, test_config());

    let key = SubscriptionKey::recent_transactions(&id, NET).unwrap();
    let (seen, listener) = recorder();
    let _handle = registry.subscribe(&key, listener);
    settle().await;

    ledger.push_transaction(&id, NET, tx("t1", 10));
    ledger.push_transaction(&id, NET, tx("t1", 10));
    settle().await;

    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(hashes(&registry.recent_transactions(&id, NET).unwrap()), vec!["t1"]);
}

#[tokio::test(start_paused = true)]
async fn test_history_is_bounded_by_limit() {
    init_logging();

    let id = account_id(1);
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_account(NET, record(&id, "10"));
    let config = SyncConfig {
        recent_transactions_limit: 3,
        ..test_config()
    };
    let registry = registry(&ledger, config);

    let key = SubscriptionKey::recent_transactions(&id, NET).unwrap();
    let _handle = registry.subscribe(&key, |_| {});
    settle().await;

    for i in 1..=5 {
        ledger.push_transaction(&id, NET, tx(&format!("t{}", i), i * 10));
    }
    settle().await;

    let state = registry.recent_transactions(&id, NET).unwrap();
    assert_eq!(hashes(&state), vec!["t5", "t4", "t3"]);
}

// ============================================================================
// Activation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unactivated_account_until_first_transaction() {
    init_logging();

    let id = account_id(1);
    let ledger = Arc::new(MemoryLedger::new());
    let registry = registry(&ledger, test_config());

    let key = SubscriptionKey::recent_transactions(&id, NET).unwrap();
    let _handle = registry.subscribe(&key, |_| {});
    settle().await;

    let state = registry.recent_transactions(&id, NET).unwrap();
    assert!(!state.loading);
    assert!(!state.activated);
    assert!(state.transactions.is_empty());

    ledger.push_transaction(&id, NET, tx("create", 100));
    settle().await;

    let state = registry.recent_transactions(&id, NET).unwrap();
    assert!(state.activated);
    assert_eq!(hashes(&state), vec!["create"]);
}

#[tokio::test(start_paused = true)]
async fn test_history_loads_while_watch_is_down() {
    init_logging();

    let id = account_id(1);
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_account(NET, record(&id, "10"));
    ledger.set_transactions(&id, NET, vec![tx("t2", 20), tx("t1", 10)]);
    ledger.set_watch_outage(true);
    let registry = registry(&ledger, test_config());

    let key = SubscriptionKey::recent_transactions(&id, NET).unwrap();
    let _handle = registry.subscribe(&key, |_| {});
    settle().await;

    let state = registry.recent_transactions(&id, NET).unwrap();
    assert!(!state.loading);
    assert!(state.activated);
    assert_eq!(hashes(&state), vec!["t2", "t1"]);

    // Stream comes back on the next retry; later pushes are applied
    ledger.set_watch_outage(false);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(ledger.open_watches(), 1);

    ledger.push_transaction(&id, NET, tx("t3", 30));
    settle().await;
    assert_eq!(hashes(&registry.recent_transactions(&id, NET).unwrap()), vec!["t3", "t2", "t1"]);
}
