//! Shared fixtures for integration tests
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use ledger_sync::keys::public_key_hex;
use ledger_sync::{
    AccountRecord, AssetBalance, MemoryLedger, SignerRef, Snapshot, SubscriptionRegistry, SyncConfig,
    TransactionRecord,
};
use secp256k1::SecretKey;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

pub fn secret(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).expect("valid key")
}

/// Account id (x-only public key hex) derived from a repeated-byte secret
pub fn account_id(byte: u8) -> String {
    public_key_hex(&secret(byte))
}

pub fn record(account_id: &str, native: &str) -> AccountRecord {
    AccountRecord {
        account_id: account_id.to_string(),
        balances: vec![AssetBalance::native(native.parse().expect("decimal"))],
        signers: vec![SignerRef::new(account_id, 1)],
        subentry_count: 0,
        sequence: 1,
    }
}

pub fn tx(hash: &str, close_secs: i64) -> TransactionRecord {
    TransactionRecord {
        hash: hash.to_string(),
        ledger: close_secs as u64,
        close_time: Utc.timestamp_opt(close_secs, 0).unwrap(),
        source_account: account_id(1),
        operation_count: 1,
        memo: None,
    }
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        grace_period: Duration::from_secs(5),
        max_idle_subscriptions: 32,
        ..SyncConfig::default()
    }
}

pub fn registry(ledger: &Arc<MemoryLedger>, config: SyncConfig) -> SubscriptionRegistry {
    SubscriptionRegistry::new(ledger.clone(), config)
}

/// Let spawned tasks run until they are all waiting again
///
/// Tests run on a paused clock, so this advances time by one millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Listener that records every snapshot it receives
pub fn recorder() -> (Arc<Mutex<Vec<Snapshot>>>, impl Fn(&Snapshot) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |snapshot: &Snapshot| sink.lock().unwrap().push(snapshot.clone()))
}
