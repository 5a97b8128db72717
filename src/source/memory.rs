//! In-memory ledger data source
//!
//! Holds account records and transaction histories in process and lets the
//! owner push effects and transactions to open watches. Counts every call so
//! callers can check how many connections a consumer opened. Used for tests,
//! demos and offline development.

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{AccountEffect, AccountRecord, EffectKind, LedgerDataSource, TransactionRecord, WatchStream};
use crate::error::SourceError;
use crate::network::Network;

type AccountKey = (String, Network);

/// Number of calls made against a [`MemoryLedger`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch_account: usize,
    pub watch_account: usize,
    pub fetch_transactions: usize,
    pub watch_transactions: usize,
}

#[derive(Default)]
struct LedgerData {
    accounts: HashMap<AccountKey, AccountRecord>,
    /// Newest first
    transactions: HashMap<AccountKey, Vec<TransactionRecord>>,
    account_watchers: HashMap<AccountKey, Vec<UnboundedSender<AccountEffect>>>,
    transaction_watchers: HashMap<AccountKey, Vec<UnboundedSender<TransactionRecord>>>,
    fetch_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryLedger {
    data: Mutex<LedgerData>,
    fetch_account_calls: AtomicUsize,
    watch_account_calls: AtomicUsize,
    fetch_transactions_calls: AtomicUsize,
    watch_transactions_calls: AtomicUsize,
    failures_pending: AtomicUsize,
    watch_outage: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, LedgerData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create or replace an account record without notifying watchers
    pub fn set_account(&self, network: Network, record: AccountRecord) {
        let key = (record.account_id.clone(), network);
        self.data().accounts.insert(key, record);
    }

    pub fn remove_account(&self, account_id: &str, network: Network) {
        self.data().accounts.remove(&(account_id.to_string(), network));
    }

    /// Replace an account's history (newest first) without notifying watchers
    pub fn set_transactions(&self, account_id: &str, network: Network, transactions: Vec<TransactionRecord>) {
        self.data()
            .transactions
            .insert((account_id.to_string(), network), transactions);
    }

    /// Deliver an effect to every open watch on the account
    ///
    /// Returns how many watches received it.
    pub fn emit_effect(&self, account_id: &str, network: Network, kind: EffectKind, ledger: u64) -> usize {
        let effect = AccountEffect {
            id: format!("{}-{}-{:?}", account_id, ledger, kind),
            kind,
            ledger,
        };
        let mut data = self.data();
        let Some(watchers) = data.account_watchers.get_mut(&(account_id.to_string(), network)) else {
            return 0;
        };
        watchers.retain(|sender| sender.unbounded_send(effect.clone()).is_ok());
        watchers.len()
    }

    /// Record a transaction and deliver it to every open transaction watch
    pub fn push_transaction(&self, account_id: &str, network: Network, transaction: TransactionRecord) -> usize {
        let key = (account_id.to_string(), network);
        let mut data = self.data();
        data.transactions
            .entry(key.clone())
            .or_default()
            .insert(0, transaction.clone());
        let Some(watchers) = data.transaction_watchers.get_mut(&key) else {
            return 0;
        };
        watchers.retain(|sender| sender.unbounded_send(transaction.clone()).is_ok());
        watchers.len()
    }

    /// End every watch on the account, as if the connection dropped
    pub fn disconnect(&self, account_id: &str, network: Network) {
        let key = (account_id.to_string(), network);
        let mut data = self.data();
        data.account_watchers.remove(&key);
        data.transaction_watchers.remove(&key);
    }

    /// Make the next `count` fetches fail with a network error
    pub fn fail_next_fetches(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// While set, every watch call fails; fetches keep working
    pub fn set_watch_outage(&self, down: bool) {
        self.watch_outage.store(down, Ordering::SeqCst);
    }

    /// Delay every fetch by `delay` before it resolves
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.data().fetch_delay = delay;
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            fetch_account: self.fetch_account_calls.load(Ordering::SeqCst),
            watch_account: self.watch_account_calls.load(Ordering::SeqCst),
            fetch_transactions: self.fetch_transactions_calls.load(Ordering::SeqCst),
            watch_transactions: self.watch_transactions_calls.load(Ordering::SeqCst),
        }
    }

    /// Watches still held open by a consumer
    pub fn open_watches(&self) -> usize {
        let data = self.data();
        let accounts = data
            .account_watchers
            .values()
            .flatten()
            .filter(|sender| !sender.is_closed())
            .count();
        let transactions = data
            .transaction_watchers
            .values()
            .flatten()
            .filter(|sender| !sender.is_closed())
            .count();
        accounts + transactions
    }

    async fn before_fetch(&self) -> Result<(), SourceError> {
        let delay = self.data().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| pending.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SourceError::network("injected failure"));
        }
        Ok(())
    }

    fn before_watch(&self) -> Result<(), SourceError> {
        if self.watch_outage.load(Ordering::SeqCst) {
            return Err(SourceError::network("streaming endpoint unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerDataSource for MemoryLedger {
    async fn fetch_account(&self, account_id: &str, network: Network) -> Result<Option<AccountRecord>, SourceError> {
        self.fetch_account_calls.fetch_add(1, Ordering::SeqCst);
        self.before_fetch().await?;
        Ok(self.data().accounts.get(&(account_id.to_string(), network)).cloned())
    }

    async fn watch_account(&self, account_id: &str, network: Network) -> Result<WatchStream<AccountEffect>, SourceError> {
        self.watch_account_calls.fetch_add(1, Ordering::SeqCst);
        self.before_watch()?;
        let (sender, receiver) = unbounded();
        self.data()
            .account_watchers
            .entry((account_id.to_string(), network))
            .or_default()
            .push(sender);
        Ok(receiver.boxed())
    }

    async fn fetch_recent_transactions(
        &self,
        account_id: &str,
        network: Network,
        limit: usize,
    ) -> Result<Option<Vec<TransactionRecord>>, SourceError> {
        self.fetch_transactions_calls.fetch_add(1, Ordering::SeqCst);
        self.before_fetch().await?;
        let key = (account_id.to_string(), network);
        let data = self.data();
        if !data.accounts.contains_key(&key) {
            return Ok(None);
        }
        let page = data
            .transactions
            .get(&key)
            .map(|transactions| transactions.iter().take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(Some(page))
    }

    async fn watch_transactions(
        &self,
        account_id: &str,
        network: Network,
    ) -> Result<WatchStream<TransactionRecord>, SourceError> {
        self.watch_transactions_calls.fetch_add(1, Ordering::SeqCst);
        self.before_watch()?;
        let (sender, receiver) = unbounded();
        self.data()
            .transaction_watchers
            .entry((account_id.to_string(), network))
            .or_default()
            .push(sender);
        Ok(receiver.boxed())
    }
}
