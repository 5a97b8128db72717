//! Subscription Registry - deduplicated, long-lived ledger subscriptions
//!
//! Every consumer asking for the same `(kind, account, network)` shares one
//! subscription and therefore one connection to the ledger data source.
//! The latest snapshot is cached and can be read synchronously at any time;
//! listeners only receive future pushes.
//!
//! Subscriptions without listeners are not torn down immediately. They stay
//! warm for a grace period so a consumer re-mounting with the same key does
//! not reconnect, and the number of such idle subscriptions is bounded with
//! least-recently-unsubscribed eviction.
//!
//! Listeners are always invoked with the registry lock released, so they may
//! call back into the registry (subscribe, unsubscribe, read).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::account::WalletAccount;
use crate::config::SyncConfig;
use crate::error::KeyError;
use crate::keys::{is_valid_public_key, normalize_key};
use crate::network::Network;
use crate::source::LedgerDataSource;
use crate::state::{AccountState, RecentTransactionsState, Snapshot};
use crate::subscription;

/// What a subscription tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    AccountState,
    RecentTransactions,
}

/// Registry lookup key. Structurally equal keys share one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    kind: EntityKind,
    account_id: String,
    network: Network,
}

impl SubscriptionKey {
    /// Build a key, rejecting malformed account ids
    pub fn new(kind: EntityKind, account_id: &str, network: Network) -> Result<Self, KeyError> {
        let account_id = normalize_key(account_id);
        if !is_valid_public_key(&account_id) {
            return Err(KeyError::InvalidAccountId(account_id));
        }
        Ok(Self {
            kind,
            account_id,
            network,
        })
    }

    pub fn account_state(account_id: &str, network: Network) -> Result<Self, KeyError> {
        Self::new(EntityKind::AccountState, account_id, network)
    }

    pub fn recent_transactions(account_id: &str, network: Network) -> Result<Self, KeyError> {
        Self::new(EntityKind::RecentTransactions, account_id, network)
    }

    /// Key for the ledger account a wallet entry refers to
    ///
    /// Co-signature keypairs resolve to the remote account they sign for.
    pub fn for_account(kind: EntityKind, account: &WalletAccount) -> Self {
        // Wallet accounts only hold validated, normalized ids
        Self {
            kind,
            account_id: account.ledger_account_id().to_string(),
            network: account.network(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn placeholder(&self) -> Snapshot {
        match self.kind {
            EntityKind::AccountState => {
                Snapshot::AccountState(Arc::new(AccountState::loading(&self.account_id, self.network)))
            }
            EntityKind::RecentTransactions => Snapshot::RecentTransactions(Arc::new(
                RecentTransactionsState::loading(&self.account_id, self.network),
            )),
        }
    }
}

/// Callback receiving snapshot pushes
pub type Listener = Arc<dyn Fn(&Snapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Registry occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub subscriptions: usize,
    pub listeners: usize,
    pub idle: usize,
}

struct Entry {
    /// Distinguishes this subscription from an earlier one under the same key
    instance: u64,
    latest: Snapshot,
    /// Registration order is delivery order
    listeners: Vec<(ListenerId, Listener)>,
    connection: Option<JoinHandle<()>>,
    /// Order in which entries became idle, `None` while listened to
    idle_since: Option<u64>,
    /// Bumped on every idle transition; a grace timer only fires for its own token
    idle_token: u64,
}

impl Entry {
    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.abort();
        }
    }
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<SubscriptionKey, Entry>,
    next_id: u64,
}

impl RegistryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Entries and listeners removed under the lock, dropped after it is released
///
/// Dropping a listener may drop an `Unsubscribe`, which re-enters the registry.
#[derive(Default)]
struct Garbage {
    entries: Vec<Entry>,
    listeners: Vec<Listener>,
}

struct Shared {
    state: Mutex<RegistryState>,
    source: Arc<dyn LedgerDataSource>,
    config: SyncConfig,
    runtime: Handle,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Every critical section leaves the map consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up the entry for `key`, opening a subscription if there is none
    fn ensure_entry(self: &Arc<Self>, state: &mut RegistryState, key: &SubscriptionKey, garbage: &mut Garbage) {
        if state.entries.contains_key(key) {
            return;
        }

        let instance = state.next_id();
        log::info!(
            "Opening {:?} subscription for {} on {}",
            key.kind,
            key.account_id,
            key.network
        );

        let publisher = Publisher {
            shared: Arc::downgrade(self),
            key: key.clone(),
            instance,
        };
        let connection = self.runtime.spawn(subscription::run(
            publisher,
            Arc::clone(&self.source),
            self.config.clone(),
        ));

        state.entries.insert(
            key.clone(),
            Entry {
                instance,
                latest: key.placeholder(),
                listeners: Vec::new(),
                connection: Some(connection),
                idle_since: None,
                idle_token: 0,
            },
        );

        // Nobody listens yet: keep it warm only for the grace period
        self.mark_idle(state, key, Some(key), garbage);
    }

    /// Start the grace timer for an entry without listeners
    ///
    /// `protect` is exempt from the idle bound on this pass.
    fn mark_idle(
        self: &Arc<Self>,
        state: &mut RegistryState,
        key: &SubscriptionKey,
        protect: Option<&SubscriptionKey>,
        garbage: &mut Garbage,
    ) {
        let order = state.next_id();
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        entry.idle_since = Some(order);
        entry.idle_token += 1;
        let token = entry.idle_token;

        let shared = Arc::downgrade(self);
        let grace_period = self.config.grace_period;
        let key = key.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(grace_period).await;
            if let Some(shared) = shared.upgrade() {
                shared.evict_if_idle(&key, token);
            }
        });

        self.enforce_idle_limit(state, protect, garbage);
    }

    fn evict_if_idle(&self, key: &SubscriptionKey, token: u64) {
        let mut garbage = Garbage::default();
        {
            let mut state = self.lock();
            let still_idle = state
                .entries
                .get(key)
                .map_or(false, |entry| entry.listeners.is_empty() && entry.idle_token == token);
            if still_idle {
                log::debug!("Grace period elapsed for {}", key.account_id);
                self.evict(&mut state, key, &mut garbage);
            }
        }
        drop(garbage);
    }

    /// Evict the least recently unsubscribed idle entries above the bound
    fn enforce_idle_limit(&self, state: &mut RegistryState, protect: Option<&SubscriptionKey>, garbage: &mut Garbage) {
        let mut idle: Vec<(u64, SubscriptionKey)> = state
            .entries
            .iter()
            .filter(|(key, entry)| entry.listeners.is_empty() && Some(*key) != protect)
            .map(|(key, entry)| (entry.idle_since.unwrap_or(u64::MAX), key.clone()))
            .collect();

        if idle.len() <= self.config.max_idle_subscriptions {
            return;
        }

        idle.sort();
        let excess = idle.len() - self.config.max_idle_subscriptions;
        for (_, key) in idle.into_iter().take(excess) {
            log::debug!("Idle subscription {} evicted to stay within the idle bound", key.account_id);
            self.evict(state, &key, garbage);
        }
    }

    fn evict(&self, state: &mut RegistryState, key: &SubscriptionKey, garbage: &mut Garbage) {
        if let Some(mut entry) = state.entries.remove(key) {
            entry.close();
            log::info!(
                "Closed {:?} subscription for {} on {}",
                key.kind,
                key.account_id,
                key.network
            );
            garbage.entries.push(entry);
        }
    }

    fn release(self: &Arc<Self>, key: &SubscriptionKey, id: ListenerId) -> bool {
        let mut garbage = Garbage::default();
        let removed = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                return false;
            };
            let Some(position) = entry.listeners.iter().position(|(listener_id, _)| *listener_id == id) else {
                return false;
            };
            let (_, listener) = entry.listeners.remove(position);
            garbage.listeners.push(listener);
            log::debug!(
                "Listener {:?} removed from {} ({} remaining)",
                id,
                key.account_id,
                entry.listeners.len()
            );

            if entry.listeners.is_empty() {
                if self.config.grace_period.is_zero() {
                    self.evict(&mut state, key, &mut garbage);
                } else {
                    self.mark_idle(&mut state, key, None, &mut garbage);
                }
            }
            true
        };
        drop(garbage);
        removed
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for entry in state.entries.values_mut() {
            entry.close();
        }
    }
}

/// Write access to one subscription's snapshot, held by its connection task
///
/// Updates for a subscription that has since been torn down are discarded.
pub(crate) struct Publisher {
    shared: Weak<Shared>,
    key: SubscriptionKey,
    instance: u64,
}

impl Publisher {
    pub(crate) fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Whether the subscription this publisher feeds still exists
    pub(crate) fn is_alive(&self) -> bool {
        self.shared.upgrade().map_or(false, |shared| {
            shared
                .lock()
                .entries
                .get(&self.key)
                .map_or(false, |entry| entry.instance == self.instance)
        })
    }

    /// Store `snapshot` as the latest value and push it to every listener
    ///
    /// Returns `false` if the subscription is gone.
    pub(crate) fn publish(&self, snapshot: Snapshot) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };

        let listeners: Vec<Listener> = {
            let mut state = shared.lock();
            match state.entries.get_mut(&self.key) {
                Some(entry) if entry.instance == self.instance => {
                    entry.latest = snapshot.clone();
                    entry.listeners.iter().map(|(_, listener)| Arc::clone(listener)).collect()
                }
                _ => {
                    log::debug!(
                        "Discarding update for closed subscription {} on {}",
                        self.key.account_id,
                        self.key.network
                    );
                    return false;
                }
            }
        };

        log::debug!(
            "Pushing {:?} snapshot for {} to {} listener(s)",
            self.key.kind,
            self.key.account_id,
            listeners.len()
        );
        // Everyone registered at the start of the pass gets this snapshot
        for listener in &listeners {
            listener(&snapshot);
        }
        true
    }
}

/// Keyed cache of live ledger subscriptions
///
/// Cheap to clone; all clones share the same subscriptions.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    shared: Arc<Shared>,
}

impl SubscriptionRegistry {
    /// Create a registry over `source`
    ///
    /// Must be called from within a Tokio runtime; connection tasks and
    /// grace timers run on that runtime.
    pub fn new(source: Arc<dyn LedgerDataSource>, config: SyncConfig) -> Self {
        log::info!(
            "Subscription registry initialized (grace={}ms, max_idle={}, recent_tx_limit={})",
            config.grace_period.as_millis(),
            config.max_idle_subscriptions,
            config.recent_transactions_limit
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState::default()),
                source,
                config,
                runtime: Handle::current(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Get the subscription for `key`, opening it if needed
    pub fn acquire(&self, key: &SubscriptionKey) -> Subscription {
        let mut garbage = Garbage::default();
        {
            let mut state = self.shared.lock();
            self.shared.ensure_entry(&mut state, key, &mut garbage);
        }
        drop(garbage);
        Subscription {
            key: key.clone(),
            registry: self.clone(),
        }
    }

    /// Latest snapshot for `key`
    ///
    /// Never blocks. Opens the subscription if needed and returns a loading
    /// placeholder until the first fetch resolves. A read without listeners
    /// keeps the subscription open for the grace period only; with a zero
    /// grace period nothing is opened and the placeholder is returned.
    pub fn get_latest(&self, key: &SubscriptionKey) -> Snapshot {
        let mut garbage = Garbage::default();
        let latest = {
            let mut state = self.shared.lock();
            if self.shared.config.grace_period.is_zero() && !state.entries.contains_key(key) {
                return key.placeholder();
            }
            self.shared.ensure_entry(&mut state, key, &mut garbage);
            state
                .entries
                .get(key)
                .map(|entry| entry.latest.clone())
                .unwrap_or_else(|| key.placeholder())
        };
        drop(garbage);
        latest
    }

    /// Register `listener` for every future snapshot of `key`
    ///
    /// The listener is not invoked during registration; read
    /// [`get_latest`](Self::get_latest) for the current value.
    pub fn subscribe<F>(&self, key: &SubscriptionKey, listener: F) -> Unsubscribe
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let mut garbage = Garbage::default();
        let id = {
            let mut state = self.shared.lock();
            self.shared.ensure_entry(&mut state, key, &mut garbage);
            let id = ListenerId(state.next_id());
            match state.entries.get_mut(key) {
                Some(entry) => {
                    entry.listeners.push((id, Arc::new(listener)));
                    entry.idle_since = None;
                    entry.idle_token += 1;
                    log::debug!(
                        "Listener {:?} added to {} ({} total)",
                        id,
                        key.account_id,
                        entry.listeners.len()
                    );
                }
                None => log::warn!("Subscription for {} was evicted before a listener attached", key.account_id),
            }
            id
        };
        drop(garbage);

        Unsubscribe {
            shared: Arc::downgrade(&self.shared),
            key: key.clone(),
            id,
            released: AtomicBool::new(false),
        }
    }

    /// Remove one listener. Returns `false` if it was not registered.
    pub fn release(&self, key: &SubscriptionKey, id: ListenerId) -> bool {
        self.shared.release(key, id)
    }

    /// Latest account state for an account id
    pub fn account_state(&self, account_id: &str, network: Network) -> Result<Arc<AccountState>, KeyError> {
        let key = SubscriptionKey::account_state(account_id, network)?;
        Ok(match self.get_latest(&key) {
            Snapshot::AccountState(state) => state,
            Snapshot::RecentTransactions(_) => Arc::new(AccountState::loading(key.account_id(), network)),
        })
    }

    /// Latest transaction history for an account id
    pub fn recent_transactions(
        &self,
        account_id: &str,
        network: Network,
    ) -> Result<Arc<RecentTransactionsState>, KeyError> {
        let key = SubscriptionKey::recent_transactions(account_id, network)?;
        Ok(match self.get_latest(&key) {
            Snapshot::RecentTransactions(state) => state,
            Snapshot::AccountState(_) => Arc::new(RecentTransactionsState::loading(key.account_id(), network)),
        })
    }

    pub fn is_open(&self, key: &SubscriptionKey) -> bool {
        self.shared.lock().entries.contains_key(key)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.shared.lock();
        let mut stats = RegistryStats {
            subscriptions: state.entries.len(),
            ..Default::default()
        };
        for entry in state.entries.values() {
            stats.listeners += entry.listeners.len();
            if entry.listeners.is_empty() {
                stats.idle += 1;
            }
        }
        stats
    }

    /// Close every connection and forget all subscriptions
    pub fn shutdown(&self) {
        let entries: Vec<Entry> = {
            let mut state = self.shared.lock();
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        log::info!("Shutting down subscription registry ({} subscription(s))", entries.len());
        for mut entry in entries {
            entry.close();
        }
    }
}

/// Consumer-side view of one subscription
#[derive(Clone)]
pub struct Subscription {
    key: SubscriptionKey,
    registry: SubscriptionRegistry,
}

impl Subscription {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn latest(&self) -> Snapshot {
        self.registry.get_latest(&self.key)
    }

    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.registry.subscribe(&self.key, listener)
    }
}

/// Handle removing a listener; idempotent, also released on drop
#[must_use = "dropping an Unsubscribe removes the listener immediately"]
pub struct Unsubscribe {
    shared: Weak<Shared>,
    key: SubscriptionKey,
    id: ListenerId,
    released: AtomicBool,
}

impl Unsubscribe {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.release(&self.key, self.id);
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
