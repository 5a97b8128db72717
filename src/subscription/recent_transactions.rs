use futures::StreamExt;
use std::sync::Arc;
use tokio::time::sleep;

use super::with_retry;
use crate::config::RetryConfig;
use crate::network::Network;
use crate::registry::Publisher;
use crate::source::{LedgerDataSource, TransactionRecord};
use crate::state::{RecentTransactionsState, Snapshot};

pub(super) async fn run(publisher: Publisher, source: Arc<dyn LedgerDataSource>, retry: RetryConfig, limit: usize) {
    let source: &dyn LedgerDataSource = source.as_ref();
    let key = publisher.key().clone();
    let account_id = key.account_id();
    let network = key.network();
    let mut attempt = 0u32;

    loop {
        match source.watch_transactions(account_id, network).await {
            Ok(mut incoming) => {
                let Some(page) = with_retry(&retry, &publisher, "Transaction fetch", move || {
                    source.fetch_recent_transactions(account_id, network, limit)
                })
                .await
                else {
                    return;
                };

                let mut state = loaded(account_id, network, page, limit);
                if !publisher.publish(Snapshot::RecentTransactions(Arc::new(state.clone()))) {
                    return;
                }
                attempt = 0;

                while let Some(transaction) = incoming.next().await {
                    let hash = transaction.hash.clone();
                    match apply_transaction(&state, transaction, limit) {
                        Some(next) => {
                            state = next;
                            if !publisher.publish(Snapshot::RecentTransactions(Arc::new(state.clone()))) {
                                return;
                            }
                        }
                        None => log::debug!("Transaction {} already listed or too old, skipping", hash),
                    }
                }
                log::warn!("⚠️  Transaction watch for {} on {} ended", account_id, network);
            }
            Err(err) => {
                if !publisher.is_alive() {
                    return;
                }
                log::warn!("⚠️  Transaction watch for {} on {} failed: {}", account_id, network, err);
                match source.fetch_recent_transactions(account_id, network, limit).await {
                    Ok(page) => {
                        let state = loaded(account_id, network, page, limit);
                        if !publisher.publish(Snapshot::RecentTransactions(Arc::new(state))) {
                            return;
                        }
                    }
                    Err(err) => {
                        log::warn!("⚠️  Transaction fetch for {} failed: {}", account_id, err);
                        if !publisher.is_alive() {
                            return;
                        }
                    }
                }
            }
        }

        let delay = retry.delay_for(attempt);
        log::debug!("Reopening transaction watch for {} in {}ms", account_id, delay.as_millis());
        sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

/// History snapshot from a fetched page. `None` means the account does not exist yet.
fn loaded(
    account_id: &str,
    network: Network,
    page: Option<Vec<TransactionRecord>>,
    limit: usize,
) -> RecentTransactionsState {
    let mut state = RecentTransactionsState::loading(account_id, network);
    state.loading = false;
    if let Some(page) = page {
        state.activated = true;
        state.transactions = initial_page(page, limit);
    }
    log::debug!(
        "Loaded {} recent transaction(s) for {} (activated: {})",
        state.transactions.len(),
        account_id,
        state.activated
    );
    state
}

/// Newest first by close time, deduplicated by hash, at most `limit` long
fn initial_page(mut page: Vec<TransactionRecord>, limit: usize) -> Vec<TransactionRecord> {
    page.sort_by(|a, b| b.close_time.cmp(&a.close_time));
    let mut seen = std::collections::HashSet::new();
    page.retain(|transaction| seen.insert(transaction.hash.clone()));
    page.truncate(limit);
    page
}

/// Insert a streamed transaction into a history snapshot
///
/// Keeps the list sorted newest first by close time; a transaction closing at
/// the same time as listed ones goes in front of them. Returns `None` when
/// nothing changes: the hash is already listed, or the list is full and the
/// transaction is older than everything in it.
pub fn apply_transaction(
    state: &RecentTransactionsState,
    transaction: TransactionRecord,
    limit: usize,
) -> Option<RecentTransactionsState> {
    if state.transactions.iter().any(|listed| listed.hash == transaction.hash) {
        return None;
    }

    let position = state
        .transactions
        .partition_point(|listed| listed.close_time > transaction.close_time);
    if position >= limit {
        return None;
    }

    let mut next = state.clone();
    next.loading = false;
    next.activated = true;
    next.transactions.insert(position, transaction);
    next.transactions.truncate(limit);
    Some(next)
}
