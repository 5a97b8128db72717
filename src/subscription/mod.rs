//! Connection tasks that keep registry entries up to date
//!
//! One task runs per open subscription. It owns the watch stream and the
//! working copy of the snapshot, and is aborted when the registry closes the
//! subscription.

mod account_state;
mod recent_transactions;

pub use recent_transactions::apply_transaction;

use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;

use crate::config::{RetryConfig, SyncConfig};
use crate::error::SourceError;
use crate::registry::{EntityKind, Publisher};
use crate::source::LedgerDataSource;

/// Entry point of a connection task
pub(crate) async fn run(publisher: Publisher, source: Arc<dyn LedgerDataSource>, config: SyncConfig) {
    match publisher.key().kind() {
        EntityKind::AccountState => account_state::run(publisher, source, config.retry).await,
        EntityKind::RecentTransactions => {
            recent_transactions::run(publisher, source, config.retry, config.recent_transactions_limit).await
        }
    }
}

/// Retry a ledger call with capped exponential backoff until it succeeds
///
/// Gives up only when the subscription was closed, returning `None`.
pub(crate) async fn with_retry<F, Fut, T>(retry: &RetryConfig, publisher: &Publisher, what: &str, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Some(value),
            Err(err) => {
                if !publisher.is_alive() {
                    return None;
                }
                let delay = retry.delay_for(attempt);
                log::warn!(
                    "⚠️  {} for {} failed (attempt {}): {}, retrying in {}ms",
                    what,
                    publisher.key().account_id(),
                    attempt + 1,
                    err,
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
