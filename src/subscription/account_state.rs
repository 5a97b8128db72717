use futures::StreamExt;
use std::sync::Arc;
use tokio::time::sleep;

use super::with_retry;
use crate::config::RetryConfig;
use crate::registry::Publisher;
use crate::source::{AccountRecord, LedgerDataSource};
use crate::state::{AccountState, Snapshot};

pub(super) async fn run(publisher: Publisher, source: Arc<dyn LedgerDataSource>, retry: RetryConfig) {
    let source: &dyn LedgerDataSource = source.as_ref();
    let key = publisher.key().clone();
    let account_id = key.account_id();
    let network = key.network();
    let mut attempt = 0u32;

    loop {
        match source.watch_account(account_id, network).await {
            Ok(mut effects) => {
                // Fetch once the watch is open so no change slips in between
                if !refresh(&publisher, source, &retry).await {
                    return;
                }
                attempt = 0;

                while let Some(effect) = effects.next().await {
                    log::debug!("Effect {:?} on {} at ledger {}", effect.kind, account_id, effect.ledger);
                    if !refresh(&publisher, source, &retry).await {
                        return;
                    }
                }
                log::warn!("⚠️  Account watch for {} on {} ended", account_id, network);
            }
            Err(err) => {
                if !publisher.is_alive() {
                    return;
                }
                log::warn!("⚠️  Account watch for {} on {} failed: {}", account_id, network, err);
                // Keep serving fetched data while the stream is down
                if !poll(&publisher, source).await {
                    return;
                }
            }
        }

        let delay = retry.delay_for(attempt);
        log::debug!("Reopening account watch for {} in {}ms", account_id, delay.as_millis());
        sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

/// Fetch the account, retrying until it succeeds, and publish the result.
/// `false` once the subscription is closed.
async fn refresh(publisher: &Publisher, source: &dyn LedgerDataSource, retry: &RetryConfig) -> bool {
    let account_id = publisher.key().account_id();
    let network = publisher.key().network();

    let Some(record) = with_retry(retry, publisher, "Account fetch", move || {
        source.fetch_account(account_id, network)
    })
    .await
    else {
        return false;
    };
    publish(publisher, record)
}

/// Single fetch attempt; a failure leaves the last snapshot in place
async fn poll(publisher: &Publisher, source: &dyn LedgerDataSource) -> bool {
    let key = publisher.key();
    match source.fetch_account(key.account_id(), key.network()).await {
        Ok(record) => publish(publisher, record),
        Err(err) => {
            log::warn!("⚠️  Account fetch for {} failed: {}", key.account_id(), err);
            publisher.is_alive()
        }
    }
}

fn publish(publisher: &Publisher, record: Option<AccountRecord>) -> bool {
    let key = publisher.key();
    let state = match record {
        Some(record) => AccountState::from_record(record, key.network()),
        None => AccountState::not_found(key.account_id(), key.network()),
    };
    publisher.publish(Snapshot::AccountState(Arc::new(state)))
}
