//! Synchronization configuration from environment variables
//!
//! Controls the default ledger network, how long unlistened subscriptions
//! stay warm, the recent-transactions page size and fetch backoff.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::network::Network;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Network used when a caller does not name one
    pub network: Network,
    /// How long a subscription with no listeners stays open before teardown
    pub grace_period: Duration,
    /// Upper bound on warm subscriptions without listeners (LRU eviction)
    pub max_idle_subscriptions: usize,
    /// Number of transactions kept in a recent-transactions snapshot
    pub recent_transactions_limit: usize,
    /// Backoff for transient fetch failures
    pub retry: RetryConfig,
}

/// Exponential backoff bounds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), doubling up to `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LEDGER_NETWORK`: "testnet" (default) or "mainnet"
    /// - `LEDGER_SUBSCRIPTION_GRACE_MS`: teardown grace period (default 5000)
    /// - `LEDGER_MAX_IDLE_SUBSCRIPTIONS`: warm subscriptions kept without listeners (default 32)
    /// - `LEDGER_RECENT_TX_LIMIT`: recent transactions page size (default 15)
    /// - `LEDGER_RETRY_INITIAL_MS` / `LEDGER_RETRY_MAX_MS`: backoff bounds (default 500 / 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let network = match env::var("LEDGER_NETWORK") {
            Ok(value) => match Network::from_str(&value) {
                Ok(network) => network,
                Err(_) => {
                    log::warn!("⚠️  Unknown network '{}', defaulting to {}", value, defaults.network);
                    defaults.network
                }
            },
            Err(_) => defaults.network,
        };
        log::info!("🌐 Ledger network: {}", network);

        let grace_period = env_millis("LEDGER_SUBSCRIPTION_GRACE_MS").unwrap_or(defaults.grace_period);
        let max_idle_subscriptions =
            env_parse("LEDGER_MAX_IDLE_SUBSCRIPTIONS").unwrap_or(defaults.max_idle_subscriptions);
        let recent_transactions_limit =
            env_parse("LEDGER_RECENT_TX_LIMIT").unwrap_or(defaults.recent_transactions_limit);
        log::info!(
            "Subscription policy: grace={}ms, max_idle={}, recent_tx_limit={}",
            grace_period.as_millis(),
            max_idle_subscriptions,
            recent_transactions_limit
        );

        let retry = RetryConfig {
            initial_delay: env_millis("LEDGER_RETRY_INITIAL_MS").unwrap_or(defaults.retry.initial_delay),
            max_delay: env_millis("LEDGER_RETRY_MAX_MS").unwrap_or(defaults.retry.max_delay),
        };

        Self {
            network,
            grace_period,
            max_idle_subscriptions,
            recent_transactions_limit,
            retry,
        }
    }
}

impl Default for SyncConfig {
    /// Default configuration (Testnet)
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            grace_period: Duration::from_secs(5),
            max_idle_subscriptions: 32,
            recent_transactions_limit: 15,
            retry: RetryConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("⚠️  Ignoring unparsable {}={:?}", name, raw);
            None
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}
