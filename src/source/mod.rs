//! Ledger data source contract
//!
//! The registry talks to the remote ledger only through [`LedgerDataSource`].
//! A watch is a stream: dropping it closes the underlying connection.

mod memory;

pub use memory::{CallCounts, MemoryLedger};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::network::Network;
use crate::signers::SignerRef;
use crate::state::AssetBalance;

/// Feed of watch events. Ends when the remote connection is lost.
pub type WatchStream<T> = BoxStream<'static, T>;

/// On-ledger record of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub balances: Vec<AssetBalance>,
    pub signers: Vec<SignerRef>,
    /// Trustlines, offers and other entries that each lock a base reserve
    pub subentry_count: u32,
    pub sequence: u64,
}

impl AccountRecord {
    /// Native balance the account must keep to stay on the ledger
    pub fn minimum_balance(&self, network: Network) -> Decimal {
        Decimal::from(2 + u64::from(self.subentry_count)) * network.base_reserve()
    }
}

/// A transaction in an account's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub ledger: u64,
    pub close_time: DateTime<Utc>,
    pub source_account: String,
    pub operation_count: u32,
    pub memo: Option<String>,
}

/// Kinds of ledger effect that touch an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    AccountCreated,
    AccountCredited,
    AccountDebited,
    SignerUpdated,
    TrustlineUpdated,
    Other,
}

/// Notification that something about a watched account changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEffect {
    pub id: String,
    pub kind: EffectKind,
    pub ledger: u64,
}

/// Remote ledger access, parameterized by network on every call
#[async_trait]
pub trait LedgerDataSource: Send + Sync + 'static {
    /// Current account record. `Ok(None)` means the account does not exist yet.
    async fn fetch_account(&self, account_id: &str, network: Network) -> Result<Option<AccountRecord>, SourceError>;

    /// Stream of effects touching the account
    async fn watch_account(&self, account_id: &str, network: Network) -> Result<WatchStream<AccountEffect>, SourceError>;

    /// Most recent `limit` transactions, newest first. `Ok(None)` means the account does not exist yet.
    async fn fetch_recent_transactions(
        &self,
        account_id: &str,
        network: Network,
        limit: usize,
    ) -> Result<Option<Vec<TransactionRecord>>, SourceError>;

    /// Stream of transactions involving the account as they are applied
    async fn watch_transactions(
        &self,
        account_id: &str,
        network: Network,
    ) -> Result<WatchStream<TransactionRecord>, SourceError>;
}
