//! Snapshot types handed to consumers
//!
//! Snapshots are immutable. Every update produces a new `Arc`-wrapped value,
//! so a consumer holding an older snapshot never sees it change underneath.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::network::Network;
use crate::signers::SignerRef;
use crate::source::{AccountRecord, TransactionRecord};

/// Asset held in a balance line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Asset {
    Native,
    Credit { code: String, issuer: String },
}

impl Asset {
    pub fn credit(code: impl Into<String>, issuer: impl Into<String>) -> Self {
        Asset::Credit {
            code: code.into(),
            issuer: issuer.into(),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: Asset,
    /// Exact decimal quantity, serialized as a string
    pub amount: Decimal,
}

impl AssetBalance {
    pub fn native(amount: Decimal) -> Self {
        Self {
            asset: Asset::Native,
            amount,
        }
    }

    /// Asset code, `None` for the native asset
    pub fn asset_code(&self) -> Option<&str> {
        match &self.asset {
            Asset::Native => None,
            Asset::Credit { code, .. } => Some(code),
        }
    }

    /// Asset issuer, `None` for the native asset
    pub fn asset_issuer(&self) -> Option<&str> {
        match &self.asset {
            Asset::Native => None,
            Asset::Credit { issuer, .. } => Some(issuer),
        }
    }
}

/// Latest known state of one ledger account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub account_id: String,
    pub network: Network,
    pub balances: Vec<AssetBalance>,
    pub signers: Vec<SignerRef>,
    /// Native amount locked by base reserves, zero until activated
    pub minimum_balance: Decimal,
    /// `false` until the account record exists on the ledger
    pub activated: bool,
    /// `true` only until the first fetch resolves
    pub loading: bool,
}

impl AccountState {
    /// Placeholder returned before any data arrived
    pub fn loading(account_id: &str, network: Network) -> Self {
        Self {
            account_id: account_id.to_string(),
            network,
            balances: Vec::new(),
            signers: Vec::new(),
            minimum_balance: Decimal::ZERO,
            activated: false,
            loading: true,
        }
    }

    /// Snapshot for an account that has no ledger record yet
    pub fn not_found(account_id: &str, network: Network) -> Self {
        Self {
            loading: false,
            ..Self::loading(account_id, network)
        }
    }

    pub fn from_record(record: AccountRecord, network: Network) -> Self {
        let minimum_balance = record.minimum_balance(network);
        Self {
            minimum_balance,
            account_id: record.account_id,
            network,
            balances: record.balances,
            signers: record.signers,
            activated: true,
            loading: false,
        }
    }

    pub fn native_balance(&self) -> Decimal {
        self.balances
            .iter()
            .filter(|balance| balance.asset.is_native())
            .map(|balance| balance.amount)
            .sum()
    }

    /// Native amount above the reserve, never negative
    pub fn spendable_balance(&self) -> Decimal {
        (self.native_balance() - self.minimum_balance).max(Decimal::ZERO)
    }

    /// Assets the account can send, in balance-line order
    pub fn trusted_assets(&self) -> Vec<Asset> {
        self.balances.iter().map(|balance| balance.asset.clone()).collect()
    }

    pub fn can_send(&self) -> bool {
        self.activated && !self.loading
    }
}

/// Latest known transaction history of one ledger account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentTransactionsState {
    pub account_id: String,
    pub network: Network,
    pub loading: bool,
    pub activated: bool,
    /// Most recent first, ordered by close time
    pub transactions: Vec<TransactionRecord>,
}

impl RecentTransactionsState {
    pub fn loading(account_id: &str, network: Network) -> Self {
        Self {
            account_id: account_id.to_string(),
            network,
            loading: true,
            activated: false,
            transactions: Vec::new(),
        }
    }
}

/// Snapshot of any subscription kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    AccountState(Arc<AccountState>),
    RecentTransactions(Arc<RecentTransactionsState>),
}

impl Snapshot {
    pub fn is_loading(&self) -> bool {
        match self {
            Snapshot::AccountState(state) => state.loading,
            Snapshot::RecentTransactions(state) => state.loading,
        }
    }

    pub fn is_activated(&self) -> bool {
        match self {
            Snapshot::AccountState(state) => state.activated,
            Snapshot::RecentTransactions(state) => state.activated,
        }
    }

    pub fn as_account_state(&self) -> Option<&Arc<AccountState>> {
        match self {
            Snapshot::AccountState(state) => Some(state),
            Snapshot::RecentTransactions(_) => None,
        }
    }

    pub fn as_recent_transactions(&self) -> Option<&Arc<RecentTransactionsState>> {
        match self {
            Snapshot::RecentTransactions(state) => Some(state),
            Snapshot::AccountState(_) => None,
        }
    }
}
