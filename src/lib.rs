//! Ledger-Sync: Live Ledger Subscriptions and Multi-Signature Coordination
//!
//! This crate keeps wallet front-ends in sync with a remote ledger and
//! tracks transactions that need signatures from several keys.
//!
//! # Architecture
//!
//! - **Subscription Registry**: One deduplicated, cached subscription per
//!   `(kind, account, network)`, with synchronous reads and push updates
//! - **Account State / Recent Transactions**: Connection tasks that keep
//!   registry entries current and survive transient ledger failures
//! - **Signature Coordinator**: Verifies collected signatures and sorts
//!   pending requests for a wallet account
//!
//! # Example
//!
//! ```ignore
//! use ledger_sync::{MemoryLedger, SubscriptionKey, SubscriptionRegistry, SyncConfig};
//!
//! let registry = SubscriptionRegistry::new(Arc::new(MemoryLedger::new()), SyncConfig::from_env());
//!
//! let key = SubscriptionKey::account_state(&account_id, Network::Testnet)?;
//! let subscription = registry.acquire(&key);
//!
//! // Render immediately, then on every update
//! render(&subscription.latest());
//! let unsubscribe = subscription.subscribe(|snapshot| render(snapshot));
//! ```

// Public modules
pub mod account;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod keys;
pub mod network;
pub mod registry;
pub mod signature;
pub mod signers;
pub mod source;
pub mod state;
pub mod subscription;

// Re-exports for convenience
pub use account::{default_account_name, validate_new_account, KeyRole, NewAccountValues, WalletAccount};
pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{Classification, InvalidRequest, RequestStatus, SignatureCoordinator, SignatureRequest};
pub use error::{AccountError, KeyError, LedgerSyncError, SignatureError, SignerEditError, SourceError};
pub use network::Network;
pub use registry::{
    EntityKind, Listener, ListenerId, RegistryStats, Subscription, SubscriptionKey, SubscriptionRegistry,
    Unsubscribe,
};
pub use signature::{
    check_signature, collect_signatures, has_signed, sign_envelope, signature_base, signature_hint, verify_signature,
    DecoratedSignature, TransactionEnvelope,
};
pub use signers::{signed_weight, threshold_reached, SignerRef, SignerSet};
pub use source::{
    AccountEffect, AccountRecord, EffectKind, LedgerDataSource, MemoryLedger, TransactionRecord, WatchStream,
};
pub use state::{AccountState, Asset, AssetBalance, RecentTransactionsState, Snapshot};

// Common result type
pub type Result<T> = std::result::Result<T, LedgerSyncError>;
