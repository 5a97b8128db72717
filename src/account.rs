//! Wallet accounts and new-account validation
//!
//! A wallet account is either a regular keypair that owns a ledger account
//! of the same id, or a co-signature keypair that signs for a different
//! remote account.

use serde::{Deserialize, Serialize};

use crate::error::AccountError;
use crate::keys::{is_valid_public_key, is_valid_secret_key, normalize_key};
use crate::network::Network;

/// How a wallet keypair relates to the ledger account it is used with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum KeyRole {
    /// The keypair's public key is the account id
    Owner,
    /// The keypair is a co-signer on `account_id`
    Cosigner { account_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    id: String,
    name: String,
    public_key: String,
    role: KeyRole,
    network: Network,
}

impl WalletAccount {
    /// Create a wallet account
    ///
    /// An `account_id` equal to the public key is the same as none: the
    /// keypair owns its own account.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        public_key: &str,
        account_id: Option<&str>,
        network: Network,
    ) -> Result<Self, AccountError> {
        let public_key = normalize_key(public_key);
        if !is_valid_public_key(&public_key) {
            return Err(AccountError::InvalidAccountId(public_key));
        }

        let role = match account_id.map(normalize_key) {
            Some(account_id) if account_id != public_key => {
                if !is_valid_public_key(&account_id) {
                    return Err(AccountError::InvalidAccountId(account_id));
                }
                KeyRole::Cosigner { account_id }
            }
            _ => KeyRole::Owner,
        };

        Ok(Self {
            id: id.into(),
            name: name.into(),
            public_key,
            role,
            network,
        })
    }

    pub fn owner(
        id: impl Into<String>,
        name: impl Into<String>,
        public_key: &str,
        network: Network,
    ) -> Result<Self, AccountError> {
        Self::new(id, name, public_key, None, network)
    }

    pub fn cosigner(
        id: impl Into<String>,
        name: impl Into<String>,
        public_key: &str,
        account_id: &str,
        network: Network,
    ) -> Result<Self, AccountError> {
        Self::new(id, name, public_key, Some(account_id), network)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn role(&self) -> &KeyRole {
        &self.role
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Remote account id, set only for co-signature keypairs
    pub fn account_id(&self) -> Option<&str> {
        match &self.role {
            KeyRole::Owner => None,
            KeyRole::Cosigner { account_id } => Some(account_id),
        }
    }

    /// Id of the ledger account this keypair is used with
    pub fn ledger_account_id(&self) -> &str {
        self.account_id().unwrap_or(&self.public_key)
    }

    pub fn is_cosignature_keypair(&self) -> bool {
        matches!(self.role, KeyRole::Cosigner { .. })
    }

    pub fn rename(&mut self, name: &str) -> Result<(), AccountError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AccountError::MissingName);
        }
        self.name = name.to_string();
        Ok(())
    }
}

/// Form input for creating or importing an account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewAccountValues {
    pub name: String,
    pub password: String,
    pub repeated_password: String,
    /// Whether a password is being set as part of this account creation
    pub set_password: bool,
    /// Generate a fresh key instead of importing `secret_key`
    pub create_new_key: bool,
    pub secret_key: String,
    pub cosignature_keypair: bool,
    pub account_id: String,
}

/// Check new-account form input
///
/// Returns every problem found, in form order.
pub fn validate_new_account(values: &NewAccountValues) -> Result<(), Vec<AccountError>> {
    let mut errors = Vec::new();

    if values.name.trim().is_empty() {
        errors.push(AccountError::MissingName);
    }
    if values.set_password {
        if values.password.is_empty() {
            errors.push(AccountError::MissingPassword);
        } else if values.password != values.repeated_password {
            errors.push(AccountError::PasswordMismatch);
        }
    }
    if !values.create_new_key && !is_valid_secret_key(&normalize_key(&values.secret_key)) {
        errors.push(AccountError::InvalidSecretKey);
    }
    if values.cosignature_keypair {
        let account_id = normalize_key(&values.account_id);
        if !is_valid_public_key(&account_id) {
            errors.push(AccountError::InvalidAccountId(values.account_id.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// First free default name for a new account on `network`
///
/// "My Account", "My Account 2", ... on mainnet and "My Testnet Account", ...
/// on testnet. Only accounts on the same network are considered.
pub fn default_account_name(existing: &[WalletAccount], network: Network) -> String {
    let base = if network.is_testnet() {
        "My Testnet Account"
    } else {
        "My Account"
    };

    let taken = |candidate: &str| {
        existing
            .iter()
            .any(|account| account.network == network && account.name == candidate)
    };

    if !taken(base) {
        return base.to_string();
    }
    (2u32..)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
