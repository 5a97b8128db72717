//! Ledger network selector

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KeyError;

/// The ledger network an account lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Network passphrase mixed into every signature base
    ///
    /// A signature produced for one network never validates on the other.
    pub fn passphrase(&self) -> &'static str {
        match self {
            Network::Mainnet => "Public Global Ledger Network ; September 2015",
            Network::Testnet => "Test Ledger Network ; September 2015",
        }
    }

    /// Reserve locked per account entry (0.5 of the native asset)
    pub fn base_reserve(&self) -> Decimal {
        Decimal::new(5, 1)
    }

    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::Testnet)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" | "public" | "livenet" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(KeyError::UnknownNetwork(other.to_string())),
        }
    }
}
