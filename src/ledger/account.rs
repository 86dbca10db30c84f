//! Ledger account identifiers
//!
//! Accounts are namespaced strings (`ESCROW:42`, `EXTERNAL_TON`). The string
//! form is what gets stored in `account_balances.account_id` and
//! `ledger_entries.account_id`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core_types::{DealId, UserId};

const ESCROW_PREFIX: &str = "ESCROW";
const OWNER_PENDING_PREFIX: &str = "OWNER_PENDING";
const COMMISSION_PREFIX: &str = "COMMISSION";
const EXTERNAL_TON: &str = "EXTERNAL_TON";
const PLATFORM_TREASURY: &str = "PLATFORM_TREASURY";
const NETWORK_FEES: &str = "NETWORK_FEES";
const DUST_WRITEOFF: &str = "DUST_WRITEOFF";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid account id: {0}")]
pub struct AccountIdError(pub String);

/// Ledger account identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccountId {
    /// Funds held for a deal until release or refund
    Escrow(DealId),
    /// Channel owner earnings awaiting withdrawal
    OwnerPending(UserId),
    /// Platform commission accrued on a deal
    Commission(DealId),
    /// Value entering/leaving through the TON chain (contra)
    ExternalTon,
    /// Platform treasury (contra)
    PlatformTreasury,
    /// On-chain network fees paid by the platform (contra)
    NetworkFees,
    /// Rounding dust written off (contra)
    DustWriteoff,
}

impl AccountId {
    /// Contra accounts represent value crossing the system boundary and may
    /// hold a negative balance.
    #[inline]
    pub fn is_contra(&self) -> bool {
        matches!(
            self,
            AccountId::ExternalTon
                | AccountId::PlatformTreasury
                | AccountId::NetworkFees
                | AccountId::DustWriteoff
        )
    }

    /// Deal this account belongs to, if it is deal-scoped
    pub fn deal_id(&self) -> Option<DealId> {
        match self {
            AccountId::Escrow(deal) | AccountId::Commission(deal) => Some(*deal),
            _ => None,
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountId::Escrow(deal) => write!(f, "{}:{}", ESCROW_PREFIX, deal),
            AccountId::OwnerPending(user) => write!(f, "{}:{}", OWNER_PENDING_PREFIX, user),
            AccountId::Commission(deal) => write!(f, "{}:{}", COMMISSION_PREFIX, deal),
            AccountId::ExternalTon => f.write_str(EXTERNAL_TON),
            AccountId::PlatformTreasury => f.write_str(PLATFORM_TREASURY),
            AccountId::NetworkFees => f.write_str(NETWORK_FEES),
            AccountId::DustWriteoff => f.write_str(DUST_WRITEOFF),
        }
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            EXTERNAL_TON => return Ok(AccountId::ExternalTon),
            PLATFORM_TREASURY => return Ok(AccountId::PlatformTreasury),
            NETWORK_FEES => return Ok(AccountId::NetworkFees),
            DUST_WRITEOFF => return Ok(AccountId::DustWriteoff),
            _ => {}
        }

        let (prefix, id) = s
            .split_once(':')
            .ok_or_else(|| AccountIdError(s.to_string()))?;
        let id: i64 = id.parse().map_err(|_| AccountIdError(s.to_string()))?;

        match prefix {
            ESCROW_PREFIX => Ok(AccountId::Escrow(id)),
            OWNER_PENDING_PREFIX => Ok(AccountId::OwnerPending(id)),
            COMMISSION_PREFIX => Ok(AccountId::Commission(id)),
            _ => Err(AccountIdError(s.to_string())),
        }
    }
}

impl Serialize for AccountId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let cases = [
            (AccountId::Escrow(42), "ESCROW:42"),
            (AccountId::OwnerPending(7), "OWNER_PENDING:7"),
            (AccountId::Commission(42), "COMMISSION:42"),
            (AccountId::ExternalTon, "EXTERNAL_TON"),
            (AccountId::PlatformTreasury, "PLATFORM_TREASURY"),
            (AccountId::NetworkFees, "NETWORK_FEES"),
            (AccountId::DustWriteoff, "DUST_WRITEOFF"),
        ];
        for (account, text) in cases {
            assert_eq!(account.to_string(), text);
            assert_eq!(text.parse::<AccountId>().unwrap(), account);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("ESCROW".parse::<AccountId>().is_err());
        assert!("ESCROW:abc".parse::<AccountId>().is_err());
        assert!("WALLET:1".parse::<AccountId>().is_err());
        assert!("".parse::<AccountId>().is_err());
    }

    #[test]
    fn test_contra_accounts() {
        assert!(AccountId::ExternalTon.is_contra());
        assert!(AccountId::PlatformTreasury.is_contra());
        assert!(AccountId::NetworkFees.is_contra());
        assert!(AccountId::DustWriteoff.is_contra());
        assert!(!AccountId::Escrow(1).is_contra());
        assert!(!AccountId::OwnerPending(1).is_contra());
        assert!(!AccountId::Commission(1).is_contra());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&AccountId::Escrow(9)).unwrap();
        assert_eq!(json, "\"ESCROW:9\"");
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AccountId::Escrow(9));
    }
}
