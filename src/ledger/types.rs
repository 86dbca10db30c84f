//! Ledger Core Types
//!
//! Type definitions for double-entry transfers and their persisted rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::account::AccountId;
use super::error::ValidationError;
use crate::core_types::{DealId, EntryId};
use crate::money::Money;

/// Transfer reference - groups all entries of one balanced transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(uuid::Uuid);

impl TxRef {
    /// Generate a new random TxRef
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for TxRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TxRef {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// Side of a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Debit => "DEBIT",
            Side::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business classification of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Advertiser funds arriving on chain into escrow
    EscrowDeposit,
    /// Escrow drained on deal completion
    EscrowRelease,
    /// Platform share of a released deal
    PlatformCommission,
    /// Owner share of a released deal
    OwnerPayout,
    /// Escrow returned to the advertiser
    EscrowRefund,
    /// Owner funds leaving to an external wallet
    OwnerWithdrawal,
    /// Chain fees paid by the platform
    NetworkFee,
    /// Rounding remainder written off
    DustWriteoff,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::EscrowDeposit => "ESCROW_DEPOSIT",
            EntryType::EscrowRelease => "ESCROW_RELEASE",
            EntryType::PlatformCommission => "PLATFORM_COMMISSION",
            EntryType::OwnerPayout => "OWNER_PAYOUT",
            EntryType::EscrowRefund => "ESCROW_REFUND",
            EntryType::OwnerWithdrawal => "OWNER_WITHDRAWAL",
            EntryType::NetworkFee => "NETWORK_FEE",
            EntryType::DustWriteoff => "DUST_WRITEOFF",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ESCROW_DEPOSIT" => Ok(EntryType::EscrowDeposit),
            "ESCROW_RELEASE" => Ok(EntryType::EscrowRelease),
            "PLATFORM_COMMISSION" => Ok(EntryType::PlatformCommission),
            "OWNER_PAYOUT" => Ok(EntryType::OwnerPayout),
            "ESCROW_REFUND" => Ok(EntryType::EscrowRefund),
            "OWNER_WITHDRAWAL" => Ok(EntryType::OwnerWithdrawal),
            "NETWORK_FEE" => Ok(EntryType::NetworkFee),
            "DUST_WRITEOFF" => Ok(EntryType::DustWriteoff),
            other => Err(format!("Unknown entry type: {}", other)),
        }
    }
}

/// One side of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub account: AccountId,
    pub entry_type: EntryType,
    pub amount: Money,
    pub side: Side,
}

impl Leg {
    pub fn debit(account: AccountId, entry_type: EntryType, amount: Money) -> Self {
        Self {
            account,
            entry_type,
            amount,
            side: Side::Debit,
        }
    }

    pub fn credit(account: AccountId, entry_type: EntryType, amount: Money) -> Self {
        Self {
            account,
            entry_type,
            amount,
            side: Side::Credit,
        }
    }

    /// Whether this leg needs the conditional (non-negative) balance update
    #[inline]
    pub fn needs_balance_check(&self) -> bool {
        self.side == Side::Debit && !self.account.is_contra()
    }

    /// Signed balance effect: credits add, debits subtract
    pub fn signed_delta(&self) -> Result<i64, ValidationError> {
        let amount = self
            .amount
            .to_i64()
            .map_err(|_| ValidationError::AmountOverflow)?;
        Ok(match self.side {
            Side::Credit => amount,
            Side::Debit => -amount,
        })
    }
}

/// Matches the `VARCHAR` width of `ledger_idempotency_keys.idempotency_key`
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// A balanced multi-leg transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub deal_id: Option<DealId>,
    pub idempotency_key: String,
    pub legs: Vec<Leg>,
    pub description: Option<String>,
}

impl TransferRequest {
    pub fn new(idempotency_key: impl Into<String>, legs: Vec<Leg>) -> Self {
        Self {
            deal_id: None,
            idempotency_key: idempotency_key.into(),
            legs,
            description: None,
        }
    }

    pub fn with_deal(mut self, deal_id: DealId) -> Self {
        self.deal_id = Some(deal_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Pure structural validation, no I/O
    ///
    /// Returns the balanced total on success.
    pub fn validate(&self) -> Result<Money, ValidationError> {
        if self.idempotency_key.trim().is_empty() {
            return Err(ValidationError::EmptyIdempotencyKey);
        }

        if self.idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(ValidationError::IdempotencyKeyTooLong {
                len: self.idempotency_key.len(),
                max: MAX_IDEMPOTENCY_KEY_LEN,
            });
        }

        if self.legs.len() < 2 {
            return Err(ValidationError::TooFewLegs {
                count: self.legs.len(),
            });
        }

        if let Some(index) = self.legs.iter().position(|leg| leg.amount.is_zero()) {
            return Err(ValidationError::ZeroAmount { index });
        }

        let sum_side = |side: Side| {
            Money::checked_sum(
                self.legs
                    .iter()
                    .filter(|leg| leg.side == side)
                    .map(|leg| leg.amount),
            )
            .map_err(|_| ValidationError::AmountOverflow)
        };

        let debits = sum_side(Side::Debit)?;
        let credits = sum_side(Side::Credit)?;

        if debits != credits {
            return Err(ValidationError::Unbalanced { debits, credits });
        }

        Ok(debits)
    }
}

/// A ledger entry to be inserted (one per leg)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub tx_ref: TxRef,
    pub idempotency_key: String,
    pub deal_id: Option<DealId>,
    pub account: AccountId,
    pub entry_type: EntryType,
    pub debit_nano: i64,
    pub credit_nano: i64,
    pub description: Option<String>,
}

impl NewLedgerEntry {
    pub fn from_leg(
        request: &TransferRequest,
        tx_ref: TxRef,
        leg: &Leg,
    ) -> Result<Self, ValidationError> {
        let amount = leg
            .amount
            .to_i64()
            .map_err(|_| ValidationError::AmountOverflow)?;
        let (debit_nano, credit_nano) = match leg.side {
            Side::Debit => (amount, 0),
            Side::Credit => (0, amount),
        };

        Ok(Self {
            tx_ref,
            idempotency_key: request.idempotency_key.clone(),
            deal_id: request.deal_id,
            account: leg.account.clone(),
            entry_type: leg.entry_type,
            debit_nano,
            credit_nano,
            description: request.description.clone(),
        })
    }
}

/// An immutable, committed ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub tx_ref: TxRef,
    pub idempotency_key: String,
    pub deal_id: Option<DealId>,
    pub account: AccountId,
    pub entry_type: EntryType,
    pub debit_nano: i64,
    pub credit_nano: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Exactly one side of the entry is positive
    pub fn is_one_sided(&self) -> bool {
        (self.debit_nano > 0 && self.credit_nano == 0)
            || (self.debit_nano == 0 && self.credit_nano > 0)
    }

    pub fn side(&self) -> Side {
        if self.debit_nano > 0 {
            Side::Debit
        } else {
            Side::Credit
        }
    }
}

/// Cached projection of `Σ credits − Σ debits` for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account: AccountId,
    pub balance_nano: i64,
    pub version: i64,
}

impl AccountBalance {
    pub fn empty(account: AccountId) -> Self {
        Self {
            account,
            balance_nano: 0,
            version: 0,
        }
    }
}

/// Keyset page of entries, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPage {
    pub entries: Vec<LedgerEntry>,
    /// Pass back as `cursor` to fetch the next (older) page
    pub next_cursor: Option<EntryId>,
}

impl EntryPage {
    pub fn from_entries(entries: Vec<LedgerEntry>, limit: usize) -> Self {
        let next_cursor = if entries.len() == limit {
            entries.last().map(|e| e.id)
        } else {
            None
        };
        Self {
            entries,
            next_cursor,
        }
    }
}

/// Largest page `entries_by_account` will return
pub const MAX_PAGE_SIZE: usize = 500;

/// Clamp a caller-supplied page size to `1..=MAX_PAGE_SIZE`
pub fn clamp_page_size(limit: usize) -> usize {
    limit.clamp(1, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escrow_deposit(amount: u64) -> TransferRequest {
        TransferRequest::new(
            "dep-1",
            vec![
                Leg::debit(
                    AccountId::ExternalTon,
                    EntryType::EscrowDeposit,
                    Money::from_nano(amount),
                ),
                Leg::credit(
                    AccountId::Escrow(1),
                    EntryType::EscrowDeposit,
                    Money::from_nano(amount),
                ),
            ],
        )
    }

    #[test]
    fn test_validate_balanced() {
        assert_eq!(escrow_deposit(100).validate().unwrap().nano(), 100);
    }

    #[test]
    fn test_validate_too_few_legs() {
        let mut req = escrow_deposit(100);
        req.legs.truncate(1);
        assert_eq!(
            req.validate(),
            Err(ValidationError::TooFewLegs { count: 1 })
        );
    }

    #[test]
    fn test_validate_zero_leg() {
        let mut req = escrow_deposit(100);
        req.legs.push(Leg::credit(
            AccountId::Commission(1),
            EntryType::PlatformCommission,
            Money::ZERO,
        ));
        assert_eq!(req.validate(), Err(ValidationError::ZeroAmount { index: 2 }));
    }

    #[test]
    fn test_validate_unbalanced() {
        let mut req = escrow_deposit(100);
        req.legs[1].amount = Money::from_nano(99);
        assert_eq!(
            req.validate(),
            Err(ValidationError::Unbalanced {
                debits: Money::from_nano(100),
                credits: Money::from_nano(99),
            })
        );
    }

    #[test]
    fn test_validate_overflow() {
        let mut req = escrow_deposit(100);
        req.legs.push(Leg::debit(
            AccountId::ExternalTon,
            EntryType::EscrowDeposit,
            Money::MAX,
        ));
        assert_eq!(req.validate(), Err(ValidationError::AmountOverflow));
    }

    #[test]
    fn test_validate_empty_key() {
        let mut req = escrow_deposit(100);
        req.idempotency_key = "  ".into();
        assert_eq!(req.validate(), Err(ValidationError::EmptyIdempotencyKey));

        req.idempotency_key = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(matches!(
            req.validate(),
            Err(ValidationError::IdempotencyKeyTooLong { .. })
        ));
    }

    #[test]
    fn test_new_entry_is_one_sided() {
        let req = escrow_deposit(5);
        let tx_ref = TxRef::new();
        let debit = NewLedgerEntry::from_leg(&req, tx_ref, &req.legs[0]).unwrap();
        let credit = NewLedgerEntry::from_leg(&req, tx_ref, &req.legs[1]).unwrap();
        assert_eq!((debit.debit_nano, debit.credit_nano), (5, 0));
        assert_eq!((credit.debit_nano, credit.credit_nano), (0, 5));
    }

    #[test]
    fn test_entry_type_roundtrip_strings() {
        for t in [
            EntryType::EscrowDeposit,
            EntryType::EscrowRelease,
            EntryType::PlatformCommission,
            EntryType::OwnerPayout,
            EntryType::EscrowRefund,
            EntryType::OwnerWithdrawal,
            EntryType::NetworkFee,
            EntryType::DustWriteoff,
        ] {
            assert_eq!(t.as_str().parse::<EntryType>().unwrap(), t);
        }
        assert!("BOGUS".parse::<EntryType>().is_err());
    }

    #[test]
    fn test_page_cursor() {
        assert_eq!(clamp_page_size(0), 1);
        assert_eq!(clamp_page_size(10_000), MAX_PAGE_SIZE);
        let page = EntryPage::from_entries(Vec::new(), 10);
        assert!(page.next_cursor.is_none());
    }
}
