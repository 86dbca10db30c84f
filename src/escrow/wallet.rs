use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use crc::{CRC_16_XMODEM, Crc};
use std::fmt::Debug;
use thiserror::Error;

use crate::core_types::SubwalletId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Wallet backend unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid subwallet id: {0}")]
    InvalidSubwallet(SubwalletId),
}

#[async_trait]
pub trait TonWallet: Send + Sync + Debug {
    /// Deposit address of the given sub-wallet of the platform wallet
    async fn derive_address(&self, subwallet_id: SubwalletId) -> Result<String, WalletError>;

    /// Validate a user-friendly address (checksum, length, tag)
    fn validate_address(&self, address: &str) -> bool;
}

/// Raw user-friendly address: tag(1) + workchain(1) + hash(32) + crc16(2)
const ADDRESS_LEN: usize = 36;
const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TEST_ONLY: u8 = 0x80;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Mock TON Wallet
///
/// Deterministic: the same seed and sub-wallet id always give the same
/// address. Deposit addresses are non-bounceable.
#[derive(Debug, Clone)]
pub struct MockTonWallet {
    seed: String,
    workchain: i8,
}

impl MockTonWallet {
    pub fn new(seed: impl Into<String>, workchain: i8) -> Self {
        Self {
            seed: seed.into(),
            workchain,
        }
    }

    fn account_hash(&self, subwallet_id: SubwalletId) -> [u8; 32] {
        let hi = md5::compute(format!("ton_{}_{}_hi", self.seed, subwallet_id));
        let lo = md5::compute(format!("ton_{}_{}_lo", self.seed, subwallet_id));
        let mut hash = [0u8; 32];
        hash[..16].copy_from_slice(&hi.0);
        hash[16..].copy_from_slice(&lo.0);
        hash
    }
}

impl Default for MockTonWallet {
    fn default() -> Self {
        Self::new("escrow", 0)
    }
}

#[async_trait]
impl TonWallet for MockTonWallet {
    async fn derive_address(&self, subwallet_id: SubwalletId) -> Result<String, WalletError> {
        if subwallet_id <= 0 {
            return Err(WalletError::InvalidSubwallet(subwallet_id));
        }

        let mut raw = [0u8; ADDRESS_LEN];
        raw[0] = TAG_NON_BOUNCEABLE;
        raw[1] = self.workchain as u8;
        raw[2..34].copy_from_slice(&self.account_hash(subwallet_id));
        let crc = CRC16.checksum(&raw[..34]);
        raw[34..].copy_from_slice(&crc.to_be_bytes());

        Ok(URL_SAFE.encode(raw))
    }

    fn validate_address(&self, address: &str) -> bool {
        let Ok(raw) = URL_SAFE.decode(address).or_else(|_| STANDARD.decode(address)) else {
            return false;
        };
        if raw.len() != ADDRESS_LEN {
            return false;
        }
        let tag = raw[0] & !TAG_TEST_ONLY;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return false;
        }
        CRC16.checksum(&raw[..34]).to_be_bytes() == raw[34..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_derive_is_deterministic_and_unique() {
        let wallet = MockTonWallet::default();
        let a = wallet.derive_address(1).await.unwrap();
        let b = wallet.derive_address(1).await.unwrap();
        let c = wallet.derive_address(2).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 48);
        assert!(wallet.validate_address(&a));
    }

    #[tokio::test]
    async fn test_seed_changes_address() {
        let a = MockTonWallet::new("a", 0).derive_address(1).await.unwrap();
        let b = MockTonWallet::new("b", 0).derive_address(1).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_rejects_bad_addresses() {
        let wallet = MockTonWallet::default();
        let good = wallet.derive_address(7).await.unwrap();

        // flip one character in the hash part
        let mut chars: Vec<char> = good.chars().collect();
        chars[10] = if chars[10] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();

        assert!(!wallet.validate_address(&tampered));
        assert!(!wallet.validate_address("not-an-address"));
        assert!(!wallet.validate_address(""));
        assert!(matches!(
            wallet.derive_address(0).await,
            Err(WalletError::InvalidSubwallet(0))
        ));
    }

    #[tokio::test]
    async fn test_masterchain_address() {
        let wallet = MockTonWallet::new("escrow", -1);
        let addr = wallet.derive_address(3).await.unwrap();
        let raw = URL_SAFE.decode(&addr).unwrap();
        assert_eq!(raw[1], 0xff);
        assert!(wallet.validate_address(&addr));
    }
}
