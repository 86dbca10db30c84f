//! Escrow
//!
//! Advertiser deposits are held per deal in `ESCROW:{deal}` until the deal
//! completes (release, with platform commission) or is cancelled (refund).
//! When to call which operation is decided by the deal lifecycle, outside
//! this crate.

pub mod error;
pub mod service;
pub mod store;
pub mod types;
pub mod wallet;


pub use error::EscrowError;
pub use service::{EscrowConfig, EscrowPort, EscrowService};
pub use store::{
    DepositAddressRepository, InMemoryDepositAddressRepository, PgDepositAddressRepository,
};
pub use types::{DepositAddressInfo, EscrowEvent, ReleaseReceipt};
pub use wallet::{MockTonWallet, TonWallet, WalletError};
