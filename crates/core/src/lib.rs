//! Custody Core - Domain types
//!
//! This crate contains the fundamental types shared by the custody crates:
//! - `Amount`: Non-negative decimal wrapper for transfer amounts
//! - `TransactionId`, `GuardianId`, `WalletId`, `ChallengeId`: typed identifiers
//! - `WalletClass`: hot or cold (reserve) source wallet
//! - `Clock`: time source, swappable for tests

pub mod amount;
pub mod clock;
pub mod ids;
pub mod wallet;

pub use amount::{Amount, AmountError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{ChallengeId, GuardianId, IdError, TransactionId, WalletId};
pub use wallet::WalletClass;
