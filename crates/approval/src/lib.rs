//! # Custody Approval Engine
//!
//! Releases custody funds only after a quorum of guardians authenticates
//! against a transaction-specific, single-use challenge.
//!
//! ## Flow
//! ```text
//! create_transfer ─────► ThresholdPolicy picks scheme, amount reserved
//!        │
//!        ▼
//! issue_challenge ─────► one active challenge per transaction
//!        │
//!        ▼
//! submit_approval ─────► verify code ─► consume challenge ─► insert approval
//!        │                                  (one store transaction)
//!        ▼
//! quorum reached ──────► Ready
//!        │
//!        ▼
//! execute ─────────────► allocate ephemeral index ─► remote signer
//!                               ─► settle or release the reservation
//! ```
//!
//! Every attempt, successful or not, lands in the hash-chained audit log in
//! the same store transaction as the state change it describes.

mod allocator;
mod challenge;
mod tracker;

pub mod config;
pub mod engine;
pub mod error;
pub mod guardians;
pub mod model;
pub mod signer;
pub mod store;
pub mod sweep;

pub use config::{EngineConfig, WalletConfig};
pub use engine::{CustodyEngine, EngineBuilder};
pub use error::{EngineError, StoreError, Violation};
pub use guardians::{Guardian, GuardianRegistry, InMemorySecretStore, SecretStore, SecretStoreError};
pub use model::{
    ApprovalDecision, ApprovalReceipt, ApprovalRecord, Challenge, DerivationPath,
    EphemeralIndexAllocation, ExecutionReceipt, GuardianStats, IssuedChallenge,
    PendingTransaction, TransactionState, TransactionStats, TransactionStatus, TransactionType,
    TransferRequest, WalletBalance,
};
pub use signer::{LocalSigner, RemoteSigner, SignerError};
pub use store::CustodyStore;
pub use sweep::{run_expiry_sweep, SweepReport};
