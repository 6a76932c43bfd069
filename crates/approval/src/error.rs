//! Approval engine errors

use crate::guardians::SecretStoreError;
use crate::model::TransactionState;
use crate::signer::SignerError;
use custody_audit::ChainError;
use custody_core::{GuardianId, TransactionId, WalletId};
use custody_policy::PolicyError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors from the SQLite store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Why a new transaction was refused
#[derive(Debug, Error)]
pub enum Violation {
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Unknown source wallet: {0}")]
    UnknownWallet(WalletId),

    #[error("Invalid destination: {0:?}")]
    InvalidDestination(String),

    #[error("Invalid memo: {0:?}")]
    InvalidMemo(String),

    #[error("Insufficient balance in {wallet}: {available} available, {requested} requested")]
    InsufficientBalance {
        wallet: WalletId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Balance of {0} would overflow")]
    BalanceOverflow(WalletId),

    #[error(transparent)]
    Limit(#[from] PolicyError),
}

/// Errors returned by `CustodyEngine` operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Policy violation: {0}")]
    PolicyViolation(#[from] Violation),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Unknown guardian: {0}")]
    UnknownGuardian(GuardianId),

    #[error("Guardian is inactive: {0}")]
    InactiveGuardian(GuardianId),

    #[error("Emergency mode is active")]
    EmergencyMode,

    #[error("Transaction {0} already has an active challenge")]
    ChallengeAlreadyActive(TransactionId),

    #[error("No challenge issued for transaction {0}")]
    ChallengeNotFound(TransactionId),

    #[error("Challenge for transaction {0} has expired")]
    ChallengeExpired(TransactionId),

    #[error("Challenge for transaction {0} was already used")]
    ChallengeAlreadyUsed(TransactionId),

    #[error("Guardian {guardian_id} already approved transaction {transaction_id}")]
    DuplicateApprover {
        transaction_id: TransactionId,
        guardian_id: GuardianId,
    },

    #[error("Invalid code")]
    InvalidCode,

    #[error("Transaction expired: {0}")]
    TransactionExpired(TransactionId),

    #[error("Cannot {operation} transaction {transaction_id} in state {state}")]
    InvalidState {
        transaction_id: TransactionId,
        state: TransactionState,
        operation: &'static str,
    },

    #[error("Signer failure: {0}")]
    SignerFailure(#[from] SignerError),

    #[error("Derivation index space exhausted for wallet {0}")]
    IndexSpaceExhausted(WalletId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Secret store error: {0}")]
    SecretStore(#[from] SecretStoreError),

    #[error("Audit chain broken: {0}")]
    AuditChain(#[from] ChainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Machine-readable reason recorded in the audit log
    pub fn audit_reason(&self) -> &'static str {
        match self {
            EngineError::PolicyViolation(_) => "policy_violation",
            EngineError::TransactionNotFound(_) => "transaction_not_found",
            EngineError::UnknownGuardian(_) => "unknown_guardian",
            EngineError::InactiveGuardian(_) => "inactive_guardian",
            EngineError::EmergencyMode => "emergency_mode",
            EngineError::ChallengeAlreadyActive(_) => "challenge_already_active",
            EngineError::ChallengeNotFound(_) => "challenge_not_found",
            EngineError::ChallengeExpired(_) => "challenge_expired",
            EngineError::ChallengeAlreadyUsed(_) => "challenge_already_used",
            EngineError::DuplicateApprover { .. } => "duplicate_approver",
            EngineError::InvalidCode => "invalid_code",
            EngineError::TransactionExpired(_) => "transaction_expired",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::SignerFailure(_) => "signer_failure",
            EngineError::IndexSpaceExhausted(_) => "index_space_exhausted",
            EngineError::Config(_) => "config",
            EngineError::SecretStore(_) => "secret_store",
            EngineError::AuditChain(_) => "audit_chain",
            EngineError::Store(_) => "store",
        }
    }

    /// Rejections of a guardian's approval attempt (as opposed to
    /// infrastructure failures)
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownGuardian(_)
                | EngineError::InactiveGuardian(_)
                | EngineError::ChallengeNotFound(_)
                | EngineError::ChallengeExpired(_)
                | EngineError::ChallengeAlreadyUsed(_)
                | EngineError::DuplicateApprover { .. }
                | EngineError::InvalidCode
        )
    }
}
