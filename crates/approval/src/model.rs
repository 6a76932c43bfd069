//! Approval domain records

use chrono::{DateTime, Utc};
use custody_core::{Amount, ChallengeId, GuardianId, TransactionId, WalletClass, WalletId};
use custody_otp::VerificationMethod;
use custody_policy::ThresholdScheme;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};

/// Lifecycle of a pending transaction
///
/// ```text
/// Created ─► AwaitingChallenge ─► AwaitingApprovals ─► Ready ─► Executing ─► Succeeded
///    │              │                    │               │              └──► Failed
///    └──────────────┴────────────────────┴───────────────┴──► Expired (sweep only)
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
    Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Created,
    AwaitingChallenge,
    AwaitingApprovals,
    Ready,
    Executing,
    Succeeded,
    Failed,
    Expired,
}

impl TransactionState {
    /// States the expiry sweep may move to `Expired`.
    ///
    /// `Executing` is excluded: the signer call is in flight and decides the outcome.
    pub const EXPIRABLE: [TransactionState; 4] = [
        TransactionState::Created,
        TransactionState::AwaitingChallenge,
        TransactionState::AwaitingApprovals,
        TransactionState::Ready,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Succeeded | TransactionState::Failed | TransactionState::Expired
        )
    }
}

/// Purpose of a transfer. Informational: the threshold scheme ignores it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
    EnumIter,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    #[default]
    Payment,
    Rebalance,
    Withdrawal,
    Emergency,
}

/// Input of `create_transfer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub amount: Amount,
    pub destination: String,
    pub source_wallet: WalletId,
    pub tx_type: TransactionType,
    pub memo: Option<String>,
}

impl TransferRequest {
    /// A plain payment without memo
    pub fn new(amount: Amount, destination: impl Into<String>, source_wallet: WalletId) -> Self {
        Self {
            amount,
            destination: destination.into(),
            source_wallet,
            tx_type: TransactionType::Payment,
            memo: None,
        }
    }

    pub fn with_type(mut self, tx_type: TransactionType) -> Self {
        self.tx_type = tx_type;
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// The object under approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: TransactionId,
    pub amount: Amount,
    pub destination: String,
    pub source_wallet: WalletId,
    pub wallet_class: WalletClass,
    pub tx_type: TransactionType,
    pub memo: Option<String>,
    pub scheme: ThresholdScheme,
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
    /// Shared deadline of the approval window and every challenge
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tx_hash: Option<String>,
    pub failure_reason: Option<String>,
}

impl PendingTransaction {
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A single-use, transaction-bound challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub transaction_id: TransactionId,
    pub display_code: String,
    /// Full challenge string codes are derived from
    pub context_blob: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by: Option<GuardianId>,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Unused and unexpired
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired(now)
    }
}

/// What `issue_challenge` hands back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedChallenge {
    pub challenge_id: ChallengeId,
    pub transaction_id: TransactionId,
    pub display_code: String,
    pub challenge: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&Challenge> for IssuedChallenge {
    fn from(c: &Challenge) -> Self {
        Self {
            challenge_id: c.id.clone(),
            transaction_id: c.transaction_id.clone(),
            display_code: c.display_code.clone(),
            challenge: c.context_blob.clone(),
            expires_at: c.expires_at,
        }
    }
}

/// One guardian's counted approval. Never mutated; kept after terminal states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub transaction_id: TransactionId,
    pub guardian_id: GuardianId,
    pub method: VerificationMethod,
    pub challenge_id: Option<ChallengeId>,
    pub approved_at: DateTime<Utc>,
}

/// A derivation index reserved for one executed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralIndexAllocation {
    pub wallet_id: WalletId,
    pub index: u32,
    pub transaction_id: TransactionId,
    pub allocated_at: DateTime<Utc>,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
}

/// Key derivation path handed to the remote signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationPath {
    pub root: String,
    pub index: u32,
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root.trim_end_matches('/'), self.index)
    }
}

/// Effect of an accepted approval on the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Counted, quorum not yet reached
    Recorded,
    /// This approval completed the quorum (fires once per transaction)
    QuorumReached,
    /// Late approval after quorum: kept for audit, no state change
    QuorumAlreadyReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalReceipt {
    pub transaction_id: TransactionId,
    pub guardian_id: GuardianId,
    pub method: VerificationMethod,
    pub decision: ApprovalDecision,
    pub approvals: u32,
    pub required: u8,
}

impl ApprovalReceipt {
    pub fn accepted(&self) -> bool {
        true
    }

    pub fn quorum_reached(&self) -> bool {
        self.decision != ApprovalDecision::Recorded
    }
}

/// `get_status` view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction_id: TransactionId,
    pub state: TransactionState,
    pub approvals_count: u32,
    pub required: u8,
    pub total: u8,
    pub challenge_mandatory: bool,
    pub expires_at: DateTime<Utc>,
    pub approvers: Vec<GuardianId>,
    pub active_challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub transaction_id: TransactionId,
    pub wallet_id: WalletId,
    pub index: u32,
    pub derivation_path: String,
    pub tx_hash: String,
}

/// Funds of one source wallet.
///
/// `reserved` is held by transactions that are neither settled nor
/// released; it never exceeds `balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub wallet_id: WalletId,
    pub balance: Decimal,
    pub reserved: Decimal,
}

impl WalletBalance {
    pub fn empty(wallet_id: WalletId) -> Self {
        Self {
            wallet_id,
            balance: Decimal::ZERO,
            reserved: Decimal::ZERO,
        }
    }

    /// What a new transaction may still reserve
    pub fn available(&self) -> Decimal {
        self.balance - self.reserved
    }
}

/// Roster entry with its approval history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianStats {
    pub guardian_id: GuardianId,
    pub role: String,
    pub active: bool,
    /// Counted approvals across all transactions
    pub approval_count: u32,
    pub last_approval: Option<DateTime<Utc>>,
}

/// Transaction counts per state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStats {
    pub created: usize,
    pub awaiting_challenge: usize,
    pub awaiting_approvals: usize,
    pub ready: usize,
    pub executing: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub expired: usize,
}

impl TransactionStats {
    pub fn add(&mut self, state: TransactionState, count: usize) {
        let slot = match state {
            TransactionState::Created => &mut self.created,
            TransactionState::AwaitingChallenge => &mut self.awaiting_challenge,
            TransactionState::AwaitingApprovals => &mut self.awaiting_approvals,
            TransactionState::Ready => &mut self.ready,
            TransactionState::Executing => &mut self.executing,
            TransactionState::Succeeded => &mut self.succeeded,
            TransactionState::Failed => &mut self.failed,
            TransactionState::Expired => &mut self.expired,
        };
        *slot += count;
    }

    pub fn total(&self) -> usize {
        self.created
            + self.awaiting_challenge
            + self.awaiting_approvals
            + self.ready
            + self.executing
            + self.succeeded
            + self.failed
            + self.expired
    }
}
