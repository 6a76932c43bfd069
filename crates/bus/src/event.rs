//! Events emitted by the approval engine

use chrono::{DateTime, Utc};
use custody_core::{GuardianId, TransactionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustodyEvent {
    /// A challenge guardians must answer
    ChallengeIssued {
        transaction_id: TransactionId,
        /// Short token shown to humans
        display_code: String,
        /// Full challenge context an authenticator derives codes from
        challenge: String,
        expires_at: DateTime<Utc>,
    },

    /// A guardian's approval counted toward quorum
    ApprovalRecorded {
        transaction_id: TransactionId,
        guardian_id: GuardianId,
        approvals: u32,
        required: u8,
    },

    /// Quorum reached; the transaction is ready to execute
    QuorumReached {
        transaction_id: TransactionId,
        timestamp: DateTime<Utc>,
    },

    TransactionExecuted {
        transaction_id: TransactionId,
        tx_hash: String,
    },

    TransactionFailed {
        transaction_id: TransactionId,
        reason: String,
    },

    TransactionExpired {
        transaction_id: TransactionId,
    },

    EmergencyModeChanged {
        active: bool,
        guardian_id: GuardianId,
    },
}

impl CustodyEvent {
    pub fn quorum_reached(transaction_id: TransactionId) -> Self {
        Self::QuorumReached {
            transaction_id,
            timestamp: Utc::now(),
        }
    }

    /// Transaction this event concerns, if any
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            CustodyEvent::ChallengeIssued { transaction_id, .. }
            | CustodyEvent::ApprovalRecorded { transaction_id, .. }
            | CustodyEvent::QuorumReached { transaction_id, .. }
            | CustodyEvent::TransactionExecuted { transaction_id, .. }
            | CustodyEvent::TransactionFailed { transaction_id, .. }
            | CustodyEvent::TransactionExpired { transaction_id } => Some(transaction_id),
            CustodyEvent::EmergencyModeChanged { .. } => None,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            CustodyEvent::ChallengeIssued { .. } => "challenge_issued",
            CustodyEvent::ApprovalRecorded { .. } => "approval_recorded",
            CustodyEvent::QuorumReached { .. } => "quorum_reached",
            CustodyEvent::TransactionExecuted { .. } => "transaction_executed",
            CustodyEvent::TransactionFailed { .. } => "transaction_failed",
            CustodyEvent::TransactionExpired { .. } => "transaction_expired",
            CustodyEvent::EmergencyModeChanged { .. } => "emergency_mode_changed",
        }
    }
}
