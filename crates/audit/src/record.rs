//! Audit record types

use crate::hash::calculate_record_hash;
use chrono::{DateTime, Utc};
use custody_core::{GuardianId, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    TransactionCreated,
    ChallengeIssued,
    ApprovalAttempt,
    QuorumReached,
    ExecutionStarted,
    ExecutionSucceeded,
    ExecutionFailed,
    TransactionExpired,
    EmergencyActivated,
    EmergencyLifted,
    WalletCredited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// An audit event before it is placed in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub kind: AuditKind,
    pub outcome: AuditOutcome,
    pub transaction_id: Option<TransactionId>,
    pub guardian_id: Option<GuardianId>,
    /// Machine-readable reason for failures, e.g. `invalid_code`
    pub reason: Option<String>,
    pub detail: BTreeMap<String, String>,
}

impl AuditDraft {
    pub fn success(kind: AuditKind) -> Self {
        Self {
            kind,
            outcome: AuditOutcome::Success,
            transaction_id: None,
            guardian_id: None,
            reason: None,
            detail: BTreeMap::new(),
        }
    }

    pub fn failure(kind: AuditKind, reason: impl Into<String>) -> Self {
        Self {
            outcome: AuditOutcome::Failure,
            reason: Some(reason.into()),
            ..Self::success(kind)
        }
    }

    pub fn transaction(mut self, id: &TransactionId) -> Self {
        self.transaction_id = Some(id.clone());
        self
    }

    pub fn guardian(mut self, id: &GuardianId) -> Self {
        self.guardian_id = Some(id.clone());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.detail.insert(key.into(), value.to_string());
        self
    }

    /// Place the draft in the chain after `prev_hash`
    pub fn seal(self, sequence: u64, prev_hash: &str, timestamp: DateTime<Utc>) -> AuditRecord {
        let mut record = AuditRecord {
            sequence,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
            timestamp,
            kind: self.kind,
            outcome: self.outcome,
            transaction_id: self.transaction_id,
            guardian_id: self.guardian_id,
            reason: self.reason,
            detail: self.detail,
        };
        record.hash = calculate_record_hash(&record);
        record
    }
}

/// A sealed, chained audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence: u64,
    pub prev_hash: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub outcome: AuditOutcome,
    pub transaction_id: Option<TransactionId>,
    pub guardian_id: Option<GuardianId>,
    pub reason: Option<String>,
    #[serde(default)]
    pub detail: BTreeMap<String, String>,
}

impl AuditRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == AuditOutcome::Success
    }
}
