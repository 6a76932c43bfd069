//! Hash chain utilities for audit integrity

use crate::record::AuditRecord;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// `prev_hash` of the first record
pub const GENESIS_HASH: &str = "GENESIS";

/// SHA256 over every field except `hash` itself
pub fn calculate_record_hash(record: &AuditRecord) -> String {
    let mut hasher = Sha256::new();

    hasher.update(record.sequence.to_le_bytes());
    hasher.update(record.prev_hash.as_bytes());
    hasher.update(record.timestamp.to_rfc3339().as_bytes());
    hasher.update(record.kind.to_string().as_bytes());
    hasher.update(record.outcome.to_string().as_bytes());

    // Length-prefix optional fields so None and "" hash differently
    for field in [
        record.transaction_id.as_ref().map(|id| id.as_str()),
        record.guardian_id.as_ref().map(|id| id.as_str()),
        record.reason.as_deref(),
    ] {
        match field {
            Some(value) => {
                hasher.update([1u8]);
                hasher.update((value.len() as u64).to_le_bytes());
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }

    // BTreeMap iterates in key order
    for (key, value) in &record.detail {
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// Verify hash chain integrity from the genesis record
pub fn verify_chain(records: &[AuditRecord]) -> Result<(), ChainError> {
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut expected_sequence = 1u64;

    for record in records {
        if record.sequence != expected_sequence {
            return Err(ChainError::InvalidSequence {
                expected: expected_sequence,
                actual: record.sequence,
            });
        }

        if record.prev_hash != prev_hash {
            return Err(ChainError::BrokenLink {
                sequence: record.sequence,
                expected: prev_hash,
                actual: record.prev_hash.clone(),
            });
        }

        let calculated = calculate_record_hash(record);
        if record.hash != calculated {
            return Err(ChainError::InvalidHash {
                sequence: record.sequence,
                expected: calculated,
                actual: record.hash.clone(),
            });
        }

        prev_hash = record.hash.clone();
        expected_sequence += 1;
    }

    Ok(())
}

/// Errors in hash chain verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Broken link at seq {sequence}: expected prev_hash '{expected}', got '{actual}'")]
    BrokenLink {
        sequence: u64,
        expected: String,
        actual: String,
    },

    #[error("Invalid hash at seq {sequence}: expected '{expected}', got '{actual}'")]
    InvalidHash {
        sequence: u64,
        expected: String,
        actual: String,
    },

    #[error("Invalid sequence: expected {expected}, got {actual}")]
    InvalidSequence { expected: u64, actual: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AuditDraft, AuditKind};
    use chrono::Utc;
    use custody_core::TransactionId;

    fn chain(n: u64) -> Vec<AuditRecord> {
        let tx = TransactionId::new("TX-CHAIN").unwrap();
        let mut records = Vec::new();
        let mut prev = GENESIS_HASH.to_string();
        for seq in 1..=n {
            let record = AuditDraft::success(AuditKind::ApprovalAttempt)
                .transaction(&tx)
                .detail("n", seq)
                .seal(seq, &prev, Utc::now());
            prev = record.hash.clone();
            records.push(record);
        }
        records
    }

    #[test]
    fn test_valid_chain() {
        assert!(verify_chain(&chain(5)).is_ok());
        assert!(verify_chain(&[]).is_ok());
    }

    #[test]
    fn test_tampered_field_detected() {
        let mut records = chain(3);
        records[1].reason = Some("edited".to_string());
        assert!(matches!(
            verify_chain(&records),
            Err(ChainError::InvalidHash { sequence: 2, .. })
        ));
    }

    #[test]
    fn test_removed_record_detected() {
        let mut records = chain(3);
        records.remove(1);
        assert!(matches!(
            verify_chain(&records),
            Err(ChainError::InvalidSequence { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_relinked_record_detected() {
        let mut records = chain(3);
        records[2].prev_hash = "0".repeat(64);
        assert!(matches!(
            verify_chain(&records),
            Err(ChainError::BrokenLink { sequence: 3, .. })
        ));
    }

    #[test]
    fn test_none_and_empty_reason_hash_differently() {
        let mut a = chain(1).remove(0);
        let before = calculate_record_hash(&a);
        a.reason = Some(String::new());
        assert_ne!(before, calculate_record_hash(&a));
    }
}
