//! Approval rows and quorum counting
//!
//! The `(transaction_id, guardian_id)` primary key makes a second approval by
//! the same guardian a no-op at the storage level.

use crate::error::StoreError;
use crate::model::ApprovalRecord;
use crate::store::{from_millis, parse, to_millis};
use chrono::{DateTime, Utc};
use custody_core::{GuardianId, TransactionId};
use std::collections::HashMap;
use custody_otp::VerificationMethod;
use rusqlite::{params, Connection};

/// Insert an approval. Returns false if this guardian already approved.
pub(crate) fn insert(conn: &Connection, record: &ApprovalRecord) -> Result<bool, StoreError> {
    let rows = conn.execute(
        "INSERT INTO approvals (transaction_id, guardian_id, method, challenge_id, approved_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(transaction_id, guardian_id) DO NOTHING",
        params![
            record.transaction_id.as_str(),
            record.guardian_id.as_str(),
            record.method.to_string(),
            record.challenge_id.as_ref().map(|c| c.as_str()),
            to_millis(record.approved_at),
        ],
    )?;
    Ok(rows == 1)
}

pub(crate) fn has_approved(
    conn: &Connection,
    transaction: &TransactionId,
    guardian: &GuardianId,
) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM approvals WHERE transaction_id = ?1 AND guardian_id = ?2",
        params![transaction.as_str(), guardian.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn count(conn: &Connection, transaction: &TransactionId) -> Result<u32, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM approvals WHERE transaction_id = ?1",
        params![transaction.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

/// Approvals in the order they were recorded
pub(crate) fn list_for(
    conn: &Connection,
    transaction: &TransactionId,
) -> Result<Vec<ApprovalRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT guardian_id, method, challenge_id, approved_at FROM approvals
         WHERE transaction_id = ?1 ORDER BY approved_at, rowid",
    )?;
    let rows: Vec<(String, String, Option<String>, i64)> = stmt
        .query_map(params![transaction.as_str()], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(guardian, method, challenge, approved_at)| -> Result<_, StoreError> {
            Ok(ApprovalRecord {
                transaction_id: transaction.clone(),
                guardian_id: parse("guardian id", &guardian)?,
                method: parse::<VerificationMethod>("method", &method)?,
                challenge_id: challenge
                    .map(|c| parse("challenge id", &c))
                    .transpose()?,
                approved_at: from_millis(approved_at)?,
            })
        })
        .collect()
}

/// Approval count and latest approval time per guardian, across all
/// transactions
pub(crate) fn per_guardian(
    conn: &Connection,
) -> Result<HashMap<GuardianId, (u32, DateTime<Utc>)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT guardian_id, COUNT(*), MAX(approved_at) FROM approvals GROUP BY guardian_id",
    )?;
    let rows: Vec<(String, i64, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(guardian, count, latest)| {
            Ok((parse("guardian id", &guardian)?, (count as u32, from_millis(latest)?)))
        })
        .collect()
}
