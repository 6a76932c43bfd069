//! Ephemeral derivation index allocation
//!
//! One counter row per wallet, advanced with a compare-and-set inside the
//! caller's immediate transaction. An index is never reused, even when the
//! signer call that used it failed.

use crate::error::StoreError;
use crate::model::EphemeralIndexAllocation;
use crate::store::{from_millis, parse, to_millis};
use chrono::{DateTime, Utc};
use custody_core::{TransactionId, WalletId};
use rusqlite::{params, Connection, OptionalExtension};

/// Highest non-hardened child index
pub const MAX_INDEX: u32 = (1 << 31) - 1;

/// Reserve the next index for `transaction`. `None` when the wallet's index
/// space is exhausted.
pub(crate) fn allocate(
    conn: &Connection,
    wallet: &WalletId,
    transaction: &TransactionId,
    now: DateTime<Utc>,
) -> Result<Option<EphemeralIndexAllocation>, StoreError> {
    conn.execute(
        "INSERT INTO wallet_index_counters (wallet_id, next_index) VALUES (?1, 0)
         ON CONFLICT(wallet_id) DO NOTHING",
        params![wallet.as_str()],
    )?;

    let next: i64 = conn.query_row(
        "SELECT next_index FROM wallet_index_counters WHERE wallet_id = ?1",
        params![wallet.as_str()],
        |row| row.get(0),
    )?;
    if next < 0 || next > MAX_INDEX as i64 {
        return Ok(None);
    }

    let advanced = conn.execute(
        "UPDATE wallet_index_counters SET next_index = next_index + 1
         WHERE wallet_id = ?1 AND next_index = ?2",
        params![wallet.as_str(), next],
    )?;
    if advanced != 1 {
        return Err(StoreError::Corrupt(format!(
            "index counter for {} moved during allocation",
            wallet
        )));
    }

    let allocation = EphemeralIndexAllocation {
        wallet_id: wallet.clone(),
        index: next as u32,
        transaction_id: transaction.clone(),
        allocated_at: now,
        consumed: false,
        consumed_at: None,
    };
    conn.execute(
        "INSERT INTO index_allocations
         (wallet_id, derivation_index, transaction_id, allocated_at, consumed, consumed_at)
         VALUES (?1, ?2, ?3, ?4, 0, NULL)",
        params![
            wallet.as_str(),
            allocation.index,
            transaction.as_str(),
            to_millis(now),
        ],
    )?;
    Ok(Some(allocation))
}

/// Mark the allocation of a successfully signed transaction consumed
pub(crate) fn mark_consumed(
    conn: &Connection,
    transaction: &TransactionId,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE index_allocations SET consumed = 1, consumed_at = ?1 WHERE transaction_id = ?2",
        params![to_millis(now), transaction.as_str()],
    )?;
    Ok(())
}

type RawAllocation = (String, u32, String, i64, bool, Option<i64>);

fn into_model(raw: RawAllocation) -> Result<EphemeralIndexAllocation, StoreError> {
    let (wallet, index, transaction, allocated_at, consumed, consumed_at) = raw;
    Ok(EphemeralIndexAllocation {
        wallet_id: parse("wallet id", &wallet)?,
        index,
        transaction_id: parse("transaction id", &transaction)?,
        allocated_at: from_millis(allocated_at)?,
        consumed,
        consumed_at: consumed_at.map(from_millis).transpose()?,
    })
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAllocation> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

pub(crate) fn for_transaction(
    conn: &Connection,
    transaction: &TransactionId,
) -> Result<Option<EphemeralIndexAllocation>, StoreError> {
    conn.query_row(
        "SELECT wallet_id, derivation_index, transaction_id, allocated_at, consumed, consumed_at
         FROM index_allocations WHERE transaction_id = ?1",
        params![transaction.as_str()],
        raw_row,
    )
    .optional()?
    .map(into_model)
    .transpose()
}

/// Allocations for one wallet in index order
pub(crate) fn list_for_wallet(
    conn: &Connection,
    wallet: &WalletId,
) -> Result<Vec<EphemeralIndexAllocation>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT wallet_id, derivation_index, transaction_id, allocated_at, consumed, consumed_at
         FROM index_allocations WHERE wallet_id = ?1 ORDER BY derivation_index",
    )?;
    let rows = stmt
        .query_map(params![wallet.as_str()], raw_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(into_model).collect()
}
