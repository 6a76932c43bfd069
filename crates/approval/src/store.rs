//! SQLite storage for transactions, challenges, approvals, index allocations,
//! wallet balances and the audit chain
//!
//! All mutation goes through [`CustodyStore::write`], which runs the closure
//! inside a `BEGIN IMMEDIATE` transaction. SQLite serializes writers, so a
//! read-check-write sequence inside one closure cannot interleave with
//! another. The only way a transaction changes state is [`transition`], a
//! compare-and-set on the current state.

use crate::error::StoreError;
use crate::model::{PendingTransaction, TransactionState, TransactionStats, WalletBalance};
use chrono::{DateTime, Utc};
use custody_audit::{AuditDraft, AuditRecord, GENESIS_HASH};
use custody_core::{Amount, GuardianId, TransactionId, WalletId};
use custody_policy::{SpendingTotals, ThresholdScheme};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const EMERGENCY_FLAG: &str = "emergency_mode";

/// SQLite-backed custody store
pub struct CustodyStore {
    conn: Mutex<Connection>,
}

impl CustodyStore {
    /// Open (or create) the store at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::init(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A panic inside a write closure drops its SQLite transaction, which
    /// rolls back, so the connection behind a poisoned lock is still sound.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovering store connection after a panicked writer");
            poisoned.into_inner()
        })
    }

    /// Run `f` in one immediate transaction; commits when `f` returns `Ok`
    pub fn write<R>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Run a read-only closure
    pub fn read<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let conn = self.lock();
        f(&conn)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            amount TEXT NOT NULL,
            destination TEXT NOT NULL,
            source_wallet TEXT NOT NULL,
            wallet_class TEXT NOT NULL,
            tx_type TEXT NOT NULL,
            memo TEXT,
            required_approvals INTEGER NOT NULL,
            total_approvers INTEGER NOT NULL,
            challenge_mandatory INTEGER NOT NULL,
            state TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            tx_hash TEXT,
            failure_reason TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_state ON transactions(state);
        CREATE INDEX IF NOT EXISTS idx_transactions_wallet ON transactions(source_wallet, created_at);

        CREATE TABLE IF NOT EXISTS challenges (
            id TEXT PRIMARY KEY,
            transaction_id TEXT NOT NULL REFERENCES transactions(id),
            display_code TEXT NOT NULL,
            context_blob TEXT NOT NULL,
            issued_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            used_at INTEGER,
            used_by TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_challenges_tx ON challenges(transaction_id, issued_at);

        CREATE TABLE IF NOT EXISTS approvals (
            transaction_id TEXT NOT NULL REFERENCES transactions(id),
            guardian_id TEXT NOT NULL,
            method TEXT NOT NULL,
            challenge_id TEXT,
            approved_at INTEGER NOT NULL,
            PRIMARY KEY (transaction_id, guardian_id)
        );

        CREATE TABLE IF NOT EXISTS wallet_index_counters (
            wallet_id TEXT PRIMARY KEY,
            next_index INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS index_allocations (
            wallet_id TEXT NOT NULL,
            derivation_index INTEGER NOT NULL,
            transaction_id TEXT NOT NULL UNIQUE REFERENCES transactions(id),
            allocated_at INTEGER NOT NULL,
            consumed INTEGER NOT NULL DEFAULT 0,
            consumed_at INTEGER,
            PRIMARY KEY (wallet_id, derivation_index)
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            sequence INTEGER PRIMARY KEY,
            prev_hash TEXT NOT NULL,
            hash TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            kind TEXT NOT NULL,
            outcome TEXT NOT NULL,
            transaction_id TEXT,
            guardian_id TEXT,
            reason TEXT,
            detail TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_tx ON audit_log(transaction_id);

        CREATE TABLE IF NOT EXISTS wallet_balances (
            wallet_id TEXT PRIMARY KEY,
            balance TEXT NOT NULL,
            reserved TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS system_flags (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    Ok(())
}

// === Row helpers ===

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

pub(crate) fn parse<T>(field: &str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| StoreError::Corrupt(format!("{} {:?}: {}", field, raw, e)))
}

// === Transactions ===

const TX_COLUMNS: &str = "id, amount, destination, source_wallet, wallet_class,
    tx_type, memo, required_approvals, total_approvers, challenge_mandatory, state,
    created_at, expires_at, updated_at, tx_hash, failure_reason";

struct TxRow {
    id: String,
    amount: String,
    destination: String,
    source_wallet: String,
    wallet_class: String,
    tx_type: String,
    memo: Option<String>,
    required_approvals: u8,
    total_approvers: u8,
    challenge_mandatory: bool,
    state: String,
    created_at: i64,
    expires_at: i64,
    updated_at: i64,
    tx_hash: Option<String>,
    failure_reason: Option<String>,
}

impl TxRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            amount: row.get(1)?,
            destination: row.get(2)?,
            source_wallet: row.get(3)?,
            wallet_class: row.get(4)?,
            tx_type: row.get(5)?,
            memo: row.get(6)?,
            required_approvals: row.get(7)?,
            total_approvers: row.get(8)?,
            challenge_mandatory: row.get(9)?,
            state: row.get(10)?,
            created_at: row.get(11)?,
            expires_at: row.get(12)?,
            updated_at: row.get(13)?,
            tx_hash: row.get(14)?,
            failure_reason: row.get(15)?,
        })
    }

    fn into_model(self) -> Result<PendingTransaction, StoreError> {
        let scheme = ThresholdScheme::new(
            self.required_approvals,
            self.total_approvers,
            self.challenge_mandatory,
        )
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(PendingTransaction {
            id: parse("transaction id", &self.id)?,
            amount: parse::<Amount>("amount", &self.amount)?,
            destination: self.destination,
            source_wallet: parse("source wallet", &self.source_wallet)?,
            wallet_class: parse("wallet class", &self.wallet_class)?,
            tx_type: parse("transaction type", &self.tx_type)?,
            memo: self.memo,
            scheme,
            state: parse("state", &self.state)?,
            created_at: from_millis(self.created_at)?,
            expires_at: from_millis(self.expires_at)?,
            updated_at: from_millis(self.updated_at)?,
            tx_hash: self.tx_hash,
            failure_reason: self.failure_reason,
        })
    }
}

pub(crate) fn insert_transaction(
    conn: &Connection,
    tx: &PendingTransaction,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO transactions
         (id, amount, destination, source_wallet, wallet_class, tx_type, memo,
          required_approvals, total_approvers, challenge_mandatory, state,
          created_at, expires_at, updated_at, tx_hash, failure_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            tx.id.as_str(),
            tx.amount.to_string(),
            tx.destination,
            tx.source_wallet.as_str(),
            tx.wallet_class.to_string(),
            tx.tx_type.to_string(),
            tx.memo,
            tx.scheme.required_approvals(),
            tx.scheme.total_approvers(),
            tx.scheme.challenge_mandatory(),
            tx.state.to_string(),
            to_millis(tx.created_at),
            to_millis(tx.expires_at),
            to_millis(tx.updated_at),
            tx.tx_hash,
            tx.failure_reason,
        ],
    )?;
    Ok(())
}

pub(crate) fn get_transaction(
    conn: &Connection,
    id: &TransactionId,
) -> Result<Option<PendingTransaction>, StoreError> {
    let sql = format!("SELECT {} FROM transactions WHERE id = ?1", TX_COLUMNS);
    conn.query_row(&sql, params![id.as_str()], TxRow::from_row)
        .optional()?
        .map(TxRow::into_model)
        .transpose()
}

/// Newest first; all states when `state` is `None`
pub(crate) fn list_transactions(
    conn: &Connection,
    state: Option<TransactionState>,
) -> Result<Vec<PendingTransaction>, StoreError> {
    let rows = match state {
        Some(state) => {
            let sql = format!(
                "SELECT {} FROM transactions WHERE state = ?1 ORDER BY created_at DESC, id",
                TX_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![state.to_string()], TxRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let sql = format!(
                "SELECT {} FROM transactions ORDER BY created_at DESC, id",
                TX_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], TxRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    rows.into_iter().map(TxRow::into_model).collect()
}

/// Compare-and-set on the state column. Returns whether this call won.
pub(crate) fn transition(
    conn: &Connection,
    id: &TransactionId,
    from: &[TransactionState],
    to: TransactionState,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    if from.is_empty() {
        return Ok(false);
    }
    let placeholders = (0..from.len())
        .map(|i| format!("?{}", i + 4))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE transactions SET state = ?1, updated_at = ?2
         WHERE id = ?3 AND state IN ({})",
        placeholders
    );

    let mut values = vec![
        Value::Text(to.to_string()),
        Value::Integer(to_millis(now)),
        Value::Text(id.as_str().to_string()),
    ];
    values.extend(from.iter().map(|s| Value::Text(s.to_string())));

    let rows = conn.execute(&sql, params_from_iter(values))?;
    Ok(rows == 1)
}

/// Record the signer's outcome on a transaction that just left `Executing`
pub(crate) fn set_outcome(
    conn: &Connection,
    id: &TransactionId,
    tx_hash: Option<&str>,
    failure_reason: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE transactions SET tx_hash = ?1, failure_reason = ?2 WHERE id = ?3",
        params![tx_hash, failure_reason, id.as_str()],
    )?;
    Ok(())
}

/// Ids in expirable states whose deadline is at or before `now`
pub(crate) fn due_for_expiry(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<TransactionId>, StoreError> {
    let states = TransactionState::EXPIRABLE
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT id FROM transactions WHERE state IN ({}) AND expires_at <= ?1 ORDER BY expires_at",
        states
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids: Vec<String> = stmt
        .query_map(params![to_millis(now)], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    ids.iter().map(|id| parse("transaction id", id)).collect()
}

/// Sum of amounts created from `wallet` in the current UTC day and month.
/// Failed and expired transactions release their share.
pub(crate) fn spending_totals(
    conn: &Connection,
    wallet: &WalletId,
    day_start: DateTime<Utc>,
    month_start: DateTime<Utc>,
) -> Result<SpendingTotals, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT amount, created_at FROM transactions
         WHERE source_wallet = ?1 AND created_at >= ?2
           AND state NOT IN ('failed', 'expired')",
    )?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(params![wallet.as_str(), to_millis(month_start)], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let overflow = || StoreError::Corrupt(format!("spending total of {} overflows", wallet));
    let day_ms = to_millis(day_start);
    let mut totals = SpendingTotals::default();
    for (amount, created_at) in rows {
        let value: Decimal = parse("amount", &amount)?;
        totals.this_month = totals.this_month.checked_add(value).ok_or_else(overflow)?;
        if created_at >= day_ms {
            totals.today = totals.today.checked_add(value).ok_or_else(overflow)?;
        }
    }
    Ok(totals)
}

pub(crate) fn state_counts(conn: &Connection) -> Result<TransactionStats, StoreError> {
    let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM transactions GROUP BY state")?;
    let rows: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stats = TransactionStats::default();
    for (state, count) in rows {
        stats.add(parse("state", &state)?, count as usize);
    }
    Ok(stats)
}

// === Wallet balances ===

/// Zero balance for a wallet that was never credited
pub(crate) fn wallet_balance(
    conn: &Connection,
    wallet: &WalletId,
) -> Result<WalletBalance, StoreError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT balance, reserved FROM wallet_balances WHERE wallet_id = ?1",
            params![wallet.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((balance, reserved)) => Ok(WalletBalance {
            wallet_id: wallet.clone(),
            balance: parse("balance", &balance)?,
            reserved: parse("reserved", &reserved)?,
        }),
        None => Ok(WalletBalance::empty(wallet.clone())),
    }
}

pub(crate) fn put_wallet_balance(
    conn: &Connection,
    balance: &WalletBalance,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO wallet_balances (wallet_id, balance, reserved) VALUES (?1, ?2, ?3)
         ON CONFLICT(wallet_id) DO UPDATE SET
            balance = excluded.balance, reserved = excluded.reserved",
        params![
            balance.wallet_id.as_str(),
            balance.balance.to_string(),
            balance.reserved.to_string(),
        ],
    )?;
    Ok(())
}

fn debit(value: Decimal, amount: Decimal, what: &str, wallet: &WalletId) -> Result<Decimal, StoreError> {
    value
        .checked_sub(amount)
        .filter(|left| !left.is_sign_negative())
        .ok_or_else(|| StoreError::Corrupt(format!("{} of {} would go negative", what, wallet)))
}

/// Drop the reservation `tx` holds on its source wallet. With `settle` the
/// amount also leaves the balance.
pub(crate) fn release_reservation(
    conn: &Connection,
    tx: &PendingTransaction,
    settle: bool,
) -> Result<WalletBalance, StoreError> {
    let mut balance = wallet_balance(conn, &tx.source_wallet)?;
    let amount = tx.amount.value();
    balance.reserved = debit(balance.reserved, amount, "reservation", &tx.source_wallet)?;
    if settle {
        balance.balance = debit(balance.balance, amount, "balance", &tx.source_wallet)?;
    }
    put_wallet_balance(conn, &balance)?;
    Ok(balance)
}

// === Emergency flag ===

pub(crate) fn emergency_active(conn: &Connection) -> Result<bool, StoreError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM system_flags WHERE name = ?1",
            params![EMERGENCY_FLAG],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.as_deref() == Some("1"))
}

pub(crate) fn set_emergency(conn: &Connection, active: bool) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO system_flags (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        params![EMERGENCY_FLAG, if active { "1" } else { "0" }],
    )?;
    Ok(())
}

// === Audit chain ===

/// Seal `draft` after the current chain head and insert it
pub(crate) fn append_audit(
    conn: &Connection,
    draft: AuditDraft,
    now: DateTime<Utc>,
) -> Result<AuditRecord, StoreError> {
    let head: Option<(i64, String)> = conn
        .query_row(
            "SELECT sequence, hash FROM audit_log ORDER BY sequence DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (last_sequence, prev_hash) = head.unwrap_or((0, GENESIS_HASH.to_string()));

    let record = draft.seal(last_sequence as u64 + 1, &prev_hash, now);
    conn.execute(
        "INSERT INTO audit_log
         (sequence, prev_hash, hash, timestamp, kind, outcome,
          transaction_id, guardian_id, reason, detail)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.sequence as i64,
            record.prev_hash,
            record.hash,
            record.timestamp.to_rfc3339(),
            record.kind.to_string(),
            record.outcome.to_string(),
            record.transaction_id.as_ref().map(|id| id.as_str()),
            record.guardian_id.as_ref().map(|id| id.as_str()),
            record.reason,
            serde_json::to_string(&record.detail)?,
        ],
    )?;
    Ok(record)
}

struct AuditRow {
    sequence: i64,
    prev_hash: String,
    hash: String,
    timestamp: String,
    kind: String,
    outcome: String,
    transaction_id: Option<String>,
    guardian_id: Option<String>,
    reason: Option<String>,
    detail: String,
}

impl AuditRow {
    fn into_record(self) -> Result<AuditRecord, StoreError> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| StoreError::Corrupt(format!("audit timestamp: {}", e)))?
            .with_timezone(&Utc);
        let detail: BTreeMap<String, String> = serde_json::from_str(&self.detail)?;

        Ok(AuditRecord {
            sequence: self.sequence as u64,
            prev_hash: self.prev_hash,
            hash: self.hash,
            timestamp,
            kind: parse("audit kind", &self.kind)?,
            outcome: parse("audit outcome", &self.outcome)?,
            transaction_id: self
                .transaction_id
                .map(|id| parse::<TransactionId>("transaction id", &id))
                .transpose()?,
            guardian_id: self
                .guardian_id
                .map(|id| parse::<GuardianId>("guardian id", &id))
                .transpose()?,
            reason: self.reason,
            detail,
        })
    }
}

/// Audit records in chain order, optionally only those about one transaction
pub(crate) fn audit_records(
    conn: &Connection,
    transaction: Option<&TransactionId>,
) -> Result<Vec<AuditRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT sequence, prev_hash, hash, timestamp, kind, outcome,
                transaction_id, guardian_id, reason, detail
         FROM audit_log
         WHERE ?1 IS NULL OR transaction_id = ?1
         ORDER BY sequence",
    )?;
    let rows = stmt
        .query_map(params![transaction.map(|id| id.as_str())], |row| {
            Ok(AuditRow {
                sequence: row.get(0)?,
                prev_hash: row.get(1)?,
                hash: row.get(2)?,
                timestamp: row.get(3)?,
                kind: row.get(4)?,
                outcome: row.get(5)?,
                transaction_id: row.get(6)?,
                guardian_id: row.get(7)?,
                reason: row.get(8)?,
                detail: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(AuditRow::into_record).collect()
}
