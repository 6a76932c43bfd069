//! Challenge rows
//!
//! A challenge is consumed with a compare-and-set on `used`, so of two
//! submissions racing on the same challenge exactly one wins.

use crate::error::StoreError;
use crate::model::Challenge;
use crate::store::{from_millis, parse, to_millis};
use chrono::{DateTime, Utc};
use custody_core::{GuardianId, TransactionId};
use rusqlite::{params, Connection, OptionalExtension};

const COLUMNS: &str =
    "id, transaction_id, display_code, context_blob, issued_at, expires_at, used, used_at, used_by";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChallenge> {
    Ok(RawChallenge {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        display_code: row.get(2)?,
        context_blob: row.get(3)?,
        issued_at: row.get(4)?,
        expires_at: row.get(5)?,
        used: row.get(6)?,
        used_at: row.get(7)?,
        used_by: row.get(8)?,
    })
}

struct RawChallenge {
    id: String,
    transaction_id: String,
    display_code: String,
    context_blob: String,
    issued_at: i64,
    expires_at: i64,
    used: bool,
    used_at: Option<i64>,
    used_by: Option<String>,
}

impl RawChallenge {
    fn into_model(self) -> Result<Challenge, StoreError> {
        Ok(Challenge {
            id: parse("challenge id", &self.id)?,
            transaction_id: parse("transaction id", &self.transaction_id)?,
            display_code: self.display_code,
            context_blob: self.context_blob,
            issued_at: from_millis(self.issued_at)?,
            expires_at: from_millis(self.expires_at)?,
            used: self.used,
            used_at: self.used_at.map(from_millis).transpose()?,
            used_by: self
                .used_by
                .map(|g| parse::<GuardianId>("guardian id", &g))
                .transpose()?,
        })
    }
}

pub(crate) fn insert(conn: &Connection, challenge: &Challenge) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO challenges
         (id, transaction_id, display_code, context_blob, issued_at, expires_at, used, used_at, used_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            challenge.id.as_str(),
            challenge.transaction_id.as_str(),
            challenge.display_code,
            challenge.context_blob,
            to_millis(challenge.issued_at),
            to_millis(challenge.expires_at),
            challenge.used,
            challenge.used_at.map(to_millis),
            challenge.used_by.as_ref().map(|g| g.as_str()),
        ],
    )?;
    Ok(())
}

/// Most recently issued challenge for a transaction
pub(crate) fn latest_for(
    conn: &Connection,
    transaction: &TransactionId,
) -> Result<Option<Challenge>, StoreError> {
    let sql = format!(
        "SELECT {} FROM challenges WHERE transaction_id = ?1
         ORDER BY issued_at DESC, rowid DESC LIMIT 1",
        COLUMNS
    );
    conn.query_row(&sql, params![transaction.as_str()], from_row)
        .optional()?
        .map(RawChallenge::into_model)
        .transpose()
}

/// Mark a challenge used. Returns false when it was already used or expired.
pub(crate) fn consume(
    conn: &Connection,
    challenge: &Challenge,
    guardian: &GuardianId,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let rows = conn.execute(
        "UPDATE challenges SET used = 1, used_at = ?1, used_by = ?2
         WHERE id = ?3 AND used = 0 AND expires_at > ?1",
        params![to_millis(now), guardian.as_str(), challenge.id.as_str()],
    )?;
    Ok(rows == 1)
}

/// Drop unused challenges past their expiry. Used ones stay as evidence.
pub(crate) fn delete_expired(conn: &Connection, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let rows = conn.execute(
        "DELETE FROM challenges WHERE used = 0 AND expires_at <= ?1",
        params![to_millis(now)],
    )?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PendingTransaction, TransactionState, TransactionType};
    use crate::store::{insert_transaction, CustodyStore};
    use custody_core::{Amount, ChallengeId, WalletClass, WalletId};
    use custody_policy::ThresholdScheme;

    fn now() -> DateTime<Utc> {
        from_millis(Utc::now().timestamp_millis()).unwrap()
    }

    fn setup() -> (CustodyStore, TransactionId) {
        let store = CustodyStore::in_memory().unwrap();
        let at = now();
        let tx = PendingTransaction {
            id: TransactionId::new("TX-1").unwrap(),
            amount: Amount::from_units(5000),
            destination: "GDEST".to_string(),
            source_wallet: WalletId::new("HOT").unwrap(),
            wallet_class: WalletClass::Hot,
            tx_type: TransactionType::Payment,
            memo: None,
            scheme: ThresholdScheme::new(2, 3, true).unwrap(),
            state: TransactionState::AwaitingChallenge,
            created_at: at,
            expires_at: at + chrono::Duration::minutes(5),
            updated_at: at,
            tx_hash: None,
            failure_reason: None,
        };
        store.write(|c| insert_transaction(c, &tx)).unwrap();
        (store, tx.id)
    }

    fn challenge(tx: &TransactionId, issued_at: DateTime<Utc>) -> Challenge {
        Challenge {
            id: ChallengeId::generate(),
            transaction_id: tx.clone(),
            display_code: "ABCDEF0123456789".to_string(),
            context_blob: format!("{}|5000|GDEST|0|00", tx),
            issued_at,
            expires_at: issued_at + chrono::Duration::minutes(5),
            used: false,
            used_at: None,
            used_by: None,
        }
    }

    #[test]
    fn test_latest_challenge_wins() {
        let (store, tx) = setup();
        let first = challenge(&tx, now());
        let second = challenge(&tx, now() + chrono::Duration::seconds(1));
        store
            .write(|c| {
                insert(c, &first)?;
                insert(c, &second)
            })
            .unwrap();

        let latest = store.read(|c| latest_for(c, &tx)).unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[test]
    fn test_consume_only_once() {
        let (store, tx) = setup();
        let ch = challenge(&tx, now());
        let cfo = GuardianId::new("CFO").unwrap();
        let ceo = GuardianId::new("CEO").unwrap();
        store.write(|c| insert(c, &ch)).unwrap();

        assert!(store.write(|c| consume(c, &ch, &cfo, now())).unwrap());
        assert!(!store.write(|c| consume(c, &ch, &ceo, now())).unwrap());

        let stored = store.read(|c| latest_for(c, &tx)).unwrap().unwrap();
        assert!(stored.used);
        assert_eq!(stored.used_by, Some(cfo));
    }

    #[test]
    fn test_expired_challenge_cannot_be_consumed() {
        let (store, tx) = setup();
        let ch = challenge(&tx, now());
        store.write(|c| insert(c, &ch)).unwrap();

        let late = ch.expires_at;
        let g = GuardianId::new("CFO").unwrap();
        assert!(!store.write(|c| consume(c, &ch, &g, late)).unwrap());
        assert_eq!(store.write(|c| delete_expired(c, late)).unwrap(), 1);
        assert!(store.read(|c| latest_for(c, &tx)).unwrap().is_none());
    }
}
