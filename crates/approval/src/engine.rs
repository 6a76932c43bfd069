//! Custody engine - the single entry point for every approval operation
//!
//! Each operation runs its checks and writes inside one store transaction and
//! appends its audit record in that same transaction. A rejected approval
//! attempt still commits: the failure record is kept, the state is untouched.
//! Notifications go out only after commit.

use crate::allocator;
use crate::challenge;
use crate::config::EngineConfig;
use crate::error::{EngineError, StoreError, Violation};
use crate::guardians::{Guardian, GuardianRegistry, InMemorySecretStore, SecretStore};
use crate::model::{
    ApprovalDecision, ApprovalReceipt, ApprovalRecord, Challenge, DerivationPath,
    EphemeralIndexAllocation, ExecutionReceipt, GuardianStats, IssuedChallenge,
    PendingTransaction, TransactionState, TransactionStats, TransactionStatus, TransferRequest,
    WalletBalance,
};
use crate::signer::{LocalSigner, RemoteSigner, SignerError};
use crate::store::{self, CustodyStore};
use crate::sweep::SweepReport;
use crate::tracker;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use custody_audit::{verify_chain, AuditDraft, AuditKind, AuditRecord};
use custody_bus::{CustodyEvent, Notifier, TracingNotifier};
use custody_core::{Amount, ChallengeId, Clock, GuardianId, SystemClock, TransactionId, WalletId};
use custody_otp::{generate_challenge, ChallengeContext, Verification, VerificationMethod, Verifier};
use custody_policy::ThresholdPolicy;
use rusqlite::Connection;
use std::sync::Arc;

const MAX_DESTINATION_LEN: usize = 128;
const MAX_MEMO_LEN: usize = 64;

/// Keep engine errors for the caller, hand store errors back so the
/// surrounding write rolls back.
fn split<T>(result: Result<T, EngineError>) -> Result<Result<T, EngineError>, StoreError> {
    match result {
        Err(EngineError::Store(e)) => Err(e),
        other => Ok(other),
    }
}

/// Multi-signature approval engine
pub struct CustodyEngine {
    config: EngineConfig,
    policy: ThresholdPolicy,
    verifier: Verifier,
    store: CustodyStore,
    guardians: GuardianRegistry,
    secrets: Arc<dyn SecretStore>,
    signer: Arc<dyn RemoteSigner>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl CustodyEngine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    pub fn guardians(&self) -> &GuardianRegistry {
        &self.guardians
    }

    /// Current time at storage precision
    fn now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }

    fn publish(&self, event: CustodyEvent) {
        if let Err(e) = self.notifier.notify(&event) {
            tracing::warn!(event = event.name(), error = %e, "Notification failed");
        }
    }

    // === Transactions ===

    /// Register a payment without memo
    pub fn create_transaction(
        &self,
        amount: Amount,
        destination: &str,
        source_wallet: &WalletId,
    ) -> Result<PendingTransaction, EngineError> {
        self.create_transfer(&TransferRequest::new(amount, destination, source_wallet.clone()))
    }

    /// Register a transfer, fix its threshold scheme and reserve its amount
    /// on the source wallet
    pub fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<PendingTransaction, EngineError> {
        let amount = request.amount;
        if amount.is_zero() {
            return Err(Violation::ZeroAmount.into());
        }
        let destination = request.destination.trim();
        if destination.is_empty()
            || destination.len() > MAX_DESTINATION_LEN
            || destination.contains('|')
            || destination.chars().any(char::is_whitespace)
        {
            return Err(Violation::InvalidDestination(destination.to_string()).into());
        }
        let memo = match request.memo.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(memo) if memo.chars().count() > MAX_MEMO_LEN || memo.contains('|') => {
                return Err(Violation::InvalidMemo(memo.to_string()).into())
            }
            Some(memo) => Some(memo.to_string()),
        };
        let wallet = self
            .config
            .wallet(&request.source_wallet)
            .ok_or_else(|| Violation::UnknownWallet(request.source_wallet.clone()))?;

        let scheme = self.policy.select_scheme(amount, wallet.class);
        let now = self.now();
        let tx = PendingTransaction {
            id: TransactionId::generate(),
            amount,
            destination: destination.to_string(),
            source_wallet: wallet.id.clone(),
            wallet_class: wallet.class,
            tx_type: request.tx_type,
            memo,
            scheme,
            state: if scheme.challenge_mandatory() {
                TransactionState::Created
            } else {
                TransactionState::AwaitingApprovals
            },
            created_at: now,
            expires_at: now + self.config.approval_window(),
            updated_at: now,
            tx_hash: None,
            failure_reason: None,
        };

        let today = now.date_naive();
        let day_start = today.and_time(NaiveTime::MIN).and_utc();
        let month_start = day_start - Duration::days(today.day0() as i64);

        self.store
            .write(|conn| {
                if store::emergency_active(conn)? {
                    return Ok(Err(EngineError::EmergencyMode));
                }
                let totals = store::spending_totals(conn, &tx.source_wallet, day_start, month_start)?;
                if let Err(e) = self.policy.config().check_limits(totals, amount) {
                    return Ok(Err(Violation::Limit(e).into()));
                }
                let mut balance = store::wallet_balance(conn, &tx.source_wallet)?;
                if balance.available() < amount.value() {
                    return Ok(Err(Violation::InsufficientBalance {
                        wallet: tx.source_wallet.clone(),
                        available: balance.available(),
                        requested: amount.value(),
                    }
                    .into()));
                }
                // reserved + amount <= balance, so this cannot overflow
                balance.reserved += amount.value();
                store::put_wallet_balance(conn, &balance)?;

                store::insert_transaction(conn, &tx)?;
                let mut draft = AuditDraft::success(AuditKind::TransactionCreated)
                    .transaction(&tx.id)
                    .detail("amount", tx.amount)
                    .detail("destination", &tx.destination)
                    .detail("source_wallet", &tx.source_wallet)
                    .detail("tx_type", tx.tx_type)
                    .detail("scheme", tx.scheme.label());
                if let Some(memo) = &tx.memo {
                    draft = draft.detail("memo", memo);
                }
                store::append_audit(conn, draft, now)?;
                Ok(Ok(()))
            })??;

        tracing::info!(
            transaction_id = %tx.id,
            amount = %tx.amount,
            tx_type = %tx.tx_type,
            wallet = %tx.source_wallet,
            scheme = %tx.scheme.label(),
            "Transaction created"
        );
        Ok(tx)
    }

    pub fn get_transaction(&self, id: &TransactionId) -> Result<PendingTransaction, EngineError> {
        self.store
            .read(|conn| store::get_transaction(conn, id))?
            .ok_or_else(|| EngineError::TransactionNotFound(id.clone()))
    }

    /// Newest first; every state when `state` is `None`
    pub fn list_transactions(
        &self,
        state: Option<TransactionState>,
    ) -> Result<Vec<PendingTransaction>, EngineError> {
        Ok(self.store.read(|conn| store::list_transactions(conn, state))?)
    }

    // === Challenges ===

    /// Issue a fresh challenge bound to the transaction's id, amount and
    /// destination. At most one unused, unexpired challenge exists per
    /// transaction.
    pub fn issue_challenge(&self, id: &TransactionId) -> Result<IssuedChallenge, EngineError> {
        let now = self.now();

        let issued = self
            .store
            .write(|conn| split(self.issue_challenge_in(conn, id, now)))??;

        tracing::info!(
            transaction_id = %id,
            display_code = %issued.display_code,
            expires_at = %issued.expires_at,
            "Challenge issued"
        );
        self.publish(CustodyEvent::ChallengeIssued {
            transaction_id: issued.transaction_id.clone(),
            display_code: issued.display_code.clone(),
            challenge: issued.challenge.clone(),
            expires_at: issued.expires_at,
        });
        Ok(issued)
    }

    fn issue_challenge_in(
        &self,
        conn: &Connection,
        id: &TransactionId,
        now: DateTime<Utc>,
    ) -> Result<IssuedChallenge, EngineError> {
        let tx = store::get_transaction(conn, id)?
            .ok_or_else(|| EngineError::TransactionNotFound(id.clone()))?;
        if store::emergency_active(conn)? {
            return Err(EngineError::EmergencyMode);
        }

        match tx.state {
            TransactionState::Created
            | TransactionState::AwaitingChallenge
            | TransactionState::AwaitingApprovals => {}
            TransactionState::Expired => return Err(EngineError::TransactionExpired(id.clone())),
            state => {
                return Err(EngineError::InvalidState {
                    transaction_id: id.clone(),
                    state,
                    operation: "issue a challenge for",
                })
            }
        }
        if tx.is_past_deadline(now) {
            return Err(EngineError::TransactionExpired(id.clone()));
        }
        if let Some(existing) = challenge::latest_for(conn, id)? {
            if existing.is_active(now) {
                return Err(EngineError::ChallengeAlreadyActive(id.clone()));
            }
        }

        let material = generate_challenge(
            &ChallengeContext {
                transaction_id: tx.id.clone(),
                amount: tx.amount,
                destination: tx.destination.clone(),
            },
            now,
        );
        let record = Challenge {
            id: ChallengeId::generate(),
            transaction_id: tx.id.clone(),
            display_code: material.display_code,
            context_blob: material.challenge_string,
            issued_at: now,
            expires_at: (now + self.config.challenge_ttl()).min(tx.expires_at),
            used: false,
            used_at: None,
            used_by: None,
        };
        challenge::insert(conn, &record)?;
        // later challenges leave a transaction that is already collecting
        // approvals where it is
        if tx.scheme.challenge_mandatory() {
            store::transition(
                conn,
                id,
                &[TransactionState::Created],
                TransactionState::AwaitingChallenge,
                now,
            )?;
        }
        store::append_audit(
            conn,
            AuditDraft::success(AuditKind::ChallengeIssued)
                .transaction(id)
                .detail("challenge_id", &record.id)
                .detail("display_code", &record.display_code)
                .detail("expires_at", record.expires_at.to_rfc3339()),
            now,
        )?;

        Ok(IssuedChallenge::from(&record))
    }

    // === Approvals ===

    /// Verify a guardian's code and count the approval.
    ///
    /// Every attempt is audited, accepted or not. Challenge consumption,
    /// approval insert and the quorum transition commit together.
    pub fn submit_approval(
        &self,
        id: &TransactionId,
        guardian: &GuardianId,
        code: &str,
    ) -> Result<ApprovalReceipt, EngineError> {
        let now = self.now();

        let outcome = self.store.write(|conn| {
            let attempt = split(self.submit_approval_in(conn, id, guardian, code, now))?;

            let draft = match &attempt {
                Ok(receipt) => AuditDraft::success(AuditKind::ApprovalAttempt)
                    .detail("method", receipt.method)
                    .detail("decision", receipt.decision)
                    .detail("approvals", receipt.approvals)
                    .detail("required", receipt.required),
                Err(e) => AuditDraft::failure(AuditKind::ApprovalAttempt, e.audit_reason()),
            };
            store::append_audit(conn, draft.transaction(id).guardian(guardian), now)?;

            if let Ok(receipt) = &attempt {
                if receipt.decision == ApprovalDecision::QuorumReached {
                    store::append_audit(
                        conn,
                        AuditDraft::success(AuditKind::QuorumReached)
                            .transaction(id)
                            .guardian(guardian)
                            .detail("approvals", receipt.approvals),
                        now,
                    )?;
                }
            }
            Ok(attempt)
        })?;

        match &outcome {
            Ok(receipt) => {
                tracing::info!(
                    transaction_id = %id,
                    guardian_id = %guardian,
                    method = %receipt.method,
                    approvals = receipt.approvals,
                    required = receipt.required,
                    decision = %receipt.decision,
                    "Approval accepted"
                );
                self.publish(CustodyEvent::ApprovalRecorded {
                    transaction_id: id.clone(),
                    guardian_id: guardian.clone(),
                    approvals: receipt.approvals,
                    required: receipt.required,
                });
                if receipt.decision == ApprovalDecision::QuorumReached {
                    self.publish(CustodyEvent::QuorumReached {
                        transaction_id: id.clone(),
                        timestamp: now,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(
                    transaction_id = %id,
                    guardian_id = %guardian,
                    reason = e.audit_reason(),
                    "Approval rejected"
                );
            }
        }
        outcome
    }

    fn submit_approval_in(
        &self,
        conn: &Connection,
        id: &TransactionId,
        guardian: &GuardianId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalReceipt, EngineError> {
        let tx = store::get_transaction(conn, id)?
            .ok_or_else(|| EngineError::TransactionNotFound(id.clone()))?;
        if store::emergency_active(conn)? {
            return Err(EngineError::EmergencyMode);
        }
        self.guardians.require_active(guardian)?;

        let scheme = tx.scheme;
        let late = match tx.state {
            TransactionState::Ready => true,
            TransactionState::Created | TransactionState::AwaitingChallenge
            | TransactionState::AwaitingApprovals => false,
            TransactionState::Expired => return Err(EngineError::TransactionExpired(id.clone())),
            state => {
                return Err(EngineError::InvalidState {
                    transaction_id: id.clone(),
                    state,
                    operation: "approve",
                })
            }
        };
        if tx.is_past_deadline(now) {
            return Err(EngineError::TransactionExpired(id.clone()));
        }
        // A consumed challenge reports as used even to the guardian who consumed it
        let latest = challenge::latest_for(conn, id)?;
        let current = if scheme.challenge_mandatory() {
            match latest {
                None => return Err(EngineError::ChallengeNotFound(id.clone())),
                Some(c) if c.used => return Err(EngineError::ChallengeAlreadyUsed(id.clone())),
                Some(c) if c.is_expired(now) => {
                    return Err(EngineError::ChallengeExpired(id.clone()))
                }
                Some(c) => Some(c),
            }
        } else {
            latest.filter(|c| c.is_active(now))
        };

        if tracker::has_approved(conn, id, guardian)? {
            return Err(EngineError::DuplicateApprover {
                transaction_id: id.clone(),
                guardian_id: guardian.clone(),
            });
        }

        let secret = self.secrets.enrolled_secret(guardian)?;
        let context = current.as_ref().map(|c| c.context_blob.as_str());
        let method = match self.verifier.verify(&secret, context, code, now) {
            Verification::Valid(VerificationMethod::ChallengeDerived) => {
                VerificationMethod::ChallengeDerived
            }
            // A plain TOTP is not bound to this transaction
            Verification::Valid(VerificationMethod::Fallback) if !scheme.challenge_mandatory() => {
                VerificationMethod::Fallback
            }
            Verification::Valid(_) | Verification::Invalid => return Err(EngineError::InvalidCode),
        };
        let consumed = match method {
            VerificationMethod::ChallengeDerived => current,
            VerificationMethod::Fallback => None,
        };

        if let Some(c) = &consumed {
            if !challenge::consume(conn, c, guardian, now)? {
                return Err(EngineError::ChallengeAlreadyUsed(id.clone()));
            }
        }

        let inserted = tracker::insert(
            conn,
            &ApprovalRecord {
                transaction_id: id.clone(),
                guardian_id: guardian.clone(),
                method,
                challenge_id: consumed.map(|c| c.id),
                approved_at: now,
            },
        )?;
        if !inserted {
            return Err(StoreError::Corrupt(format!(
                "approval by {} on {} appeared mid-transaction",
                guardian, id
            ))
            .into());
        }

        let approvals = tracker::count(conn, id)?;
        let required = scheme.required_approvals();

        let decision = if late {
            ApprovalDecision::QuorumAlreadyReached
        } else if approvals >= required as u32 {
            let won = store::transition(
                conn,
                id,
                &[
                    TransactionState::Created,
                    TransactionState::AwaitingChallenge,
                    TransactionState::AwaitingApprovals,
                ],
                TransactionState::Ready,
                now,
            )?;
            if won {
                ApprovalDecision::QuorumReached
            } else {
                ApprovalDecision::QuorumAlreadyReached
            }
        } else {
            store::transition(
                conn,
                id,
                &[TransactionState::AwaitingChallenge, TransactionState::Created],
                TransactionState::AwaitingApprovals,
                now,
            )?;
            ApprovalDecision::Recorded
        };

        Ok(ApprovalReceipt {
            transaction_id: id.clone(),
            guardian_id: guardian.clone(),
            method,
            decision,
            approvals,
            required,
        })
    }

    /// Counted approvals, in arrival order
    pub fn approvals(&self, id: &TransactionId) -> Result<Vec<ApprovalRecord>, EngineError> {
        Ok(self.store.read(|conn| tracker::list_for(conn, id))?)
    }

    /// Read-only view; never changes state
    pub fn get_status(&self, id: &TransactionId) -> Result<TransactionStatus, EngineError> {
        let now = self.now();
        let (tx, approvals, latest) = self.store.read(|conn| {
            let tx = store::get_transaction(conn, id)?;
            let approvals = tracker::list_for(conn, id)?;
            let latest = challenge::latest_for(conn, id)?;
            Ok((tx, approvals, latest))
        })?;
        let tx = tx.ok_or_else(|| EngineError::TransactionNotFound(id.clone()))?;

        Ok(TransactionStatus {
            transaction_id: tx.id,
            state: tx.state,
            approvals_count: approvals.len() as u32,
            required: tx.scheme.required_approvals(),
            total: tx.scheme.total_approvers(),
            challenge_mandatory: tx.scheme.challenge_mandatory(),
            expires_at: tx.expires_at,
            approvers: approvals.into_iter().map(|a| a.guardian_id).collect(),
            active_challenge: latest.filter(|c| c.is_active(now)).map(|c| c.display_code),
        })
    }

    /// Code the guardian's authenticator would show now, for the active
    /// challenge of `transaction` or the plain fallback when `None`.
    pub fn authenticator_code(
        &self,
        guardian: &GuardianId,
        transaction: Option<&TransactionId>,
    ) -> Result<String, EngineError> {
        self.guardians.require_active(guardian)?;
        let secret = self.secrets.enrolled_secret(guardian)?;
        let now = self.now();

        let context = match transaction {
            Some(id) => {
                let latest = self.store.read(|conn| challenge::latest_for(conn, id))?;
                match latest.filter(|c| c.is_active(now)) {
                    Some(c) => Some(c.context_blob),
                    None => return Err(EngineError::ChallengeNotFound(id.clone())),
                }
            }
            None => None,
        };
        Ok(self.verifier.current_code(&secret, context.as_deref(), now))
    }

    // === Execution ===

    /// Reserve an ephemeral index and hand the transfer to the remote signer.
    ///
    /// Only one caller can move a transaction out of `Ready`. The signer call
    /// runs outside the store lock.
    pub async fn execute(&self, id: &TransactionId) -> Result<ExecutionReceipt, EngineError> {
        let now = self.now();
        let (tx, allocation, path) = self
            .store
            .write(|conn| split(self.begin_execution_in(conn, id, now)))??;

        let payload = serde_json::to_vec(&serde_json::json!({
            "transaction_id": tx.id,
            "amount": tx.amount,
            "destination": tx.destination,
            "source_wallet": tx.source_wallet,
            "derivation_path": path.to_string(),
        }))
        .map_err(StoreError::from)?;

        tracing::info!(transaction_id = %id, path = %path, "Submitting to signer");
        let timeout = self.config.signer_timeout();
        let signed = match tokio::time::timeout(timeout, self.signer.sign_and_submit(&path, &payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SignerError::Timeout(timeout.as_millis() as u64)),
        };

        let finished = self.now();
        match signed {
            Ok(tx_hash) => {
                self.store.write(|conn| {
                    store::transition(
                        conn,
                        id,
                        &[TransactionState::Executing],
                        TransactionState::Succeeded,
                        finished,
                    )?;
                    store::set_outcome(conn, id, Some(tx_hash.as_str()), None)?;
                    store::release_reservation(conn, &tx, true)?;
                    allocator::mark_consumed(conn, id, finished)?;
                    store::append_audit(
                        conn,
                        AuditDraft::success(AuditKind::ExecutionSucceeded)
                            .transaction(id)
                            .detail("tx_hash", &tx_hash)
                            .detail("derivation_path", &path),
                        finished,
                    )?;
                    Ok(())
                })?;

                tracing::info!(transaction_id = %id, tx_hash = %tx_hash, "Transaction executed");
                self.publish(CustodyEvent::TransactionExecuted {
                    transaction_id: id.clone(),
                    tx_hash: tx_hash.clone(),
                });
                Ok(ExecutionReceipt {
                    transaction_id: id.clone(),
                    wallet_id: allocation.wallet_id,
                    index: allocation.index,
                    derivation_path: path.to_string(),
                    tx_hash,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                self.store.write(|conn| {
                    store::transition(
                        conn,
                        id,
                        &[TransactionState::Executing],
                        TransactionState::Failed,
                        finished,
                    )?;
                    store::set_outcome(conn, id, None, Some(reason.as_str()))?;
                    store::release_reservation(conn, &tx, false)?;
                    store::append_audit(
                        conn,
                        AuditDraft::failure(AuditKind::ExecutionFailed, "signer_failure")
                            .transaction(id)
                            .detail("error", &reason)
                            .detail("derivation_path", &path),
                        finished,
                    )?;
                    Ok(())
                })?;

                tracing::error!(transaction_id = %id, error = %reason, "Signer failed");
                self.publish(CustodyEvent::TransactionFailed {
                    transaction_id: id.clone(),
                    reason,
                });
                Err(EngineError::SignerFailure(e))
            }
        }
    }

    fn begin_execution_in(
        &self,
        conn: &Connection,
        id: &TransactionId,
        now: DateTime<Utc>,
    ) -> Result<(PendingTransaction, EphemeralIndexAllocation, DerivationPath), EngineError> {
        let tx = store::get_transaction(conn, id)?
            .ok_or_else(|| EngineError::TransactionNotFound(id.clone()))?;
        if store::emergency_active(conn)? {
            return Err(EngineError::EmergencyMode);
        }
        match tx.state {
            TransactionState::Ready => {}
            TransactionState::Expired => return Err(EngineError::TransactionExpired(id.clone())),
            state => {
                return Err(EngineError::InvalidState {
                    transaction_id: id.clone(),
                    state,
                    operation: "execute",
                })
            }
        }
        if tx.is_past_deadline(now) {
            return Err(EngineError::TransactionExpired(id.clone()));
        }
        let wallet = self.config.wallet(&tx.source_wallet).ok_or_else(|| {
            EngineError::Config(format!("wallet {} is no longer configured", tx.source_wallet))
        })?;

        let allocation = allocator::allocate(conn, &wallet.id, id, now)?
            .ok_or_else(|| EngineError::IndexSpaceExhausted(wallet.id.clone()))?;
        if !store::transition(
            conn,
            id,
            &[TransactionState::Ready],
            TransactionState::Executing,
            now,
        )? {
            return Err(StoreError::Corrupt(format!("{} left ready mid-transaction", id)).into());
        }

        let path = DerivationPath {
            root: wallet.derivation_root.clone(),
            index: allocation.index,
        };
        store::append_audit(
            conn,
            AuditDraft::success(AuditKind::ExecutionStarted)
                .transaction(id)
                .detail("wallet", &wallet.id)
                .detail("index", allocation.index)
                .detail("derivation_path", &path),
            now,
        )?;
        Ok((tx, allocation, path))
    }

    pub fn allocation(
        &self,
        id: &TransactionId,
    ) -> Result<Option<EphemeralIndexAllocation>, EngineError> {
        Ok(self.store.read(|conn| allocator::for_transaction(conn, id))?)
    }

    /// Allocations for a wallet in index order
    pub fn allocations(&self, wallet: &WalletId) -> Result<Vec<EphemeralIndexAllocation>, EngineError> {
        Ok(self.store.read(|conn| allocator::list_for_wallet(conn, wallet))?)
    }

    // === Expiry ===

    /// Expire every transaction past its deadline, release its reservation
    /// and prune dead challenges.
    ///
    /// `Executing` is left alone; the signer outcome decides it.
    pub fn sweep_expired(&self) -> Result<SweepReport, EngineError> {
        let now = self.now();
        let report = self.store.write(|conn| {
            let mut expired = Vec::new();
            for id in store::due_for_expiry(conn, now)? {
                let tx = store::get_transaction(conn, &id)?
                    .ok_or_else(|| StoreError::Corrupt(format!("{} vanished mid-sweep", id)))?;
                if store::transition(
                    conn,
                    &id,
                    &TransactionState::EXPIRABLE,
                    TransactionState::Expired,
                    now,
                )? {
                    store::release_reservation(conn, &tx, false)?;
                    store::append_audit(
                        conn,
                        AuditDraft::success(AuditKind::TransactionExpired)
                            .transaction(&id)
                            .detail("released", tx.amount),
                        now,
                    )?;
                    expired.push(id);
                }
            }
            let challenges_pruned = challenge::delete_expired(conn, now)?;
            Ok(SweepReport {
                expired,
                challenges_pruned,
            })
        })?;

        for id in &report.expired {
            tracing::info!(transaction_id = %id, "Transaction expired");
            self.publish(CustodyEvent::TransactionExpired {
                transaction_id: id.clone(),
            });
        }
        Ok(report)
    }

    // === Wallet balances ===

    /// Credit funds to a configured source wallet. Allowed in emergency mode.
    pub fn deposit(&self, wallet: &WalletId, amount: Amount) -> Result<WalletBalance, EngineError> {
        if amount.is_zero() {
            return Err(Violation::ZeroAmount.into());
        }
        let wallet = &self
            .config
            .wallet(wallet)
            .ok_or_else(|| Violation::UnknownWallet(wallet.clone()))?
            .id;
        let now = self.now();

        let balance = self.store.write(|conn| {
            let mut balance = store::wallet_balance(conn, wallet)?;
            balance.balance = match balance.balance.checked_add(amount.value()) {
                Some(total) => total,
                None => return Ok(Err(EngineError::from(Violation::BalanceOverflow(wallet.clone())))),
            };
            store::put_wallet_balance(conn, &balance)?;
            store::append_audit(
                conn,
                AuditDraft::success(AuditKind::WalletCredited)
                    .detail("wallet", wallet)
                    .detail("amount", amount)
                    .detail("balance", balance.balance),
                now,
            )?;
            Ok(Ok(balance))
        })??;

        tracing::info!(wallet = %wallet, amount = %amount, balance = %balance.balance, "Wallet credited");
        Ok(balance)
    }

    /// Balance of a configured wallet; zero when never credited
    pub fn wallet_balance(&self, wallet: &WalletId) -> Result<WalletBalance, EngineError> {
        let wallet = self
            .config
            .wallet(wallet)
            .ok_or_else(|| Violation::UnknownWallet(wallet.clone()))?;
        Ok(self.store.read(|conn| store::wallet_balance(conn, &wallet.id))?)
    }

    /// Balances of every configured wallet, in configuration order
    pub fn wallet_balances(&self) -> Result<Vec<WalletBalance>, EngineError> {
        Ok(self.store.read(|conn| {
            self.config
                .wallets
                .iter()
                .map(|w| store::wallet_balance(conn, &w.id))
                .collect()
        })?)
    }

    // === Guardians ===

    /// Roster with approval counts, in registration order
    pub fn guardian_stats(&self) -> Result<Vec<GuardianStats>, EngineError> {
        let counts = self.store.read(tracker::per_guardian)?;
        Ok(self
            .guardians
            .iter()
            .map(|g| {
                let (approval_count, last_approval) = match counts.get(&g.id) {
                    Some((count, latest)) => (*count, Some(*latest)),
                    None => (0, None),
                };
                GuardianStats {
                    guardian_id: g.id.clone(),
                    role: g.role.clone(),
                    active: g.active,
                    approval_count,
                    last_approval,
                }
            })
            .collect())
    }

    // === Emergency mode ===

    /// Halt every mutating operation except the expiry sweep
    pub fn emergency_shutdown(&self, guardian: &GuardianId) -> Result<(), EngineError> {
        self.set_emergency(guardian, true)
    }

    pub fn lift_emergency(&self, guardian: &GuardianId) -> Result<(), EngineError> {
        self.set_emergency(guardian, false)
    }

    pub fn is_emergency_active(&self) -> Result<bool, EngineError> {
        Ok(self.store.read(store::emergency_active)?)
    }

    fn set_emergency(&self, guardian: &GuardianId, active: bool) -> Result<(), EngineError> {
        self.guardians.require_active(guardian)?;
        let now = self.now();
        let kind = if active {
            AuditKind::EmergencyActivated
        } else {
            AuditKind::EmergencyLifted
        };

        self.store.write(|conn| {
            store::set_emergency(conn, active)?;
            store::append_audit(conn, AuditDraft::success(kind).guardian(guardian), now)?;
            Ok(())
        })?;

        tracing::warn!(guardian_id = %guardian, active, "Emergency mode changed");
        self.publish(CustodyEvent::EmergencyModeChanged {
            active,
            guardian_id: guardian.clone(),
        });
        Ok(())
    }

    // === Audit and stats ===

    /// Audit records in chain order, optionally filtered to one transaction
    pub fn audit_trail(
        &self,
        transaction: Option<&TransactionId>,
    ) -> Result<Vec<AuditRecord>, EngineError> {
        Ok(self.store.read(|conn| store::audit_records(conn, transaction))?)
    }

    /// Verify the whole chain; returns the number of records checked
    pub fn verify_audit_chain(&self) -> Result<usize, EngineError> {
        let records = self.audit_trail(None)?;
        verify_chain(&records)?;
        Ok(records.len())
    }

    pub fn stats(&self) -> Result<TransactionStats, EngineError> {
        Ok(self.store.read(store::state_counts)?)
    }
}

/// Builder for `CustodyEngine`
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<CustodyStore>,
    guardians: Vec<Guardian>,
    secrets: Option<Arc<dyn SecretStore>>,
    signer: Option<Arc<dyn RemoteSigner>>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            guardians: Vec::new(),
            secrets: None,
            signer: None,
            notifier: None,
            clock: None,
        }
    }

    /// Use a persistent store (defaults to in-memory)
    pub fn with_store(mut self, store: CustodyStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_guardians(mut self, guardians: Vec<Guardian>) -> Self {
        self.guardians = guardians;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn RemoteSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the config and roster, then build the engine
    pub fn build(self) -> Result<CustodyEngine, EngineError> {
        self.config.validate()?;
        let policy = ThresholdPolicy::new(self.config.policy.clone())
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let guardians = GuardianRegistry::new(self.guardians)?;
        if guardians.len() != policy.config().total_approvers as usize {
            return Err(EngineError::Config(format!(
                "policy expects {} guardians, roster has {}",
                policy.config().total_approvers,
                guardians.len()
            )));
        }

        let store = match self.store {
            Some(store) => store,
            None => CustodyStore::in_memory()?,
        };

        Ok(CustodyEngine {
            verifier: Verifier::new(self.config.totp),
            config: self.config,
            policy,
            store,
            guardians,
            secrets: self
                .secrets
                .unwrap_or_else(|| Arc::new(InMemorySecretStore::new())),
            signer: self
                .signer
                .unwrap_or_else(|| Arc::new(LocalSigner::generate())),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_core::ManualClock;
    use custody_otp::GuardianSecret;

    fn gid(s: &str) -> GuardianId {
        GuardianId::new(s).unwrap()
    }

    fn roster() -> Vec<Guardian> {
        vec![
            Guardian::new(gid("CEO"), "CEO"),
            Guardian::new(gid("CFO"), "CFO"),
            Guardian::new(gid("CTO"), "CTO"),
        ]
    }

    fn unfunded_engine() -> CustodyEngine {
        let secrets = Arc::new(InMemorySecretStore::new());
        for g in roster() {
            secrets.enroll(g.id, GuardianSecret::generate());
        }
        EngineBuilder::new(EngineConfig::default())
            .with_guardians(roster())
            .with_secrets(secrets)
            .with_clock(Arc::new(ManualClock::starting_now()))
            .build()
            .unwrap()
    }

    fn engine() -> CustodyEngine {
        let engine = unfunded_engine();
        engine.deposit(&hot(), Amount::from_units(10_000_000)).unwrap();
        engine
    }

    fn hot() -> WalletId {
        WalletId::new("HOT").unwrap()
    }

    #[test]
    fn test_roster_size_must_match_policy() {
        let result = EngineBuilder::new(EngineConfig::default())
            .with_guardians(roster()[..2].to_vec())
            .build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_initial_state_follows_scheme() {
        let engine = engine();
        let low = engine.create_transaction(Amount::from_units(500), "GDEST", &hot()).unwrap();
        let high = engine.create_transaction(Amount::from_units(50_000), "GDEST", &hot()).unwrap();

        assert_eq!(low.state, TransactionState::AwaitingApprovals);
        assert!(!low.scheme.challenge_mandatory());
        assert_eq!(high.state, TransactionState::Created);
        assert_eq!(high.scheme.required_approvals(), 3);
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let engine = engine();
        assert!(matches!(
            engine.create_transaction(Amount::ZERO, "GDEST", &hot()),
            Err(EngineError::PolicyViolation(Violation::ZeroAmount))
        ));
        assert!(matches!(
            engine.create_transaction(Amount::from_units(1), "A|B", &hot()),
            Err(EngineError::PolicyViolation(Violation::InvalidDestination(_)))
        ));
        assert!(matches!(
            engine.create_transaction(Amount::from_units(1), "GDEST", &WalletId::new("X").unwrap()),
            Err(EngineError::PolicyViolation(Violation::UnknownWallet(_)))
        ));
    }

    #[test]
    fn test_daily_limit_enforced() {
        let engine = engine();
        engine.create_transaction(Amount::from_units(60_000), "GDEST", &hot()).unwrap();
        let second = engine.create_transaction(Amount::from_units(50_000), "GDEST", &hot());
        assert!(matches!(
            second,
            Err(EngineError::PolicyViolation(Violation::Limit(_)))
        ));
    }

    #[test]
    fn test_one_active_challenge() {
        let engine = engine();
        let tx = engine.create_transaction(Amount::from_units(5_000), "GDEST", &hot()).unwrap();

        let issued = engine.issue_challenge(&tx.id).unwrap();
        assert_eq!(issued.display_code.len(), 16);
        assert!(issued.expires_at <= tx.expires_at);
        assert!(matches!(
            engine.issue_challenge(&tx.id),
            Err(EngineError::ChallengeAlreadyActive(_))
        ));
        assert_eq!(
            engine.get_transaction(&tx.id).unwrap().state,
            TransactionState::AwaitingChallenge
        );
    }

    #[test]
    fn test_status_is_read_only() {
        let engine = engine();
        let tx = engine.create_transaction(Amount::from_units(5_000), "GDEST", &hot()).unwrap();
        let before = engine.audit_trail(None).unwrap().len();

        let status = engine.get_status(&tx.id).unwrap();
        assert_eq!(status.state, TransactionState::Created);
        assert_eq!(status.required, 2);
        assert!(status.active_challenge.is_none());
        assert_eq!(engine.audit_trail(None).unwrap().len(), before);
    }

    #[test]
    fn test_emergency_blocks_operations() {
        let engine = engine();
        let tx = engine.create_transaction(Amount::from_units(5_000), "GDEST", &hot()).unwrap();

        engine.emergency_shutdown(&gid("CEO")).unwrap();
        assert!(engine.is_emergency_active().unwrap());
        assert!(matches!(engine.issue_challenge(&tx.id), Err(EngineError::EmergencyMode)));
        assert!(matches!(
            engine.create_transaction(Amount::from_units(1), "GDEST", &hot()),
            Err(EngineError::EmergencyMode)
        ));

        engine.lift_emergency(&gid("CFO")).unwrap();
        assert!(engine.issue_challenge(&tx.id).is_ok());
    }

    #[test]
    fn test_unknown_guardian_is_audited() {
        let engine = engine();
        let tx = engine.create_transaction(Amount::from_units(500), "GDEST", &hot()).unwrap();

        let result = engine.submit_approval(&tx.id, &gid("MALLORY"), "123456");
        assert!(matches!(result, Err(EngineError::UnknownGuardian(_))));

        let trail = engine.audit_trail(Some(&tx.id)).unwrap();
        let last = trail.last().unwrap();
        assert_eq!(last.kind, AuditKind::ApprovalAttempt);
        assert_eq!(last.reason.as_deref(), Some("unknown_guardian"));
        assert_eq!(engine.verify_audit_chain().unwrap(), engine.audit_trail(None).unwrap().len());
    }

    #[test]
    fn test_overflowing_amount_is_rejected_and_store_stays_usable() {
        let engine = engine();
        engine.create_transaction(Amount::from_units(500), "GDEST", &hot()).unwrap();

        let huge = Amount::new(rust_decimal::Decimal::MAX).unwrap();
        assert!(matches!(
            engine.create_transaction(huge, "GDEST", &hot()),
            Err(EngineError::PolicyViolation(Violation::Limit(
                custody_policy::PolicyError::TotalOverflow(_)
            )))
        ));

        let next = engine.create_transaction(Amount::from_units(10), "GDEST", &hot()).unwrap();
        assert_eq!(next.state, TransactionState::AwaitingApprovals);
        assert_eq!(engine.stats().unwrap().total(), 2);
    }

    #[test]
    fn test_creation_reserves_balance() {
        let engine = unfunded_engine();
        assert!(matches!(
            engine.create_transaction(Amount::from_units(1), "GDEST", &hot()),
            Err(EngineError::PolicyViolation(Violation::InsufficientBalance { .. }))
        ));

        engine.deposit(&hot(), Amount::from_units(700)).unwrap();
        engine.create_transaction(Amount::from_units(500), "GDEST", &hot()).unwrap();
        let balance = engine.wallet_balance(&hot()).unwrap();
        assert_eq!(balance.balance, rust_decimal::Decimal::from(700));
        assert_eq!(balance.reserved, rust_decimal::Decimal::from(500));

        match engine.create_transaction(Amount::from_units(300), "GDEST", &hot()) {
            Err(EngineError::PolicyViolation(Violation::InsufficientBalance {
                available,
                requested,
                ..
            })) => {
                assert_eq!(available, rust_decimal::Decimal::from(200));
                assert_eq!(requested, rust_decimal::Decimal::from(300));
            }
            other => panic!("unexpected result {:?}", other),
        }
        // a refused transfer reserves nothing
        assert_eq!(engine.wallet_balance(&hot()).unwrap().available(), rust_decimal::Decimal::from(200));
    }

    #[test]
    fn test_deposit_validation() {
        let engine = unfunded_engine();
        assert!(matches!(
            engine.deposit(&hot(), Amount::ZERO),
            Err(EngineError::PolicyViolation(Violation::ZeroAmount))
        ));
        assert!(matches!(
            engine.deposit(&WalletId::new("X").unwrap(), Amount::from_units(1)),
            Err(EngineError::PolicyViolation(Violation::UnknownWallet(_)))
        ));

        let max = Amount::new(rust_decimal::Decimal::MAX).unwrap();
        engine.deposit(&hot(), max).unwrap();
        assert!(matches!(
            engine.deposit(&hot(), Amount::from_units(1)),
            Err(EngineError::PolicyViolation(Violation::BalanceOverflow(_)))
        ));

        // crediting is not halted by emergency mode
        engine.emergency_shutdown(&gid("CEO")).unwrap();
        let cold = WalletId::new("COLD").unwrap();
        engine.deposit(&cold, Amount::from_units(5)).unwrap();

        let credits = engine
            .audit_trail(None)
            .unwrap()
            .into_iter()
            .filter(|r| r.kind == AuditKind::WalletCredited)
            .count();
        assert_eq!(credits, 2);
        let balances = engine.wallet_balances().unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[1].balance, rust_decimal::Decimal::from(5));
    }

    #[test]
    fn test_transfer_type_and_memo() {
        let engine = engine();
        let request = TransferRequest::new(Amount::from_units(500), "GDEST", hot())
            .with_type(crate::model::TransactionType::Rebalance)
            .with_memo("  top up cold  ");
        let tx = engine.create_transfer(&request).unwrap();
        assert_eq!(tx.tx_type, crate::model::TransactionType::Rebalance);
        assert_eq!(tx.memo.as_deref(), Some("top up cold"));

        let created = &engine.audit_trail(Some(&tx.id)).unwrap()[0];
        assert_eq!(created.detail.get("tx_type").map(String::as_str), Some("rebalance"));
        assert_eq!(created.detail.get("memo").map(String::as_str), Some("top up cold"));

        let long = request.clone().with_memo("m".repeat(65));
        assert!(matches!(
            engine.create_transfer(&long),
            Err(EngineError::PolicyViolation(Violation::InvalidMemo(_)))
        ));
        let piped = request.with_memo("a|b");
        assert!(matches!(
            engine.create_transfer(&piped),
            Err(EngineError::PolicyViolation(Violation::InvalidMemo(_)))
        ));

        let plain = engine.create_transaction(Amount::from_units(1), "GDEST", &hot()).unwrap();
        assert_eq!(plain.tx_type, crate::model::TransactionType::Payment);
        assert!(plain.memo.is_none());
    }
}
