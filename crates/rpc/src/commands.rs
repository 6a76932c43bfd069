//! CLI commands

use crate::context::AppContext;
use async_trait::async_trait;
use custody_approval::{
    run_expiry_sweep, ApprovalDecision, ApprovalReceipt, ExecutionReceipt, GuardianStats,
    IssuedChallenge, SweepReport, TransactionState, TransactionStats, TransactionType,
    TransferRequest, WalletBalance,
};
use custody_audit::{AuditJournal, AuditReader};
use custody_bus::{spawn_subscriber, BusError, CustodyEvent, NotificationSubscriber};
use custody_core::{Amount, GuardianId, TransactionId, WalletId};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Register a new outgoing payment
pub fn create(
    ctx: &AppContext,
    amount: Decimal,
    destination: &str,
    wallet: &str,
) -> Result<TransactionId, anyhow::Error> {
    create_transfer(ctx, amount, destination, wallet, "payment", None)
}

/// Register a new outgoing transfer of the given type
pub fn create_transfer(
    ctx: &AppContext,
    amount: Decimal,
    destination: &str,
    wallet: &str,
    tx_type: &str,
    memo: Option<&str>,
) -> Result<TransactionId, anyhow::Error> {
    let tx_type = tx_type
        .parse::<TransactionType>()
        .map_err(|_| anyhow::anyhow!("Unknown transaction type: {}", tx_type))?;
    let mut request = TransferRequest::new(Amount::new(amount)?, destination, WalletId::new(wallet)?)
        .with_type(tx_type);
    if let Some(memo) = memo {
        request = request.with_memo(memo);
    }

    let tx = ctx.engine.create_transfer(&request)?;

    println!("✅ Created {} {}", tx.tx_type, tx.id);
    println!("   Amount:  {} from {} ({})", tx.amount, tx.source_wallet, tx.wallet_class);
    println!("   To:      {}", tx.destination);
    if let Some(memo) = &tx.memo {
        println!("   Memo:    {}", memo);
    }
    println!("   Scheme:  {}", tx.scheme.label());
    println!("   State:   {}", tx.state);
    println!("   Expires: {}", tx.expires_at.to_rfc3339());
    Ok(tx.id)
}

/// Issue a challenge for guardians to answer
pub fn challenge(ctx: &AppContext, tx: &str) -> Result<IssuedChallenge, anyhow::Error> {
    let id = TransactionId::new(tx)?;
    let issued = ctx.engine.issue_challenge(&id)?;

    println!("🔐 Challenge {} for {}", issued.display_code, issued.transaction_id);
    println!("   Context: {}", issued.challenge);
    println!("   Expires: {}", issued.expires_at.to_rfc3339());
    Ok(issued)
}

/// Submit a guardian's authenticator code
pub fn approve(
    ctx: &AppContext,
    tx: &str,
    guardian: &str,
    code: &str,
) -> Result<ApprovalReceipt, anyhow::Error> {
    let id = TransactionId::new(tx)?;
    let guardian = GuardianId::new(guardian)?;
    let receipt = ctx.engine.submit_approval(&id, &guardian, code)?;

    match receipt.decision {
        ApprovalDecision::Recorded => println!(
            "✅ Approval from {} recorded ({}/{})",
            receipt.guardian_id, receipt.approvals, receipt.required
        ),
        ApprovalDecision::QuorumReached => println!(
            "🎉 Quorum reached for {} ({}/{}); ready to execute",
            receipt.transaction_id, receipt.approvals, receipt.required
        ),
        ApprovalDecision::QuorumAlreadyReached => println!(
            "ℹ️  Approval from {} recorded; quorum was already reached",
            receipt.guardian_id
        ),
    }
    Ok(receipt)
}

/// Hand a ready transaction to the signer
pub async fn execute(ctx: &AppContext, tx: &str) -> Result<ExecutionReceipt, anyhow::Error> {
    let id = TransactionId::new(tx)?;
    let receipt = ctx.engine.execute(&id).await?;

    println!("✅ Executed {}", receipt.transaction_id);
    println!("   Path:    {}", receipt.derivation_path);
    println!("   Tx hash: {}", receipt.tx_hash);
    Ok(receipt)
}

/// Show the state of one transaction
pub fn status(ctx: &AppContext, tx: &str) -> Result<(), anyhow::Error> {
    let id = TransactionId::new(tx)?;
    let status = ctx.engine.get_status(&id)?;

    println!("📋 Transaction {}", status.transaction_id);
    println!("   State:     {}", status.state);
    println!(
        "   Approvals: {}/{} (of {} guardians{})",
        status.approvals_count,
        status.required,
        status.total,
        if status.challenge_mandatory {
            ", challenge required"
        } else {
            ""
        }
    );
    if !status.approvers.is_empty() {
        let approvers: Vec<&str> = status.approvers.iter().map(|g| g.as_str()).collect();
        println!("   Approvers: {}", approvers.join(", "));
    }
    if let Some(code) = &status.active_challenge {
        println!("   Challenge: {}", code);
    }
    println!("   Expires:   {}", status.expires_at.to_rfc3339());

    if let Some(allocation) = ctx.engine.allocation(&id)? {
        println!(
            "   Index:     {} #{}{}",
            allocation.wallet_id,
            allocation.index,
            if allocation.consumed { " (consumed)" } else { "" }
        );
    }
    Ok(())
}

/// List transactions, newest first
pub fn list(ctx: &AppContext, state: Option<&str>) -> Result<(), anyhow::Error> {
    let state = state
        .map(|s| s.parse::<TransactionState>())
        .transpose()
        .map_err(|_| anyhow::anyhow!("Unknown state: {}", state.unwrap_or_default()))?;
    let transactions = ctx.engine.list_transactions(state)?;

    if transactions.is_empty() {
        println!("No transactions");
        return Ok(());
    }

    println!(
        "{:<38} {:>14} {:<6} {:<20} {}",
        "ID", "AMOUNT", "WALLET", "STATE", "CREATED"
    );
    for tx in transactions {
        println!(
            "{:<38} {:>14} {:<6} {:<20} {}",
            tx.id.as_str(),
            tx.amount.to_string(),
            tx.source_wallet.as_str(),
            tx.state.to_string(),
            tx.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Run one expiry pass
pub fn sweep(ctx: &AppContext) -> Result<SweepReport, anyhow::Error> {
    let report = ctx.engine.sweep_expired()?;

    println!(
        "🧹 Expired {} transaction(s), pruned {} challenge(s)",
        report.expired.len(),
        report.challenges_pruned
    );
    for id in &report.expired {
        println!("   {}", id);
    }
    Ok(report)
}

/// Halt all mutating operations
pub fn emergency(ctx: &AppContext, guardian: &str) -> Result<(), anyhow::Error> {
    let guardian = GuardianId::new(guardian)?;
    ctx.engine.emergency_shutdown(&guardian)?;

    println!("🚨 Emergency mode ACTIVE (by {})", guardian);
    Ok(())
}

pub fn lift(ctx: &AppContext, guardian: &str) -> Result<(), anyhow::Error> {
    let guardian = GuardianId::new(guardian)?;
    ctx.engine.lift_emergency(&guardian)?;

    println!("✅ Emergency mode lifted (by {})", guardian);
    Ok(())
}

/// Print the code a guardian's authenticator would show now
pub fn code(ctx: &AppContext, guardian: &str, tx: Option<&str>) -> Result<String, anyhow::Error> {
    let guardian = GuardianId::new(guardian)?;
    let tx = tx.map(TransactionId::new).transpose()?;
    let code = ctx.engine.authenticator_code(&guardian, tx.as_ref())?;

    match &tx {
        Some(id) => println!("🔑 {} code for {}: {}", guardian, id, code),
        None => println!("🔑 {} fallback code: {}", guardian, code),
    }
    Ok(code)
}

pub fn stats(ctx: &AppContext) -> Result<TransactionStats, anyhow::Error> {
    let stats = ctx.engine.stats()?;

    println!("📊 Transactions: {}", stats.total());
    println!("   created:            {}", stats.created);
    println!("   awaiting_challenge: {}", stats.awaiting_challenge);
    println!("   awaiting_approvals: {}", stats.awaiting_approvals);
    println!("   ready:              {}", stats.ready);
    println!("   executing:          {}", stats.executing);
    println!("   succeeded:          {}", stats.succeeded);
    println!("   failed:             {}", stats.failed);
    println!("   expired:            {}", stats.expired);
    println!(
        "   emergency mode:     {}",
        if ctx.engine.is_emergency_active()? { "ACTIVE" } else { "off" }
    );
    Ok(stats)
}

/// Credit funds to a source wallet
pub fn deposit(ctx: &AppContext, wallet: &str, amount: Decimal) -> Result<WalletBalance, anyhow::Error> {
    let wallet = WalletId::new(wallet)?;
    let balance = ctx.engine.deposit(&wallet, Amount::new(amount)?)?;

    println!(
        "💰 Credited {} to {}; balance {} ({} available)",
        amount,
        balance.wallet_id,
        balance.balance,
        balance.available()
    );
    Ok(balance)
}

/// Balance, reservations and availability per wallet
pub fn balances(ctx: &AppContext) -> Result<Vec<WalletBalance>, anyhow::Error> {
    let balances = ctx.engine.wallet_balances()?;

    println!("{:<8} {:>20} {:>20} {:>20}", "WALLET", "BALANCE", "RESERVED", "AVAILABLE");
    for b in &balances {
        println!(
            "{:<8} {:>20} {:>20} {:>20}",
            b.wallet_id.as_str(),
            b.balance.to_string(),
            b.reserved.to_string(),
            b.available().to_string()
        );
    }
    Ok(balances)
}

/// Guardian roster with approval history
pub fn guardians(ctx: &AppContext) -> Result<Vec<GuardianStats>, anyhow::Error> {
    let stats = ctx.engine.guardian_stats()?;

    println!("{:<10} {:<12} {:<8} {:>9} {}", "GUARDIAN", "ROLE", "ACTIVE", "APPROVALS", "LAST");
    for g in &stats {
        println!(
            "{:<10} {:<12} {:<8} {:>9} {}",
            g.guardian_id.as_str(),
            g.role,
            if g.active { "yes" } else { "no" },
            g.approval_count,
            g.last_approval
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(stats)
}

/// Verify the audit hash chain
pub fn audit_verify(ctx: &AppContext) -> Result<usize, anyhow::Error> {
    match ctx.engine.verify_audit_chain() {
        Ok(count) => {
            println!("✅ Audit chain verified ({} records)", count);
            Ok(count)
        }
        Err(e) => {
            println!("❌ Audit chain broken: {}", e);
            Err(e.into())
        }
    }
}

/// Append audit records not yet in the journal directory.
///
/// Returns how many records were written.
pub fn audit_export(ctx: &AppContext, dir: &Path) -> Result<usize, anyhow::Error> {
    let exported = AuditReader::from_directory(dir)?.last_sequence()?.unwrap_or(0);
    let records = ctx.engine.audit_trail(None)?;

    let mut journal = AuditJournal::new(dir)?;
    let written = journal.append_all(records.iter().filter(|r| r.sequence > exported))?;
    journal.close()?;

    println!(
        "✅ Exported {} new audit record(s) to {}",
        written,
        dir.display()
    );
    Ok(written)
}

/// Logs every engine event; stands in for a messaging integration
struct LogSubscriber;

#[async_trait]
impl NotificationSubscriber for LogSubscriber {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, event: &CustodyEvent) -> Result<(), BusError> {
        let json = serde_json::to_string(event).map_err(|e| BusError::SubscriberFailed {
            name: self.name().to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(event = event.name(), payload = %json, "notification");
        Ok(())
    }
}

/// Run the expiry sweep until Ctrl-C
pub async fn serve(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = ctx.engine.config().sweep_interval();

    let subscriber = spawn_subscriber(ctx.notifier.subscribe(), Arc::new(LogSubscriber));
    let sweeper = tokio::spawn(run_expiry_sweep(
        Arc::clone(&ctx.engine),
        interval,
        shutdown_rx,
    ));

    println!(
        "🛡️  Custody engine running (sweep every {}s); Ctrl-C to stop",
        interval.as_secs()
    );
    tokio::signal::ctrl_c().await?;

    println!("⏹️  Shutting down...");
    let _ = shutdown_tx.send(true);
    let report = sweeper.await?;
    subscriber.abort();

    println!("✅ Stopped; expired {} transaction(s)", report.expired.len());
    Ok(())
}
