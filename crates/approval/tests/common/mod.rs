#![allow(dead_code)]

use chrono::Utc;
use custody_approval::{
    ApprovalReceipt, CustodyEngine, CustodyStore, EngineBuilder, EngineConfig, Guardian,
    InMemorySecretStore, LocalSigner, RemoteSigner, WalletConfig,
};
use custody_bus::BroadcastNotifier;
use custody_core::{Amount, GuardianId, ManualClock, TransactionId, WalletClass, WalletId};
use custody_otp::GuardianSecret;
use std::sync::Arc;

/// Credited to every configured wallet when a harness is built
pub const FUNDING: u64 = 10_000_000;

pub struct Harness {
    pub engine: Arc<CustodyEngine>,
    pub clock: ManualClock,
    pub notifier: BroadcastNotifier,
}

pub fn gid(s: &str) -> GuardianId {
    GuardianId::new(s).unwrap()
}

pub fn wallet(s: &str) -> WalletId {
    WalletId::new(s).unwrap()
}

pub fn roster() -> Vec<Guardian> {
    vec![
        Guardian::new(gid("CEO"), "CEO"),
        Guardian::new(gid("CFO"), "CFO"),
        Guardian::new(gid("CTO"), "CTO"),
    ]
}

/// Deterministic secrets so rebuilt engines share enrollment
pub fn secrets() -> Arc<InMemorySecretStore> {
    let store = Arc::new(InMemorySecretStore::new());
    for (i, guardian) in roster().into_iter().enumerate() {
        let secret = GuardianSecret::from_bytes(vec![i as u8 + 1; 20]).unwrap();
        store.enroll(guardian.id, secret);
    }
    store
}

/// Default config plus a second hot wallet
pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.wallets.push(WalletConfig {
        id: wallet("HOT2"),
        class: WalletClass::Hot,
        derivation_root: "m/44'/148'/2'".to_string(),
    });
    config
}

pub fn build(
    config: EngineConfig,
    store: CustodyStore,
    signer: Arc<dyn RemoteSigner>,
    clock: ManualClock,
) -> Harness {
    let notifier = BroadcastNotifier::new(64);
    let engine = EngineBuilder::new(config)
        .with_store(store)
        .with_guardians(roster())
        .with_secrets(secrets())
        .with_signer(signer)
        .with_notifier(Arc::new(notifier.clone()))
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    let wallets: Vec<WalletId> = engine.config().wallets.iter().map(|w| w.id.clone()).collect();
    for id in &wallets {
        engine.deposit(id, Amount::from_units(FUNDING)).unwrap();
    }
    Harness {
        engine: Arc::new(engine),
        clock,
        notifier,
    }
}

pub fn harness() -> Harness {
    build(
        config(),
        CustodyStore::in_memory().unwrap(),
        Arc::new(LocalSigner::generate()),
        ManualClock::new(Utc::now()),
    )
}

pub fn create(h: &Harness, units: u64, source: &str) -> TransactionId {
    h.engine
        .create_transaction(Amount::from_units(units), "GDESTINATION", &wallet(source))
        .unwrap()
        .id
}

/// Issue a fresh challenge and answer it as `guardian`
pub fn approve_with_challenge(h: &Harness, tx: &TransactionId, guardian: &str) -> ApprovalReceipt {
    h.engine.issue_challenge(tx).unwrap();
    let code = h.engine.authenticator_code(&gid(guardian), Some(tx)).unwrap();
    h.engine.submit_approval(tx, &gid(guardian), &code).unwrap()
}

pub fn approve_fallback(h: &Harness, tx: &TransactionId, guardian: &str) -> ApprovalReceipt {
    let code = h.engine.authenticator_code(&gid(guardian), None).unwrap();
    h.engine.submit_approval(tx, &gid(guardian), &code).unwrap()
}

/// Low-value transaction approved by two guardians
pub fn ready_transaction(h: &Harness, source: &str) -> TransactionId {
    let tx = create(h, 500, source);
    approve_fallback(h, &tx, "CEO");
    approve_fallback(h, &tx, "CFO");
    tx
}
