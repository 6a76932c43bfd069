//! Engine configuration
//!
//! Every field has a default so a config file only needs what it changes.

use crate::error::EngineError;
use custody_core::{WalletClass, WalletId};
use custody_otp::TotpConfig;
use custody_policy::PolicyConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest challenge lifetime or approval window accepted (one week)
pub const MAX_WINDOW_SECS: u64 = 604_800;

/// Longest sweep interval accepted (one day)
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 86_400;

/// Configuration for the `CustodyEngine`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Lifetime of one challenge; never extends past the approval window
    #[serde(default = "default_challenge_ttl_secs")]
    pub challenge_ttl_secs: u64,

    /// Time a transaction has, from creation, to reach quorum and execute
    #[serde(default = "default_approval_window_secs")]
    pub approval_window_secs: u64,

    #[serde(default)]
    pub totp: TotpConfig,

    /// Upper bound on one remote signer call
    #[serde(default = "default_signer_timeout_ms")]
    pub signer_timeout_ms: u64,

    /// How often the background sweep expires stale transactions
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Source wallets the engine may spend from
    #[serde(default = "default_wallets")]
    pub wallets: Vec<WalletConfig>,
}

/// One source wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    pub id: WalletId,
    pub class: WalletClass,
    /// Hardened prefix; the ephemeral index is appended to it
    pub derivation_root: String,
}

fn default_challenge_ttl_secs() -> u64 {
    300
}

fn default_approval_window_secs() -> u64 {
    300
}

fn default_signer_timeout_ms() -> u64 {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_wallets() -> Vec<WalletConfig> {
    vec![
        WalletConfig {
            id: WalletId::new("HOT").expect("valid wallet id"),
            class: WalletClass::Hot,
            derivation_root: "m/44'/148'/0'".to_string(),
        },
        WalletConfig {
            id: WalletId::new("COLD").expect("valid wallet id"),
            class: WalletClass::Cold,
            derivation_root: "m/44'/148'/1'".to_string(),
        },
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            challenge_ttl_secs: default_challenge_ttl_secs(),
            approval_window_secs: default_approval_window_secs(),
            totp: TotpConfig::default(),
            signer_timeout_ms: default_signer_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            wallets: default_wallets(),
        }
    }
}

impl EngineConfig {
    pub fn challenge_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.challenge_ttl_secs.min(MAX_WINDOW_SECS) as i64)
    }

    pub fn approval_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.approval_window_secs.min(MAX_WINDOW_SECS) as i64)
    }

    pub fn signer_timeout(&self) -> Duration {
        Duration::from_millis(self.signer_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn wallet(&self, id: &WalletId) -> Option<&WalletConfig> {
        self.wallets.iter().find(|w| &w.id == id)
    }

    /// Reject configs the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        self.policy
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        self.totp
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        for (name, secs) in [
            ("challenge_ttl_secs", self.challenge_ttl_secs),
            ("approval_window_secs", self.approval_window_secs),
        ] {
            if secs == 0 || secs > MAX_WINDOW_SECS {
                return Err(EngineError::Config(format!(
                    "{} must be between 1 and {}",
                    name, MAX_WINDOW_SECS
                )));
            }
        }
        if self.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(EngineError::Config(format!(
                "sweep_interval_secs must be at most {}",
                MAX_SWEEP_INTERVAL_SECS
            )));
        }
        if self.wallets.is_empty() {
            return Err(EngineError::Config("at least one wallet is required".to_string()));
        }
        for (i, wallet) in self.wallets.iter().enumerate() {
            if wallet.derivation_root.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "wallet {} has an empty derivation_root",
                    wallet.id
                )));
            }
            if self.wallets[..i].iter().any(|w| w.id == wallet.id) {
                return Err(EngineError::Config(format!("duplicate wallet id {}", wallet.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.challenge_ttl_secs, 300);
        assert_eq!(config.approval_window(), chrono::Duration::minutes(5));
        assert_eq!(config.signer_timeout(), Duration::from_secs(10));
        assert_eq!(config.wallets.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "challenge_ttl_secs": 60, "policy": { "total_approvers": 5 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.challenge_ttl_secs, 60);
        assert_eq!(config.policy.total_approvers, 5);
        assert_eq!(config.totp.digits, 6);
        assert!(config.wallet(&WalletId::new("cold").unwrap()).unwrap().class.is_cold());
    }

    #[test]
    fn test_duplicate_wallet_rejected() {
        let mut config = EngineConfig::default();
        config.wallets.push(config.wallets[0].clone());
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = EngineConfig {
            challenge_ttl_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let config = EngineConfig {
            challenge_ttl_secs: u64::MAX,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        // the accessor clamps instead of overflowing
        assert_eq!(config.challenge_ttl(), chrono::Duration::seconds(MAX_WINDOW_SECS as i64));

        let config = EngineConfig {
            approval_window_secs: MAX_WINDOW_SECS + 1,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            sweep_interval_secs: u64::MAX,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            challenge_ttl_secs: MAX_WINDOW_SECS,
            approval_window_secs: MAX_WINDOW_SECS,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
