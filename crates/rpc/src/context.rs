//! Application context - wires everything together

use anyhow::Context;
use custody_approval::{
    CustodyEngine, CustodyStore, EngineBuilder, EngineConfig, Guardian, InMemorySecretStore,
    LocalSigner, RemoteSigner,
};
use custody_bus::BroadcastNotifier;
use custody_core::GuardianId;
use custody_otp::GuardianSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hex seed for the development signer
pub const SIGNER_KEY_ENV: &str = "CUSTODY_SIGNER_KEY";

const CONFIG_FILE: &str = "custody.json";
const DATABASE_FILE: &str = "custody.db";
const NOTIFY_CAPACITY: usize = 256;

/// Service configuration: engine settings plus the guardian roster
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub guardians: Vec<GuardianConfig>,
}

/// One guardian and the secret enrolled in their authenticator
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianConfig {
    pub id: GuardianId,
    #[serde(default)]
    pub role: String,
    pub secret_hex: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl fmt::Debug for GuardianConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardianConfig")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("secret_hex", &"**redacted**")
            .field("active", &self.active)
            .finish()
    }
}

impl fmt::Debug for CustodyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodyConfig")
            .field("engine", &self.engine)
            .field("guardians", &self.guardians)
            .finish()
    }
}

impl CustodyConfig {
    /// Default engine settings with a freshly enrolled CEO/CFO/CTO roster
    pub fn generate() -> Self {
        let guardians = ["CEO", "CFO", "CTO"]
            .iter()
            .map(|role| GuardianConfig {
                id: GuardianId::new(role).expect("valid guardian id"),
                role: role.to_string(),
                secret_hex: GuardianSecret::generate().to_hex(),
                active: true,
            })
            .collect();
        Self {
            engine: EngineConfig::default(),
            guardians,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)
            .with_context(|| format!("writing config {}", path.as_ref().display()))
    }

    pub fn roster(&self) -> Vec<Guardian> {
        self.guardians
            .iter()
            .map(|g| Guardian {
                id: g.id.clone(),
                role: g.role.clone(),
                active: g.active,
            })
            .collect()
    }

    pub fn secret_store(&self) -> anyhow::Result<InMemorySecretStore> {
        let store = InMemorySecretStore::new();
        for guardian in &self.guardians {
            let secret = GuardianSecret::from_hex(&guardian.secret_hex)
                .with_context(|| format!("secret for guardian {}", guardian.id))?;
            store.enroll(guardian.id.clone(), secret);
        }
        Ok(store)
    }
}

/// Application context - wires together all components
pub struct AppContext {
    pub engine: Arc<CustodyEngine>,
    pub notifier: BroadcastNotifier,
    config: CustodyConfig,
    data_path: PathBuf,
}

impl AppContext {
    /// Create a new application context.
    ///
    /// Config comes from `config_path`, else `<data>/custody.json`; when
    /// neither exists a fresh roster is generated and saved there.
    pub fn new(data_path: impl AsRef<Path>, config_path: Option<&Path>) -> anyhow::Result<Self> {
        let data_path = data_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_path)?;

        let config = match config_path {
            Some(path) => CustodyConfig::from_file(path)?,
            None => {
                let default_path = data_path.join(CONFIG_FILE);
                if default_path.exists() {
                    CustodyConfig::from_file(&default_path)?
                } else {
                    let config = CustodyConfig::generate();
                    config.save(&default_path)?;
                    tracing::warn!(
                        path = %default_path.display(),
                        "No config found; generated a new guardian roster"
                    );
                    config
                }
            }
        };

        Self::with_config(data_path, config)
    }

    /// Build from an already loaded config
    pub fn with_config(data_path: impl AsRef<Path>, config: CustodyConfig) -> anyhow::Result<Self> {
        let data_path = data_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_path)?;

        let store = CustodyStore::new(data_path.join(DATABASE_FILE))?;
        let notifier = BroadcastNotifier::new(NOTIFY_CAPACITY);

        // Development signer from env var, like a system key
        let signer: Arc<dyn RemoteSigner> = match std::env::var(SIGNER_KEY_ENV) {
            Ok(key) => Arc::new(
                LocalSigner::from_hex(&key).with_context(|| format!("invalid {}", SIGNER_KEY_ENV))?,
            ),
            Err(_) => {
                tracing::debug!("{} not set; using an ephemeral signer key", SIGNER_KEY_ENV);
                Arc::new(LocalSigner::generate())
            }
        };

        let engine = EngineBuilder::new(config.engine.clone())
            .with_store(store)
            .with_guardians(config.roster())
            .with_secrets(Arc::new(config.secret_store()?))
            .with_signer(signer)
            .with_notifier(Arc::new(notifier.clone()))
            .build()?;

        Ok(Self {
            engine: Arc::new(engine),
            notifier,
            config,
            data_path,
        })
    }

    pub fn config(&self) -> &CustodyConfig {
        &self.config
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_roundtrips_through_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custody.json");

        let config = CustodyConfig::generate();
        config.save(&path).unwrap();
        let loaded = CustodyConfig::from_file(&path).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.roster().len(), 3);
        assert!(loaded.secret_store().is_ok());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let json = r#"{
            "guardians": [
                { "id": "ceo", "secret_hex": "3132333435363738393031323334353637383930" }
            ]
        }"#;
        let config: CustodyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine.challenge_ttl_secs, 300);
        assert_eq!(config.guardians[0].id.as_str(), "CEO");
        assert!(config.guardians[0].active);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = CustodyConfig::generate();
        let printed = format!("{:?}", config);
        assert!(!printed.contains(&config.guardians[0].secret_hex));
    }
}
