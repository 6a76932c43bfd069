//! Guardian roster and enrolled secrets

use crate::error::EngineError;
use custody_core::GuardianId;
use custody_otp::GuardianSecret;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;

/// A designated approver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardian {
    pub id: GuardianId,
    /// Free-form title, e.g. `CEO`, `CFO`, `CTO`
    pub role: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Guardian {
    pub fn new(id: GuardianId, role: impl Into<String>) -> Self {
        Self {
            id,
            role: role.into(),
            active: true,
        }
    }
}

/// The fixed guardian pool
#[derive(Debug, Clone, Default)]
pub struct GuardianRegistry {
    guardians: BTreeMap<GuardianId, Guardian>,
}

impl GuardianRegistry {
    pub fn new(guardians: Vec<Guardian>) -> Result<Self, EngineError> {
        let mut map = BTreeMap::new();
        for guardian in guardians {
            let id = guardian.id.clone();
            if map.insert(id.clone(), guardian).is_some() {
                return Err(EngineError::Config(format!("duplicate guardian {}", id)));
            }
        }
        Ok(Self { guardians: map })
    }

    pub fn get(&self, id: &GuardianId) -> Option<&Guardian> {
        self.guardians.get(id)
    }

    /// Resolve a guardian allowed to approve
    pub fn require_active(&self, id: &GuardianId) -> Result<&Guardian, EngineError> {
        match self.guardians.get(id) {
            None => Err(EngineError::UnknownGuardian(id.clone())),
            Some(g) if !g.active => Err(EngineError::InactiveGuardian(id.clone())),
            Some(g) => Ok(g),
        }
    }

    pub fn len(&self) -> usize {
        self.guardians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guardians.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.guardians.values().filter(|g| g.active).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Guardian> {
        self.guardians.values()
    }
}

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("Guardian not enrolled: {0}")]
    NotEnrolled(GuardianId),

    #[error("Secret store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to enrolled guardian secrets
pub trait SecretStore: Send + Sync {
    fn enrolled_secret(&self, guardian: &GuardianId) -> Result<GuardianSecret, SecretStoreError>;
}

/// Secrets held in process memory
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<GuardianId, GuardianSecret>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll (or replace) a guardian's secret
    pub fn enroll(&self, guardian: GuardianId, secret: GuardianSecret) {
        let mut secrets = self.secrets.write().unwrap_or_else(|e| e.into_inner());
        secrets.insert(guardian, secret);
    }
}

impl SecretStore for InMemorySecretStore {
    fn enrolled_secret(&self, guardian: &GuardianId) -> Result<GuardianSecret, SecretStoreError> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| SecretStoreError::Unavailable("lock poisoned".to_string()))?;
        secrets
            .get(guardian)
            .cloned()
            .ok_or_else(|| SecretStoreError::NotEnrolled(guardian.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(s: &str) -> GuardianId {
        GuardianId::new(s).unwrap()
    }

    #[test]
    fn test_registry_lookup() {
        let mut cto = Guardian::new(gid("cto"), "CTO");
        cto.active = false;
        let registry =
            GuardianRegistry::new(vec![Guardian::new(gid("ceo"), "CEO"), cto]).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_count(), 1);
        assert!(registry.require_active(&gid("CEO")).is_ok());
        assert!(matches!(
            registry.require_active(&gid("CTO")),
            Err(EngineError::InactiveGuardian(_))
        ));
        assert!(matches!(
            registry.require_active(&gid("COO")),
            Err(EngineError::UnknownGuardian(_))
        ));
    }

    #[test]
    fn test_duplicate_guardian_rejected() {
        let result = GuardianRegistry::new(vec![
            Guardian::new(gid("ceo"), "CEO"),
            Guardian::new(gid("CEO"), "Chief"),
        ]);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_secret_store() {
        let store = InMemorySecretStore::new();
        store.enroll(gid("ceo"), GuardianSecret::generate());
        assert!(store.enrolled_secret(&gid("CEO")).is_ok());
        assert!(matches!(
            store.enrolled_secret(&gid("CFO")),
            Err(SecretStoreError::NotEnrolled(_))
        ));
    }
}
