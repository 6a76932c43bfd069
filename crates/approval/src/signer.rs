//! Remote signer boundary
//!
//! The engine never holds private keys for custody wallets. Once a
//! transaction is `Ready` and has an ephemeral index, the signer receives the
//! derivation path and the payload, signs, submits, and returns a transaction
//! hash.

use crate::model::DerivationPath;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Invalid signer key: {0}")]
    InvalidKey(String),

    #[error("Signing rejected: {0}")]
    Rejected(String),

    #[error("Signer unavailable: {0}")]
    Unavailable(String),

    #[error("Signer timed out after {0} ms")]
    Timeout(u64),
}

/// Signs and submits a transfer under a derived key
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Returns the chain transaction hash
    async fn sign_and_submit(
        &self,
        path: &DerivationPath,
        payload: &[u8],
    ) -> Result<String, SignerError>;
}

/// In-process Ed25519 signer for development and tests.
///
/// Child keys are `SHA256(seed || path)`; the returned hash is the SHA256 of
/// the signature.
pub struct LocalSigner {
    seed: [u8; 32],
}

impl LocalSigner {
    /// Create from a 32-byte seed (hex-encoded in env var)
    pub fn from_hex(hex_seed: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(hex_seed.trim())
            .map_err(|e| SignerError::InvalidKey(format!("Invalid key hex: {}", e)))?;

        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::InvalidKey("Key must be 32 bytes".to_string()))?;

        Ok(Self { seed })
    }

    /// Generate a new random root seed
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            seed: SigningKey::generate(&mut rng).to_bytes(),
        }
    }

    /// Export the seed as hex (for storage)
    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed)
    }

    fn child_key(&self, path: &DerivationPath) -> SigningKey {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(path.to_string().as_bytes());
        let child: [u8; 32] = hasher.finalize().into();
        SigningKey::from_bytes(&child)
    }

    /// Public key (hex) of the child key at `path`
    pub fn public_key_hex(&self, path: &DerivationPath) -> String {
        hex::encode(self.child_key(path).verifying_key().to_bytes())
    }

    pub fn sign(&self, path: &DerivationPath, payload: &[u8]) -> Signature {
        self.child_key(path).sign(payload)
    }

    /// Check a signature against the child key at `path`
    pub fn verify(&self, path: &DerivationPath, payload: &[u8], signature: &Signature) -> bool {
        let key: VerifyingKey = self.child_key(path).verifying_key();
        key.verify(payload, signature).is_ok()
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocalSigner(**redacted**)")
    }
}

#[async_trait]
impl RemoteSigner for LocalSigner {
    async fn sign_and_submit(
        &self,
        path: &DerivationPath,
        payload: &[u8],
    ) -> Result<String, SignerError> {
        let signature = self.sign(path, payload);
        tracing::debug!(path = %path, "Signed payload locally");
        Ok(hex::encode(Sha256::digest(signature.to_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(index: u32) -> DerivationPath {
        DerivationPath {
            root: "m/44'/148'/0'".to_string(),
            index,
        }
    }

    #[test]
    fn test_seed_roundtrip() {
        let signer = LocalSigner::generate();
        let again = LocalSigner::from_hex(&signer.seed_hex()).unwrap();
        assert_eq!(signer.public_key_hex(&path(0)), again.public_key_hex(&path(0)));
    }

    #[test]
    fn test_child_keys_differ_per_index() {
        let signer = LocalSigner::generate();
        assert_ne!(signer.public_key_hex(&path(0)), signer.public_key_hex(&path(1)));
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = LocalSigner::generate();
        let sig = signer.sign(&path(3), b"transfer");
        assert!(signer.verify(&path(3), b"transfer", &sig));
        assert!(!signer.verify(&path(4), b"transfer", &sig));
        assert!(!signer.verify(&path(3), b"tampered", &sig));
    }

    #[test]
    fn test_invalid_seed() {
        assert!(matches!(LocalSigner::from_hex("zz"), Err(SignerError::InvalidKey(_))));
        assert!(matches!(LocalSigner::from_hex("abcd"), Err(SignerError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_sign_and_submit_returns_hash() {
        let signer = LocalSigner::generate();
        let hash = signer.sign_and_submit(&path(1), b"payload").await.unwrap();
        assert_eq!(hash.len(), 64);
        // Ed25519 is deterministic
        assert_eq!(hash, signer.sign_and_submit(&path(1), b"payload").await.unwrap());
    }
}
