//! Enrolled guardian secrets

use crate::error::OtpError;
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

const MIN_SECRET_LEN: usize = 16;

/// Shared secret enrolled in a guardian's authenticator.
///
/// The bytes are wiped on drop and never printed.
#[derive(Clone)]
pub struct GuardianSecret(Zeroizing<Vec<u8>>);

impl GuardianSecret {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, OtpError> {
        if bytes.len() < MIN_SECRET_LEN {
            return Err(OtpError::SecretTooShort(bytes.len()));
        }
        Ok(Self(Zeroizing::new(bytes)))
    }

    /// Parse a hex-encoded secret (as stored in guardian config)
    pub fn from_hex(hex_secret: &str) -> Result<Self, OtpError> {
        let bytes = hex::decode(hex_secret.trim())
            .map_err(|e| OtpError::InvalidSecretHex(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Generate a random 20-byte secret (RFC 4226 recommended length)
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(Zeroizing::new(bytes))
    }

    /// Derived keys are full hash outputs, so the length check is skipped
    pub(crate) fn from_derived(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Hex export for enrollment; callers must not log the result
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_slice())
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for GuardianSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GuardianSecret(**redacted**)")
    }
}
