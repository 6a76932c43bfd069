//! Code verification

use crate::config::TotpConfig;
use crate::secret::GuardianSecret;
use crate::totp::{format_code, hotp, time_step};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use strum_macros::{Display, EnumString};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Which path a submitted code matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Code derived from the secret mixed with one transaction's challenge
    ChallengeDerived,
    /// Plain TOTP over the enrolled secret
    Fallback,
}

/// Verification result. Never carries secret material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid(VerificationMethod),
    Invalid,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    pub fn method(&self) -> Option<VerificationMethod> {
        match self {
            Verification::Valid(method) => Some(*method),
            Verification::Invalid => None,
        }
    }
}

/// Key for the challenge-response path: HMAC-SHA256(enrolled secret, challenge string)
pub fn derive_context_secret(secret: &GuardianSecret, challenge_string: &str) -> GuardianSecret {
    let mut mac =
        HmacSha256::new_from_slice(secret.expose()).expect("HMAC accepts keys of any length");
    mac.update(challenge_string.as_bytes());
    GuardianSecret::from_derived(mac.finalize().into_bytes().to_vec())
}

/// Stateless code verifier
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    config: TotpConfig,
}

impl Verifier {
    pub fn new(config: TotpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TotpConfig {
        &self.config
    }

    /// Check a submitted code.
    ///
    /// With a challenge string the challenge-derived path is tried first, then
    /// the fallback path. Without one only the fallback path exists.
    pub fn verify(
        &self,
        secret: &GuardianSecret,
        challenge_string: Option<&str>,
        submitted_code: &str,
        now: DateTime<Utc>,
    ) -> Verification {
        let submitted = submitted_code.trim();
        if submitted.len() != self.config.digits as usize
            || !submitted.bytes().all(|b| b.is_ascii_digit())
        {
            return Verification::Invalid;
        }

        if let Some(challenge) = challenge_string {
            let derived = derive_context_secret(secret, challenge);
            if self.matches_window(derived.expose(), submitted, now) {
                return Verification::Valid(VerificationMethod::ChallengeDerived);
            }
        }

        if self.matches_window(secret.expose(), submitted, now) {
            return Verification::Valid(VerificationMethod::Fallback);
        }

        Verification::Invalid
    }

    /// Code a guardian's authenticator would show right now
    pub fn current_code(
        &self,
        secret: &GuardianSecret,
        challenge_string: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        let counter = time_step(now.timestamp(), self.config.step_secs);
        match challenge_string {
            Some(challenge) => {
                let derived = derive_context_secret(secret, challenge);
                format_code(hotp(derived.expose(), counter, self.config.digits), self.config.digits)
            }
            None => format_code(hotp(secret.expose(), counter, self.config.digits), self.config.digits),
        }
    }

    fn matches_window(&self, key: &[u8], submitted: &str, now: DateTime<Utc>) -> bool {
        let current = time_step(now.timestamp(), self.config.step_secs);
        let first = current.saturating_sub(self.config.skew_steps);
        let last = current.saturating_add(self.config.skew_steps);

        // Every step in the window is checked so timing does not reveal which matched
        let mut matched = false;
        for counter in first..=last {
            let expected = format_code(hotp(key, counter, self.config.digits), self.config.digits);
            matched |= bool::from(expected.as_bytes().ct_eq(submitted.as_bytes()));
        }
        matched
    }
}
