//! Transaction-bound challenge material

use chrono::{DateTime, Utc};
use custody_core::{Amount, TransactionId};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of the code shown to guardians
pub const DISPLAY_CODE_LEN: usize = 16;

const NONCE_LEN: usize = 16;

/// The transaction fields a challenge is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeContext {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub destination: String,
}

/// Output of challenge generation.
///
/// `challenge_string` is the full (unencoded) context that codes are derived
/// from; `display_code` is the short token shown to humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeMaterial {
    pub challenge_string: String,
    pub display_code: String,
}

impl ChallengeMaterial {
    /// Build material from an explicit nonce
    pub fn build(ctx: &ChallengeContext, issued_at: DateTime<Utc>, nonce: &[u8]) -> Self {
        let challenge_string = format!(
            "{}|{}|{}|{}|{}",
            ctx.transaction_id,
            ctx.amount,
            ctx.destination,
            issued_at.timestamp_millis(),
            hex::encode(nonce)
        );

        let digest = Sha256::digest(challenge_string.as_bytes());
        let display_code = hex::encode_upper(digest)[..DISPLAY_CODE_LEN].to_string();

        Self {
            challenge_string,
            display_code,
        }
    }
}

/// Generate fresh challenge material with a random nonce
pub fn generate_challenge(ctx: &ChallengeContext, issued_at: DateTime<Utc>) -> ChallengeMaterial {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    ChallengeMaterial::build(ctx, issued_at, &nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ctx() -> ChallengeContext {
        ChallengeContext {
            transaction_id: TransactionId::new("TX-000000000001").unwrap(),
            amount: Amount::new(dec!(5000)).unwrap(),
            destination: "GDEST".to_string(),
        }
    }

    #[test]
    fn test_display_code_shape() {
        let material = generate_challenge(&ctx(), Utc::now());
        assert_eq!(material.display_code.len(), DISPLAY_CODE_LEN);
        assert!(material
            .display_code
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_challenge_string_binds_transaction_fields() {
        let issued_at = Utc::now();
        let material = ChallengeMaterial::build(&ctx(), issued_at, &[7u8; 16]);
        assert!(material.challenge_string.starts_with("TX-000000000001|5000|GDEST|"));
        assert!(material
            .challenge_string
            .contains(&issued_at.timestamp_millis().to_string()));
    }

    #[test]
    fn test_build_is_deterministic_for_same_nonce() {
        let issued_at = Utc::now();
        let a = ChallengeMaterial::build(&ctx(), issued_at, &[1u8; 16]);
        let b = ChallengeMaterial::build(&ctx(), issued_at, &[1u8; 16]);
        let c = ChallengeMaterial::build(&ctx(), issued_at, &[2u8; 16]);
        assert_eq!(a, b);
        assert_ne!(a.display_code, c.display_code);
    }

    #[test]
    fn test_random_nonce_gives_distinct_challenges() {
        let issued_at = Utc::now();
        let a = generate_challenge(&ctx(), issued_at);
        let b = generate_challenge(&ctx(), issued_at);
        assert_ne!(a.challenge_string, b.challenge_string);
    }
}
