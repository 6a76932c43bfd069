//! Custody OTP - one-time codes bound to transactions
//!
//! Two ways for a guardian to prove presence:
//! - **challenge-derived**: the enrolled secret is keyed-hashed with the full
//!   challenge string of one transaction, and the TOTP is computed over that
//!   derived key. A code is only meaningful for that one challenge.
//! - **fallback**: plain RFC 6238 TOTP over the enrolled secret.
//!
//! Everything here is a pure function of its inputs. One-time use of a
//! challenge is enforced by the challenge store, not by this crate.

pub mod challenge;
pub mod config;
pub mod error;
pub mod secret;
pub mod totp;
pub mod verify;

pub use challenge::{generate_challenge, ChallengeContext, ChallengeMaterial, DISPLAY_CODE_LEN};
pub use config::TotpConfig;
pub use error::OtpError;
pub use secret::GuardianSecret;
pub use totp::{hotp, totp_at};
pub use verify::{derive_context_secret, Verification, VerificationMethod, Verifier};
