//! OTP errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtpError {
    #[error("Invalid secret hex: {0}")]
    InvalidSecretHex(String),

    #[error("Secret too short: {0} bytes (min 16)")]
    SecretTooShort(usize),

    #[error("Unsupported code length: {0} (must be 6..=8)")]
    UnsupportedDigits(u32),

    #[error("Time step must be positive")]
    ZeroStep,
}
