//! TOTP parameters

use crate::error::OtpError;
use serde::{Deserialize, Serialize};

/// Parameters shared by every guardian authenticator.
///
/// Defaults follow RFC 6238 as deployed by common authenticator apps:
/// 30 second step, 6 digits, one step of clock drift either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpConfig {
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,

    #[serde(default = "default_digits")]
    pub digits: u32,

    /// Accepted drift in whole steps on each side of the current step
    #[serde(default = "default_skew_steps")]
    pub skew_steps: u64,
}

fn default_step_secs() -> u64 {
    30
}

fn default_digits() -> u32 {
    6
}

fn default_skew_steps() -> u64 {
    1
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            step_secs: default_step_secs(),
            digits: default_digits(),
            skew_steps: default_skew_steps(),
        }
    }
}

impl TotpConfig {
    /// Reject parameters no authenticator app would accept
    pub fn validate(&self) -> Result<(), OtpError> {
        if self.step_secs == 0 {
            return Err(OtpError::ZeroStep);
        }
        if !(6..=8).contains(&self.digits) {
            return Err(OtpError::UnsupportedDigits(self.digits));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TotpConfig::default();
        assert_eq!(config.step_secs, 30);
        assert_eq!(config.digits, 6);
        assert_eq!(config.skew_steps, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TotpConfig = serde_json::from_str(r#"{ "digits": 8 }"#).unwrap();
        assert_eq!(config.digits, 8);
        assert_eq!(config.step_secs, 30);
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let zero_step = TotpConfig {
            step_secs: 0,
            ..TotpConfig::default()
        };
        assert_eq!(zero_step.validate(), Err(OtpError::ZeroStep));

        let short = TotpConfig {
            digits: 4,
            ..TotpConfig::default()
        };
        assert_eq!(short.validate(), Err(OtpError::UnsupportedDigits(4)));
    }
}
