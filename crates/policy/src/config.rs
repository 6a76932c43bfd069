//! Policy configuration with configurable cutoffs
//!
//! Cutoffs and limits come from the service config file; the defaults below
//! apply to any field the file leaves out.

use crate::error::PolicyError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Amounts at or above this need every guardian
    #[serde(default = "default_high_value_cutoff")]
    pub high_value_cutoff: Decimal,

    /// Amounts at or above this need a majority with a fresh challenge
    #[serde(default = "default_medium_value_cutoff")]
    pub medium_value_cutoff: Decimal,

    /// Size of the guardian pool
    #[serde(default = "default_total_approvers")]
    pub total_approvers: u8,

    /// Max total created per source wallet per UTC day
    #[serde(default = "default_daily_limit")]
    pub daily_limit: Decimal,

    /// Max total created per source wallet per UTC month
    #[serde(default = "default_monthly_limit")]
    pub monthly_limit: Decimal,
}

fn default_high_value_cutoff() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_medium_value_cutoff() -> Decimal {
    Decimal::new(1_000, 0)
}

fn default_total_approvers() -> u8 {
    3
}

fn default_daily_limit() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_monthly_limit() -> Decimal {
    Decimal::new(1_000_000, 0)
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            high_value_cutoff: default_high_value_cutoff(),
            medium_value_cutoff: default_medium_value_cutoff(),
            total_approvers: default_total_approvers(),
            daily_limit: default_daily_limit(),
            monthly_limit: default_monthly_limit(),
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.total_approvers == 0 {
            return Err(PolicyError::InvalidConfig(
                "total_approvers must be at least 1".to_string(),
            ));
        }
        if self.medium_value_cutoff > self.high_value_cutoff {
            return Err(PolicyError::InvalidConfig(format!(
                "medium_value_cutoff {} above high_value_cutoff {}",
                self.medium_value_cutoff, self.high_value_cutoff
            )));
        }
        if self.medium_value_cutoff < Decimal::ZERO || self.daily_limit < Decimal::ZERO {
            return Err(PolicyError::InvalidConfig("negative cutoff or limit".to_string()));
        }
        if self.daily_limit > self.monthly_limit {
            return Err(PolicyError::InvalidConfig(format!(
                "daily_limit {} above monthly_limit {}",
                self.daily_limit, self.monthly_limit
            )));
        }
        Ok(())
    }

    /// Simple majority of the pool (2 of 3)
    pub fn majority(&self) -> u8 {
        self.total_approvers / 2 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = PolicyConfig::default();
        assert_eq!(config.high_value_cutoff, dec!(10000));
        assert_eq!(config.medium_value_cutoff, dec!(1000));
        assert_eq!(config.total_approvers, 3);
        assert_eq!(config.majority(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{ "high_value_cutoff": "25000" }"#;
        let config: PolicyConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.high_value_cutoff, dec!(25000));
        assert_eq!(config.medium_value_cutoff, dec!(1000)); // default
    }

    #[test]
    fn test_validate_rejects_inverted_cutoffs() {
        let config = PolicyConfig {
            medium_value_cutoff: dec!(20000),
            ..PolicyConfig::default()
        };
        assert!(matches!(config.validate(), Err(PolicyError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let config = PolicyConfig {
            total_approvers: 0,
            ..PolicyConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
