//! Threshold schemes and scheme selection

use crate::config::PolicyConfig;
use crate::error::PolicyError;
use custody_core::{Amount, WalletClass};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// N-of-M approval requirement for one transaction.
///
/// Selected once at creation and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawScheme")]
pub struct ThresholdScheme {
    required_approvals: u8,
    total_approvers: u8,
    challenge_mandatory: bool,
}

#[derive(Deserialize)]
struct RawScheme {
    required_approvals: u8,
    total_approvers: u8,
    challenge_mandatory: bool,
}

impl TryFrom<RawScheme> for ThresholdScheme {
    type Error = PolicyError;

    fn try_from(raw: RawScheme) -> Result<Self, Self::Error> {
        ThresholdScheme::new(raw.required_approvals, raw.total_approvers, raw.challenge_mandatory)
    }
}

impl ThresholdScheme {
    /// # Invariant
    /// `1 <= required_approvals <= total_approvers`
    pub fn new(
        required_approvals: u8,
        total_approvers: u8,
        challenge_mandatory: bool,
    ) -> Result<Self, PolicyError> {
        if required_approvals == 0 || required_approvals > total_approvers {
            return Err(PolicyError::InvalidScheme {
                required: required_approvals,
                total: total_approvers,
            });
        }
        Ok(Self {
            required_approvals,
            total_approvers,
            challenge_mandatory,
        })
    }

    pub fn required_approvals(&self) -> u8 {
        self.required_approvals
    }

    pub fn total_approvers(&self) -> u8 {
        self.total_approvers
    }

    pub fn challenge_mandatory(&self) -> bool {
        self.challenge_mandatory
    }

    /// Short human form, e.g. `2-of-3+challenge`
    pub fn label(&self) -> String {
        let suffix = if self.challenge_mandatory { "+challenge" } else { "" };
        format!("{}-of-{}{}", self.required_approvals, self.total_approvers, suffix)
    }
}

/// Which rule of the policy selected a scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SchemeTier {
    /// Cold wallet or high value: every guardian, fresh challenge
    Unanimous,
    /// Medium value: majority, fresh challenge
    MajorityChallenge,
    /// Low value: majority, fallback code allowed
    MajorityFallback,
}

/// Threshold policy over a validated config
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    config: PolicyConfig,
}

impl ThresholdPolicy {
    pub fn new(config: PolicyConfig) -> Result<Self, PolicyError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Tier for a transfer. Source class is checked before amount.
    pub fn tier(&self, amount: Amount, source: WalletClass) -> SchemeTier {
        if source.is_cold() || amount.value() >= self.config.high_value_cutoff {
            SchemeTier::Unanimous
        } else if amount.value() >= self.config.medium_value_cutoff {
            SchemeTier::MajorityChallenge
        } else {
            SchemeTier::MajorityFallback
        }
    }

    /// Scheme a transfer must satisfy.
    ///
    /// `Amount` cannot be negative, so malformed input is rejected before
    /// this is reachable.
    pub fn select_scheme(&self, amount: Amount, source: WalletClass) -> ThresholdScheme {
        let total = self.config.total_approvers;
        let (required, challenge_mandatory) = match self.tier(amount, source) {
            SchemeTier::Unanimous => (total, true),
            SchemeTier::MajorityChallenge => (self.config.majority(), true),
            SchemeTier::MajorityFallback => (self.config.majority(), false),
        };

        // validate() guarantees total >= 1 and majority <= total
        ThresholdScheme {
            required_approvals: required,
            total_approvers: total,
            challenge_mandatory,
        }
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            config: PolicyConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[test]
    fn test_low_value_hot_is_majority_without_challenge() {
        let scheme = ThresholdPolicy::default().select_scheme(amount(dec!(500)), WalletClass::Hot);
        assert_eq!(scheme.required_approvals(), 2);
        assert_eq!(scheme.total_approvers(), 3);
        assert!(!scheme.challenge_mandatory());
    }

    #[test]
    fn test_medium_value_hot_requires_challenge() {
        let scheme = ThresholdPolicy::default().select_scheme(amount(dec!(5000)), WalletClass::Hot);
        assert_eq!(scheme.required_approvals(), 2);
        assert_eq!(scheme.total_approvers(), 3);
        assert!(scheme.challenge_mandatory());
    }

    #[test]
    fn test_high_value_cold_is_unanimous() {
        let scheme =
            ThresholdPolicy::default().select_scheme(amount(dec!(50000)), WalletClass::Cold);
        assert_eq!(scheme.required_approvals(), 3);
        assert_eq!(scheme.total_approvers(), 3);
        assert!(scheme.challenge_mandatory());
    }

    #[test]
    fn test_cold_wallet_wins_over_small_amount() {
        let policy = ThresholdPolicy::default();
        assert_eq!(policy.tier(amount(dec!(1)), WalletClass::Cold), SchemeTier::Unanimous);
    }

    #[test]
    fn test_cutoffs_are_inclusive() {
        let policy = ThresholdPolicy::default();
        assert_eq!(policy.tier(amount(dec!(1000)), WalletClass::Hot), SchemeTier::MajorityChallenge);
        assert_eq!(policy.tier(amount(dec!(999.99)), WalletClass::Hot), SchemeTier::MajorityFallback);
        assert_eq!(policy.tier(amount(dec!(10000)), WalletClass::Hot), SchemeTier::Unanimous);
    }

    #[test]
    fn test_scheme_invariant() {
        assert!(ThresholdScheme::new(0, 3, true).is_err());
        assert!(ThresholdScheme::new(4, 3, true).is_err());
        assert!(ThresholdScheme::new(3, 3, true).is_ok());
    }

    #[test]
    fn test_scheme_serde_checks_invariant() {
        let bad = r#"{"required_approvals":5,"total_approvers":3,"challenge_mandatory":true}"#;
        assert!(serde_json::from_str::<ThresholdScheme>(bad).is_err());

        let scheme = ThresholdScheme::new(2, 3, false).unwrap();
        let json = serde_json::to_string(&scheme).unwrap();
        assert_eq!(serde_json::from_str::<ThresholdScheme>(&json).unwrap(), scheme);
    }

    #[test]
    fn test_label() {
        assert_eq!(ThresholdScheme::new(2, 3, true).unwrap().label(), "2-of-3+challenge");
        assert_eq!(ThresholdScheme::new(2, 3, false).unwrap().label(), "2-of-3");
    }

    proptest! {
        #[test]
        fn prop_selected_scheme_respects_invariant(units in 0u64..10_000_000, cold in any::<bool>()) {
            let class = if cold { WalletClass::Cold } else { WalletClass::Hot };
            let scheme = ThresholdPolicy::default().select_scheme(Amount::from_units(units), class);
            prop_assert!(scheme.required_approvals() >= 1);
            prop_assert!(scheme.required_approvals() <= scheme.total_approvers());
            if cold {
                prop_assert_eq!(scheme.required_approvals(), scheme.total_approvers());
            }
        }
    }
}
