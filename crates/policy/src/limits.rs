//! Daily and monthly spending limits per source wallet

use crate::config::PolicyConfig;
use crate::error::PolicyError;
use custody_core::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum LimitWindow {
    Daily,
    Monthly,
}

/// Amounts already committed from a wallet in the current windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpendingTotals {
    pub today: Decimal,
    pub this_month: Decimal,
}

impl PolicyConfig {
    /// Check a new transfer against both windows
    pub fn check_limits(&self, totals: SpendingTotals, amount: Amount) -> Result<(), PolicyError> {
        let daily = totals
            .today
            .checked_add(amount.value())
            .ok_or(PolicyError::TotalOverflow(LimitWindow::Daily))?;
        if daily > self.daily_limit {
            return Err(PolicyError::LimitExceeded {
                window: LimitWindow::Daily,
                limit: self.daily_limit,
                attempted: daily,
            });
        }

        let monthly = totals
            .this_month
            .checked_add(amount.value())
            .ok_or(PolicyError::TotalOverflow(LimitWindow::Monthly))?;
        if monthly > self.monthly_limit {
            return Err(PolicyError::LimitExceeded {
                window: LimitWindow::Monthly,
                limit: self.monthly_limit,
                attempted: monthly,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_within_limits() {
        let config = PolicyConfig::default();
        let totals = SpendingTotals {
            today: dec!(90000),
            this_month: dec!(90000),
        };
        assert!(config.check_limits(totals, Amount::from_units(10_000)).is_ok());
    }

    #[test]
    fn test_daily_limit_exceeded() {
        let config = PolicyConfig::default();
        let totals = SpendingTotals {
            today: dec!(95000),
            this_month: dec!(95000),
        };
        let err = config.check_limits(totals, Amount::from_units(10_000)).unwrap_err();
        assert_eq!(
            err,
            PolicyError::LimitExceeded {
                window: LimitWindow::Daily,
                limit: dec!(100000),
                attempted: dec!(105000),
            }
        );
    }

    #[test]
    fn test_monthly_limit_exceeded() {
        let config = PolicyConfig::default();
        let totals = SpendingTotals {
            today: Decimal::ZERO,
            this_month: dec!(999999),
        };
        let err = config.check_limits(totals, Amount::from_units(2)).unwrap_err();
        assert!(matches!(err, PolicyError::LimitExceeded { window: LimitWindow::Monthly, .. }));
    }

    #[test]
    fn test_overflowing_total_is_rejected() {
        let config = PolicyConfig::default();
        let totals = SpendingTotals {
            today: dec!(500),
            this_month: dec!(500),
        };
        let err = config
            .check_limits(totals, Amount::new(Decimal::MAX).unwrap())
            .unwrap_err();
        assert_eq!(err, PolicyError::TotalOverflow(LimitWindow::Daily));
    }
}
