//! Policy errors

use crate::limits::LimitWindow;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid scheme: {required} of {total} approvals")]
    InvalidScheme { required: u8, total: u8 },

    #[error("Invalid policy config: {0}")]
    InvalidConfig(String),

    #[error("{window} limit exceeded: {attempted} > {limit}")]
    LimitExceeded {
        window: LimitWindow,
        limit: Decimal,
        attempted: Decimal,
    },

    #[error("{0} spending total overflows")]
    TotalOverflow(LimitWindow),
}
