//! Source wallet classes

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Class of the wallet funds are released from.
///
/// The cold (reserve) wallet always requires every guardian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum WalletClass {
    /// Operational wallet holding a small share of funds
    Hot,
    /// Reserve wallet holding the bulk of funds
    Cold,
}

impl WalletClass {
    pub fn is_cold(&self) -> bool {
        matches!(self, WalletClass::Cold)
    }
}
