//! Typed identifiers
//!
//! Generated ids (`TransactionId`, `ChallengeId`) use a short prefix plus
//! upper-case hex from a v4 uuid. Named ids (`GuardianId`, `WalletId`) are
//! operator supplied and normalised to upper case.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Empty identifier")]
    Empty,

    #[error("Identifier too long (max 64 chars): {0}")]
    TooLong(String),

    #[error("Invalid identifier format: {0}")]
    InvalidFormat(String),
}

const MAX_ID_LEN: usize = 64;

fn validate(raw: &str) -> Result<String, IdError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdError::Empty);
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(IdError::TooLong(trimmed.to_string()));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(IdError::InvalidFormat(trimmed.to_string()));
    }
    Ok(trimmed.to_ascii_uppercase())
}

fn generated(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, hex[..12].to_uppercase())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and normalise an identifier
            pub fn new(raw: impl AsRef<str>) -> Result<Self, IdError> {
                validate(raw.as_ref()).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id!(
    /// Identifier of a pending transaction, e.g. `TX-3F9A01B2C4D5`
    TransactionId
);
string_id!(
    /// Identifier of a single issued challenge
    ChallengeId
);
string_id!(
    /// Identifier of an enrolled guardian (approver)
    GuardianId
);
string_id!(
    /// Identifier of a custody wallet whose derivation index sequence is tracked
    WalletId
);

impl TransactionId {
    /// Generate a fresh random transaction id
    pub fn generate() -> Self {
        Self(generated("TX"))
    }
}

impl ChallengeId {
    /// Generate a fresh random challenge id
    pub fn generate() -> Self {
        Self(generated("CH"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_prefixed_and_distinct() {
        let a = TransactionId::generate();
        let b = TransactionId::generate();
        assert!(a.as_str().starts_with("TX-"));
        assert_eq!(a.as_str().len(), 15);
        assert_ne!(a, b);

        assert!(ChallengeId::generate().as_str().starts_with("CH-"));
    }

    #[test]
    fn test_named_ids_are_uppercased() {
        let g = GuardianId::new(" cfo ").unwrap();
        assert_eq!(g.as_str(), "CFO");
        assert_eq!(WalletId::new("hot").unwrap().to_string(), "HOT");
    }

    #[test]
    fn test_invalid_ids_rejected() {
        assert_eq!(GuardianId::new(""), Err(IdError::Empty));
        assert!(matches!(GuardianId::new("a b"), Err(IdError::InvalidFormat(_))));
        assert!(matches!(WalletId::new("x".repeat(65)), Err(IdError::TooLong(_))));
    }

    #[test]
    fn test_serde_validates() {
        let id: GuardianId = serde_json::from_str("\"ceo\"").unwrap();
        assert_eq!(id.as_str(), "CEO");
        assert!(serde_json::from_str::<GuardianId>("\"bad id\"").is_err());
    }
}
