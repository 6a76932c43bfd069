//! Custody Threshold Policy
//!
//! Maps a transfer (amount, source wallet class) to the approval scheme it
//! must satisfy. Pure and side-effect free: safe to call from any number of
//! request handlers without synchronisation.

pub mod config;
pub mod error;
pub mod limits;
pub mod scheme;

pub use config::PolicyConfig;
pub use error::PolicyError;
pub use limits::{LimitWindow, SpendingTotals};
pub use scheme::{SchemeTier, ThresholdPolicy, ThresholdScheme};
