//! Audit errors

use crate::hash::ChainError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit chain broken: {0}")]
    Chain(#[from] ChainError),
}
