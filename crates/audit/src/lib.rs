//! Custody Audit - append-only record of every authentication attempt
//!
//! Records are sealed into a hash chain (each record commits to the previous
//! record's hash) so a forensic replay can detect edits, gaps and reordering.
//! The authoritative chain lives in the approval store next to the state it
//! describes; this crate defines the record format, the chain rules and a
//! JSONL journal for exporting and replaying it.

pub mod error;
pub mod hash;
pub mod journal;
pub mod reader;
pub mod record;

pub use error::AuditError;
pub use hash::{calculate_record_hash, verify_chain, ChainError, GENESIS_HASH};
pub use journal::AuditJournal;
pub use reader::AuditReader;
pub use record::{AuditDraft, AuditKind, AuditOutcome, AuditRecord};
