//! Custody RPC - CLI orchestrator
//!
//! This crate provides the `custody` binary and the command layer on top of
//! the approval engine.

pub mod commands;
pub mod context;

pub use context::{AppContext, CustodyConfig, GuardianConfig};
