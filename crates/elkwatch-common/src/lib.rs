//! Shared building blocks for the elkwatch workspace: environment
//! configuration, secret encryption-at-rest, and the condition/status
//! types exchanged between the storage, query, and worker crates.

pub mod config;
pub mod secrets;
pub mod types;
