//! Error types shared across the crate.
//!
//! One enum per subsystem, each with a hand-written `Display`. The web layer
//! maps `LedgerError` and `SessionError` to HTTP status codes.

pub mod types;

pub use types::*;
