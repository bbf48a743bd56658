//! Storage subsystem
//!
//! This module provides the record stores behind the attendance ledger.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `types`: records, detection methods and filters shared by all backends.
//! - `memory_storage`: process-local store, lost on restart.
//! - `file_storage`: single JSON document on disk for simple persistence and inspection.
//! - `database_storage`: ORM-based SQLite implementation using SeaORM.
//! - `attendance_filter`: helpers to build record queries.
//! - `db_entities`: SeaORM entity model for the database backend.

pub mod attendance_filter;
pub mod database_storage;
pub mod db_entities;
pub mod file_storage;
pub mod memory_storage;
pub mod storage_trait;
pub mod types;

pub use storage_trait::Storage;
