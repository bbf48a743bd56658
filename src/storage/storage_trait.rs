//! Storage Trait
//!
//! This module defines the `Storage` trait, the interface every attendance record store
//! implements.
//!
//! Implementors of this trait are responsible for:
//! - Assigning record ids
//! - Enforcing at most one record per `(student_id, session_id)` inside `insert_attendance`
//! - Filtered retrieval, newest first
//! - Single, bulk and per-session deletion
//!
//! All methods return a `Result` to handle potential storage errors.

use crate::error_handling::types::StorageError;
use crate::storage::types::{AttendanceFilter, AttendanceRecord, NewAttendance};

/// The `Storage` trait defines the interface for attendance record backends.
///
/// Methods are blocking. Backends that talk to a database drive their futures on a runtime
/// handle, so async callers must go through `tokio::task::spawn_blocking`.
pub trait Storage: Send + Sync {
    /// Persists a new record and returns it with its assigned id.
    ///
    /// The duplicate check and the write are one atomic step: if a record for the same
    /// student and session exists, nothing is written and `StorageError::UniqueViolation`
    /// is returned.
    fn insert_attendance(&self, new: &NewAttendance) -> Result<AttendanceRecord, StorageError>;

    /// Retrieves records, optionally filtered, ordered by timestamp descending.
    fn get_attendance(
        &self,
        filter: Option<AttendanceFilter>,
    ) -> Result<Vec<AttendanceRecord>, StorageError>;

    /// Looks up the record of a student in a session.
    fn find_attendance(
        &self,
        student_id: &str,
        session_id: &str,
    ) -> Result<Option<AttendanceRecord>, StorageError>;

    /// Deletes a record by id. Returns whether a record was removed.
    fn delete_attendance(&self, id: i64) -> Result<bool, StorageError>;

    /// Deletes every listed id that exists. Returns how many were removed.
    fn delete_attendance_many(&self, ids: &[i64]) -> Result<usize, StorageError>;

    /// Deletes every record of a session. Returns how many were removed.
    fn clear_session(&self, session_id: &str) -> Result<usize, StorageError>;
}
