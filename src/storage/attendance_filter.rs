//! Helpers for building `AttendanceFilter` values.
//!
//! This module re-exports `AttendanceFilter` and provides convenience builders
//! for common query criteria.

pub use crate::storage::types::AttendanceFilter;

/// Build an `AttendanceFilter` that matches records of one session.
pub fn by_session<S: Into<String>>(session_id: S) -> AttendanceFilter {
    AttendanceFilter { session_id: Some(session_id.into()), ..Default::default() }
}

/// Build an `AttendanceFilter` that matches records of one student across sessions.
pub fn by_student<S: Into<String>>(student_id: S) -> AttendanceFilter {
    AttendanceFilter { student_id: Some(student_id.into()), ..Default::default() }
}
