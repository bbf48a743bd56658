//! Session management core module.
//!
//! Holds the two pieces of state the service revolves around: whether a class session is
//! collecting attendance ([`session_state`]), and the records collected so far
//! ([`attendance_ledger`]).

/// Active/inactive session state with change notification.
pub mod session_state;
/// Registration, lookup and deletion of attendance records.
pub mod attendance_ledger;

pub use attendance_ledger::{AttendanceLedger, RegistrationCheck};
pub use session_state::{SessionState, SessionStatus};
