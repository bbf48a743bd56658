use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::error_handling::types::{LedgerError, StorageError};
use crate::session_management::session_state::SessionState;
use crate::storage::attendance_filter::by_session;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{AttendanceFilter, AttendanceRecord, DetectionMethod, NewAttendance};

/// Answer to "has this student already registered?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationCheck {
    pub has_attendance: bool,
    pub active_session: Option<String>,
}

/// The attendance ledger
///
/// Owns the record store and reads the session state it was given. Registration is gated
/// on the session state; listing and deletion never look at it.
///
/// # Fields Overview
///
/// - `storage`: backend that persists records and enforces `(student, session)` uniqueness
/// - `sessions`: shared session state, also mutated by the teacher-facing start/stop calls
pub struct AttendanceLedger {
    storage: Arc<dyn Storage>,
    sessions: Arc<SessionState>,
}

fn required(value: &str, field: &str) -> Result<String, LedgerError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LedgerError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn internal(err: StorageError) -> LedgerError {
    error!("Storage failure: {}", err);
    LedgerError::Internal(err)
}

impl AttendanceLedger {
    pub fn new(storage: Arc<dyn Storage>, sessions: Arc<SessionState>) -> Self {
        Self { storage, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionState> {
        &self.sessions
    }

    /// Records that `student_id` attended `session_id`.
    ///
    /// Fails with `Validation` for a blank student, `PreconditionFailed` when no session is
    /// active or `session_id` is not the active one, and `DuplicateRegistration` when the
    /// student already has a record for the session. The duplicate check happens inside the
    /// backend's insert, so concurrent calls for the same pair create one record at most.
    pub fn register(
        &self,
        student_id: &str,
        session_id: &str,
        detection_method: DetectionMethod,
    ) -> Result<AttendanceRecord, LedgerError> {
        let student_id = required(student_id, "student_id")?;
        let session_id = required(session_id, "session_id")?;

        match self.sessions.active_session_id() {
            None => {
                warn!("Registration of {} refused: no active session", student_id);
                return Err(LedgerError::PreconditionFailed(String::from(
                    "no active session",
                )));
            }
            Some(active) if active != session_id => {
                warn!(
                    "Registration of {} refused: session {} is not active ({} is)",
                    student_id, session_id, active
                );
                return Err(LedgerError::PreconditionFailed(format!(
                    "session {} is not the active session",
                    session_id
                )));
            }
            Some(_) => {}
        }

        let new = NewAttendance {
            student_id,
            session_id,
            timestamp: Utc::now().trunc_subsecs(6),
            detection_method,
        };
        match self.storage.insert_attendance(&new) {
            Ok(record) => {
                info!(
                    "Registered {} for session {} via {} (id {})",
                    record.student_id, record.session_id, record.detection_method, record.id
                );
                Ok(record)
            }
            Err(StorageError::UniqueViolation) => {
                debug!("{} already registered for {}", new.student_id, new.session_id);
                Err(LedgerError::DuplicateRegistration {
                    student_id: new.student_id,
                    session_id: new.session_id,
                })
            }
            Err(e) => Err(internal(e)),
        }
    }

    /// Registers a student against whichever session is active right now.
    pub fn register_active(
        &self,
        student_id: &str,
        detection_method: DetectionMethod,
    ) -> Result<AttendanceRecord, LedgerError> {
        required(student_id, "student_id")?;
        let session_id = self.sessions.active_session_id().ok_or_else(|| {
            warn!("Registration of {} refused: no active session", student_id.trim());
            LedgerError::PreconditionFailed(String::from("no active session"))
        })?;
        self.register(student_id, &session_id, detection_method)
    }

    /// All records of a session, or of every session when `session_id` is `None`, newest
    /// first.
    pub fn list(&self, session_id: Option<&str>) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let filter = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(by_session);
        self.list_filtered(filter.unwrap_or_default())
    }

    pub fn list_filtered(
        &self,
        filter: AttendanceFilter,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let records = self.storage.get_attendance(Some(filter)).map_err(internal)?;
        debug!("Listed {} attendance record(s)", records.len());
        Ok(records)
    }

    /// Whether the student has a record for `session_id`, or for the active session when
    /// `session_id` is `None`. With neither, the answer is `false`.
    pub fn check_registered(
        &self,
        student_id: &str,
        session_id: Option<&str>,
    ) -> Result<RegistrationCheck, LedgerError> {
        let student_id = required(student_id, "student_id")?;
        let active_session = self.sessions.active_session_id();
        let target = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| active_session.clone());

        let has_attendance = match target {
            Some(session) => self
                .storage
                .find_attendance(&student_id, &session)
                .map_err(internal)?
                .is_some(),
            None => false,
        };
        Ok(RegistrationCheck {
            has_attendance,
            active_session,
        })
    }

    /// Removes one record. Returns `Ok(true)` when it was removed and `NotFound` when no
    /// record has that id.
    pub fn delete_one(&self, id: i64) -> Result<bool, LedgerError> {
        if self.storage.delete_attendance(id).map_err(internal)? {
            info!("Deleted attendance {}", id);
            Ok(true)
        } else {
            debug!("Attendance {} not found", id);
            Err(LedgerError::NotFound(id))
        }
    }

    /// Removes every listed record that exists and returns how many were removed. Unknown
    /// ids are skipped; repeated ids count once.
    pub fn delete_many(&self, ids: &[i64]) -> Result<usize, LedgerError> {
        if ids.is_empty() {
            return Err(LedgerError::Validation(String::from("ids must not be empty")));
        }
        let unique: Vec<i64> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let removed = self.storage.delete_attendance_many(&unique).map_err(internal)?;
        info!("Deleted {} of {} requested attendance record(s)", removed, unique.len());
        Ok(removed)
    }

    /// Removes every record of a session.
    pub fn clear_by_session(&self, session_id: &str) -> Result<usize, LedgerError> {
        let session_id = required(session_id, "session_id")?;
        let removed = self.storage.clear_session(&session_id).map_err(internal)?;
        info!("Cleared {} attendance record(s) of session {}", removed, session_id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::StartPolicy;
    use crate::storage::file_storage::FileStorage;
    use crate::storage::memory_storage::MemoryStorage;
    use std::thread;
    use tempfile::TempDir;

    fn ledger_with(storage: Arc<dyn Storage>) -> AttendanceLedger {
        AttendanceLedger::new(storage, Arc::new(SessionState::new(StartPolicy::Replace)))
    }

    fn memory_ledger() -> AttendanceLedger {
        ledger_with(Arc::new(MemoryStorage::new()))
    }

    fn assert_single_winner(ledger: Arc<AttendanceLedger>) {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                thread::spawn(move || ledger.register("alice", "s1", DetectionMethod::Ble))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for r in results.iter().filter(|r| r.is_err()) {
            assert!(matches!(r, Err(LedgerError::DuplicateRegistration { .. })));
        }
        assert_eq!(ledger.list(Some("s1")).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_registration_memory() {
        let ledger = Arc::new(memory_ledger());
        ledger.sessions().start(Some("s1"), None).unwrap();
        assert_single_winner(ledger);
    }

    #[test]
    fn test_concurrent_registration_file() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(ledger_with(Arc::new(FileStorage::new(dir.path()).unwrap())));
        ledger.sessions().start(Some("s1"), None).unwrap();
        assert_single_winner(ledger);
    }

    #[test]
    fn test_register_requires_active_session() {
        let ledger = memory_ledger();
        assert!(matches!(
            ledger.register("alice", "s1", DetectionMethod::Ble),
            Err(LedgerError::PreconditionFailed(_))
        ));
        assert!(matches!(
            ledger.register_active("alice", DetectionMethod::Ble),
            Err(LedgerError::PreconditionFailed(_))
        ));

        ledger.sessions().start(Some("s1"), None).unwrap();
        assert!(ledger.register_active("alice", DetectionMethod::Ble).is_ok());
    }

    #[test]
    fn test_register_rejects_stale_session() {
        let ledger = memory_ledger();
        ledger.sessions().start(Some("s1"), None).unwrap();
        ledger.sessions().start(Some("s2"), None).unwrap();
        assert!(matches!(
            ledger.register("alice", "s1", DetectionMethod::Ble),
            Err(LedgerError::PreconditionFailed(_))
        ));
        assert!(ledger.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_register_validates_student() {
        let ledger = memory_ledger();
        ledger.sessions().start(Some("s1"), None).unwrap();
        assert!(matches!(
            ledger.register_active("   ", DetectionMethod::Ble),
            Err(LedgerError::Validation(_))
        ));
        // validation wins over the session check
        ledger.sessions().stop();
        assert!(matches!(
            ledger.register_active("", DetectionMethod::Ble),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_register_trims_student() {
        let ledger = memory_ledger();
        ledger.sessions().start(Some("s1"), None).unwrap();
        let record = ledger.register_active("  alice ", DetectionMethod::Wifi).unwrap();
        assert_eq!(record.student_id, "alice");
        assert!(matches!(
            ledger.register_active("alice", DetectionMethod::Ble),
            Err(LedgerError::DuplicateRegistration { .. })
        ));
    }

    #[test]
    fn test_delete_many_partial_success() {
        let ledger = memory_ledger();
        ledger.sessions().start(Some("s1"), None).unwrap();
        let existing = ledger.register_active("alice", DetectionMethod::Ble).unwrap();
        let other = ledger.register_active("bob", DetectionMethod::Ble).unwrap();

        assert_eq!(ledger.delete_many(&[existing.id, 9_999]).unwrap(), 1);
        let left = ledger.list(None).unwrap();
        assert_eq!(left, vec![other]);
        assert!(matches!(ledger.delete_many(&[]), Err(LedgerError::Validation(_))));
        assert_eq!(ledger.delete_many(&[existing.id]).unwrap(), 0);
    }

    #[test]
    fn test_delete_many_counts_repeated_ids_once() {
        let ledger = memory_ledger();
        ledger.sessions().start(Some("s1"), None).unwrap();
        let record = ledger.register_active("alice", DetectionMethod::Ble).unwrap();
        assert_eq!(ledger.delete_many(&[record.id, record.id]).unwrap(), 1);
    }

    #[test]
    fn test_delete_one() {
        let ledger = memory_ledger();
        ledger.sessions().start(Some("s1"), None).unwrap();
        let record = ledger.register_active("alice", DetectionMethod::Ble).unwrap();
        assert_eq!(ledger.delete_one(record.id), Ok(true));
        assert_eq!(ledger.delete_one(record.id), Err(LedgerError::NotFound(record.id)));
    }

    #[test]
    fn test_list_filters_by_session_newest_first() {
        let ledger = memory_ledger();
        ledger.sessions().start(Some("2024-01-01"), None).unwrap();
        let a = ledger.register_active("alice", DetectionMethod::Ble).unwrap();
        let b = ledger.register_active("bob", DetectionMethod::Ble).unwrap();
        ledger.sessions().start(Some("2024-01-02"), None).unwrap();
        ledger.register_active("alice", DetectionMethod::Ble).unwrap();

        let day_one = ledger.list(Some("2024-01-01")).unwrap();
        assert_eq!(day_one, vec![b, a]);
        assert!(day_one.iter().all(|r| r.session_id == "2024-01-01"));
        assert!(day_one.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(ledger.list(None).unwrap().len(), 3);
        assert_eq!(ledger.list(Some(" ")).unwrap().len(), 3);
    }

    #[test]
    fn test_clear_by_session() {
        let ledger = memory_ledger();
        ledger.sessions().start(Some("s1"), None).unwrap();
        ledger.register_active("alice", DetectionMethod::Ble).unwrap();
        ledger.register_active("bob", DetectionMethod::Ble).unwrap();

        assert_eq!(ledger.clear_by_session("s1").unwrap(), 2);
        assert_eq!(ledger.clear_by_session("s1").unwrap(), 0);
        assert_eq!(ledger.clear_by_session("unknown").unwrap(), 0);
        assert!(matches!(ledger.clear_by_session(""), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_check_registered() {
        let ledger = memory_ledger();
        assert_eq!(
            ledger.check_registered("alice", None).unwrap(),
            RegistrationCheck { has_attendance: false, active_session: None }
        );

        ledger.sessions().start(Some("s1"), None).unwrap();
        ledger.register_active("alice", DetectionMethod::Ble).unwrap();
        ledger.sessions().stop();

        // explicit session still answers after the session closed
        assert!(ledger.check_registered("alice", Some("s1")).unwrap().has_attendance);
        assert!(!ledger.check_registered("alice", None).unwrap().has_attendance);
    }

    #[test]
    fn test_end_to_end_session_flow() {
        let ledger = memory_ledger();
        ledger.sessions().start(Some("2024-03-10"), None).unwrap();

        let record = ledger.register_active("alice", DetectionMethod::Ble).unwrap();
        assert_eq!(record.session_id, "2024-03-10");
        assert_eq!(record.detection_method, DetectionMethod::Ble);

        assert_eq!(
            ledger.register_active("alice", DetectionMethod::Ble),
            Err(LedgerError::DuplicateRegistration {
                student_id: String::from("alice"),
                session_id: String::from("2024-03-10"),
            })
        );
        assert_eq!(
            ledger.check_registered("alice", None).unwrap(),
            RegistrationCheck {
                has_attendance: true,
                active_session: Some(String::from("2024-03-10")),
            }
        );

        ledger.sessions().stop();
        assert!(matches!(
            ledger.register_active("bob", DetectionMethod::Ble),
            Err(LedgerError::PreconditionFailed(_))
        ));
    }

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn insert_attendance(&self, _: &NewAttendance) -> Result<AttendanceRecord, StorageError> {
            Err(StorageError::WriteFailed)
        }
        fn get_attendance(
            &self,
            _: Option<AttendanceFilter>,
        ) -> Result<Vec<AttendanceRecord>, StorageError> {
            Err(StorageError::ReadFailed)
        }
        fn find_attendance(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<AttendanceRecord>, StorageError> {
            Err(StorageError::ReadFailed)
        }
        fn delete_attendance(&self, _: i64) -> Result<bool, StorageError> {
            Err(StorageError::WriteFailed)
        }
        fn delete_attendance_many(&self, _: &[i64]) -> Result<usize, StorageError> {
            Err(StorageError::WriteFailed)
        }
        fn clear_session(&self, _: &str) -> Result<usize, StorageError> {
            Err(StorageError::WriteFailed)
        }
    }

    #[test]
    fn test_storage_faults_are_internal() {
        let ledger = ledger_with(Arc::new(FailingStorage));
        ledger.sessions().start(Some("s1"), None).unwrap();
        assert_eq!(
            ledger.register_active("alice", DetectionMethod::Ble),
            Err(LedgerError::Internal(StorageError::WriteFailed))
        );
        assert_eq!(
            ledger.list(None),
            Err(LedgerError::Internal(StorageError::ReadFailed))
        );
        assert_eq!(
            ledger.delete_one(1),
            Err(LedgerError::Internal(StorageError::WriteFailed))
        );
    }
}
