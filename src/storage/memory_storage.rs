use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use log::{debug, error, info};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{sort_newest_first, AttendanceFilter, AttendanceRecord, NewAttendance};

#[derive(Default)]
struct MemoryInner {
    records: BTreeMap<i64, AttendanceRecord>,
    next_id: i64,
}

/// Process-local record store. Everything is lost when the process exits.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        info!("MemoryStorage initialized");
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StorageError> {
        self.inner.lock().map_err(|_| {
            error!("MemoryStorage mutex poisoned");
            StorageError::ReadFailed
        })
    }
}

impl Storage for MemoryStorage {
    fn insert_attendance(&self, new: &NewAttendance) -> Result<AttendanceRecord, StorageError> {
        let mut inner = self.lock()?;
        let exists = inner
            .records
            .values()
            .any(|r| r.student_id == new.student_id && r.session_id == new.session_id);
        if exists {
            return Err(StorageError::UniqueViolation);
        }
        inner.next_id += 1;
        let record = new.clone().into_record(inner.next_id);
        inner.records.insert(record.id, record.clone());
        debug!("Stored attendance {} in memory", record.id);
        Ok(record)
    }

    fn get_attendance(
        &self,
        filter: Option<AttendanceFilter>,
    ) -> Result<Vec<AttendanceRecord>, StorageError> {
        let inner = self.lock()?;
        let filter = filter.unwrap_or_default();
        let mut out: Vec<AttendanceRecord> =
            inner.records.values().filter(|r| filter.matches(r)).cloned().collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    fn find_attendance(
        &self,
        student_id: &str,
        session_id: &str,
    ) -> Result<Option<AttendanceRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .values()
            .find(|r| r.student_id == student_id && r.session_id == session_id)
            .cloned())
    }

    fn delete_attendance(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.lock()?.records.remove(&id).is_some())
    }

    fn delete_attendance_many(&self, ids: &[i64]) -> Result<usize, StorageError> {
        let mut inner = self.lock()?;
        Ok(ids.iter().filter(|id| inner.records.remove(*id).is_some()).count())
    }

    fn clear_session(&self, session_id: &str) -> Result<usize, StorageError> {
        let mut inner = self.lock()?;
        let before = inner.records.len();
        inner.records.retain(|_, r| r.session_id != session_id);
        Ok(before - inner.records.len())
    }
}
