use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{sort_newest_first, AttendanceFilter, AttendanceRecord, NewAttendance};

const LEDGER_FILE: &str = "attendance.json";

/// On-disk shape of the ledger file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerDocument {
    next_id: i64,
    records: Vec<AttendanceRecord>,
}

/// Flat-file backend: the whole ledger is one JSON document.
///
/// The document is cached in memory behind a mutex. Each mutation is applied to a copy,
/// written to a temporary file and renamed over the ledger file; the cache only advances
/// once the rename succeeded, so a failed write leaves both untouched.
pub struct FileStorage {
    base_path: PathBuf,
    document: Mutex<LedgerDocument>,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| { error!("Failed to create storage dir {}: {}", base_path.display(), e); StorageError::WriteFailed })?;

        let ledger_path = base_path.join(LEDGER_FILE);
        let document = if ledger_path.exists() {
            Self::read_document(&ledger_path)?
        } else {
            LedgerDocument::default()
        };
        info!("FileStorage initialized at {} ({} record(s))", base_path.display(), document.records.len());

        Ok(Self {
            base_path,
            document: Mutex::new(document),
        })
    }

    /// Construct FileStorage using env var ROLLCALL_FILE_STORAGE_DIR if set, otherwise current directory.
    pub fn new_default() -> Result<Self, StorageError> {
        if let Ok(dir) = std::env::var("ROLLCALL_FILE_STORAGE_DIR") {
            info!("Using FileStorage from ROLLCALL_FILE_STORAGE_DIR: {}", dir);
            return Self::new(PathBuf::from(dir));
        }
        let cwd = std::env::current_dir().map_err(|e| { error!("Failed to get current dir: {}", e); StorageError::ReadFailed })?;
        info!("Using FileStorage at current directory: {}", cwd.display());
        Self::new(cwd)
    }

    fn ledger_path(&self) -> PathBuf { self.base_path.join(LEDGER_FILE) }

    fn read_document(path: &Path) -> Result<LedgerDocument, StorageError> {
        let mut content = String::new();
        File::open(path).and_then(|mut f| f.read_to_string(&mut content)).map_err(|e| { error!("Failed to read ledger file {}: {}", path.display(), e); StorageError::ReadFailed })?;
        let document: LedgerDocument = serde_json::from_str(&content).map_err(|e| { error!("Invalid ledger file {}: {}", path.display(), e); StorageError::ReadFailed })?;
        debug!("Parsed {} record(s) from {}", document.records.len(), path.display());
        Ok(document)
    }

    fn write_document(&self, document: &LedgerDocument) -> Result<(), StorageError> {
        let path = self.ledger_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(document).map_err(|e| { error!("Failed to serialize ledger: {}", e); StorageError::WriteFailed })?;
        let mut f = File::create(&tmp).map_err(|e| { error!("Failed to create {}: {}", tmp.display(), e); StorageError::WriteFailed })?;
        f.write_all(&json).and_then(|_| f.sync_all()).map_err(|e| { error!("Failed to write {}: {}", tmp.display(), e); StorageError::WriteFailed })?;
        fs::rename(&tmp, &path).map_err(|e| { error!("Failed to replace {}: {}", path.display(), e); StorageError::WriteFailed })?;
        debug!("Wrote {} record(s) to {}", document.records.len(), path.display());
        Ok(())
    }

    /// Applies `change` to a copy of the document and persists it. The closure's result is
    /// returned once the new document is on disk.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut LedgerDocument) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.document.lock().map_err(|_| { error!("FileStorage mutex poisoned"); StorageError::WriteFailed })?;
        let mut next = guard.clone();
        let out = change(&mut next)?;
        self.write_document(&next)?;
        *guard = next;
        Ok(out)
    }

    fn snapshot(&self) -> Result<Vec<AttendanceRecord>, StorageError> {
        let guard = self.document.lock().map_err(|_| { error!("FileStorage mutex poisoned"); StorageError::ReadFailed })?;
        Ok(guard.records.clone())
    }
}

impl Storage for FileStorage {
    fn insert_attendance(&self, new: &NewAttendance) -> Result<AttendanceRecord, StorageError> {
        let record = self.mutate(|doc| {
            if doc.records.iter().any(|r| r.student_id == new.student_id && r.session_id == new.session_id) {
                return Err(StorageError::UniqueViolation);
            }
            doc.next_id += 1;
            let record = new.clone().into_record(doc.next_id);
            doc.records.push(record.clone());
            Ok(record)
        })?;
        info!("Saved attendance {} to {}", record.id, self.ledger_path().display());
        Ok(record)
    }

    fn get_attendance(&self, filter: Option<AttendanceFilter>) -> Result<Vec<AttendanceRecord>, StorageError> {
        let mut records = self.snapshot()?;
        let original_len = records.len();
        if let Some(f) = filter {
            records.retain(|r| f.matches(r));
        }
        sort_newest_first(&mut records);
        debug!("Loaded {} record(s), {} after filter", original_len, records.len());
        Ok(records)
    }

    fn find_attendance(&self, student_id: &str, session_id: &str) -> Result<Option<AttendanceRecord>, StorageError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .find(|r| r.student_id == student_id && r.session_id == session_id))
    }

    fn delete_attendance(&self, id: i64) -> Result<bool, StorageError> {
        let guard = self.document.lock().map_err(|_| StorageError::ReadFailed)?;
        let present = guard.records.iter().any(|r| r.id == id);
        drop(guard);
        if !present {
            return Ok(false);
        }
        self.mutate(|doc| {
            let before = doc.records.len();
            doc.records.retain(|r| r.id != id);
            Ok(doc.records.len() != before)
        })
    }

    fn delete_attendance_many(&self, ids: &[i64]) -> Result<usize, StorageError> {
        let removed = self.mutate(|doc| {
            let before = doc.records.len();
            doc.records.retain(|r| !ids.contains(&r.id));
            Ok(before - doc.records.len())
        })?;
        info!("Removed {} of {} requested record(s)", removed, ids.len());
        Ok(removed)
    }

    fn clear_session(&self, session_id: &str) -> Result<usize, StorageError> {
        let removed = self.mutate(|doc| {
            let before = doc.records.len();
            doc.records.retain(|r| r.session_id != session_id);
            Ok(before - doc.records.len())
        })?;
        info!("Removed {} record(s) of session {}", removed, session_id);
        Ok(removed)
    }
}
