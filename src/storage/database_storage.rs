use std::env;
use std::future::Future;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, SqlErr,
};
use tokio::runtime::Handle;

use crate::error_handling::types::StorageError;
use crate::storage::db_entities::{self as attendance, Column, Entity};
use crate::storage::storage_trait::Storage;
use crate::storage::types::{AttendanceFilter, AttendanceRecord, DetectionMethod, NewAttendance};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    detection_method TEXT NOT NULL
);";

const CREATE_UNIQUE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS attendance_student_session
    ON attendance (student_id, session_id);";

const CREATE_SESSION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS attendance_session ON attendance (session_id);";

fn timestamp_to_column(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn model_into_record(model: attendance::Model) -> Result<AttendanceRecord, StorageError> {
    Ok(AttendanceRecord {
        id: model.id,
        student_id: model.student_id,
        session_id: model.session_id,
        timestamp: DateTime::parse_from_rfc3339(&model.timestamp)
            .map_err(|e| {
                error!("Invalid timestamp in attendance row {}: {}", model.id, e);
                StorageError::ReadFailed
            })?
            .with_timezone(&Utc),
        detection_method: model.detection_method.parse::<DetectionMethod>().map_err(|e| {
            error!("Invalid detection method in attendance row {}: {}", model.id, e);
            StorageError::ReadFailed
        })?,
    })
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// SQLite backend through SeaORM.
///
/// Uniqueness of `(student_id, session_id)` is a database index, so concurrent inserts
/// from several connections still produce at most one row.
///
/// The `Storage` methods block on the tokio runtime that was current when the storage
/// was opened. They must not be called from inside an async task; use `spawn_blocking`.
pub struct DatabaseStorage {
    handle: Handle,
    db: DatabaseConnection,
}

impl DatabaseStorage {
    /// Default database filename used in the application's working directory
    const DEFAULT_DB_FILE: &'static str = "rollcall.sqlite3";

    /// Open the database at ROLLCALL_DB_PATH if set, otherwise the default filename in the
    /// current working directory
    pub async fn new() -> Result<Self, StorageError> {
        if let Ok(path) = env::var("ROLLCALL_DB_PATH") {
            info!("Using DatabaseStorage from ROLLCALL_DB_PATH: {}", path);
            return Self::new_file(path).await;
        }
        let cwd = env::current_dir().map_err(|_| StorageError::ConnectionFailed)?;
        Self::new_file(cwd.join(Self::DEFAULT_DB_FILE)).await
    }

    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create database dir {}: {}", parent.display(), e);
                    StorageError::WriteFailed
                })?;
            }
        }

        let mut opts = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path_ref.display()));
        opts.max_connections(5).sqlx_logging(false);
        let db = Database::connect(opts).await.map_err(|e| {
            error!("Failed to open database {}: {}", path_ref.display(), e);
            StorageError::ConnectionFailed
        })?;

        // create schema
        for statement in [CREATE_TABLE, CREATE_UNIQUE_INDEX, CREATE_SESSION_INDEX] {
            db.execute_unprepared(statement).await.map_err(|e| {
                error!("Failed to create schema: {}", e);
                StorageError::WriteFailed
            })?;
        }
        info!("DatabaseStorage initialized at {}", path_ref.display());

        Ok(Self {
            handle: Handle::current(),
            db,
        })
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.handle.block_on(fut)
    }
}

impl Storage for DatabaseStorage {
    fn insert_attendance(&self, new: &NewAttendance) -> Result<AttendanceRecord, StorageError> {
        let row = attendance::ActiveModel {
            id: NotSet,
            student_id: Set(new.student_id.clone()),
            session_id: Set(new.session_id.clone()),
            timestamp: Set(timestamp_to_column(&new.timestamp)),
            detection_method: Set(new.detection_method.as_str().to_string()),
        };
        self.block_on(async {
            match Entity::insert(row).exec(&self.db).await {
                Ok(res) => {
                    let model = attendance::Model {
                        id: res.last_insert_id,
                        student_id: new.student_id.clone(),
                        session_id: new.session_id.clone(),
                        timestamp: timestamp_to_column(&new.timestamp),
                        detection_method: new.detection_method.as_str().to_string(),
                    };
                    debug!("Inserted attendance row {}", model.id);
                    model_into_record(model)
                }
                Err(e) if is_unique_violation(&e) => Err(StorageError::UniqueViolation),
                Err(e) => {
                    error!("Failed to insert attendance: {}", e);
                    Err(StorageError::WriteFailed)
                }
            }
        })
    }

    fn get_attendance(
        &self,
        filter: Option<AttendanceFilter>,
    ) -> Result<Vec<AttendanceRecord>, StorageError> {
        self.block_on(async {
            let mut query = Entity::find();
            if let Some(f) = filter {
                if let Some(session) = f.session_id {
                    query = query.filter(Column::SessionId.eq(session));
                }
                if let Some(student) = f.student_id {
                    query = query.filter(Column::StudentId.eq(student));
                }
            }
            let rows = query
                .order_by_desc(Column::Timestamp)
                .order_by_desc(Column::Id)
                .all(&self.db)
                .await
                .map_err(|e| {
                    error!("Failed to query attendance: {}", e);
                    StorageError::ReadFailed
                })?;
            rows.into_iter().map(model_into_record).collect()
        })
    }

    fn find_attendance(
        &self,
        student_id: &str,
        session_id: &str,
    ) -> Result<Option<AttendanceRecord>, StorageError> {
        self.block_on(async {
            Entity::find()
                .filter(Column::StudentId.eq(student_id))
                .filter(Column::SessionId.eq(session_id))
                .one(&self.db)
                .await
                .map_err(|e| {
                    error!("Failed to look up attendance: {}", e);
                    StorageError::ReadFailed
                })?
                .map(model_into_record)
                .transpose()
        })
    }

    fn delete_attendance(&self, id: i64) -> Result<bool, StorageError> {
        self.block_on(async {
            let res = Entity::delete_by_id(id).exec(&self.db).await.map_err(|e| {
                error!("Failed to delete attendance {}: {}", id, e);
                StorageError::WriteFailed
            })?;
            Ok(res.rows_affected > 0)
        })
    }

    fn delete_attendance_many(&self, ids: &[i64]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.block_on(async {
            let res = Entity::delete_many()
                .filter(Column::Id.is_in(ids.iter().copied()))
                .exec(&self.db)
                .await
                .map_err(|e| {
                    error!("Failed to delete attendance rows: {}", e);
                    StorageError::WriteFailed
                })?;
            Ok(res.rows_affected as usize)
        })
    }

    fn clear_session(&self, session_id: &str) -> Result<usize, StorageError> {
        self.block_on(async {
            let res = Entity::delete_many()
                .filter(Column::SessionId.eq(session_id))
                .exec(&self.db)
                .await
                .map_err(|e| {
                    error!("Failed to clear session {}: {}", session_id, e);
                    StorageError::WriteFailed
                })?;
            info!("Removed {} row(s) of session {}", res.rows_affected, session_id);
            Ok(res.rows_affected as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::attendance_filter::{by_session, by_student};
    use chrono::{Duration, SubsecRound};
    use serial_test::serial;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::runtime::Runtime;

    // field order matters: the storage goes before its runtime
    struct TestDb {
        storage: DatabaseStorage,
        _rt: Runtime,
        _dir: TempDir,
    }

    fn temp_db() -> TestDb {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let dir = TempDir::new().unwrap();
        let storage = rt
            .block_on(DatabaseStorage::new_file(dir.path().join("test.sqlite3")))
            .unwrap();
        TestDb {
            storage,
            _rt: rt,
            _dir: dir,
        }
    }

    #[test]
    #[serial]
    fn test_db_new_uses_env_path() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("env.sqlite3");
        std::env::set_var("ROLLCALL_DB_PATH", &db_path);
        let storage = rt.block_on(DatabaseStorage::new());
        std::env::remove_var("ROLLCALL_DB_PATH");

        let storage = storage.unwrap();
        assert!(db_path.exists());
        storage.insert_attendance(&new_attendance("alice", "s1")).unwrap();
        drop(storage);
    }

    fn new_attendance(student: &str, session: &str) -> NewAttendance {
        NewAttendance {
            student_id: student.into(),
            session_id: session.into(),
            timestamp: Utc::now().trunc_subsecs(6),
            detection_method: DetectionMethod::Wifi,
        }
    }

    #[test]
    fn test_db_insert_and_filter() {
        let db = temp_db();
        let alice = db.storage.insert_attendance(&new_attendance("alice", "2024-01-01")).unwrap();
        db.storage.insert_attendance(&new_attendance("bob", "2024-01-02")).unwrap();

        let all = db.storage.get_attendance(None).unwrap();
        assert_eq!(all.len(), 2);

        let day_one = db.storage.get_attendance(Some(by_session("2024-01-01"))).unwrap();
        assert_eq!(day_one, vec![alice.clone()]);

        let bobs = db.storage.get_attendance(Some(by_student("bob"))).unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].session_id, "2024-01-02");

        assert_eq!(
            db.storage.find_attendance("alice", "2024-01-01").unwrap(),
            Some(alice)
        );
        assert_eq!(db.storage.find_attendance("alice", "2024-01-02").unwrap(), None);
    }

    #[test]
    fn test_db_unique_index() {
        let db = temp_db();
        db.storage.insert_attendance(&new_attendance("alice", "s1")).unwrap();
        assert_eq!(
            db.storage.insert_attendance(&new_attendance("alice", "s1")),
            Err(StorageError::UniqueViolation)
        );
        assert_eq!(db.storage.get_attendance(None).unwrap().len(), 1);
    }

    #[test]
    fn test_db_concurrent_inserts_keep_one_row() {
        let db = temp_db();
        let storage = Arc::new(db.storage);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                std::thread::spawn(move || storage.insert_attendance(&new_attendance("alice", "s1")))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| r == &Err(StorageError::UniqueViolation)));
        assert_eq!(storage.get_attendance(None).unwrap().len(), 1);
        drop(storage);
        drop(db._rt);
    }

    #[test]
    fn test_db_ordering_newest_first() {
        let db = temp_db();
        let base = Utc::now().trunc_subsecs(6);
        for (i, student) in ["a", "b", "c"].iter().enumerate() {
            let mut new = new_attendance(student, "s1");
            new.timestamp = base + Duration::seconds(i as i64);
            db.storage.insert_attendance(&new).unwrap();
        }
        let students: Vec<String> = db
            .storage
            .get_attendance(Some(by_session("s1")))
            .unwrap()
            .into_iter()
            .map(|r| r.student_id)
            .collect();
        assert_eq!(students, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_db_deletes() {
        let db = temp_db();
        let a = db.storage.insert_attendance(&new_attendance("alice", "s1")).unwrap();
        let b = db.storage.insert_attendance(&new_attendance("bob", "s1")).unwrap();
        db.storage.insert_attendance(&new_attendance("carol", "s2")).unwrap();

        assert!(db.storage.delete_attendance(a.id).unwrap());
        assert!(!db.storage.delete_attendance(a.id).unwrap());
        assert_eq!(db.storage.delete_attendance_many(&[b.id, 777]).unwrap(), 1);
        assert_eq!(db.storage.delete_attendance_many(&[]).unwrap(), 0);
        assert_eq!(db.storage.clear_session("s2").unwrap(), 1);
        assert_eq!(db.storage.clear_session("s2").unwrap(), 0);
        assert!(db.storage.get_attendance(None).unwrap().is_empty());
    }
}
