//! SeaORM entity model used by the database storage backend.
//!
//! Maps to the `attendance` table created by `database_storage`, which also carries a
//! unique index on `(student_id, session_id)`.

use sea_orm::entity::prelude::*;

/// Attendance table entity model.
///
/// Timestamps and detection methods are stored as strings for portability.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "attendance")]
pub struct Model {
    /// Auto-increment row id
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Free-text student identifier
    pub student_id: String,
    /// Session the record belongs to (usually a calendar date)
    pub session_id: String,
    /// RFC3339 creation timestamp, UTC, microsecond precision
    pub timestamp: String,
    /// "BLE", "WIFI" or "MANUAL"
    pub detection_method: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
