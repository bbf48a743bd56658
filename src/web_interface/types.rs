use serde::{Deserialize, Serialize};

use crate::session_management::session_state::SessionStatus;
use crate::storage::types::AttendanceRecord;

/// Error and acknowledgement payload
#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct BeaconStatusResponse {
    pub active: bool,
    pub class_date: Option<String>,
    pub name: Option<String>,
}

impl From<SessionStatus> for BeaconStatusResponse {
    fn from(status: SessionStatus) -> Self {
        Self {
            active: status.active,
            class_date: status.session_id,
            name: status.display_name,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BeaconStartRequest {
    pub class_date: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BeaconChangeResponse {
    pub message: String,
    pub active: bool,
    pub class_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub student_id: String,
    pub method: Option<String>,
    pub class_date: Option<String>,
}

/// Wire shape of an attendance record. The session id travels as `class_date`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceResponse {
    pub id: i64,
    pub student_id: String,
    pub class_date: String,
    pub timestamp: String,
    pub detection_method: String,
}

impl From<AttendanceRecord> for AttendanceResponse {
    fn from(record: AttendanceRecord) -> Self {
        Self {
            id: record.id,
            student_id: record.student_id,
            class_date: record.session_id,
            timestamp: record
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            detection_method: record.detection_method.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    #[serde(flatten)]
    pub record: AttendanceResponse,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub class_date: Option<String>,
    pub date: Option<String>,
    pub student_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    #[serde(default)]
    pub student_id: String,
    pub class_date: Option<String>,
}

/// `activeClass` repeats `activeSession` for older clients.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub has_attendance: bool,
    pub active_session: Option<String>,
    pub active_class: Option<String>,
}

impl CheckResponse {
    pub fn new(has_attendance: bool, active_session: Option<String>) -> Self {
        Self {
            has_attendance,
            active_class: active_session.clone(),
            active_session,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteManyRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearQuery {
    pub date: Option<String>,
    pub class_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedCountResponse {
    pub message: String,
    pub deleted_count: usize,
}
