use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a student claimed to be present. Carried on the record, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetectionMethod {
    #[default]
    #[serde(rename = "BLE")]
    Ble,
    #[serde(rename = "WIFI")]
    Wifi,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Ble => "BLE",
            DetectionMethod::Wifi => "WIFI",
            DetectionMethod::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BLE" => Ok(DetectionMethod::Ble),
            "WIFI" => Ok(DetectionMethod::Wifi),
            "MANUAL" => Ok(DetectionMethod::Manual),
            other => Err(format!("unknown detection method '{}'", other)),
        }
    }
}

/// One student's presence in one session.
///
/// At most one record exists per `(student_id, session_id)`; records are never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub detection_method: DetectionMethod,
}

/// A record before the backend has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendance {
    pub student_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub detection_method: DetectionMethod,
}

impl NewAttendance {
    pub fn into_record(self, id: i64) -> AttendanceRecord {
        AttendanceRecord {
            id,
            student_id: self.student_id,
            session_id: self.session_id,
            timestamp: self.timestamp,
            detection_method: self.detection_method,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceFilter {
    pub session_id: Option<String>,
    pub student_id: Option<String>,
}

impl AttendanceFilter {
    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        if let Some(ref session) = self.session_id {
            if &record.session_id != session {
                return false;
            }
        }
        if let Some(ref student) = self.student_id {
            if &record.student_id != student {
                return false;
            }
        }
        true
    }
}

/// Newest first; records sharing a timestamp fall back to descending id.
pub fn sort_newest_first(records: &mut [AttendanceRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
}
