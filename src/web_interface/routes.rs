use std::convert::Infallible;
use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::{Filter, Rejection, Reply};

use super::types::*;
use crate::error_handling::types::{LedgerError, SessionError};
use crate::session_management::attendance_ledger::AttendanceLedger;
use crate::session_management::session_state::SessionState;
use crate::storage::attendance_filter::by_student;
use crate::storage::types::{AttendanceFilter, DetectionMethod};

/// Header carrying the shared teacher secret
pub const TEACHER_TOKEN_HEADER: &str = "x-teacher-token";

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Rejection raised when a teacher route is called without the right token
#[derive(Debug)]
pub struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Rejection raised when a declared body exceeds the limit
#[derive(Debug)]
pub struct BodyTooLarge;

impl warp::reject::Reject for BodyTooLarge {}

fn json_response<T: Serialize>(body: &T, status: StatusCode) -> Response {
    reply::with_status(reply::json(body), status).into_response()
}

fn message_response(message: impl Into<String>, status: StatusCode) -> Response {
    json_response(&ApiMessage::new(message), status)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// HTTP status for a ledger failure
pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Validation(_) | LedgerError::PreconditionFailed(_) => StatusCode::BAD_REQUEST,
        LedgerError::DuplicateRegistration { .. } => StatusCode::CONFLICT,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ledger_error_response(err: &LedgerError) -> Response {
    let status = status_for(err);
    if let LedgerError::Internal(e) = err {
        // detail stays in the log
        error!("Request failed: {}", e);
        return message_response("Internal server error", status);
    }
    message_response(err.to_string(), status)
}

/// Runs a ledger operation on the blocking pool and turns its failure into a response.
async fn with_ledger<T, F>(ledger: Arc<AttendanceLedger>, op: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&AttendanceLedger) -> Result<T, LedgerError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || op(ledger.as_ref())).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ledger_error_response(&e)),
        Err(e) => {
            error!("Ledger task failed: {}", e);
            Err(message_response(
                "Internal server error",
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

/// `true` when no token is configured or the given one matches.
pub fn is_authorized(expected: Option<&str>, given: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(token) => given == Some(token),
    }
}

/// Filter guarding the teacher routes
pub fn teacher_only(
    expected: Option<Arc<str>>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>(TEACHER_TOKEN_HEADER)
        .and_then(move |given: Option<String>| {
            let expected = expected.clone();
            async move {
                if is_authorized(expected.as_deref(), given.as_deref()) {
                    Ok(())
                } else {
                    warn!("Teacher route called without a valid token");
                    Err(warp::reject::custom(Unauthorized))
                }
            }
        })
        .untuple_one()
}

/// Rejects a declared `content-length` above `limit`. Unlike
/// `warp::body::content_length_limit`, requests without the header pass.
pub fn optional_length_limit(limit: u64) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and_then(move |length: Option<u64>| async move {
            match length {
                Some(length) if length > limit => {
                    warn!("Request body of {} bytes refused", length);
                    Err(warp::reject::custom(BodyTooLarge))
                }
                _ => Ok(()),
            }
        })
        .untuple_one()
}

// Handlers

pub async fn beacon_status(state: Arc<SessionState>) -> Response {
    json_response(&BeaconStatusResponse::from(state.status()), StatusCode::OK)
}

/// An empty body starts today's session.
pub async fn beacon_start(state: Arc<SessionState>, body: impl AsRef<[u8]>) -> Response {
    let body = body.as_ref();
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        BeaconStartRequest::default()
    } else {
        match serde_json::from_slice::<BeaconStartRequest>(body) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid start request: {}", e);
                return message_response(
                    format!("Invalid request body: {}", e),
                    StatusCode::BAD_REQUEST,
                );
            }
        }
    };

    match state.start(request.class_date.as_deref(), request.name.as_deref()) {
        Ok(status) => {
            let class_date = status.session_id.clone();
            json_response(
                &BeaconChangeResponse {
                    message: format!(
                        "Beacon started for {}",
                        class_date.as_deref().unwrap_or_default()
                    ),
                    active: status.active,
                    class_date,
                },
                StatusCode::OK,
            )
        }
        Err(e @ SessionError::AlreadyActive(_)) => message_response(e.to_string(), StatusCode::CONFLICT),
    }
}

pub async fn beacon_stop(state: Arc<SessionState>) -> Response {
    let status = state.stop();
    json_response(
        &BeaconChangeResponse {
            message: String::from("Beacon stopped"),
            active: status.active,
            class_date: status.session_id,
        },
        StatusCode::OK,
    )
}

pub async fn register_attendance(ledger: Arc<AttendanceLedger>, body: RegisterRequest) -> Response {
    let method = match body.method.as_deref().map(str::parse::<DetectionMethod>) {
        None => DetectionMethod::default(),
        Some(Ok(method)) => method,
        Some(Err(e)) => {
            warn!("Registration refused: {}", e);
            return message_response(e, StatusCode::BAD_REQUEST);
        }
    };
    let class_date = non_blank(body.class_date);

    let result = with_ledger(ledger, move |ledger| match class_date {
        Some(date) => ledger.register(&body.student_id, &date, method),
        None => ledger.register_active(&body.student_id, method),
    })
    .await;
    match result {
        Ok(record) => json_response(
            &RegisterResponse {
                message: String::from("Attendance registered"),
                record: record.into(),
            },
            StatusCode::CREATED,
        ),
        Err(response) => response,
    }
}

pub async fn list_attendance(ledger: Arc<AttendanceLedger>, query: ListQuery) -> Response {
    let session_id = non_blank(query.class_date).or_else(|| non_blank(query.date));
    let student_id = non_blank(query.student_id);

    let result = with_ledger(ledger, move |ledger| match student_id {
        None => ledger.list(session_id.as_deref()),
        Some(student_id) => ledger.list_filtered(AttendanceFilter {
            session_id,
            ..by_student(student_id)
        }),
    })
    .await;
    match result {
        Ok(records) => {
            let body: Vec<AttendanceResponse> = records.into_iter().map(Into::into).collect();
            json_response(&body, StatusCode::OK)
        }
        Err(response) => response,
    }
}

pub async fn check_attendance(ledger: Arc<AttendanceLedger>, query: CheckQuery) -> Response {
    let class_date = non_blank(query.class_date);
    let result = with_ledger(ledger, move |ledger| {
        ledger.check_registered(&query.student_id, class_date.as_deref())
    })
    .await;
    match result {
        Ok(check) => json_response(
            &CheckResponse::new(check.has_attendance, check.active_session),
            StatusCode::OK,
        ),
        Err(response) => response,
    }
}

pub async fn delete_attendance(ledger: Arc<AttendanceLedger>, id: i64) -> Response {
    match with_ledger(ledger, move |ledger| ledger.delete_one(id)).await {
        Ok(_) => message_response(format!("Attendance {} deleted", id), StatusCode::OK),
        Err(response) => response,
    }
}

pub async fn delete_many_attendance(
    ledger: Arc<AttendanceLedger>,
    body: DeleteManyRequest,
) -> Response {
    let requested = body.ids.len();
    match with_ledger(ledger, move |ledger| ledger.delete_many(&body.ids)).await {
        Ok(deleted_count) => json_response(
            &DeletedCountResponse {
                message: format!("Deleted {} of {} record(s)", deleted_count, requested),
                deleted_count,
            },
            StatusCode::OK,
        ),
        Err(response) => response,
    }
}

pub async fn clear_attendance(ledger: Arc<AttendanceLedger>, query: ClearQuery) -> Response {
    let session_id = non_blank(query.date)
        .or_else(|| non_blank(query.class_date))
        .unwrap_or_default();
    let result = with_ledger(ledger, {
        let session_id = session_id.clone();
        move |ledger| ledger.clear_by_session(&session_id)
    })
    .await;
    match result {
        Ok(deleted_count) => json_response(
            &DeletedCountResponse {
                message: format!("Cleared attendance of {}", session_id),
                deleted_count,
            },
            StatusCode::OK,
        ),
        Err(response) => response,
    }
}

/// Turns rejections into JSON errors
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, String::from("Not found"))
    } else if err.find::<Unauthorized>().is_some() {
        (StatusCode::UNAUTHORIZED, String::from("Teacher token required"))
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, format!("Invalid query: {}", e))
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, String::from("Content-Length header required"))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some()
        || err.find::<BodyTooLarge>().is_some()
    {
        (StatusCode::PAYLOAD_TOO_LARGE, String::from("Request body too large"))
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, String::from("Method not allowed"))
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            String::from("Internal server error"),
        )
    };
    Ok(message_response(message, status))
}

// Filters

/// GET /
pub fn health_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .map(|| "rollcall attendance service is running")
}

/// GET /api/beacon/status
pub fn beacon_status_route(
    state: Arc<SessionState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "beacon" / "status")
        .and(warp::get())
        .and_then(move || {
            let state = state.clone();
            async move { Ok::<_, Rejection>(beacon_status(state).await) }
        })
}

/// POST /api/beacon/start
pub fn beacon_start_route(
    state: Arc<SessionState>,
    token: Option<Arc<str>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "beacon" / "start")
        .and(warp::post())
        .and(teacher_only(token))
        .and(optional_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and_then(move |body| {
            let state = state.clone();
            async move {
                info!("Beacon start requested");
                Ok::<_, Rejection>(beacon_start(state, body).await)
            }
        })
}

/// POST /api/beacon/stop
pub fn beacon_stop_route(
    state: Arc<SessionState>,
    token: Option<Arc<str>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "beacon" / "stop")
        .and(warp::post())
        .and(teacher_only(token))
        .and_then(move || {
            let state = state.clone();
            async move { Ok::<_, Rejection>(beacon_stop(state).await) }
        })
}

/// POST /api/attendance/register
pub fn register_route(
    ledger: Arc<AttendanceLedger>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "attendance" / "register")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and_then(move |body: RegisterRequest| {
            let ledger = ledger.clone();
            async move { Ok::<_, Rejection>(register_attendance(ledger, body).await) }
        })
}

/// GET /api/attendance
pub fn list_route(
    ledger: Arc<AttendanceLedger>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "attendance")
        .and(warp::get())
        .and(warp::query::<ListQuery>())
        .and_then(move |query: ListQuery| {
            let ledger = ledger.clone();
            async move { Ok::<_, Rejection>(list_attendance(ledger, query).await) }
        })
}

/// GET /api/attendance/check
pub fn check_route(
    ledger: Arc<AttendanceLedger>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "attendance" / "check")
        .and(warp::get())
        .and(warp::query::<CheckQuery>())
        .and_then(move |query: CheckQuery| {
            let ledger = ledger.clone();
            async move { Ok::<_, Rejection>(check_attendance(ledger, query).await) }
        })
}

/// DELETE /api/attendance/:id and DELETE /api/attendance/delete/:id
pub fn delete_route(
    ledger: Arc<AttendanceLedger>,
    token: Option<Arc<str>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let by_id = warp::path!("api" / "attendance" / i64);
    let legacy = warp::path!("api" / "attendance" / "delete" / i64);
    by_id
        .or(legacy)
        .unify()
        .and(warp::delete())
        .and(teacher_only(token))
        .and_then(move |id: i64| {
            let ledger = ledger.clone();
            async move { Ok::<_, Rejection>(delete_attendance(ledger, id).await) }
        })
}

/// DELETE /api/attendance/delete-multiple
pub fn delete_many_route(
    ledger: Arc<AttendanceLedger>,
    token: Option<Arc<str>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "attendance" / "delete-multiple")
        .and(warp::delete())
        .and(teacher_only(token))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and_then(move |body: DeleteManyRequest| {
            let ledger = ledger.clone();
            async move { Ok::<_, Rejection>(delete_many_attendance(ledger, body).await) }
        })
}

/// DELETE /api/attendance/clear
pub fn clear_route(
    ledger: Arc<AttendanceLedger>,
    token: Option<Arc<str>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "attendance" / "clear")
        .and(warp::delete())
        .and(teacher_only(token))
        .and(warp::query::<ClearQuery>())
        .and_then(move |query: ClearQuery| {
            let ledger = ledger.clone();
            async move { Ok::<_, Rejection>(clear_attendance(ledger, query).await) }
        })
}
