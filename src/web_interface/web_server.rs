use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info};
use warp::{Filter, Reply};

use super::routes::*;
use crate::error_handling::types::WebError;
use crate::session_management::attendance_ledger::AttendanceLedger;

/// Web server for the attendance API
///
/// Teacher routes (beacon start/stop and every delete) require the `x-teacher-token`
/// header when a token is configured.
pub struct WebServer {
    ledger: Arc<AttendanceLedger>,
    teacher_token: Option<Arc<str>>,
}

impl WebServer {
    pub fn new(ledger: Arc<AttendanceLedger>, teacher_token: Option<String>) -> Self {
        Self {
            ledger,
            teacher_token: teacher_token.map(Arc::from),
        }
    }

    /// Every route, with CORS, rejection handling and request logging applied
    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        let ledger = self.ledger.clone();
        let state = ledger.sessions().clone();
        let token = self.teacher_token.clone();

        let beacon = beacon_status_route(state.clone())
            .or(beacon_start_route(state.clone(), token.clone()))
            .or(beacon_stop_route(state, token.clone()));

        let attendance = register_route(ledger.clone())
            .or(check_route(ledger.clone()))
            .or(list_route(ledger.clone()))
            .or(delete_many_route(ledger.clone(), token.clone()))
            .or(clear_route(ledger.clone(), token.clone()))
            .or(delete_route(ledger, token));

        let cors = warp::cors()
            .allow_any_origin()
            .allow_headers(vec!["content-type", TEACHER_TOKEN_HEADER])
            .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"]);

        health_route()
            .or(beacon)
            .or(attendance)
            .with(cors)
            .recover(handle_rejection)
            .with(warp::log("rollcall::web"))
    }

    /// Serves until the future is dropped
    pub async fn start(&self, addr: SocketAddr) -> Result<(), WebError> {
        // fail with an error instead of a panic inside warp when the port is taken
        let probe = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            error!("Unable to bind {}: {}", addr, e);
            WebError::BindFailed(format!("{}: {}", addr, e))
        })?;
        drop(probe);

        if self.teacher_token.is_none() {
            info!("No teacher token configured, teacher routes are open");
        }
        info!("Web server listening on http://{}", addr);
        warp::serve(self.routes()).run(addr).await;
        Ok(())
    }
}
