//! HTTP adapter over the session state and the attendance ledger.
//!
//! Wire names follow the deployed clients: sessions travel as `class_date`, the session
//! state as the "beacon".
pub mod routes;
pub mod types;
pub mod web_server;

pub use web_server::WebServer;
