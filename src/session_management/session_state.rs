use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use crate::configuration::types::StartPolicy;
use crate::error_handling::types::SessionError;

/// Snapshot of the class session: whether attendance is being collected and for which
/// session.
///
/// `session_id` is `Some` exactly when `active` is true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub active: bool,
    pub session_id: Option<String>,
    pub display_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// The session a teacher opens when no identifier is given: today's UTC date.
pub fn default_session_id(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Active/inactive state of attendance collection.
///
/// Two states, INACTIVE (initial) and ACTIVE. `start` moves to ACTIVE (replacing the
/// session id, unless the policy is [`StartPolicy::Reject`]), `stop` moves back to INACTIVE.
/// There is no expiry. The state is held in memory only and starts INACTIVE on every
/// process start.
///
/// Reads and transitions go through a `tokio::sync::watch` channel, so every transition
/// is applied atomically with respect to readers and can be observed with [`subscribe`].
///
/// [`subscribe`]: SessionState::subscribe
pub struct SessionState {
    policy: StartPolicy,
    tx: watch::Sender<SessionStatus>,
}

impl SessionState {
    pub fn new(policy: StartPolicy) -> Self {
        let (tx, _rx) = watch::channel(SessionStatus::default());
        Self { policy, tx }
    }

    /// Opens attendance collection.
    ///
    /// A missing or blank `session_id` defaults to today's date (`YYYY-MM-DD`, UTC).
    /// Under `Replace` an active session is overwritten; its records stay in the ledger
    /// under their own id. Under `Reject` starting a different session while one is active
    /// fails, and re-starting the same id returns the current status unchanged.
    pub fn start(
        &self,
        session_id: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<SessionStatus, SessionError> {
        let now = Utc::now();
        let next = SessionStatus {
            active: true,
            session_id: Some(non_blank(session_id).unwrap_or_else(|| default_session_id(now))),
            display_name: non_blank(display_name),
            started_at: Some(now),
        };

        let mut outcome = Ok(next.clone());
        self.tx.send_if_modified(|current| {
            if current.active && self.policy == StartPolicy::Reject {
                outcome = if current.session_id == next.session_id {
                    Ok(current.clone())
                } else {
                    Err(SessionError::AlreadyActive(
                        current.session_id.clone().unwrap_or_default(),
                    ))
                };
                return false;
            }
            if let Some(previous) = current.session_id.as_deref() {
                debug!("Replacing active session {}", previous);
            }
            *current = next.clone();
            true
        });

        match &outcome {
            Ok(status) => info!(
                "Session {} started",
                status.session_id.as_deref().unwrap_or_default()
            ),
            Err(e) => warn!("Refused to start session: {}", e),
        }
        outcome
    }

    /// Closes attendance collection. Calling it while inactive changes nothing.
    pub fn stop(&self) -> SessionStatus {
        let changed = self.tx.send_if_modified(|current| {
            if *current == SessionStatus::default() {
                return false;
            }
            info!(
                "Session {} stopped",
                current.session_id.as_deref().unwrap_or_default()
            );
            *current = SessionStatus::default();
            true
        });
        if !changed {
            debug!("Stop requested with no active session");
        }
        self.status()
    }

    pub fn status(&self) -> SessionStatus {
        self.tx.borrow().clone()
    }

    /// Id of the active session, `None` when inactive.
    pub fn active_session_id(&self) -> Option<String> {
        let status = self.tx.borrow();
        if status.active {
            status.session_id.clone()
        } else {
            None
        }
    }

    /// Receiver that is notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(StartPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_initial_state_is_inactive() {
        let state = SessionState::default();
        let status = state.status();
        assert!(!status.active);
        assert_eq!(status.session_id, None);
        assert_eq!(state.active_session_id(), None);
    }

    #[test]
    fn test_start_and_stop() {
        let state = SessionState::default();
        let status = state.start(Some("2024-03-10"), Some("Physics")).unwrap();
        assert!(status.active);
        assert_eq!(status.session_id.as_deref(), Some("2024-03-10"));
        assert_eq!(status.display_name.as_deref(), Some("Physics"));
        assert_eq!(state.active_session_id().as_deref(), Some("2024-03-10"));

        let stopped = state.stop();
        assert_eq!(stopped, SessionStatus::default());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let state = SessionState::default();
        state.start(Some("s1"), None).unwrap();
        let first = state.stop();
        let second = state.stop();
        assert_eq!(first, second);
        assert!(!second.active);
        assert_eq!(second.session_id, None);
    }

    #[test]
    fn test_default_session_id_is_utc_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 0).unwrap();
        assert_eq!(default_session_id(now), "2024-03-10");

        let state = SessionState::default();
        let status = state.start(Some("   "), None).unwrap();
        let id = status.session_id.unwrap();
        assert_eq!(id.len(), 10);
        assert_eq!(&id[4..5], "-");
    }

    #[test]
    fn test_replace_policy_overwrites() {
        let state = SessionState::new(StartPolicy::Replace);
        state.start(Some("s1"), None).unwrap();
        let status = state.start(Some("s2"), None).unwrap();
        assert_eq!(status.session_id.as_deref(), Some("s2"));
        assert_eq!(state.active_session_id().as_deref(), Some("s2"));
    }

    #[test]
    fn test_reject_policy() {
        let state = SessionState::new(StartPolicy::Reject);
        state.start(Some("s1"), None).unwrap();
        assert_eq!(
            state.start(Some("s2"), None),
            Err(SessionError::AlreadyActive(String::from("s1")))
        );
        // same id is a no-op
        let again = state.start(Some("s1"), None).unwrap();
        assert_eq!(again.session_id.as_deref(), Some("s1"));

        state.stop();
        assert!(state.start(Some("s2"), None).is_ok());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let state = SessionState::default();
        let mut rx = state.subscribe();

        state.start(Some("s1"), None).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().session_id.as_deref(), Some("s1"));

        state.stop();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().active);

        // a second stop is not a transition
        state.stop();
        assert!(!rx.has_changed().unwrap());
    }
}
