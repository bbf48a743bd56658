use std::sync::Arc;

use log::{debug, error, info};

use crate::configuration::config::Config;
use crate::configuration::types::StorageBackend;
use crate::error_handling::types::*;
use crate::session_management::attendance_ledger::AttendanceLedger;
use crate::session_management::session_state::SessionState;
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::file_storage::FileStorage;
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::storage_trait::Storage;
use crate::web_interface::WebServer;

/// Owns the configuration and builds the running service from it:
/// storage backend, session state, ledger and web server.
pub struct Controller {
    pub config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate().map_err(|e| {
            error!("Invalid configuration: {}", e);
            ControllerError::ConfigurationError(e)
        })?;
        debug!("Controller created with {:?}", config);
        Ok(Self { config })
    }

    /// Opens the configured record store.
    pub async fn build_storage(&self) -> Result<Arc<dyn Storage>, ControllerError> {
        let storage = &self.config.storage;
        let backend: Arc<dyn Storage> = match (storage.backend, storage.path.as_ref()) {
            (StorageBackend::Memory, _) => {
                info!("Using in-memory storage, records are lost on exit");
                Arc::new(MemoryStorage::new())
            }
            (StorageBackend::File, Some(path)) => Arc::new(FileStorage::new(path)?),
            (StorageBackend::File, None) => Arc::new(FileStorage::new_default()?),
            (StorageBackend::Database, Some(path)) => Arc::new(DatabaseStorage::new_file(path).await?),
            (StorageBackend::Database, None) => Arc::new(DatabaseStorage::new().await?),
        };
        Ok(backend)
    }

    /// Builds the ledger on top of a fresh, inactive session state.
    pub async fn build_ledger(&self) -> Result<Arc<AttendanceLedger>, ControllerError> {
        let storage = self.build_storage().await?;
        let sessions = Arc::new(SessionState::new(self.config.session.start_policy));
        Ok(Arc::new(AttendanceLedger::new(storage, sessions)))
    }

    /// Runs the web server until it stops or fails.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        info!("Starting rollcall");
        let addr = self.config.socket_addr()?;
        let ledger = self.build_ledger().await?;
        let server = WebServer::new(ledger, self.config.auth.teacher_token.clone());
        server.start(addr).await?;
        info!("Web server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::DetectionMethod;
    use serial_test::serial;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.port = 0;
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::ConfigurationError(ConfigError::NotInRange(_)))
        ));
    }

    #[tokio::test]
    async fn test_memory_ledger_starts_inactive() {
        let controller = Controller::new(Config::default()).unwrap();
        let ledger = controller.build_ledger().await.unwrap();
        assert!(!ledger.sessions().status().active);
        assert!(ledger.list(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_backend_persists_across_controllers() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.backend = StorageBackend::File;
        config.storage.path = Some(PathBuf::from(dir.path()));

        let first = Controller::new(config.clone()).unwrap().build_ledger().await.unwrap();
        first.sessions().start(Some("s1"), None).unwrap();
        first.register_active("alice", DetectionMethod::Manual).unwrap();

        let second = Controller::new(config).unwrap().build_ledger().await.unwrap();
        // records survive, the session does not
        assert_eq!(second.list(Some("s1")).unwrap().len(), 1);
        assert!(!second.sessions().status().active);
    }

    #[tokio::test]
    #[serial]
    async fn test_file_backend_without_path_uses_env_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.backend = StorageBackend::File;

        std::env::set_var("ROLLCALL_FILE_STORAGE_DIR", dir.path());
        let ledger = Controller::new(config).unwrap().build_ledger().await;
        std::env::remove_var("ROLLCALL_FILE_STORAGE_DIR");

        let ledger = ledger.unwrap();
        ledger.sessions().start(Some("s1"), None).unwrap();
        ledger.register_active("alice", DetectionMethod::Ble).unwrap();
        assert!(dir.path().join("attendance.json").exists());
    }
}
