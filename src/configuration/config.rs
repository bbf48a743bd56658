use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Command-line arguments.
///
/// Every option overrides the matching key of the configuration file, and every option can
/// also be supplied through its environment variable.
///
/// # Examples
///
/// ```
/// use clap::Parser;
/// use rollcall::configuration::CliArgs;
///
/// let args = CliArgs::try_parse_from(["rollcall", "--port", "8080"]).unwrap();
/// assert_eq!(args.port, Some(8080));
/// ```
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "rollcall")]
#[command(version)]
#[command(about = "Classroom attendance tracking backend")]
pub struct CliArgs {
    /// Path to a TOML configuration file
    ///
    /// When omitted, built-in defaults are used (in-memory storage, port 5000)
    pub config_file: Option<PathBuf>,

    /// Network address to bind the HTTP server to
    ///
    /// # Command Line
    /// Use `--bind-address <ADDRESS>` or `ROLLCALL_BIND_ADDRESS`
    #[arg(long, env = "ROLLCALL_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Port of the HTTP server
    ///
    /// # Command Line
    /// Use `--port <PORT>` or `ROLLCALL_PORT`
    #[arg(long, env = "ROLLCALL_PORT")]
    pub port: Option<u16>,

    /// Record store backing the ledger
    #[arg(long, value_enum, env = "ROLLCALL_STORAGE_BACKEND")]
    pub storage_backend: Option<StorageBackend>,

    /// Directory (file backend) or SQLite file (database backend)
    #[arg(long, env = "ROLLCALL_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Behaviour of `start` while a session is active
    #[arg(long, value_enum, env = "ROLLCALL_START_POLICY")]
    pub start_policy: Option<StartPolicy>,

    /// Shared secret required in `x-teacher-token` for teacher operations
    #[arg(long, env = "ROLLCALL_TEACHER_TOKEN")]
    pub teacher_token: Option<String>,
}

/// Application configuration.
///
/// Loaded from a TOML file where every key is optional, then patched with [`CliArgs`].
///
/// ```toml
/// bind_address = "0.0.0.0"
/// port = 5000
///
/// [storage]
/// backend = "database"
/// path = "/var/lib/rollcall/attendance.sqlite3"
///
/// [session]
/// start_policy = "replace"
///
/// [auth]
/// teacher_token = "change-me"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Without a path, `file` uses `ROLLCALL_FILE_STORAGE_DIR` and `database` uses
    /// `ROLLCALL_DB_PATH`, each falling back to the working directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub start_policy: StartPolicy,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub teacher_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: 5000,
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Builds the effective configuration: file (if any), then CLI/env overrides, then
    /// validation.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config_file {
            Some(path) => Self::from_file(path)?,
            None => {
                info!("No configuration file given, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        debug!("Read configuration file {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(addr) = &args.bind_address {
            self.bind_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(backend) = args.storage_backend {
            self.storage.backend = backend;
        }
        if let Some(path) = &args.storage_path {
            self.storage.path = Some(path.clone());
        }
        if let Some(policy) = args.start_policy {
            self.session.start_policy = policy;
        }
        if let Some(token) = &args.teacher_token {
            self.auth.teacher_token = Some(token.clone());
        }
        // an empty token means "no auth", same as leaving it out
        if self.auth.teacher_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            self.auth.teacher_token = None;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_address
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::BadIPFormatting(format!("{}: {}", self.bind_address, e)))?;
        if self.port == 0 {
            return Err(ConfigError::NotInRange(String::from(
                "port must be between 1 and 65535",
            )));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .bind_address
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::BadIPFormatting(format!("{}: {}", self.bind_address, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
