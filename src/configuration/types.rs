use clap::ValueEnum;
use serde::Deserialize;

/// Which record store backs the attendance ledger.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Records live in process memory and are lost on restart
    #[default]
    Memory,
    /// Single JSON document on disk
    File,
    /// SQLite database through SeaORM
    Database,
}

/// What `start` does when a session is already active.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StartPolicy {
    /// Overwrite the active session with the new one
    #[default]
    Replace,
    /// Refuse until the active session is stopped
    Reject,
}
