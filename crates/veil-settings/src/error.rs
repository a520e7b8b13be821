//! Settings error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Storage error: {0}")]
    Storage(#[from] veil_storage::StorageError),

    #[error("Invalid entity: {0:?}")]
    InvalidEntity(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Remote config request failed: {0}")]
    Remote(#[from] reqwest::Error),

    #[error("Remote config is malformed: {0}")]
    RemoteFormat(#[from] serde_json::Error),
}
