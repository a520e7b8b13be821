//! Core error types

use thiserror::Error;

use veil_signal::ContextId;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] veil_storage::StorageError),

    #[error("Settings error: {0}")]
    Settings(#[from] veil_settings::SettingsError),

    #[error("Rule error: {0}")]
    Rules(#[from] veil_rules::RuleError),

    #[error("Signal error: {0}")]
    Signal(#[from] veil_signal::SignalError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Child context {0} reported without an owner")]
    MissingOwner(ContextId),
}
