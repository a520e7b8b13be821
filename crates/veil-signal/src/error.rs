//! Signal error types

use std::time::Duration;
use thiserror::Error;

use crate::context::ContextId;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Settings error: {0}")]
    Settings(#[from] veil_settings::SettingsError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown context: {0}")]
    UnknownContext(ContextId),

    #[error("No responder is listening on the private channel")]
    NoResponder,

    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    #[error("Private channel closed")]
    ChannelClosed,

    #[error("Responder failed: {0}")]
    Responder(String),
}
