//! Veil Core
//!
//! Entry point of the rule-synchronization engine: configuration, logging
//! and the facade that ties settings, rules and cross-context signals
//! together.

mod config;
mod error;
mod veil;

pub use config::Config;
pub use error::CoreError;
pub use veil::{NavigationEvent, Status, Veil};

// Re-export core components
pub use veil_rules::{
    EngineError, IdRegistry, InMemoryEngine, ManagerConfig, Rule, RuleAction, RuleCondition,
    RuleEngine, RuleError, RuleId, RuleManager, SetupReport,
};
pub use veil_settings::{
    Capability, Entity, RemoteExceptions, RuleCategory, Setting, SettingChange, SettingsError,
    SettingsStore,
};
pub use veil_signal::{
    ContextId, FrameKind, HandshakeParty, Marker, Requester, Responder, SecretSlot,
    SharedEnvironment, SignalError, SignalReading,
};
pub use veil_storage::{Database, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
