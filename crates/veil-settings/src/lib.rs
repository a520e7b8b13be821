//! Veil Settings
//!
//! Per-entity boolean protection settings:
//! - Closed capability catalogue with static rule-category participation
//! - Entities: registrable domains plus the global-default sentinel
//! - Persistent store with redundant-override elision
//! - Effective resolution: a global `false` always wins
//! - Remotely published per-site exceptions

mod capability;
mod entity;
mod error;
mod remote;
mod store;

pub use capability::{Capability, RuleCategory};
pub use entity::{registrable_domain, Entity, ALL_ENTITIES};
pub use error::SettingsError;
pub use remote::{RemoteConfig, RemoteConfigClient, RemoteExceptions, DEFAULT_CACHE_TTL};
pub use store::{
    ChangeHandler, EffectiveSettings, Setting, SettingChange, SettingsStore, SETTINGS_KEY_PREFIX,
};

pub type Result<T> = std::result::Result<T, SettingsError>;
