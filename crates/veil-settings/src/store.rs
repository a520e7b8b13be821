//! Settings store
//!
//! Persistent map of (entity, capability) -> bool. Only values that differ
//! from what the entity would inherit are stored; a missing record means
//! "inherit", which for the global entity means enabled.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use veil_storage::{Database, KeyPath};

use crate::capability::Capability;
use crate::entity::Entity;
use crate::remote::RemoteExceptions;
use crate::Result;

/// Namespace marker for settings records
pub const SETTINGS_KEY_PREFIX: &str = "_SETTINGS_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub entity: Entity,
    pub capability: Capability,
    pub value: bool,
}

/// Notification sent after every write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingChange {
    pub entity: Entity,
    pub capability: Capability,
    /// Raw stored value, `None` when the record was removed
    pub stored: Option<bool>,
    /// Stored value with removal normalized to the default (`true`)
    pub value: bool,
}

pub type ChangeHandler = Arc<dyn Fn(&SettingChange) + Send + Sync>;

/// Read-only view of resolved settings
pub trait EffectiveSettings: Send + Sync {
    /// Resolved value: a global `false` wins over everything, then the
    /// entity's own record, then remote exceptions, then `true`.
    fn effective(&self, entity: &Entity, capability: Capability) -> Result<bool>;

    /// Whether the global entity leaves the capability enabled
    fn global_enabled(&self, capability: Capability) -> Result<bool>;
}

pub struct SettingsStore {
    db: Database,
    remote: Arc<RwLock<RemoteExceptions>>,
    handlers: Arc<RwLock<Vec<ChangeHandler>>>,
}

impl SettingsStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            remote: Arc::new(RwLock::new(RemoteExceptions::default())),
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn key_path(entity: &Entity, capability: Capability) -> Result<KeyPath> {
        Ok(KeyPath::new([
            SETTINGS_KEY_PREFIX,
            entity.as_str(),
            capability.as_str(),
        ])?)
    }

    /// Raw stored value, if any
    pub fn get(&self, entity: &Entity, capability: Capability) -> Result<Option<bool>> {
        Ok(self.db.get_value(&Self::key_path(entity, capability)?)?)
    }

    /// Value the entity resolves to when it has no record of its own
    fn baseline(&self, entity: &Entity, capability: Capability) -> Result<bool> {
        match entity {
            Entity::All => Ok(true),
            Entity::Domain(_) => Ok(self.global_enabled(capability)?
                && !self.remote.read().is_disabled(entity, capability)),
        }
    }

    /// Store a value, dropping the record when it matches the baseline
    pub fn set(&self, entity: &Entity, capability: Capability, value: bool) -> Result<()> {
        let path = Self::key_path(entity, capability)?;
        let baseline = self.baseline(entity, capability)?;

        let stored = if value == baseline {
            self.db.remove(&path)?;
            None
        } else {
            self.db.set_value(&path, &value)?;
            Some(value)
        };

        tracing::debug!(
            entity = %entity,
            capability = %capability,
            value,
            stored = ?stored,
            "Setting written"
        );

        self.notify(SettingChange {
            entity: entity.clone(),
            capability,
            stored,
            value: stored.unwrap_or(true),
        });

        Ok(())
    }

    pub fn remove(&self, entity: &Entity, capability: Capability) -> Result<()> {
        let existed = self.db.remove(&Self::key_path(entity, capability)?)?;

        if existed {
            self.notify(SettingChange {
                entity: entity.clone(),
                capability,
                stored: None,
                value: true,
            });
        }

        Ok(())
    }

    /// Remove every record of an entity. Returns the affected capabilities.
    pub fn reset_entity(&self, entity: &Entity) -> Result<Vec<Capability>> {
        let mut removed = Vec::new();

        for (path, _) in self.db.entries(SETTINGS_KEY_PREFIX)? {
            match Self::decode_path(&path) {
                Some((stored_entity, capability)) if &stored_entity == entity => {
                    self.remove(entity, capability)?;
                    removed.push(capability);
                }
                _ => {}
            }
        }

        tracing::info!(entity = %entity, removed = removed.len(), "Reset entity settings");

        Ok(removed)
    }

    /// Remove every stored setting. Returns how many records were dropped.
    pub fn clear(&self) -> Result<usize> {
        let cleared: Vec<(Entity, Capability)> = self
            .db
            .entries(SETTINGS_KEY_PREFIX)?
            .iter()
            .filter_map(|(path, _)| Self::decode_path(path))
            .collect();

        let removed = self.db.clear(SETTINGS_KEY_PREFIX)?;
        for (entity, capability) in cleared {
            self.notify(SettingChange {
                entity,
                capability,
                stored: None,
                value: true,
            });
        }

        tracing::info!(removed, "Cleared all settings");
        Ok(removed)
    }

    fn decode_path(path: &KeyPath) -> Option<(Entity, Capability)> {
        match path.segments() {
            [_, entity, capability] => {
                let entity = Entity::parse(entity).ok()?;
                let capability = capability.parse::<Capability>().ok()?;
                Some((entity, capability))
            }
            _ => None,
        }
    }

    /// Every stored setting plus remote exceptions not overridden locally,
    /// global entity first
    pub fn get_all(&self) -> Result<Vec<Setting>> {
        let mut settings = Vec::new();
        let mut seen: HashSet<(Entity, Capability)> = HashSet::new();

        for (path, value) in self.db.entries(SETTINGS_KEY_PREFIX)? {
            let (entity, capability) = match Self::decode_path(&path) {
                Some(decoded) => decoded,
                None => {
                    tracing::warn!(key = %path, "Skipping unrecognized settings record");
                    continue;
                }
            };
            let value = match value.as_bool() {
                Some(value) => value,
                None => {
                    tracing::warn!(key = %path, "Skipping non-boolean settings record");
                    continue;
                }
            };

            seen.insert((entity.clone(), capability));
            settings.push(Setting {
                entity,
                capability,
                value,
            });
        }

        for (entity, capability) in self.remote.read().entries() {
            if !seen.contains(&(entity.clone(), capability)) {
                settings.push(Setting {
                    entity: entity.clone(),
                    capability,
                    value: false,
                });
            }
        }

        settings.sort_by(|a, b| {
            (&a.entity, a.capability).cmp(&(&b.entity, b.capability))
        });

        Ok(settings)
    }

    /// Domains that currently have any setting
    pub fn known_domains(&self) -> Result<BTreeSet<Entity>> {
        Ok(self
            .get_all()?
            .into_iter()
            .map(|s| s.entity)
            .filter(|e| !e.is_all())
            .collect())
    }

    /// Capabilities that resolve to disabled for an entity, in catalogue order
    pub fn disabled_capabilities(&self, entity: &Entity) -> Result<Vec<Capability>> {
        let mut disabled = Vec::new();
        for capability in Capability::ALL {
            if !self.effective(entity, capability)? {
                disabled.push(capability);
            }
        }
        Ok(disabled)
    }

    pub fn set_remote_exceptions(&self, snapshot: RemoteExceptions) {
        tracing::info!(
            version = ?snapshot.version(),
            exceptions = snapshot.len(),
            "Installed remote setting exceptions"
        );
        *self.remote.write() = snapshot;
    }

    /// Register a change callback. Callbacks run synchronously after each write.
    pub fn on_change<F>(&self, handler: F)
    where
        F: Fn(&SettingChange) + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    fn notify(&self, change: SettingChange) {
        let handlers: Vec<ChangeHandler> = self.handlers.read().iter().cloned().collect();
        for handler in handlers {
            handler(&change);
        }
    }
}

impl EffectiveSettings for SettingsStore {
    fn effective(&self, entity: &Entity, capability: Capability) -> Result<bool> {
        if !self.global_enabled(capability)? {
            return Ok(false);
        }

        match entity {
            Entity::All => Ok(true),
            Entity::Domain(_) => match self.get(entity, capability)? {
                Some(value) => Ok(value),
                None => Ok(!self.remote.read().is_disabled(entity, capability)),
            },
        }
    }

    fn global_enabled(&self, capability: Capability) -> Result<bool> {
        Ok(self.get(&Entity::All, capability)? != Some(false))
    }
}

impl Clone for SettingsStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            remote: Arc::clone(&self.remote),
            handlers: Arc::clone(&self.handlers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn store() -> SettingsStore {
        SettingsStore::new(Database::open_in_memory().unwrap())
    }

    fn domain(name: &str) -> Entity {
        Entity::domain(name).unwrap()
    }

    #[test]
    fn test_defaults_to_enabled() {
        let store = store();
        assert_eq!(store.get(&domain("example.com"), Capability::Gpc).unwrap(), None);
        assert!(store.effective(&domain("example.com"), Capability::Gpc).unwrap());
        assert!(store.effective(&Entity::All, Capability::Gpc).unwrap());
    }

    #[test]
    fn test_global_default_elided() {
        let store = store();
        store.set(&Entity::All, Capability::Gpc, false).unwrap();
        assert_eq!(store.get(&Entity::All, Capability::Gpc).unwrap(), Some(false));

        store.set(&Entity::All, Capability::Gpc, true).unwrap();
        assert_eq!(store.get(&Entity::All, Capability::Gpc).unwrap(), None);
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_global_false_wins() {
        let store = store();
        let site = domain("example.com");

        store.set(&Entity::All, Capability::Ads, false).unwrap();
        store.set(&site, Capability::Ads, true).unwrap();

        // Override is kept but cannot re-enable the capability
        assert_eq!(store.get(&site, Capability::Ads).unwrap(), Some(true));
        assert!(!store.effective(&site, Capability::Ads).unwrap());

        store.set(&Entity::All, Capability::Ads, true).unwrap();
        assert!(store.effective(&site, Capability::Ads).unwrap());
    }

    #[test]
    fn test_redundant_override_elided() {
        let store = store();
        let site = domain("example.com");

        store.set(&site, Capability::Math, true).unwrap();
        assert_eq!(store.get(&site, Capability::Math).unwrap(), None);

        store.set(&Entity::All, Capability::Math, false).unwrap();
        store.set(&site, Capability::Math, false).unwrap();
        assert_eq!(store.get(&site, Capability::Math).unwrap(), None);
    }

    #[test]
    fn test_clear_removes_every_record() {
        let store = store();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        store.on_change(move |change| sink.lock().push(change.clone()));

        store.set(&Entity::All, Capability::Fonts, false).unwrap();
        store.set(&domain("a.com"), Capability::Gpu, false).unwrap();
        changes.lock().clear();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.get_all().unwrap().is_empty());
        assert!(store.known_domains().unwrap().is_empty());

        let changes = changes.lock();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.stored.is_none() && c.value));
    }

    #[test]
    fn test_remote_exceptions() {
        let store = store();
        let site = domain("maps.example");
        store.set_remote_exceptions(
            RemoteExceptions::parse(
                r#"{"version": "1", "setting_exceptions": {"maps.example": ["gpu"]}}"#,
            )
            .unwrap(),
        );

        assert!(!store.effective(&site, Capability::Gpu).unwrap());
        assert_eq!(
            store.get_all().unwrap(),
            vec![Setting {
                entity: site.clone(),
                capability: Capability::Gpu,
                value: false
            }]
        );

        // Matching the remote value stores nothing; overriding it does
        store.set(&site, Capability::Gpu, false).unwrap();
        assert_eq!(store.get(&site, Capability::Gpu).unwrap(), None);
        store.set(&site, Capability::Gpu, true).unwrap();
        assert_eq!(store.get(&site, Capability::Gpu).unwrap(), Some(true));
        assert!(store.effective(&site, Capability::Gpu).unwrap());
        assert_eq!(store.get_all().unwrap()[0].value, true);
    }

    #[test]
    fn test_get_all_orders_global_first() {
        let store = store();
        store.set(&domain("b.com"), Capability::Gpc, false).unwrap();
        store.set(&domain("a.com"), Capability::Math, false).unwrap();
        store.set(&Entity::All, Capability::Fonts, false).unwrap();

        let entities: Vec<Entity> = store.get_all().unwrap().into_iter().map(|s| s.entity).collect();
        assert_eq!(entities, vec![Entity::All, domain("a.com"), domain("b.com")]);
        assert_eq!(
            store.known_domains().unwrap().into_iter().collect::<Vec<_>>(),
            vec![domain("a.com"), domain("b.com")]
        );
    }

    #[test]
    fn test_change_notifications_normalized() {
        let store = store();
        let seen: Arc<Mutex<Vec<SettingChange>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.on_change(move |change| sink.lock().push(change.clone()));

        let site = domain("example.com");
        store.set(&site, Capability::Gpc, false).unwrap();
        store.set(&site, Capability::Gpc, true).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].stored, Some(false));
        assert!(!seen[0].value);
        assert_eq!(seen[1].stored, None);
        assert!(seen[1].value);
    }

    #[test]
    fn test_reset_entity() {
        let store = store();
        let site = domain("example.com");
        store.set(&site, Capability::Gpc, false).unwrap();
        store.set(&site, Capability::Fonts, false).unwrap();
        store.set(&domain("other.com"), Capability::Fonts, false).unwrap();

        let removed = store.reset_entity(&site).unwrap();
        assert_eq!(removed, vec![Capability::Fonts, Capability::Gpc]);
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_capabilities() {
        let store = store();
        let site = domain("example.com");
        store.set(&site, Capability::Timezone, false).unwrap();
        store.set(&Entity::All, Capability::Battery, false).unwrap();

        assert_eq!(
            store.disabled_capabilities(&site).unwrap(),
            vec![Capability::Battery, Capability::Timezone]
        );
    }
}
