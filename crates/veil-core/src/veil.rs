//! Main engine facade
//!
//! Owns the settings store, the rule manager and the signal hub, and routes
//! host events (setting toggles, navigations, context teardown) to them.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use veil_rules::{IdRegistry, Rule, RuleEngine, RuleManager, SetupReport};
use veil_settings::{
    Capability, EffectiveSettings, Entity, RemoteConfigClient, Setting, SettingChange,
    SettingsError, SettingsStore,
};
use veil_signal::{
    resolve_disabled_capabilities, ContextId, FrameKind, Marker, Requester, Responder,
    SharedEnvironment, SignalHub, SignalReading,
};
use veil_storage::Database;

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A navigation committed in some context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub context: ContextId,
    /// Owning top-level context, for child frames and workers
    pub owner: Option<ContextId>,
    pub url: String,
    pub frame: FrameKind,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Status {
    pub last_setup: Option<DateTime<Utc>>,
    pub last_remote_refresh: Option<DateTime<Utc>>,
    pub remote_version: Option<String>,
}

pub struct Veil {
    config: Config,
    store: SettingsStore,
    manager: RuleManager,
    signals: SignalHub,
    remote: Option<RemoteConfigClient>,
    changes: broadcast::Sender<SettingChange>,
    status: RwLock<Status>,
}

impl Veil {
    /// Open the configured database and wire everything to `engine`
    pub fn new(config: Config, engine: Arc<dyn RuleEngine>) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&config.database_path)?;

        Self::with_database(config, db, engine)
    }

    pub fn with_database(config: Config, db: Database, engine: Arc<dyn RuleEngine>) -> Result<Self> {
        let store = SettingsStore::new(db);

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let sender = changes.clone();
        store.on_change(move |change| {
            // No subscribers is fine
            let _ = sender.send(change.clone());
        });

        let manager = RuleManager::new(
            store.clone(),
            engine,
            Arc::new(IdRegistry::new()),
            config.manager_config(),
        );
        let signals = SignalHub::new(Arc::new(store.clone()));
        let remote = config
            .remote_config_url
            .as_ref()
            .map(|url| RemoteConfigClient::new(url.clone(), config.remote_cache_ttl()));

        Ok(Self {
            config,
            store,
            manager,
            signals,
            remote,
            changes,
            status: RwLock::new(Status::default()),
        })
    }

    /// Pull remote exceptions (best effort) and resync every rule
    pub async fn initialize(&self) -> Result<SetupReport> {
        if let Some(client) = &self.remote {
            match client.latest().await {
                Ok(snapshot) => self.install_remote(snapshot),
                Err(e) => {
                    tracing::warn!(url = %client.url(), error = %e, "Remote exceptions unavailable")
                }
            }
        }
        self.setup().await
    }

    async fn setup(&self) -> Result<SetupReport> {
        let report = self.manager.setup_all().await?;
        self.status.write().last_setup = Some(Utc::now());
        Ok(report)
    }

    fn install_remote(&self, snapshot: veil_settings::RemoteExceptions) {
        {
            let mut status = self.status.write();
            status.last_remote_refresh = Some(Utc::now());
            status.remote_version = snapshot.version().map(str::to_string);
        }
        self.store.set_remote_exceptions(snapshot);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> Status {
        self.status.read().clone()
    }

    fn parse(entity: &str, capability: &str) -> Result<(Entity, Capability)> {
        let entity = Entity::parse(entity)?;
        let capability = capability
            .parse::<Capability>()
            .map_err(|_| SettingsError::UnknownCapability(capability.to_string()))?;
        Ok((entity, capability))
    }

    /// Toggle a capability for an entity (`_ALL_DOMAINS_` for the global
    /// default). Invalid input is rejected before any rule is touched.
    pub async fn apply_update(&self, entity: &str, capability: &str, value: bool) -> Result<()> {
        let (entity, capability) = Self::parse(entity, capability)?;
        self.manager.apply_update(&entity, capability, value).await?;
        Ok(())
    }

    pub async fn reset_entity(&self, entity: &str) -> Result<Vec<Capability>> {
        let entity = Entity::parse(entity)?;
        Ok(self.manager.reset_entity(&entity).await?)
    }

    /// Forget every stored setting and resync
    pub async fn reset_all(&self) -> Result<SetupReport> {
        let report = self.manager.reset_all().await?;
        self.status.write().last_setup = Some(Utc::now());
        Ok(report)
    }

    pub fn effective(&self, entity: &str, capability: &str) -> Result<bool> {
        let (entity, capability) = Self::parse(entity, capability)?;
        Ok(self.store.effective(&entity, capability)?)
    }

    pub fn settings(&self) -> Result<Vec<Setting>> {
        Ok(self.store.get_all()?)
    }

    pub fn resolve_disabled_capabilities(&self, entity: &str) -> Result<Vec<Capability>> {
        let entity = Entity::parse(entity)?;
        Ok(resolve_disabled_capabilities(&self.store, &entity)?)
    }

    /// Route a committed navigation. Top-level navigations return the marker
    /// attached to the document response.
    pub async fn on_navigation(&self, event: NavigationEvent) -> Result<Option<Marker>> {
        match event.frame {
            FrameKind::TopLevel => {
                let Some(entity) = Entity::from_url(&event.url) else {
                    tracing::debug!(url = %event.url, "Navigation without a registrable domain");
                    return Ok(None);
                };
                if let Err(e) = self.manager.on_navigation(event.context, entity.clone()).await {
                    // The previous document's marker and links no longer apply
                    self.signals.on_context_destroyed(event.context);
                    return Err(e.into());
                }
                let marker = self.signals.on_top_level_response(event.context, entity)?;
                Ok(Some(marker))
            }
            FrameKind::Child => {
                let owner = event.owner.ok_or(CoreError::MissingOwner(event.context))?;
                self.signals.on_child_context(event.context, owner);
                Ok(None)
            }
        }
    }

    /// A secure top-level load failed with a TLS error or a downgrade
    pub async fn on_secure_load_failed(&self, url: &str) -> Result<bool> {
        Ok(self.manager.on_secure_load_failed(url).await?)
    }

    /// "Continue to site" on the HTTP warning page, or its reversal
    pub async fn set_http_exception(&self, url: &str, protection_enabled: bool) -> Result<bool> {
        Ok(self.manager.set_http_exception(url, protection_enabled).await?)
    }

    pub async fn on_context_destroyed(&self, context: ContextId) -> Result<()> {
        self.signals.on_context_destroyed(context);
        self.manager.on_context_removed(context).await?;
        Ok(())
    }

    /// Disabled list as seen from inside a context
    pub fn read_signal(&self, context: ContextId, frame: FrameKind) -> Result<Option<SignalReading>> {
        Ok(self.signals.read(context, frame)?)
    }

    /// Answer handshake requests on `env` for whoever knows `secret`
    pub fn spawn_responder(&self, env: Arc<SharedEnvironment>, secret: String) -> Responder {
        let store = self.store.clone();
        Responder::spawn(env, secret, move |entity| {
            resolve_disabled_capabilities(&store, entity)
        })
    }

    pub fn requester(&self, env: Arc<SharedEnvironment>, secret: String) -> Requester {
        Requester::new(env, secret, self.config.handshake_timeout())
    }

    /// Refetch remote exceptions and rebuild every rule from scratch
    pub async fn refresh_remote_config(&self) -> Result<SetupReport> {
        let client = self
            .remote
            .as_ref()
            .ok_or_else(|| CoreError::Config("no remote_config_url configured".into()))?;

        let snapshot = client.latest().await?;
        self.install_remote(snapshot);
        self.setup().await
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<SettingChange> {
        self.changes.subscribe()
    }

    pub async fn installed_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.manager.installed_rules().await?)
    }

    /// Remove every installed rule
    pub async fn teardown(&self) -> Result<usize> {
        Ok(self.manager.teardown().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use veil_rules::{InMemoryEngine, RESERVED_AUTOCOMPLETE_BLOCK};

    fn test_veil() -> (Veil, Arc<InMemoryEngine>) {
        let engine = Arc::new(InMemoryEngine::new());
        let veil = Veil::with_database(
            Config::new(PathBuf::from("/tmp/veil-test")),
            Database::open_in_memory().unwrap(),
            engine.clone(),
        )
        .unwrap();
        (veil, engine)
    }

    fn top_level(context: u64, url: &str) -> NavigationEvent {
        NavigationEvent {
            context: ContextId(context),
            owner: None,
            url: url.to_string(),
            frame: FrameKind::TopLevel,
        }
    }

    #[tokio::test]
    async fn test_initialize_installs_defaults() {
        let (veil, engine) = test_veil();
        let report = veil.initialize().await.unwrap();

        assert_eq!(report.defaults, 11);
        assert!(engine.get(RESERVED_AUTOCOMPLETE_BLOCK).is_some());
        assert!(veil.status().last_setup.is_some());
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_engine() {
        let (veil, engine) = test_veil();
        veil.initialize().await.unwrap();
        let calls = engine.install_calls();

        let bad_entity = veil.apply_update("not a domain", "gpu", false).await;
        assert!(matches!(
            bad_entity,
            Err(CoreError::Settings(SettingsError::InvalidEntity(_)))
        ));

        let bad_capability = veil.apply_update("example.com", "teleport", false).await;
        assert!(matches!(
            bad_capability,
            Err(CoreError::Settings(SettingsError::UnknownCapability(_)))
        ));

        assert_eq!(engine.install_calls(), calls);
    }

    #[tokio::test]
    async fn test_changes_broadcast() {
        let (veil, _engine) = test_veil();
        veil.initialize().await.unwrap();
        let mut changes = veil.subscribe_changes();

        veil.apply_update("example.com", "timezone", false).await.unwrap();
        veil.apply_update("example.com", "timezone", true).await.unwrap();

        let first = changes.recv().await.unwrap();
        assert_eq!(first.stored, Some(false));
        assert!(!first.value);

        let second = changes.recv().await.unwrap();
        assert_eq!(second.stored, None);
        assert!(second.value);
    }

    #[tokio::test]
    async fn test_signal_reaches_top_level_and_children() {
        let (veil, _engine) = test_veil();
        veil.initialize().await.unwrap();
        veil.apply_update("example.com", "fonts", false).await.unwrap();

        let marker = veil
            .on_navigation(top_level(1, "https://www.example.com/page"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(marker.disabled(), &[Capability::Fonts]);

        veil.on_navigation(NavigationEvent {
            context: ContextId(2),
            owner: Some(ContextId(1)),
            url: "https://ads.tracker.net/frame".to_string(),
            frame: FrameKind::Child,
        })
        .await
        .unwrap();

        let top = veil.read_signal(ContextId(1), FrameKind::TopLevel).unwrap().unwrap();
        assert_eq!(top.disabled, vec![Capability::Fonts]);
        assert!(top.erase_cookie.is_some());
        assert_eq!(veil.read_signal(ContextId(1), FrameKind::TopLevel).unwrap(), None);

        let child = veil.read_signal(ContextId(2), FrameKind::Child).unwrap().unwrap();
        assert_eq!(child.disabled, vec![Capability::Fonts]);
        assert_eq!(child.erase_cookie, None);

        veil.on_context_destroyed(ContextId(1)).await.unwrap();
        assert!(veil.read_signal(ContextId(2), FrameKind::Child).is_err());
    }

    #[tokio::test]
    async fn test_failed_navigation_leaves_no_signal() {
        let (veil, engine) = test_veil();
        veil.initialize().await.unwrap();
        veil.apply_update("example.com", "fonts", false).await.unwrap();
        veil.on_navigation(top_level(1, "https://example.com/"))
            .await
            .unwrap();

        engine.fail_next_install(veil_rules::EngineError::Unavailable("restarting".into()));
        let result = veil
            .on_navigation(top_level(1, "https://www.example.com/next"))
            .await;

        assert!(matches!(result, Err(CoreError::Rules(_))));
        assert_eq!(veil.read_signal(ContextId(1), FrameKind::TopLevel).unwrap(), None);
        assert!(veil.signals.entity_of(ContextId(1)).is_none());
    }

    #[tokio::test]
    async fn test_child_without_owner() {
        let (veil, _engine) = test_veil();
        let result = veil
            .on_navigation(NavigationEvent {
                context: ContextId(5),
                owner: None,
                url: "https://example.com".to_string(),
                frame: FrameKind::Child,
            })
            .await;
        assert!(matches!(result, Err(CoreError::MissingOwner(ContextId(5)))));
    }

    #[tokio::test]
    async fn test_ads_opt_out_exempts_context() {
        let (veil, _engine) = test_veil();
        veil.initialize().await.unwrap();
        veil.apply_update("news.com", "ads", false).await.unwrap();

        veil.on_navigation(top_level(7, "https://news.com/today"))
            .await
            .unwrap();
        let rules = veil.installed_rules().await.unwrap();
        assert!(rules
            .iter()
            .any(|r| r.condition.context_ids.as_deref() == Some(&[ContextId(7)][..])));

        veil.on_context_destroyed(ContextId(7)).await.unwrap();
        let rules = veil.installed_rules().await.unwrap();
        assert!(rules.iter().all(|r| r.condition.context_ids.is_none()));
    }

    #[tokio::test]
    async fn test_handshake_through_facade() {
        let (veil, _engine) = test_veil();
        veil.apply_update("example.com", "gpu", false).await.unwrap();

        let env = Arc::new(SharedEnvironment::new());
        let responder = veil.spawn_responder(Arc::clone(&env), "s3cret".to_string());
        let requester = veil.requester(Arc::clone(&env), "s3cret".to_string());

        let disabled = requester
            .request(&Entity::domain("example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(disabled, vec![Capability::Gpu]);
        assert_eq!(veil.config().handshake_timeout(), Duration::from_millis(1000));

        responder.stop();
    }

    #[tokio::test]
    async fn test_http_warning_flow() {
        let engine = Arc::new(InMemoryEngine::new());
        let mut config = Config::new(PathBuf::from("/tmp/veil-test"));
        config.http_warning_page = Some("chrome-extension://veil/warning.html".into());
        let veil =
            Veil::with_database(config, Database::open_in_memory().unwrap(), engine.clone()).unwrap();
        let report = veil.initialize().await.unwrap();
        assert_eq!(report.defaults, 12);

        assert!(veil.on_secure_load_failed("https://old.example.net/").await.unwrap());
        assert!(veil.set_http_exception("http://old.example.net/", false).await.unwrap());

        let rules = veil.installed_rules().await.unwrap();
        let scoped: Vec<_> = rules
            .iter()
            .filter(|r| r.condition.request_domains.is_some())
            .collect();
        assert_eq!(scoped.len(), 2);
        assert!(scoped.iter().any(|r| r.action == veil_rules::RuleAction::Allow));
    }

    #[tokio::test]
    async fn test_refresh_without_remote_url() {
        let (veil, _engine) = test_veil();
        assert!(matches!(
            veil.refresh_remote_config().await,
            Err(CoreError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_all() {
        let (veil, engine) = test_veil();
        let report = veil.initialize().await.unwrap();
        veil.apply_update("example.com", "gpu", false).await.unwrap();
        veil.apply_update("_ALL_DOMAINS_", "fonts", false).await.unwrap();

        veil.reset_all().await.unwrap();
        assert!(veil.settings().unwrap().is_empty());
        assert_eq!(engine.len(), report.defaults);
    }

    #[tokio::test]
    async fn test_teardown() {
        let (veil, engine) = test_veil();
        veil.initialize().await.unwrap();
        veil.apply_update("example.com", "gpu", false).await.unwrap();

        assert!(veil.teardown().await.unwrap() > 0);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_effective_and_resolve() {
        let (veil, _engine) = test_veil();
        veil.store
            .set(&Entity::All, Capability::Math, false)
            .unwrap();

        assert!(!veil.effective("example.com", "math").unwrap());
        assert_eq!(
            veil.resolve_disabled_capabilities("example.com").unwrap(),
            vec![Capability::Math]
        );
        assert_eq!(veil.settings().unwrap().len(), 1);
    }
}
