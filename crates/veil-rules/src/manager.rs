//! Rule manager
//!
//! Single entry point that mutates installed rules. Every change goes
//! store -> compilers -> engine, one category at a time, with the category's
//! rule ids locked for the whole read-modify-install cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use veil_settings::{Capability, EffectiveSettings, Entity, RuleCategory, SettingsStore};
use veil_signal::ContextId;

use crate::compilers::{
    standard_compilers, ContextExceptionCompiler, HttpWarningCompiler, Resolution, RuleCompiler,
};
use crate::engine::RuleEngine;
use crate::ids::{IdRegistry, RESERVED_AUTOCOMPLETE_BLOCK};
use crate::locks::IdLocks;
use crate::rule::{Rule, RuleAction, RuleCondition, RuleId, RuleUpdate, STATIC_PRIORITY};
use crate::Result;

const AUTOCOMPLETE_URL_FILTER: &str = "https://www.google.com/complete/*";

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Value forced into `Accept-Language` by the language rule
    pub accept_language: String,
    /// Install the static search-suggestion block rule
    pub block_search_autocomplete: bool,
    /// Warning page for HTTPS-only navigation; `None` leaves it off
    pub http_warning_page: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            accept_language: "en-US".to_string(),
            block_search_autocomplete: false,
            http_warning_page: None,
        }
    }
}

/// Outcome of a full resynchronization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub removed: usize,
    pub defaults: usize,
    pub replayed: usize,
}

pub struct RuleManager {
    store: SettingsStore,
    engine: Arc<dyn RuleEngine>,
    ids: Arc<IdRegistry>,
    compilers: Vec<Arc<dyn RuleCompiler>>,
    context: ContextExceptionCompiler,
    http: Option<HttpWarningCompiler>,
    locks: IdLocks,
    config: ManagerConfig,
}

impl RuleManager {
    pub fn new(
        store: SettingsStore,
        engine: Arc<dyn RuleEngine>,
        ids: Arc<IdRegistry>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            compilers: standard_compilers(Arc::clone(&ids), &config.accept_language),
            context: ContextExceptionCompiler::new(Arc::clone(&ids)),
            http: config
                .http_warning_page
                .as_ref()
                .map(|page| HttpWarningCompiler::new(Arc::clone(&ids), page.clone())),
            store,
            engine,
            ids,
            locks: IdLocks::new(),
            config,
        }
    }

    pub fn ids(&self) -> &Arc<IdRegistry> {
        &self.ids
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    /// Persist the setting, then bring the installed rules in line with it
    pub async fn apply_update(&self, entity: &Entity, capability: Capability, value: bool) -> Result<()> {
        self.store.set(entity, capability, value)?;
        tracing::info!(entity = %entity, capability = %capability, value, "Setting updated");
        self.sync(entity, capability).await
    }

    /// Remove every setting of the entity and resync what it touched
    pub async fn reset_entity(&self, entity: &Entity) -> Result<Vec<Capability>> {
        let removed = self.store.reset_entity(entity)?;
        for capability in &removed {
            self.sync(entity, *capability).await?;
        }
        Ok(removed)
    }

    /// Drop every stored setting and rebuild the defaults
    pub async fn reset_all(&self) -> Result<SetupReport> {
        let cleared = self.store.clear()?;
        tracing::info!(cleared, "Resetting all settings");
        self.setup_all().await
    }

    /// Recompile every category the capability participates in. A global
    /// change also resyncs every domain that has settings of its own.
    pub async fn sync(&self, entity: &Entity, capability: Capability) -> Result<()> {
        self.sync_one(entity, capability).await?;

        if entity.is_all() {
            for domain in self.store.known_domains()? {
                self.sync_one(&domain, capability).await?;
            }
        }
        Ok(())
    }

    async fn sync_one(&self, entity: &Entity, capability: Capability) -> Result<()> {
        for category in capability.categories() {
            match category {
                RuleCategory::ContextException => self.reevaluate_contexts().await?,
                _ => self.compile_category(*category, entity, capability).await?,
            }
        }
        Ok(())
    }

    async fn compile_category(
        &self,
        category: RuleCategory,
        entity: &Entity,
        capability: Capability,
    ) -> Result<()> {
        let Some(compiler) = self.compiler(category) else {
            return Ok(());
        };

        let _guard = self.locks.acquire(&compiler.rule_ids(entity, capability)).await;

        // Resolved under the lock so a racing write cannot be overtaken
        let resolution = Resolution {
            entity: entity.clone(),
            capability,
            value: self.store.effective(entity, capability)?,
            global: self.store.global_enabled(capability)?,
        };

        match compiler.compile(self.engine.as_ref(), &resolution).await? {
            Some(update) => self.install(category, &update).await,
            None => Ok(()),
        }
    }

    async fn reevaluate_contexts(&self) -> Result<()> {
        let _guard = self.locks.acquire(&[self.context.rule_id()]).await;
        self.context
            .reevaluate(self.engine.as_ref(), &self.store)
            .await
    }

    fn compiler(&self, category: RuleCategory) -> Option<&Arc<dyn RuleCompiler>> {
        self.compilers.iter().find(|c| c.category() == category)
    }

    async fn install(&self, category: RuleCategory, update: &RuleUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            category = %category,
            removed = update.remove_ids.len(),
            added = update.add_rules.len(),
            "Installing rule update"
        );

        self.engine
            .install_rules(&update.remove_ids, &update.add_rules)
            .await
            .map_err(|e| {
                tracing::error!(category = %category, error = %e, "Rule update failed");
                e
            })?;
        Ok(())
    }

    fn static_rules(&self) -> Vec<Rule> {
        if !self.config.block_search_autocomplete {
            return Vec::new();
        }
        vec![Rule {
            id: RESERVED_AUTOCOMPLETE_BLOCK,
            priority: STATIC_PRIORITY,
            action: RuleAction::Block,
            condition: RuleCondition {
                url_filter: Some(AUTOCOMPLETE_URL_FILTER.to_string()),
                ..Default::default()
            },
        }]
    }

    /// Rules installed on a fresh start, deduplicated by id
    pub fn default_rules(&self) -> Vec<Rule> {
        let mut by_id: BTreeMap<RuleId, Rule> = BTreeMap::new();
        for rule in self
            .compilers
            .iter()
            .flat_map(|c| c.default_rules())
            .chain(self.static_rules())
            .chain(self.http.iter().flat_map(|h| h.rules()))
        {
            by_id.insert(rule.id, rule);
        }
        by_id.into_values().collect()
    }

    /// Clear everything, install defaults and replay the whole store
    pub async fn setup_all(&self) -> Result<SetupReport> {
        let installed = self.engine.installed_rules().await?;
        let remove_ids: Vec<RuleId> = installed.iter().map(|r| r.id).collect();

        let mut lock_ids = remove_ids.clone();
        lock_ids.extend(self.default_rules().iter().map(|r| r.id));
        if let Some(http) = &self.http {
            lock_ids.extend(http.rule_ids());
        }

        let defaults = {
            let _guard = self.locks.acquire(&lock_ids).await;
            // Session host lists may have changed while waiting
            let defaults = self.default_rules();
            self.engine
                .install_rules(&remove_ids, &defaults)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to reset rules");
                    e
                })?;
            defaults
        };

        // Global entries first so domain encodings see the final global lists
        let (globals, domains): (Vec<_>, Vec<_>) = self
            .store
            .get_all()?
            .into_iter()
            .partition(|s| s.entity.is_all());
        let replayed = globals.len() + domains.len();

        // Context exceptions are re-evaluated once, after the replay
        for setting in globals.iter().chain(domains.iter()) {
            for category in setting.capability.categories() {
                if *category != RuleCategory::ContextException {
                    self.compile_category(*category, &setting.entity, setting.capability)
                        .await?;
                }
            }
        }
        self.reevaluate_contexts().await?;

        let report = SetupReport {
            removed: remove_ids.len(),
            defaults: defaults.len(),
            replayed,
        };
        tracing::info!(
            removed = report.removed,
            defaults = report.defaults,
            replayed = report.replayed,
            "Rules resynchronized"
        );
        Ok(report)
    }

    /// Remove every installed rule and forget per-context state
    pub async fn teardown(&self) -> Result<usize> {
        let installed = self.engine.installed_rules().await?;
        let ids: Vec<RuleId> = installed.iter().map(|r| r.id).collect();

        {
            let _guard = self.locks.acquire(&ids).await;
            if !ids.is_empty() {
                self.engine.install_rules(&ids, &[]).await?;
            }
        }
        self.context.reset();
        if let Some(http) = &self.http {
            http.reset();
        }

        tracing::info!(removed = ids.len(), "Rules torn down");
        Ok(ids.len())
    }

    pub async fn on_navigation(&self, context: ContextId, entity: Entity) -> Result<()> {
        let _guard = self.locks.acquire(&[self.context.rule_id()]).await;
        self.context
            .on_navigation(self.engine.as_ref(), &self.store, context, entity)
            .await
    }

    pub async fn on_context_removed(&self, context: ContextId) -> Result<()> {
        let _guard = self.locks.acquire(&[self.context.rule_id()]).await;
        self.context
            .on_context_removed(self.engine.as_ref(), context)
            .await
    }

    /// A secure top-level load failed; later plain HTTP loads of the host
    /// land on the warning page. Returns `false` when nothing was recorded.
    pub async fn on_secure_load_failed(&self, url: &str) -> Result<bool> {
        let Some(http) = &self.http else {
            return Ok(false);
        };
        let _guard = self.locks.acquire(&http.rule_ids()).await;
        http.on_secure_load_failed(self.engine.as_ref(), url).await
    }

    /// Let the user through to a host over plain HTTP, or take that back
    pub async fn set_http_exception(&self, url: &str, protection_enabled: bool) -> Result<bool> {
        let Some(http) = &self.http else {
            return Ok(false);
        };
        let _guard = self.locks.acquire(&http.rule_ids()).await;
        http.set_exception(self.engine.as_ref(), url, protection_enabled)
            .await
    }

    pub fn context_exceptions(&self) -> Vec<ContextId> {
        self.context.exceptions()
    }

    pub async fn installed_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.engine.installed_rules().await?)
    }
}
