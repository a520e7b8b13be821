//! Context exception rule
//!
//! Statically installed blocker rules cannot be scoped by top entity, so
//! opted-out entities are exempted per top-level context instead: one allow
//! rule lists every context currently showing an entity with `ads` disabled.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use veil_settings::{Capability, EffectiveSettings, Entity, RuleCategory};
use veil_signal::ContextId;

use crate::engine::RuleEngine;
use crate::ids::{IdRegistry, CONTEXT_EXCEPTION_QUALIFIER};
use crate::rule::{priority_for, Rule, RuleAction, RuleCondition, RuleId};
use crate::Result;

#[derive(Default)]
struct ContextState {
    navigated: HashMap<ContextId, Entity>,
    exceptions: BTreeSet<ContextId>,
}

impl ContextState {
    fn forget(&mut self, context: ContextId) -> bool {
        self.navigated.remove(&context);
        self.exceptions.remove(&context)
    }
}

pub struct ContextExceptionCompiler {
    ids: Arc<IdRegistry>,
    state: Mutex<ContextState>,
}

impl ContextExceptionCompiler {
    pub fn new(ids: Arc<IdRegistry>) -> Self {
        Self {
            ids,
            state: Mutex::new(ContextState::default()),
        }
    }

    pub fn rule_id(&self) -> RuleId {
        self.ids
            .id_for(RuleCategory::ContextException, CONTEXT_EXCEPTION_QUALIFIER)
    }

    fn rule(&self, contexts: Vec<ContextId>) -> Rule {
        Rule {
            id: self.rule_id(),
            priority: priority_for(RuleCategory::ContextException),
            action: RuleAction::Allow,
            condition: RuleCondition {
                context_ids: Some(contexts),
                ..Default::default()
            },
        }
    }

    /// Contexts currently exempted, ascending
    pub fn exceptions(&self) -> Vec<ContextId> {
        self.state.lock().exceptions.iter().copied().collect()
    }

    pub fn navigated_entity(&self, context: ContextId) -> Option<Entity> {
        self.state.lock().navigated.get(&context).cloned()
    }

    /// A top-level context committed a navigation to `entity`
    pub async fn on_navigation(
        &self,
        engine: &dyn RuleEngine,
        settings: &dyn EffectiveSettings,
        context: ContextId,
        entity: Entity,
    ) -> Result<()> {
        let exempt = !settings.effective(&entity, Capability::Ads)?;
        {
            let mut state = self.state.lock();
            state.navigated.insert(context, entity);
            if exempt {
                state.exceptions.insert(context);
            } else {
                state.exceptions.remove(&context);
            }
        }
        self.install(engine).await
    }

    pub async fn on_context_removed(&self, engine: &dyn RuleEngine, context: ContextId) -> Result<()> {
        let was_exempt = self.state.lock().forget(context);
        if was_exempt {
            self.install(engine).await?;
        }
        Ok(())
    }

    /// Recompute every cached context after the `ads` setting changed
    pub async fn reevaluate(
        &self,
        engine: &dyn RuleEngine,
        settings: &dyn EffectiveSettings,
    ) -> Result<()> {
        let navigated: Vec<(ContextId, Entity)> = self
            .state
            .lock()
            .navigated
            .iter()
            .map(|(c, e)| (*c, e.clone()))
            .collect();

        let mut exceptions = BTreeSet::new();
        for (context, entity) in navigated {
            if !settings.effective(&entity, Capability::Ads)? {
                exceptions.insert(context);
            }
        }

        self.state.lock().exceptions = exceptions;
        self.install(engine).await
    }

    /// Drop all per-context state without touching the engine
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.navigated.clear();
        state.exceptions.clear();
    }

    /// Install the current exception set. Every closed context the engine
    /// reports is pruned and the install retried, so the installed rule and
    /// the exception set agree on success.
    async fn install(&self, engine: &dyn RuleEngine) -> Result<()> {
        let id = self.rule_id();

        loop {
            let contexts = self.exceptions();
            let add_rules = if contexts.is_empty() {
                Vec::new()
            } else {
                vec![self.rule(contexts)]
            };

            let error = match engine.install_rules(&[id], &add_rules).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !error.is_stale_context() {
                tracing::error!(error = %error, "Failed to install context exceptions");
                return Err(error.into());
            }

            // Each retry removes one listed context, which bounds the loop
            let pruned = match error.stale_context() {
                Some(stale) => self.state.lock().forget(stale),
                None => false,
            };
            if !pruned {
                tracing::debug!(error = %error, "Ignoring stale context rejection");
                return Ok(());
            }
            tracing::debug!(error = %error, "Pruned closed context, retrying");
        }
    }
}
