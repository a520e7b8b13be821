//! Allow rules
//!
//! Blocker exceptions for top entities that opted out of a blocking
//! capability. A global opt-out drops the entity condition entirely.

use async_trait::async_trait;
use std::sync::Arc;

use veil_settings::{Capability, Entity, RuleCategory};

use crate::compilers::{query_one, Resolution, RuleCompiler};
use crate::engine::RuleEngine;
use crate::ids::IdRegistry;
use crate::list::include_in_list;
use crate::rule::{priority_for, ResourceKind, Rule, RuleAction, RuleCondition, RuleId, RuleUpdate};
use crate::Result;

pub(crate) fn allow_template(id: RuleId, priority: u32) -> Rule {
    Rule {
        id,
        priority,
        action: RuleAction::Allow,
        condition: RuleCondition::for_kinds(&ResourceKind::ALL),
    }
}

/// Shared by every single-rule allow list keyed on top entities
pub(crate) async fn compile_allow_list(
    engine: &dyn RuleEngine,
    template: Rule,
    resolution: &Resolution,
) -> Result<RuleUpdate> {
    let id = template.id;

    if !resolution.global {
        return Ok(RuleUpdate::new(vec![id], vec![template]));
    }

    // An unconditioned rule is left over from a global opt-out
    let mut rule = match query_one(engine, id).await? {
        Some(rule) if rule.condition.top_entities.is_some() => rule,
        _ => template,
    };

    if let Entity::Domain(domain) = &resolution.entity {
        rule.condition.top_entities =
            include_in_list(rule.condition.top_entities.take(), domain, !resolution.value);
    }

    let add_rules = if rule.condition.top_entities.is_some() {
        vec![rule]
    } else {
        Vec::new()
    };
    Ok(RuleUpdate::new(vec![id], add_rules))
}

pub struct AllowCompiler {
    ids: Arc<IdRegistry>,
}

impl AllowCompiler {
    pub fn new(ids: Arc<IdRegistry>) -> Self {
        Self { ids }
    }

    fn rule_id(&self, capability: Capability) -> Option<RuleId> {
        capability
            .participates_in(RuleCategory::Allow)
            .then(|| self.ids.id_for(RuleCategory::Allow, capability.as_str()))
    }
}

#[async_trait]
impl RuleCompiler for AllowCompiler {
    fn category(&self) -> RuleCategory {
        RuleCategory::Allow
    }

    fn rule_ids(&self, _entity: &Entity, capability: Capability) -> Vec<RuleId> {
        self.rule_id(capability).into_iter().collect()
    }

    async fn compile(
        &self,
        engine: &dyn RuleEngine,
        resolution: &Resolution,
    ) -> Result<Option<RuleUpdate>> {
        let Some(id) = self.rule_id(resolution.capability) else {
            return Ok(None);
        };
        let template = allow_template(id, priority_for(RuleCategory::Allow));
        Ok(Some(compile_allow_list(engine, template, resolution).await?))
    }

    fn default_rules(&self) -> Vec<Rule> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;

    fn resolution(entity: &str, value: bool, global: bool) -> Resolution {
        Resolution {
            entity: Entity::parse(entity).unwrap(),
            capability: Capability::Ads,
            value,
            global,
        }
    }

    async fn apply(compiler: &AllowCompiler, engine: &InMemoryEngine, resolution: Resolution) {
        let update = compiler.compile(engine, &resolution).await.unwrap().unwrap();
        engine
            .install_rules(&update.remove_ids, &update.add_rules)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_opted_out_entities_listed() {
        let ids = Arc::new(IdRegistry::new());
        let compiler = AllowCompiler::new(Arc::clone(&ids));
        let engine = InMemoryEngine::new();
        let id = ids.id_for(RuleCategory::Allow, "ads");

        apply(&compiler, &engine, resolution("b.com", false, true)).await;
        apply(&compiler, &engine, resolution("a.com", false, true)).await;
        let rule = engine.get(id).unwrap();
        assert_eq!(
            rule.condition.top_entities,
            Some(vec!["a.com".to_string(), "b.com".to_string()])
        );
        assert_eq!(rule.priority, 3);
        assert_eq!(rule.action, RuleAction::Allow);

        apply(&compiler, &engine, resolution("a.com", true, true)).await;
        apply(&compiler, &engine, resolution("b.com", true, true)).await;
        assert!(engine.get(id).is_none());
    }

    #[tokio::test]
    async fn test_global_opt_out_applies_everywhere() {
        let ids = Arc::new(IdRegistry::new());
        let compiler = AllowCompiler::new(Arc::clone(&ids));
        let engine = InMemoryEngine::new();
        let id = ids.id_for(RuleCategory::Allow, "ads");

        apply(&compiler, &engine, resolution("a.com", false, true)).await;
        apply(&compiler, &engine, resolution("_ALL_DOMAINS_", false, false)).await;
        assert_eq!(engine.get(id).unwrap().condition.top_entities, None);

        // Re-enabling resets to the template; domains are replayed after
        apply(&compiler, &engine, resolution("_ALL_DOMAINS_", true, true)).await;
        assert!(engine.get(id).is_none());
        apply(&compiler, &engine, resolution("a.com", false, true)).await;
        assert_eq!(
            engine.get(id).unwrap().condition.top_entities,
            Some(vec!["a.com".to_string()])
        );
    }

    #[tokio::test]
    async fn test_other_capabilities_ignored() {
        let compiler = AllowCompiler::new(Arc::new(IdRegistry::new()));
        let engine = InMemoryEngine::new();
        let update = compiler
            .compile(
                &engine,
                &Resolution {
                    entity: Entity::All,
                    capability: Capability::Fonts,
                    value: false,
                    global: false,
                },
            )
            .await
            .unwrap();
        assert!(update.is_none());
    }
}
