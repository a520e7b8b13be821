//! Content rules
//!
//! Disabled capabilities reach the page as a marker cookie appended to the
//! document response. A default rule carries the globally disabled list; an
//! entity whose list differs gets a rule of its own and is excluded from the
//! default.

use async_trait::async_trait;
use futures_util::future::try_join;
use std::sync::Arc;

use veil_settings::{Capability, Entity, RuleCategory};
use veil_signal::Marker;

use crate::compilers::{query_one, Resolution, RuleCompiler};
use crate::engine::RuleEngine;
use crate::ids::{IdRegistry, DEFAULT_QUALIFIER};
use crate::list::include_in_list;
use crate::rule::{
    priority_for, HeaderOp, ResourceKind, Rule, RuleAction, RuleCondition, RuleId, RuleUpdate,
};
use crate::Result;

const SET_COOKIE: &str = "Set-Cookie";

pub struct ContentCompiler {
    ids: Arc<IdRegistry>,
}

impl ContentCompiler {
    pub fn new(ids: Arc<IdRegistry>) -> Self {
        Self { ids }
    }

    pub fn default_id(&self) -> RuleId {
        self.ids.id_for(RuleCategory::Content, DEFAULT_QUALIFIER)
    }

    pub fn entity_id(&self, domain: &str) -> RuleId {
        self.ids.id_for(RuleCategory::Content, domain)
    }

    fn marker_rule(id: RuleId, disabled: &[Capability], condition: RuleCondition) -> Rule {
        let marker = Marker::new(disabled.iter().copied());
        Rule {
            id,
            priority: priority_for(RuleCategory::Content),
            action: RuleAction::ModifyHeaders {
                request_headers: Vec::new(),
                response_headers: vec![HeaderOp::append(SET_COOKIE, marker.set_cookie_value())],
            },
            condition: RuleCondition {
                resource_kinds: Some(ResourceKind::DOCUMENTS.to_vec()),
                ..condition
            },
        }
    }

    fn entity_rule(&self, domain: &str, disabled: &[Capability]) -> Rule {
        Self::marker_rule(
            self.entity_id(domain),
            disabled,
            RuleCondition {
                top_entities: Some(vec![domain.to_string()]),
                ..Default::default()
            },
        )
    }

    fn default_rule(&self, disabled: &[Capability], excluded: Option<Vec<String>>) -> Rule {
        Self::marker_rule(
            self.default_id(),
            disabled,
            RuleCondition {
                excluded_top_entities: excluded,
                ..Default::default()
            },
        )
    }

    /// Disabled list carried by an installed rule
    pub fn disabled_in(rule: Option<&Rule>) -> Vec<Capability> {
        rule.and_then(|r| r.response_header_value(SET_COOKIE))
            .and_then(Marker::parse_set_cookie)
            .map(Marker::into_disabled)
            .unwrap_or_default()
    }

    fn set(list: Vec<Capability>, capability: Capability, disabled: bool) -> Vec<Capability> {
        include_in_list(Some(list), &capability, disabled).unwrap_or_default()
    }
}

#[async_trait]
impl RuleCompiler for ContentCompiler {
    fn category(&self) -> RuleCategory {
        RuleCategory::Content
    }

    fn rule_ids(&self, entity: &Entity, capability: Capability) -> Vec<RuleId> {
        if !capability.participates_in(RuleCategory::Content) {
            return Vec::new();
        }
        match entity {
            Entity::All => vec![self.default_id()],
            Entity::Domain(domain) => vec![self.entity_id(domain), self.default_id()],
        }
    }

    async fn compile(
        &self,
        engine: &dyn RuleEngine,
        resolution: &Resolution,
    ) -> Result<Option<RuleUpdate>> {
        let capability = resolution.capability;
        if !capability.participates_in(RuleCategory::Content) {
            return Ok(None);
        }

        let default_id = self.default_id();

        match &resolution.entity {
            Entity::All => {
                let old_default = query_one(engine, default_id).await?;
                let excluded = old_default
                    .as_ref()
                    .and_then(|r| r.condition.excluded_top_entities.clone());
                let global = Self::set(
                    Self::disabled_in(old_default.as_ref()),
                    capability,
                    !resolution.value,
                );

                let add_rules = if global.is_empty() {
                    Vec::new()
                } else {
                    vec![self.default_rule(&global, excluded)]
                };
                Ok(Some(RuleUpdate::new(vec![default_id], add_rules)))
            }
            Entity::Domain(domain) => {
                let entity_id = self.entity_id(domain);
                let (old_rule, old_default) =
                    try_join(query_one(engine, entity_id), query_one(engine, default_id)).await?;

                let global = Self::disabled_in(old_default.as_ref());
                let current = match old_rule.as_ref() {
                    Some(rule) => Self::disabled_in(Some(rule)),
                    None => global.clone(),
                };
                let updated = Self::set(current, capability, !resolution.value);
                let needs_own_rule = updated != global;

                let mut add_rules = Vec::new();
                if !global.is_empty() {
                    let excluded = include_in_list(
                        old_default.and_then(|r| r.condition.excluded_top_entities),
                        domain,
                        needs_own_rule,
                    );
                    add_rules.push(self.default_rule(&global, excluded));
                }
                if needs_own_rule {
                    add_rules.push(self.entity_rule(domain, &updated));
                }

                Ok(Some(RuleUpdate::new(vec![entity_id, default_id], add_rules)))
            }
        }
    }

    fn default_rules(&self) -> Vec<Rule> {
        // Nothing is disabled before the store is replayed
        Vec::new()
    }
}
