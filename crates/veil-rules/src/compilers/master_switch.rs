//! Master switch rule
//!
//! A single allow rule over every resource kind. Its priority sits above
//! network and blocker rules, so an opted-out entity is left untouched.

use async_trait::async_trait;
use std::sync::Arc;

use veil_settings::{Capability, Entity, RuleCategory};

use crate::compilers::allow::{allow_template, compile_allow_list};
use crate::compilers::{Resolution, RuleCompiler};
use crate::engine::RuleEngine;
use crate::ids::IdRegistry;
use crate::rule::{priority_for, Rule, RuleId, RuleUpdate};
use crate::Result;

pub struct MasterSwitchCompiler {
    ids: Arc<IdRegistry>,
}

impl MasterSwitchCompiler {
    pub fn new(ids: Arc<IdRegistry>) -> Self {
        Self { ids }
    }

    pub fn rule_id(&self) -> RuleId {
        self.ids
            .id_for(RuleCategory::MasterSwitch, Capability::MasterSwitch.as_str())
    }
}

#[async_trait]
impl RuleCompiler for MasterSwitchCompiler {
    fn category(&self) -> RuleCategory {
        RuleCategory::MasterSwitch
    }

    fn rule_ids(&self, _entity: &Entity, capability: Capability) -> Vec<RuleId> {
        if capability == Capability::MasterSwitch {
            vec![self.rule_id()]
        } else {
            Vec::new()
        }
    }

    async fn compile(
        &self,
        engine: &dyn RuleEngine,
        resolution: &Resolution,
    ) -> Result<Option<RuleUpdate>> {
        if resolution.capability != Capability::MasterSwitch {
            return Ok(None);
        }
        let template = allow_template(self.rule_id(), priority_for(RuleCategory::MasterSwitch));
        Ok(Some(compile_allow_list(engine, template, resolution).await?))
    }

    fn default_rules(&self) -> Vec<Rule> {
        Vec::new()
    }
}
