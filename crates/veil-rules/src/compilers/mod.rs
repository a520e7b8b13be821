//! Rule compilers
//!
//! Each compiler owns one rule category. Given a resolved setting it reads
//! its installed rules, adjusts the entity lists and returns one atomic
//! update. Compilers never install anything themselves.

use async_trait::async_trait;
use std::sync::Arc;

use veil_settings::{Capability, Entity, RuleCategory};

use crate::engine::RuleEngine;
use crate::ids::IdRegistry;
use crate::rule::{Rule, RuleId, RuleUpdate};
use crate::Result;

mod allow;
mod content;
mod context;
pub(crate) mod http_warning;
mod master_switch;
pub(crate) mod network;

pub use allow::AllowCompiler;
pub use content::ContentCompiler;
pub use context::ContextExceptionCompiler;
pub use http_warning::HttpWarningCompiler;
pub use master_switch::MasterSwitchCompiler;
pub use network::{NetworkCompiler, USER_AGENT_FULL_VERSION, USER_AGENT_FULL_VERSION_LIST};

/// A setting as the compilers see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub entity: Entity,
    pub capability: Capability,
    /// Effective value for the entity
    pub value: bool,
    /// Whether the capability is globally enabled
    pub global: bool,
}

#[async_trait]
pub trait RuleCompiler: Send + Sync {
    fn category(&self) -> RuleCategory;

    /// Ids a compile step for this pair reads or writes
    fn rule_ids(&self, entity: &Entity, capability: Capability) -> Vec<RuleId>;

    /// Update to install, or `None` when the capability is not handled here
    async fn compile(
        &self,
        engine: &dyn RuleEngine,
        resolution: &Resolution,
    ) -> Result<Option<RuleUpdate>>;

    /// Rules installed on a fresh start
    fn default_rules(&self) -> Vec<Rule>;
}

/// The trait-based compilers, one per category except context exceptions
pub fn standard_compilers(
    ids: Arc<IdRegistry>,
    accept_language: &str,
) -> Vec<Arc<dyn RuleCompiler>> {
    vec![
        Arc::new(ContentCompiler::new(Arc::clone(&ids))),
        Arc::new(NetworkCompiler::new(Arc::clone(&ids), accept_language)),
        Arc::new(AllowCompiler::new(Arc::clone(&ids))),
        Arc::new(MasterSwitchCompiler::new(ids)),
    ]
}

async fn query_one(engine: &dyn RuleEngine, id: RuleId) -> Result<Option<Rule>> {
    Ok(engine.query_rules(&[id]).await?.into_iter().next())
}
