//! Rule-evaluation engine seam

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use veil_signal::ContextId;

use crate::error::EngineError;
use crate::rule::{Rule, RuleId};

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// External engine that evaluates installed rules
#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// Remove `remove_ids` and add `add_rules` in one atomic step. On error
    /// nothing changes.
    async fn install_rules(&self, remove_ids: &[RuleId], add_rules: &[Rule]) -> EngineResult<()>;

    /// Installed rules with the given ids; missing ids are skipped
    async fn query_rules(&self, ids: &[RuleId]) -> EngineResult<Vec<Rule>>;

    async fn installed_rules(&self) -> EngineResult<Vec<Rule>>;
}

/// In-process engine that validates and stores rules
#[derive(Default)]
pub struct InMemoryEngine {
    rules: RwLock<BTreeMap<RuleId, Rule>>,
    closed_contexts: RwLock<HashSet<ContextId>>,
    fail_next: Mutex<Option<EngineError>>,
    install_calls: AtomicUsize,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules referencing this context are rejected from now on
    pub fn close_context(&self, context: ContextId) {
        self.closed_contexts.write().insert(context);
    }

    /// Make the next install fail with `error`
    pub fn fail_next_install(&self, error: EngineError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: RuleId) -> Option<Rule> {
        self.rules.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    fn validate(&self, remove_ids: &[RuleId], add_rules: &[Rule]) -> EngineResult<()> {
        let installed = self.rules.read();
        let closed = self.closed_contexts.read();
        let mut seen = HashSet::new();

        for rule in add_rules {
            if rule.id.0 == 0 {
                return Err(EngineError::Rejected("Rule id must be positive".into()));
            }
            if !seen.insert(rule.id) {
                return Err(EngineError::Rejected(format!(
                    "Rule with id {} does not have a unique ID",
                    rule.id
                )));
            }
            if installed.contains_key(&rule.id) && !remove_ids.contains(&rule.id) {
                return Err(EngineError::Rejected(format!(
                    "Rule with id {} does not have a unique ID",
                    rule.id
                )));
            }
            if let Some(context) = rule.condition.context_ids().iter().find(|c| closed.contains(*c)) {
                return Err(EngineError::StaleContext(*context));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RuleEngine for InMemoryEngine {
    async fn install_rules(&self, remove_ids: &[RuleId], add_rules: &[Rule]) -> EngineResult<()> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }

        self.validate(remove_ids, add_rules)?;

        let mut rules = self.rules.write();
        for id in remove_ids {
            rules.remove(id);
        }
        for rule in add_rules {
            rules.insert(rule.id, rule.clone());
        }
        Ok(())
    }

    async fn query_rules(&self, ids: &[RuleId]) -> EngineResult<Vec<Rule>> {
        let rules = self.rules.read();
        Ok(ids.iter().filter_map(|id| rules.get(id).cloned()).collect())
    }

    async fn installed_rules(&self) -> EngineResult<Vec<Rule>> {
        Ok(self.rules.read().values().cloned().collect())
    }
}
