//! Rule id registry
//!
//! Maps `(category, qualifier)` to a stable numeric rule id. Ids below
//! [`FIRST_DYNAMIC_ID`] are reserved for statically installed rules.

use parking_lot::Mutex;
use std::collections::HashMap;

use veil_settings::{Capability, RuleCategory};

use crate::compilers::{http_warning, network};
use crate::rule::RuleId;

pub const FIRST_DYNAMIC_ID: u32 = 1000;

/// Static block rule for search-suggestion endpoints
pub const RESERVED_AUTOCOMPLETE_BLOCK: RuleId = RuleId(400);

/// Qualifier of the content rule carrying the global disabled list
pub const DEFAULT_QUALIFIER: &str = "*";

/// Qualifier of the per-context blocker exception rule
pub const CONTEXT_EXCEPTION_QUALIFIER: &str = "exceptionToStaticRules";

struct Registry {
    ids: HashMap<(RuleCategory, String), RuleId>,
    next: u32,
}

pub struct IdRegistry {
    inner: Mutex<Registry>,
}

impl IdRegistry {
    /// Registry with every fixed rule pre-registered in catalogue order
    pub fn new() -> Self {
        let registry = Self::empty();

        for capability in Capability::in_category(RuleCategory::Network) {
            for qualifier in network::sibling_qualifiers(capability) {
                registry.id_for(RuleCategory::Network, &qualifier);
            }
        }
        registry.id_for(RuleCategory::Allow, Capability::Ads.as_str());
        registry.id_for(RuleCategory::MasterSwitch, Capability::MasterSwitch.as_str());
        registry.id_for(RuleCategory::Content, DEFAULT_QUALIFIER);
        registry.id_for(RuleCategory::ContextException, CONTEXT_EXCEPTION_QUALIFIER);
        for qualifier in [
            http_warning::UPGRADE_QUALIFIER,
            http_warning::WARNING_QUALIFIER,
            http_warning::ALLOW_QUALIFIER,
        ] {
            registry.id_for(RuleCategory::HttpWarning, qualifier);
        }

        registry
    }

    /// Registry with nothing allocated
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(Registry {
                ids: HashMap::new(),
                next: FIRST_DYNAMIC_ID,
            }),
        }
    }

    /// Stable id for the pair; allocated on first use, never reused
    pub fn id_for(&self, category: RuleCategory, qualifier: &str) -> RuleId {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.ids.get(&(category, qualifier.to_string())) {
            return *id;
        }

        let id = RuleId(inner.next);
        inner.next += 1;
        inner.ids.insert((category, qualifier.to_string()), id);
        tracing::trace!(category = %category, qualifier, id = %id, "Allocated rule id");
        id
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        let registry = IdRegistry::empty();
        let a = registry.id_for(RuleCategory::Content, "example.com");
        let b = registry.id_for(RuleCategory::Content, "other.org");

        assert_eq!(a, RuleId(FIRST_DYNAMIC_ID));
        assert_eq!(registry.id_for(RuleCategory::Content, "example.com"), a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_categories_have_separate_names() {
        let registry = IdRegistry::empty();
        let content = registry.id_for(RuleCategory::Content, "ads");
        let allow = registry.id_for(RuleCategory::Allow, "ads");
        assert_ne!(content, allow);
    }

    #[test]
    fn test_fixed_ids_do_not_depend_on_call_order() {
        let first = IdRegistry::new();
        let second = IdRegistry::new();

        first.id_for(RuleCategory::Content, "example.com");
        second.id_for(RuleCategory::Content, "other.org");
        second.id_for(RuleCategory::Content, "example.com");

        for (category, qualifier) in [
            (RuleCategory::Network, "gpc"),
            (RuleCategory::Network, "referrerPolicy1"),
            (RuleCategory::Allow, "ads"),
            (RuleCategory::MasterSwitch, "masterSwitch"),
            (RuleCategory::Content, DEFAULT_QUALIFIER),
            (RuleCategory::ContextException, CONTEXT_EXCEPTION_QUALIFIER),
            (RuleCategory::HttpWarning, http_warning::WARNING_QUALIFIER),
        ] {
            assert_eq!(
                first.id_for(category, qualifier),
                second.id_for(category, qualifier)
            );
        }
    }

    #[test]
    fn test_dynamic_ids_never_collide_with_reserved() {
        let registry = IdRegistry::new();
        let id = registry.id_for(RuleCategory::Content, "example.com");
        assert!(id.0 >= FIRST_DYNAMIC_ID);
        assert!(RESERVED_AUTOCOMPLETE_BLOCK.0 < FIRST_DYNAMIC_ID);
    }
}
