use veil_settings::{Capability, EffectiveSettings, Entity, RuleCategory};

use crate::Result;

/// Content capabilities that resolve to disabled for the entity, sorted.
///
/// Traffic-only capabilities and `ads` have nothing to enforce inside the
/// page and are never listed.
pub fn resolve_disabled_capabilities(
    settings: &dyn EffectiveSettings,
    entity: &Entity,
) -> Result<Vec<Capability>> {
    let mut disabled = Vec::new();
    for capability in Capability::in_category(RuleCategory::Content) {
        if !settings.effective(entity, capability)? {
            disabled.push(capability);
        }
    }
    disabled.sort();
    Ok(disabled)
}
