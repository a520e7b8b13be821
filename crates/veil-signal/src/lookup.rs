//! Owner-context lookup
//!
//! Child contexts (subframes, workers) never see a response marker of their
//! own. They resolve through the top-level context that owns them.

use parking_lot::RwLock;
use std::collections::HashMap;

use veil_settings::Entity;

use crate::context::ContextId;

#[derive(Default)]
struct Links {
    /// top-level context -> entity it last navigated to
    entities: HashMap<ContextId, Entity>,
    /// child -> owning top-level context
    owners: HashMap<ContextId, ContextId>,
}

#[derive(Default)]
pub struct OwnerLookup {
    links: RwLock<Links>,
}

impl OwnerLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_navigation(&self, context: ContextId, entity: Entity) {
        self.links.write().entities.insert(context, entity);
    }

    pub fn record_child(&self, child: ContextId, owner: ContextId) {
        let mut links = self.links.write();
        // A child of a child belongs to the same top-level context
        let owner = links.owners.get(&owner).copied().unwrap_or(owner);
        links.owners.insert(child, owner);
    }

    pub fn owner_of(&self, child: ContextId) -> Option<ContextId> {
        self.links.read().owners.get(&child).copied()
    }

    pub fn entity_of(&self, context: ContextId) -> Option<Entity> {
        self.links.read().entities.get(&context).cloned()
    }

    /// Entity whose settings apply to the context: its own for a top-level
    /// context, the owner's for a child.
    pub fn resolve_entity(&self, context: ContextId) -> Option<Entity> {
        let links = self.links.read();
        let top = links.owners.get(&context).copied().unwrap_or(context);
        links.entities.get(&top).cloned()
    }

    /// Drop the context. Destroying an owner also drops its children.
    /// Returns the number of links removed.
    pub fn remove(&self, context: ContextId) -> usize {
        let mut links = self.links.write();
        let mut removed = 0;

        if links.entities.remove(&context).is_some() {
            removed += 1;
        }
        if links.owners.remove(&context).is_some() {
            removed += 1;
        }

        let before = links.owners.len();
        links.owners.retain(|_, owner| *owner != context);
        removed += before - links.owners.len();

        removed
    }

    pub fn len(&self) -> usize {
        let links = self.links.read();
        links.entities.len() + links.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
