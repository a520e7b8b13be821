//! Signal hub
//!
//! Two delivery strategies, kept separate:
//! - top-level contexts read a single-use marker attached to their response
//! - child contexts resolve live through the owning top-level context

use std::sync::Arc;

use veil_settings::{Capability, EffectiveSettings, Entity};

use crate::context::{ContextId, FrameKind};
use crate::error::SignalError;
use crate::jar::MarkerJar;
use crate::lookup::OwnerLookup;
use crate::marker::Marker;
use crate::resolve::resolve_disabled_capabilities;
use crate::Result;

/// What a context learns from one read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalReading {
    pub disabled: Vec<Capability>,
    /// Expiring cookie the reader writes back after a top-level read
    pub erase_cookie: Option<String>,
}

pub struct SignalHub {
    settings: Arc<dyn EffectiveSettings>,
    jar: MarkerJar,
    lookup: OwnerLookup,
}

impl SignalHub {
    pub fn new(settings: Arc<dyn EffectiveSettings>) -> Self {
        Self {
            settings,
            jar: MarkerJar::new(),
            lookup: OwnerLookup::new(),
        }
    }

    /// A top-level document response arrived for `entity`. Records the
    /// navigation and attaches a fresh marker.
    pub fn on_top_level_response(&self, context: ContextId, entity: Entity) -> Result<Marker> {
        let marker = Marker::new(self.resolve_for_entity(&entity)?);
        tracing::debug!(
            context = %context,
            entity = %entity,
            disabled = marker.disabled().len(),
            "Delivering response marker"
        );
        self.lookup.record_navigation(context, entity);
        self.jar.deliver(context, marker.clone());
        Ok(marker)
    }

    pub fn on_child_context(&self, child: ContextId, owner: ContextId) {
        self.lookup.record_child(child, owner);
    }

    /// Read and erase the top-level marker. There is no fallback: once
    /// consumed, the context sees nothing until its next response.
    pub fn take_marker(&self, context: ContextId) -> Option<Marker> {
        self.jar.consume(context)
    }

    pub fn resolve_for_child(&self, child: ContextId) -> Result<Vec<Capability>> {
        let entity = self
            .lookup
            .resolve_entity(child)
            .ok_or(SignalError::UnknownContext(child))?;
        self.resolve_for_entity(&entity)
    }

    pub fn resolve_for_entity(&self, entity: &Entity) -> Result<Vec<Capability>> {
        resolve_disabled_capabilities(self.settings.as_ref(), entity)
    }

    /// Disabled list as seen from inside the context
    pub fn read(&self, context: ContextId, kind: FrameKind) -> Result<Option<SignalReading>> {
        match kind {
            FrameKind::TopLevel => Ok(self.take_marker(context).map(|marker| SignalReading {
                disabled: marker.into_disabled(),
                erase_cookie: Some(Marker::erase_directive()),
            })),
            FrameKind::Child => Ok(Some(SignalReading {
                disabled: self.resolve_for_child(context)?,
                erase_cookie: None,
            })),
        }
    }

    pub fn entity_of(&self, context: ContextId) -> Option<Entity> {
        self.lookup.resolve_entity(context)
    }

    pub fn on_context_destroyed(&self, context: ContextId) {
        self.jar.discard(context);
        let removed = self.lookup.remove(context);
        tracing::trace!(context = %context, removed, "Pruned context links");
    }
}
