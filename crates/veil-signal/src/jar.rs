//! Single-use marker slots, one per top-level context

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::context::ContextId;
use crate::marker::Marker;

#[derive(Default)]
pub struct MarkerJar {
    slots: Mutex<HashMap<ContextId, Marker>>,
}

impl MarkerJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a fresh marker for the context's latest response. An unread
    /// marker from an earlier response is replaced.
    pub fn deliver(&self, context: ContextId, marker: Marker) {
        self.slots.lock().insert(context, marker);
    }

    /// Read and erase. A second call returns `None`.
    pub fn consume(&self, context: ContextId) -> Option<Marker> {
        self.slots.lock().remove(&context)
    }

    pub fn discard(&self, context: ContextId) {
        self.slots.lock().remove(&context);
    }

    pub fn pending(&self) -> usize {
        self.slots.lock().len()
    }
}
