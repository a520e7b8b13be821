//! Per-rule-id serialization
//!
//! Every read-modify-install cycle holds the locks of the ids it touches.
//! Ids are locked in ascending order so overlapping cycles cannot deadlock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::rule::RuleId;

#[derive(Default)]
pub struct IdLocks {
    locks: Mutex<HashMap<RuleId, Arc<AsyncMutex<()>>>>,
}

/// Held locks; released on drop
pub struct IdGuard {
    ids: Vec<RuleId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl IdGuard {
    pub fn ids(&self) -> &[RuleId] {
        &self.ids
    }
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: RuleId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.locks.lock().entry(id).or_default())
    }

    pub async fn acquire(&self, ids: &[RuleId]) -> IdGuard {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push(self.lock_for(*id).lock_owned().await);
        }

        IdGuard {
            ids,
            _guards: guards,
        }
    }
}
