//! Weak tracking of resources currently held by consumers.

use crate::request::RequestKey;
use crate::resource::{EngineResource, EngineResourceState, ResourceId};
use pictor_common::Resource;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::trace;

struct ActiveEntry {
    id: ResourceId,
    resource: Weak<EngineResourceState>,
    /// Strong payload kept for cacheable resources when retention is allowed.
    retained: Option<Arc<Resource>>,
}

/// A payload whose consumers all vanished without releasing it.
#[derive(Debug)]
pub(crate) struct Reclaimed {
    pub key: RequestKey,
    pub resource: Arc<Resource>,
}

/// Maps request keys to the resources consumers currently hold.
///
/// Entries never keep an [`EngineResource`] alive. When every handle of an
/// active resource goes away without a release the entry is cleaned up: if
/// its payload was retained it is handed back through [`take_reclaimed`] so
/// the engine can move it into the memory cache.
///
/// [`take_reclaimed`]: ActiveResources::take_reclaimed
pub(crate) struct ActiveResources {
    entries: HashMap<RequestKey, ActiveEntry>,
    retention_allowed: bool,
    reclaimed: Vec<Reclaimed>,
}

impl ActiveResources {
    pub fn new(retention_allowed: bool) -> Self {
        Self { entries: HashMap::new(), retention_allowed, reclaimed: Vec::new() }
    }

    /// Track `resource` under `key`, replacing any previous entry.
    pub fn activate(&mut self, key: RequestKey, resource: &EngineResource) {
        let retained = (resource.is_cacheable() && self.retention_allowed)
            .then(|| Arc::clone(resource.resource()));
        let entry = ActiveEntry { id: resource.id(), resource: resource.downgrade(), retained };
        if let Some(previous) = self.entries.insert(key, entry) {
            trace!("Replaced active resource {}", previous.id);
        }
    }

    /// Stop tracking `key`.
    pub fn deactivate(&mut self, key: &RequestKey) {
        self.entries.remove(key);
    }

    /// The live resource for `key`. The returned handle carries no acquisition.
    pub fn get(&mut self, key: &RequestKey) -> Option<EngineResource> {
        let entry = self.entries.get(key)?;
        match EngineResource::upgrade(&entry.resource) {
            Some(resource) => Some(resource),
            None => {
                let id = entry.id;
                self.cleanup(key, id);
                None
            }
        }
    }

    /// Handle the collection of resource `id`. Ignored unless `id` is still
    /// the active entry for `key`.
    pub fn cleanup(&mut self, key: &RequestKey, id: ResourceId) {
        if self.entries.get(key).map_or(true, |entry| entry.id != id) {
            return;
        }
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        trace!("Cleaning up collected active resource {id} for {key}");
        if let Some(resource) = entry.retained {
            self.reclaimed.push(Reclaimed { key: key.clone(), resource });
        }
    }

    /// Clean up every entry whose resource has been collected.
    pub fn sweep(&mut self) -> usize {
        let dead: Vec<(RequestKey, ResourceId)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.resource.strong_count() == 0)
            .map(|(key, entry)| (key.clone(), entry.id))
            .collect();
        for (key, id) in &dead {
            self.cleanup(key, *id);
        }
        dead.len()
    }

    /// Payloads recovered from forgotten releases since the last call.
    pub fn take_reclaimed(&mut self) -> Vec<Reclaimed> {
        std::mem::take(&mut self.reclaimed)
    }

    #[cfg(test)]
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<RequestKey> {
        self.entries.keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
