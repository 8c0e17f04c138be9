//! Process-wide ownership of canonical cloud buffers

use crate::cloud::CanonicalCloud;
use std::collections::HashMap;

/// Maps cloud ids to their canonical buffers.
///
/// One instance is created at startup and passed by reference to the UI and
/// LOD layers; it is not a module-level singleton. The registry publishes no
/// change events; callers watch `CloudEntry::transform_version` instead.
#[derive(Default)]
pub struct CloudRegistry {
    clouds: HashMap<String, CanonicalCloud>,
}

impl CloudRegistry {
    pub fn new() -> Self {
        Self {
            clouds: HashMap::new(),
        }
    }

    pub fn put(&mut self, id: &str, cloud: CanonicalCloud) {
        self.clouds.insert(id.to_string(), cloud);
    }

    pub fn get(&self, id: &str) -> Option<&CanonicalCloud> {
        self.clouds.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CanonicalCloud> {
        self.clouds.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<CanonicalCloud> {
        self.clouds.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clouds.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.clouds.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.clouds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clouds.is_empty()
    }

    /// Drop every cloud; called on shutdown
    pub fn clear(&mut self) {
        self.clouds.clear();
    }
}
