//! Frame-scoped named handles.

use std::collections::HashMap;

use super::resource::ResourceId;

/// Maps names to resource handles for the lifetime of one frame graph.
///
/// Stages that publish an intermediate (e.g. `"structure"`) put its latest
/// handle here; later stages may look it up instead of threading it through.
#[derive(Debug, Default)]
pub struct Blackboard {
    entries: HashMap<String, ResourceId>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a handle, replacing any previous entry with that name.
    pub fn put(&mut self, name: &str, resource: ResourceId) {
        self.entries.insert(name.to_string(), resource);
    }

    pub fn get(&self, name: &str) -> Option<ResourceId> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ResourceId> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
