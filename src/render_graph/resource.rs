//! Virtual resources for the render graph

use crate::backend::traits::TextureHandle;
use crate::backend::types::*;

use super::pass::PassId;

/// Versioned handle to a render graph resource
///
/// Every `write` produces a new version; handles from before the write are
/// stale and using them panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub(crate) index: u32,
    pub(crate) version: u32,
}

impl ResourceId {
    pub(crate) fn new(index: u32, version: u32) -> Self {
        Self { index, version }
    }

    /// Index of the underlying virtual resource.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

/// Handle to a render target declared by a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetId(pub(crate) u32);

impl RenderTargetId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Where the physical texture of a resource comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOrigin {
    /// Allocated and released by the graph.
    Transient,
    /// Owned outside the graph; never allocated nor destroyed by it.
    Imported(TextureHandle),
}

/// Virtual texture resource in the render graph
#[derive(Debug, Clone)]
pub struct VirtualResource {
    pub name: String,
    pub desc: TextureDescriptor,
    pub origin: ResourceOrigin,
    /// Current version; the only one new accesses may use.
    pub(crate) version: u32,
    /// Producing pass of each version.
    pub(crate) producers: Vec<Option<PassId>>,
    /// Pass that declared the resource, `None` for imports.
    pub(crate) created_by: Option<PassId>,
}

impl VirtualResource {
    pub(crate) fn transient(name: &str, desc: TextureDescriptor, pass: PassId) -> Self {
        Self {
            name: name.to_string(),
            desc,
            origin: ResourceOrigin::Transient,
            version: 0,
            producers: vec![None],
            created_by: Some(pass),
        }
    }

    pub(crate) fn imported(name: &str, desc: TextureDescriptor, texture: TextureHandle) -> Self {
        Self {
            name: name.to_string(),
            desc,
            origin: ResourceOrigin::Imported(texture),
            version: 0,
            producers: vec![None],
            created_by: None,
        }
    }

    pub fn is_imported(&self) -> bool {
        matches!(self.origin, ResourceOrigin::Imported(_))
    }

    pub(crate) fn producer(&self, version: u32) -> Option<PassId> {
        self.producers.get(version as usize).copied().flatten()
    }
}

/// How a pass uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Read through a sampler (mipmapping and filtering allowed)
    Sample,
    /// Plain read, e.g. a blit source or a depth-test attachment
    Read,
    /// Write, producing a new version
    Write,
}

/// Resource access declaration for a pass
///
/// For writes, `resource` is the version produced by the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        matches!(self.usage, ResourceUsage::Sample | ResourceUsage::Read)
    }

    pub fn is_write(&self) -> bool {
        self.usage == ResourceUsage::Write
    }
}

/// Resource lifetime in terms of pass execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}

impl ResourceLifetime {
    pub fn contains(&self, step: usize) -> bool {
        step >= self.first_use && step <= self.last_use
    }
}
