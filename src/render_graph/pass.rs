//! Render pass definitions for the render graph

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::resource::*;
use crate::render_graph::target::RenderTargetDesc;

/// Unique identifier for a render pass, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Deferred command of a pass
///
/// Runs at most once, after the whole frame graph was compiled. Closures
/// taking `(&PassResources, &mut dyn Driver)` implement it directly.
pub trait PassExecutor: Send {
    fn execute(
        self: Box<Self>,
        resources: &PassResources<'_>,
        driver: &mut dyn Driver,
    ) -> DriverResult<()>;
}

impl<F> PassExecutor for F
where
    F: FnOnce(&PassResources<'_>, &mut dyn Driver) -> DriverResult<()> + Send,
{
    fn execute(
        self: Box<Self>,
        resources: &PassResources<'_>,
        driver: &mut dyn Driver,
    ) -> DriverResult<()> {
        (*self)(resources, driver)
    }
}

/// A render target declared by a pass
#[derive(Debug, Clone)]
pub struct RenderTargetNode {
    pub name: String,
    pub pass: PassId,
    pub desc: RenderTargetDesc,
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub accesses: Vec<ResourceAccess>,
    /// Indices of the resources created by this pass.
    pub created: Vec<u32>,
    pub render_targets: Vec<RenderTargetId>,
    /// Never culled.
    pub side_effect: bool,
}

impl PassNode {
    pub(crate) fn new(id: PassId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            accesses: Vec::new(),
            created: Vec::new(),
            render_targets: Vec::new(),
            side_effect: false,
        }
    }

    /// Whether the pass declared this exact version.
    pub fn declares(&self, resource: ResourceId) -> bool {
        self.accesses.iter().any(|a| a.resource == resource)
            || (resource.version == 0 && self.created.contains(&resource.index))
    }

    pub fn reads(&self, resource: ResourceId) -> bool {
        self.accesses
            .iter()
            .any(|a| a.is_read() && a.resource == resource)
    }

    /// Indices of every resource this pass touches.
    pub(crate) fn resource_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.accesses
            .iter()
            .map(|a| a.resource.index)
            .chain(self.created.iter().copied())
    }
}

/// Context for declaring the resources of a pass
pub struct PassBuilder<'a> {
    pub(crate) node: &'a mut PassNode,
    pub(crate) resources: &'a mut Vec<VirtualResource>,
    pub(crate) render_targets: &'a mut Vec<RenderTargetNode>,
}

impl<'a> PassBuilder<'a> {
    pub fn pass_name(&self) -> &str {
        &self.node.name
    }

    /// Create a new texture resource at version 0
    pub fn create_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceId {
        assert!(
            desc.width > 0 && desc.height > 0 && desc.levels > 0,
            "pass '{}': texture '{}' has a degenerate descriptor {:?}",
            self.node.name,
            name,
            desc
        );
        let index = self.resources.len() as u32;
        self.resources
            .push(VirtualResource::transient(name, desc, self.node.id));
        self.node.created.push(index);
        ResourceId::new(index, 0)
    }

    /// Declare a sampled read
    pub fn sample(&mut self, resource: ResourceId) -> ResourceId {
        self.declare_read(resource, ResourceUsage::Sample)
    }

    /// Declare a plain read (blit source, depth-test attachment)
    pub fn read(&mut self, resource: ResourceId) -> ResourceId {
        self.declare_read(resource, ResourceUsage::Read)
    }

    /// Declare a write; downstream users must use the returned handle
    pub fn write(&mut self, resource: ResourceId) -> ResourceId {
        self.check_current(resource, "write");
        let pass = self.node.id;
        let virtual_resource = &mut self.resources[resource.index()];
        virtual_resource.version += 1;
        virtual_resource.producers.push(Some(pass));
        let written = ResourceId::new(resource.index, virtual_resource.version);
        self.node.accesses.push(ResourceAccess {
            resource: written,
            usage: ResourceUsage::Write,
        });
        written
    }

    /// Declare a render target over resources this pass already declared
    pub fn create_render_target(&mut self, name: &str, desc: RenderTargetDesc) -> RenderTargetId {
        let pass_name = &self.node.name;
        let mut size = None;
        let mut count = 0;
        for (slot, attachment) in desc.attachments() {
            count += 1;
            assert!(
                self.node.declares(attachment.resource),
                "pass '{pass_name}': render target '{name}' attaches {:?} ({slot:?}) which the pass did not declare",
                attachment.resource
            );
            let resource = &self.resources[attachment.resource.index()];
            assert!(
                attachment.level < resource.desc.levels,
                "pass '{pass_name}': render target '{name}' uses level {} of '{}' which has {} levels",
                attachment.level,
                resource.name,
                resource.desc.levels
            );
            let dims = (
                resource.desc.level_width(attachment.level),
                resource.desc.level_height(attachment.level),
            );
            match size {
                None => size = Some(dims),
                Some(expected) => assert_eq!(
                    expected, dims,
                    "pass '{pass_name}': render target '{name}' mixes attachment sizes"
                ),
            }
        }
        assert!(
            count > 0,
            "pass '{pass_name}': render target '{name}' has no attachment"
        );
        if desc.clear_flags.intersects(TargetBufferFlags::COLOR_ALL) {
            assert!(
                desc.color.iter().any(Option::is_some),
                "pass '{pass_name}': render target '{name}' clears color without a color attachment"
            );
        }
        if desc.clear_flags.contains(TargetBufferFlags::DEPTH) {
            assert!(
                desc.depth.is_some(),
                "pass '{pass_name}': render target '{name}' clears depth without a depth attachment"
            );
        }

        let id = RenderTargetId(self.render_targets.len() as u32);
        self.render_targets.push(RenderTargetNode {
            name: name.to_string(),
            pass: self.node.id,
            desc,
        });
        self.node.render_targets.push(id);
        id
    }

    /// Keep this pass even if nothing consumes its outputs
    pub fn side_effect(&mut self) {
        self.node.side_effect = true;
    }

    pub fn descriptor(&self, resource: ResourceId) -> TextureDescriptor {
        self.resource(resource).desc
    }

    pub fn name(&self, resource: ResourceId) -> &str {
        &self.resource(resource).name
    }

    fn resource(&self, resource: ResourceId) -> &VirtualResource {
        self.resources.get(resource.index()).unwrap_or_else(|| {
            panic!(
                "pass '{}': unknown resource {:?}",
                self.node.name, resource
            )
        })
    }

    fn check_current(&self, resource: ResourceId, op: &str) {
        let current = self.resource(resource).version;
        assert!(
            resource.version == current,
            "pass '{}': {op} of '{}' uses stale version {} (current is {})",
            self.node.name,
            self.resource(resource).name,
            resource.version,
            current
        );
    }

    fn declare_read(&mut self, resource: ResourceId, usage: ResourceUsage) -> ResourceId {
        self.check_current(resource, "read");
        let virtual_resource = self.resource(resource);
        let written = virtual_resource.producer(resource.version).is_some()
            || virtual_resource.is_imported()
            || virtual_resource.created_by == Some(self.node.id);
        assert!(
            written,
            "pass '{}': reads '{}' which was never written",
            self.node.name, virtual_resource.name
        );
        self.node.accesses.push(ResourceAccess { resource, usage });
        resource
    }
}

/// A physical render target with the render-pass params derived for it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRenderTarget {
    pub target: RenderTargetHandle,
    pub params: RenderPassParams,
}

/// Resolves the virtual handles of one pass during execution
pub struct PassResources<'a> {
    pub(crate) node: &'a PassNode,
    pub(crate) resources: &'a [VirtualResource],
    pub(crate) textures: &'a [Option<TextureHandle>],
    pub(crate) targets: &'a HashMap<RenderTargetId, ResolvedRenderTarget>,
}

impl<'a> PassResources<'a> {
    pub fn pass_name(&self) -> &str {
        &self.node.name
    }

    /// Physical texture of a resource the pass declared.
    pub fn texture(&self, resource: ResourceId) -> TextureHandle {
        assert!(
            self.node.declares(resource),
            "pass '{}': resolving {:?} which the pass did not declare",
            self.node.name,
            resource
        );
        self.textures
            .get(resource.index())
            .copied()
            .flatten()
            .unwrap_or_else(|| {
                panic!(
                    "pass '{}': resource {:?} has no physical texture",
                    self.node.name, resource
                )
            })
    }

    pub fn descriptor(&self, resource: ResourceId) -> TextureDescriptor {
        self.resources[resource.index()].desc
    }

    pub fn render_target(&self, target: RenderTargetId) -> ResolvedRenderTarget {
        match self.targets.get(&target) {
            Some(resolved) => *resolved,
            None => panic!(
                "pass '{}': render target {:?} was not declared by this pass",
                self.node.name, target
            ),
        }
    }
}
