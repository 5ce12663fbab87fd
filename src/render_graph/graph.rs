//! Render graph definition and compilation

use std::collections::HashSet;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::blackboard::Blackboard;
use crate::render_graph::compiler::{self, GraphError, PassEdge};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// The per-frame render graph
///
/// Passes are declared in order; each `setup` runs immediately and declares
/// what the pass creates, reads and writes. Nothing touches the driver until
/// the graph is compiled and executed.
pub struct ResourceGraph {
    passes: Vec<PassNode>,
    executors: Vec<Box<dyn PassExecutor>>,
    resources: Vec<VirtualResource>,
    render_targets: Vec<RenderTargetNode>,
    /// Versions the frame needs
    presented: Vec<ResourceId>,
    blackboard: Blackboard,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            executors: Vec::new(),
            resources: Vec::new(),
            render_targets: Vec::new(),
            presented: Vec::new(),
            blackboard: Blackboard::new(),
        }
    }

    /// Add a pass whose executor is a closure over the pass data
    ///
    /// `setup` runs right away and returns the pass data; the executor gets a
    /// reference to its own copy when the compiled graph runs.
    pub fn add_pass<D, S, E>(&mut self, name: &str, setup: S, execute: E) -> D
    where
        D: Clone + Send + 'static,
        S: FnOnce(&mut PassBuilder<'_>) -> D,
        E: FnOnce(&D, &PassResources<'_>, &mut dyn Driver) -> DriverResult<()> + Send + 'static,
    {
        let data = self.declare_pass(name, setup);
        let captured = data.clone();
        self.executors.push(Box::new(
            move |resources: &PassResources<'_>, driver: &mut dyn Driver| {
                execute(&captured, resources, driver)
            },
        ));
        data
    }

    /// Add a pass whose setup returns an explicit command object
    pub fn add_command_pass<P, S>(&mut self, name: &str, setup: S)
    where
        P: PassExecutor + 'static,
        S: FnOnce(&mut PassBuilder<'_>) -> P,
    {
        let command = self.declare_pass(name, setup);
        self.executors.push(Box::new(command));
    }

    fn declare_pass<T, S>(&mut self, name: &str, setup: S) -> T
    where
        S: FnOnce(&mut PassBuilder<'_>) -> T,
    {
        let id = PassId(self.passes.len() as u32);
        let mut node = PassNode::new(id, name);
        let result = {
            let mut builder = PassBuilder {
                node: &mut node,
                resources: &mut self.resources,
                render_targets: &mut self.render_targets,
            };
            setup(&mut builder)
        };
        log::trace!(
            "Declared pass '{}' with {} accesses",
            node.name,
            node.accesses.len()
        );
        self.passes.push(node);
        result
    }

    /// Register a texture owned outside the graph
    ///
    /// Its content is considered written; the graph never allocates nor
    /// destroys it.
    pub fn import_texture(
        &mut self,
        name: &str,
        desc: TextureDescriptor,
        texture: TextureHandle,
    ) -> ResourceId {
        let index = self.resources.len() as u32;
        self.resources
            .push(VirtualResource::imported(name, desc, texture));
        ResourceId::new(index, 0)
    }

    /// Mark a resource version as needed by the frame
    pub fn present(&mut self, resource: ResourceId) {
        let virtual_resource = self.resource(resource);
        assert!(
            resource.version <= virtual_resource.version,
            "presenting unknown version {} of '{}'",
            resource.version,
            virtual_resource.name
        );
        self.presented.push(resource);
    }

    pub fn descriptor(&self, resource: ResourceId) -> TextureDescriptor {
        self.resource(resource).desc
    }

    pub fn name(&self, resource: ResourceId) -> &str {
        &self.resource(resource).name
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Pass node (metadata) by ID
    pub fn pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.passes.get(id.index())
    }

    fn resource(&self, resource: ResourceId) -> &VirtualResource {
        self.resources
            .get(resource.index())
            .unwrap_or_else(|| panic!("unknown resource {:?}", resource))
    }

    /// Cull, order and plan the lifetime of every surviving resource
    pub fn compile(self) -> Result<CompiledGraph, GraphError> {
        let pass_count = self.passes.len();
        let edges = compiler::dependencies(&self.passes, &self.resources);

        let mut roots: Vec<PassId> = self
            .presented
            .iter()
            .filter_map(|id| self.resources[id.index()].producer(id.version))
            .collect();
        roots.extend(self.passes.iter().filter(|p| p.side_effect).map(|p| p.id));

        let alive = compiler::cull(pass_count, &edges, &roots);
        let pass_order = compiler::topological_order(pass_count, &edges, &alive)?;

        let culled: Vec<PassId> = self
            .passes
            .iter()
            .filter(|p| !alive[p.id.index()])
            .map(|p| p.id)
            .collect();
        for id in &culled {
            log::debug!("Culled pass '{}'", self.passes[id.index()].name);
        }

        // Lifetimes and usage over surviving passes only
        let mut lifetimes: Vec<Option<ResourceLifetime>> = vec![None; self.resources.len()];
        let mut usage: Vec<TextureUsage> = self.resources.iter().map(|r| r.desc.usage).collect();
        for (step, pass) in pass_order.iter().enumerate() {
            let node = &self.passes[pass.index()];
            for index in node.resource_indices() {
                let lifetime = lifetimes[index as usize].get_or_insert(ResourceLifetime {
                    first_use: step,
                    last_use: step,
                });
                lifetime.last_use = step;
            }
            for access in &node.accesses {
                if access.usage == ResourceUsage::Sample {
                    usage[access.resource.index()] |= TextureUsage::SAMPLEABLE;
                }
            }
            for target in &node.render_targets {
                for (slot, attachment) in self.render_targets[target.index()].desc.attachments() {
                    usage[attachment.resource.index()] |= attachment_usage(slot);
                }
            }
        }

        let mut allocations = vec![Vec::new(); pass_order.len()];
        let mut releases = vec![Vec::new(); pass_order.len()];
        for (index, lifetime) in lifetimes.iter().enumerate() {
            let Some(lifetime) = lifetime else { continue };
            if self.resources[index].is_imported() {
                continue;
            }
            allocations[lifetime.first_use].push(index as u32);
            releases[lifetime.last_use].push(index as u32);
        }

        let presented: HashSet<u32> = self.presented.iter().map(|id| id.index).collect();

        let mut executors: Vec<Option<Box<dyn PassExecutor>>> =
            self.executors.into_iter().map(Some).collect();
        for id in &culled {
            executors[id.index()] = None;
        }

        log::debug!(
            "Compiled render graph: {} passes, {} culled, {} edges",
            pass_order.len(),
            culled.len(),
            edges.len()
        );

        Ok(CompiledGraph {
            passes: self.passes,
            executors,
            resources: self.resources,
            render_targets: self.render_targets,
            edges,
            pass_order,
            culled,
            lifetimes,
            usage,
            allocations,
            releases,
            presented,
        })
    }
}

impl Default for ResourceGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn attachment_usage(slot: TargetBufferFlags) -> TextureUsage {
    if slot == TargetBufferFlags::DEPTH {
        TextureUsage::DEPTH_ATTACHMENT
    } else if slot == TargetBufferFlags::STENCIL {
        TextureUsage::STENCIL_ATTACHMENT
    } else {
        TextureUsage::COLOR_ATTACHMENT
    }
}

/// Compiled render graph with execution order and resource lifetimes
pub struct CompiledGraph {
    pub(crate) passes: Vec<PassNode>,
    pub(crate) executors: Vec<Option<Box<dyn PassExecutor>>>,
    pub(crate) resources: Vec<VirtualResource>,
    pub(crate) render_targets: Vec<RenderTargetNode>,
    pub(crate) edges: Vec<PassEdge>,
    pub(crate) pass_order: Vec<PassId>,
    pub(crate) culled: Vec<PassId>,
    pub(crate) lifetimes: Vec<Option<ResourceLifetime>>,
    pub(crate) usage: Vec<TextureUsage>,
    /// Transient resources allocated before each step
    pub(crate) allocations: Vec<Vec<u32>>,
    /// Transient resources released after each step
    pub(crate) releases: Vec<Vec<u32>>,
    pub(crate) presented: HashSet<u32>,
}

impl CompiledGraph {
    /// Surviving passes in execution order
    pub fn pass_order(&self) -> &[PassId] {
        &self.pass_order
    }

    pub fn culled_passes(&self) -> &[PassId] {
        &self.culled
    }

    pub fn pass_name(&self, id: PassId) -> &str {
        &self.passes[id.index()].name
    }

    /// Names of the surviving passes in execution order
    pub fn pass_names(&self) -> Vec<&str> {
        self.pass_order
            .iter()
            .map(|id| self.passes[id.index()].name.as_str())
            .collect()
    }

    pub fn edges(&self) -> &[PassEdge] {
        &self.edges
    }

    /// Lifetime of a resource, `None` if no surviving pass uses it
    pub fn resource_lifetime(&self, resource: ResourceId) -> Option<ResourceLifetime> {
        self.lifetimes.get(resource.index()).copied().flatten()
    }

    /// Usage flags derived from every surviving access
    pub fn resource_usage(&self, resource: ResourceId) -> TextureUsage {
        self.usage[resource.index()]
    }

    /// Check if a resource is alive at a given execution step
    pub fn is_resource_alive(&self, resource: ResourceId, step: usize) -> bool {
        self.resource_lifetime(resource)
            .is_some_and(|lifetime| lifetime.contains(step))
    }
}
