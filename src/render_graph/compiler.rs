//! Render graph compilation.
//!
//! Compiling a frame graph happens in three steps:
//!
//! 1. **Dependencies** - derive pass edges from the versioned accesses
//! 2. **Culling** - keep only passes reachable from the frame roots
//! 3. **Topological Sort** - order survivors, declaration order breaking ties
//!
//! Only read-after-write edges keep a pass alive. Write-after-write and
//! write-after-read edges order passes, so a pass that updates part of a
//! resource must also read it to keep the previous writer.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use thiserror::Error;

use crate::backend::traits::DriverError;

use super::pass::{PassId, PassNode};
use super::resource::{ResourceUsage, VirtualResource};

/// Errors that can occur while compiling or executing a graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Render graphs must be directed acyclic graphs.
    #[error("render graph contains cyclic dependency")]
    CyclicDependency,

    #[error("driver error during graph execution: {0}")]
    Driver(#[from] DriverError),
}

/// Why one pass must run after another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    /// The dependent reads a version the dependency produced.
    ReadAfterWrite,
    /// The dependent overwrites a version the dependency produced.
    WriteAfterWrite,
    /// The dependent overwrites a version the dependency reads.
    WriteAfterRead,
}

impl EdgeKind {
    /// Whether the dependency is needed for the dependent's result.
    pub fn needs(&self) -> bool {
        matches!(self, EdgeKind::ReadAfterWrite)
    }
}

/// Edge between two passes: `dependent` runs after `dependency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassEdge {
    pub dependent: PassId,
    pub dependency: PassId,
    pub kind: EdgeKind,
}

impl PassEdge {
    pub fn new(dependent: PassId, dependency: PassId, kind: EdgeKind) -> Self {
        Self {
            dependent,
            dependency,
            kind,
        }
    }
}

/// Derive every pass edge from the declared accesses.
pub(crate) fn dependencies(passes: &[PassNode], resources: &[VirtualResource]) -> Vec<PassEdge> {
    let mut edges = Vec::new();
    // Readers of each (resource, version) seen so far
    let mut readers: HashMap<(u32, u32), Vec<PassId>> = HashMap::new();

    for node in passes {
        for access in &node.accesses {
            let id = access.resource;
            let resource = &resources[id.index()];
            match access.usage {
                ResourceUsage::Sample | ResourceUsage::Read => {
                    if let Some(producer) = resource.producer(id.version) {
                        if producer != node.id {
                            edges.push(PassEdge::new(node.id, producer, EdgeKind::ReadAfterWrite));
                        }
                    }
                    readers.entry((id.index, id.version)).or_default().push(node.id);
                }
                ResourceUsage::Write => {
                    let previous = id.version - 1;
                    if let Some(producer) = resource.producer(previous) {
                        if producer != node.id {
                            edges.push(PassEdge::new(node.id, producer, EdgeKind::WriteAfterWrite));
                        }
                    }
                    for &reader in readers.get(&(id.index, previous)).into_iter().flatten() {
                        if reader != node.id {
                            edges.push(PassEdge::new(node.id, reader, EdgeKind::WriteAfterRead));
                        }
                    }
                }
            }
        }
    }

    edges.sort();
    edges.dedup();
    edges
}

/// Mark the passes reachable from `roots` through "needs" edges.
pub fn cull(pass_count: usize, edges: &[PassEdge], roots: &[PassId]) -> Vec<bool> {
    let mut needs: Vec<Vec<PassId>> = vec![Vec::new(); pass_count];
    for edge in edges.iter().filter(|e| e.kind.needs()) {
        needs[edge.dependent.index()].push(edge.dependency);
    }

    let mut alive = vec![false; pass_count];
    let mut stack: Vec<PassId> = roots.to_vec();
    while let Some(pass) = stack.pop() {
        if std::mem::replace(&mut alive[pass.index()], true) {
            continue;
        }
        stack.extend(needs[pass.index()].iter().copied());
    }
    alive
}

/// Order the alive passes topologically.
///
/// Kahn's algorithm with a min-heap: among ready passes the earliest
/// declared runs first, so the order is deterministic.
pub fn topological_order(
    pass_count: usize,
    edges: &[PassEdge],
    alive: &[bool],
) -> Result<Vec<PassId>, GraphError> {
    let mut in_degree = vec![0u32; pass_count];
    let mut dependents: Vec<Vec<PassId>> = vec![Vec::new(); pass_count];
    for edge in edges {
        if alive[edge.dependent.index()] && alive[edge.dependency.index()] {
            in_degree[edge.dependent.index()] += 1;
            dependents[edge.dependency.index()].push(edge.dependent);
        }
    }

    let mut ready: BinaryHeap<Reverse<PassId>> = (0..pass_count as u32)
        .map(PassId)
        .filter(|p| alive[p.index()] && in_degree[p.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(pass_count);
    while let Some(Reverse(pass)) = ready.pop() {
        order.push(pass);
        for &dependent in &dependents[pass.index()] {
            in_degree[dependent.index()] -= 1;
            if in_degree[dependent.index()] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    let alive_count = alive.iter().filter(|&&a| a).count();
    if order.len() != alive_count {
        return Err(GraphError::CyclicDependency);
    }
    Ok(order)
}
