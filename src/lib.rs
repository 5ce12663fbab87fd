//! postfx-graph - A per-frame render graph and post-processing chain
//!
//! Passes are declared into a [`ResourceGraph`] every frame with the
//! textures they sample, read and write. Compiling the graph culls passes
//! whose outputs nobody consumes, orders the rest and derives texture
//! lifetimes; executing it allocates each texture right before its first
//! use and releases it right after its last.
//!
//! # Features
//! - Versioned resource handles with read-after-write tracking
//! - Pass culling from presented resources and side effects
//! - Load/store (discard) flags derived from resource lifetimes
//! - Effects built on the graph: structure pyramid, SSAO, Gaussian blur,
//!   depth of field, bloom, color grading, FXAA, scaling blits and resolve
//!
//! All GPU work goes through the [`backend::Driver`] trait;
//! [`backend::DummyDriver`] records commands for tests and tooling.

pub mod backend;
pub mod error;
pub mod materials;
pub mod postfx;
pub mod render_graph;

pub use error::{PostFxError, PostFxResult};
pub use postfx::PostProcessManager;
pub use render_graph::{CompiledGraph, GraphError, ResourceGraph, ResourceId};
