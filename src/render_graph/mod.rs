//! Render Graph System
//!
//! Each frame declares its passes into a [`ResourceGraph`]. Resources are
//! virtual and versioned: every write yields a new handle, and the graph
//! derives pass dependencies from which versions each pass touches.
//! Compiling culls passes nothing needs and orders the rest; executing
//! allocates physical textures just in time and releases them after their
//! last user.

pub mod blackboard;
pub mod compiler;
pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;
pub mod target;

pub use blackboard::Blackboard;
pub use compiler::{EdgeKind, GraphError, PassEdge};
pub use graph::*;
pub use pass::*;
pub use resource::*;
pub use target::*;
