//! Material system for the post-process stages.
//!
//! - [`PostProcessMaterial`] - a package compiled by the driver into a
//!   material plus one program per [`PostProcessVariant`]
//! - [`MaterialInstance`] - the typed parameters the next draw will use
//!
//! Shader packages are opaque bytes; the driver owns their format.

mod instance;
mod material;

pub use instance::{MaterialInstance, ParameterBlock, ParameterValue};
pub use material::{MaterialKind, MaterialPackages, PostProcessMaterial, PostProcessVariant};
