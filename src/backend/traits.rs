//! Core driver abstraction
//!
//! The render graph and the post-process stages only talk to the device
//! through the [`Driver`] trait. Implementations translate these calls to a
//! concrete graphics API; [`DummyDriver`](crate::backend::dummy::DummyDriver)
//! records them for tests.

use crate::backend::types::*;
use crate::materials::ParameterBlock;
use thiserror::Error;

/// Driver error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to upload texture data: {0}")]
    TextureUploadFailed(String),
    #[error("Failed to create render target: {0}")]
    RenderTargetCreationFailed(String),
    #[error("Failed to create material: {0}")]
    MaterialCreationFailed(String),
    #[error("Failed to create program variant {variant}: {reason}")]
    ProgramCreationFailed { variant: u8, reason: String },
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a render target (a set of attachments)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(pub(crate) u64);

/// Handle to a material built from a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub(crate) u64);

/// Handle to one compiled variant of a material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

macro_rules! impl_handle {
    ($($handle:ident),*) => {
        $(
            impl $handle {
                /// Wrap a driver-specific identifier.
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                /// The driver-specific identifier.
                pub const fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

impl_handle!(TextureHandle, RenderTargetHandle, MaterialHandle, ProgramHandle);

/// A texture level bound to a render target slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetAttachment {
    pub texture: TextureHandle,
    pub level: u8,
}

/// Physical description of a render target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetInfo {
    pub label: String,
    pub attachments: TargetBufferFlags,
    pub width: u32,
    pub height: u32,
    pub samples: u8,
    pub color: [Option<TargetAttachment>; MAX_COLOR_ATTACHMENTS],
    pub depth: Option<TargetAttachment>,
    pub stencil: Option<TargetAttachment>,
}

/// Device operations consumed by the render graph and the post-process stages
///
/// Recording calls (render passes, draws, blits) cannot fail from the
/// caller's point of view; a driver reports device loss on the next
/// fallible call.
pub trait Driver {
    /// Create a texture resource.
    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> DriverResult<TextureHandle>;

    /// Upload pixel data into one level of a 2D texture.
    fn update_texture_2d(
        &mut self,
        texture: TextureHandle,
        level: u8,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> DriverResult<()>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_render_target(&mut self, info: &RenderTargetInfo) -> DriverResult<RenderTargetHandle>;

    fn destroy_render_target(&mut self, target: RenderTargetHandle);

    /// Build a material from its binary package.
    fn create_material(&mut self, package: &[u8]) -> DriverResult<MaterialHandle>;

    /// Compile one shader variant of a material.
    fn create_program(&mut self, material: MaterialHandle, variant: u8)
        -> DriverResult<ProgramHandle>;

    /// Number of elements of an array parameter, if the material declares it.
    fn parameter_array_size(&self, material: MaterialHandle, name: &str) -> Option<usize>;

    /// Release a material and all of its programs.
    fn destroy_material(&mut self, material: MaterialHandle);

    /// Upload the parameter block of a material instance.
    fn commit_parameters(&mut self, material: MaterialHandle, parameters: &ParameterBlock);

    /// Make a material's committed parameters current for the next draws.
    fn bind_material(&mut self, material: MaterialHandle);

    fn begin_render_pass(&mut self, target: RenderTargetHandle, params: &RenderPassParams);

    /// Advance to the next subpass of the current render pass.
    fn next_subpass(&mut self);

    fn end_render_pass(&mut self);

    /// Draw the full-screen triangle with the given pipeline.
    fn draw(&mut self, pipeline: &PipelineState);

    fn blit(
        &mut self,
        buffers: TargetBufferFlags,
        dst: RenderTargetHandle,
        dst_viewport: Viewport,
        src: RenderTargetHandle,
        src_viewport: Viewport,
        filter: SamplerMagFilter,
    );

    /// Whether subpasses can read the previous subpass output in place.
    fn is_frame_buffer_fetch_supported(&self) -> bool;
}
