//! Common types shared between the render graph, materials and drivers

use bitflags::bitflags;
use glam::Vec4;

use crate::backend::traits::ProgramHandle;

/// Maximum number of color attachments in one render target
pub const MAX_COLOR_ATTACHMENTS: usize = 4;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    R8Unorm,
    Rg16Float,
    Rgb8Unorm,
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rg11b10Float,
    Rgba16Float,
    Rgba32Float,
    Depth24,
    Depth32Float,
    Depth24Stencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth24 | TextureFormat::Depth32Float | TextureFormat::Depth24Stencil8
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::Depth24Stencil8)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgb8Unorm | TextureFormat::Depth24 => 3,
            TextureFormat::Rg16Float
            | TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Rg11b10Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24Stencil8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be bound as a color attachment.
        const COLOR_ATTACHMENT = 1 << 0;
        /// Texture can be bound as a depth attachment.
        const DEPTH_ATTACHMENT = 1 << 1;
        /// Texture can be bound as a stencil attachment.
        const STENCIL_ATTACHMENT = 1 << 2;
        /// Texture data can be uploaded from the CPU.
        const UPLOADABLE = 1 << 3;
        /// Texture can be sampled in a shader.
        const SAMPLEABLE = 1 << 4;
        /// Usage of textures created outside the graph.
        const DEFAULT = Self::UPLOADABLE.bits() | Self::SAMPLEABLE.bits();
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Number of mip levels of a full chain for the given size
pub fn max_level_count(width: u32, height: u32) -> u8 {
    let size = width.max(height).max(1);
    (u32::BITS - size.leading_zeros()) as u8
}

/// Size of a dimension at a given mip level, never below one texel
pub fn value_for_level(level: u8, value: u32) -> u32 {
    value.checked_shr(u32::from(level)).unwrap_or(0).max(1)
}

/// Texture descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub levels: u8,
    pub format: TextureFormat,
    pub samples: u8,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Single-level, single-sampled 2D texture.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            levels: 1,
            format,
            samples: 1,
            usage: TextureUsage::empty(),
        }
    }

    pub fn with_levels(mut self, levels: u8) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_samples(mut self, samples: u8) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn level_width(&self, level: u8) -> u32 {
        value_for_level(level, self.width)
    }

    pub fn level_height(&self, level: u8) -> u32 {
        value_for_level(level, self.height)
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self::new_2d(1, 1, TextureFormat::Rgba8Unorm)
    }
}

/// Magnification filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerMagFilter {
    #[default]
    Nearest,
    Linear,
}

/// Minification filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerMinFilter {
    #[default]
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

/// Sampler options attached to a texture parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerParams {
    pub filter_mag: SamplerMagFilter,
    pub filter_min: SamplerMinFilter,
}

impl SamplerParams {
    pub const fn new(filter_mag: SamplerMagFilter, filter_min: SamplerMinFilter) -> Self {
        Self {
            filter_mag,
            filter_min,
        }
    }

    pub const fn linear() -> Self {
        Self::new(SamplerMagFilter::Linear, SamplerMinFilter::Linear)
    }

    pub const fn min(filter_min: SamplerMinFilter) -> Self {
        Self::new(SamplerMagFilter::Nearest, filter_min)
    }

    pub const fn mag(filter_mag: SamplerMagFilter) -> Self {
        Self::new(filter_mag, SamplerMinFilter::Nearest)
    }
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFunction {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Equal,
    NotEqual,
    Always,
    Never,
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullingMode {
    None,
    Front,
    Back,
    FrontAndBack,
}

/// Fixed-function state of a draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub culling: CullingMode,
    pub depth_func: DepthFunc,
    pub depth_write: bool,
    pub color_write: bool,
    pub blend_function_src_rgb: BlendFunction,
    pub blend_function_src_alpha: BlendFunction,
    pub blend_function_dst_rgb: BlendFunction,
    pub blend_function_dst_alpha: BlendFunction,
}

impl RasterState {
    pub fn has_blending(&self) -> bool {
        !(self.blend_function_src_rgb == BlendFunction::One
            && self.blend_function_src_alpha == BlendFunction::One
            && self.blend_function_dst_rgb == BlendFunction::Zero
            && self.blend_function_dst_alpha == BlendFunction::Zero)
    }
}

impl Default for RasterState {
    /// Full-screen post-process state: no culling, no depth test, no blending.
    fn default() -> Self {
        Self {
            culling: CullingMode::None,
            depth_func: DepthFunc::Always,
            depth_write: false,
            color_write: true,
            blend_function_src_rgb: BlendFunction::One,
            blend_function_src_alpha: BlendFunction::One,
            blend_function_dst_rgb: BlendFunction::Zero,
            blend_function_dst_alpha: BlendFunction::Zero,
        }
    }
}

/// Rectangle in pixels, origin at the bottom-left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub left: i32,
    pub bottom: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            bottom: 0,
            width,
            height,
        }
    }

    /// Scissor rectangle that clips nothing.
    pub fn unbounded() -> Self {
        Self::new(i32::MAX as u32, i32::MAX as u32)
    }
}

bitflags! {
    /// Attachment slots of a render target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TargetBufferFlags: u32 {
        const COLOR0 = 1 << 0;
        const COLOR1 = 1 << 1;
        const COLOR2 = 1 << 2;
        const COLOR3 = 1 << 3;
        const DEPTH = 1 << 4;
        const STENCIL = 1 << 5;
        const COLOR = Self::COLOR0.bits();
        const COLOR_ALL = Self::COLOR0.bits() | Self::COLOR1.bits() | Self::COLOR2.bits() | Self::COLOR3.bits();
        const DEPTH_AND_STENCIL = Self::DEPTH.bits() | Self::STENCIL.bits();
        const ALL = Self::COLOR_ALL.bits() | Self::DEPTH_AND_STENCIL.bits();
    }
}

impl Default for TargetBufferFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl TargetBufferFlags {
    pub const NONE: Self = Self::empty();

    /// Flag of the color attachment at `index`.
    pub fn color(index: usize) -> Self {
        assert!(
            index < MAX_COLOR_ATTACHMENTS,
            "color attachment index {index} out of range"
        );
        Self::from_bits_truncate(1 << index)
    }
}

/// Load/store behavior of a render pass, per attachment slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderPassFlags {
    /// Attachments cleared at the start of the pass.
    pub clear: TargetBufferFlags,
    /// Attachments whose previous content can be dropped.
    pub discard_start: TargetBufferFlags,
    /// Attachments whose content is not needed after the pass.
    pub discard_end: TargetBufferFlags,
}

/// Parameters of one `begin_render_pass`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassParams {
    pub flags: RenderPassFlags,
    pub viewport: Viewport,
    pub clear_color: Vec4,
    pub clear_depth: f32,
    pub clear_stencil: u8,
}

impl Default for RenderPassParams {
    fn default() -> Self {
        Self {
            flags: RenderPassFlags::default(),
            viewport: Viewport::default(),
            clear_color: Vec4::ZERO,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

/// Everything a driver needs to issue a draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineState {
    pub program: ProgramHandle,
    pub raster_state: RasterState,
    pub scissor: Viewport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_level_count() {
        assert_eq!(max_level_count(1, 1), 1);
        assert_eq!(max_level_count(32, 32), 6);
        assert_eq!(max_level_count(33, 8), 6);
        assert_eq!(max_level_count(1920, 1080), 11);
        assert_eq!(max_level_count(0, 0), 1);
    }

    #[test]
    fn test_value_for_level_never_reaches_zero() {
        assert_eq!(value_for_level(0, 640), 640);
        assert_eq!(value_for_level(3, 640), 80);
        assert_eq!(value_for_level(12, 640), 1);
        assert_eq!(value_for_level(200, 640), 1);
    }

    #[test]
    fn test_color_flag_indexing() {
        assert_eq!(TargetBufferFlags::color(0), TargetBufferFlags::COLOR);
        assert_eq!(TargetBufferFlags::color(2), TargetBufferFlags::COLOR2);
    }

    #[test]
    fn test_default_raster_state_has_no_blending() {
        let mut state = RasterState::default();
        assert!(!state.has_blending());
        state.blend_function_dst_rgb = BlendFunction::One;
        assert!(state.has_blending());
    }
}
