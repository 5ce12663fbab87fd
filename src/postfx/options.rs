//! User-facing post-process options.
//!
//! Plain structs with the renderer's documented defaults. They are copied
//! into pass executors, so all of them are `Copy`.

use glam::{Mat4, Vec4};

use crate::backend::{TextureFormat, TextureHandle};

/// Quality tier shared by several effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QualityLevel {
    #[default]
    Low = 0,
    Medium = 1,
    High = 2,
    Ultra = 3,
}

/// Screen-space ambient occlusion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientOcclusionOptions {
    /// Occlusion radius in meters.
    pub radius: f32,
    /// Contrast control.
    pub power: f32,
    /// Self-occlusion bias in meters.
    pub bias: f32,
    /// Resolution scale of the AO buffer relative to the structure.
    pub resolution: f32,
    pub intensity: f32,
    pub quality: QualityLevel,
    /// Quality of the final upsampling, decides the blurred buffer format.
    pub upsampling: QualityLevel,
}

impl Default for AmbientOcclusionOptions {
    fn default() -> Self {
        Self {
            radius: 0.3,
            power: 1.0,
            bias: 0.0005,
            resolution: 0.5,
            intensity: 1.0,
            quality: QualityLevel::Low,
            upsampling: QualityLevel::Low,
        }
    }
}

/// How bloom is combined with the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BloomBlendMode {
    #[default]
    Add,
    Interpolate,
}

/// An externally owned lens-dirt texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtTexture {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Bloom
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomOptions {
    pub dirt: Option<DirtTexture>,
    pub dirt_strength: f32,
    /// Clamped to `[0, 1]` when applied.
    pub strength: f32,
    /// Resolution of the minor axis of the bloom buffer.
    pub resolution: u32,
    /// Bloom x/y aspect ratio.
    pub anamorphism: f32,
    /// Requested mip levels, at most 12 are used.
    pub levels: u8,
    pub blend_mode: BloomBlendMode,
    /// Only bloom highlights above 1.0.
    pub threshold: bool,
    pub enabled: bool,
}

impl Default for BloomOptions {
    fn default() -> Self {
        Self {
            dirt: None,
            dirt_strength: 0.2,
            strength: 0.10,
            resolution: 360,
            anamorphism: 1.0,
            levels: 6,
            blend_mode: BloomBlendMode::Add,
            threshold: true,
            enabled: false,
        }
    }
}

/// Depth of field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthOfFieldOptions {
    /// Focus distance in world units.
    pub focus_distance: f32,
    /// Scale factor on the circle of confusion.
    pub blur_scale: f32,
    /// Aperture at which the bokeh stops rotating, 0 disables the rotation.
    pub max_aperture_diameter: f32,
}

impl Default for DepthOfFieldOptions {
    fn default() -> Self {
        Self {
            focus_distance: 10.0,
            blur_scale: 1.0,
            max_aperture_diameter: 0.01,
        }
    }
}

/// Vignette
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VignetteOptions {
    pub mid_point: f32,
    /// 0 is a rounded rectangle, 0.5 an oval, 1 a circle.
    pub roundness: f32,
    pub feather: f32,
    pub color: Vec4,
    pub enabled: bool,
}

impl Default for VignetteOptions {
    fn default() -> Self {
        Self {
            mid_point: 0.5,
            roundness: 0.5,
            feather: 0.5,
            color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            enabled: false,
        }
    }
}

/// Camera state the effects depend on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraInfo {
    pub projection: Mat4,
    /// Distance to the near plane.
    pub zn: f32,
    /// Distance to the far plane.
    pub zf: f32,
    /// Aperture diameter in meters.
    pub aperture: f32,
    /// Focal length in meters.
    pub focal_length: f32,
}

impl CameraInfo {
    /// Default lens is a 50mm at f/16.
    pub fn new(projection: Mat4, zn: f32, zf: f32) -> Self {
        let focal_length = 0.05;
        Self {
            projection,
            zn,
            zf,
            aperture: focal_length / 16.0,
            focal_length,
        }
    }

    pub fn with_lens(mut self, aperture: f32, focal_length: f32) -> Self {
        self.aperture = aperture;
        self.focal_length = focal_length;
        self
    }
}

impl Default for CameraInfo {
    fn default() -> Self {
        let (zn, zf) = (0.1, 100.0);
        Self::new(
            Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, zn, zf),
            zn,
            zf,
        )
    }
}
