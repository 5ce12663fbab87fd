//! Post-processing effects
//!
//! Every effect is a method of [`PostProcessManager`] that declares its
//! passes into the frame's [`ResourceGraph`](crate::render_graph::ResourceGraph)
//! and returns the handle of its output. The manager owns the compiled
//! materials and the dummy textures; pass executors share the materials
//! through `Arc`.

mod blit;
mod bloom;
mod color_grading;
mod dof;
mod gaussian;
pub mod options;
mod ssao;
mod structure;

use std::sync::Arc;

use glam::Vec4;

pub use bloom::{BloomLayout, BloomOutput, MAX_BLOOM_LEVELS};
pub use color_grading::{bloom_parameters, vignette_parameters, ColorGradingParams};
pub use dof::{
    dilate_tiles, reduce_tiles, DofParameters, TileCoc, TileGrid, DILATION_ROUNDS,
    MAX_COC_RADIUS, SENSOR_SIZE, TILE_SIZE,
};
pub use gaussian::{gaussian_coefficients, GaussianBlur, KernelTap, MAX_KERNEL_TAPS};
pub use options::*;
pub use ssao::{sample_count_and_spiral_turns, SsaoParameters};
pub use structure::ScenePass;

use crate::backend::*;
use crate::error::{PostFxError, PostFxResult};
use crate::materials::{MaterialKind, MaterialPackages, PostProcessMaterial};
use crate::render_graph::ResolvedRenderTarget;

/// Owns the post-process materials and builds the effect passes
pub struct PostProcessManager {
    sao: Arc<PostProcessMaterial>,
    mipmap_depth: Arc<PostProcessMaterial>,
    bilateral_blur: Arc<PostProcessMaterial>,
    separable_gaussian_blur: Arc<PostProcessMaterial>,
    bloom_downsample: Arc<PostProcessMaterial>,
    bloom_upsample: Arc<PostProcessMaterial>,
    /// Low, medium and high quality blits
    blit: [Arc<PostProcessMaterial>; 3],
    color_grading: Arc<PostProcessMaterial>,
    /// Only built when the driver supports frame-buffer fetch
    color_grading_as_subpass: Option<Arc<PostProcessMaterial>>,
    fxaa: Arc<PostProcessMaterial>,
    dof_downsample: Arc<PostProcessMaterial>,
    dof_mipmap: Arc<PostProcessMaterial>,
    dof_tiles: Arc<PostProcessMaterial>,
    dof_dilate: Arc<PostProcessMaterial>,
    dof: Arc<PostProcessMaterial>,
    dof_median: Arc<PostProcessMaterial>,
    dof_combine: Arc<PostProcessMaterial>,
    kernel_storage_size: usize,
    dummy_one: TextureHandle,
    dummy_zero: TextureHandle,
}

/// Tracks what `init` built so far, to undo it on failure
struct MaterialLoader<'a> {
    packages: &'a MaterialPackages,
    loaded: Vec<Arc<PostProcessMaterial>>,
}

impl<'a> MaterialLoader<'a> {
    fn load(
        &mut self,
        driver: &mut dyn Driver,
        kind: MaterialKind,
    ) -> PostFxResult<Arc<PostProcessMaterial>> {
        let package = self
            .packages
            .get(kind)
            .ok_or(PostFxError::MissingMaterialPackage(kind))?;
        let material = Arc::new(PostProcessMaterial::compile(driver, kind, package)?);
        self.loaded.push(Arc::clone(&material));
        Ok(material)
    }

    fn abort(self, driver: &mut dyn Driver) {
        for material in &self.loaded {
            material.destroy(driver);
        }
    }
}

impl PostProcessManager {
    /// Compile every material and create the dummy textures
    pub fn init(driver: &mut dyn Driver, packages: &MaterialPackages) -> PostFxResult<Self> {
        let mut loader = MaterialLoader {
            packages,
            loaded: Vec::new(),
        };
        match Self::build(driver, &mut loader) {
            Ok(manager) => {
                log::info!(
                    "Post-process manager ready: {} materials, subpass color grading {}",
                    loader.loaded.len(),
                    if manager.color_grading_as_subpass.is_some() {
                        "enabled"
                    } else {
                        "disabled"
                    }
                );
                Ok(manager)
            }
            Err(err) => {
                log::error!("Failed to initialize post-process manager: {}", err);
                loader.abort(driver);
                Err(err)
            }
        }
    }

    fn build(driver: &mut dyn Driver, loader: &mut MaterialLoader<'_>) -> PostFxResult<Self> {
        let sao = loader.load(driver, MaterialKind::Sao)?;
        let mipmap_depth = loader.load(driver, MaterialKind::MipmapDepth)?;
        let bilateral_blur = loader.load(driver, MaterialKind::BilateralBlur)?;
        let separable_gaussian_blur = loader.load(driver, MaterialKind::SeparableGaussianBlur)?;
        let bloom_downsample = loader.load(driver, MaterialKind::BloomDownsample)?;
        let bloom_upsample = loader.load(driver, MaterialKind::BloomUpsample)?;
        let blit = [
            loader.load(driver, MaterialKind::BlitLow)?,
            loader.load(driver, MaterialKind::BlitMedium)?,
            loader.load(driver, MaterialKind::BlitHigh)?,
        ];
        let color_grading = loader.load(driver, MaterialKind::ColorGrading)?;
        let color_grading_as_subpass = if driver.is_frame_buffer_fetch_supported() {
            Some(loader.load(driver, MaterialKind::ColorGradingAsSubpass)?)
        } else {
            None
        };
        let fxaa = loader.load(driver, MaterialKind::Fxaa)?;
        let dof_downsample = loader.load(driver, MaterialKind::DofDownsample)?;
        let dof_mipmap = loader.load(driver, MaterialKind::DofMipmap)?;
        let dof_tiles = loader.load(driver, MaterialKind::DofTiles)?;
        let dof_dilate = loader.load(driver, MaterialKind::DofDilate)?;
        let dof = loader.load(driver, MaterialKind::Dof)?;
        let dof_median = loader.load(driver, MaterialKind::DofMedian)?;
        let dof_combine = loader.load(driver, MaterialKind::DofCombine)?;

        let kernel_storage_size = separable_gaussian_blur
            .parameter_array_size(driver, "kernel")
            .unwrap_or(MAX_KERNEL_TAPS)
            .clamp(1, MAX_KERNEL_TAPS);

        let dummy_one = create_dummy_texture(driver, [0xFF; 4])?;
        let dummy_zero = match create_dummy_texture(driver, [0; 4]) {
            Ok(texture) => texture,
            Err(err) => {
                driver.destroy_texture(dummy_one);
                return Err(err);
            }
        };

        Ok(Self {
            sao,
            mipmap_depth,
            bilateral_blur,
            separable_gaussian_blur,
            bloom_downsample,
            bloom_upsample,
            blit,
            color_grading,
            color_grading_as_subpass,
            fxaa,
            dof_downsample,
            dof_mipmap,
            dof_tiles,
            dof_dilate,
            dof,
            dof_median,
            dof_combine,
            kernel_storage_size,
            dummy_one,
            dummy_zero,
        })
    }

    /// Destroy the dummy textures and every material
    pub fn terminate(self, driver: &mut dyn Driver) {
        driver.destroy_texture(self.dummy_one);
        driver.destroy_texture(self.dummy_zero);
        for material in self.materials() {
            material.destroy(driver);
        }
        log::info!("Post-process manager terminated");
    }

    fn materials(&self) -> impl Iterator<Item = &Arc<PostProcessMaterial>> {
        [
            &self.sao,
            &self.mipmap_depth,
            &self.bilateral_blur,
            &self.separable_gaussian_blur,
            &self.bloom_downsample,
            &self.bloom_upsample,
            &self.blit[0],
            &self.blit[1],
            &self.blit[2],
            &self.color_grading,
            &self.fxaa,
            &self.dof_downsample,
            &self.dof_mipmap,
            &self.dof_tiles,
            &self.dof_dilate,
            &self.dof,
            &self.dof_median,
            &self.dof_combine,
        ]
        .into_iter()
        .chain(self.color_grading_as_subpass.as_ref())
    }

    /// Material of a given kind, `None` for the subpass material when unsupported
    pub fn material(&self, kind: MaterialKind) -> Option<&Arc<PostProcessMaterial>> {
        self.materials().find(|m| m.kind() == kind)
    }

    /// Number of Gaussian taps the blur material can hold
    pub fn kernel_storage_size(&self) -> usize {
        self.kernel_storage_size
    }

    /// 1x1 texture of opaque white
    pub fn one_texture(&self) -> TextureHandle {
        self.dummy_one
    }

    /// 1x1 texture of transparent black
    pub fn zero_texture(&self) -> TextureHandle {
        self.dummy_zero
    }

    pub fn has_subpass_support(&self) -> bool {
        self.color_grading_as_subpass.is_some()
    }
}

fn create_dummy_texture(driver: &mut dyn Driver, texel: [u8; 4]) -> PostFxResult<TextureHandle> {
    let desc = TextureDescriptor::new_2d(1, 1, TextureFormat::Rgba8Unorm)
        .with_usage(TextureUsage::DEFAULT);
    let texture = driver.create_texture(&desc)?;
    if let Err(err) = driver.update_texture_2d(texture, 0, 1, 1, &texel) {
        driver.destroy_texture(texture);
        return Err(err.into());
    }
    Ok(texture)
}

/// `(w, h, 1/w, 1/h)`
pub(crate) fn resolution(width: u32, height: u32) -> Vec4 {
    let (w, h) = (width as f32, height as f32);
    Vec4::new(w, h, 1.0 / w, 1.0 / h)
}

/// One full-screen draw into a render target.
pub(crate) fn draw_full_screen(
    driver: &mut dyn Driver,
    target: &ResolvedRenderTarget,
    pipeline: &PipelineState,
) {
    driver.begin_render_pass(target.target, &target.params);
    driver.draw(pipeline);
    driver.end_render_pass();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packages(skip: Option<MaterialKind>) -> MaterialPackages {
        let mut packages = MaterialPackages::new();
        for kind in MaterialKind::ALL {
            if Some(kind) != skip {
                packages.insert(kind, vec![1, 2, 3]);
            }
        }
        packages
    }

    #[test]
    fn test_init_and_terminate() {
        let mut driver = DummyDriver::new();
        let manager = PostProcessManager::init(&mut driver, &packages(None)).unwrap();

        assert!(!manager.has_subpass_support());
        assert!(manager.material(MaterialKind::ColorGradingAsSubpass).is_none());
        assert_eq!(manager.kernel_storage_size(), MAX_KERNEL_TAPS);
        assert_eq!(driver.live_material_count(), 18);
        assert_eq!(driver.live_texture_count(), 2);

        manager.terminate(&mut driver);
        assert_eq!(driver.live_material_count(), 0);
        assert_eq!(driver.live_texture_count(), 0);
    }

    #[test]
    fn test_subpass_material_needs_frame_buffer_fetch() {
        let mut driver = DummyDriver::new().with_frame_buffer_fetch(true);
        let manager = PostProcessManager::init(&mut driver, &packages(None)).unwrap();
        assert!(manager.has_subpass_support());
        assert_eq!(driver.live_material_count(), 19);
        manager.terminate(&mut driver);
    }

    #[test]
    fn test_kernel_storage_follows_reflection() {
        let mut driver = DummyDriver::new().with_parameter_array_size("kernel", 16);
        let manager = PostProcessManager::init(&mut driver, &packages(None)).unwrap();
        assert_eq!(manager.kernel_storage_size(), 16);
        manager.terminate(&mut driver);

        let mut driver = DummyDriver::new().with_parameter_array_size("kernel", 128);
        let manager = PostProcessManager::init(&mut driver, &packages(None)).unwrap();
        assert_eq!(manager.kernel_storage_size(), MAX_KERNEL_TAPS);
        manager.terminate(&mut driver);
    }

    #[test]
    fn test_missing_package_rolls_back() {
        let mut driver = DummyDriver::new();
        let result = PostProcessManager::init(&mut driver, &packages(Some(MaterialKind::Dof)));

        assert!(matches!(
            result,
            Err(PostFxError::MissingMaterialPackage(MaterialKind::Dof))
        ));
        assert_eq!(driver.live_material_count(), 0);
        assert_eq!(driver.live_texture_count(), 0);
    }

    #[test]
    fn test_resolution() {
        assert_eq!(resolution(4, 2), Vec4::new(4.0, 2.0, 0.25, 0.5));
    }
}
