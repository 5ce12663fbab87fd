//! Post-process materials.
//!
//! A [`PostProcessMaterial`] is compiled eagerly from a binary package: the
//! driver builds the material and both shader variants up front, so drawing
//! never pays for a lazy compile. The default [`MaterialInstance`] lives
//! behind a lock because pass executors share the material with the
//! long-lived manager.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::backend::{
    Driver, DriverResult, MaterialHandle, PipelineState, ProgramHandle, RasterState,
};

use super::instance::MaterialInstance;

/// Every post-process material the manager knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialKind {
    Sao,
    MipmapDepth,
    BilateralBlur,
    SeparableGaussianBlur,
    BloomDownsample,
    BloomUpsample,
    BlitLow,
    BlitMedium,
    BlitHigh,
    ColorGrading,
    ColorGradingAsSubpass,
    Fxaa,
    DofDownsample,
    DofMipmap,
    DofTiles,
    DofDilate,
    Dof,
    DofMedian,
    DofCombine,
}

impl MaterialKind {
    pub const ALL: [MaterialKind; 19] = [
        MaterialKind::Sao,
        MaterialKind::MipmapDepth,
        MaterialKind::BilateralBlur,
        MaterialKind::SeparableGaussianBlur,
        MaterialKind::BloomDownsample,
        MaterialKind::BloomUpsample,
        MaterialKind::BlitLow,
        MaterialKind::BlitMedium,
        MaterialKind::BlitHigh,
        MaterialKind::ColorGrading,
        MaterialKind::ColorGradingAsSubpass,
        MaterialKind::Fxaa,
        MaterialKind::DofDownsample,
        MaterialKind::DofMipmap,
        MaterialKind::DofTiles,
        MaterialKind::DofDilate,
        MaterialKind::Dof,
        MaterialKind::DofMedian,
        MaterialKind::DofCombine,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MaterialKind::Sao => "sao",
            MaterialKind::MipmapDepth => "mipmapDepth",
            MaterialKind::BilateralBlur => "bilateralBlur",
            MaterialKind::SeparableGaussianBlur => "separableGaussianBlur",
            MaterialKind::BloomDownsample => "bloomDownsample",
            MaterialKind::BloomUpsample => "bloomUpsample",
            MaterialKind::BlitLow => "blitLow",
            MaterialKind::BlitMedium => "blitMedium",
            MaterialKind::BlitHigh => "blitHigh",
            MaterialKind::ColorGrading => "colorGrading",
            MaterialKind::ColorGradingAsSubpass => "colorGradingAsSubpass",
            MaterialKind::Fxaa => "fxaa",
            MaterialKind::DofDownsample => "dofDownsample",
            MaterialKind::DofMipmap => "dofMipmap",
            MaterialKind::DofTiles => "dofTiles",
            MaterialKind::DofDilate => "dofDilate",
            MaterialKind::Dof => "dof",
            MaterialKind::DofMedian => "dofMedian",
            MaterialKind::DofCombine => "dofCombine",
        }
    }
}

/// Raw material packages, handed to the manager at startup.
#[derive(Debug, Clone, Default)]
pub struct MaterialPackages {
    packages: HashMap<MaterialKind, Arc<[u8]>>,
}

impl MaterialPackages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: MaterialKind, package: impl Into<Arc<[u8]>>) {
        self.packages.insert(kind, package.into());
    }

    pub fn with(mut self, kind: MaterialKind, package: impl Into<Arc<[u8]>>) -> Self {
        self.insert(kind, package);
        self
    }

    pub fn get(&self, kind: MaterialKind) -> Option<&[u8]> {
        self.packages.get(&kind).map(|p| &p[..])
    }

    pub fn contains(&self, kind: MaterialKind) -> bool {
        self.packages.contains_key(&kind)
    }
}

/// Shader variant of a post-process material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PostProcessVariant {
    #[default]
    Opaque = 0,
    Translucent = 1,
}

impl PostProcessVariant {
    pub const COUNT: usize = 2;

    pub fn from_translucent(translucent: bool) -> Self {
        if translucent {
            PostProcessVariant::Translucent
        } else {
            PostProcessVariant::Opaque
        }
    }
}

/// A compiled post-process material with its default instance.
#[derive(Debug)]
pub struct PostProcessMaterial {
    kind: MaterialKind,
    handle: MaterialHandle,
    programs: [ProgramHandle; PostProcessVariant::COUNT],
    raster_state: RasterState,
    instance: Mutex<MaterialInstance>,
}

impl PostProcessMaterial {
    /// Build the material and compile all of its variants.
    pub fn compile(
        driver: &mut dyn Driver,
        kind: MaterialKind,
        package: &[u8],
    ) -> DriverResult<Self> {
        let handle = driver.create_material(package)?;
        let programs = match Self::compile_programs(driver, handle) {
            Ok(programs) => programs,
            Err(err) => {
                driver.destroy_material(handle);
                return Err(err);
            }
        };
        log::debug!(
            "Compiled post-process material '{}' ({} bytes)",
            kind.name(),
            package.len()
        );
        Ok(Self {
            kind,
            handle,
            programs,
            raster_state: RasterState::default(),
            instance: Mutex::new(MaterialInstance::new(handle)),
        })
    }

    fn compile_programs(
        driver: &mut dyn Driver,
        handle: MaterialHandle,
    ) -> DriverResult<[ProgramHandle; PostProcessVariant::COUNT]> {
        Ok([
            driver.create_program(handle, PostProcessVariant::Opaque as u8)?,
            driver.create_program(handle, PostProcessVariant::Translucent as u8)?,
        ])
    }

    pub fn kind(&self) -> MaterialKind {
        self.kind
    }

    pub fn handle(&self) -> MaterialHandle {
        self.handle
    }

    /// Lock the default instance for parameter updates.
    ///
    /// The guard must be dropped before asking for a pipeline state.
    pub fn instance(&self) -> MutexGuard<'_, MaterialInstance> {
        self.instance.lock()
    }

    /// Set parameters, then commit and bind the default instance.
    pub fn configure(&self, driver: &mut dyn Driver, set: impl FnOnce(&mut MaterialInstance)) {
        let mut instance = self.instance.lock();
        set(&mut instance);
        instance.commit(driver);
        instance.bind(driver);
    }

    pub fn pipeline_state(&self, variant: PostProcessVariant) -> PipelineState {
        PipelineState {
            program: self.programs[variant as usize],
            raster_state: self.raster_state,
            scissor: self.instance.lock().scissor(),
        }
    }

    /// Pipeline state of the opaque variant.
    pub fn default_pipeline_state(&self) -> PipelineState {
        self.pipeline_state(PostProcessVariant::Opaque)
    }

    pub fn parameter_array_size(&self, driver: &dyn Driver, name: &str) -> Option<usize> {
        driver.parameter_array_size(self.handle, name)
    }

    pub fn destroy(&self, driver: &mut dyn Driver) {
        log::debug!("Destroying post-process material '{}'", self.kind.name());
        driver.destroy_material(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DriverCommand, DummyDriver};

    #[test]
    fn test_compile_builds_both_variants() {
        let mut driver = DummyDriver::new();
        let material = PostProcessMaterial::compile(&mut driver, MaterialKind::Fxaa, &[1, 2])
            .expect("material should compile");

        let variants: Vec<u8> = driver
            .commands()
            .iter()
            .filter_map(|c| match c {
                DriverCommand::CreateProgram { variant, .. } => Some(*variant),
                _ => None,
            })
            .collect();
        assert_eq!(variants, vec![0, 1]);

        let opaque = material.pipeline_state(PostProcessVariant::Opaque);
        let translucent = material.pipeline_state(PostProcessVariant::Translucent);
        assert_ne!(opaque.program, translucent.program);
        assert_eq!(opaque.raster_state, RasterState::default());
    }

    #[test]
    fn test_empty_package_fails() {
        let mut driver = DummyDriver::new();
        let result = PostProcessMaterial::compile(&mut driver, MaterialKind::Sao, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_scissor_flows_into_pipeline_state() {
        let mut driver = DummyDriver::new();
        let material =
            PostProcessMaterial::compile(&mut driver, MaterialKind::BlitLow, &[9]).unwrap();
        material
            .instance()
            .set_scissor(crate::backend::Viewport::new(64, 32));
        assert_eq!(material.default_pipeline_state().scissor.width, 64);
    }

    #[test]
    fn test_configure_commits_and_binds() {
        let mut driver = DummyDriver::new();
        let material =
            PostProcessMaterial::compile(&mut driver, MaterialKind::Fxaa, &[3]).unwrap();
        driver.clear_commands();

        material.configure(&mut driver, |mi| mi.set_parameter("fxaa", true));
        assert!(matches!(
            driver.commands(),
            [
                DriverCommand::CommitParameters { .. },
                DriverCommand::BindMaterial(_)
            ]
        ));
    }

    #[test]
    fn test_packages_lookup() {
        let packages = MaterialPackages::new().with(MaterialKind::Dof, vec![1u8, 2, 3]);
        assert!(packages.contains(MaterialKind::Dof));
        assert_eq!(packages.get(MaterialKind::Dof), Some(&[1u8, 2, 3][..]));
        assert!(packages.get(MaterialKind::DofMedian).is_none());
    }
}
