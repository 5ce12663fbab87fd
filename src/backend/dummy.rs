//! Dummy driver for testing and development.
//!
//! This driver doesn't talk to a GPU. It hands out fresh handles, tracks
//! which resources are alive and records every call as a [`DriverCommand`]
//! so tests can assert on what a frame actually submitted.

use std::collections::{HashMap, HashSet};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::materials::ParameterBlock;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    CreateTexture {
        texture: TextureHandle,
        descriptor: TextureDescriptor,
    },
    UpdateTexture {
        texture: TextureHandle,
        level: u8,
        len: usize,
    },
    DestroyTexture(TextureHandle),
    CreateRenderTarget {
        target: RenderTargetHandle,
        info: RenderTargetInfo,
    },
    DestroyRenderTarget(RenderTargetHandle),
    CreateMaterial(MaterialHandle),
    CreateProgram {
        material: MaterialHandle,
        variant: u8,
        program: ProgramHandle,
    },
    DestroyMaterial(MaterialHandle),
    CommitParameters {
        material: MaterialHandle,
        parameters: ParameterBlock,
    },
    BindMaterial(MaterialHandle),
    BeginRenderPass {
        target: RenderTargetHandle,
        params: RenderPassParams,
    },
    NextSubpass,
    EndRenderPass,
    Draw(PipelineState),
    Blit {
        buffers: TargetBufferFlags,
        dst: RenderTargetHandle,
        src: RenderTargetHandle,
        filter: SamplerMagFilter,
    },
}

/// Dummy driver.
#[derive(Debug)]
pub struct DummyDriver {
    next_handle: u64,
    commands: Vec<DriverCommand>,
    live_textures: HashSet<TextureHandle>,
    live_render_targets: HashSet<RenderTargetHandle>,
    live_materials: HashSet<MaterialHandle>,
    array_sizes: HashMap<String, usize>,
    frame_buffer_fetch: bool,
    in_render_pass: bool,
}

impl DummyDriver {
    /// Create a new dummy driver without frame-buffer fetch support.
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            commands: Vec::new(),
            live_textures: HashSet::new(),
            live_render_targets: HashSet::new(),
            live_materials: HashSet::new(),
            array_sizes: HashMap::new(),
            frame_buffer_fetch: false,
            in_render_pass: false,
        }
    }

    pub fn with_frame_buffer_fetch(mut self, supported: bool) -> Self {
        self.frame_buffer_fetch = supported;
        self
    }

    /// Size reported for an array parameter of every material.
    pub fn with_parameter_array_size(mut self, name: &str, size: usize) -> Self {
        self.array_sizes.insert(name.to_string(), size);
        self
    }

    /// All calls recorded so far, oldest first.
    pub fn commands(&self) -> &[DriverCommand] {
        &self.commands
    }

    /// Forget recorded calls, keeping resource tracking intact.
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn textures_created(&self) -> usize {
        self.count(|c| matches!(c, DriverCommand::CreateTexture { .. }))
    }

    pub fn textures_destroyed(&self) -> usize {
        self.count(|c| matches!(c, DriverCommand::DestroyTexture(_)))
    }

    pub fn render_targets_created(&self) -> usize {
        self.count(|c| matches!(c, DriverCommand::CreateRenderTarget { .. }))
    }

    pub fn render_pass_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCommand::BeginRenderPass { .. }))
    }

    pub fn draw_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCommand::Draw(_)))
    }

    pub fn blit_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCommand::Blit { .. }))
    }

    /// Textures created and not yet destroyed.
    pub fn live_texture_count(&self) -> usize {
        self.live_textures.len()
    }

    pub fn live_render_target_count(&self) -> usize {
        self.live_render_targets.len()
    }

    pub fn live_material_count(&self) -> usize {
        self.live_materials.len()
    }

    pub fn is_texture_alive(&self, texture: TextureHandle) -> bool {
        self.live_textures.contains(&texture)
    }

    /// Descriptor a texture was created with, if this driver created it.
    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.commands.iter().find_map(|c| match c {
            DriverCommand::CreateTexture {
                texture: t,
                descriptor,
            } if *t == texture => Some(descriptor),
            _ => None,
        })
    }

    /// Parameter blocks committed for a material, oldest first.
    pub fn committed_parameters(&self, material: MaterialHandle) -> Vec<&ParameterBlock> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DriverCommand::CommitParameters {
                    material: m,
                    parameters,
                } if *m == material => Some(parameters),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&DriverCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl Default for DummyDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for DummyDriver {
    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> DriverResult<TextureHandle> {
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.levels == 0 {
            return Err(DriverError::TextureCreationFailed(format!(
                "degenerate texture {}x{} with {} levels",
                descriptor.width, descriptor.height, descriptor.levels
            )));
        }
        let texture = TextureHandle(self.allocate_handle());
        log::trace!(
            "DummyDriver: creating texture {:?} ({}x{}, {} levels, {:?})",
            texture,
            descriptor.width,
            descriptor.height,
            descriptor.levels,
            descriptor.format
        );
        self.live_textures.insert(texture);
        self.commands.push(DriverCommand::CreateTexture {
            texture,
            descriptor: *descriptor,
        });
        Ok(texture)
    }

    fn update_texture_2d(
        &mut self,
        texture: TextureHandle,
        level: u8,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> DriverResult<()> {
        if !self.live_textures.contains(&texture) {
            return Err(DriverError::TextureUploadFailed(format!(
                "unknown texture {texture:?}"
            )));
        }
        log::trace!(
            "DummyDriver: update_texture_2d {:?} level={} ({}x{}) len={}",
            texture,
            level,
            width,
            height,
            data.len()
        );
        self.commands.push(DriverCommand::UpdateTexture {
            texture,
            level,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if !self.live_textures.remove(&texture) {
            log::warn!("DummyDriver: destroying unknown texture {:?}", texture);
        }
        self.commands.push(DriverCommand::DestroyTexture(texture));
    }

    fn create_render_target(&mut self, info: &RenderTargetInfo) -> DriverResult<RenderTargetHandle> {
        let target = RenderTargetHandle(self.allocate_handle());
        log::trace!(
            "DummyDriver: creating render target {:?} '{}' ({}x{})",
            target,
            info.label,
            info.width,
            info.height
        );
        self.live_render_targets.insert(target);
        self.commands.push(DriverCommand::CreateRenderTarget {
            target,
            info: info.clone(),
        });
        Ok(target)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        if !self.live_render_targets.remove(&target) {
            log::warn!("DummyDriver: destroying unknown render target {:?}", target);
        }
        self.commands.push(DriverCommand::DestroyRenderTarget(target));
    }

    fn create_material(&mut self, package: &[u8]) -> DriverResult<MaterialHandle> {
        if package.is_empty() {
            return Err(DriverError::MaterialCreationFailed(
                "empty material package".to_string(),
            ));
        }
        let material = MaterialHandle(self.allocate_handle());
        log::trace!(
            "DummyDriver: creating material {:?} from {} bytes",
            material,
            package.len()
        );
        self.live_materials.insert(material);
        self.commands.push(DriverCommand::CreateMaterial(material));
        Ok(material)
    }

    fn create_program(
        &mut self,
        material: MaterialHandle,
        variant: u8,
    ) -> DriverResult<ProgramHandle> {
        if !self.live_materials.contains(&material) {
            return Err(DriverError::ProgramCreationFailed {
                variant,
                reason: format!("unknown material {material:?}"),
            });
        }
        let program = ProgramHandle(self.allocate_handle());
        self.commands.push(DriverCommand::CreateProgram {
            material,
            variant,
            program,
        });
        Ok(program)
    }

    fn parameter_array_size(&self, _material: MaterialHandle, name: &str) -> Option<usize> {
        self.array_sizes.get(name).copied()
    }

    fn destroy_material(&mut self, material: MaterialHandle) {
        if !self.live_materials.remove(&material) {
            log::warn!("DummyDriver: destroying unknown material {:?}", material);
        }
        self.commands.push(DriverCommand::DestroyMaterial(material));
    }

    fn commit_parameters(&mut self, material: MaterialHandle, parameters: &ParameterBlock) {
        log::trace!(
            "DummyDriver: committing {} parameters for {:?}",
            parameters.len(),
            material
        );
        self.commands.push(DriverCommand::CommitParameters {
            material,
            parameters: parameters.clone(),
        });
    }

    fn bind_material(&mut self, material: MaterialHandle) {
        self.commands.push(DriverCommand::BindMaterial(material));
    }

    fn begin_render_pass(&mut self, target: RenderTargetHandle, params: &RenderPassParams) {
        debug_assert!(!self.in_render_pass, "render passes cannot nest");
        self.in_render_pass = true;
        log::trace!(
            "DummyDriver: begin render pass {:?} ({}x{})",
            target,
            params.viewport.width,
            params.viewport.height
        );
        self.commands.push(DriverCommand::BeginRenderPass {
            target,
            params: *params,
        });
    }

    fn next_subpass(&mut self) {
        debug_assert!(self.in_render_pass, "next_subpass outside of a render pass");
        self.commands.push(DriverCommand::NextSubpass);
    }

    fn end_render_pass(&mut self) {
        debug_assert!(self.in_render_pass, "end_render_pass without begin");
        self.in_render_pass = false;
        self.commands.push(DriverCommand::EndRenderPass);
    }

    fn draw(&mut self, pipeline: &PipelineState) {
        debug_assert!(self.in_render_pass, "draw outside of a render pass");
        self.commands.push(DriverCommand::Draw(*pipeline));
    }

    fn blit(
        &mut self,
        buffers: TargetBufferFlags,
        dst: RenderTargetHandle,
        dst_viewport: Viewport,
        src: RenderTargetHandle,
        src_viewport: Viewport,
        filter: SamplerMagFilter,
    ) {
        log::trace!(
            "DummyDriver: blit {:?} {}x{} -> {:?} {}x{}",
            src,
            src_viewport.width,
            src_viewport.height,
            dst,
            dst_viewport.width,
            dst_viewport.height
        );
        self.commands.push(DriverCommand::Blit {
            buffers,
            dst,
            src,
            filter,
        });
    }

    fn is_frame_buffer_fetch_supported(&self) -> bool {
        self.frame_buffer_fetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_texture_lifetime() {
        let mut driver = DummyDriver::new();
        let desc = TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm);
        let texture = driver.create_texture(&desc).unwrap();
        assert!(driver.is_texture_alive(texture));
        assert_eq!(driver.texture_descriptor(texture), Some(&desc));

        driver.destroy_texture(texture);
        assert!(!driver.is_texture_alive(texture));
        assert_eq!(driver.textures_created(), 1);
        assert_eq!(driver.textures_destroyed(), 1);
    }

    #[test]
    fn test_rejects_degenerate_texture() {
        let mut driver = DummyDriver::new();
        let desc = TextureDescriptor::new_2d(0, 4, TextureFormat::R8Unorm);
        assert!(matches!(
            driver.create_texture(&desc),
            Err(DriverError::TextureCreationFailed(_))
        ));
    }

    #[test]
    fn test_reports_configured_array_size() {
        let mut driver = DummyDriver::new().with_parameter_array_size("kernel", 32);
        let material = driver.create_material(&[1, 2, 3]).unwrap();
        assert_eq!(driver.parameter_array_size(material, "kernel"), Some(32));
        assert_eq!(driver.parameter_array_size(material, "missing"), None);
    }

    #[test]
    fn test_program_requires_live_material() {
        let mut driver = DummyDriver::new();
        let material = driver.create_material(&[0xAB]).unwrap();
        driver.destroy_material(material);
        assert!(driver.create_program(material, 0).is_err());
    }
}
