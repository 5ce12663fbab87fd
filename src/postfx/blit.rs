//! Scaling blits and MSAA resolve

use std::sync::Arc;

use crate::backend::*;
use crate::render_graph::*;

use super::options::QualityLevel;
use super::{draw_full_screen, resolution, PostProcessManager};

#[derive(Clone)]
struct BlitPassData {
    input: ResourceId,
    output: ResourceId,
    src_target: RenderTargetId,
    dst_target: RenderTargetId,
}

#[derive(Clone)]
struct QuadBlitPassData {
    input: ResourceId,
    output: ResourceId,
    target: RenderTargetId,
}

impl PostProcessManager {
    /// Copy `input` into a new texture of `out_desc` with a single blit
    pub fn opaque_blit(
        &self,
        graph: &mut ResourceGraph,
        input: ResourceId,
        out_desc: TextureDescriptor,
        filter: SamplerMagFilter,
    ) -> ResourceId {
        let data = graph.add_pass(
            "blit scaling",
            |builder| {
                let in_desc = builder.descriptor(input);
                let name = builder.name(input).to_string();
                // Multisampled textures can't be sampled
                let input = if in_desc.samples > 1 {
                    builder.read(input)
                } else {
                    builder.sample(input)
                };
                let src_target = builder.create_render_target(
                    &name,
                    RenderTargetDesc::new()
                        .with_color(input)
                        .with_samples(in_desc.samples.max(1)),
                );

                let output = builder.create_texture("scaled output", out_desc);
                let output = builder.write(output);
                let dst_target = builder
                    .create_render_target("Scaled Target", RenderTargetDesc::new().with_color(output));
                BlitPassData {
                    input,
                    output,
                    src_target,
                    dst_target,
                }
            },
            move |data, resources, driver| {
                let src = resources.render_target(data.src_target);
                let dst = resources.render_target(data.dst_target);
                driver.blit(
                    TargetBufferFlags::COLOR,
                    dst.target,
                    dst.params.viewport,
                    src.target,
                    src.params.viewport,
                    filter,
                );
                Ok(())
            },
        );
        data.output
    }

    /// Scale `input` with a filtering shader, optionally blending over the destination
    pub fn blend_blit(
        &self,
        graph: &mut ResourceGraph,
        translucent: bool,
        quality: QualityLevel,
        input: ResourceId,
        out_desc: TextureDescriptor,
    ) -> ResourceId {
        let material = Arc::clone(&self.blit[(quality as usize).min(2)]);
        let data = graph.add_pass(
            "quad scaling",
            |builder| {
                let input = builder.sample(input);
                let output = builder.create_texture("scaled output", out_desc);
                let output = builder.write(output);
                let target =
                    builder.create_render_target("Scaled Target", RenderTargetDesc::new().with_color(output));
                QuadBlitPassData {
                    input,
                    output,
                    target,
                }
            },
            move |data, resources, driver| {
                let color = resources.texture(data.input);
                let in_desc = resources.descriptor(data.input);
                material.configure(driver, |mi| {
                    mi.set_texture("color", color, SamplerParams::linear());
                    mi.set_parameter("resolution", resolution(in_desc.width, in_desc.height));
                });

                let mut pipeline = material.default_pipeline_state();
                if translucent {
                    // Premultiplied alpha
                    let raster = &mut pipeline.raster_state;
                    raster.blend_function_src_rgb = BlendFunction::One;
                    raster.blend_function_src_alpha = BlendFunction::One;
                    raster.blend_function_dst_rgb = BlendFunction::OneMinusSrcAlpha;
                    raster.blend_function_dst_alpha = BlendFunction::OneMinusSrcAlpha;
                }
                draw_full_screen(driver, &resources.render_target(data.target), &pipeline);
                Ok(())
            },
        );
        data.output
    }

    /// Resolve a multisampled texture into a new single-sampled `name`
    ///
    /// Returns `input` untouched when it is not multisampled.
    pub fn resolve(&self, graph: &mut ResourceGraph, name: &str, input: ResourceId) -> ResourceId {
        let in_desc = graph.descriptor(input);
        if in_desc.samples <= 1 {
            return input;
        }
        log::trace!("Resolving '{}' x{} into '{}'", graph.name(input), in_desc.samples, name);

        let data = graph.add_pass(
            "resolve",
            |builder| {
                let src_name = builder.name(input).to_string();
                let input = builder.read(input);
                let src_target = builder.create_render_target(
                    &src_name,
                    RenderTargetDesc::new()
                        .with_color(input)
                        .with_samples(in_desc.samples),
                );

                let output = builder.create_texture(
                    name,
                    TextureDescriptor {
                        levels: 1,
                        samples: 1,
                        ..in_desc
                    },
                );
                let output = builder.write(output);
                let dst_target =
                    builder.create_render_target(name, RenderTargetDesc::new().with_color(output));
                BlitPassData {
                    input,
                    output,
                    src_target,
                    dst_target,
                }
            },
            |data, resources, driver| {
                let src = resources.render_target(data.src_target);
                let dst = resources.render_target(data.dst_target);
                driver.blit(
                    TargetBufferFlags::COLOR,
                    dst.target,
                    dst.params.viewport,
                    src.target,
                    src.params.viewport,
                    SamplerMagFilter::Nearest,
                );
                Ok(())
            },
        );
        data.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::{MaterialKind, MaterialPackages};

    fn manager(driver: &mut DummyDriver) -> PostProcessManager {
        let mut packages = MaterialPackages::new();
        for kind in MaterialKind::ALL {
            packages.insert(kind, vec![7u8; 2]);
        }
        PostProcessManager::init(driver, &packages).unwrap()
    }

    fn color(width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(width, height, TextureFormat::Rgba16Float)
    }

    #[test]
    fn test_opaque_blit_single_blit() {
        let mut driver = DummyDriver::new();
        let manager = manager(&mut driver);
        let external = driver.create_texture(&color(64, 64)).unwrap();

        let mut graph = ResourceGraph::new();
        let input = graph.import_texture("color", color(64, 64), external);
        let output = manager.opaque_blit(&mut graph, input, color(32, 32), SamplerMagFilter::Linear);
        assert_eq!(graph.descriptor(output).width, 32);
        graph.present(output);
        graph.compile().unwrap().execute(&mut driver).unwrap();

        assert_eq!(driver.blit_count(), 1);
        assert!(driver.commands().iter().any(|c| matches!(
            c,
            DriverCommand::Blit {
                filter: SamplerMagFilter::Linear,
                ..
            }
        )));
        assert!(driver.is_texture_alive(external));
        manager.terminate(&mut driver);
    }

    #[test]
    fn test_blend_blit_translucent_blending() {
        let mut driver = DummyDriver::new();
        let manager = manager(&mut driver);
        let external = driver.create_texture(&color(64, 64)).unwrap();

        let mut graph = ResourceGraph::new();
        let input = graph.import_texture("color", color(64, 64), external);
        let output = manager.blend_blit(&mut graph, true, QualityLevel::Ultra, input, color(128, 128));
        graph.present(output);
        graph.compile().unwrap().execute(&mut driver).unwrap();

        let draws: Vec<_> = driver
            .commands()
            .iter()
            .filter_map(|c| match c {
                DriverCommand::Draw(pipeline) => Some(*pipeline),
                _ => None,
            })
            .collect();
        assert_eq!(draws.len(), 1);
        let raster = draws[0].raster_state;
        assert_eq!(raster.blend_function_src_rgb, BlendFunction::One);
        assert_eq!(raster.blend_function_dst_rgb, BlendFunction::OneMinusSrcAlpha);
        assert_eq!(raster.blend_function_dst_alpha, BlendFunction::OneMinusSrcAlpha);

        let high = manager.material(MaterialKind::BlitHigh).unwrap();
        let committed = driver.committed_parameters(high.handle());
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].texture("color"), Some(external));
        assert_eq!(committed[0].float4("resolution"), Some(resolution(64, 64)));
        manager.terminate(&mut driver);
    }

    #[test]
    fn test_resolve_passthrough_and_blit() {
        let mut driver = DummyDriver::new();
        let manager = manager(&mut driver);

        let mut graph = ResourceGraph::new();
        let single = graph.import_texture("single", color(16, 16), TextureHandle::from_raw(900));
        assert_eq!(manager.resolve(&mut graph, "resolved", single), single);
        assert_eq!(graph.pass_count(), 0);

        let msaa = graph.import_texture(
            "msaa",
            color(16, 16).with_samples(4),
            TextureHandle::from_raw(901),
        );
        let resolved = manager.resolve(&mut graph, "resolved", msaa);
        let desc = graph.descriptor(resolved);
        assert_eq!((desc.samples, desc.levels), (1, 1));
        assert_eq!(graph.name(resolved), "resolved");
        graph.present(resolved);
        graph.compile().unwrap().execute(&mut driver).unwrap();
        assert_eq!(driver.blit_count(), 1);
        manager.terminate(&mut driver);
    }
}
