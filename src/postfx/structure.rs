//! Structure pass: scene depth with a min-depth mip pyramid

use std::sync::Arc;

use crate::backend::*;
use crate::render_graph::*;

use super::{draw_full_screen, PostProcessManager};

/// Draws the scene depth into the structure render target
///
/// Scene traversal is owned by the renderer; the structure stage only
/// provides the target.
pub trait ScenePass: Send + Sync {
    fn execute(
        &self,
        pass_name: &str,
        target: RenderTargetHandle,
        params: &RenderPassParams,
        driver: &mut dyn Driver,
    ) -> DriverResult<()>;
}

/// Levels below 32 texels are never generated
const SKIPPED_LEVELS: u8 = 5;

#[derive(Clone)]
struct StructurePassData {
    depth: ResourceId,
    target: RenderTargetId,
}

#[derive(Clone)]
struct DepthMipmapPassData {
    input: ResourceId,
    output: ResourceId,
    target: RenderTargetId,
}

impl PostProcessManager {
    /// Render the scene depth at `scale` and build its mip pyramid
    ///
    /// The result is also published as `"structure"`.
    pub fn structure(
        &self,
        graph: &mut ResourceGraph,
        scene: Arc<dyn ScenePass>,
        width: u32,
        height: u32,
        scale: f32,
    ) -> ResourceId {
        // Never below 32 so that at least one level survives
        let width = 32.max((width as f32 * scale).ceil() as u32);
        let height = 32.max((height as f32 * scale).ceil() as u32);
        let level_count = max_level_count(width, height).saturating_sub(SKIPPED_LEVELS);
        assert!(
            level_count >= 1,
            "structure buffer {width}x{height} has no mip level"
        );

        let data = graph.add_pass(
            "Structure Pass",
            |builder| {
                let depth = builder.create_texture(
                    "Depth Buffer",
                    TextureDescriptor::new_2d(width, height, TextureFormat::Depth24)
                        .with_levels(level_count),
                );
                let depth = builder.read(depth);
                let depth = builder.write(depth);
                let target = builder.create_render_target(
                    "Structure Target",
                    RenderTargetDesc::new()
                        .with_depth(depth)
                        .with_clear_flags(TargetBufferFlags::DEPTH),
                );
                StructurePassData { depth, target }
            },
            move |data, resources, driver| {
                let out = resources.render_target(data.target);
                scene.execute(resources.pass_name(), out.target, &out.params, driver)
            },
        );

        let mut depth = data.depth;
        for level in 0..level_count - 1 {
            depth = self.depth_mipmap_pass(graph, depth, level);
        }

        graph.blackboard_mut().put("structure", depth);
        depth
    }

    /// Minify `level` of the depth into `level + 1`
    fn depth_mipmap_pass(&self, graph: &mut ResourceGraph, input: ResourceId, level: u8) -> ResourceId {
        let material = Arc::clone(&self.mipmap_depth);
        let data = graph.add_pass(
            "Depth Mipmap Pass",
            |builder| {
                let name = builder.name(input).to_string();
                let input = builder.sample(input);
                let output = builder.write(input);
                let target = builder.create_render_target(
                    &name,
                    RenderTargetDesc::new().with_depth(Attachment::at_level(output, level + 1)),
                );
                DepthMipmapPassData {
                    input,
                    output,
                    target,
                }
            },
            move |data, resources, driver| {
                let depth = resources.texture(data.input);
                material.configure(driver, |mi| {
                    mi.set_texture(
                        "depth",
                        depth,
                        SamplerParams::min(SamplerMinFilter::NearestMipmapNearest),
                    );
                    mi.set_parameter("level", u32::from(level));
                });
                let out = resources.render_target(data.target);
                draw_full_screen(driver, &out, &material.default_pipeline_state());
                Ok(())
            },
        );
        data.output
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::materials::{MaterialKind, MaterialPackages};

    struct CountingScene(AtomicUsize);

    impl ScenePass for CountingScene {
        fn execute(
            &self,
            pass_name: &str,
            target: RenderTargetHandle,
            params: &RenderPassParams,
            driver: &mut dyn Driver,
        ) -> DriverResult<()> {
            assert_eq!(pass_name, "Structure Pass");
            assert_eq!(params.flags.clear, TargetBufferFlags::DEPTH);
            self.0.fetch_add(1, Ordering::SeqCst);
            driver.begin_render_pass(target, params);
            driver.end_render_pass();
            Ok(())
        }
    }

    fn manager(driver: &mut DummyDriver) -> PostProcessManager {
        let mut packages = MaterialPackages::new();
        for kind in MaterialKind::ALL {
            packages.insert(kind, vec![0u8; 4]);
        }
        PostProcessManager::init(driver, &packages).unwrap()
    }

    #[test]
    fn test_structure_pyramid() {
        let mut driver = DummyDriver::new();
        let manager = manager(&mut driver);
        let scene = Arc::new(CountingScene(AtomicUsize::new(0)));

        let mut graph = ResourceGraph::new();
        // 1280x720 at half scale: 640x360, 10 levels, 5 of them kept
        let structure = manager.structure(&mut graph, scene.clone(), 1280, 720, 0.5);
        assert_eq!(graph.descriptor(structure).width, 640);
        assert_eq!(graph.descriptor(structure).levels, 5);
        assert_eq!(graph.blackboard().get("structure"), Some(structure));
        graph.present(structure);

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order().len(), 5);
        compiled.execute(&mut driver).unwrap();

        assert_eq!(scene.0.load(Ordering::SeqCst), 1);
        assert_eq!(driver.draw_count(), 4);
        manager.terminate(&mut driver);
    }

    #[test]
    fn test_structure_never_below_32() {
        let mut driver = DummyDriver::new();
        let manager = manager(&mut driver);
        let scene = Arc::new(CountingScene(AtomicUsize::new(0)));

        let mut graph = ResourceGraph::new();
        let structure = manager.structure(&mut graph, scene, 10, 10, 0.5);
        let desc = graph.descriptor(structure);
        assert_eq!((desc.width, desc.height, desc.levels), (32, 32, 1));
        assert_eq!(graph.pass_count(), 1);
        manager.terminate(&mut driver);
    }
}
