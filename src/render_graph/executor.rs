//! Render graph executor

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::compiler::GraphError;
use crate::render_graph::graph::CompiledGraph;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

impl CompiledGraph {
    /// Run every surviving pass once, in order
    ///
    /// Transient textures are created right before their first user and
    /// destroyed right after their last one. On error everything still
    /// alive is released before returning.
    pub fn execute(mut self, driver: &mut dyn Driver) -> Result<(), GraphError> {
        let mut textures: Vec<Option<TextureHandle>> = self
            .resources
            .iter()
            .map(|r| match r.origin {
                ResourceOrigin::Imported(texture) => Some(texture),
                ResourceOrigin::Transient => None,
            })
            .collect();

        let result = self.run(driver, &mut textures);
        if let Err(err) = &result {
            log::warn!("Render graph execution failed: {}", err);
        }
        self.release_all(driver, &mut textures);
        result
    }

    fn run(
        &mut self,
        driver: &mut dyn Driver,
        textures: &mut [Option<TextureHandle>],
    ) -> Result<(), GraphError> {
        for step in 0..self.pass_order.len() {
            let pass = self.pass_order[step];
            self.allocate(step, driver, textures)?;

            let mut targets = HashMap::new();
            let mut result = self.create_render_targets(step, pass, driver, textures, &mut targets);
            if result.is_ok() {
                result = self.execute_pass(pass, driver, textures, &targets);
            }
            for resolved in targets.values() {
                driver.destroy_render_target(resolved.target);
            }
            result?;

            self.release(step, driver, textures);
        }
        Ok(())
    }

    fn allocate(
        &self,
        step: usize,
        driver: &mut dyn Driver,
        textures: &mut [Option<TextureHandle>],
    ) -> Result<(), GraphError> {
        for &index in &self.allocations[step] {
            let index = index as usize;
            let resource = &self.resources[index];
            let desc = resource.desc.with_usage(self.usage[index]);
            let texture = driver.create_texture(&desc)?;
            log::trace!(
                "Allocated '{}' as {:?} ({}x{}, {} levels)",
                resource.name,
                texture,
                desc.width,
                desc.height,
                desc.levels
            );
            textures[index] = Some(texture);
        }
        Ok(())
    }

    fn release(&self, step: usize, driver: &mut dyn Driver, textures: &mut [Option<TextureHandle>]) {
        for &index in &self.releases[step] {
            if let Some(texture) = textures[index as usize].take() {
                log::trace!("Released '{}'", self.resources[index as usize].name);
                driver.destroy_texture(texture);
            }
        }
    }

    fn release_all(&self, driver: &mut dyn Driver, textures: &mut [Option<TextureHandle>]) {
        for (resource, slot) in self.resources.iter().zip(textures.iter_mut()) {
            if resource.is_imported() {
                continue;
            }
            if let Some(texture) = slot.take() {
                driver.destroy_texture(texture);
            }
        }
    }

    fn create_render_targets(
        &self,
        step: usize,
        pass: PassId,
        driver: &mut dyn Driver,
        textures: &[Option<TextureHandle>],
        targets: &mut HashMap<RenderTargetId, ResolvedRenderTarget>,
    ) -> Result<(), GraphError> {
        for &id in &self.passes[pass.index()].render_targets {
            let node = &self.render_targets[id.index()];
            let desc = &node.desc;
            let mut info = RenderTargetInfo {
                label: node.name.clone(),
                attachments: desc.attachment_flags(),
                width: 0,
                height: 0,
                samples: desc.sample_count(),
                color: [None; MAX_COLOR_ATTACHMENTS],
                depth: None,
                stencil: None,
            };
            let mut flags = RenderPassFlags {
                clear: desc.clear_flags,
                ..Default::default()
            };

            for (slot, attachment) in desc.attachments() {
                let index = attachment.resource.index();
                let resource = &self.resources[index];
                let texture = textures[index].unwrap_or_else(|| {
                    panic!(
                        "render target '{}' attaches '{}' which has no physical texture",
                        node.name, resource.name
                    )
                });
                let physical = TargetAttachment {
                    texture,
                    level: attachment.level,
                };
                if slot == TargetBufferFlags::DEPTH {
                    info.depth = Some(physical);
                } else if slot == TargetBufferFlags::STENCIL {
                    info.stencil = Some(physical);
                } else {
                    info.color[slot.bits().trailing_zeros() as usize] = Some(physical);
                }
                info.width = resource.desc.level_width(attachment.level);
                info.height = resource.desc.level_height(attachment.level);

                if resource.is_imported() {
                    continue;
                }
                if let Some(lifetime) = self.lifetimes[index] {
                    if lifetime.first_use == step && !desc.clear_flags.contains(slot) {
                        flags.discard_start |= slot;
                    }
                    if lifetime.last_use == step && !self.presented.contains(&(index as u32)) {
                        flags.discard_end |= slot;
                    }
                }
            }

            let target = driver.create_render_target(&info)?;
            let params = RenderPassParams {
                flags,
                viewport: Viewport::new(info.width, info.height),
                clear_color: desc.clear_color,
                ..Default::default()
            };
            targets.insert(id, ResolvedRenderTarget { target, params });
        }
        Ok(())
    }

    fn execute_pass(
        &mut self,
        pass: PassId,
        driver: &mut dyn Driver,
        textures: &[Option<TextureHandle>],
        targets: &HashMap<RenderTargetId, ResolvedRenderTarget>,
    ) -> Result<(), GraphError> {
        let Some(executor) = self.executors[pass.index()].take() else {
            log::warn!(
                "Pass '{}' has no executor left",
                self.passes[pass.index()].name
            );
            return Ok(());
        };
        let node = &self.passes[pass.index()];
        log::trace!("Executing pass '{}'", node.name);
        let resources = PassResources {
            node,
            resources: &self.resources,
            textures,
            targets,
        };
        executor.execute(&resources, driver)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::backend::{DriverCommand, DummyDriver};
    use crate::render_graph::graph::ResourceGraph;
    use crate::render_graph::target::RenderTargetDesc;

    fn desc() -> TextureDescriptor {
        TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm)
    }

    fn writer(graph: &mut ResourceGraph, name: &str, runs: Arc<AtomicUsize>) -> ResourceId {
        graph.add_pass(
            name,
            |builder| {
                let t = builder.create_texture(name, desc());
                let t = builder.write(t);
                builder.create_render_target(name, RenderTargetDesc::new().with_color(t));
                t
            },
            move |_, _, _| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
    }

    #[test]
    fn test_culled_pass_never_runs_nor_allocates() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut graph = ResourceGraph::new();
        writer(&mut graph, "orphan", runs.clone());

        let mut driver = DummyDriver::new();
        graph.compile().unwrap().execute(&mut driver).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(driver.textures_created(), 0);
        assert_eq!(driver.render_targets_created(), 0);
    }

    #[test]
    fn test_everything_released_after_execute() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut graph = ResourceGraph::new();
        let first = writer(&mut graph, "first", runs.clone());
        let second = graph.add_pass(
            "second",
            |builder| {
                builder.sample(first);
                let t = builder.create_texture("second", desc());
                builder.write(t)
            },
            |_, _, _| Ok(()),
        );
        graph.present(second);

        let mut driver = DummyDriver::new();
        graph.compile().unwrap().execute(&mut driver).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(driver.textures_created(), 2);
        assert_eq!(driver.live_texture_count(), 0);
        assert_eq!(driver.live_render_target_count(), 0);
    }

    #[test]
    fn test_discard_flags_follow_lifetimes() {
        let mut graph = ResourceGraph::new();
        let (color, _) = graph.add_pass(
            "draw",
            |builder| {
                let color = builder.create_texture("color", desc());
                let color = builder.write(color);
                let target =
                    builder.create_render_target("draw", RenderTargetDesc::new().with_color(color));
                (color, target)
            },
            |data, resources, driver| {
                let resolved = resources.render_target(data.1);
                driver.begin_render_pass(resolved.target, &resolved.params);
                driver.end_render_pass();
                Ok(())
            },
        );
        graph.present(color);

        let mut driver = DummyDriver::new();
        graph.compile().unwrap().execute(&mut driver).unwrap();

        let params = driver
            .commands()
            .iter()
            .find_map(|c| match c {
                DriverCommand::BeginRenderPass { params, .. } => Some(*params),
                _ => None,
            })
            .unwrap();
        // First use, not cleared: old content is irrelevant. Presented: keep it.
        assert_eq!(params.flags.discard_start, TargetBufferFlags::COLOR);
        assert_eq!(params.flags.discard_end, TargetBufferFlags::NONE);
        assert_eq!(params.viewport, Viewport::new(16, 16));
    }

    #[test]
    fn test_executor_error_releases_resources() {
        let mut graph = ResourceGraph::new();
        let out = graph.add_pass(
            "failing",
            |builder| {
                let t = builder.create_texture("t", desc());
                let t = builder.write(t);
                builder.create_render_target("t", RenderTargetDesc::new().with_color(t));
                t
            },
            |_, _, _| Err(DriverError::DeviceLost),
        );
        graph.present(out);

        let mut driver = DummyDriver::new();
        let result = graph.compile().unwrap().execute(&mut driver);

        assert_eq!(result, Err(GraphError::Driver(DriverError::DeviceLost)));
        assert_eq!(driver.live_texture_count(), 0);
        assert_eq!(driver.live_render_target_count(), 0);
    }

    #[test]
    fn test_imported_texture_is_never_destroyed() {
        let mut driver = DummyDriver::new();
        let external = driver.create_texture(&desc()).unwrap();

        let mut graph = ResourceGraph::new();
        let imported = graph.import_texture("external", desc(), external);
        let out = graph.add_pass(
            "copy",
            |builder| {
                builder.sample(imported);
                let t = builder.create_texture("copy", desc());
                builder.write(t)
            },
            move |_, resources, _| {
                assert_eq!(resources.texture(imported), external);
                Ok(())
            },
        );
        graph.present(out);
        graph.compile().unwrap().execute(&mut driver).unwrap();

        assert!(driver.is_texture_alive(external));
        assert_eq!(driver.live_texture_count(), 1);
    }
}
