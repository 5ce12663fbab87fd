//! Mip-pyramid bloom
//!
//! The input is downsampled into a mip chain (thresholding on the first
//! level), then every level is additively upsampled into the one above it.

use std::sync::Arc;

use glam::Vec2;

use crate::backend::*;
use crate::render_graph::*;

use super::options::BloomOptions;
use super::{draw_full_screen, resolution, PostProcessManager};

/// Most levels the bloom texture ever gets
pub const MAX_BLOOM_LEVELS: u8 = 12;

/// Size and level count of the bloom texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomLayout {
    pub width: u32,
    pub height: u32,
    pub levels: u8,
    /// The input is more than twice the bloom size and gets halved first
    pub prescale: bool,
}

impl BloomLayout {
    /// Pick the bloom size: the minor axis at the requested resolution, the
    /// major axis scaled to match, both corrected for dynamic resolution.
    pub fn compute(desc: &TextureDescriptor, options: &BloomOptions, scale: Vec2) -> Self {
        let mut width = (desc.width as f32 / scale.x) as u32;
        let mut height = (desc.height as f32 / scale.y) as u32;
        if options.anamorphism >= 1.0 {
            height = (height as f32 * options.anamorphism) as u32;
        } else {
            width = (width as f32 * (1.0 / options.anamorphism.max(1.0 / 4096.0))) as u32;
        }

        let requested_levels = options.levels.clamp(1, MAX_BLOOM_LEVELS);
        let minor = if width.min(height) == 0 {
            log::warn!(
                "Bloom of a degenerate {}x{} buffer, using a minor axis of 1",
                width,
                height
            );
            1
        } else {
            width.min(height)
        };
        let major = width.max(height);

        // clamp() with the upper bound winning when the bounds cross
        let new_minor = options
            .resolution
            .max(1 << requested_levels)
            .min(minor.min(1 << MAX_BLOOM_LEVELS));
        let new_major = (u64::from(major) * u64::from(new_minor) / u64::from(minor)) as u32;

        if width > height {
            width = new_major;
            height = new_minor;
        } else if width < height {
            width = new_minor;
            height = new_major;
        } else {
            // A square buffer stays square, both axes take the minor size
            width = new_minor;
            height = new_minor;
        }

        let levels = requested_levels
            .min(max_level_count(new_major, new_major))
            .min(MAX_BLOOM_LEVELS);
        let prescale = 2 * width < desc.width || 2 * height < desc.height;

        Self {
            width,
            height,
            levels,
            prescale,
        }
    }
}

/// Result of [`PostProcessManager::bloom_pass`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomOutput {
    pub texture: ResourceId,
    /// Levels actually generated
    pub levels: u8,
}

#[derive(Clone)]
struct BloomPassData {
    input: ResourceId,
    output: ResourceId,
    targets: Vec<RenderTargetId>,
}

impl PostProcessManager {
    /// Build the bloom mip chain of `input` in `out_format`
    pub fn bloom_pass(
        &self,
        graph: &mut ResourceGraph,
        input: ResourceId,
        out_format: TextureFormat,
        options: &BloomOptions,
        scale: Vec2,
    ) -> BloomOutput {
        let desc = graph.descriptor(input);
        let layout = BloomLayout::compute(&desc, options, scale);
        let levels = layout.levels;
        log::trace!(
            "Bloom layout {}x{} with {} levels, prescale {}",
            layout.width,
            layout.height,
            levels,
            layout.prescale
        );

        // Halving with a blit first is much cheaper on tilers
        let input = if layout.prescale {
            self.opaque_blit(
                graph,
                input,
                TextureDescriptor::new_2d(desc.width / 2, desc.height / 2, out_format),
                SamplerMagFilter::Linear,
            )
        } else {
            input
        };

        let material = Arc::clone(&self.bloom_downsample);
        let threshold = if options.threshold { 1.0f32 } else { 0.0 };
        let downsample = graph.add_pass(
            "Bloom Downsample",
            |builder| {
                let input = builder.sample(input);
                let output = builder.create_texture(
                    "Bloom Texture",
                    TextureDescriptor::new_2d(layout.width, layout.height, out_format)
                        .with_levels(levels),
                );
                let output = builder.sample(output);
                let output = builder.write(output);
                let targets = (0..levels)
                    .map(|level| {
                        builder.create_render_target(
                            "Bloom target",
                            RenderTargetDesc::new().with_color(Attachment::at_level(output, level)),
                        )
                    })
                    .collect();
                BloomPassData {
                    input,
                    output,
                    targets,
                }
            },
            move |data, resources, driver| {
                let source = resources.texture(data.input);
                let output = resources.texture(data.output);
                let out_desc = resources.descriptor(data.output);
                let pipeline = material.default_pipeline_state();

                {
                    let mut mi = material.instance();
                    // Level 0 of the input only
                    mi.set_texture("source", source, SamplerParams::linear());
                    mi.set_parameter("level", 0.0f32);
                    mi.set_parameter("threshold", threshold);
                    mi.bind(driver);
                }

                for (level, &target) in data.targets.iter().enumerate() {
                    let level = level as u8;
                    {
                        let mut mi = material.instance();
                        mi.set_parameter(
                            "resolution",
                            resolution(out_desc.level_width(level), out_desc.level_height(level)),
                        );
                        mi.commit(driver);
                    }

                    let mut target = resources.render_target(target);
                    target.params.flags.discard_start = TargetBufferFlags::COLOR;
                    target.params.flags.discard_end = TargetBufferFlags::NONE;
                    draw_full_screen(driver, &target, &pipeline);

                    // The next level reads this one
                    let mut mi = material.instance();
                    mi.set_texture(
                        "source",
                        output,
                        SamplerParams::new(
                            SamplerMagFilter::Linear,
                            SamplerMinFilter::LinearMipmapNearest,
                        ),
                    );
                    mi.set_parameter("level", f32::from(level));
                }
                Ok(())
            },
        );

        let material = Arc::clone(&self.bloom_upsample);
        let upsample = graph.add_pass(
            "Bloom Upsample",
            |builder| {
                let input = builder.sample(downsample.output);
                let output = builder.write(input);
                let targets = (0..levels)
                    .map(|level| {
                        builder.create_render_target(
                            "Bloom target",
                            RenderTargetDesc::new().with_color(Attachment::at_level(output, level)),
                        )
                    })
                    .collect();
                BloomPassData {
                    input,
                    output,
                    targets,
                }
            },
            move |data, resources, driver| {
                let source = resources.texture(data.input);
                let out_desc = resources.descriptor(data.output);
                let mut pipeline = material.default_pipeline_state();
                pipeline.raster_state.blend_function_src_rgb = BlendFunction::One;
                pipeline.raster_state.blend_function_dst_rgb = BlendFunction::One;

                material.instance().bind(driver);
                for level in (1..data.targets.len()).rev() {
                    // Blended, so the previous content is kept
                    let mut target = resources.render_target(data.targets[level - 1]);
                    target.params.flags.discard_start = TargetBufferFlags::NONE;
                    target.params.flags.discard_end = TargetBufferFlags::NONE;

                    let dst_level = (level - 1) as u8;
                    {
                        let mut mi = material.instance();
                        mi.set_parameter(
                            "resolution",
                            resolution(
                                out_desc.level_width(dst_level),
                                out_desc.level_height(dst_level),
                            ),
                        );
                        mi.set_texture(
                            "source",
                            source,
                            SamplerParams::new(
                                SamplerMagFilter::Linear,
                                SamplerMinFilter::LinearMipmapNearest,
                            ),
                        );
                        mi.set_parameter("level", level as f32);
                        mi.commit(driver);
                    }
                    draw_full_screen(driver, &target, &pipeline);
                }
                Ok(())
            },
        );

        BloomOutput {
            texture: upsample.output,
            levels,
        }
    }
}
