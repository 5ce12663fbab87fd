//! Scalable ambient obscurance with a depth-aware separable blur

use std::f32::consts::PI;
use std::sync::Arc;

use glam::{Vec2, Vec4};

use crate::backend::*;
use crate::render_graph::*;

use super::options::{AmbientOcclusionOptions, CameraInfo, QualityLevel};
use super::{draw_full_screen, resolution, PostProcessManager};

/// Sample count and spiral turns of a quality tier
pub fn sample_count_and_spiral_turns(quality: QualityLevel) -> (f32, f32) {
    match quality {
        QualityLevel::Low => (7.0, 5.0),
        QualityLevel::Medium => (11.0, 9.0),
        QualityLevel::High => (16.0, 10.0),
        QualityLevel::Ultra => (32.0, 14.0),
    }
}

/// Material parameters of the SSAO pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsaoParameters {
    pub resolution: Vec4,
    pub inv_radius_squared: f32,
    pub projection_scale_radius: f32,
    pub depth_params: Vec2,
    pub position_params: Vec2,
    pub peak2: f32,
    pub bias: f32,
    pub power: f32,
    pub intensity: f32,
    pub max_level: u32,
    pub sample_count: Vec2,
    pub spiral_turns: f32,
    pub angle_inc_cos_sin: Vec2,
    pub inv_far_plane: f32,
}

impl SsaoParameters {
    pub fn compute(
        camera: &CameraInfo,
        options: &AmbientOcclusionOptions,
        width: u32,
        height: u32,
        level_count: u8,
    ) -> Self {
        let p = camera.projection;
        let inv = p.inverse();

        // Size in pixels of a 1m object seen from 1m away
        let projection_scale =
            (0.5 * p.x_axis.x * width as f32).min(0.5 * p.y_axis.y * height as f32);

        // Where the falloff peaks
        let peak = 0.1 * options.radius;
        // x3 for a better default at intensity 1
        let intensity = (2.0 * PI * peak) * options.intensity * 3.0;
        // AO is always squared
        let power = options.power * 2.0;

        let (sample_count, spiral_turns) = sample_count_and_spiral_turns(options.quality);
        let inc = (1.0 / (sample_count - 0.5)) * spiral_turns * 2.0 * PI;

        Self {
            resolution: resolution(width, height),
            inv_radius_squared: 1.0 / (options.radius * options.radius),
            projection_scale_radius: projection_scale * options.radius,
            depth_params: Vec2::new(-p.w_axis.z, p.z_axis.z - 1.0) * 0.5,
            position_params: Vec2::new(inv.x_axis.x, inv.y_axis.y) * 2.0,
            peak2: peak * peak,
            bias: options.bias,
            power,
            intensity,
            max_level: u32::from(level_count.saturating_sub(1)),
            sample_count: Vec2::new(sample_count, 1.0 / (sample_count - 0.5)),
            spiral_turns,
            angle_inc_cos_sin: Vec2::new(inc.cos(), inc.sin()),
            inv_far_plane: 1.0 / -camera.zf,
        }
    }
}

#[derive(Clone)]
struct SsaoPassData {
    depth: ResourceId,
    ssao: ResourceId,
    target: RenderTargetId,
}

#[derive(Clone)]
struct BilateralBlurPassData {
    input: ResourceId,
    blurred: ResourceId,
    target: RenderTargetId,
}

impl PostProcessManager {
    /// Ambient occlusion from the structure pyramid
    ///
    /// The blurred result is also published as `"ssao"`.
    pub fn screen_space_ambient_occlusion(
        &self,
        graph: &mut ResourceGraph,
        structure: ResourceId,
        camera: &CameraInfo,
        options: &AmbientOcclusionOptions,
    ) -> ResourceId {
        let material = Arc::clone(&self.sao);
        let camera = *camera;
        let options = *options;
        let level_count = graph.descriptor(structure).levels;

        let data = graph.add_pass(
            "SSAO Pass",
            |builder| {
                let desc = builder.descriptor(structure);
                let depth = builder.sample(structure);
                let ssao = builder.create_texture(
                    "SSAO Buffer",
                    TextureDescriptor::new_2d(desc.width, desc.height, TextureFormat::Rgb8Unorm),
                );
                // The depth test skips pixels at infinity; those keep the clear value
                let ssao = builder.write(ssao);
                let target = builder.create_render_target(
                    "SSAO Target",
                    RenderTargetDesc::new()
                        .with_color(ssao)
                        .with_depth(depth)
                        .with_clear_color(Vec4::ONE)
                        .with_clear_flags(TargetBufferFlags::COLOR),
                );
                SsaoPassData {
                    depth,
                    ssao,
                    target,
                }
            },
            move |data, resources, driver| {
                let depth = resources.texture(data.depth);
                let desc = resources.descriptor(data.ssao);
                let params =
                    SsaoParameters::compute(&camera, &options, desc.width, desc.height, level_count);

                material.configure(driver, |mi| {
                    mi.set_texture(
                        "depth",
                        depth,
                        SamplerParams::min(SamplerMinFilter::NearestMipmapNearest),
                    );
                    mi.set_parameter("resolution", params.resolution);
                    mi.set_parameter("invRadiusSquared", params.inv_radius_squared);
                    mi.set_parameter("projectionScaleRadius", params.projection_scale_radius);
                    mi.set_parameter("depthParams", params.depth_params);
                    mi.set_parameter("positionParams", params.position_params);
                    mi.set_parameter("peak2", params.peak2);
                    mi.set_parameter("bias", params.bias);
                    mi.set_parameter("power", params.power);
                    mi.set_parameter("intensity", params.intensity);
                    mi.set_parameter("maxLevel", params.max_level);
                    mi.set_parameter("sampleCount", params.sample_count);
                    mi.set_parameter("spiralTurns", params.spiral_turns);
                    mi.set_parameter("angleIncCosSin", params.angle_inc_cos_sin);
                    mi.set_parameter("invFarPlane", params.inv_far_plane);
                });

                let mut pipeline = material.default_pipeline_state();
                pipeline.raster_state.depth_func = DepthFunc::Greater;
                draw_full_screen(driver, &resources.render_target(data.target), &pipeline);
                Ok(())
            },
        );

        let high_quality_upsampling =
            options.upsampling >= QualityLevel::High && options.resolution < 1.0;

        let ssao = self.bilateral_blur_pass(
            graph,
            data.ssao,
            structure,
            Vec2::X,
            camera.zf,
            TextureFormat::Rgb8Unorm,
        );
        let ssao = self.bilateral_blur_pass(
            graph,
            ssao,
            structure,
            Vec2::Y,
            camera.zf,
            if high_quality_upsampling {
                TextureFormat::Rgb8Unorm
            } else {
                TextureFormat::R8Unorm
            },
        );

        graph.blackboard_mut().put("ssao", ssao);
        ssao
    }

    /// One direction of the depth-aware blur
    ///
    /// `axis` is in texels; `depth` is used both for edge detection and as
    /// the depth attachment that skips pixels at infinity.
    pub fn bilateral_blur_pass(
        &self,
        graph: &mut ResourceGraph,
        input: ResourceId,
        depth: ResourceId,
        axis: Vec2,
        zf: f32,
        format: TextureFormat,
    ) -> ResourceId {
        let material = Arc::clone(&self.bilateral_blur);
        let data = graph.add_pass(
            "Separable Blur Pass",
            |builder| {
                let desc = builder.descriptor(input);
                let input = builder.sample(input);
                let blurred = builder.create_texture(
                    "Blurred output",
                    TextureDescriptor::new_2d(desc.width, desc.height, format),
                );
                let depth = builder.read(depth);
                let blurred = builder.write(blurred);
                let target = builder.create_render_target(
                    "Blurred target",
                    RenderTargetDesc::new()
                        .with_color(blurred)
                        .with_depth(depth)
                        .with_clear_color(Vec4::ONE)
                        .with_clear_flags(TargetBufferFlags::COLOR),
                );
                BilateralBlurPassData {
                    input,
                    blurred,
                    target,
                }
            },
            move |data, resources, driver| {
                let ssao = resources.texture(data.input);
                let desc = resources.descriptor(data.blurred);
                material.configure(driver, |mi| {
                    // Only level 0 is read
                    mi.set_texture("ssao", ssao, SamplerParams::default());
                    mi.set_parameter(
                        "axis",
                        axis / Vec2::new(desc.width as f32, desc.height as f32),
                    );
                    mi.set_parameter("farPlaneOverEdgeDistance", -zf / 0.0625);
                });

                let mut pipeline = material.default_pipeline_state();
                pipeline.raster_state.depth_func = DepthFunc::Greater;
                draw_full_screen(driver, &resources.render_target(data.target), &pipeline);
                Ok(())
            },
        );
        data.blurred
    }
}
