//! Color grading, vignette, bloom compositing and FXAA

use std::sync::Arc;

use glam::{Vec2, Vec4};

use crate::backend::*;
use crate::error::{PostFxError, PostFxResult};
use crate::materials::{MaterialInstance, PostProcessVariant};
use crate::render_graph::*;

use super::options::{BloomBlendMode, BloomOptions, VignetteOptions};
use super::{draw_full_screen, PostProcessManager};

/// Everything the color grading pass needs besides its input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorGradingParams {
    /// 3D lookup table, owned by the caller
    pub lut: TextureHandle,
    pub out_format: TextureFormat,
    pub translucent: bool,
    pub fxaa: bool,
    pub dithering: bool,
    /// Dynamic resolution scale of the input
    pub scale: Vec2,
    pub bloom: BloomOptions,
    pub vignette: VignetteOptions,
}

impl ColorGradingParams {
    pub fn new(lut: TextureHandle, out_format: TextureFormat) -> Self {
        Self {
            lut,
            out_format,
            translucent: false,
            fxaa: false,
            dithering: true,
            scale: Vec2::ONE,
            bloom: BloomOptions::default(),
            vignette: VignetteOptions::default(),
        }
    }
}

/// `(strength / levels, 1, dirt strength, 0)`, or `y = 1 - x` when interpolating
pub fn bloom_parameters(strength: f32, levels: u8, options: &BloomOptions, has_dirt: bool) -> Vec4 {
    let x = strength / f32::from(levels.max(1));
    let y = match options.blend_mode {
        BloomBlendMode::Add => 1.0,
        BloomBlendMode::Interpolate => 1.0 - x,
    };
    let z = if options.enabled && has_dirt {
        options.dirt_strength
    } else {
        0.0
    };
    Vec4::new(x, y, z, 0.0)
}

/// `(mid point, radius, aspect, feather)` of the vignette
///
/// A disabled vignette returns the half-float maximum in every component,
/// which the shader treats as "off".
pub fn vignette_parameters(options: &VignetteOptions, width: u32, height: u32) -> Vec4 {
    if !options.enabled {
        return Vec4::splat(half::f16::MAX.to_f32());
    }
    let mix = |a: f32, b: f32, t: f32| a + (b - a) * t;

    let oval = options.roundness.min(0.5) * 2.0;
    let circle = (options.roundness.max(0.5) - 0.5) * 2.0;
    let roundness = (1.0 - oval) * 6.0 + oval;

    // Mid point and radius both depend on how square the shape is
    let mid_point =
        (1.0 - options.mid_point) * mix(2.2, 3.0, oval) * (1.0 - 0.1 * options.feather);
    let radius = roundness * mix(1.0 + 4.0 * (1.0 - options.feather), 1.0, oval.sqrt());
    let aspect = mix(1.0, width as f32 / height as f32, circle);

    Vec4::new(mid_point, radius, aspect, options.feather)
}

#[derive(Clone)]
struct ColorGradingPassData {
    input: ResourceId,
    output: ResourceId,
    bloom: Option<ResourceId>,
    dirt: Option<ResourceId>,
    target: RenderTargetId,
}

#[derive(Clone)]
struct FxaaPassData {
    input: ResourceId,
    output: ResourceId,
    target: RenderTargetId,
}

fn set_common_parameters(mi: &mut MaterialInstance, params: &ColorGradingParams, width: u32, height: u32) {
    mi.set_texture("lut", params.lut, SamplerParams::linear());
    mi.set_parameter("vignette", vignette_parameters(&params.vignette, width, height));
    mi.set_parameter("vignetteColor", params.vignette.color);
    mi.set_parameter("dithering", params.dithering);
    mi.set_parameter("fxaa", params.fxaa);
}

impl PostProcessManager {
    /// Grade `input` through the LUT, compositing bloom and vignette
    pub fn color_grading(
        &self,
        graph: &mut ResourceGraph,
        input: ResourceId,
        params: &ColorGradingParams,
    ) -> ResourceId {
        let params = *params;
        let mut bloom_options = params.bloom;
        bloom_options.strength = bloom_options.strength.clamp(0.0, 1.0);

        let (bloom, dirt, bloom_levels) = if bloom_options.enabled {
            let bloom = self.bloom_pass(
                graph,
                input,
                TextureFormat::Rg11b10Float,
                &bloom_options,
                params.scale,
            );
            let dirt = bloom_options.dirt.map(|dirt| {
                graph.import_texture(
                    "dirt",
                    TextureDescriptor::new_2d(dirt.width, dirt.height, dirt.format),
                    dirt.handle,
                )
            });
            (Some(bloom.texture), dirt, bloom.levels)
        } else {
            (None, None, 0)
        };

        let material = Arc::clone(&self.color_grading);
        let dummy_zero = self.dummy_zero;
        let dummy_one = self.dummy_one;
        let data = graph.add_pass(
            "colorGrading",
            |builder| {
                let desc = builder.descriptor(input);
                let input = builder.sample(input);
                let output = builder.create_texture(
                    "colorGrading output",
                    TextureDescriptor::new_2d(desc.width, desc.height, params.out_format),
                );
                let output = builder.write(output);
                let target = builder.create_render_target(
                    "colorGrading Target",
                    RenderTargetDesc::new().with_color(output),
                );
                let bloom = bloom.map(|bloom| builder.sample(bloom));
                let dirt = dirt.map(|dirt| builder.sample(dirt));
                ColorGradingPassData {
                    input,
                    output,
                    bloom,
                    dirt,
                    target,
                }
            },
            move |data, resources, driver| {
                let color = resources.texture(data.input);
                let bloom = data
                    .bloom
                    .map(|bloom| resources.texture(bloom))
                    .unwrap_or(dummy_zero);
                let dirt = data
                    .dirt
                    .map(|dirt| resources.texture(dirt))
                    .unwrap_or(dummy_one);
                let out = resources.render_target(data.target);
                let (width, height) = (out.params.viewport.width, out.params.viewport.height);

                material.configure(driver, |mi| {
                    set_common_parameters(mi, &params, width, height);
                    mi.set_texture("colorBuffer", color, SamplerParams::default());
                    mi.set_texture("bloomBuffer", bloom, SamplerParams::linear());
                    mi.set_texture("dirtBuffer", dirt, SamplerParams::linear());
                    mi.set_parameter(
                        "bloom",
                        bloom_parameters(
                            bloom_options.strength,
                            bloom_levels,
                            &bloom_options,
                            data.dirt.is_some(),
                        ),
                    );
                });

                let variant = PostProcessVariant::from_translucent(params.translucent);
                draw_full_screen(driver, &out, &material.pipeline_state(variant));
                Ok(())
            },
        );
        data.output
    }

    /// Commit the subpass material ahead of [`Self::color_grading_subpass`]
    ///
    /// Bloom is not available to the subpass variant.
    pub fn color_grading_prepare_subpass(
        &self,
        driver: &mut dyn Driver,
        params: &ColorGradingParams,
        width: u32,
        height: u32,
    ) -> PostFxResult<()> {
        let material = self
            .color_grading_as_subpass
            .as_ref()
            .ok_or(PostFxError::SubpassUnsupported)?;
        let mut mi = material.instance();
        set_common_parameters(&mut mi, params, width, height);
        mi.commit(driver);
        Ok(())
    }

    /// Grade the current render pass' color in place, as its next subpass
    pub fn color_grading_subpass(&self, driver: &mut dyn Driver, translucent: bool) -> PostFxResult<()> {
        let material = self
            .color_grading_as_subpass
            .as_ref()
            .ok_or(PostFxError::SubpassUnsupported)?;
        material.instance().bind(driver);
        driver.next_subpass();
        driver.draw(&material.pipeline_state(PostProcessVariant::from_translucent(translucent)));
        Ok(())
    }

    /// Standalone FXAA
    pub fn fxaa(
        &self,
        graph: &mut ResourceGraph,
        input: ResourceId,
        out_format: TextureFormat,
        translucent: bool,
    ) -> ResourceId {
        let material = Arc::clone(&self.fxaa);
        let data = graph.add_pass(
            "fxaa",
            |builder| {
                let desc = builder.descriptor(input);
                let input = builder.sample(input);
                let output = builder.create_texture(
                    "fxaa output",
                    TextureDescriptor::new_2d(desc.width, desc.height, out_format),
                );
                let output = builder.write(output);
                let target =
                    builder.create_render_target("FXAA Target", RenderTargetDesc::new().with_color(output));
                FxaaPassData {
                    input,
                    output,
                    target,
                }
            },
            move |data, resources, driver| {
                let color = resources.texture(data.input);
                material.configure(driver, |mi| {
                    mi.set_texture("colorBuffer", color, SamplerParams::linear());
                });
                let out = resources.render_target(data.target);
                draw_full_screen(
                    driver,
                    &out,
                    &material.pipeline_state(PostProcessVariant::from_translucent(translucent)),
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

    fn enabled_vignette() -> VignetteOptions {
        VignetteOptions {
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_vignette_is_sentinel() {
        let v = vignette_parameters(&VignetteOptions::default(), 1920, 1080);
        assert_eq!(v, Vec4::splat(65504.0));
    }

    #[test]
    fn test_oval_vignette() {
        let v = vignette_parameters(&enabled_vignette(), 1920, 1080);
        // roundness 0.5: full oval, no circle correction
        assert!((v.x - 0.5 * 3.0 * 0.95).abs() < 1e-6);
        assert!((v.y - 1.0).abs() < 1e-6);
        assert_eq!(v.z, 1.0);
        assert_eq!(v.w, 0.5);
    }

    #[test]
    fn test_circle_and_rectangle_vignette() {
        let circle = VignetteOptions {
            roundness: 1.0,
            ..enabled_vignette()
        };
        let v = vignette_parameters(&circle, 200, 100);
        assert!((v.z - 2.0).abs() < 1e-6);

        let rectangle = VignetteOptions {
            roundness: 0.0,
            feather: 1.0,
            ..enabled_vignette()
        };
        let v = vignette_parameters(&rectangle, 200, 100);
        assert!((v.x - 0.5 * 2.2 * 0.9).abs() < 1e-6);
        assert!((v.y - 6.0).abs() < 1e-6);
        assert_eq!(v.z, 1.0);
    }

    #[test]
    fn test_bloom_parameters() {
        let options = BloomOptions {
            enabled: true,
            ..Default::default()
        };
        assert_eq!(
            bloom_parameters(0.5, 5, &options, false),
            Vec4::new(0.1, 1.0, 0.0, 0.0)
        );
        assert_eq!(
            bloom_parameters(0.5, 5, &options, true),
            Vec4::new(0.1, 1.0, 0.2, 0.0)
        );

        let interpolate = BloomOptions {
            blend_mode: BloomBlendMode::Interpolate,
            ..options
        };
        let v = bloom_parameters(0.5, 5, &interpolate, false);
        assert!((v.y - 0.9).abs() < 1e-6);

        // Zero levels never divides by zero
        assert_eq!(bloom_parameters(0.5, 0, &options, false).x, 0.5);
    }
}
