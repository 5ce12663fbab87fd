//! Separable Gaussian blur with linear-sampling taps

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::backend::*;
use crate::render_graph::*;

use super::{draw_full_screen, resolution, PostProcessManager};

/// Capacity of the kernel storage of the blur material
pub const MAX_KERNEL_TAPS: usize = 64;

/// One linearly-sampled tap: two Gaussian samples merged into one fetch
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct KernelTap {
    pub weight: f32,
    /// Offset between the two merged texels, in `[0, 1]`
    pub offset: f32,
}

/// Parameters of one Gaussian blur
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianBlur {
    pub kernel_width: usize,
    pub sigma_ratio: f32,
    /// Tonemap samples before filtering, to tame fireflies
    pub reinhard: bool,
}

impl GaussianBlur {
    pub fn new(kernel_width: usize, sigma_ratio: f32) -> Self {
        Self {
            kernel_width,
            sigma_ratio,
            reinhard: false,
        }
    }

    pub fn with_reinhard(mut self, reinhard: bool) -> Self {
        self.reinhard = reinhard;
        self
    }
}

/// Positive half of a normalized Gaussian kernel
///
/// Tap 0 is the center texel; every other tap covers two texels. The
/// returned taps never exceed `capacity`.
pub fn gaussian_coefficients(kernel_width: usize, sigma_ratio: f32, capacity: usize) -> Vec<KernelTap> {
    assert!(capacity >= 1, "gaussian kernel storage is empty");
    let sigma = (kernel_width as f32 + 1.0) / sigma_ratio;
    let alpha = 1.0 / (2.0 * sigma * sigma);

    // Positive-side samples needed with linear sampling
    let count = (kernel_width.saturating_sub(1) / 4 + 1).min(capacity);

    let mut kernel = Vec::with_capacity(count);
    kernel.push(KernelTap {
        weight: 1.0,
        offset: 0.0,
    });
    let mut total = 1.0;
    for i in 1..count {
        let x0 = (i * 2 - 1) as f32;
        let x1 = (i * 2) as f32;
        let k0 = (-alpha * x0 * x0).exp();
        let k1 = (-alpha * x1 * x1).exp();
        let k = k0 + k1;
        kernel.push(KernelTap {
            weight: k,
            offset: k0 / k,
        });
        total += k * 2.0;
    }
    for tap in &mut kernel {
        tap.weight /= total;
    }
    kernel
}

#[derive(Clone)]
struct GaussianBlurPassData {
    input: ResourceId,
    output: ResourceId,
    temp: ResourceId,
    output_target: RenderTargetId,
    temp_target: RenderTargetId,
}

impl PostProcessManager {
    /// Blur `src_level` of `input` into `dst_level` of `output`
    ///
    /// Without an `output` a new texture with the input's descriptor is
    /// created. Both directions run in a single graph pass.
    pub fn gaussian_blur_pass(
        &self,
        graph: &mut ResourceGraph,
        input: ResourceId,
        src_level: u8,
        output: Option<ResourceId>,
        dst_level: u8,
        blur: &GaussianBlur,
    ) -> ResourceId {
        let material = Arc::clone(&self.separable_gaussian_blur);
        let kernel = gaussian_coefficients(
            blur.kernel_width,
            blur.sigma_ratio,
            self.kernel_storage_size,
        );
        let reinhard = blur.reinhard;

        let data = graph.add_pass(
            "Gaussian Blur Passes",
            |builder| {
                let desc = builder.descriptor(input);
                let input = builder.sample(input);
                // Only `dst_level` is rendered; the other levels keep their content
                let output = match output {
                    Some(output) if output == input => output,
                    Some(output) => builder.sample(output),
                    None => builder.create_texture("Blurred texture", desc),
                };
                let output = builder.write(output);

                // Destination width, since only x is blurred; source height
                let temp_desc = TextureDescriptor {
                    width: value_for_level(dst_level, desc.width),
                    height: value_for_level(src_level, desc.height),
                    levels: 1,
                    ..desc
                };
                let temp = builder.create_texture("Horizontal temporary buffer", temp_desc);
                let temp = builder.sample(temp);
                let temp = builder.write(temp);

                let temp_target = builder.create_render_target(
                    "Horizontal temporary target",
                    RenderTargetDesc::new().with_color(temp),
                );
                let output_target = builder.create_render_target(
                    "Blurred target",
                    RenderTargetDesc::new().with_color(Attachment::at_level(output, dst_level)),
                );
                GaussianBlurPassData {
                    input,
                    output,
                    temp,
                    output_target,
                    temp_target,
                }
            },
            move |data, resources, driver| {
                let source = resources.texture(data.input);
                let temp = resources.texture(data.temp);
                let in_desc = resources.descriptor(data.input);
                let out_desc = resources.descriptor(data.output);
                let temp_desc = resources.descriptor(data.temp);
                let pipeline = material.default_pipeline_state();

                // Horizontal
                {
                    let mut mi = material.instance();
                    mi.set_texture(
                        "source",
                        source,
                        SamplerParams::new(
                            SamplerMagFilter::Linear,
                            SamplerMinFilter::LinearMipmapNearest,
                        ),
                    );
                    mi.set_parameter("level", f32::from(src_level));
                    mi.set_parameter("reinhard", u32::from(reinhard));
                    mi.set_parameter("resolution", resolution(temp_desc.width, temp_desc.height));
                    mi.set_parameter(
                        "axis",
                        Vec2::new(1.0 / in_desc.level_width(src_level) as f32, 0.0),
                    );
                    mi.set_parameter("count", kernel.len() as i32);
                    mi.set_array("kernel", &kernel);
                    mi.commit(driver);
                    mi.bind(driver);
                }
                // Discards are only derived at pass boundaries; the vertical draw needs this
                let mut temp_target = resources.render_target(data.temp_target);
                temp_target.params.flags.discard_end = TargetBufferFlags::NONE;
                draw_full_screen(driver, &temp_target, &pipeline);

                // Vertical
                let width = out_desc.level_width(dst_level);
                let height = out_desc.level_height(dst_level);
                let output_target = resources.render_target(data.output_target);
                debug_assert_eq!(output_target.params.viewport.width, width);
                debug_assert_eq!(output_target.params.viewport.height, height);
                {
                    let mut mi = material.instance();
                    // Level 0 only
                    mi.set_texture("source", temp, SamplerParams::linear());
                    mi.set_parameter("level", 0.0f32);
                    mi.set_parameter("resolution", resolution(width, height));
                    mi.set_parameter("axis", Vec2::new(0.0, 1.0 / temp_desc.height as f32));
                    mi.commit(driver);
                }
                draw_full_screen(driver, &output_target, &pipeline);
                Ok(())
            },
        );
        data.output
    }

    /// Fill levels `1..lod_count` of `input`, each blurred from the previous one
    ///
    /// Reinhard filtering, when requested, only applies to the first level.
    pub fn generate_gaussian_mipmap(
        &self,
        graph: &mut ResourceGraph,
        input: ResourceId,
        lod_count: u8,
        blur: GaussianBlur,
    ) -> ResourceId {
        let mut blur = blur;
        let mut input = input;
        for level in 1..lod_count {
            input = self.gaussian_blur_pass(graph, input, level - 1, Some(input), level, &blur);
            blur.reinhard = false;
        }
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::{MaterialKind, MaterialPackages};

    fn two_sided_sum(kernel: &[KernelTap]) -> f32 {
        kernel[0].weight + 2.0 * kernel[1..].iter().map(|t| t.weight).sum::<f32>()
    }

    #[test]
    fn test_kernel_is_normalized() {
        for kernel_width in [1, 5, 9, 13, 21, 63, 255] {
            for sigma_ratio in [2.0, 4.0, 6.0] {
                let kernel = gaussian_coefficients(kernel_width, sigma_ratio, MAX_KERNEL_TAPS);
                assert!(
                    (two_sided_sum(&kernel) - 1.0).abs() < 1e-5,
                    "kernel {kernel_width}/{sigma_ratio} sums to {}",
                    two_sided_sum(&kernel)
                );
            }
        }
    }

    #[test]
    fn test_tap_count_is_bounded() {
        assert_eq!(gaussian_coefficients(1, 6.0, 64).len(), 1);
        assert_eq!(gaussian_coefficients(9, 6.0, 64).len(), 3);
        assert_eq!(gaussian_coefficients(21, 6.0, 64).len(), 6);
        // Clamped by storage
        assert_eq!(gaussian_coefficients(1023, 6.0, 64).len(), 64);
        assert_eq!(gaussian_coefficients(1023, 6.0, 8).len(), 8);
        // A zero width is a single center tap
        assert_eq!(gaussian_coefficients(0, 6.0, 64).len(), 1);
    }

    #[test]
    fn test_taps_decrease_and_offsets_stay_in_range() {
        let kernel = gaussian_coefficients(21, 6.0, MAX_KERNEL_TAPS);
        assert_eq!(kernel[0].offset, 0.0);
        for pair in kernel[1..].windows(2) {
            assert!(pair[0].weight > pair[1].weight);
        }
        for tap in &kernel[1..] {
            assert!(tap.offset > 0.5 && tap.offset < 1.0);
        }
    }

    #[test]
    fn test_blur_into_supplied_output_keeps_its_writer() {
        let mut driver = DummyDriver::new();
        let mut packages = MaterialPackages::new();
        for kind in MaterialKind::ALL {
            packages.insert(kind, vec![1u8; 4]);
        }
        let manager = PostProcessManager::init(&mut driver, &packages).unwrap();

        let desc = TextureDescriptor::new_2d(64, 64, TextureFormat::Rgba16Float).with_levels(2);
        let mut graph = ResourceGraph::new();
        let input = graph.import_texture("source", desc, TextureHandle::from_raw(500));
        let output = graph.add_pass(
            "fill",
            |builder| {
                let t = builder.create_texture("target", desc);
                builder.write(t)
            },
            |_, _, _| Ok(()),
        );
        let blurred = manager.gaussian_blur_pass(
            &mut graph,
            input,
            0,
            Some(output),
            1,
            &GaussianBlur::new(9, 6.0),
        );
        assert_eq!(blurred.index(), output.index());
        graph.present(blurred);

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_names(), vec!["fill", "Gaussian Blur Passes"]);
        manager.terminate(&mut driver);
    }

    #[test]
    fn test_tap_layout_is_two_floats() {
        let kernel = [KernelTap {
            weight: 0.25,
            offset: 0.75,
        }];
        let floats: &[f32] = bytemuck::cast_slice(&kernel);
        assert_eq!(floats, &[0.25, 0.75]);
    }
}
