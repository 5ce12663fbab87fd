//! Tile-based depth of field
//!
//! The color buffer is downsampled into near and far fields plus a CoC
//! buffer, mipmapped, and its CoC reduced to min/max tiles. Tiles are
//! dilated so that every tile knows the largest CoC that can reach it; the
//! gather blur, a median filter and a full-resolution combine follow.

use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::Arc;

use glam::{Vec2, Vec4};

use crate::backend::*;
use crate::materials::PostProcessVariant;
use crate::render_graph::*;

use super::options::{CameraInfo, DepthOfFieldOptions};
use super::{draw_full_screen, PostProcessManager};

/// Tile size in full-resolution pixels
pub const TILE_SIZE: u32 = 16;
/// Largest supported CoC radius in full-resolution pixels
pub const MAX_COC_RADIUS: u32 = 32;
/// Dilation rounds needed for a tile to see every CoC that reaches it
pub const DILATION_ROUNDS: usize = ((MAX_COC_RADIUS + TILE_SIZE - 1) / TILE_SIZE) as usize;
/// Height of the 35mm film gate, in meters
pub const SENSOR_SIZE: f32 = 0.024;

/// Reductions from half resolution down to one texel per tile
const TILE_REDUCTION_ROUNDS: u32 = TILE_SIZE.trailing_zeros() - 1;
/// The working buffers are padded to 16 pixels, leaving 4 clean mip levels
const MAX_MIP_LEVELS: u8 = 4;

/// Values derived from the camera and the options, constant over the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DofParameters {
    pub bokeh_angle: f32,
    pub coc_params: Vec2,
    /// Working (half) resolution, padded for clean mip levels
    pub width: u32,
    pub height: u32,
    pub mip_count: u8,
}

impl DofParameters {
    pub fn compute(
        camera: &CameraInfo,
        options: &DepthOfFieldOptions,
        color_width: u32,
        color_height: u32,
    ) -> Self {
        // The bokeh rotates with the aperture (blade angle)
        let mut bokeh_angle = PI / 6.0;
        if options.max_aperture_diameter > 0.0 {
            bokeh_angle +=
                FRAC_PI_2 * (camera.aperture / options.max_aperture_diameter).clamp(0.0, 1.0);
        }

        let focus_distance = camera.zn.max(options.focus_distance);
        let kc = (camera.aperture * camera.focal_length) / (focus_distance - camera.focal_length);
        let ks = color_height as f32 / SENSOR_SIZE;
        // 1/zn stands in for (zf - zn)/(zf * zn): the far plane is at infinity
        let coc_params = Vec2::new(
            (options.blur_scale * ks * kc) * focus_distance / camera.zn,
            (options.blur_scale * ks * kc) * (1.0 - focus_distance / camera.zn),
        );

        let mask = (1u32 << MAX_MIP_LEVELS) - 1;
        let width = ((color_width + mask) & !mask) / 2;
        let height = ((color_height + mask) & !mask) / 2;
        let mip_count = max_level_count(width, height).min(MAX_MIP_LEVELS);

        Self {
            bokeh_angle,
            coc_params,
            width,
            height,
            mip_count,
        }
    }
}

/// Min/max CoC over a tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileCoc {
    pub min: f32,
    pub max: f32,
}

impl TileCoc {
    pub const EMPTY: TileCoc = TileCoc {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    fn merge(self, other: TileCoc) -> TileCoc {
        TileCoc {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Row-major grid of tiles
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    tiles: Vec<TileCoc>,
}

impl TileGrid {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> TileCoc {
        self.tiles[y * self.width + x]
    }
}

/// Reduce a per-pixel CoC map to min/max tiles
pub fn reduce_tiles(coc: &[f32], width: usize, height: usize, tile_size: usize) -> TileGrid {
    assert_eq!(coc.len(), width * height, "CoC map size mismatch");
    let grid_width = width.div_ceil(tile_size);
    let grid_height = height.div_ceil(tile_size);
    let mut tiles = vec![TileCoc::EMPTY; grid_width * grid_height];
    for y in 0..height {
        for x in 0..width {
            let value = coc[y * width + x];
            let tile = &mut tiles[(y / tile_size) * grid_width + x / tile_size];
            *tile = tile.merge(TileCoc {
                min: value,
                max: value,
            });
        }
    }
    TileGrid {
        width: grid_width,
        height: grid_height,
        tiles,
    }
}

/// One dilation round: every tile takes the min/max of its 3x3 neighborhood
pub fn dilate_tiles(grid: &TileGrid) -> TileGrid {
    let mut tiles = Vec::with_capacity(grid.tiles.len());
    for y in 0..grid.height {
        for x in 0..grid.width {
            let mut tile = TileCoc::EMPTY;
            for ny in y.saturating_sub(1)..(y + 2).min(grid.height) {
                for nx in x.saturating_sub(1)..(x + 2).min(grid.width) {
                    tile = tile.merge(grid.get(nx, ny));
                }
            }
            tiles.push(tile);
        }
    }
    TileGrid {
        width: grid.width,
        height: grid.height,
        tiles,
    }
}

#[derive(Clone)]
struct DofDownsampleData {
    color: ResourceId,
    depth: ResourceId,
    foreground: ResourceId,
    background: ResourceId,
    coc: ResourceId,
    target: RenderTargetId,
}

#[derive(Clone)]
struct DofMipmapData {
    foreground: ResourceId,
    background: ResourceId,
    coc: ResourceId,
    targets: Vec<RenderTargetId>,
}

#[derive(Clone)]
struct DofTilesData {
    input: ResourceId,
    output: ResourceId,
    target: RenderTargetId,
}

#[derive(Clone)]
struct DofBlurData {
    foreground: ResourceId,
    background: ResourceId,
    coc: ResourceId,
    tiles: ResourceId,
    output: ResourceId,
    alpha: ResourceId,
    target: RenderTargetId,
}

#[derive(Clone)]
struct DofMedianData {
    input: ResourceId,
    input_alpha: ResourceId,
    tiles: ResourceId,
    output: ResourceId,
    alpha: ResourceId,
    target: RenderTargetId,
}

#[derive(Clone)]
struct DofCombineData {
    color: ResourceId,
    dof: ResourceId,
    alpha: ResourceId,
    tiles: ResourceId,
    output: ResourceId,
    target: RenderTargetId,
}

impl PostProcessManager {
    /// Depth of field over `input`, using the full-resolution `depth`
    ///
    /// `depth` is also published as `"depth"`.
    pub fn dof(
        &self,
        graph: &mut ResourceGraph,
        input: ResourceId,
        depth: ResourceId,
        options: &DepthOfFieldOptions,
        translucent: bool,
        camera: &CameraInfo,
    ) -> ResourceId {
        let variant = PostProcessVariant::from_translucent(translucent);
        let format = if translucent {
            TextureFormat::Rgba16Float
        } else {
            TextureFormat::Rg11b10Float
        };
        let color_desc = graph.descriptor(input);
        let params = DofParameters::compute(camera, options, color_desc.width, color_desc.height);
        graph.blackboard_mut().put("depth", depth);

        // Downsample into near/far fields and the CoC buffer
        let material = Arc::clone(&self.dof_downsample);
        let downsample = graph.add_pass(
            "DoF Downsample",
            |builder| {
                let color = builder.sample(input);
                let depth = builder.sample(depth);
                let working = |format| {
                    TextureDescriptor::new_2d(params.width, params.height, format)
                        .with_levels(params.mip_count)
                };
                let foreground = builder.create_texture("dof foreground output", working(format));
                let background = builder.create_texture("dof background output", working(format));
                let coc =
                    builder.create_texture("dof CoC output", working(TextureFormat::Rg16Float));
                let foreground = builder.write(foreground);
                let background = builder.write(background);
                let coc = builder.write(coc);
                let target = builder.create_render_target(
                    "DoF Target",
                    RenderTargetDesc::new()
                        .with_color_at(0, foreground)
                        .with_color_at(1, background)
                        .with_color_at(2, coc),
                );
                DofDownsampleData {
                    color,
                    depth,
                    foreground,
                    background,
                    coc,
                    target,
                }
            },
            move |data, resources, driver| {
                let color = resources.texture(data.color);
                let depth = resources.texture(data.depth);
                material.configure(driver, |mi| {
                    mi.set_texture("color", color, SamplerParams::min(SamplerMinFilter::Nearest));
                    mi.set_texture("depth", depth, SamplerParams::min(SamplerMinFilter::Nearest));
                    mi.set_parameter("cocParams", params.coc_params);
                    mi.set_parameter(
                        "uvscale",
                        Vec4::new(
                            params.width as f32,
                            params.height as f32,
                            1.0 / color_desc.width as f32,
                            1.0 / color_desc.height as f32,
                        ),
                    );
                });
                let out = resources.render_target(data.target);
                draw_full_screen(driver, &out, &material.pipeline_state(variant));
                Ok(())
            },
        );

        // Mip chain of the three buffers
        let material = Arc::clone(&self.dof_mipmap);
        let mipmap = graph.add_pass(
            "DoF Mipmap",
            |builder| {
                let foreground = builder.sample(downsample.foreground);
                let background = builder.sample(downsample.background);
                let coc = builder.sample(downsample.coc);
                let foreground = builder.write(foreground);
                let background = builder.write(background);
                let coc = builder.write(coc);
                let targets = (1..params.mip_count)
                    .map(|level| {
                        builder.create_render_target(
                            "DoF Target",
                            RenderTargetDesc::new()
                                .with_color_at(0, Attachment::at_level(foreground, level))
                                .with_color_at(1, Attachment::at_level(background, level))
                                .with_color_at(2, Attachment::at_level(coc, level)),
                        )
                    })
                    .collect();
                DofMipmapData {
                    foreground,
                    background,
                    coc,
                    targets,
                }
            },
            move |data, resources, driver| {
                let foreground = resources.texture(data.foreground);
                let background = resources.texture(data.background);
                let coc = resources.texture(data.coc);
                let sampler = SamplerParams::min(SamplerMinFilter::NearestMipmapNearest);
                let pipeline = material.pipeline_state(variant);
                for (level, &target) in data.targets.iter().enumerate() {
                    material.configure(driver, |mi| {
                        mi.set_texture("foreground", foreground, sampler);
                        mi.set_texture("background", background, sampler);
                        mi.set_texture("cocFgBg", coc, sampler);
                        mi.set_parameter("mip", level as u32);
                        mi.set_parameter("weightScale", 0.5 / (1u32 << level) as f32);
                    });
                    draw_full_screen(driver, &resources.render_target(target), &pipeline);
                }
                Ok(())
            },
        );

        // Min/max CoC tiles, halving each round
        let mask = TILE_SIZE - 1;
        let tile_width = ((color_desc.width + mask) & !mask) / 4;
        let tile_height = ((color_desc.height + mask) & !mask) / 4;
        let mut tiles = mipmap.coc;
        for round in 0..TILE_REDUCTION_ROUNDS {
            tiles = self.dof_tiles_pass(graph, tiles, tile_width >> round, tile_height >> round);
        }

        // A CoC of MAX_COC_RADIUS spans this many tiles
        for _ in 0..DILATION_ROUNDS {
            tiles = self.dof_dilate_pass(graph, tiles);
        }
        let dilated = tiles;

        // Gather
        let material = Arc::clone(&self.dof);
        let blur = graph.add_pass(
            "DoF",
            |builder| {
                let foreground = builder.sample(mipmap.foreground);
                let background = builder.sample(mipmap.background);
                let coc = builder.sample(mipmap.coc);
                let tiles = builder.sample(dilated);
                // Not mipmapped, so no padding needed
                let out_width = (color_desc.width + 1) / 2;
                let out_height = (color_desc.height + 1) / 2;
                let out_format = builder.descriptor(foreground).format;
                let output = builder.create_texture(
                    "dof color output",
                    TextureDescriptor::new_2d(out_width, out_height, out_format),
                );
                let alpha = builder.create_texture(
                    "dof alpha output",
                    TextureDescriptor::new_2d(out_width, out_height, TextureFormat::R8Unorm),
                );
                let output = builder.write(output);
                let alpha = builder.write(alpha);
                let target = builder.create_render_target(
                    "DoF Target",
                    RenderTargetDesc::new()
                        .with_color_at(0, output)
                        .with_color_at(1, alpha),
                );
                DofBlurData {
                    foreground,
                    background,
                    coc,
                    tiles,
                    output,
                    alpha,
                    target,
                }
            },
            move |data, resources, driver| {
                let input_desc = resources.descriptor(data.coc);
                let output_desc = resources.descriptor(data.output);
                let tiles_desc = resources.descriptor(data.tiles);
                let half_tile = TILE_SIZE as f32 * 0.5;
                // Bilinear filtering causes artifacts around edges
                let nearest_mip = SamplerParams::min(SamplerMinFilter::NearestMipmapNearest);
                material.configure(driver, |mi| {
                    mi.set_texture("foreground", resources.texture(data.foreground), nearest_mip);
                    mi.set_texture("background", resources.texture(data.background), nearest_mip);
                    mi.set_texture("cocFgBg", resources.texture(data.coc), nearest_mip);
                    mi.set_texture(
                        "tiles",
                        resources.texture(data.tiles),
                        SamplerParams::min(SamplerMinFilter::Nearest),
                    );
                    mi.set_parameter(
                        "cocToTexelOffset",
                        Vec2::splat(0.5) / Vec2::new(input_desc.width as f32, input_desc.height as f32),
                    );
                    mi.set_parameter(
                        "uvscale",
                        Vec4::new(
                            output_desc.width as f32 / input_desc.width as f32,
                            output_desc.height as f32 / input_desc.height as f32,
                            output_desc.width as f32 / (half_tile * tiles_desc.width as f32),
                            output_desc.height as f32 / (half_tile * tiles_desc.height as f32),
                        ),
                    );
                    mi.set_parameter("bokehAngle", params.bokeh_angle);
                });
                let out = resources.render_target(data.target);
                draw_full_screen(driver, &out, &material.pipeline_state(variant));
                Ok(())
            },
        );

        // Median
        let material = Arc::clone(&self.dof_median);
        let median = graph.add_pass(
            "DoF Median",
            |builder| {
                let input = builder.sample(blur.output);
                let input_alpha = builder.sample(blur.alpha);
                let tiles = builder.sample(dilated);
                let output_desc = builder.descriptor(input);
                let alpha_desc = builder.descriptor(input_alpha);
                let output = builder.create_texture("dof color output", output_desc);
                let alpha = builder.create_texture("dof alpha output", alpha_desc);
                let output = builder.write(output);
                let alpha = builder.write(alpha);
                let target = builder.create_render_target(
                    "DoF Target",
                    RenderTargetDesc::new()
                        .with_color_at(0, output)
                        .with_color_at(1, alpha),
                );
                DofMedianData {
                    input,
                    input_alpha,
                    tiles,
                    output,
                    alpha,
                    target,
                }
            },
            move |data, resources, driver| {
                let output_desc = resources.descriptor(data.output);
                let tiles_desc = resources.descriptor(data.tiles);
                let half_tile = TILE_SIZE as f32 * 0.5;
                let nearest_mip = SamplerParams::min(SamplerMinFilter::NearestMipmapNearest);
                material.configure(driver, |mi| {
                    mi.set_texture("dof", resources.texture(data.input), nearest_mip);
                    mi.set_texture("alpha", resources.texture(data.input_alpha), nearest_mip);
                    mi.set_texture(
                        "tiles",
                        resources.texture(data.tiles),
                        SamplerParams::min(SamplerMinFilter::Nearest),
                    );
                    mi.set_parameter(
                        "uvscale",
                        Vec2::new(
                            output_desc.width as f32 / (half_tile * tiles_desc.width as f32),
                            output_desc.height as f32 / (half_tile * tiles_desc.height as f32),
                        ),
                    );
                });
                let out = resources.render_target(data.target);
                draw_full_screen(driver, &out, &material.pipeline_state(variant));
                Ok(())
            },
        );

        // Recombine at full resolution
        let material = Arc::clone(&self.dof_combine);
        let combine = graph.add_pass(
            "DoF combine",
            |builder| {
                let color = builder.sample(input);
                let dof = builder.sample(median.output);
                let alpha = builder.sample(median.alpha);
                let tiles = builder.sample(dilated);
                let output = builder.create_texture("dof output", color_desc);
                let output = builder.write(output);
                let target =
                    builder.create_render_target("DoF Target", RenderTargetDesc::new().with_color(output));
                DofCombineData {
                    color,
                    dof,
                    alpha,
                    tiles,
                    output,
                    target,
                }
            },
            move |data, resources, driver| {
                let dof_desc = resources.descriptor(data.dof);
                let tiles_desc = resources.descriptor(data.tiles);
                material.configure(driver, |mi| {
                    mi.set_texture(
                        "color",
                        resources.texture(data.color),
                        SamplerParams::min(SamplerMinFilter::Nearest),
                    );
                    mi.set_texture(
                        "dof",
                        resources.texture(data.dof),
                        SamplerParams::mag(SamplerMagFilter::Nearest),
                    );
                    mi.set_texture(
                        "alpha",
                        resources.texture(data.alpha),
                        SamplerParams::mag(SamplerMagFilter::Nearest),
                    );
                    mi.set_texture(
                        "tiles",
                        resources.texture(data.tiles),
                        SamplerParams::min(SamplerMinFilter::Nearest),
                    );
                    mi.set_parameter(
                        "uvscale",
                        Vec4::new(
                            color_desc.width as f32 / (dof_desc.width as f32 * 2.0),
                            color_desc.height as f32 / (dof_desc.height as f32 * 2.0),
                            color_desc.width as f32 / (tiles_desc.width * TILE_SIZE) as f32,
                            color_desc.height as f32 / (tiles_desc.height * TILE_SIZE) as f32,
                        ),
                    );
                });
                let out = resources.render_target(data.target);
                draw_full_screen(driver, &out, &material.pipeline_state(variant));
                Ok(())
            },
        );

        combine.output
    }

    fn dof_tiles_pass(
        &self,
        graph: &mut ResourceGraph,
        input: ResourceId,
        width: u32,
        height: u32,
    ) -> ResourceId {
        let material = Arc::clone(&self.dof_tiles);
        let data = graph.add_pass(
            "DoF Tiling",
            |builder| {
                let input = builder.sample(input);
                let output = builder.create_texture(
                    "dof tiles output",
                    TextureDescriptor::new_2d(width, height, TextureFormat::Rg16Float),
                );
                let output = builder.write(output);
                let target = builder
                    .create_render_target("DoF Tiles Target", RenderTargetDesc::new().with_color(output));
                DofTilesData {
                    input,
                    output,
                    target,
                }
            },
            move |data, resources, driver| {
                let input_desc = resources.descriptor(data.input);
                let output_desc = resources.descriptor(data.output);
                let coc = resources.texture(data.input);
                material.configure(driver, |mi| {
                    mi.set_texture("cocMaxMin", coc, SamplerParams::min(SamplerMinFilter::Nearest));
                    mi.set_parameter(
                        "uvscale",
                        Vec4::new(
                            output_desc.width as f32,
                            output_desc.height as f32,
                            1.0 / input_desc.width as f32,
                            1.0 / input_desc.height as f32,
                        ),
                    );
                });
                let out = resources.render_target(data.target);
                draw_full_screen(driver, &out, &material.default_pipeline_state());
                Ok(())
            },
        );
        data.output
    }

    fn dof_dilate_pass(&self, graph: &mut ResourceGraph, input: ResourceId) -> ResourceId {
        let material = Arc::clone(&self.dof_dilate);
        let data = graph.add_pass(
            "DoF Dilate",
            |builder| {
                let desc = builder.descriptor(input);
                let input = builder.sample(input);
                let output = builder.create_texture("dof dilated tiles output", desc);
                let output = builder.write(output);
                let target = builder.create_render_target(
                    "DoF Dilated Tiles Target",
                    RenderTargetDesc::new().with_color(output),
                );
                DofTilesData {
                    input,
                    output,
                    target,
                }
            },
            move |data, resources, driver| {
                let tiles = resources.texture(data.input);
                material.configure(driver, |mi| {
                    mi.set_texture("tiles", tiles, SamplerParams::min(SamplerMinFilter::Nearest));
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
    use super::*;

    /// Chebyshev distance in tiles
    fn distance(a: (usize, usize), b: (usize, usize)) -> usize {
        a.0.abs_diff(b.0).max(a.1.abs_diff(b.1))
    }

    fn single_source_grid() -> (TileGrid, (usize, usize)) {
        let tile = TILE_SIZE as usize;
        let size = 9 * tile;
        let mut coc = vec![0.0; size * size];
        // Bright near-field pixel in the middle of tile (4, 4)
        let center = 4 * tile + tile / 2;
        coc[center * size + center] = MAX_COC_RADIUS as f32;
        (reduce_tiles(&coc, size, size, tile), (4, 4))
    }

    #[test]
    fn test_dilation_round_count() {
        assert_eq!(DILATION_ROUNDS, 2);
        assert_eq!(TILE_REDUCTION_ROUNDS, 3);
    }

    #[test]
    fn test_reduce_tiles() {
        let (grid, source) = single_source_grid();
        assert_eq!((grid.width(), grid.height()), (9, 9));
        assert_eq!(grid.get(source.0, source.1).max, MAX_COC_RADIUS as f32);
        assert_eq!(grid.get(source.0, source.1).min, 0.0);
        assert_eq!(grid.get(0, 0).max, 0.0);
    }

    #[test]
    fn test_reduce_partial_tiles() {
        let coc: Vec<f32> = (0..20 * 3).map(|i| i as f32).collect();
        let grid = reduce_tiles(&coc, 20, 3, 16);
        assert_eq!((grid.width(), grid.height()), (2, 1));
        assert_eq!(grid.get(1, 0), TileCoc { min: 16.0, max: 59.0 });
    }

    #[test]
    fn test_dilation_reaches_two_tiles_and_no_farther() {
        let (mut grid, source) = single_source_grid();
        for _ in 0..DILATION_ROUNDS {
            grid = dilate_tiles(&grid);
        }
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                let expected = if distance((x, y), source) <= 2 {
                    MAX_COC_RADIUS as f32
                } else {
                    0.0
                };
                assert_eq!(grid.get(x, y).max, expected, "tile ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_single_dilation_is_not_enough() {
        let (grid, source) = single_source_grid();
        let grid = dilate_tiles(&grid);
        // The CoC covers pixels up to 32 away, i.e. tiles two away
        assert_eq!(grid.get(source.0 + 2, source.1).max, 0.0);
        assert_eq!(grid.get(source.0 + 1, source.1).max, MAX_COC_RADIUS as f32);
    }

    #[test]
    fn test_parameters() {
        let camera = CameraInfo::default().with_lens(0.01, 0.05);
        let options = DepthOfFieldOptions::default();
        let params = DofParameters::compute(&camera, &options, 1920, 1080);

        assert_eq!((params.width, params.height), (960, 544));
        assert_eq!(params.mip_count, 4);
        assert!((params.bokeh_angle - (PI / 6.0 + FRAC_PI_2)).abs() < 1e-6);

        let kc = (0.01 * 0.05) / (10.0 - 0.05);
        let ks = 1080.0 / SENSOR_SIZE;
        let expected = Vec2::new(ks * kc * 10.0 / camera.zn, ks * kc * (1.0 - 10.0 / camera.zn));
        assert!((params.coc_params - expected).length() < 1e-2);
    }

    #[test]
    fn test_bokeh_does_not_rotate_without_max_aperture() {
        let camera = CameraInfo::default();
        let options = DepthOfFieldOptions {
            max_aperture_diameter: 0.0,
            ..Default::default()
        };
        let params = DofParameters::compute(&camera, &options, 64, 64);
        assert_eq!(params.bokeh_angle, PI / 6.0);
        assert_eq!((params.width, params.height), (32, 32));
    }
}
