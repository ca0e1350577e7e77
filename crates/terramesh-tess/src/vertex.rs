//! Section vertex and coarse index building.

use bytemuck::{Pod, Zeroable};

use crate::patch::{Patch, PatchSampler};

/// A packed terrain vertex, 12 bytes.
///
/// `x`/`y` are tessellation-scaled local grid coordinates (section
/// configuration guarantees they fit a byte), `z` is the sampled quantized
/// height, `displacement` a cached per-vertex offset along the surface
/// normal, and the gradients are the height-lattice central differences the
/// renderer reconstructs normals from.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    pub x: u8,
    pub y: u8,
    pub z: u16,
    pub displacement: f32,
    pub gradient_x: i16,
    pub gradient_y: i16,
}

/// Source of patch control data and cached displacement samples.
///
/// The one seam between the pure mesh builders and the height-field owner:
/// `patch` gathers a quad's 4x4 control neighborhood, `displacement` looks up
/// the pre-baked per-vertex offset. Sub-coordinates passed to `displacement`
/// are in the terrain's maximum tessellation, independent of the tessellation
/// the buffer is being built at.
pub trait PatchSource {
    fn patch(&self, x: i32, y: i32) -> Patch;
    fn displacement(&self, x: i32, y: i32, sub_x: u32, sub_y: u32) -> f32;
}

/// Placement of a section within its terrain.
#[derive(Debug, Clone, Copy)]
pub struct SectionDims {
    pub base_x: i32,
    pub base_y: i32,
    pub size_x: u32,
    pub size_y: u32,
}

/// Number of vertices a section occupies at the given tessellation.
#[must_use]
pub fn vertex_count(size_x: u32, size_y: u32, tessellation: u32) -> usize {
    ((size_x * tessellation + 1) * (size_y * tessellation + 1)) as usize
}

/// Build the vertex buffer for a section at a uniform tessellation level.
///
/// Patches on the section's right/bottom edge emit only their `sub == 0`
/// step: the neighboring section owns (and emits) the rest, so sections tile
/// without duplicating interior vertices.
///
/// `terrain_max_level` is the terrain-wide maximum tessellation the
/// displacement cache was baked at; displacement lookups are rescaled into
/// that grid.
pub fn build_section_vertices<S: PatchSource>(
    dims: &SectionDims,
    tessellation: u32,
    terrain_max_level: u32,
    source: &S,
) -> Vec<TerrainVertex> {
    debug_assert!(tessellation >= 1 && tessellation <= terrain_max_level);
    debug_assert!(dims.size_x * tessellation <= 255 && dims.size_y * tessellation <= 255);

    let sampler = PatchSampler::new(tessellation);
    let mut vertices = Vec::with_capacity(vertex_count(dims.size_x, dims.size_y, tessellation));

    for y in 0..=dims.size_y {
        for x in 0..=dims.size_x {
            let patch = source.patch(dims.base_x + x as i32, dims.base_y + y as i32);

            let steps_y = if y < dims.size_y { tessellation } else { 1 };
            let steps_x = if x < dims.size_x { tessellation } else { 1 };

            for sub_y in 0..steps_y {
                for sub_x in 0..steps_x {
                    let height = sampler.sample(&patch, sub_x, sub_y).clamp(0.0, 65535.0);
                    let displacement = source.displacement(
                        dims.base_x + x as i32,
                        dims.base_y + y as i32,
                        sub_x * terrain_max_level / tessellation,
                        sub_y * terrain_max_level / tessellation,
                    );

                    vertices.push(TerrainVertex {
                        x: (x * tessellation + sub_x) as u8,
                        y: (y * tessellation + sub_y) as u8,
                        z: height as u16,
                        displacement,
                        gradient_x: clamp_i16(sampler.sample_deriv_x(&patch, sub_x, sub_y)),
                        gradient_y: clamp_i16(sampler.sample_deriv_y(&patch, sub_x, sub_y)),
                    });
                }
            }
        }
    }

    debug_assert_eq!(
        vertices.len(),
        vertex_count(dims.size_x, dims.size_y, tessellation)
    );
    vertices
}

/// Build the tessellation-1 index buffer for a section: two triangles per
/// quad with a fixed diagonal, `2 * size_x * size_y` triangles total.
#[must_use]
pub fn build_uniform_indices(size_x: u32, size_y: u32) -> Vec<u16> {
    let mut indices = Vec::with_capacity((2 * 3 * size_x * size_y) as usize);

    for y in 0..size_y {
        for x in 0..size_x {
            let v1 = (y * (size_x + 1) + x) as u16;
            let v2 = v1 + 1;
            let v3 = ((y + 1) * (size_x + 1) + x + 1) as u16;
            let v4 = v3 - 1;

            indices.extend([v1, v4, v3]);
            indices.extend([v3, v2, v1]);
        }
    }

    indices
}

fn clamp_i16(value: f32) -> i16 {
    value.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
