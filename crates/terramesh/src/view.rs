//! Per-frame view assembly: LOD selection, buffer caching, draw batches.
//!
//! Each visible section resolves to a list of draw batches: a vertex buffer
//! kind, an index stream with its draw ranges, the compiled-material handle
//! for the batch's mask, and a triangle count. Distant sections reuse their
//! static tessellation-1 buffers; near sections build (and cache) a smooth
//! buffer at the tessellation the camera demands.

use glam::{Mat4, Vec3};
use terramesh_tess::{
    SmoothIndexBuilder, TerrainVertex, TessellationLevels, build_section_vertices,
    build_uniform_indices, level_for_depth,
};

use crate::error::Result;
use crate::foliage::{FoliageBatch, FoliageInstanceCache, SectionLight};
use crate::layers::WeightedMaterial;
use crate::material::{MaterialHandle, MaterialMaskCache, MaterialRegistry};
use crate::section::TerrainSection;
use crate::terrain::{TerrainConfig, TerrainGeometry};

/// Largest triangle count a single draw range covers; batches beyond it are
/// split into several ranges over the same index stream, never truncated.
pub const MAX_DRAW_TRIANGLES: usize = u16::MAX as usize / 3;

/// The camera state the per-frame build consumes.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    /// World-to-camera transform.
    pub view: Mat4,
    /// Camera-to-clip transform.
    pub projection: Mat4,
}

impl Camera {
    /// Orthographic projections pin terrain to tessellation 1 and disable
    /// foliage.
    #[must_use]
    pub fn is_perspective(&self) -> bool {
        self.projection.w_axis.w < 1.0
    }

    /// The camera position in world space.
    #[must_use]
    pub fn view_origin(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }
}

/// Which of a section's vertex buffers a batch draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexBufferKind {
    /// The cached tessellation-1 buffer.
    Static,
    /// The per-frame smooth buffer.
    Smooth,
}

/// A contiguous run of triangles within a batch's index stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRange {
    pub first_triangle: usize,
    pub num_triangles: usize,
}

/// One draw call's worth of terrain: an index stream over the section's
/// vertex buffer, the ranges to submit it in, and the material to bind.
#[derive(Debug, Clone)]
pub struct DrawBatch {
    pub material: MaterialHandle,
    pub indices: Vec<u16>,
    pub ranges: Vec<DrawRange>,
    pub num_triangles: usize,
}

/// Everything a renderer needs to draw one section this frame.
#[derive(Debug, Clone)]
pub struct SectionView {
    pub section_index: usize,
    /// The tessellation level the section renders at this frame.
    pub tessellation: u32,
    pub buffer: VertexBufferKind,
    pub batches: Vec<DrawBatch>,
    pub foliage: Vec<FoliageBatch>,
}

/// The smooth vertex buffer cached for one section, keyed by the
/// tessellation it was built at.
#[derive(Debug, Clone)]
pub struct SmoothBuffer {
    pub tessellation: u32,
    pub vertices: Vec<TerrainVertex>,
}

/// Per-section GPU-side data that persists across frames: the static
/// buffers, the smooth-buffer cache of size one, and foliage instance
/// caches.
#[derive(Debug, Clone)]
pub struct SectionRenderData {
    static_vertices: Vec<TerrainVertex>,
    static_indices: Vec<u16>,
    smooth: Option<SmoothBuffer>,
    pub(crate) foliage_caches: Vec<FoliageInstanceCache>,
}

impl SectionRenderData {
    pub(crate) fn new(section: &TerrainSection, geometry: &TerrainGeometry<'_>) -> Self {
        Self {
            static_vertices: build_section_vertices(
                &section.dims(),
                1,
                geometry.max_level,
                geometry,
            ),
            static_indices: build_uniform_indices(section.size_x, section.size_y),
            smooth: None,
            foliage_caches: Vec::new(),
        }
    }

    /// The vertex data batches of the given kind index into. The smooth
    /// slice is empty when no smooth buffer is cached.
    #[must_use]
    pub fn vertices(&self, kind: VertexBufferKind) -> &[TerrainVertex] {
        match (kind, &self.smooth) {
            (VertexBufferKind::Static, _) => &self.static_vertices,
            (VertexBufferKind::Smooth, Some(smooth)) => &smooth.vertices,
            (VertexBufferKind::Smooth, None) => &[],
        }
    }

    /// The tessellation of the cached smooth buffer, if one is held.
    #[must_use]
    pub fn smooth_tessellation(&self) -> Option<u32> {
        self.smooth.as_ref().map(|smooth| smooth.tessellation)
    }

    /// Drop cached buffers; the editing-tool collaborator calls this through
    /// the terrain after mutating geometry or materials.
    pub fn invalidate(&mut self) {
        self.smooth = None;
        self.foliage_caches.clear();
    }
}

/// Split a triangle count into per-draw ranges.
fn draw_ranges(num_triangles: usize) -> Vec<DrawRange> {
    let mut ranges = Vec::with_capacity(num_triangles.div_ceil(MAX_DRAW_TRIANGLES));
    let mut first_triangle = 0;
    while first_triangle < num_triangles {
        let num = (num_triangles - first_triangle).min(MAX_DRAW_TRIANGLES);
        ranges.push(DrawRange {
            first_triangle,
            num_triangles: num,
        });
        first_triangle += num;
    }
    ranges
}

/// The tessellation level the section's closest bounding-box corner demands.
fn section_max_level(section: &TerrainSection, config: &TerrainConfig, camera: &Camera) -> u32 {
    if !camera.is_perspective() {
        return 1;
    }

    let (min_height, max_height) = section.height_bounds();
    let margin = section.max_displacement();
    let lo = Vec3::new(
        section.base_x as f32 - margin,
        section.base_y as f32 - margin,
        min_height,
    );
    let hi = Vec3::new(
        (section.base_x + section.size_x as i32) as f32 + margin,
        (section.base_y + section.size_y as i32) as f32 + margin,
        max_height,
    );

    let to_view = camera.view * config.local_to_world;
    let mut max_level = 1;
    for corner in 0..8 {
        let position = Vec3::new(
            if corner & 1 == 0 { lo.x } else { hi.x },
            if corner & 2 == 0 { lo.y } else { hi.y },
            if corner & 4 == 0 { lo.z } else { hi.z },
        );
        let depth = to_view.transform_point3(position).z * config.tessellation_distance_scale;
        max_level =
            max_level.max(level_for_depth(depth).min(config.max_tessellation_level));
    }
    max_level
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn build_section_view(
    section_index: usize,
    section: &TerrainSection,
    data: &mut SectionRenderData,
    geometry: &TerrainGeometry<'_>,
    config: &TerrainConfig,
    registry: &MaterialRegistry,
    weighted: &[WeightedMaterial],
    material_cache: &mut MaterialMaskCache,
    camera: &Camera,
    lights: &[SectionLight],
) -> Result<SectionView> {
    let foliage = build_foliage(
        section, data, geometry, config, registry, weighted, camera, lights,
    );

    let max_level = section_max_level(section, config, camera);

    if max_level == 1 {
        data.smooth = None;

        let mask = &section.batch_masks[section.full_batch as usize];
        let num_triangles = (section.size_x * section.size_y * 2) as usize;
        return Ok(SectionView {
            section_index,
            tessellation: 1,
            buffer: VertexBufferKind::Static,
            batches: vec![DrawBatch {
                material: material_cache.get_or_create(mask),
                indices: data.static_indices.clone(),
                ranges: draw_ranges(num_triangles),
                num_triangles,
            }],
            foliage,
        });
    }

    // Rebuild the smooth buffer only when the required tessellation changed
    // since the last frame.
    if !data
        .smooth
        .as_ref()
        .is_some_and(|smooth| smooth.tessellation == max_level)
    {
        tracing::debug!(
            section = section_index,
            tessellation = max_level,
            "rebuilding smooth vertex buffer"
        );
        data.smooth = Some(SmoothBuffer {
            tessellation: max_level,
            vertices: build_section_vertices(&section.dims(), max_level, config.max_tessellation_level, geometry),
        });
    }

    // Per-quad levels with the one-quad halo; quads outside the height field
    // default to the configured maximum (solid boundary).
    let num_vertices_x = geometry.height_field.num_vertices_x() as i32;
    let num_vertices_y = geometry.height_field.num_vertices_y() as i32;
    let to_view = camera.view
        * config.local_to_world
        * Mat4::from_translation(Vec3::new(section.base_x as f32, section.base_y as f32, 0.0));
    let levels = TessellationLevels::from_fn(section.size_x, section.size_y, |x, y| {
        let global_x = section.base_x + x;
        let global_y = section.base_y + y;
        if global_x < 0 || global_y < 0 || global_x >= num_vertices_x || global_y >= num_vertices_y {
            return config.max_tessellation_level;
        }
        let local = Vec3::new(
            x as f32,
            y as f32,
            geometry.height_field.local_height(global_x, global_y),
        );
        let depth = to_view.transform_point3(local).z * config.tessellation_distance_scale;
        level_for_depth(depth).min(config.max_tessellation_level)
    })?;

    let mut batches = Vec::new();
    for (batch_index, mask) in section.batch_masks.iter().enumerate() {
        let builder = SmoothIndexBuilder::new(
            section.size_x,
            section.size_y,
            max_level,
            &levels,
            &section.patch_batches,
            batch_index as u32,
        );
        let num_triangles = builder.count_triangles();
        if num_triangles == 0 {
            continue;
        }

        batches.push(DrawBatch {
            material: material_cache.get_or_create(mask),
            indices: builder.build(),
            ranges: draw_ranges(num_triangles),
            num_triangles,
        });
    }

    Ok(SectionView {
        section_index,
        tessellation: max_level,
        buffer: VertexBufferKind::Smooth,
        batches,
        foliage,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_foliage(
    section: &TerrainSection,
    data: &mut SectionRenderData,
    geometry: &TerrainGeometry<'_>,
    config: &TerrainConfig,
    registry: &MaterialRegistry,
    weighted: &[WeightedMaterial],
    camera: &Camera,
    lights: &[SectionLight],
) -> Vec<FoliageBatch> {
    if !camera.is_perspective() {
        return Vec::new();
    }

    let view_origin = camera.view_origin();

    // Distance from the camera to the section's bounding sphere.
    let (min_height, max_height) = section.height_bounds();
    let lo = Vec3::new(section.base_x as f32, section.base_y as f32, min_height);
    let hi = Vec3::new(
        (section.base_x + section.size_x as i32) as f32,
        (section.base_y + section.size_y as i32) as f32,
        max_height,
    );
    let center = config.local_to_world.transform_point3((lo + hi) * 0.5);
    let radius = config.local_to_world.transform_vector3(hi - lo).length() * 0.5;
    let distance = (center - view_origin).length() - radius;

    // Drop instance caches for meshes that fell out of draw range.
    data.foliage_caches.retain(|cache| {
        let material = &registry.materials[weighted[cache.weighted_index].material];
        distance < material.foliage_meshes[cache.mesh_index].max_draw_radius
    });

    let mut batches = Vec::new();
    for (weighted_index, weighted_material) in weighted.iter().enumerate() {
        let material = &registry.materials[weighted_material.material];
        for (mesh_index, mesh) in material.foliage_meshes.iter().enumerate() {
            if distance >= mesh.max_draw_radius {
                continue;
            }

            let cached = data
                .foliage_caches
                .iter()
                .any(|cache| cache.weighted_index == weighted_index && cache.mesh_index == mesh_index);
            if !cached {
                data.foliage_caches.push(FoliageInstanceCache::build(
                    weighted_index,
                    mesh_index,
                    section,
                    geometry,
                    config.local_to_world,
                    weighted_material,
                    mesh,
                    lights,
                ));
            }

            if let Some(cache) = data
                .foliage_caches
                .iter()
                .find(|cache| cache.weighted_index == weighted_index && cache.mesh_index == mesh_index)
            {
                batches.push(FoliageBatch::from_cache(cache, mesh, view_origin));
            }
        }
    }

    batches
}
