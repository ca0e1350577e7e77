//! The terrain object: configuration, owned data, and the frame entry point.

use glam::{Mat4, Vec3};
use terramesh_tess::{MAX_TESSELLATION, Patch, PatchSampler, PatchSource, TessError};

use crate::error::{Error, Result};
use crate::foliage::SectionLight;
use crate::heightfield::{HEIGHT_BIAS, HEIGHT_SCALE, HeightField};
use crate::layers::{DisplacementCache, Layer, WeightedMaterial, cache_weight_maps};
use crate::material::{
    MaterialMaskCache, MaterialRegistry, ParameterBindings, collect_parameter_bindings,
};
use crate::section::TerrainSection;
use crate::view::{Camera, SectionRenderData, SectionView, build_section_view};

/// Numeric tuning for a terrain instance.
///
/// Validated once at construction so the per-frame paths never discover a
/// bad configuration mid-build.
#[derive(Debug, Clone, Copy)]
pub struct TerrainConfig {
    pub num_patches_x: u32,
    pub num_patches_y: u32,
    /// Upper bound on any quad's tessellation level; power of two, at most
    /// 16.
    pub max_tessellation_level: u32,
    /// Multiplier applied to camera-space depth before level selection.
    pub tessellation_distance_scale: f32,
    /// Largest section edge, in quads.
    pub max_section_size: u32,
    pub local_to_world: Mat4,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            num_patches_x: 16,
            num_patches_y: 16,
            max_tessellation_level: MAX_TESSELLATION,
            tessellation_distance_scale: 1.0,
            max_section_size: 255 / MAX_TESSELLATION,
            local_to_world: Mat4::IDENTITY,
        }
    }
}

impl TerrainConfig {
    pub fn validate(&self) -> Result<()> {
        let level = self.max_tessellation_level;
        if !(1..=MAX_TESSELLATION).contains(&level) {
            return Err(Error::Tess(TessError::LevelOutOfRange { level }));
        }
        if !level.is_power_of_two() {
            return Err(Error::Tess(TessError::LevelNotPowerOfTwo { level }));
        }
        if self.num_patches_x == 0 || self.num_patches_y == 0 {
            return Err(Error::InvalidConfig {
                context: "terrain size",
                detail: format!(
                    "degenerate patch grid {}x{}",
                    self.num_patches_x, self.num_patches_y
                ),
            });
        }
        if self.max_section_size == 0 {
            return Err(Error::InvalidConfig {
                context: "section size",
                detail: "max_section_size must be at least 1".to_string(),
            });
        }
        if self.max_section_size * level > 255 {
            return Err(Error::Tess(TessError::SectionTooLarge {
                size: self.max_section_size,
                max_level: level,
            }));
        }
        if self.tessellation_distance_scale <= 0.0 {
            return Err(Error::InvalidConfig {
                context: "distance scale",
                detail: format!("{} is not positive", self.tessellation_distance_scale),
            });
        }
        Ok(())
    }
}

/// Read-only view of the terrain data the mesh builders sample from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TerrainGeometry<'a> {
    pub height_field: &'a HeightField,
    pub displacements: &'a DisplacementCache,
    /// The shared full-rate sampler used for collision vertices.
    pub sampler: &'a PatchSampler,
    /// The terrain's configured maximum tessellation level.
    pub max_level: u32,
}

impl TerrainGeometry<'_> {
    pub fn patch(&self, x: i32, y: i32) -> Patch {
        self.height_field.patch(x, y)
    }

    /// The displaced surface position for sub-step `(sub_x, sub_y)` of the
    /// quad at `(x, y)`, in local space: bicubic height plus the cached
    /// displacement pushed along the gradient normal.
    pub fn collision_vertex(&self, patch: &Patch, x: i32, y: i32, sub_x: u32, sub_y: u32) -> Vec3 {
        let frac_x = sub_x as f32 / self.max_level as f32;
        let frac_y = sub_y as f32 / self.max_level as f32;
        let full_x = sub_x * MAX_TESSELLATION / self.max_level;
        let full_y = sub_y * MAX_TESSELLATION / self.max_level;

        let gradient_x = self.sampler.sample_deriv_x(patch, full_x, full_y) * HEIGHT_SCALE;
        let gradient_y = self.sampler.sample_deriv_y(patch, full_x, full_y) * HEIGHT_SCALE;
        let normal = Vec3::new(1.0, 0.0, gradient_x)
            .cross(Vec3::new(0.0, 1.0, gradient_y))
            .normalize();
        let displacement = self.displacements.get(x, y, sub_x, sub_y);

        let height = (self.sampler.sample(patch, full_x, full_y) - HEIGHT_BIAS) * HEIGHT_SCALE;
        Vec3::new(x as f32 + frac_x, y as f32 + frac_y, height) + normal * displacement
    }
}

impl PatchSource for TerrainGeometry<'_> {
    fn patch(&self, x: i32, y: i32) -> Patch {
        self.height_field.patch(x, y)
    }

    fn displacement(&self, x: i32, y: i32, sub_x: u32, sub_y: u32) -> f32 {
        self.displacements.get(x, y, sub_x, sub_y)
    }
}

/// An adaptive-tessellation terrain: the height field and layer stack it is
/// authored from, the caches derived from them, and the sections it renders
/// through.
#[derive(Debug)]
pub struct Terrain {
    config: TerrainConfig,
    height_field: HeightField,
    layers: Vec<Layer>,
    registry: MaterialRegistry,
    weighted_materials: Vec<WeightedMaterial>,
    displacements: DisplacementCache,
    material_cache: MaterialMaskCache,
    sections: Vec<TerrainSection>,
    render_data: Vec<SectionRenderData>,
    parameters: Option<ParameterBindings>,
    collision_sampler: PatchSampler,
}

impl Terrain {
    /// Create a flat terrain from a validated configuration.
    pub fn new(config: TerrainConfig, registry: MaterialRegistry) -> Result<Self> {
        config.validate()?;

        let mut terrain = Self {
            height_field: HeightField::new(config.num_patches_x, config.num_patches_y),
            config,
            layers: Vec::new(),
            registry,
            weighted_materials: Vec::new(),
            displacements: DisplacementCache::empty(),
            material_cache: MaterialMaskCache::new(),
            sections: Vec::new(),
            render_data: Vec::new(),
            parameters: None,
            collision_sampler: PatchSampler::new(MAX_TESSELLATION),
        };
        terrain.allocate_sections()?;
        terrain.rebuild_render_data();
        Ok(terrain)
    }

    /// Tile the patch grid into sections of at most `max_section_size` quads
    /// per edge.
    fn allocate_sections(&mut self) -> Result<()> {
        let step = self.config.max_section_size;
        let sections_x = self.config.num_patches_x.div_ceil(step);
        let sections_y = self.config.num_patches_y.div_ceil(step);

        self.sections = Vec::with_capacity((sections_x * sections_y) as usize);
        for section_y in 0..sections_y {
            for section_x in 0..sections_x {
                let base_x = section_x * step;
                let base_y = section_y * step;
                self.sections.push(TerrainSection::new(
                    base_x as i32,
                    base_y as i32,
                    (self.config.num_patches_x - base_x).min(step),
                    (self.config.num_patches_y - base_y).min(step),
                    self.config.max_tessellation_level,
                )?);
            }
        }
        Ok(())
    }

    /// Re-derive everything that depends on the height field, the layer
    /// stack, or the material registry: weight maps, displacements, section
    /// batches and bounds, static buffers. Cached compiled materials and
    /// per-section buffers are invalidated.
    ///
    /// Editing tools call this after mutating terrain data between frames.
    pub fn rebuild_render_data(&mut self) {
        self.weighted_materials =
            cache_weight_maps(&self.height_field, &self.layers, self.config.local_to_world);
        self.displacements = DisplacementCache::bake(
            &self.height_field,
            &self.registry.materials,
            &self.weighted_materials,
            self.config.max_tessellation_level,
        );
        self.material_cache.invalidate();
        self.parameters = None;

        let geometry = TerrainGeometry {
            height_field: &self.height_field,
            displacements: &self.displacements,
            sampler: &self.collision_sampler,
            max_level: self.config.max_tessellation_level,
        };

        self.render_data.clear();
        for section in &mut self.sections {
            section.rebuild_batches(&self.weighted_materials);
            section.rebuild_patch_bounds(&geometry);
            self.render_data.push(SectionRenderData::new(section, &geometry));
        }

        tracing::info!(
            sections = self.sections.len(),
            weighted_materials = self.weighted_materials.len(),
            "rebuilt terrain render data"
        );
    }

    /// Build this frame's draw batches for every section.
    ///
    /// Pure CPU work, synchronous, no suspension: cached buffers are reused
    /// unless the camera moved a section across a tessellation threshold.
    pub fn build_view(
        &mut self,
        camera: &Camera,
        lights: &[SectionLight],
    ) -> Result<Vec<SectionView>> {
        let geometry = TerrainGeometry {
            height_field: &self.height_field,
            displacements: &self.displacements,
            sampler: &self.collision_sampler,
            max_level: self.config.max_tessellation_level,
        };

        let mut views = Vec::with_capacity(self.sections.len());
        for (index, (section, data)) in self
            .sections
            .iter()
            .zip(self.render_data.iter_mut())
            .enumerate()
        {
            views.push(build_section_view(
                index,
                section,
                data,
                &geometry,
                &self.config,
                &self.registry,
                &self.weighted_materials,
                &mut self.material_cache,
                camera,
                lights,
            )?);
        }
        Ok(views)
    }

    /// The displaced surface position of a sub-step vertex, in local space.
    #[must_use]
    pub fn collision_vertex(&self, x: i32, y: i32, sub_x: u32, sub_y: u32) -> Vec3 {
        let geometry = TerrainGeometry {
            height_field: &self.height_field,
            displacements: &self.displacements,
            sampler: &self.collision_sampler,
            max_level: self.config.max_tessellation_level,
        };
        let patch = geometry.patch(x, y);
        geometry.collision_vertex(&patch, x, y, sub_x, sub_y)
    }

    /// Parameter bindings for every weighted material, collected lazily and
    /// reset by [`Terrain::rebuild_render_data`].
    pub fn parameter_bindings(&mut self) -> &ParameterBindings {
        self.parameters
            .get_or_insert_with(|| {
                collect_parameter_bindings(&self.registry, &self.weighted_materials)
            })
    }

    #[must_use]
    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    #[must_use]
    pub fn height_field(&self) -> &HeightField {
        &self.height_field
    }

    /// Mutable height-field access for editing tools. Call
    /// [`Terrain::rebuild_render_data`] afterwards.
    pub fn height_field_mut(&mut self) -> &mut HeightField {
        &mut self.height_field
    }

    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Mutable layer access for editing tools. Call
    /// [`Terrain::rebuild_render_data`] afterwards.
    pub fn layers_mut(&mut self) -> &mut Vec<Layer> {
        &mut self.layers
    }

    #[must_use]
    pub fn registry(&self) -> &MaterialRegistry {
        &self.registry
    }

    /// Mutable registry access for editing tools. Call
    /// [`Terrain::rebuild_render_data`] afterwards.
    pub fn registry_mut(&mut self) -> &mut MaterialRegistry {
        &mut self.registry
    }

    #[must_use]
    pub fn sections(&self) -> &[TerrainSection] {
        &self.sections
    }

    #[must_use]
    pub fn render_data(&self) -> &[SectionRenderData] {
        &self.render_data
    }

    #[must_use]
    pub fn weighted_materials(&self) -> &[WeightedMaterial] {
        &self.weighted_materials
    }

    #[must_use]
    pub fn material_cache(&self) -> &MaterialMaskCache {
        &self.material_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{FilteredMaterial, TerrainMaterial};
    use crate::material::MaterialGraph;
    use crate::view::VertexBufferKind;
    use terramesh_tess::vertex_count;

    fn test_registry() -> MaterialRegistry {
        let mut registry = MaterialRegistry::new(MaterialGraph::flat_color(0.2, 0.2, 0.2));
        registry.materials.push(TerrainMaterial::new(
            "grass",
            MaterialGraph::flat_color(0.1, 0.6, 0.1),
        ));
        registry
    }

    fn test_terrain() -> Terrain {
        let config = TerrainConfig {
            num_patches_x: 4,
            num_patches_y: 4,
            max_tessellation_level: 4,
            tessellation_distance_scale: 1.0,
            max_section_size: 4,
            local_to_world: Mat4::IDENTITY,
        };
        let mut terrain = Terrain::new(config, test_registry()).unwrap();
        terrain
            .layers_mut()
            .push(Layer::new("base", vec![FilteredMaterial::covering(0)]));
        terrain.rebuild_render_data();
        terrain
    }

    fn near_camera() -> Camera {
        Camera {
            view: Mat4::look_at_rh(Vec3::new(2.0, 2.0, 10.0), Vec3::new(2.0, 2.0, 0.0), Vec3::Y),
            projection: Mat4::perspective_rh(1.0, 1.0, 0.1, 100_000.0),
        }
    }

    fn far_camera() -> Camera {
        Camera {
            view: Mat4::look_at_rh(
                Vec3::new(2.0, 2.0, 50_000.0),
                Vec3::new(2.0, 2.0, 0.0),
                Vec3::Y,
            ),
            projection: Mat4::perspective_rh(1.0, 1.0, 0.1, 100_000.0),
        }
    }

    #[test]
    fn test_config_validation() {
        let mut config = TerrainConfig::default();
        assert!(config.validate().is_ok());

        config.max_tessellation_level = 3;
        assert!(matches!(
            config.validate(),
            Err(Error::Tess(TessError::LevelNotPowerOfTwo { level: 3 }))
        ));

        config.max_tessellation_level = 32;
        assert!(matches!(
            config.validate(),
            Err(Error::Tess(TessError::LevelOutOfRange { level: 32 }))
        ));

        config.max_tessellation_level = 16;
        config.max_section_size = 16;
        assert!(matches!(
            config.validate(),
            Err(Error::Tess(TessError::SectionTooLarge { .. }))
        ));

        config.max_section_size = 15;
        config.tessellation_distance_scale = 0.0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_section_tiling_covers_patch_grid() {
        let config = TerrainConfig {
            num_patches_x: 10,
            num_patches_y: 7,
            max_tessellation_level: 4,
            max_section_size: 4,
            ..TerrainConfig::default()
        };
        let terrain = Terrain::new(config, test_registry()).unwrap();

        let sections = terrain.sections();
        assert_eq!(sections.len(), 3 * 2);
        let covered: u32 = sections.iter().map(|s| s.size_x * s.size_y).sum();
        assert_eq!(covered, 70);
        // Remainder tiles shrink instead of spilling.
        assert!(sections.iter().all(|s| s.size_x <= 4 && s.size_y <= 4));
    }

    #[test]
    fn test_far_view_uses_static_buffers() {
        let mut terrain = test_terrain();
        let views = terrain.build_view(&far_camera(), &[]).unwrap();

        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.tessellation, 1);
        assert_eq!(view.buffer, VertexBufferKind::Static);
        assert_eq!(view.batches.len(), 1);
        assert_eq!(view.batches[0].num_triangles, 4 * 4 * 2);
        assert_eq!(
            view.batches[0].indices.len(),
            view.batches[0].num_triangles * 3
        );
        assert!(terrain.render_data()[0].smooth_tessellation().is_none());
    }

    #[test]
    fn test_near_view_builds_smooth_buffer() {
        let mut terrain = test_terrain();
        let views = terrain.build_view(&near_camera(), &[]).unwrap();

        let view = &views[0];
        assert_eq!(view.tessellation, 4);
        assert_eq!(view.buffer, VertexBufferKind::Smooth);
        assert_eq!(terrain.render_data()[0].smooth_tessellation(), Some(4));

        let vertices = terrain.render_data()[0].vertices(VertexBufferKind::Smooth);
        assert_eq!(vertices.len(), vertex_count(4, 4, 4));

        // One covering material means one mask and one batch covering every
        // quad at full tessellation.
        assert_eq!(view.batches.len(), 1);
        assert_eq!(view.batches[0].num_triangles, 16 * 2 * 4 * 4);
        assert!(
            view.batches[0]
                .indices
                .iter()
                .all(|&i| (i as usize) < vertices.len())
        );
    }

    #[test]
    fn test_smooth_buffer_reused_across_frames() {
        let mut terrain = test_terrain();
        terrain.build_view(&near_camera(), &[]).unwrap();
        let first: Vec<_> = terrain.render_data()[0]
            .vertices(VertexBufferKind::Smooth)
            .to_vec();

        // Same camera, same tessellation: the buffer must not be rebuilt
        // differently (and the cache key must still match).
        terrain.build_view(&near_camera(), &[]).unwrap();
        assert_eq!(terrain.render_data()[0].smooth_tessellation(), Some(4));
        assert_eq!(
            terrain.render_data()[0].vertices(VertexBufferKind::Smooth),
            first.as_slice()
        );

        // Moving far drops the smooth buffer entirely.
        terrain.build_view(&far_camera(), &[]).unwrap();
        assert!(terrain.render_data()[0].smooth_tessellation().is_none());
    }

    #[test]
    fn test_rebuild_invalidates_material_cache() {
        let mut terrain = test_terrain();
        terrain.build_view(&near_camera(), &[]).unwrap();
        assert!(!terrain.material_cache().is_empty());

        terrain.rebuild_render_data();
        assert!(terrain.material_cache().is_empty());

        // The next frame re-interns the masks it needs.
        terrain.build_view(&near_camera(), &[]).unwrap();
        assert!(!terrain.material_cache().is_empty());
    }

    #[test]
    fn test_mask_handles_stable_across_frames() {
        let mut terrain = test_terrain();
        let first = terrain.build_view(&near_camera(), &[]).unwrap();
        let second = terrain.build_view(&far_camera(), &[]).unwrap();

        // Both frames batch the same single mask, so they resolve to the
        // same cached material (and the same persistent id).
        let a = first[0].batches[0].material;
        let b = second[0].batches[0].material;
        assert_eq!(a, b);
        assert_eq!(terrain.material_cache().len(), 1);
    }

    #[test]
    fn test_orthographic_view_pins_tessellation() {
        let mut terrain = test_terrain();
        let camera = Camera {
            view: Mat4::look_at_rh(Vec3::new(2.0, 2.0, 10.0), Vec3::new(2.0, 2.0, 0.0), Vec3::Y),
            projection: Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 0.1, 100.0),
        };
        let views = terrain.build_view(&camera, &[]).unwrap();
        assert_eq!(views[0].tessellation, 1);
        assert!(views[0].foliage.is_empty());
    }

    #[test]
    fn test_collision_vertex_flat_terrain() {
        let terrain = test_terrain();
        let vertex = terrain.collision_vertex(1, 2, 2, 0);
        assert!((vertex.x - 1.5).abs() < 1e-5);
        assert!((vertex.y - 2.0).abs() < 1e-5);
        assert!(vertex.z.abs() < 1e-4);
    }

    #[test]
    fn test_parameter_bindings_memoized_and_reset() {
        let mut terrain = test_terrain();
        assert!(terrain.parameter_bindings().scalars.is_empty());

        terrain.registry_mut().materials[0]
            .scalar_params
            .push(("tint".to_string(), 0.5));

        // The memoized collection survives until the rebuild...
        assert!(terrain.parameter_bindings().scalars.is_empty());

        // ...which re-collects it against the changed registry.
        terrain.rebuild_render_data();
        assert_eq!(
            terrain.parameter_bindings().scalars,
            vec![("grass_tint".to_string(), 0.5)]
        );
    }
}
