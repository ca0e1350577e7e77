//! Stochastic foliage placement with baked static lighting.
//!
//! Instances are scattered per quad with a seed derived from the quad's
//! global coordinates, so placement is stable across frames and reloads.
//! Candidates are rejected against the owning material's bilinear weight, so
//! foliage density follows the painted blend. Lighting is accumulated once at
//! placement time from the section's lights and baked into each instance.

use glam::{Mat4, Vec2, Vec3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::layers::WeightedMaterial;
use crate::section::TerrainSection;
use crate::terrain::TerrainGeometry;

/// Placement configuration for one foliage mesh on a terrain material.
#[derive(Debug, Clone)]
pub struct FoliageMesh {
    /// Base seed; combined with quad coordinates for stable placement.
    pub seed: u32,
    /// Placement candidates per quad.
    pub density: u32,
    pub min_scale: f32,
    pub max_scale: f32,
    /// Instances beyond this distance from the view are not drawn.
    pub max_draw_radius: f32,
    /// Distance at which instances start scaling down toward the draw edge.
    pub min_transition_radius: f32,
    /// Vertex sway amplitude per unit of mesh height.
    pub sway_scale: f32,
    /// Whether the mesh samples the terrain's static lighting.
    pub static_lighting: bool,
}

impl FoliageMesh {
    #[must_use]
    pub fn new(seed: u32, density: u32, max_draw_radius: f32) -> Self {
        Self {
            seed,
            density,
            min_scale: 1.0,
            max_scale: 1.0,
            max_draw_radius,
            min_transition_radius: max_draw_radius * 0.5,
            sway_scale: 0.0,
            static_lighting: true,
        }
    }
}

/// One placed foliage instance.
#[derive(Debug, Clone, PartialEq)]
pub struct FoliageInstance {
    /// World-space position on the terrain surface.
    pub location: Vec3,
    /// Per-axis scale factors, quantized to bytes.
    pub scale: [u8; 3],
    /// Yaw, quantized to a byte of a full turn.
    pub yaw: u8,
    /// Baked light contribution.
    pub lighting: Vec3,
    /// Normalized position within the section, for shadow-map lookups.
    pub light_map_coord: Vec2,
}

/// A light contributing to baked foliage lighting.
#[derive(Debug, Clone)]
pub struct SectionLight {
    pub color: Vec3,
    pub brightness: f32,
    pub kind: LightKind,
    /// Static occlusion over the section, if baked.
    pub shadow: Option<ShadowMap>,
}

#[derive(Debug, Clone, Copy)]
pub enum LightKind {
    Directional,
    Point { origin: Vec3, radius: f32 },
}

/// A baked occlusion grid over a section, one byte per texel.
#[derive(Debug, Clone)]
pub struct ShadowMap {
    size_x: u32,
    size_y: u32,
    data: Vec<u8>,
}

impl ShadowMap {
    #[must_use]
    pub fn new(size_x: u32, size_y: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (size_x * size_y) as usize);
        Self {
            size_x,
            size_y,
            data,
        }
    }

    #[must_use]
    pub fn size_x(&self) -> u32 {
        self.size_x
    }

    #[must_use]
    pub fn size_y(&self) -> u32 {
        self.size_y
    }

    fn shadow(&self, x: i32, y: i32) -> f32 {
        let x = x.clamp(0, self.size_x as i32 - 1) as u32;
        let y = y.clamp(0, self.size_y as i32 - 1) as u32;
        f32::from(self.data[(y * self.size_x + x) as usize]) / 255.0
    }

    /// Bilinearly filtered occlusion in `0..=1`.
    #[must_use]
    pub fn filtered_shadow(&self, int_x: i32, frac_x: f32, int_y: i32, frac_y: f32) -> f32 {
        let s00 = self.shadow(int_x, int_y);
        let s10 = self.shadow(int_x + 1, int_y);
        let s01 = self.shadow(int_x, int_y + 1);
        let s11 = self.shadow(int_x + 1, int_y + 1);
        let top = s00 + (s10 - s00) * frac_x;
        let bottom = s01 + (s11 - s01) * frac_x;
        top + (bottom - top) * frac_y
    }
}

/// Interpolate between four adjacent surface vertices, honoring the quad's
/// fixed triangulation diagonal.
#[must_use]
pub fn quad_lerp(p00: Vec3, p10: Vec3, p01: Vec3, p11: Vec3, u: f32, v: f32) -> Vec3 {
    if u > v {
        if v < 1.0 {
            p00.lerp(p11, v).lerp(p10.lerp(p11, v), (u - v) / (1.0 - v))
        } else {
            p11
        }
    } else if v > 0.0 {
        p00.lerp(p01, v).lerp(p00.lerp(p11, v), u / v)
    } else {
        p00
    }
}

/// The persistent instance cache for one foliage mesh on one section.
///
/// Built when a section first comes within the mesh's draw radius and
/// dropped again when it leaves; placement is deterministic so a rebuilt
/// cache is identical.
#[derive(Debug, Clone)]
pub struct FoliageInstanceCache {
    /// Index of the owning weighted material.
    pub weighted_index: usize,
    /// Index of the mesh within the material's foliage list.
    pub mesh_index: usize,
    pub instances: Vec<FoliageInstance>,
}

impl FoliageInstanceCache {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build(
        weighted_index: usize,
        mesh_index: usize,
        section: &TerrainSection,
        geometry: &TerrainGeometry<'_>,
        local_to_world: Mat4,
        weighted: &WeightedMaterial,
        mesh: &FoliageMesh,
        lights: &[SectionLight],
    ) -> Self {
        let max_level = geometry.max_level;
        let num_vertices_x = i64::from(geometry.height_field.num_vertices_x());
        let lattice_size = (max_level + 1) as usize;
        let mut instances = Vec::new();

        for patch_y in 0..section.size_y as i32 {
            for patch_x in 0..section.size_x as i32 {
                let global_x = section.base_x + patch_x;
                let global_y = section.base_y + patch_y;

                // World-space surface lattice over this quad at the terrain's
                // maximum tessellation; the outer row/column comes from the
                // neighboring patches.
                let patches = [
                    [
                        geometry.patch(global_x, global_y),
                        geometry.patch(global_x, global_y + 1),
                    ],
                    [
                        geometry.patch(global_x + 1, global_y),
                        geometry.patch(global_x + 1, global_y + 1),
                    ],
                ];
                let mut lattice = vec![vec![Vec3::ZERO; lattice_size]; lattice_size];
                for sub_y in 0..=max_level {
                    for sub_x in 0..=max_level {
                        let offset_x = (sub_x / max_level) as i32;
                        let offset_y = (sub_y / max_level) as i32;
                        let local = geometry.collision_vertex(
                            &patches[offset_x as usize][offset_y as usize],
                            global_x + offset_x,
                            global_y + offset_y,
                            sub_x & (max_level - 1),
                            sub_y & (max_level - 1),
                        );
                        lattice[sub_x as usize][sub_y as usize] =
                            local_to_world.transform_point3(local);
                    }
                }

                let weights = [
                    [
                        f32::from(weighted.weight(global_x, global_y)) / 255.0,
                        f32::from(weighted.weight(global_x, global_y + 1)) / 255.0,
                    ],
                    [
                        f32::from(weighted.weight(global_x + 1, global_y)) / 255.0,
                        f32::from(weighted.weight(global_x + 1, global_y + 1)) / 255.0,
                    ],
                ];

                // Quad-stable seed: placement must not shift when the camera
                // moves or the terrain reloads.
                let seed = i64::from(mesh.seed)
                    + i64::from(global_y) * num_vertices_x
                    + i64::from(global_x);
                let mut rng = SmallRng::seed_from_u64(seed as u64);

                for _ in 0..mesh.density {
                    let x: f32 = rng.random();
                    let y: f32 = rng.random();
                    let scale_x: f32 = rng.random();
                    let scale_y: f32 = rng.random();
                    let scale_z: f32 = rng.random();
                    let yaw: f32 = rng.random();
                    let accept: f32 = rng.random();

                    let weight = lerp(
                        lerp(weights[0][0], weights[1][0], x),
                        lerp(weights[0][1], weights[1][1], x),
                        y,
                    );
                    if accept > weight {
                        continue;
                    }

                    let sub_x = ((x * max_level as f32) as u32).min(max_level - 1) as usize;
                    let sub_y = ((y * max_level as f32) as u32).min(max_level - 1) as usize;
                    let location = quad_lerp(
                        lattice[sub_x][sub_y],
                        lattice[sub_x + 1][sub_y],
                        lattice[sub_x][sub_y + 1],
                        lattice[sub_x + 1][sub_y + 1],
                        x * max_level as f32 - sub_x as f32,
                        y * max_level as f32 - sub_y as f32,
                    );

                    let light_map_coord = Vec2::new(
                        (patch_x as f32 + x) / section.size_x as f32,
                        (patch_y as f32 + y) / section.size_y as f32,
                    );

                    instances.push(FoliageInstance {
                        location,
                        scale: [quantize(scale_x), quantize(scale_y), quantize(scale_z)],
                        yaw: quantize(yaw),
                        lighting: accumulate_lighting(location, light_map_coord, lights),
                        light_map_coord,
                    });
                }
            }
        }

        tracing::debug!(
            weighted_index,
            mesh_index,
            instances = instances.len(),
            "built foliage instance cache"
        );
        Self {
            weighted_index,
            mesh_index,
            instances,
        }
    }
}

/// Sum every light's contribution at an instance position: directional
/// lights contribute their color through the static shadow filter, point
/// lights additionally attenuate by the squared radial falloff.
fn accumulate_lighting(location: Vec3, light_map_coord: Vec2, lights: &[SectionLight]) -> Vec3 {
    let mut lighting = Vec3::ZERO;

    for light in lights {
        let color = light.color * light.brightness;

        let shadow = match &light.shadow {
            Some(map) => {
                let fx = light_map_coord.x * map.size_x() as f32;
                let fy = light_map_coord.y * map.size_y() as f32;
                let int_x = fx as i32;
                let int_y = fy as i32;
                map.filtered_shadow(int_x, fx - int_x as f32, int_y, fy - int_y as f32)
            }
            None => 1.0,
        };

        let falloff = match light.kind {
            LightKind::Directional => 1.0,
            LightKind::Point { origin, radius } => {
                let factor =
                    (1.0 - (origin - location).length_squared() / (radius * radius)).max(0.0);
                factor * factor
            }
        };

        lighting += color * shadow * falloff;
    }

    lighting
}

/// A foliage instance within draw range, with its distance-fade scale.
#[derive(Debug, Clone)]
pub struct VisibleFoliage {
    pub instance: FoliageInstance,
    /// 1 inside the transition radius, fading linearly to 0 at the draw
    /// radius.
    pub transition_scale: f32,
}

/// The visible subset of a foliage instance cache for one view.
#[derive(Debug, Clone)]
pub struct FoliageBatch {
    pub weighted_index: usize,
    pub mesh_index: usize,
    pub instances: Vec<VisibleFoliage>,
}

impl FoliageBatch {
    pub(crate) fn from_cache(
        cache: &FoliageInstanceCache,
        mesh: &FoliageMesh,
        view_origin: Vec3,
    ) -> Self {
        let draw_radius_squared = mesh.max_draw_radius * mesh.max_draw_radius;
        let transition_radius_squared = mesh.min_transition_radius * mesh.min_transition_radius;
        let transition_size = mesh.max_draw_radius - mesh.min_transition_radius;

        let instances = cache
            .instances
            .iter()
            .filter(|instance| {
                (instance.location - view_origin).length_squared() < draw_radius_squared
            })
            .map(|instance| {
                let distance_squared = (instance.location - view_origin).length_squared();
                let transition_scale = if distance_squared < transition_radius_squared
                    || transition_size <= 0.0
                {
                    1.0
                } else {
                    (1.0 - (distance_squared.sqrt() - mesh.min_transition_radius) / transition_size)
                        .clamp(0.0, 1.0)
                };
                VisibleFoliage {
                    instance: instance.clone(),
                    transition_scale,
                }
            })
            .collect();

        Self {
            weighted_index: cache.weighted_index,
            mesh_index: cache.mesh_index,
            instances,
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn quantize(value: f32) -> u8 {
    (value * 255.0).clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::HeightField;
    use crate::layers::DisplacementCache;
    use crate::section::TerrainSection;
    use crate::terrain::TerrainGeometry;
    use terramesh_tess::{MAX_TESSELLATION, PatchSampler};

    fn flat_weighted(weight: u8, field: &HeightField) -> WeightedMaterial {
        let samples = (field.num_vertices_x() * field.num_vertices_y()) as usize;
        WeightedMaterial {
            material: 0,
            highlighted: false,
            data: vec![weight; samples],
            num_vertices_x: field.num_vertices_x(),
            num_vertices_y: field.num_vertices_y(),
        }
    }

    fn build_cache(
        field: &HeightField,
        weight: u8,
        mesh: &FoliageMesh,
        lights: &[SectionLight],
    ) -> FoliageInstanceCache {
        let sampler = PatchSampler::new(MAX_TESSELLATION);
        let displacements = DisplacementCache::empty();
        let geometry = TerrainGeometry {
            height_field: field,
            displacements: &displacements,
            sampler: &sampler,
            max_level: 4,
        };
        let section = TerrainSection::new(0, 0, 2, 2, 4).unwrap();
        let weighted = flat_weighted(weight, field);
        FoliageInstanceCache::build(
            0,
            0,
            &section,
            &geometry,
            Mat4::IDENTITY,
            &weighted,
            mesh,
            lights,
        )
    }

    #[test]
    fn test_quad_lerp_corners() {
        let p00 = Vec3::new(0.0, 0.0, 1.0);
        let p10 = Vec3::new(1.0, 0.0, 2.0);
        let p01 = Vec3::new(0.0, 1.0, 3.0);
        let p11 = Vec3::new(1.0, 1.0, 4.0);

        assert_eq!(quad_lerp(p00, p10, p01, p11, 0.0, 0.0), p00);
        assert_eq!(quad_lerp(p00, p10, p01, p11, 1.0, 0.0), p10);
        assert_eq!(quad_lerp(p00, p10, p01, p11, 0.0, 1.0), p01);
        assert_eq!(quad_lerp(p00, p10, p01, p11, 1.0, 1.0), p11);

        // The diagonal itself interpolates p00..p11.
        let mid = quad_lerp(p00, p10, p01, p11, 0.5, 0.5);
        assert!((mid.z - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_placement_is_deterministic() {
        let field = HeightField::new(4, 4);
        let mesh = FoliageMesh::new(1234, 8, 100.0);
        let a = build_cache(&field, 255, &mesh, &[]);
        let b = build_cache(&field, 255, &mesh, &[]);
        assert_eq!(a.instances, b.instances);
        assert!(!a.instances.is_empty());
    }

    #[test]
    fn test_full_weight_accepts_every_candidate() {
        let field = HeightField::new(4, 4);
        let mesh = FoliageMesh::new(7, 5, 100.0);
        let cache = build_cache(&field, 255, &mesh, &[]);
        // 2x2 quads, 5 candidates each, weight 1.0 accepts all of them.
        assert_eq!(cache.instances.len(), 4 * 5);
    }

    #[test]
    fn test_zero_weight_places_nothing() {
        let field = HeightField::new(4, 4);
        let mesh = FoliageMesh::new(7, 16, 100.0);
        let cache = build_cache(&field, 0, &mesh, &[]);
        assert!(cache.instances.is_empty());
    }

    #[test]
    fn test_instances_lie_on_flat_surface() {
        let field = HeightField::new(4, 4);
        let mesh = FoliageMesh::new(99, 6, 100.0);
        let cache = build_cache(&field, 255, &mesh, &[]);
        for instance in &cache.instances {
            assert!(instance.location.z.abs() < 1e-4);
            assert!(instance.location.x >= 0.0 && instance.location.x <= 2.0);
            assert!(instance.location.y >= 0.0 && instance.location.y <= 2.0);
        }
    }

    #[test]
    fn test_directional_and_point_lighting() {
        let field = HeightField::new(4, 4);
        let mesh = FoliageMesh::new(3, 4, 100.0);
        let lights = [
            SectionLight {
                color: Vec3::new(1.0, 0.5, 0.25),
                brightness: 2.0,
                kind: LightKind::Directional,
                shadow: None,
            },
            SectionLight {
                color: Vec3::ONE,
                brightness: 1.0,
                kind: LightKind::Point {
                    origin: Vec3::new(1000.0, 1000.0, 0.0),
                    radius: 1.0,
                },
                shadow: None,
            },
        ];

        let cache = build_cache(&field, 255, &mesh, &lights);
        // The point light is far out of range, so only the directional
        // contribution remains.
        for instance in &cache.instances {
            assert!((instance.lighting - Vec3::new(2.0, 1.0, 0.5)).length() < 1e-5);
        }
    }

    #[test]
    fn test_shadow_map_filtering() {
        let map = ShadowMap::new(2, 2, vec![0, 255, 0, 255]);
        assert_eq!(map.filtered_shadow(0, 0.0, 0, 0.0), 0.0);
        assert_eq!(map.filtered_shadow(0, 1.0, 0, 0.0), 1.0);
        assert!((map.filtered_shadow(0, 0.5, 0, 0.5) - 0.5).abs() < 1e-6);
        // Out-of-range lookups clamp.
        assert_eq!(map.filtered_shadow(5, 0.0, 5, 0.0), 1.0);
    }

    #[test]
    fn test_batch_culls_by_draw_radius() {
        let field = HeightField::new(4, 4);
        let mut mesh = FoliageMesh::new(11, 6, 100.0);
        let cache = build_cache(&field, 255, &mesh, &[]);
        assert!(!cache.instances.is_empty());

        // Viewed from on top of the section everything is visible.
        let near = FoliageBatch::from_cache(&cache, &mesh, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(near.instances.len(), cache.instances.len());
        assert!(near.instances.iter().all(|v| v.transition_scale > 0.0));

        // Far beyond the draw radius nothing survives.
        let far = FoliageBatch::from_cache(&cache, &mesh, Vec3::new(1000.0, 1000.0, 0.0));
        assert!(far.instances.is_empty());

        // In the transition band the fade scale drops below one.
        mesh.min_transition_radius = 1.0;
        mesh.max_draw_radius = 200.0;
        let fading = FoliageBatch::from_cache(&cache, &mesh, Vec3::new(50.0, 1.0, 0.0));
        assert!(!fading.instances.is_empty());
        assert!(fading.instances.iter().all(|v| v.transition_scale < 1.0));
    }
}
