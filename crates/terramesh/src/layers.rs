//! Layered material authoring: weight-map and displacement baking.
//!
//! Terrain materials are painted as ordered layers, each claiming a share of
//! every vertex's total weight (255) through its alpha map and per-material
//! filters (height, slope, noise). Baking flattens the layer stack into the
//! per-material weight maps the mask/batching system and the material
//! compiler consume.

use glam::{Mat4, Vec2, Vec4};

use crate::foliage::FoliageMesh;
use crate::heightfield::HeightField;
use crate::material::MaterialGraph;
use crate::noise::{FilterLimit, NoiseParameter};

/// How a layer's material projects its texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UvMapping {
    #[default]
    Auto,
    XY,
    XZ,
    YZ,
}

/// A displacement texture: byte samples biased around the middle, scaled
/// into world units by `scale`.
#[derive(Debug, Clone)]
pub struct DisplacementMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub scale: f32,
}

impl DisplacementMap {
    /// Sample at texture coordinates (wrapping on both axes).
    #[must_use]
    pub fn displacement(&self, u: f32, v: f32) -> f32 {
        let x = (u * self.width as f32).floor().rem_euclid(self.width as f32) as u32;
        let y = (v * self.height as f32).floor().rem_euclid(self.height as f32) as u32;
        let sample = f32::from(self.data[(y * self.width + x) as usize]);
        (sample / 255.0 * 2.0 - 1.0) * self.scale
    }

    /// The largest displacement magnitude this map can produce.
    #[must_use]
    pub fn max_displacement(&self) -> f32 {
        self.scale.abs()
    }
}

/// One terrain material definition: UV mapping, its expression graph, its
/// declared parameters, and optional displacement and foliage.
#[derive(Debug, Clone)]
pub struct TerrainMaterial {
    pub name: String,
    pub mapping: UvMapping,
    pub mapping_scale: f32,
    pub mapping_rotation: f32,
    pub mapping_pan: Vec2,
    pub graph: MaterialGraph,
    pub scalar_params: Vec<(String, f32)>,
    pub vector_params: Vec<(String, Vec4)>,
    pub displacement: Option<DisplacementMap>,
    pub foliage_meshes: Vec<FoliageMesh>,
}

impl TerrainMaterial {
    #[must_use]
    pub fn new(name: impl Into<String>, graph: MaterialGraph) -> Self {
        Self {
            name: name.into(),
            mapping: UvMapping::Auto,
            mapping_scale: 1.0,
            mapping_rotation: 0.0,
            mapping_pan: Vec2::ZERO,
            graph,
            scalar_params: Vec::new(),
            vector_params: Vec::new(),
            displacement: None,
            foliage_meshes: Vec::new(),
        }
    }

    /// The material's mapped UV at a local position, mirroring the rotation,
    /// scale, and pan its compiled expression applies.
    #[must_use]
    pub fn mapping_uv(&self, x: f32, y: f32) -> Vec2 {
        let scale = if self.mapping_scale == 0.0 {
            1.0
        } else {
            self.mapping_scale
        };
        let (sin, cos) = self.mapping_rotation.to_radians().sin_cos();
        Vec2::new(
            (x * cos + y * sin) / scale + self.mapping_pan.x,
            (x * -sin + y * cos) / scale + self.mapping_pan.y,
        )
    }
}

/// A material within a layer, with the filters that carve out its share of
/// the layer's weight.
#[derive(Debug, Clone)]
pub struct FilteredMaterial {
    /// Index into the material registry; `None` claims nothing.
    pub material: Option<usize>,
    pub use_noise: bool,
    pub noise_scale: f32,
    pub noise_percent: f32,
    pub min_height: FilterLimit,
    pub max_height: FilterLimit,
    pub min_slope: FilterLimit,
    pub max_slope: FilterLimit,
    pub alpha: f32,
}

impl FilteredMaterial {
    #[must_use]
    pub fn covering(material: usize) -> Self {
        Self {
            material: Some(material),
            use_noise: false,
            noise_scale: 0.0,
            noise_percent: 0.0,
            min_height: FilterLimit::default(),
            max_height: FilterLimit::default(),
            min_slope: FilterLimit::default(),
            max_slope: FilterLimit::default(),
            alpha: 1.0,
        }
    }

    /// Carve this material's share out of `base`, accumulating it into the
    /// terrain's weighted materials. Texels this material claims are removed
    /// from `base`; rejected texels stay for the rest of the layer stack.
    fn build_weight_map(
        &self,
        base: &mut [u8],
        highlighted: bool,
        height_field: &HeightField,
        local_to_world: Mat4,
        weighted: &mut Vec<WeightedMaterial>,
    ) {
        let Some(material) = self.material else {
            return;
        };

        let nvx = height_field.num_vertices_x() as i32;
        let nvy = height_field.num_vertices_y() as i32;
        let alpha = self.alpha.clamp(0.0, 1.0);
        let mut material_weights = vec![0u8; base.len()];

        let world =
            |x: i32, y: i32| local_to_world.transform_point3(height_field.local_vertex(x, y));

        for y in 0..nvy {
            for x in 0..nvx {
                let index = (y * nvx + x) as usize;
                if base[index] == 0 {
                    continue;
                }

                if self.min_slope.enabled || self.max_slope.enabled {
                    let vertex = world(x, y);
                    let mut slope = 0.0f32;
                    for (dx, dy) in NEIGHBOR_OFFSETS {
                        slope = slope.max(slope_between(world(x + dx, y + dy), vertex));
                    }
                    if self.max_slope.test_greater(x, y, slope)
                        || self.min_slope.test_less(x, y, slope)
                    {
                        continue;
                    }
                }

                if self.min_height.enabled || self.max_height.enabled {
                    let height = world(x, y).z;
                    if self.max_height.test_greater(x, y, height)
                        || self.min_height.test_less(x, y, height)
                    {
                        continue;
                    }
                }

                if self.use_noise
                    && NoiseParameter::new(0.5, self.noise_scale, 1.0)
                        .test_less(x, y, self.noise_percent)
                {
                    continue;
                }

                let weight = (f32::from(base[index]) * alpha).clamp(0.0, 255.0) as u8;
                material_weights[index] = weight;
                base[index] -= weight;
            }
        }

        // Accumulate into an existing weighted material for the same
        // (material, highlight) pair, or start a new one.
        if let Some(existing) = weighted
            .iter_mut()
            .find(|w| w.material == material && w.highlighted == highlighted)
        {
            for (dst, src) in existing.data.iter_mut().zip(&material_weights) {
                *dst += *src;
            }
        } else {
            weighted.push(WeightedMaterial {
                material,
                highlighted,
                data: material_weights,
                num_vertices_x: nvx as u32,
                num_vertices_y: nvy as u32,
            });
        }
    }
}

const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

fn slope_between(a: glam::Vec3, b: glam::Vec3) -> f32 {
    let run = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
    if run <= f32::EPSILON {
        0.0
    } else {
        (b.z - a.z).abs() / run
    }
}

/// One painted layer of the terrain. Layers are ordered bottom-up: the
/// topmost (highest index) claims weight first, the bottom layer ignores its
/// alpha map and takes whatever remains.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub materials: Vec<FilteredMaterial>,
    pub alpha_map_index: Option<usize>,
    pub highlighted: bool,
    pub hidden: bool,
}

impl Layer {
    #[must_use]
    pub fn new(name: impl Into<String>, materials: Vec<FilteredMaterial>) -> Self {
        Self {
            name: name.into(),
            materials,
            alpha_map_index: None,
            highlighted: false,
            hidden: false,
        }
    }
}

/// A flattened per-material weight map, one byte per terrain vertex.
#[derive(Debug, Clone)]
pub struct WeightedMaterial {
    /// Index into the material registry.
    pub material: usize,
    pub highlighted: bool,
    pub data: Vec<u8>,
    pub num_vertices_x: u32,
    pub num_vertices_y: u32,
}

impl WeightedMaterial {
    /// Weight at `(x, y)`; out-of-range coordinates clamp.
    #[must_use]
    pub fn weight(&self, x: i32, y: i32) -> u8 {
        let x = x.clamp(0, self.num_vertices_x as i32 - 1) as u32;
        let y = y.clamp(0, self.num_vertices_y as i32 - 1) as u32;
        self.data[(y * self.num_vertices_x + x) as usize]
    }

    /// Bilinearly filtered weight in byte scale (0..=255).
    #[must_use]
    pub fn filtered_weight(&self, int_x: i32, frac_x: f32, int_y: i32, frac_y: f32) -> f32 {
        let w00 = f32::from(self.weight(int_x, int_y));
        let w10 = f32::from(self.weight(int_x + 1, int_y));
        let w01 = f32::from(self.weight(int_x, int_y + 1));
        let w11 = f32::from(self.weight(int_x + 1, int_y + 1));
        let top = w00 + (w10 - w00) * frac_x;
        let bottom = w01 + (w11 - w01) * frac_x;
        top + (bottom - top) * frac_y
    }
}

/// Flatten the layer stack into per-material weight maps.
///
/// Starts from a fully saturated base (255 everywhere), walks the layers
/// top-down letting each claim `base * layer_alpha`, runs every filtered
/// material over the claim, and returns unclaimed weight to the base for the
/// layers below.
#[must_use]
pub fn cache_weight_maps(
    height_field: &HeightField,
    layers: &[Layer],
    local_to_world: Mat4,
) -> Vec<WeightedMaterial> {
    let nvx = height_field.num_vertices_x() as usize;
    let nvy = height_field.num_vertices_y() as usize;
    let samples = nvx * nvy;

    let mut weighted = Vec::new();
    let mut base = vec![255u8; samples];

    for (layer_index, layer) in layers.iter().enumerate().rev() {
        let mut layer_weights = vec![0u8; samples];

        for y in 0..nvy {
            for x in 0..nvx {
                let index = y * nvx + x;
                let layer_alpha = if layer_index > 0 {
                    f32::from(height_field.alpha(layer.alpha_map_index, x as i32, y as i32)) / 255.0
                } else {
                    1.0
                };
                let weight = (f32::from(base[index]) * layer_alpha).clamp(0.0, 255.0) as u8;
                layer_weights[index] = weight;
                base[index] -= weight;
            }
        }

        if !layer.hidden {
            for material in &layer.materials {
                material.build_weight_map(
                    &mut layer_weights,
                    layer.highlighted,
                    height_field,
                    local_to_world,
                    &mut weighted,
                );
            }
        }

        // Weight the layer claimed but no material consumed flows back down.
        for (dst, src) in base.iter_mut().zip(&layer_weights) {
            *dst += *src;
        }
    }

    tracing::debug!(
        layers = layers.len(),
        weighted = weighted.len(),
        "cached terrain weight maps"
    );
    weighted
}

/// Pre-baked per-vertex displacement at the terrain's maximum tessellation,
/// quantized to a byte around the largest displacement any material can
/// produce.
#[derive(Debug, Clone)]
pub struct DisplacementCache {
    vertices_x: u32,
    max_level: u32,
    data: Vec<u8>,
    max_displacement: f32,
}

impl DisplacementCache {
    /// A cache that reads zero everywhere.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            vertices_x: 0,
            max_level: 1,
            data: Vec::new(),
            max_displacement: 0.0,
        }
    }

    /// Bake displacement for the whole terrain at `max_level` sub-steps per
    /// quad, blending every displaced material by its filtered weight.
    #[must_use]
    pub fn bake(
        height_field: &HeightField,
        materials: &[TerrainMaterial],
        weighted: &[WeightedMaterial],
        max_level: u32,
    ) -> Self {
        let displaced: Vec<usize> = weighted
            .iter()
            .enumerate()
            .filter(|(_, w)| materials[w.material].displacement.is_some())
            .map(|(index, _)| index)
            .collect();

        let max_displacement = displaced
            .iter()
            .filter_map(|&index| materials[weighted[index].material].displacement.as_ref())
            .map(DisplacementMap::max_displacement)
            .fold(0.0f32, f32::max);

        if displaced.is_empty() || max_displacement <= 0.0 {
            return Self::empty();
        }

        let vertices_x = height_field.num_patches_x() * max_level + 1;
        let vertices_y = height_field.num_patches_y() * max_level + 1;
        let mut data = Vec::with_capacity((vertices_x * vertices_y) as usize);

        for vertex_y in 0..vertices_y {
            for vertex_x in 0..vertices_x {
                let int_x = (vertex_x / max_level) as i32;
                let int_y = (vertex_y / max_level) as i32;
                let x = vertex_x as f32 / max_level as f32;
                let y = vertex_y as f32 / max_level as f32;
                let frac_x = x - int_x as f32;
                let frac_y = y - int_y as f32;

                let mut displacement = 0.0;
                for &index in &displaced {
                    let layer = &weighted[index];
                    let weight = layer.filtered_weight(int_x, frac_x, int_y, frac_y);
                    if weight > 0.0 {
                        let material = &materials[layer.material];
                        let uv = material.mapping_uv(x, y);
                        if let Some(map) = &material.displacement {
                            displacement += weight / 255.0 * map.displacement(uv.x, uv.y);
                        }
                    }
                }

                let quantized =
                    (displacement * 127.0 / max_displacement).clamp(-127.0, 128.0) as i32;
                data.push((quantized + 127) as u8);
            }
        }

        Self {
            vertices_x,
            max_level,
            data,
            max_displacement,
        }
    }

    /// Displacement for sub-position `(sub_x, sub_y)` of the quad at
    /// `(x, y)`, in world units.
    #[must_use]
    pub fn get(&self, x: i32, y: i32, sub_x: u32, sub_y: u32) -> f32 {
        if self.max_displacement <= 0.0 {
            return 0.0;
        }
        let vertex_x = x as u32 * self.max_level + sub_x;
        let vertex_y = y as u32 * self.max_level + sub_y;
        let packed = i32::from(self.data[(vertex_y * self.vertices_x + vertex_x) as usize]);
        (packed - 127) as f32 / 127.0 * self.max_displacement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialGraph;

    fn plain_material(name: &str) -> TerrainMaterial {
        TerrainMaterial::new(name, MaterialGraph::flat_color(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_single_layer_full_coverage() {
        let field = HeightField::new(2, 2);
        let layers = vec![Layer::new("base", vec![FilteredMaterial::covering(0)])];

        let weighted = cache_weight_maps(&field, &layers, Mat4::IDENTITY);
        assert_eq!(weighted.len(), 1);
        assert!(weighted[0].data.iter().all(|&w| w == 255));
    }

    #[test]
    fn test_alpha_split_between_materials() {
        let field = HeightField::new(1, 1);
        let mut half = FilteredMaterial::covering(0);
        half.alpha = 0.5;
        let layers = vec![Layer::new(
            "split",
            vec![half, FilteredMaterial::covering(1)],
        )];

        let weighted = cache_weight_maps(&field, &layers, Mat4::IDENTITY);
        assert_eq!(weighted.len(), 2);
        for index in 0..4 {
            let total = u32::from(weighted[0].data[index]) + u32::from(weighted[1].data[index]);
            assert_eq!(total, 255, "weights must conserve the full budget");
            assert_eq!(weighted[0].data[index], 127);
        }
    }

    #[test]
    fn test_top_layer_claims_through_alpha_map() {
        let mut field = HeightField::new(1, 1);
        let alpha = field.add_empty_alpha_map();
        for y in 0..2 {
            for x in 0..2 {
                field.set_alpha(alpha, x, y, 128);
            }
        }

        let mut top = Layer::new("top", vec![FilteredMaterial::covering(1)]);
        top.alpha_map_index = Some(alpha);
        let layers = vec![
            Layer::new("bottom", vec![FilteredMaterial::covering(0)]),
            top,
        ];

        let weighted = cache_weight_maps(&field, &layers, Mat4::IDENTITY);
        assert_eq!(weighted.len(), 2);
        // The top layer ran first and claimed 255 * 128/255 = 128.
        let top_weights = weighted.iter().find(|w| w.material == 1).unwrap();
        let bottom_weights = weighted.iter().find(|w| w.material == 0).unwrap();
        assert!(top_weights.data.iter().all(|&w| w == 128));
        assert!(bottom_weights.data.iter().all(|&w| w == 127));
    }

    #[test]
    fn test_hidden_layer_claims_nothing() {
        let field = HeightField::new(1, 1);
        let mut hidden = Layer::new("hidden", vec![FilteredMaterial::covering(1)]);
        hidden.hidden = true;
        let layers = vec![
            Layer::new("base", vec![FilteredMaterial::covering(0)]),
            hidden,
        ];

        let weighted = cache_weight_maps(&field, &layers, Mat4::IDENTITY);
        assert_eq!(weighted.len(), 1);
        assert_eq!(weighted[0].material, 0);
        assert!(weighted[0].data.iter().all(|&w| w == 255));
    }

    #[test]
    fn test_height_filter_rejects_high_ground() {
        let mut field = HeightField::new(1, 1);
        // One vertex raised well above the rest.
        field.set_height(0, 0, 40960); // local height (40960 - 32768) / 128 = 64

        let mut low_only = FilteredMaterial::covering(0);
        low_only.max_height = FilterLimit {
            enabled: true,
            noise: NoiseParameter::new(10.0, 0.0, 0.0),
        };
        let layers = vec![Layer::new("low", vec![low_only])];

        let weighted = cache_weight_maps(&field, &layers, Mat4::IDENTITY);
        assert_eq!(weighted.len(), 1);
        assert_eq!(weighted[0].weight(0, 0), 0);
        assert_eq!(weighted[0].weight(1, 1), 255);
    }

    #[test]
    fn test_filtered_weight_bilinear() {
        let material = WeightedMaterial {
            material: 0,
            highlighted: false,
            data: vec![0, 255, 0, 255],
            num_vertices_x: 2,
            num_vertices_y: 2,
        };
        assert_eq!(material.filtered_weight(0, 0.0, 0, 0.0), 0.0);
        assert_eq!(material.filtered_weight(0, 1.0, 0, 0.0), 255.0);
        assert_eq!(material.filtered_weight(0, 0.5, 0, 0.5), 127.5);
    }

    #[test]
    fn test_displacement_cache_round_trip() {
        let field = HeightField::new(2, 2);
        let mut material = plain_material("displaced");
        material.displacement = Some(DisplacementMap {
            width: 1,
            height: 1,
            data: vec![255],
            scale: 4.0,
        });
        let materials = vec![material];
        let weighted = vec![WeightedMaterial {
            material: 0,
            highlighted: false,
            data: vec![255; 9],
            num_vertices_x: 3,
            num_vertices_y: 3,
        }];

        let cache = DisplacementCache::bake(&field, &materials, &weighted, 4);
        // A constant full-intensity map displaces by the full scale, within
        // byte quantization.
        let displacement = cache.get(1, 1, 2, 2);
        assert!((displacement - 4.0).abs() < 4.0 / 127.0 + 1e-4);
    }

    #[test]
    fn test_displacement_cache_empty_without_maps() {
        let field = HeightField::new(1, 1);
        let materials = vec![plain_material("flat")];
        let weighted = vec![WeightedMaterial {
            material: 0,
            highlighted: false,
            data: vec![255; 4],
            num_vertices_x: 2,
            num_vertices_y: 2,
        }];

        let cache = DisplacementCache::bake(&field, &materials, &weighted, 4);
        assert_eq!(cache.get(0, 0, 0, 0), 0.0);
    }

    #[test]
    fn test_mapping_uv_rotation_and_pan() {
        let mut material = plain_material("mapped");
        material.mapping_scale = 2.0;
        material.mapping_rotation = 90.0;
        material.mapping_pan = Vec2::new(1.0, 0.0);

        let uv = material.mapping_uv(2.0, 0.0);
        // A 90-degree rotation maps +x onto -v; scale halves it.
        assert!((uv.x - 1.0).abs() < 1e-6);
        assert!((uv.y + 1.0).abs() < 1e-6);
    }
}
