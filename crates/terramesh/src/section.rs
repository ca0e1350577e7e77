//! Terrain sections: rectangular tiles of patches with material batching.

use terramesh_tess::{SectionDims, TessError};

use crate::error::{Error, Result};
use crate::heightfield::{HEIGHT_BIAS, HEIGHT_SCALE};
use crate::layers::WeightedMaterial;
use crate::material::MaterialMask;
use crate::terrain::TerrainGeometry;

/// Conservative extents of one quad's displaced surface, in local units.
#[derive(Debug, Clone, Copy)]
pub struct PatchBounds {
    pub min_height: f32,
    pub max_height: f32,
    /// Largest lateral excursion displacement pushes a vertex outside the
    /// quad's footprint.
    pub max_displacement: f32,
}

/// A rectangular tile of terrain patches owning one vertex/index buffer pair
/// per frame.
///
/// Each quad is assigned to a batch of quads sharing one material mask;
/// `full_batch` indexes the distinguished union mask used when the whole
/// section renders as a single draw at tessellation 1.
#[derive(Debug, Clone)]
pub struct TerrainSection {
    pub base_x: i32,
    pub base_y: i32,
    pub size_x: u32,
    pub size_y: u32,
    pub patch_bounds: Vec<PatchBounds>,
    /// Per-quad index into `batch_masks`.
    pub patch_batches: Vec<u32>,
    /// Deduplicated masks used by quads in this section.
    pub batch_masks: Vec<MaterialMask>,
    /// Index of the union mask in `batch_masks`.
    pub full_batch: u32,
}

impl TerrainSection {
    /// Create an empty section, validating that its tessellated local
    /// coordinates stay within the byte range the vertex format (and the
    /// 16-bit index budget) allows.
    pub fn new(base_x: i32, base_y: i32, size_x: u32, size_y: u32, max_level: u32) -> Result<Self> {
        if size_x == 0 || size_y == 0 {
            return Err(Error::InvalidConfig {
                context: "section size",
                detail: format!("degenerate section {size_x}x{size_y}"),
            });
        }
        for size in [size_x, size_y] {
            if size * max_level > 255 {
                return Err(Error::Tess(TessError::SectionTooLarge { size, max_level }));
            }
        }

        Ok(Self {
            base_x,
            base_y,
            size_x,
            size_y,
            patch_bounds: Vec::new(),
            patch_batches: Vec::new(),
            batch_masks: Vec::new(),
            full_batch: 0,
        })
    }

    #[must_use]
    pub fn dims(&self) -> SectionDims {
        SectionDims {
            base_x: self.base_x,
            base_y: self.base_y,
            size_x: self.size_x,
            size_y: self.size_y,
        }
    }

    /// Assign every quad to a batch keyed by its material mask: a material is
    /// active on a quad when its summed weight over the quad's four corners
    /// is non-zero. Masks are deduplicated in first-seen order and the union
    /// mask is appended as the full batch.
    pub(crate) fn rebuild_batches(&mut self, weighted: &[WeightedMaterial]) {
        let num_materials = weighted.len() as u32;
        let mut full_mask = MaterialMask::new(num_materials);

        self.patch_batches = Vec::with_capacity((self.size_x * self.size_y) as usize);
        self.batch_masks = Vec::new();

        for y in self.base_y..self.base_y + self.size_y as i32 {
            for x in self.base_x..self.base_x + self.size_x as i32 {
                let mut mask = MaterialMask::new(num_materials);

                for (index, material) in weighted.iter().enumerate() {
                    let total_weight = u32::from(material.weight(x, y))
                        + u32::from(material.weight(x + 1, y))
                        + u32::from(material.weight(x, y + 1))
                        + u32::from(material.weight(x + 1, y + 1));
                    if total_weight > 0 {
                        mask.set(index as u32, true);
                        full_mask.set(index as u32, true);
                    }
                }

                self.patch_batches
                    .push(add_unique_mask(&mut self.batch_masks, mask));
            }
        }

        self.full_batch = add_unique_mask(&mut self.batch_masks, full_mask);
    }

    /// Recompute each quad's conservative height/displacement extents over
    /// the collision-vertex lattice.
    pub(crate) fn rebuild_patch_bounds(&mut self, geometry: &TerrainGeometry<'_>) {
        self.patch_bounds = Vec::with_capacity((self.size_x * self.size_y) as usize);

        for y in 0..self.size_y as i32 {
            for x in 0..self.size_x as i32 {
                let global_x = self.base_x + x;
                let global_y = self.base_y + y;
                let patch = geometry.patch(global_x, global_y);

                let mut bounds = PatchBounds {
                    min_height: HEIGHT_BIAS * HEIGHT_SCALE,
                    max_height: -HEIGHT_BIAS * HEIGHT_SCALE,
                    max_displacement: 0.0,
                };

                for sub_y in 0..=geometry.max_level {
                    for sub_x in 0..=geometry.max_level {
                        let vertex =
                            geometry.collision_vertex(&patch, global_x, global_y, sub_x, sub_y);

                        bounds.min_height = bounds.min_height.min(vertex.z);
                        bounds.max_height = bounds.max_height.max(vertex.z);
                        bounds.max_displacement = bounds
                            .max_displacement
                            .max(vertex.x - (global_x + 1) as f32)
                            .max(global_x as f32 - vertex.x)
                            .max(vertex.y - (global_y + 1) as f32)
                            .max(global_y as f32 - vertex.y);
                    }
                }

                self.patch_bounds.push(bounds);
            }
        }
    }

    /// The section's local height extents over all quads.
    #[must_use]
    pub fn height_bounds(&self) -> (f32, f32) {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for bounds in &self.patch_bounds {
            min = min.min(bounds.min_height);
            max = max.max(bounds.max_height);
        }
        if self.patch_bounds.is_empty() {
            (0.0, 0.0)
        } else {
            (min, max)
        }
    }

    /// Largest lateral displacement any quad in the section produces.
    #[must_use]
    pub fn max_displacement(&self) -> f32 {
        self.patch_bounds
            .iter()
            .map(|bounds| bounds.max_displacement)
            .fold(0.0, f32::max)
    }
}

fn add_unique_mask(masks: &mut Vec<MaterialMask>, mask: MaterialMask) -> u32 {
    if let Some(index) = masks.iter().position(|existing| *existing == mask) {
        return index as u32;
    }
    masks.push(mask);
    masks.len() as u32 - 1
}
