//! The terrain height field: quantized elevations and per-layer alpha maps.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use terramesh_tess::Patch;

use crate::error::{Error, Result};

/// Quantized heights are biased around this midpoint.
pub const HEIGHT_BIAS: f32 = 32768.0;

/// World units per quantized height step.
pub const HEIGHT_SCALE: f32 = 1.0 / 128.0;

/// The height new vertices are created at (local elevation zero).
pub const DEFAULT_HEIGHT: u16 = 32768;

/// One painted alpha layer, `num_vertices_x * num_vertices_y` weights.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlphaMap {
    pub data: Vec<u8>,
}

/// The raw per-vertex samples of an entire terrain: one unsigned 16-bit
/// elevation per vertex plus any number of byte alpha maps sharing the same
/// dimensions.
///
/// Mutated only by editing tools between frames; treated as read-only during
/// a mesh-build pass. Out-of-range accessors clamp to the border sample, so
/// patch gathering near the edges needs no special casing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightField {
    num_vertices_x: u32,
    num_vertices_y: u32,
    heights: Vec<u16>,
    alpha_maps: Vec<AlphaMap>,
}

impl HeightField {
    /// Create a flat height field covering `num_patches_x * num_patches_y`
    /// quads.
    #[must_use]
    pub fn new(num_patches_x: u32, num_patches_y: u32) -> Self {
        let num_vertices_x = num_patches_x + 1;
        let num_vertices_y = num_patches_y + 1;
        Self {
            num_vertices_x,
            num_vertices_y,
            heights: vec![DEFAULT_HEIGHT; (num_vertices_x * num_vertices_y) as usize],
            alpha_maps: Vec::new(),
        }
    }

    #[must_use]
    pub fn num_vertices_x(&self) -> u32 {
        self.num_vertices_x
    }

    #[must_use]
    pub fn num_vertices_y(&self) -> u32 {
        self.num_vertices_y
    }

    #[must_use]
    pub fn num_patches_x(&self) -> u32 {
        self.num_vertices_x - 1
    }

    #[must_use]
    pub fn num_patches_y(&self) -> u32 {
        self.num_vertices_y - 1
    }

    fn sample_index(&self, x: i32, y: i32) -> usize {
        let x = x.clamp(0, self.num_vertices_x as i32 - 1) as u32;
        let y = y.clamp(0, self.num_vertices_y as i32 - 1) as u32;
        (y * self.num_vertices_x + x) as usize
    }

    /// Quantized height at `(x, y)`; out-of-range coordinates clamp.
    #[must_use]
    pub fn height(&self, x: i32, y: i32) -> u16 {
        self.heights[self.sample_index(x, y)]
    }

    pub fn set_height(&mut self, x: i32, y: i32, height: u16) {
        let index = self.sample_index(x, y);
        self.heights[index] = height;
    }

    /// Local-space elevation at `(x, y)`.
    #[must_use]
    pub fn local_height(&self, x: i32, y: i32) -> f32 {
        (f32::from(self.height(x, y)) - HEIGHT_BIAS) * HEIGHT_SCALE
    }

    /// Local-space vertex position at `(x, y)`.
    #[must_use]
    pub fn local_vertex(&self, x: i32, y: i32) -> Vec3 {
        Vec3::new(x as f32, y as f32, self.local_height(x, y))
    }

    /// Gather the 4x4 bicubic control neighborhood of the quad at `(x, y)`.
    #[must_use]
    pub fn patch(&self, x: i32, y: i32) -> Patch {
        let mut patch = Patch::default();
        for sub_y in 0..4 {
            for sub_x in 0..4 {
                patch.heights[sub_x][sub_y] =
                    f32::from(self.height(x - 1 + sub_x as i32, y - 1 + sub_y as i32));
            }
        }
        patch
    }

    /// Number of alpha maps.
    #[must_use]
    pub fn num_alpha_maps(&self) -> usize {
        self.alpha_maps.len()
    }

    /// Alpha weight of map `index` at `(x, y)`; `None` reads as zero weight
    /// and out-of-range coordinates clamp.
    #[must_use]
    pub fn alpha(&self, index: Option<usize>, x: i32, y: i32) -> u8 {
        match index {
            Some(index) => self.alpha_maps[index].data[self.sample_index(x, y)],
            None => 0,
        }
    }

    pub fn set_alpha(&mut self, index: usize, x: i32, y: i32, value: u8) {
        let sample = self.sample_index(x, y);
        self.alpha_maps[index].data[sample] = value;
    }

    /// Append an alpha map, validating its dimensions.
    pub fn add_alpha_map(&mut self, map: AlphaMap) -> Result<usize> {
        let expected = (self.num_vertices_x * self.num_vertices_y) as usize;
        if map.data.len() != expected {
            return Err(Error::AlphaMapSize {
                expected,
                actual: map.data.len(),
            });
        }
        self.alpha_maps.push(map);
        Ok(self.alpha_maps.len() - 1)
    }

    /// Append an empty (all-zero) alpha map.
    pub fn add_empty_alpha_map(&mut self) -> usize {
        let samples = (self.num_vertices_x * self.num_vertices_y) as usize;
        self.alpha_maps.push(AlphaMap {
            data: vec![0; samples],
        });
        self.alpha_maps.len() - 1
    }

    /// Resize to a new patch count, preserving overlapping samples and
    /// filling newly exposed ones with the midpoint height / zero alpha.
    pub fn resize(&mut self, num_patches_x: u32, num_patches_y: u32) {
        let new_x = num_patches_x + 1;
        let new_y = num_patches_y + 1;
        if new_x == self.num_vertices_x && new_y == self.num_vertices_y {
            return;
        }

        let mut heights = Vec::with_capacity((new_x * new_y) as usize);
        for y in 0..new_y {
            for x in 0..new_x {
                if x < self.num_vertices_x && y < self.num_vertices_y {
                    heights.push(self.heights[(y * self.num_vertices_x + x) as usize]);
                } else {
                    heights.push(DEFAULT_HEIGHT);
                }
            }
        }

        for map in &mut self.alpha_maps {
            let mut data = Vec::with_capacity((new_x * new_y) as usize);
            for y in 0..new_y {
                for x in 0..new_x {
                    if x < self.num_vertices_x && y < self.num_vertices_y {
                        data.push(map.data[(y * self.num_vertices_x + x) as usize]);
                    } else {
                        data.push(0);
                    }
                }
            }
            map.data = data;
        }

        self.num_vertices_x = new_x;
        self.num_vertices_y = new_y;
        self.heights = heights;
    }
}
