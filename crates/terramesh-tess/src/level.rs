//! Tessellation level selection.

use crate::MAX_TESSELLATION;
use crate::error::{TessError, TessResult};

/// Map a camera-space depth to a tessellation level.
///
/// Fixed thresholds in a geometric progression: doubling the distance halves
/// the detail. The result is a power of two in `1..=16`.
#[must_use]
pub fn level_for_depth(depth: f32) -> u32 {
    let z = depth.abs();
    if z < 4096.0 {
        16
    } else if z < 8192.0 {
        8
    } else if z < 16384.0 {
        4
    } else if z < 32768.0 {
        2
    } else {
        1
    }
}

/// Per-quad tessellation levels for a section, including a one-quad halo
/// ring so boundary stitching needs no cross-section queries.
///
/// Recomputed per frame for visible sections; transient, never persisted.
#[derive(Debug, Clone)]
pub struct TessellationLevels {
    size_x: u32,
    size_y: u32,
    levels: Vec<u8>,
}

impl TessellationLevels {
    /// Build a level map for a `size_x` by `size_y` quad section, calling
    /// `level_fn(x, y)` for every quad in `-1..=size` on both axes (the halo
    /// ring included).
    ///
    /// # Errors
    ///
    /// Rejects levels that are not powers of two in `1..=16`; the edge-merge
    /// sweep in the index builder is only monotonic for power-of-two levels.
    pub fn from_fn(
        size_x: u32,
        size_y: u32,
        mut level_fn: impl FnMut(i32, i32) -> u32,
    ) -> TessResult<Self> {
        let mut levels = Vec::with_capacity(((size_x + 2) * (size_y + 2)) as usize);
        for y in -1..=size_y as i32 {
            for x in -1..=size_x as i32 {
                let level = level_fn(x, y);
                if !(1..=MAX_TESSELLATION).contains(&level) {
                    return Err(TessError::LevelOutOfRange { level });
                }
                if !level.is_power_of_two() {
                    return Err(TessError::LevelNotPowerOfTwo { level });
                }
                levels.push(level as u8);
            }
        }
        Ok(Self {
            size_x,
            size_y,
            levels,
        })
    }

    /// The level of the quad at `(x, y)`; `x` in `-1..=size_x`, `y` in
    /// `-1..=size_y`.
    #[must_use]
    pub fn level(&self, x: i32, y: i32) -> u32 {
        let index = (y + 1) as usize * (self.size_x as usize + 2) + (x + 1) as usize;
        u32::from(self.levels[index])
    }

    /// Section width in quads (halo excluded).
    #[must_use]
    pub fn size_x(&self) -> u32 {
        self.size_x
    }

    /// Section height in quads (halo excluded).
    #[must_use]
    pub fn size_y(&self) -> u32 {
        self.size_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_thresholds() {
        assert_eq!(level_for_depth(0.0), 16);
        assert_eq!(level_for_depth(4095.9), 16);
        assert_eq!(level_for_depth(4096.0), 8);
        assert_eq!(level_for_depth(8192.0), 4);
        assert_eq!(level_for_depth(16384.0), 2);
        assert_eq!(level_for_depth(32768.0), 1);
        assert_eq!(level_for_depth(1.0e9), 1);
    }

    #[test]
    fn test_level_depth_sign_ignored() {
        // View conventions differ on which direction z grows; only the
        // magnitude matters.
        assert_eq!(level_for_depth(-5000.0), level_for_depth(5000.0));
    }

    #[test]
    fn test_halo_indexing() {
        let levels = TessellationLevels::from_fn(2, 1, |x, y| {
            if x < 0 || y < 0 || x >= 2 || y >= 1 {
                16
            } else {
                u32::from(x == 0) * 3 + 1 // quad (0, 0) -> 4, quad (1, 0) -> 1
            }
        })
        .unwrap();

        assert_eq!(levels.level(-1, 0), 16);
        assert_eq!(levels.level(0, -1), 16);
        assert_eq!(levels.level(2, 0), 16);
        assert_eq!(levels.level(0, 1), 16);
        assert_eq!(levels.level(0, 0), 4);
        assert_eq!(levels.level(1, 0), 1);
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let result = TessellationLevels::from_fn(1, 1, |_, _| 3);
        assert_eq!(result.unwrap_err(), TessError::LevelNotPowerOfTwo { level: 3 });
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert_eq!(
            TessellationLevels::from_fn(1, 1, |_, _| 0).unwrap_err(),
            TessError::LevelOutOfRange { level: 0 }
        );
        assert_eq!(
            TessellationLevels::from_fn(1, 1, |_, _| 32).unwrap_err(),
            TessError::LevelOutOfRange { level: 32 }
        );
    }
}
