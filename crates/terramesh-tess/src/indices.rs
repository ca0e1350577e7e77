//! Crack-free index building for mixed-tessellation sections.
//!
//! Each quad in a section tessellates at its own power-of-two level. Where
//! neighboring quads differ, the finer quad stitches the shared edge with a
//! merge-swept triangle fan so no T-junctions are produced. Emission is
//! strictly two-pass: [`SmoothIndexBuilder::count_triangles`] sizes the
//! buffer with the exact logic of the emission pass, and a mismatch between
//! the two is a fatal logic error, not a recoverable condition.

use crate::MAX_TESSELLATION;
use crate::level::TessellationLevels;
use crate::vertex::vertex_count;

/// Builds the triangle index stream for one material batch of a section.
///
/// Borrows the per-quad tessellation level map (with its one-quad halo) and
/// the per-quad batch assignment; quads assigned to other batches are
/// skipped. Vertex indices address the section's smooth vertex buffer built
/// at `max_level`.
#[derive(Debug)]
pub struct SmoothIndexBuilder<'a> {
    size_x: u32,
    size_y: u32,
    max_level: u32,
    levels: &'a TessellationLevels,
    quad_batches: &'a [u32],
    batch: u32,
}

impl<'a> SmoothIndexBuilder<'a> {
    /// Create a builder for one batch of a section.
    ///
    /// `max_level` is the tessellation the section's smooth vertex buffer was
    /// built at this frame (power of two, `1..=16`); `quad_batches` assigns
    /// each of the section's `size_x * size_y` quads to a material batch.
    #[must_use]
    pub fn new(
        size_x: u32,
        size_y: u32,
        max_level: u32,
        levels: &'a TessellationLevels,
        quad_batches: &'a [u32],
        batch: u32,
    ) -> Self {
        debug_assert!(max_level.is_power_of_two() && max_level <= MAX_TESSELLATION);
        debug_assert_eq!(levels.size_x(), size_x);
        debug_assert_eq!(levels.size_y(), size_y);
        debug_assert_eq!(quad_batches.len(), (size_x * size_y) as usize);
        debug_assert!(size_x * max_level <= 255 && size_y * max_level <= 255);

        Self {
            size_x,
            size_y,
            max_level,
            levels,
            quad_batches,
            batch,
        }
    }

    /// Count the triangles emission will produce, without emitting.
    ///
    /// Per quad: a level-1 quad is two triangles; otherwise `2 * (L - 2)^2`
    /// interior triangles plus `L - 2 + min(L, neighbor)` per edge. The
    /// neighbor clamping here must stay identical to [`Self::build`] or the
    /// output buffer would be mis-sized.
    #[must_use]
    pub fn count_triangles(&self) -> usize {
        let mut triangles = 0;

        for y in 0..self.size_y {
            for x in 0..self.size_x {
                if self.quad_batches[(y * self.size_x + x) as usize] != self.batch {
                    continue;
                }

                let level = self.quad_level(x, y);
                if level == 1 {
                    // A level-1 quad always has a uniform clamped
                    // neighborhood, so it always takes the regular-grid path.
                    triangles += 2;
                    continue;
                }

                let interior = (level - 2) as usize;
                triangles += 2 * interior * interior;
                for neighbor in self.neighbor_levels(x, y) {
                    triangles += interior + level.min(neighbor) as usize;
                }
            }
        }

        triangles
    }

    /// Emit the batch's triangle index stream.
    ///
    /// The output length always equals `3 * count_triangles()`.
    #[must_use]
    pub fn build(&self) -> Vec<u16> {
        let count = self.count_triangles();
        let mut indices = Vec::with_capacity(count * 3);

        for y in 0..self.size_y {
            for x in 0..self.size_x {
                if self.quad_batches[(y * self.size_x + x) as usize] != self.batch {
                    continue;
                }

                let level = self.quad_level(x, y);
                let edges = self.neighbor_levels(x, y).map(|n| n.min(level));

                if edges.iter().all(|&edge| edge == level) {
                    self.emit_uniform_quad(&mut indices, x, y, level);
                } else {
                    self.emit_stitched_quad(&mut indices, x, y, level, edges);
                }
            }
        }

        // The prepass sized this buffer; disagreement means the emission
        // logic diverged and the stream cannot be trusted.
        assert_eq!(
            indices.len(),
            count * 3,
            "index emission produced {} indices where the prepass counted {}",
            indices.len(),
            count * 3,
        );
        indices
    }

    /// A quad's own level, bounded by the buffer tessellation.
    fn quad_level(&self, x: u32, y: u32) -> u32 {
        self.levels.level(x as i32, y as i32).min(self.max_level)
    }

    /// Raw neighbor levels in `[-x, +x, -y, +y]` order.
    fn neighbor_levels(&self, x: u32, y: u32) -> [u32; 4] {
        let (x, y) = (x as i32, y as i32);
        [
            self.levels.level(x - 1, y),
            self.levels.level(x + 1, y),
            self.levels.level(x, y - 1),
            self.levels.level(x, y + 1),
        ]
    }

    /// Index of the vertex at `interior` sub-position within patch
    /// `(patch_x, patch_y)` of the section's smooth vertex buffer.
    ///
    /// Interior coordinates of exactly `max_level` carry into the next patch
    /// over (at most one carry per axis), so edge walks address the
    /// neighboring patch's shared column/row seamlessly.
    fn vertex_index(&self, patch_x: u32, patch_y: u32, interior_x: u32, interior_y: u32) -> u16 {
        let (mut patch_x, mut patch_y) = (patch_x, patch_y);
        let (mut interior_x, mut interior_y) = (interior_x, interior_y);

        if interior_x >= self.max_level {
            interior_x -= self.max_level;
            patch_x += 1;
        }
        if interior_y >= self.max_level {
            interior_y -= self.max_level;
            patch_y += 1;
        }
        debug_assert!(interior_x < self.max_level && interior_y < self.max_level);

        // Interior patches pack max_level^2 vertices; patches on the
        // section's right/bottom edge only carry their first column/row.
        let column_stride = self.max_level * self.max_level;
        let row_stride = self.size_x * column_stride + self.max_level;

        let index = patch_y * row_stride
            + patch_x
                * if patch_y < self.size_y {
                    column_stride
                } else {
                    self.max_level
                }
            + interior_y * if patch_x < self.size_x { self.max_level } else { 1 }
            + interior_x;

        debug_assert!(
            (index as usize) < vertex_count(self.size_x, self.size_y, self.max_level),
            "vertex index {index} out of bounds"
        );
        index as u16
    }

    /// Fast path: uniform clamped neighborhood, regular grid of
    /// `2 * level^2` triangles.
    ///
    /// A two-row rolling cache holds the previous row's indices so each
    /// vertex index is derived once; within a patch row consecutive columns
    /// are `factor` apart in the buffer.
    fn emit_uniform_quad(&self, out: &mut Vec<u16>, x: u32, y: u32, level: u32) {
        let factor = self.max_level / level;
        let l = level as usize;

        let mut cache = [[0u16; MAX_TESSELLATION as usize + 1]; 2];
        let mut next = 1;

        cache[0][0] = self.vertex_index(x, y, 0, 0);
        for sub_x in 1..l {
            cache[0][sub_x] = cache[0][sub_x - 1] + factor as u16;
        }
        cache[0][l] = self.vertex_index(x + 1, y, 0, 0);

        for sub_y in 0..level {
            cache[next][0] = self.vertex_index(x, y, 0, (sub_y + 1) * factor);
            for sub_x in 1..l {
                cache[next][sub_x] = cache[next][sub_x - 1] + factor as u16;
            }
            cache[next][l] = self.vertex_index(x + 1, y, 0, (sub_y + 1) * factor);

            for sub_x in 0..l {
                let v00 = cache[1 - next][sub_x];
                let v10 = cache[1 - next][sub_x + 1];
                let v01 = cache[next][sub_x];
                let v11 = cache[next][sub_x + 1];

                out.extend([v00, v01, v11]);
                out.extend([v00, v11, v10]);
            }

            next = 1 - next;
        }
    }

    /// General path: interior grid excluding a one-sub-step border, then a
    /// stitched strip per edge at `min(level, neighbor)`.
    fn emit_stitched_quad(&self, out: &mut Vec<u16>, x: u32, y: u32, level: u32, edges: [u32; 4]) {
        debug_assert!(level >= 2);
        let factor = self.max_level / level;
        let max = self.max_level;

        for sub_x in 1..level - 1 {
            for sub_y in 1..level - 1 {
                let v00 = self.vertex_index(x, y, sub_x * factor, sub_y * factor);
                let v10 = self.vertex_index(x, y, (sub_x + 1) * factor, sub_y * factor);
                let v01 = self.vertex_index(x, y, sub_x * factor, (sub_y + 1) * factor);
                let v11 = self.vertex_index(x, y, (sub_x + 1) * factor, (sub_y + 1) * factor);

                out.extend([v00, v01, v11]);
                out.extend([v00, v11, v10]);
            }
        }

        let [neg_x, pos_x, neg_y, pos_y] = edges;
        self.tessellate_edge(out, neg_x, level, (x, y), (x, y), (0, 0), (factor, factor), (0, 1), 0);
        self.tessellate_edge(
            out,
            pos_x,
            level,
            (x, y),
            (x + 1, y),
            (0, 0),
            (max - factor, factor),
            (0, 1),
            1,
        );
        self.tessellate_edge(out, neg_y, level, (x, y), (x, y), (0, 0), (factor, factor), (1, 0), 1);
        self.tessellate_edge(
            out,
            pos_y,
            level,
            (x, y),
            (x, y + 1),
            (0, 0),
            (factor, max - factor),
            (1, 0),
            0,
        );
    }

    /// Stitch one edge: reconcile `edge_level + 1` evenly spaced vertices on
    /// the shared edge with the `level - 1` interior-adjacent vertices one
    /// sub-step inside the quad.
    ///
    /// Two cursors sweep the edge and inner vertex runs; the one whose
    /// normalized position is smaller advances, comparing
    /// `edge_index * (level - 1)` against `(inner_index + 1) * edge_level`
    /// as cross-multiplied integers. `vertex_order` flips the two same-side
    /// vertices for edges traversed in reverse, keeping winding uniform.
    #[allow(clippy::too_many_arguments)]
    fn tessellate_edge(
        &self,
        out: &mut Vec<u16>,
        edge_level: u32,
        level: u32,
        (x, y): (u32, u32),
        (edge_x, edge_y): (u32, u32),
        (edge_origin_x, edge_origin_y): (u32, u32),
        (inner_origin_x, inner_origin_y): (u32, u32),
        (delta_x, delta_y): (u32, u32),
        vertex_order: u32,
    ) {
        debug_assert!(edge_level <= level && level >= 2);

        let mut edge_vertices = [0u16; MAX_TESSELLATION as usize + 1];
        let mut inner_vertices = [0u16; MAX_TESSELLATION as usize - 1];

        for i in 0..=edge_level {
            edge_vertices[i as usize] = self.vertex_index(
                edge_x,
                edge_y,
                edge_origin_x + i * delta_x * self.max_level / edge_level,
                edge_origin_y + i * delta_y * self.max_level / edge_level,
            );
        }
        for i in 1..level {
            inner_vertices[(i - 1) as usize] = self.vertex_index(
                x,
                y,
                inner_origin_x + (i - 1) * delta_x * self.max_level / level,
                inner_origin_y + (i - 1) * delta_y * self.max_level / level,
            );
        }

        let mut edge_index = 0;
        let mut inner_index = 0;
        while edge_index < edge_level || inner_index < level - 2 {
            let edge_position = edge_index * (level - 1);
            let inner_position = (inner_index + 1) * edge_level;

            if edge_position < inner_position {
                debug_assert!(edge_index < edge_level);
                edge_index += 1;
                out.push(edge_vertices[(edge_index - (1 - vertex_order)) as usize]);
                out.push(edge_vertices[(edge_index - vertex_order) as usize]);
                out.push(inner_vertices[inner_index as usize]);
            } else {
                debug_assert!(inner_index < level - 2);
                inner_index += 1;
                out.push(inner_vertices[(inner_index - vertex_order) as usize]);
                out.push(inner_vertices[(inner_index - (1 - vertex_order)) as usize]);
                out.push(edge_vertices[edge_index as usize]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const POWERS: [u32; 5] = [1, 2, 4, 8, 16];

    /// Grid position of every vertex in emission order, mirroring the layout
    /// `build_section_vertices` produces.
    fn vertex_positions(size_x: u32, size_y: u32, t: u32) -> Vec<(u32, u32)> {
        let mut positions = Vec::new();
        for y in 0..=size_y {
            for x in 0..=size_x {
                let steps_y = if y < size_y { t } else { 1 };
                let steps_x = if x < size_x { t } else { 1 };
                for sub_y in 0..steps_y {
                    for sub_x in 0..steps_x {
                        positions.push((x * t + sub_x, y * t + sub_y));
                    }
                }
            }
        }
        positions
    }

    fn uniform_levels(size_x: u32, size_y: u32, level: u32) -> TessellationLevels {
        TessellationLevels::from_fn(size_x, size_y, |_, _| level).unwrap()
    }

    /// Twice the signed area of a triangle in grid units.
    fn signed_area_doubled(positions: &[(u32, u32)], triangle: &[u16]) -> i64 {
        let p = |i: u16| {
            let (x, y) = positions[i as usize];
            (i64::from(x), i64::from(y))
        };
        let (ax, ay) = p(triangle[0]);
        let (bx, by) = p(triangle[1]);
        let (cx, cy) = p(triangle[2]);
        (bx - ax) * (cy - ay) - (by - ay) * (cx - ax)
    }

    #[test]
    fn test_uniform_quad_counts() {
        // A single quad with a uniform neighborhood is a regular grid of
        // 2 * level^2 triangles at every level.
        for &level in &POWERS {
            let levels = uniform_levels(1, 1, level);
            let batches = [0];
            let builder = SmoothIndexBuilder::new(1, 1, 16, &levels, &batches, 0);

            let count = builder.count_triangles();
            assert_eq!(count, (2 * level * level) as usize, "level {level}");

            let indices = builder.build();
            assert_eq!(indices.len(), count * 3);

            let max = vertex_count(1, 1, 16);
            assert!(indices.iter().all(|&i| (i as usize) < max));
        }
    }

    #[test]
    fn test_other_batch_emits_nothing() {
        let levels = uniform_levels(2, 2, 4);
        let batches = [0, 0, 0, 0];
        let builder = SmoothIndexBuilder::new(2, 2, 16, &levels, &batches, 1);
        assert_eq!(builder.count_triangles(), 0);
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_stitched_quad_count_formula() {
        // Quad (0, 0) at level 4 with its +x neighbor at level 2: interior
        // 2 * (4-2)^2 = 8, three full edges at 2 + 4 = 6, the clamped edge at
        // 2 + 2 = 4.
        let levels = TessellationLevels::from_fn(2, 1, |x, y| match (x, y) {
            (0, 0) => 4,
            (1, 0) => 2,
            _ => 16,
        })
        .unwrap();
        let batches = [0, 1];
        let builder = SmoothIndexBuilder::new(2, 1, 16, &levels, &batches, 0);
        assert_eq!(builder.count_triangles(), 8 + 6 * 3 + 4);
        assert_eq!(builder.build().len(), (8 + 6 * 3 + 4) * 3);
    }

    #[test]
    fn test_adjacent_quads_agree_on_shared_edge() {
        // Property: for every level pair, both quads reference exactly the
        // same min(la, lb) + 1 vertices along their shared edge, and no
        // others on that column.
        let positions = vertex_positions(2, 1, 16);

        for &la in &POWERS {
            for &lb in &POWERS {
                let levels = TessellationLevels::from_fn(2, 1, |x, y| match (x, y) {
                    (0, 0) => la,
                    (1, 0) => lb,
                    _ => 16,
                })
                .unwrap();
                let batches = [0, 1];

                let edge_sets: Vec<BTreeSet<u16>> = (0..2)
                    .map(|batch| {
                        SmoothIndexBuilder::new(2, 1, 16, &levels, &batches, batch)
                            .build()
                            .into_iter()
                            .filter(|&i| positions[i as usize].0 == 16)
                            .collect()
                    })
                    .collect();

                assert_eq!(edge_sets[0], edge_sets[1], "la={la} lb={lb}");
                assert_eq!(
                    edge_sets[0].len() as u32,
                    la.min(lb) + 1,
                    "la={la} lb={lb}"
                );
            }
        }
    }

    #[test]
    fn test_winding_and_coverage_mixed_levels() {
        // On a flat field every triangle from every path (fast, interior,
        // all four edge orientations) must wind the same way, and together
        // they must tile the section exactly.
        let levels = TessellationLevels::from_fn(2, 2, |x, y| match (x, y) {
            (0, 0) => 4,
            (1, 0) => 2,
            (0, 1) => 1,
            (1, 1) => 8,
            _ => 16,
        })
        .unwrap();
        let batches = [0, 0, 0, 0];
        let builder = SmoothIndexBuilder::new(2, 2, 16, &levels, &batches, 0);
        let indices = builder.build();
        let positions = vertex_positions(2, 2, 16);

        let mut doubled_area = 0i64;
        for triangle in indices.chunks(3) {
            let area = signed_area_doubled(&positions, triangle);
            assert!(area < 0, "inverted or degenerate triangle {triangle:?}");
            doubled_area += -area;
        }
        // Total area is the whole 32x32 sub-step grid.
        assert_eq!(doubled_area, 2 * 32 * 32);
    }

    #[test]
    fn test_forced_coarse_corner_scenario() {
        // 4x4 section, all quads at level 4 except the top-left forced to 1
        // (a distant camera corner). The forced quad keeps the fast path
        // (its clamped neighborhood is uniform at 1); its two in-section
        // neighbors stitch against it on one edge each; the other 13 quads
        // are regular grids.
        let levels = TessellationLevels::from_fn(4, 4, |x, y| {
            if (x, y) == (0, 0) { 1 } else { 4 }
        })
        .unwrap();

        // One batch per quad exposes the per-quad triangle distribution.
        let batches: Vec<u32> = (0..16).collect();
        let mut per_quad = Vec::new();
        for batch in 0..16 {
            let builder = SmoothIndexBuilder::new(4, 4, 4, &levels, &batches, batch);
            let indices = builder.build();
            assert_eq!(indices.len(), builder.count_triangles() * 3);
            per_quad.push(indices.len() / 3);
        }

        // Forced quad: 2. Its +x and +y neighbors: 2*(4-2)^2 interior plus
        // edges (2+1) + (2+4)*3 = 21, so 29. Everything else: 2*4^2 = 32.
        assert_eq!(per_quad[0], 2);
        assert_eq!(per_quad[1], 29);
        assert_eq!(per_quad[4], 29);
        let uniform_quads = [2, 3, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
        for quad in uniform_quads {
            assert_eq!(per_quad[quad], 32, "quad {quad}");
        }
        assert_eq!(per_quad.iter().sum::<usize>(), 2 + 29 * 2 + 13 * 32);

        // A single batch over the whole section emits the same total.
        let single = vec![0u32; 16];
        let builder = SmoothIndexBuilder::new(4, 4, 4, &levels, &single, 0);
        assert_eq!(builder.count_triangles(), 2 + 29 * 2 + 13 * 32);
    }

    proptest! {
        #[test]
        fn prop_count_matches_emission_and_tiles(
            size_x in 1u32..=3,
            size_y in 1u32..=3,
            max_exp in 2u32..=4,
            level_exps in prop::collection::vec(0u32..=4, 25),
            batch_picks in prop::collection::vec(0u32..=1, 9),
        ) {
            let max_level = 1 << max_exp;
            let levels = TessellationLevels::from_fn(size_x, size_y, |x, y| {
                let index = ((y + 1) as usize * (size_x as usize + 2) + (x + 1) as usize)
                    % level_exps.len();
                1 << level_exps[index]
            })
            .unwrap();

            let quad_count = (size_x * size_y) as usize;
            let batches: Vec<u32> = (0..quad_count)
                .map(|i| batch_picks[i % batch_picks.len()])
                .collect();

            let positions = vertex_positions(size_x, size_y, max_level);
            let vertices = vertex_count(size_x, size_y, max_level);
            let mut doubled_area = 0i64;

            for batch in 0..=1 {
                let builder =
                    SmoothIndexBuilder::new(size_x, size_y, max_level, &levels, &batches, batch);
                let count = builder.count_triangles();
                let indices = builder.build();

                prop_assert_eq!(indices.len(), count * 3);
                prop_assert!(indices.iter().all(|&i| (i as usize) < vertices));

                for triangle in indices.chunks(3) {
                    let area = signed_area_doubled(&positions, triangle);
                    prop_assert!(area < 0);
                    doubled_area += -area;
                }
            }

            // Both batches together tile the section exactly.
            let expected = 2 * i64::from(size_x * max_level) * i64::from(size_y * max_level);
            prop_assert_eq!(doubled_area, expected);
        }
    }
}
