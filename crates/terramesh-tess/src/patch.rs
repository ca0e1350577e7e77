//! Bicubic patch sampling.

/// Hard upper bound on the tessellation level of a single quad.
pub const MAX_TESSELLATION: u32 = 16;

/// A quad's 4x4 bicubic control neighborhood.
///
/// `heights[x][y]` holds the quantized height of the control vertex at
/// offset `(x - 1, y - 1)` from the quad's own vertex, so the quad spans the
/// interior `[1][1]..[2][2]` region and the outer ring supplies slope
/// continuity with the neighboring quads.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Patch {
    pub heights: [[f32; 4]; 4],
}

/// Samples a [`Patch`] at a fixed sub-step frequency.
///
/// Construction precomputes the four cubic blending weights (and their
/// derivatives) at every parametric position `step / max_tessellation`, using
/// the four-point cubic identity that interpolates through the inner control
/// points with Catmull-Rom slopes. By construction `basis[0] == [0, 1, 0, 0]`
/// and `basis[max] == [0, 0, 1, 0]`, so adjacent patches sample identical
/// boundary values.
#[derive(Debug, Clone)]
pub struct PatchSampler {
    cubic_basis: [[f32; 4]; MAX_TESSELLATION as usize + 1],
    cubic_basis_deriv: [[f32; 4]; MAX_TESSELLATION as usize + 1],
    max_tessellation: u32,
}

impl PatchSampler {
    /// Create a sampler for `max_tessellation` sub-steps per quad edge.
    ///
    /// `max_tessellation` must be in `1..=16`; sampling positions are
    /// `0..=max_tessellation` and out-of-range positions are a caller error.
    #[must_use]
    pub fn new(max_tessellation: u32) -> Self {
        debug_assert!((1..=MAX_TESSELLATION).contains(&max_tessellation));

        let mut cubic_basis = [[0.0; 4]; MAX_TESSELLATION as usize + 1];
        let mut cubic_basis_deriv = [[0.0; 4]; MAX_TESSELLATION as usize + 1];

        for step in 0..=max_tessellation as usize {
            let t = step as f32 / max_tessellation as f32;
            let (t2, t3) = (t * t, t * t * t);

            cubic_basis[step][0] = -0.5 * (t3 - 2.0 * t2 + t);
            cubic_basis[step][1] = (2.0 * t3 - 3.0 * t2 + 1.0) - 0.5 * (t3 - t2);
            cubic_basis[step][2] = (-2.0 * t3 + 3.0 * t2) + 0.5 * (t3 - 2.0 * t2 + t);
            cubic_basis[step][3] = 0.5 * (t3 - t2);

            cubic_basis_deriv[step][0] = 0.5 * (-1.0 + 4.0 * t - 3.0 * t2);
            cubic_basis_deriv[step][1] = -6.0 * t + 6.0 * t2 + 0.5 * (2.0 * t - 3.0 * t2);
            cubic_basis_deriv[step][2] = 6.0 * t - 6.0 * t2 + 0.5 * (1.0 - 4.0 * t + 3.0 * t2);
            cubic_basis_deriv[step][3] = 0.5 * (-2.0 * t + 3.0 * t2);
        }

        Self {
            cubic_basis,
            cubic_basis_deriv,
            max_tessellation,
        }
    }

    /// The number of sub-steps per quad edge this sampler was built for.
    #[must_use]
    pub fn max_tessellation(&self) -> u32 {
        self.max_tessellation
    }

    /// Sample the patch height at sub-position `(x, y)`.
    ///
    /// Separable bicubic evaluation: one cubic across the four
    /// column-interpolated values.
    #[must_use]
    pub fn sample(&self, patch: &Patch, x: u32, y: u32) -> f32 {
        let h = &patch.heights;
        self.cubic(
            [
                self.cubic([h[0][0], h[1][0], h[2][0], h[3][0]], x),
                self.cubic([h[0][1], h[1][1], h[2][1], h[3][1]], x),
                self.cubic([h[0][2], h[1][2], h[2][2], h[3][2]], x),
                self.cubic([h[0][3], h[1][3], h[2][3], h[3][3]], x),
            ],
            y,
        )
    }

    /// Sample dZ/dX at sub-position `(x, y)`.
    ///
    /// A bilinear blend of central differences of the control lattice rather
    /// than the analytic bicubic derivative, so the gradient (and with it,
    /// lighting) does not shift when a quad's tessellation level changes.
    #[must_use]
    pub fn sample_deriv_x(&self, patch: &Patch, x: u32, y: u32) -> f32 {
        let h = &patch.heights;
        let fx = x as f32 / self.max_tessellation as f32;
        let fy = y as f32 / self.max_tessellation as f32;
        lerp(
            lerp(h[2][1] - h[0][1], h[3][1] - h[1][1], fx),
            lerp(h[2][2] - h[0][2], h[3][2] - h[1][2], fx),
            fy,
        )
    }

    /// Sample dZ/dY at sub-position `(x, y)`.
    #[must_use]
    pub fn sample_deriv_y(&self, patch: &Patch, x: u32, y: u32) -> f32 {
        let h = &patch.heights;
        let fx = x as f32 / self.max_tessellation as f32;
        let fy = y as f32 / self.max_tessellation as f32;
        lerp(
            lerp(h[1][2] - h[1][0], h[2][2] - h[2][0], fx),
            lerp(h[1][3] - h[1][1], h[2][3] - h[2][1], fx),
            fy,
        )
    }

    fn cubic(&self, p: [f32; 4], step: u32) -> f32 {
        debug_assert!(step <= self.max_tessellation);
        let basis = &self.cubic_basis[step as usize];
        p[0] * basis[0] + p[1] * basis[1] + p[2] * basis[2] + p[3] * basis[3]
    }

    /// The cubic derivative weights at `step`, exposed for analytic slope
    /// evaluation of displacement-style curves.
    #[must_use]
    pub fn cubic_deriv(&self, p: [f32; 4], step: u32) -> f32 {
        debug_assert!(step <= self.max_tessellation);
        let basis = &self.cubic_basis_deriv[step as usize];
        p[0] * basis[0] + p[1] * basis[1] + p[2] * basis[2] + p[3] * basis[3]
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
