//! Uniform grids: cell-centered scalars and staggered (MAC) velocities.
//!
//! Staggered layout:
//! - u (horizontal velocity) on vertical faces, size (width+1) * height
//! - v (vertical velocity) on horizontal faces, size width * (height+1)
//! - scalars at cell centers, size width * height
//!
//! All world-space sampling clamps to the valid sample domain, so samplers
//! never read out of bounds no matter how far outside the query point is.

use glam::DVec2;

use crate::field::{ScalarField, VectorField};

/// Monotonic Catmull-Rom interpolation over four samples.
///
/// Slopes are clamped so the result never overshoots the neighborhood,
/// which keeps sharp fronts free of ringing.
#[inline]
pub fn monotonic_catmull_rom(f0: f64, f1: f64, f2: f64, f3: f64, t: f64) -> f64 {
    let mut d1 = 0.5 * (f2 - f0);
    let mut d2 = 0.5 * (f3 - f1);
    let delta = f2 - f1;

    if delta.abs() < f64::EPSILON {
        d1 = 0.0;
        d2 = 0.0;
    } else {
        if delta * d1 < 0.0 {
            d1 = 0.0;
        }
        if delta * d2 < 0.0 {
            d2 = 0.0;
        }
    }

    let a3 = d1 + d2 - 2.0 * delta;
    let a2 = 3.0 * delta - 2.0 * d1 - d2;

    f1 + t * (d1 + t * (a2 + t * a3))
}

/// Bilinear weights for a clamped normalized coordinate.
///
/// Returns the lower index pair, the clamped upper index pair, and the
/// fractional offsets.
#[inline]
fn clamped_lerp_coords(x: f64, y: f64, nx: usize, ny: usize) -> (usize, usize, usize, usize, f64, f64) {
    let max_x = (nx as f64 - 1.0).max(0.0);
    let max_y = (ny as f64 - 1.0).max(0.0);
    let cx = x.clamp(0.0, max_x);
    let cy = y.clamp(0.0, max_y);

    let i0 = cx.floor() as usize;
    let j0 = cy.floor() as usize;
    let i1 = (i0 + 1).min(nx.saturating_sub(1));
    let j1 = (j0 + 1).min(ny.saturating_sub(1));

    (i0, j0, i1, j1, cx - i0 as f64, cy - j0 as f64)
}

/// Monotonic cubic interpolation over a flat row-major array at a clamped
/// normalized coordinate.
fn sample_cubic_flat(data: &[f64], nx: usize, ny: usize, x: f64, y: f64) -> f64 {
    let max_x = (nx as f64 - 1.0).max(0.0);
    let max_y = (ny as f64 - 1.0).max(0.0);
    let cx = x.clamp(0.0, max_x);
    let cy = y.clamp(0.0, max_y);

    let i = (cx.floor() as usize).min(nx.saturating_sub(1));
    let j = (cy.floor() as usize).min(ny.saturating_sub(1));
    let fx = cx - i as f64;
    let fy = cy - j as f64;

    let clamp_i = |ii: i64| -> usize { ii.clamp(0, nx as i64 - 1) as usize };
    let clamp_j = |jj: i64| -> usize { jj.clamp(0, ny as i64 - 1) as usize };

    let mut rows = [0.0; 4];
    for (r, row) in rows.iter_mut().enumerate() {
        let jj = clamp_j(j as i64 + r as i64 - 1);
        let f0 = data[jj * nx + clamp_i(i as i64 - 1)];
        let f1 = data[jj * nx + i];
        let f2 = data[jj * nx + clamp_i(i as i64 + 1)];
        let f3 = data[jj * nx + clamp_i(i as i64 + 2)];
        *row = monotonic_catmull_rom(f0, f1, f2, f3, fx);
    }

    monotonic_catmull_rom(rows[0], rows[1], rows[2], rows[3], fy)
}

/// Bilinear interpolation over a flat row-major array at a clamped
/// normalized coordinate.
#[inline]
fn sample_linear_flat(data: &[f64], nx: usize, ny: usize, x: f64, y: f64) -> f64 {
    let (i0, j0, i1, j1, fx, fy) = clamped_lerp_coords(x, y, nx, ny);
    let f00 = data[j0 * nx + i0];
    let f10 = data[j0 * nx + i1];
    let f01 = data[j1 * nx + i0];
    let f11 = data[j1 * nx + i1];
    (1.0 - fx) * (1.0 - fy) * f00
        + fx * (1.0 - fy) * f10
        + (1.0 - fx) * fy * f01
        + fx * fy * f11
}

// ============================================================================
// SCALAR GRID
// ============================================================================

/// Cell-centered scalar grid.
#[derive(Clone, Debug)]
pub struct ScalarGrid {
    pub width: usize,
    pub height: usize,
    /// World-space position of the grid's lower-left corner.
    pub origin: DVec2,
    /// Cell size per axis, strictly positive.
    pub spacing: DVec2,
    /// Cell values, row-major, size width * height.
    pub data: Vec<f64>,
}

impl ScalarGrid {
    /// Create a grid filled with zeros.
    pub fn new(width: usize, height: usize, spacing: DVec2, origin: DVec2) -> Self {
        Self::with_value(width, height, spacing, origin, 0.0)
    }

    /// Create a grid filled with `value`.
    pub fn with_value(
        width: usize,
        height: usize,
        spacing: DVec2,
        origin: DVec2,
        value: f64,
    ) -> Self {
        assert!(
            spacing.x > 0.0 && spacing.y > 0.0,
            "grid spacing must be positive, got ({}, {})",
            spacing.x,
            spacing.y
        );
        Self {
            width,
            height,
            origin,
            spacing,
            data: vec![value; width * height],
        }
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.width && j < self.height);
        j * self.width + i
    }

    /// World-space position of the (i, j) sample point (cell center).
    #[inline]
    pub fn data_position(&self, i: usize, j: usize) -> DVec2 {
        self.origin
            + DVec2::new(
                (i as f64 + 0.5) * self.spacing.x,
                (j as f64 + 0.5) * self.spacing.y,
            )
    }

    #[inline]
    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.data[j * self.width + i]
    }

    #[inline]
    pub fn at_mut(&mut self, i: usize, j: usize) -> &mut f64 {
        &mut self.data[j * self.width + i]
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Fill every cell from a position-dependent function.
    pub fn fill_with(&mut self, f: impl Fn(DVec2) -> f64) {
        for j in 0..self.height {
            for i in 0..self.width {
                self.data[j * self.width + i] = f(self.data_position(i, j));
            }
        }
    }

    /// Reallocate for a new resolution, dropping old content.
    pub fn resize(&mut self, width: usize, height: usize, spacing: DVec2, origin: DVec2) {
        assert!(
            spacing.x > 0.0 && spacing.y > 0.0,
            "grid spacing must be positive, got ({}, {})",
            spacing.x,
            spacing.y
        );
        self.width = width;
        self.height = height;
        self.spacing = spacing;
        self.origin = origin;
        self.data.clear();
        self.data.resize(width * height, 0.0);
    }

    #[inline]
    fn normalize(&self, point: DVec2) -> (f64, f64) {
        (
            (point.x - self.origin.x) / self.spacing.x - 0.5,
            (point.y - self.origin.y) / self.spacing.y - 0.5,
        )
    }

    /// Bilinear sample clamped to the grid.
    pub fn sample(&self, point: DVec2) -> f64 {
        let (x, y) = self.normalize(point);
        sample_linear_flat(&self.data, self.width, self.height, x, y)
    }

    /// Monotonic cubic sample clamped to the grid.
    pub fn sample_cubic(&self, point: DVec2) -> f64 {
        let (x, y) = self.normalize(point);
        sample_cubic_flat(&self.data, self.width, self.height, x, y)
    }

    /// Central-difference gradient at a sample point, one-sided at borders.
    pub fn gradient_at_data_point(&self, i: usize, j: usize) -> DVec2 {
        let ip = (i + 1).min(self.width - 1);
        let im = i.saturating_sub(1);
        let jp = (j + 1).min(self.height - 1);
        let jm = j.saturating_sub(1);

        let dx = (self.at(ip, j) - self.at(im, j)) / ((ip - im).max(1) as f64 * self.spacing.x);
        let dy = (self.at(i, jp) - self.at(i, jm)) / ((jp - jm).max(1) as f64 * self.spacing.y);
        DVec2::new(dx, dy)
    }

    /// Bilinear blend of the four surrounding data-point gradients.
    pub fn gradient(&self, point: DVec2) -> DVec2 {
        let (x, y) = self.normalize(point);
        let (i0, j0, i1, j1, fx, fy) = clamped_lerp_coords(x, y, self.width, self.height);
        (1.0 - fx) * (1.0 - fy) * self.gradient_at_data_point(i0, j0)
            + fx * (1.0 - fy) * self.gradient_at_data_point(i1, j0)
            + (1.0 - fx) * fy * self.gradient_at_data_point(i0, j1)
            + fx * fy * self.gradient_at_data_point(i1, j1)
    }
}

impl ScalarField for ScalarGrid {
    #[inline]
    fn sample(&self, point: DVec2) -> f64 {
        ScalarGrid::sample(self, point)
    }
}

// ============================================================================
// FACE-CENTERED (MAC) GRID
// ============================================================================

/// Staggered velocity grid.
#[derive(Clone, Debug)]
pub struct FaceCenteredGrid {
    pub width: usize,
    pub height: usize,
    /// World-space position of the grid's lower-left corner.
    pub origin: DVec2,
    /// Cell size per axis, strictly positive.
    pub spacing: DVec2,
    /// Horizontal velocity on vertical faces, size (width+1) * height.
    pub u: Vec<f64>,
    /// Vertical velocity on horizontal faces, size width * (height+1).
    pub v: Vec<f64>,
}

impl FaceCenteredGrid {
    pub fn new(width: usize, height: usize, spacing: DVec2, origin: DVec2) -> Self {
        assert!(
            spacing.x > 0.0 && spacing.y > 0.0,
            "grid spacing must be positive, got ({}, {})",
            spacing.x,
            spacing.y
        );
        Self {
            width,
            height,
            origin,
            spacing,
            u: vec![0.0; (width + 1) * height],
            v: vec![0.0; width * (height + 1)],
        }
    }

    #[inline]
    pub fn u_index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i <= self.width && j < self.height);
        j * (self.width + 1) + i
    }

    #[inline]
    pub fn v_index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.width && j <= self.height);
        j * self.width + i
    }

    #[inline]
    pub fn u_at(&self, i: usize, j: usize) -> f64 {
        self.u[j * (self.width + 1) + i]
    }

    #[inline]
    pub fn u_at_mut(&mut self, i: usize, j: usize) -> &mut f64 {
        &mut self.u[j * (self.width + 1) + i]
    }

    #[inline]
    pub fn v_at(&self, i: usize, j: usize) -> f64 {
        self.v[j * self.width + i]
    }

    #[inline]
    pub fn v_at_mut(&mut self, i: usize, j: usize) -> &mut f64 {
        &mut self.v[j * self.width + i]
    }

    /// World-space position of the (i, j) u-sample (vertical face center).
    #[inline]
    pub fn u_position(&self, i: usize, j: usize) -> DVec2 {
        self.origin + DVec2::new(i as f64 * self.spacing.x, (j as f64 + 0.5) * self.spacing.y)
    }

    /// World-space position of the (i, j) v-sample (horizontal face center).
    #[inline]
    pub fn v_position(&self, i: usize, j: usize) -> DVec2 {
        self.origin + DVec2::new((i as f64 + 0.5) * self.spacing.x, j as f64 * self.spacing.y)
    }

    /// World-space position of the (i, j) cell center.
    #[inline]
    pub fn cell_center_position(&self, i: usize, j: usize) -> DVec2 {
        self.origin
            + DVec2::new(
                (i as f64 + 0.5) * self.spacing.x,
                (j as f64 + 0.5) * self.spacing.y,
            )
    }

    pub fn fill(&mut self, value: DVec2) {
        self.u.fill(value.x);
        self.v.fill(value.y);
    }

    pub fn clear(&mut self) {
        self.u.fill(0.0);
        self.v.fill(0.0);
    }

    /// Reallocate for a new resolution, dropping old content.
    pub fn resize(&mut self, width: usize, height: usize, spacing: DVec2, origin: DVec2) {
        assert!(
            spacing.x > 0.0 && spacing.y > 0.0,
            "grid spacing must be positive, got ({}, {})",
            spacing.x,
            spacing.y
        );
        self.width = width;
        self.height = height;
        self.spacing = spacing;
        self.origin = origin;
        self.u.clear();
        self.u.resize((width + 1) * height, 0.0);
        self.v.clear();
        self.v.resize(width * (height + 1), 0.0);
    }

    /// Bilinear u sample clamped to the grid.
    pub fn sample_u(&self, point: DVec2) -> f64 {
        let x = (point.x - self.origin.x) / self.spacing.x;
        let y = (point.y - self.origin.y) / self.spacing.y - 0.5;
        sample_linear_flat(&self.u, self.width + 1, self.height, x, y)
    }

    /// Bilinear v sample clamped to the grid.
    pub fn sample_v(&self, point: DVec2) -> f64 {
        let x = (point.x - self.origin.x) / self.spacing.x - 0.5;
        let y = (point.y - self.origin.y) / self.spacing.y;
        sample_linear_flat(&self.v, self.width, self.height + 1, x, y)
    }

    /// Bilinear velocity sample clamped to the grid.
    pub fn sample(&self, point: DVec2) -> DVec2 {
        DVec2::new(self.sample_u(point), self.sample_v(point))
    }

    /// Monotonic cubic velocity sample clamped to the grid.
    pub fn sample_cubic(&self, point: DVec2) -> DVec2 {
        let xu = (point.x - self.origin.x) / self.spacing.x;
        let yu = (point.y - self.origin.y) / self.spacing.y - 0.5;
        let xv = (point.x - self.origin.x) / self.spacing.x - 0.5;
        let yv = (point.y - self.origin.y) / self.spacing.y;
        DVec2::new(
            sample_cubic_flat(&self.u, self.width + 1, self.height, xu, yu),
            sample_cubic_flat(&self.v, self.width, self.height + 1, xv, yv),
        )
    }

    /// Velocity averaged to the (i, j) cell center.
    #[inline]
    pub fn value_at_cell_center(&self, i: usize, j: usize) -> DVec2 {
        DVec2::new(
            0.5 * (self.u_at(i, j) + self.u_at(i + 1, j)),
            0.5 * (self.v_at(i, j) + self.v_at(i, j + 1)),
        )
    }

    /// Discrete divergence at the (i, j) cell.
    #[inline]
    pub fn divergence_at_cell(&self, i: usize, j: usize) -> f64 {
        (self.u_at(i + 1, j) - self.u_at(i, j)) / self.spacing.x
            + (self.v_at(i, j + 1) - self.v_at(i, j)) / self.spacing.y
    }
}

impl VectorField for FaceCenteredGrid {
    #[inline]
    fn sample(&self, point: DVec2) -> DVec2 {
        FaceCenteredGrid::sample(self, point)
    }
}

/// Propagate valid samples into invalid cells, one 4-neighbor layer per
/// iteration.
///
/// An invalid cell takes the average of its valid neighbors and becomes
/// valid for the next layer. Values of cells valid on entry never change.
pub fn extrapolate_to_region(
    data: &mut [f64],
    valid: &[bool],
    width: usize,
    height: usize,
    number_of_iterations: u32,
) {
    assert_eq!(data.len(), width * height);
    assert_eq!(valid.len(), width * height);

    let mut valid0 = valid.to_vec();
    let mut valid1 = valid.to_vec();

    for _ in 0..number_of_iterations {
        for j in 0..height {
            for i in 0..width {
                let idx = j * width + i;
                if valid0[idx] {
                    continue;
                }

                let mut sum = 0.0;
                let mut count = 0;
                if i + 1 < width && valid0[idx + 1] {
                    sum += data[idx + 1];
                    count += 1;
                }
                if i > 0 && valid0[idx - 1] {
                    sum += data[idx - 1];
                    count += 1;
                }
                if j + 1 < height && valid0[idx + width] {
                    sum += data[idx + width];
                    count += 1;
                }
                if j > 0 && valid0[idx - width] {
                    sum += data[idx - width];
                    count += 1;
                }

                if count > 0 {
                    data[idx] = sum / count as f64;
                    valid1[idx] = true;
                }
            }
        }
        valid0.copy_from_slice(&valid1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_grid_positions_and_indexing() {
        let grid = ScalarGrid::new(4, 3, DVec2::new(0.5, 0.25), DVec2::new(1.0, 2.0));
        assert_eq!(grid.data.len(), 12);
        assert_eq!(grid.data_position(0, 0), DVec2::new(1.25, 2.125));
        assert_eq!(grid.data_position(3, 2), DVec2::new(2.75, 2.625));
        assert_eq!(grid.idx(3, 2), 11);
    }

    #[test]
    #[should_panic(expected = "grid spacing must be positive, got (0, 1)")]
    fn zero_spacing_is_rejected() {
        let _ = ScalarGrid::new(4, 4, DVec2::new(0.0, 1.0), DVec2::ZERO);
    }

    #[test]
    fn bilinear_sample_reproduces_linear_field() {
        let mut grid = ScalarGrid::new(8, 8, DVec2::splat(1.0), DVec2::ZERO);
        grid.fill_with(|p| 2.0 * p.x - p.y);

        // Exact for linear fields away from the clamped border.
        let p = DVec2::new(3.3, 4.7);
        assert!((grid.sample(p) - (2.0 * p.x - p.y)).abs() < 1e-12);
    }

    #[test]
    fn sample_clamps_outside_the_domain() {
        let mut grid = ScalarGrid::new(4, 4, DVec2::splat(1.0), DVec2::ZERO);
        grid.fill_with(|p| p.x);
        let far = grid.sample(DVec2::new(100.0, 100.0));
        assert!((far - grid.at(3, 3)).abs() < 1e-12);
        let near = grid.sample(DVec2::new(-50.0, -50.0));
        assert!((near - grid.at(0, 0)).abs() < 1e-12);
    }

    #[test]
    fn cubic_sample_does_not_overshoot_a_step() {
        let mut grid = ScalarGrid::new(16, 4, DVec2::splat(1.0), DVec2::ZERO);
        grid.fill_with(|p| if p.x < 8.0 { 0.0 } else { 1.0 });

        // Sweep across the step; monotonic cubic must stay inside [0, 1].
        for k in 0..200 {
            let x = 4.0 + 8.0 * (k as f64 / 199.0);
            let value = grid.sample_cubic(DVec2::new(x, 2.0));
            assert!(
                (-1e-12..=1.0 + 1e-12).contains(&value),
                "overshoot at x = {}: {}",
                x,
                value
            );
        }
    }

    #[test]
    fn face_grid_divergence_of_linear_velocity() {
        let mut grid = FaceCenteredGrid::new(6, 6, DVec2::splat(0.5), DVec2::ZERO);
        // u = x, v = -y has zero divergence.
        for j in 0..grid.height {
            for i in 0..=grid.width {
                let p = grid.u_position(i, j);
                *grid.u_at_mut(i, j) = p.x;
            }
        }
        for j in 0..=grid.height {
            for i in 0..grid.width {
                let p = grid.v_position(i, j);
                *grid.v_at_mut(i, j) = -p.y;
            }
        }
        for j in 0..grid.height {
            for i in 0..grid.width {
                assert!(grid.divergence_at_cell(i, j).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn face_grid_sampling_matches_face_values() {
        let mut grid = FaceCenteredGrid::new(4, 4, DVec2::splat(1.0), DVec2::ZERO);
        *grid.u_at_mut(2, 1) = 3.0;
        // Sampling exactly at the face position returns the stored value.
        let p = grid.u_position(2, 1);
        assert!((grid.sample_u(p) - 3.0).abs() < 1e-12);
        assert!((grid.sample(p).x - 3.0).abs() < 1e-12);
    }

    #[test]
    fn cell_center_average() {
        let mut grid = FaceCenteredGrid::new(2, 2, DVec2::splat(1.0), DVec2::ZERO);
        *grid.u_at_mut(0, 0) = 1.0;
        *grid.u_at_mut(1, 0) = 3.0;
        *grid.v_at_mut(0, 0) = -2.0;
        *grid.v_at_mut(0, 1) = 4.0;
        assert_eq!(grid.value_at_cell_center(0, 0), DVec2::new(2.0, 1.0));
    }

    #[test]
    fn gradient_of_linear_field_is_constant() {
        let mut grid = ScalarGrid::new(8, 8, DVec2::splat(0.5), DVec2::ZERO);
        grid.fill_with(|p| 3.0 * p.x - 2.0 * p.y);
        let g = grid.gradient(DVec2::new(1.7, 2.1));
        assert!((g - DVec2::new(3.0, -2.0)).length() < 1e-12);
    }

    #[test]
    fn extrapolation_fills_one_layer_per_iteration() {
        // Single valid cell in the middle of a 5x1 strip.
        let mut data = vec![0.0, 0.0, 7.0, 0.0, 0.0];
        let valid = vec![false, false, true, false, false];

        extrapolate_to_region(&mut data, &valid, 5, 1, 1);
        assert_eq!(data, vec![0.0, 7.0, 7.0, 7.0, 0.0]);

        let mut data = vec![0.0, 0.0, 7.0, 0.0, 0.0];
        extrapolate_to_region(&mut data, &valid, 5, 1, 2);
        assert_eq!(data, vec![7.0, 7.0, 7.0, 7.0, 7.0]);
    }

    #[test]
    fn extrapolation_keeps_valid_cells_fixed() {
        let mut data = vec![1.0, 5.0, 0.0, 9.0];
        let valid = vec![true, true, false, true];
        extrapolate_to_region(&mut data, &valid, 4, 1, 3);
        assert_eq!(data[0], 1.0);
        assert_eq!(data[1], 5.0);
        assert_eq!(data[3], 9.0);
        // Invalid cell averages its two valid neighbors.
        assert!((data[2] - 7.0).abs() < 1e-12);
    }
}
