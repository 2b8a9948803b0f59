//! Uniform grids: cell-centered scalars and staggered (MAC) velocities.
//!
//! Staggered layout:
//! - u (x velocity) on x-normal faces, size (width+1) * height * depth
//! - v (y velocity) on y-normal faces, size width * (height+1) * depth
//! - w (z velocity) on z-normal faces, size width * height * (depth+1)
//! - scalars at cell centers, size width * height * depth
//!
//! All world-space sampling clamps to the valid sample domain, so samplers
//! never read out of bounds no matter how far outside the query point is.

use glam::DVec3;

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

/// Lower index, clamped upper index, and fractional offset for one axis of
/// a clamped normalized coordinate.
#[inline]
fn clamped_axis(x: f64, n: usize) -> (usize, usize, f64) {
    let max_x = (n as f64 - 1.0).max(0.0);
    let cx = x.clamp(0.0, max_x);
    let i0 = cx.floor() as usize;
    let i1 = (i0 + 1).min(n.saturating_sub(1));
    (i0, i1, cx - i0 as f64)
}

/// Monotonic cubic interpolation over a flat row-major array at a clamped
/// normalized coordinate.
fn sample_cubic_flat(data: &[f64], nx: usize, ny: usize, nz: usize, x: f64, y: f64, z: f64) -> f64 {
    let cx = x.clamp(0.0, (nx as f64 - 1.0).max(0.0));
    let cy = y.clamp(0.0, (ny as f64 - 1.0).max(0.0));
    let cz = z.clamp(0.0, (nz as f64 - 1.0).max(0.0));

    let i = (cx.floor() as usize).min(nx.saturating_sub(1));
    let j = (cy.floor() as usize).min(ny.saturating_sub(1));
    let k = (cz.floor() as usize).min(nz.saturating_sub(1));
    let fx = cx - i as f64;
    let fy = cy - j as f64;
    let fz = cz - k as f64;

    let clamp_i = |ii: i64| -> usize { ii.clamp(0, nx as i64 - 1) as usize };
    let clamp_j = |jj: i64| -> usize { jj.clamp(0, ny as i64 - 1) as usize };
    let clamp_k = |kk: i64| -> usize { kk.clamp(0, nz as i64 - 1) as usize };

    let mut planes = [0.0; 4];
    for (s, plane) in planes.iter_mut().enumerate() {
        let kk = clamp_k(k as i64 + s as i64 - 1);
        let mut rows = [0.0; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            let jj = clamp_j(j as i64 + r as i64 - 1);
            let base = (kk * ny + jj) * nx;
            let f0 = data[base + clamp_i(i as i64 - 1)];
            let f1 = data[base + i];
            let f2 = data[base + clamp_i(i as i64 + 1)];
            let f3 = data[base + clamp_i(i as i64 + 2)];
            *row = monotonic_catmull_rom(f0, f1, f2, f3, fx);
        }
        *plane = monotonic_catmull_rom(rows[0], rows[1], rows[2], rows[3], fy);
    }

    monotonic_catmull_rom(planes[0], planes[1], planes[2], planes[3], fz)
}

/// Trilinear interpolation over a flat row-major array at a clamped
/// normalized coordinate.
#[inline]
fn sample_linear_flat(data: &[f64], nx: usize, ny: usize, nz: usize, x: f64, y: f64, z: f64) -> f64 {
    let (i0, i1, fx) = clamped_axis(x, nx);
    let (j0, j1, fy) = clamped_axis(y, ny);
    let (k0, k1, fz) = clamped_axis(z, nz);
    let at = |i: usize, j: usize, k: usize| data[(k * ny + j) * nx + i];

    let c00 = (1.0 - fx) * at(i0, j0, k0) + fx * at(i1, j0, k0);
    let c10 = (1.0 - fx) * at(i0, j1, k0) + fx * at(i1, j1, k0);
    let c01 = (1.0 - fx) * at(i0, j0, k1) + fx * at(i1, j0, k1);
    let c11 = (1.0 - fx) * at(i0, j1, k1) + fx * at(i1, j1, k1);

    let c0 = (1.0 - fy) * c00 + fy * c10;
    let c1 = (1.0 - fy) * c01 + fy * c11;
    (1.0 - fz) * c0 + fz * c1
}

// ============================================================================
// SCALAR GRID
// ============================================================================

/// Cell-centered scalar grid.
#[derive(Clone, Debug)]
pub struct ScalarGrid {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    /// World-space position of the grid's lower corner.
    pub origin: DVec3,
    /// Cell size per axis, strictly positive.
    pub spacing: DVec3,
    /// Cell values, row-major, size width * height * depth.
    pub data: Vec<f64>,
}

impl ScalarGrid {
    /// Create a grid filled with zeros.
    pub fn new(width: usize, height: usize, depth: usize, spacing: DVec3, origin: DVec3) -> Self {
        Self::with_value(width, height, depth, spacing, origin, 0.0)
    }

    /// Create a grid filled with `value`.
    pub fn with_value(
        width: usize,
        height: usize,
        depth: usize,
        spacing: DVec3,
        origin: DVec3,
        value: f64,
    ) -> Self {
        assert!(
            spacing.x > 0.0 && spacing.y > 0.0 && spacing.z > 0.0,
            "grid spacing must be positive, got ({}, {}, {})",
            spacing.x,
            spacing.y,
            spacing.z
        );
        Self {
            width,
            height,
            depth,
            origin,
            spacing,
            data: vec![value; width * height * depth],
        }
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.width && j < self.height && k < self.depth);
        (k * self.height + j) * self.width + i
    }

    /// World-space position of the (i, j, k) sample point (cell center).
    #[inline]
    pub fn data_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.origin
            + DVec3::new(
                (i as f64 + 0.5) * self.spacing.x,
                (j as f64 + 0.5) * self.spacing.y,
                (k as f64 + 0.5) * self.spacing.z,
            )
    }

    #[inline]
    pub fn at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[(k * self.height + j) * self.width + i]
    }

    #[inline]
    pub fn at_mut(&mut self, i: usize, j: usize, k: usize) -> &mut f64 {
        &mut self.data[(k * self.height + j) * self.width + i]
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Fill every cell from a position-dependent function.
    pub fn fill_with(&mut self, f: impl Fn(DVec3) -> f64) {
        for k in 0..self.depth {
            for j in 0..self.height {
                for i in 0..self.width {
                    self.data[(k * self.height + j) * self.width + i] =
                        f(self.data_position(i, j, k));
                }
            }
        }
    }

    /// Reallocate for a new resolution, dropping old content.
    pub fn resize(
        &mut self,
        width: usize,
        height: usize,
        depth: usize,
        spacing: DVec3,
        origin: DVec3,
    ) {
        assert!(
            spacing.x > 0.0 && spacing.y > 0.0 && spacing.z > 0.0,
            "grid spacing must be positive, got ({}, {}, {})",
            spacing.x,
            spacing.y,
            spacing.z
        );
        self.width = width;
        self.height = height;
        self.depth = depth;
        self.spacing = spacing;
        self.origin = origin;
        self.data.clear();
        self.data.resize(width * height * depth, 0.0);
    }

    #[inline]
    fn normalize(&self, point: DVec3) -> (f64, f64, f64) {
        (
            (point.x - self.origin.x) / self.spacing.x - 0.5,
            (point.y - self.origin.y) / self.spacing.y - 0.5,
            (point.z - self.origin.z) / self.spacing.z - 0.5,
        )
    }

    /// Trilinear sample clamped to the grid.
    pub fn sample(&self, point: DVec3) -> f64 {
        let (x, y, z) = self.normalize(point);
        sample_linear_flat(&self.data, self.width, self.height, self.depth, x, y, z)
    }

    /// Monotonic cubic sample clamped to the grid.
    pub fn sample_cubic(&self, point: DVec3) -> f64 {
        let (x, y, z) = self.normalize(point);
        sample_cubic_flat(&self.data, self.width, self.height, self.depth, x, y, z)
    }

    /// Central-difference gradient at a sample point, one-sided at borders.
    pub fn gradient_at_data_point(&self, i: usize, j: usize, k: usize) -> DVec3 {
        let ip = (i + 1).min(self.width - 1);
        let im = i.saturating_sub(1);
        let jp = (j + 1).min(self.height - 1);
        let jm = j.saturating_sub(1);
        let kp = (k + 1).min(self.depth - 1);
        let km = k.saturating_sub(1);

        let dx =
            (self.at(ip, j, k) - self.at(im, j, k)) / ((ip - im).max(1) as f64 * self.spacing.x);
        let dy =
            (self.at(i, jp, k) - self.at(i, jm, k)) / ((jp - jm).max(1) as f64 * self.spacing.y);
        let dz =
            (self.at(i, j, kp) - self.at(i, j, km)) / ((kp - km).max(1) as f64 * self.spacing.z);
        DVec3::new(dx, dy, dz)
    }

    /// Trilinear blend of the eight surrounding data-point gradients.
    pub fn gradient(&self, point: DVec3) -> DVec3 {
        let (x, y, z) = self.normalize(point);
        let (i0, i1, fx) = clamped_axis(x, self.width);
        let (j0, j1, fy) = clamped_axis(y, self.height);
        let (k0, k1, fz) = clamped_axis(z, self.depth);

        let c00 = (1.0 - fx) * self.gradient_at_data_point(i0, j0, k0)
            + fx * self.gradient_at_data_point(i1, j0, k0);
        let c10 = (1.0 - fx) * self.gradient_at_data_point(i0, j1, k0)
            + fx * self.gradient_at_data_point(i1, j1, k0);
        let c01 = (1.0 - fx) * self.gradient_at_data_point(i0, j0, k1)
            + fx * self.gradient_at_data_point(i1, j0, k1);
        let c11 = (1.0 - fx) * self.gradient_at_data_point(i0, j1, k1)
            + fx * self.gradient_at_data_point(i1, j1, k1);

        let c0 = (1.0 - fy) * c00 + fy * c10;
        let c1 = (1.0 - fy) * c01 + fy * c11;
        (1.0 - fz) * c0 + fz * c1
    }
}

impl ScalarField for ScalarGrid {
    #[inline]
    fn sample(&self, point: DVec3) -> f64 {
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
    pub depth: usize,
    /// World-space position of the grid's lower corner.
    pub origin: DVec3,
    /// Cell size per axis, strictly positive.
    pub spacing: DVec3,
    /// x velocity on x-normal faces, size (width+1) * height * depth.
    pub u: Vec<f64>,
    /// y velocity on y-normal faces, size width * (height+1) * depth.
    pub v: Vec<f64>,
    /// z velocity on z-normal faces, size width * height * (depth+1).
    pub w: Vec<f64>,
}

impl FaceCenteredGrid {
    pub fn new(width: usize, height: usize, depth: usize, spacing: DVec3, origin: DVec3) -> Self {
        assert!(
            spacing.x > 0.0 && spacing.y > 0.0 && spacing.z > 0.0,
            "grid spacing must be positive, got ({}, {}, {})",
            spacing.x,
            spacing.y,
            spacing.z
        );
        Self {
            width,
            height,
            depth,
            origin,
            spacing,
            u: vec![0.0; (width + 1) * height * depth],
            v: vec![0.0; width * (height + 1) * depth],
            w: vec![0.0; width * height * (depth + 1)],
        }
    }

    #[inline]
    pub fn u_index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i <= self.width && j < self.height && k < self.depth);
        (k * self.height + j) * (self.width + 1) + i
    }

    #[inline]
    pub fn v_index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.width && j <= self.height && k < self.depth);
        (k * (self.height + 1) + j) * self.width + i
    }

    #[inline]
    pub fn w_index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.width && j < self.height && k <= self.depth);
        (k * self.height + j) * self.width + i
    }

    #[inline]
    pub fn u_at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.u[(k * self.height + j) * (self.width + 1) + i]
    }

    #[inline]
    pub fn u_at_mut(&mut self, i: usize, j: usize, k: usize) -> &mut f64 {
        &mut self.u[(k * self.height + j) * (self.width + 1) + i]
    }

    #[inline]
    pub fn v_at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.v[(k * (self.height + 1) + j) * self.width + i]
    }

    #[inline]
    pub fn v_at_mut(&mut self, i: usize, j: usize, k: usize) -> &mut f64 {
        &mut self.v[(k * (self.height + 1) + j) * self.width + i]
    }

    #[inline]
    pub fn w_at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.w[(k * self.height + j) * self.width + i]
    }

    #[inline]
    pub fn w_at_mut(&mut self, i: usize, j: usize, k: usize) -> &mut f64 {
        &mut self.w[(k * self.height + j) * self.width + i]
    }

    /// World-space position of the (i, j, k) u-sample (x-normal face center).
    #[inline]
    pub fn u_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.origin
            + DVec3::new(
                i as f64 * self.spacing.x,
                (j as f64 + 0.5) * self.spacing.y,
                (k as f64 + 0.5) * self.spacing.z,
            )
    }

    /// World-space position of the (i, j, k) v-sample (y-normal face center).
    #[inline]
    pub fn v_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.origin
            + DVec3::new(
                (i as f64 + 0.5) * self.spacing.x,
                j as f64 * self.spacing.y,
                (k as f64 + 0.5) * self.spacing.z,
            )
    }

    /// World-space position of the (i, j, k) w-sample (z-normal face center).
    #[inline]
    pub fn w_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.origin
            + DVec3::new(
                (i as f64 + 0.5) * self.spacing.x,
                (j as f64 + 0.5) * self.spacing.y,
                k as f64 * self.spacing.z,
            )
    }

    /// World-space position of the (i, j, k) cell center.
    #[inline]
    pub fn cell_center_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.origin
            + DVec3::new(
                (i as f64 + 0.5) * self.spacing.x,
                (j as f64 + 0.5) * self.spacing.y,
                (k as f64 + 0.5) * self.spacing.z,
            )
    }

    pub fn fill(&mut self, value: DVec3) {
        self.u.fill(value.x);
        self.v.fill(value.y);
        self.w.fill(value.z);
    }

    pub fn clear(&mut self) {
        self.u.fill(0.0);
        self.v.fill(0.0);
        self.w.fill(0.0);
    }

    /// Reallocate for a new resolution, dropping old content.
    pub fn resize(
        &mut self,
        width: usize,
        height: usize,
        depth: usize,
        spacing: DVec3,
        origin: DVec3,
    ) {
        assert!(
            spacing.x > 0.0 && spacing.y > 0.0 && spacing.z > 0.0,
            "grid spacing must be positive, got ({}, {}, {})",
            spacing.x,
            spacing.y,
            spacing.z
        );
        self.width = width;
        self.height = height;
        self.depth = depth;
        self.spacing = spacing;
        self.origin = origin;
        self.u.clear();
        self.u.resize((width + 1) * height * depth, 0.0);
        self.v.clear();
        self.v.resize(width * (height + 1) * depth, 0.0);
        self.w.clear();
        self.w.resize(width * height * (depth + 1), 0.0);
    }

    /// Trilinear u sample clamped to the grid.
    pub fn sample_u(&self, point: DVec3) -> f64 {
        let x = (point.x - self.origin.x) / self.spacing.x;
        let y = (point.y - self.origin.y) / self.spacing.y - 0.5;
        let z = (point.z - self.origin.z) / self.spacing.z - 0.5;
        sample_linear_flat(&self.u, self.width + 1, self.height, self.depth, x, y, z)
    }

    /// Trilinear v sample clamped to the grid.
    pub fn sample_v(&self, point: DVec3) -> f64 {
        let x = (point.x - self.origin.x) / self.spacing.x - 0.5;
        let y = (point.y - self.origin.y) / self.spacing.y;
        let z = (point.z - self.origin.z) / self.spacing.z - 0.5;
        sample_linear_flat(&self.v, self.width, self.height + 1, self.depth, x, y, z)
    }

    /// Trilinear w sample clamped to the grid.
    pub fn sample_w(&self, point: DVec3) -> f64 {
        let x = (point.x - self.origin.x) / self.spacing.x - 0.5;
        let y = (point.y - self.origin.y) / self.spacing.y - 0.5;
        let z = (point.z - self.origin.z) / self.spacing.z;
        sample_linear_flat(&self.w, self.width, self.height, self.depth + 1, x, y, z)
    }

    /// Trilinear velocity sample clamped to the grid.
    pub fn sample(&self, point: DVec3) -> DVec3 {
        DVec3::new(self.sample_u(point), self.sample_v(point), self.sample_w(point))
    }

    /// Monotonic cubic velocity sample clamped to the grid.
    pub fn sample_cubic(&self, point: DVec3) -> DVec3 {
        let nx = (point.x - self.origin.x) / self.spacing.x;
        let ny = (point.y - self.origin.y) / self.spacing.y;
        let nz = (point.z - self.origin.z) / self.spacing.z;
        DVec3::new(
            sample_cubic_flat(
                &self.u,
                self.width + 1,
                self.height,
                self.depth,
                nx,
                ny - 0.5,
                nz - 0.5,
            ),
            sample_cubic_flat(
                &self.v,
                self.width,
                self.height + 1,
                self.depth,
                nx - 0.5,
                ny,
                nz - 0.5,
            ),
            sample_cubic_flat(
                &self.w,
                self.width,
                self.height,
                self.depth + 1,
                nx - 0.5,
                ny - 0.5,
                nz,
            ),
        )
    }

    /// Velocity averaged to the (i, j, k) cell center.
    #[inline]
    pub fn value_at_cell_center(&self, i: usize, j: usize, k: usize) -> DVec3 {
        DVec3::new(
            0.5 * (self.u_at(i, j, k) + self.u_at(i + 1, j, k)),
            0.5 * (self.v_at(i, j, k) + self.v_at(i, j + 1, k)),
            0.5 * (self.w_at(i, j, k) + self.w_at(i, j, k + 1)),
        )
    }

    /// Discrete divergence at the (i, j, k) cell.
    #[inline]
    pub fn divergence_at_cell(&self, i: usize, j: usize, k: usize) -> f64 {
        (self.u_at(i + 1, j, k) - self.u_at(i, j, k)) / self.spacing.x
            + (self.v_at(i, j + 1, k) - self.v_at(i, j, k)) / self.spacing.y
            + (self.w_at(i, j, k + 1) - self.w_at(i, j, k)) / self.spacing.z
    }
}

impl VectorField for FaceCenteredGrid {
    #[inline]
    fn sample(&self, point: DVec3) -> DVec3 {
        FaceCenteredGrid::sample(self, point)
    }
}

/// Propagate valid samples into invalid cells, one 6-neighbor layer per
/// iteration.
///
/// An invalid cell takes the average of its valid neighbors and becomes
/// valid for the next layer. Values of cells valid on entry never change.
pub fn extrapolate_to_region(
    data: &mut [f64],
    valid: &[bool],
    width: usize,
    height: usize,
    depth: usize,
    number_of_iterations: u32,
) {
    assert_eq!(data.len(), width * height * depth);
    assert_eq!(valid.len(), width * height * depth);

    let slab = width * height;
    let mut valid0 = valid.to_vec();
    let mut valid1 = valid.to_vec();

    for _ in 0..number_of_iterations {
        for k in 0..depth {
            for j in 0..height {
                for i in 0..width {
                    let idx = (k * height + j) * width + i;
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
                    if k + 1 < depth && valid0[idx + slab] {
                        sum += data[idx + slab];
                        count += 1;
                    }
                    if k > 0 && valid0[idx - slab] {
                        sum += data[idx - slab];
                        count += 1;
                    }

                    if count > 0 {
                        data[idx] = sum / count as f64;
                        valid1[idx] = true;
                    }
                }
            }
        }
        valid0.copy_from_slice(&valid1);
    }
}
