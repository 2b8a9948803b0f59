//! Level-set utilities and the iterative upwind reinitialize/extrapolate
//! solver.

use glam::DVec3;
use rayon::prelude::*;

use crate::field::ScalarField;
use crate::grid::{FaceCenteredGrid, ScalarGrid};
use crate::parallel;

/// Whether a signed distance marks the inside of the surface.
#[inline]
pub fn is_inside_sdf(phi: f64) -> bool {
    phi < 0.0
}

/// Fraction of the segment between two signed-distance samples that lies
/// inside the surface.
#[inline]
pub fn fraction_inside_sdf(phi0: f64, phi1: f64) -> f64 {
    if is_inside_sdf(phi0) && is_inside_sdf(phi1) {
        1.0
    } else if is_inside_sdf(phi0) && !is_inside_sdf(phi1) {
        phi0 / (phi0 - phi1)
    } else if !is_inside_sdf(phi0) && is_inside_sdf(phi1) {
        phi1 / (phi1 - phi0)
    } else {
        0.0
    }
}

#[inline]
fn cycle(list: &mut [f64; 4]) {
    let head = list[0];
    list[0] = list[1];
    list[1] = list[2];
    list[2] = list[3];
    list[3] = head;
}

/// Fraction of a rectangular face that lies inside the surface, from the
/// signed distances at its four corners (marching-squares area fraction).
///
/// Corners are given as bottom-left, bottom-right, top-left, top-right in
/// the face plane.
pub fn fraction_inside_sdf_quad(phi_bl: f64, phi_br: f64, phi_tl: f64, phi_tr: f64) -> f64 {
    let inside_count = [phi_bl, phi_br, phi_tl, phi_tr]
        .iter()
        .filter(|&&phi| is_inside_sdf(phi))
        .count();
    // Cyclic order around the quad.
    let mut list = [phi_bl, phi_br, phi_tr, phi_tl];

    match inside_count {
        4 => 1.0,
        3 => {
            // Rotate the positive corner into the first slot and take the
            // complement of its exterior triangle.
            while is_inside_sdf(list[0]) {
                cycle(&mut list);
            }
            let side0 = 1.0 - fraction_inside_sdf(list[0], list[3]);
            let side1 = 1.0 - fraction_inside_sdf(list[0], list[1]);
            1.0 - 0.5 * side0 * side1
        }
        2 => {
            // Rotate a negative corner into the first slot with its partner
            // in slot 1 (adjacent pair) or slot 2 (diagonal pair).
            while !(is_inside_sdf(list[0]) && (is_inside_sdf(list[1]) || is_inside_sdf(list[2]))) {
                cycle(&mut list);
            }
            if is_inside_sdf(list[1]) {
                let side_left = fraction_inside_sdf(list[0], list[3]);
                let side_right = fraction_inside_sdf(list[1], list[2]);
                0.5 * (side_left + side_right)
            } else {
                // Diagonal pair; the center sample picks the topology.
                let middle = 0.25 * (list[0] + list[1] + list[2] + list[3]);
                if is_inside_sdf(middle) {
                    let side1 = 1.0 - fraction_inside_sdf(list[0], list[3]);
                    let side3 = 1.0 - fraction_inside_sdf(list[2], list[3]);
                    let side2 = 1.0 - fraction_inside_sdf(list[2], list[1]);
                    let side0 = 1.0 - fraction_inside_sdf(list[0], list[1]);
                    1.0 - 0.5 * side1 * side3 - 0.5 * side0 * side2
                } else {
                    let side0 = fraction_inside_sdf(list[0], list[1]);
                    let side1 = fraction_inside_sdf(list[0], list[3]);
                    let side2 = fraction_inside_sdf(list[2], list[1]);
                    let side3 = fraction_inside_sdf(list[2], list[3]);
                    0.5 * side0 * side1 + 0.5 * side2 * side3
                }
            }
        }
        1 => {
            while !is_inside_sdf(list[0]) {
                cycle(&mut list);
            }
            let side0 = fraction_inside_sdf(list[0], list[3]);
            let side1 = fraction_inside_sdf(list[0], list[1]);
            0.5 * side0 * side1
        }
        _ => 0.0,
    }
}

/// Smoothed Heaviside of a signed distance measured in grid units.
///
/// 0 deep inside, 1 deep outside, with a sin-smoothed ramp over the
/// three-cell band around the interface.
pub fn smeared_heaviside_sdf(phi: f64) -> f64 {
    if phi > 1.5 {
        1.0
    } else if phi < -1.5 {
        0.0
    } else {
        0.5 + phi / 3.0
            + 0.5 * std::f64::consts::FRAC_1_PI * (std::f64::consts::PI * phi / 1.5).sin()
    }
}

/// First-order upwind derivative pair (backward, forward) from three
/// consecutive samples.
#[inline]
fn upwind1(d0: f64, d1: f64, d2: f64, h: f64) -> (f64, f64) {
    ((d1 - d0) / h, (d2 - d1) / h)
}

/// Central-difference gradient over a flat row-major array with clamped
/// border indices.
#[inline]
#[allow(clippy::too_many_arguments)]
fn gradient_flat(
    data: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    spacing: DVec3,
    i: usize,
    j: usize,
    k: usize,
) -> DVec3 {
    let left = data[(k * ny + j) * nx + i.saturating_sub(1)];
    let right = data[(k * ny + j) * nx + (i + 1).min(nx - 1)];
    let down = data[(k * ny + j.saturating_sub(1)) * nx + i];
    let up = data[(k * ny + (j + 1).min(ny - 1)) * nx + i];
    let back = data[(k.saturating_sub(1) * ny + j) * nx + i];
    let front = data[((k + 1).min(nz - 1) * ny + j) * nx + i];
    0.5 * DVec3::new(
        (right - left) / spacing.x,
        (up - down) / spacing.y,
        (front - back) / spacing.z,
    )
}

#[inline]
#[allow(clippy::too_many_arguments)]
fn upwind_derivatives(
    data: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    spacing: DVec3,
    i: usize,
    j: usize,
    k: usize,
) -> ((f64, f64), (f64, f64), (f64, f64)) {
    let im1 = i.saturating_sub(1);
    let ip1 = (i + 1).min(nx - 1);
    let jm1 = j.saturating_sub(1);
    let jp1 = (j + 1).min(ny - 1);
    let km1 = k.saturating_sub(1);
    let kp1 = (k + 1).min(nz - 1);

    let center = data[(k * ny + j) * nx + i];
    let dx = upwind1(
        data[(k * ny + j) * nx + im1],
        center,
        data[(k * ny + j) * nx + ip1],
        spacing.x,
    );
    let dy = upwind1(
        data[(k * ny + jm1) * nx + i],
        center,
        data[(k * ny + jp1) * nx + i],
        spacing.y,
    );
    let dz = upwind1(
        data[(km1 * ny + j) * nx + i],
        center,
        data[(kp1 * ny + j) * nx + i],
        spacing.z,
    );
    (dx, dy, dz)
}

/// Smoothed sign of a signed distance, saturating away from the interface.
#[inline]
fn smeared_sign(d: f64, spacing: DVec3) -> f64 {
    let e = spacing.x.min(spacing.y).min(spacing.z);
    d / (d * d + e * e).sqrt()
}

/// Solves the reinitialization and constant-extrapolation PDEs by explicit
/// pseudo-time relaxation with first-order upwind differencing.
///
/// Each call derives its pseudo time step from the CFL bound and runs
/// `ceil(max_distance / dtau)` sweeps, so the result is valid within
/// `max_distance` of the interface.
#[derive(Clone, Copy, Debug)]
pub struct UpwindLevelSetSolver {
    max_cfl: f64,
}

impl Default for UpwindLevelSetSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl UpwindLevelSetSolver {
    pub fn new() -> Self {
        Self { max_cfl: 0.5 }
    }

    #[inline]
    pub fn max_cfl(&self) -> f64 {
        self.max_cfl
    }

    /// Pseudo-time CFL bound in (0, 0.5].
    pub fn set_max_cfl(&mut self, max_cfl: f64) {
        assert!(max_cfl > 0.0, "max CFL must be positive, got {}", max_cfl);
        self.max_cfl = max_cfl.min(0.5);
    }

    /// Rebuild `output_sdf` as a signed distance function with the same
    /// zero level set as `input_sdf`, accurate within `max_distance` of
    /// the interface.
    pub fn reinitialize(
        &self,
        input_sdf: &ScalarGrid,
        max_distance: f64,
        output_sdf: &mut ScalarGrid,
    ) {
        assert!(
            input_sdf.width == output_sdf.width
                && input_sdf.height == output_sdf.height
                && input_sdf.depth == output_sdf.depth,
            "grid shapes differ: {}x{}x{} vs {}x{}x{}",
            input_sdf.width,
            input_sdf.height,
            input_sdf.depth,
            output_sdf.width,
            output_sdf.height,
            output_sdf.depth
        );

        let nx = input_sdf.width;
        let ny = input_sdf.height;
        let nz = input_sdf.depth;
        let spacing = input_sdf.spacing;

        let dtau = self.pseudo_time_step(&input_sdf.data, spacing);
        let number_of_iterations = distance_to_number_of_iterations(max_distance, dtau);
        log::debug!(
            "reinitializing level set: dtau={} iterations={}",
            dtau,
            number_of_iterations
        );

        let mut buf0 = input_sdf.data.clone();
        let mut buf1 = vec![0.0; buf0.len()];

        for _ in 0..number_of_iterations {
            {
                let src = &buf0;
                parallel::pool().install(|| {
                    buf1.par_chunks_mut(nx.max(1))
                        .enumerate()
                        .for_each(|(jk, row)| {
                            let j = jk % ny.max(1);
                            let k = jk / ny.max(1);
                            for (i, out) in row.iter_mut().enumerate() {
                                let s = smeared_sign(src[(k * ny + j) * nx + i], spacing);
                                let ((dxb, dxf), (dyb, dyf), (dzb, dzf)) =
                                    upwind_derivatives(src, nx, ny, nz, spacing, i, j, k);

                                let grad_plus = (dxb.max(0.0).powi(2)
                                    + dxf.min(0.0).powi(2)
                                    + dyb.max(0.0).powi(2)
                                    + dyf.min(0.0).powi(2)
                                    + dzb.max(0.0).powi(2)
                                    + dzf.min(0.0).powi(2))
                                .sqrt();
                                let grad_minus = (dxb.min(0.0).powi(2)
                                    + dxf.max(0.0).powi(2)
                                    + dyb.min(0.0).powi(2)
                                    + dyf.max(0.0).powi(2)
                                    + dzb.min(0.0).powi(2)
                                    + dzf.max(0.0).powi(2))
                                .sqrt();

                                *out = src[(k * ny + j) * nx + i]
                                    - dtau * s.max(0.0) * (grad_plus - 1.0)
                                    - dtau * s.min(0.0) * (grad_minus - 1.0);
                            }
                        });
                });
            }
            std::mem::swap(&mut buf0, &mut buf1);
        }

        output_sdf.data.copy_from_slice(&buf0);
    }

    /// Spread `input` values from the inside of `sdf` across the interface,
    /// constant along the distance-function characteristics, out to
    /// `max_distance`.
    pub fn extrapolate_scalar(
        &self,
        input: &ScalarGrid,
        sdf: &dyn ScalarField,
        max_distance: f64,
        output: &mut ScalarGrid,
    ) {
        assert!(
            input.width == output.width
                && input.height == output.height
                && input.depth == output.depth,
            "grid shapes differ: {}x{}x{} vs {}x{}x{}",
            input.width,
            input.height,
            input.depth,
            output.width,
            output.height,
            output.depth
        );

        let mut sdf_at_points = vec![0.0; input.data.len()];
        for k in 0..input.depth {
            for j in 0..input.height {
                for i in 0..input.width {
                    sdf_at_points[(k * input.height + j) * input.width + i] =
                        sdf.sample(input.data_position(i, j, k));
                }
            }
        }

        self.extrapolate_flat(
            &input.data,
            &sdf_at_points,
            input.width,
            input.height,
            input.depth,
            input.spacing,
            max_distance,
            &mut output.data,
        );
    }

    /// Face-centered variant of [`extrapolate_scalar`](Self::extrapolate_scalar),
    /// run per velocity component with the level set sampled at the face
    /// positions.
    pub fn extrapolate_face_centered(
        &self,
        input: &FaceCenteredGrid,
        sdf: &dyn ScalarField,
        max_distance: f64,
        output: &mut FaceCenteredGrid,
    ) {
        assert!(
            input.width == output.width
                && input.height == output.height
                && input.depth == output.depth,
            "grid shapes differ: {}x{}x{} vs {}x{}x{}",
            input.width,
            input.height,
            input.depth,
            output.width,
            output.height,
            output.depth
        );

        let spacing = input.spacing;

        let mut sdf_at_u = vec![0.0; input.u.len()];
        for k in 0..input.depth {
            for j in 0..input.height {
                for i in 0..=input.width {
                    sdf_at_u[(k * input.height + j) * (input.width + 1) + i] =
                        sdf.sample(input.u_position(i, j, k));
                }
            }
        }
        self.extrapolate_flat(
            &input.u,
            &sdf_at_u,
            input.width + 1,
            input.height,
            input.depth,
            spacing,
            max_distance,
            &mut output.u,
        );

        let mut sdf_at_v = vec![0.0; input.v.len()];
        for k in 0..input.depth {
            for j in 0..=input.height {
                for i in 0..input.width {
                    sdf_at_v[(k * (input.height + 1) + j) * input.width + i] =
                        sdf.sample(input.v_position(i, j, k));
                }
            }
        }
        self.extrapolate_flat(
            &input.v,
            &sdf_at_v,
            input.width,
            input.height + 1,
            input.depth,
            spacing,
            max_distance,
            &mut output.v,
        );

        let mut sdf_at_w = vec![0.0; input.w.len()];
        for k in 0..=input.depth {
            for j in 0..input.height {
                for i in 0..input.width {
                    sdf_at_w[(k * input.height + j) * input.width + i] =
                        sdf.sample(input.w_position(i, j, k));
                }
            }
        }
        self.extrapolate_flat(
            &input.w,
            &sdf_at_w,
            input.width,
            input.height,
            input.depth + 1,
            spacing,
            max_distance,
            &mut output.w,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn extrapolate_flat(
        &self,
        input: &[f64],
        sdf: &[f64],
        nx: usize,
        ny: usize,
        nz: usize,
        spacing: DVec3,
        max_distance: f64,
        output: &mut [f64],
    ) {
        let dtau = self.pseudo_time_step(sdf, spacing);
        let number_of_iterations = distance_to_number_of_iterations(max_distance, dtau);

        let mut buf0 = input.to_vec();
        let mut buf1 = vec![0.0; buf0.len()];

        for _ in 0..number_of_iterations {
            {
                let src = &buf0;
                parallel::pool().install(|| {
                    buf1.par_chunks_mut(nx.max(1))
                        .enumerate()
                        .for_each(|(jk, row)| {
                            let j = jk % ny.max(1);
                            let k = jk / ny.max(1);
                            for (i, out) in row.iter_mut().enumerate() {
                                let idx = (k * ny + j) * nx + i;
                                if sdf[idx] >= 0.0 {
                                    let grad = gradient_flat(sdf, nx, ny, nz, spacing, i, j, k);
                                    let ((dxb, dxf), (dyb, dyf), (dzb, dzf)) =
                                        upwind_derivatives(src, nx, ny, nz, spacing, i, j, k);

                                    *out = src[idx]
                                        - dtau
                                            * (grad.x.max(0.0) * dxb
                                                + grad.x.min(0.0) * dxf
                                                + grad.y.max(0.0) * dyb
                                                + grad.y.min(0.0) * dyf
                                                + grad.z.max(0.0) * dzb
                                                + grad.z.min(0.0) * dzf);
                                } else {
                                    *out = src[idx];
                                }
                            }
                        });
                });
            }
            std::mem::swap(&mut buf0, &mut buf1);
        }

        output.copy_from_slice(&buf0);
    }

    fn pseudo_time_step(&self, sdf: &[f64], spacing: DVec3) -> f64 {
        let h = spacing.x.max(spacing.y).max(spacing.z);

        let mut max_s = -f64::MAX;
        for &d in sdf {
            max_s = smeared_sign(d, spacing).max(max_s);
        }

        let mut dtau = self.max_cfl * h;
        while dtau * max_s / h > self.max_cfl {
            dtau *= 0.5;
        }
        dtau
    }
}

#[inline]
fn distance_to_number_of_iterations(distance: f64, dtau: f64) -> u32 {
    (distance / dtau).ceil() as u32
}
