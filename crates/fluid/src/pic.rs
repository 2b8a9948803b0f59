//! Particle-in-cell transport: momentum lives on particles and is
//! exchanged with the grid around the projection stages.

use glam::DVec2;
use rayon::prelude::*;

use crate::boundary::{DIRECTION_DOWN, DIRECTION_LEFT, DIRECTION_RIGHT, DIRECTION_UP};
use crate::emitter::VolumeParticleEmitter;
use crate::field::VectorField;
use crate::grid::{self, ScalarGrid};
use crate::parallel;
use crate::particles::ParticleSystemData;
use crate::solver::{FluidRegion, FluidSolver, GridFluidSolver, GridFluidSolverBuilder};

/// How grid velocity is handed back to the particles after projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VelocityTransfer {
    /// Particles take the interpolated grid velocity.
    Pic,
    /// Particles keep their own velocity plus the grid's change, blended
    /// toward the plain grid sample by `pic_blending_factor` in [0, 1].
    Flip { pic_blending_factor: f64 },
    /// Affine transfer: a per-particle velocity derivative preserves
    /// sub-grid variation without FLIP's noise.
    Apic,
}

/// Grid-particle hybrid solver.
///
/// Particles carry velocity between sub-steps; the grid only exists
/// during a sub-step to apply forces and the pressure projection. The
/// fluid region is a signed distance field rebuilt from the particle
/// positions at the start of every sub-step.
pub struct PicSolver {
    base: GridFluidSolver,
    transfer: VelocityTransfer,
    particles: ParticleSystemData,
    emitter: Option<VolumeParticleEmitter>,
    signed_distance_field: ScalarGrid,
    u_markers: Vec<bool>,
    v_markers: Vec<bool>,
    u_snapshot: Vec<f64>,
    v_snapshot: Vec<f64>,
    c_x: Vec<DVec2>,
    c_y: Vec<DVec2>,
}

impl PicSolver {
    pub fn new(width: usize, height: usize, spacing: DVec2, origin: DVec2) -> Self {
        Self::with_base(
            GridFluidSolver::new(width, height, spacing, origin),
            VelocityTransfer::Pic,
        )
    }

    fn with_base(base: GridFluidSolver, transfer: VelocityTransfer) -> Self {
        let grids = base.grids();
        let signed_distance_field = ScalarGrid::with_value(
            grids.width,
            grids.height,
            grids.spacing,
            grids.origin,
            f64::MAX,
        );
        let mut solver = Self {
            base,
            transfer: VelocityTransfer::Pic,
            particles: ParticleSystemData::new(),
            emitter: None,
            signed_distance_field,
            u_markers: Vec::new(),
            v_markers: Vec::new(),
            u_snapshot: Vec::new(),
            v_snapshot: Vec::new(),
            c_x: Vec::new(),
            c_y: Vec::new(),
        };
        solver.set_velocity_transfer(transfer);
        solver
    }

    pub fn builder() -> PicSolverBuilder {
        PicSolverBuilder::new()
    }

    #[inline]
    pub fn velocity_transfer(&self) -> VelocityTransfer {
        self.transfer
    }

    /// FLIP blending factors are clamped to [0, 1].
    pub fn set_velocity_transfer(&mut self, transfer: VelocityTransfer) {
        self.transfer = match transfer {
            VelocityTransfer::Flip { pic_blending_factor } => VelocityTransfer::Flip {
                pic_blending_factor: pic_blending_factor.clamp(0.0, 1.0),
            },
            other => other,
        };
    }

    #[inline]
    pub fn particles(&self) -> &ParticleSystemData {
        &self.particles
    }

    #[inline]
    pub fn particles_mut(&mut self) -> &mut ParticleSystemData {
        &mut self.particles
    }

    pub fn set_emitter(&mut self, emitter: VolumeParticleEmitter) {
        self.emitter = Some(emitter);
    }

    #[inline]
    pub fn emitter(&self) -> Option<&VolumeParticleEmitter> {
        self.emitter.as_ref()
    }

    /// Particle-derived signed distance to the fluid surface.
    #[inline]
    pub fn signed_distance_field(&self) -> &ScalarGrid {
        &self.signed_distance_field
    }

    fn update_particle_emitter(&mut self) {
        if let Some(emitter) = &mut self.emitter {
            emitter.update(&mut self.particles);
        }
    }

    /// Scatter particle momentum onto the faces, normalized by the
    /// accumulated weights. Touched faces become markers for the air
    /// extrapolation.
    fn transfer_particles_to_grid(&mut self) {
        let n = self.particles.number_of_particles();
        let apic = matches!(self.transfer, VelocityTransfer::Apic);
        if apic {
            self.c_x.resize(n, DVec2::ZERO);
            self.c_y.resize(n, DVec2::ZERO);
        }

        let flow = self.base.velocity_mut();
        let (width, height) = (flow.width, flow.height);
        let spacing = flow.spacing;
        let u_origin = flow.origin + DVec2::new(0.0, 0.5 * spacing.y);
        let v_origin = flow.origin + DVec2::new(0.5 * spacing.x, 0.0);
        let lower = flow.origin;
        let upper = flow.origin
            + DVec2::new(width as f64 * spacing.x, height as f64 * spacing.y);

        flow.u.fill(0.0);
        flow.v.fill(0.0);
        let mut u_weights = vec![0.0f64; flow.u.len()];
        let mut v_weights = vec![0.0f64; flow.v.len()];
        self.u_markers.clear();
        self.u_markers.resize(flow.u.len(), false);
        self.v_markers.clear();
        self.v_markers.resize(flow.v.len(), false);

        for p in 0..n {
            let pos = self.particles.positions[p];
            let vel = self.particles.velocities[p];

            let mut u_pos = pos;
            if apic {
                u_pos.y = pos
                    .y
                    .clamp(lower.y + 0.5 * spacing.y, upper.y - 0.5 * spacing.y);
            }
            let (i, j, fx, fy) = grid_coords(u_pos, u_origin, spacing, width + 1, height);
            let i1 = (i + 1).min(width);
            let j1 = (j + 1).min(height - 1);
            let taps = [(i, j), (i1, j), (i, j1), (i1, j1)];
            let weights = [
                (1.0 - fx) * (1.0 - fy),
                fx * (1.0 - fy),
                (1.0 - fx) * fy,
                fx * fy,
            ];
            for (&(ti, tj), &w) in taps.iter().zip(&weights) {
                let idx = tj * (width + 1) + ti;
                let value = if apic {
                    let grid_pos =
                        u_origin + DVec2::new(ti as f64 * spacing.x, tj as f64 * spacing.y);
                    vel.x + self.c_x[p].dot(grid_pos - u_pos)
                } else {
                    vel.x
                };
                flow.u[idx] += w * value;
                u_weights[idx] += w;
                self.u_markers[idx] = true;
            }

            let mut v_pos = pos;
            if apic {
                v_pos.x = pos
                    .x
                    .clamp(lower.x + 0.5 * spacing.x, upper.x - 0.5 * spacing.x);
            }
            let (i, j, fx, fy) = grid_coords(v_pos, v_origin, spacing, width, height + 1);
            let i1 = (i + 1).min(width - 1);
            let j1 = (j + 1).min(height);
            let taps = [(i, j), (i1, j), (i, j1), (i1, j1)];
            let weights = [
                (1.0 - fx) * (1.0 - fy),
                fx * (1.0 - fy),
                (1.0 - fx) * fy,
                fx * fy,
            ];
            for (&(ti, tj), &w) in taps.iter().zip(&weights) {
                let idx = tj * width + ti;
                let value = if apic {
                    let grid_pos =
                        v_origin + DVec2::new(ti as f64 * spacing.x, tj as f64 * spacing.y);
                    vel.y + self.c_y[p].dot(grid_pos - v_pos)
                } else {
                    vel.y
                };
                flow.v[idx] += w * value;
                v_weights[idx] += w;
                self.v_markers[idx] = true;
            }
        }

        for (value, &w) in flow.u.iter_mut().zip(&u_weights) {
            if w > 0.0 {
                *value /= w;
            }
        }
        for (value, &w) in flow.v.iter_mut().zip(&v_weights) {
            if w > 0.0 {
                *value /= w;
            }
        }

        if matches!(self.transfer, VelocityTransfer::Flip { .. }) {
            self.u_snapshot.clear();
            self.u_snapshot.extend_from_slice(&flow.u);
            self.v_snapshot.clear();
            self.v_snapshot.extend_from_slice(&flow.v);
        }
    }

    fn transfer_grid_to_particles(&mut self) {
        match self.transfer {
            VelocityTransfer::Pic => self.transfer_grid_to_particles_pic(),
            VelocityTransfer::Flip { pic_blending_factor } => {
                self.transfer_grid_to_particles_flip(pic_blending_factor)
            }
            VelocityTransfer::Apic => self.transfer_grid_to_particles_apic(),
        }
    }

    fn transfer_grid_to_particles_pic(&mut self) {
        let flow = self.base.velocity();
        let positions = &self.particles.positions;
        let velocities = &mut self.particles.velocities;
        parallel::pool().install(|| {
            positions
                .par_iter()
                .zip(velocities.par_iter_mut())
                .for_each(|(&pos, vel)| {
                    *vel = flow.sample(pos);
                });
        });
    }

    fn transfer_grid_to_particles_flip(&mut self, pic_blending_factor: f64) {
        let flow = self.base.velocity();
        // The snapshot appears with the first particle-to-grid transfer
        // in FLIP mode; until then there is no delta to add.
        if self.u_snapshot.len() != flow.u.len() || self.v_snapshot.len() != flow.v.len() {
            self.transfer_grid_to_particles_pic();
            return;
        }

        let u_delta: Vec<f64> = flow
            .u
            .iter()
            .zip(&self.u_snapshot)
            .map(|(&new, &old)| new - old)
            .collect();
        let v_delta: Vec<f64> = flow
            .v
            .iter()
            .zip(&self.v_snapshot)
            .map(|(&new, &old)| new - old)
            .collect();

        let (width, height) = (flow.width, flow.height);
        let spacing = flow.spacing;
        let u_origin = flow.origin + DVec2::new(0.0, 0.5 * spacing.y);
        let v_origin = flow.origin + DVec2::new(0.5 * spacing.x, 0.0);

        let positions = &self.particles.positions;
        let velocities = &mut self.particles.velocities;
        parallel::pool().install(|| {
            positions
                .par_iter()
                .zip(velocities.par_iter_mut())
                .for_each(|(&pos, vel)| {
                    let delta = DVec2::new(
                        sample_staggered(&u_delta, pos, u_origin, spacing, width + 1, height),
                        sample_staggered(&v_delta, pos, v_origin, spacing, width, height + 1),
                    );
                    let mut flip_vel = *vel + delta;
                    if pic_blending_factor > 0.0 {
                        flip_vel = flip_vel.lerp(flow.sample(pos), pic_blending_factor);
                    }
                    *vel = flip_vel;
                });
        });
    }

    fn transfer_grid_to_particles_apic(&mut self) {
        let n = self.particles.number_of_particles();
        self.c_x.clear();
        self.c_x.resize(n, DVec2::ZERO);
        self.c_y.clear();
        self.c_y.resize(n, DVec2::ZERO);

        let flow = self.base.velocity();
        let (width, height) = (flow.width, flow.height);
        let spacing = flow.spacing;
        let u_origin = flow.origin + DVec2::new(0.0, 0.5 * spacing.y);
        let v_origin = flow.origin + DVec2::new(0.5 * spacing.x, 0.0);
        let lower = flow.origin;
        let upper = flow.origin
            + DVec2::new(width as f64 * spacing.x, height as f64 * spacing.y);

        let positions = &self.particles.positions;
        let velocities = &mut self.particles.velocities;
        let c_x = &mut self.c_x;
        let c_y = &mut self.c_y;
        parallel::pool().install(|| {
            positions
                .par_iter()
                .zip(velocities.par_iter_mut())
                .zip(c_x.par_iter_mut())
                .zip(c_y.par_iter_mut())
                .for_each(|(((&pos, vel), cx), cy)| {
                    *vel = flow.sample(pos);

                    let mut u_pos = pos;
                    u_pos.y = pos
                        .y
                        .clamp(lower.y + 0.5 * spacing.y, upper.y - 0.5 * spacing.y);
                    let (i, j, fx, fy) =
                        grid_coords(u_pos, u_origin, spacing, width + 1, height);
                    let i1 = (i + 1).min(width);
                    let j1 = (j + 1).min(height - 1);
                    let taps = [(i, j), (i1, j), (i, j1), (i1, j1)];
                    let grad_weights = gradient_weights(fx, fy, spacing);
                    let mut c = DVec2::ZERO;
                    for (g, &(ti, tj)) in grad_weights.iter().zip(&taps) {
                        c += *g * flow.u[tj * (width + 1) + ti];
                    }
                    *cx = c;

                    let mut v_pos = pos;
                    v_pos.x = pos
                        .x
                        .clamp(lower.x + 0.5 * spacing.x, upper.x - 0.5 * spacing.x);
                    let (i, j, fx, fy) =
                        grid_coords(v_pos, v_origin, spacing, width, height + 1);
                    let i1 = (i + 1).min(width - 1);
                    let j1 = (j + 1).min(height);
                    let taps = [(i, j), (i1, j), (i, j1), (i1, j1)];
                    let grad_weights = gradient_weights(fx, fy, spacing);
                    let mut c = DVec2::ZERO;
                    for (g, &(ti, tj)) in grad_weights.iter().zip(&taps) {
                        c += *g * flow.v[tj * width + ti];
                    }
                    *cy = c;
                });
        });
    }

    /// Narrow-band distance to the nearest particle, minus the particle
    /// radius, bucketed per cell to bound the search.
    fn build_signed_distance_field(&mut self) {
        let sdf = &mut self.signed_distance_field;
        let (width, height) = (sdf.width, sdf.height);
        let (spacing, origin) = (sdf.spacing, sdf.origin);
        let max_h = spacing.x.max(spacing.y);
        let radius = 1.2 * max_h / f64::sqrt(2.0);
        let band = 2.0 * radius;

        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); width * height];
        for (p, &pos) in self.particles.positions.iter().enumerate() {
            let ci = (((pos.x - origin.x) / spacing.x).floor() as isize)
                .clamp(0, width as isize - 1) as usize;
            let cj = (((pos.y - origin.y) / spacing.y).floor() as isize)
                .clamp(0, height as isize - 1) as usize;
            buckets[cj * width + ci].push(p);
        }
        let reach_x = (band / spacing.x).ceil() as isize;
        let reach_y = (band / spacing.y).ceil() as isize;

        let positions = &self.particles.positions;
        let buckets = &buckets;
        parallel::pool().install(|| {
            sdf.data
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(j, row)| {
                    for (i, phi) in row.iter_mut().enumerate() {
                        let pt = origin
                            + DVec2::new(
                                (i as f64 + 0.5) * spacing.x,
                                (j as f64 + 0.5) * spacing.y,
                            );
                        let mut min_dist = band;
                        for nj in (j as isize - reach_y)..=(j as isize + reach_y) {
                            if nj < 0 || nj >= height as isize {
                                continue;
                            }
                            for ni in (i as isize - reach_x)..=(i as isize + reach_x) {
                                if ni < 0 || ni >= width as isize {
                                    continue;
                                }
                                for &p in &buckets[nj as usize * width + ni as usize] {
                                    min_dist = min_dist.min((pt - positions[p]).length());
                                }
                            }
                        }
                        *phi = min_dist - radius;
                    }
                });
        });

        self.extrapolate_sdf_into_collider();
    }

    fn extrapolate_sdf_into_collider(&mut self) {
        let collider_sdf = match self.base.boundary_condition_solver().collider_sdf() {
            Some(sdf) => sdf,
            None => return,
        };

        let (width, height) = (
            self.signed_distance_field.width,
            self.signed_distance_field.height,
        );
        let mut valid = vec![false; width * height];
        for j in 0..height {
            for i in 0..width {
                valid[j * width + i] = collider_sdf.at(i, j) > 0.0;
            }
        }
        let depth = self.base.max_cfl().ceil() as u32;
        grid::extrapolate_to_region(
            &mut self.signed_distance_field.data,
            &valid,
            width,
            height,
            depth,
        );
    }

    fn extrapolate_velocity_to_air(&mut self) {
        let depth = self.base.max_cfl().ceil() as u32;
        let u_markers = &self.u_markers;
        let v_markers = &self.v_markers;
        let flow = self.base.velocity_mut();
        grid::extrapolate_to_region(&mut flow.u, u_markers, flow.width + 1, flow.height, depth);
        grid::extrapolate_to_region(&mut flow.v, v_markers, flow.width, flow.height + 1, depth);
    }

    fn move_particles(&mut self, dt: f64) {
        let num_sub_steps = self.base.max_cfl().max(1.0) as u32;
        let sub_dt = dt / num_sub_steps as f64;
        let domain_flag = self.base.closed_domain_boundary_flag();
        let (lower, upper) = self.base.grids().bounding_box();

        {
            let flow = self.base.velocity();
            let positions = &mut self.particles.positions;
            let velocities = &mut self.particles.velocities;
            parallel::pool().install(|| {
                positions
                    .par_iter_mut()
                    .zip(velocities.par_iter_mut())
                    .for_each(|(pos, vel)| {
                        let mut pt = *pos;
                        for _ in 0..num_sub_steps {
                            let vel0 = flow.sample(pt);
                            let mid = pt + 0.5 * sub_dt * vel0;
                            pt += sub_dt * flow.sample(mid);
                        }

                        let mut v = *vel;
                        if domain_flag & DIRECTION_LEFT != 0 && pt.x <= lower.x {
                            pt.x = lower.x;
                            v.x = 0.0;
                        }
                        if domain_flag & DIRECTION_RIGHT != 0 && pt.x >= upper.x {
                            pt.x = upper.x;
                            v.x = 0.0;
                        }
                        if domain_flag & DIRECTION_DOWN != 0 && pt.y <= lower.y {
                            pt.y = lower.y;
                            v.y = 0.0;
                        }
                        if domain_flag & DIRECTION_UP != 0 && pt.y >= upper.y {
                            pt.y = upper.y;
                            v.y = 0.0;
                        }
                        *pos = pt;
                        *vel = v;
                    });
            });
        }

        if let Some(collider) = self.base.collider() {
            let positions = &mut self.particles.positions;
            let velocities = &mut self.particles.velocities;
            parallel::pool().install(|| {
                positions
                    .par_iter_mut()
                    .zip(velocities.par_iter_mut())
                    .for_each(|(pos, vel)| {
                        collider.resolve_collision(0.0, 0.0, pos, vel);
                    });
            });
        }
    }
}

impl FluidSolver for PicSolver {
    fn base(&self) -> &GridFluidSolver {
        &self.base
    }

    fn base_mut(&mut self) -> &mut GridFluidSolver {
        &mut self.base
    }

    fn initialize(&mut self) {
        self.update_particle_emitter();
    }

    fn fluid_region(&self) -> FluidRegion {
        FluidRegion::SignedDistance(self.signed_distance_field.clone())
    }

    fn on_begin_advance_time_step(&mut self, _dt: f64) {
        self.update_particle_emitter();
        log::debug!(
            "number of transport particles: {}",
            self.particles.number_of_particles()
        );

        self.transfer_particles_to_grid();
        self.build_signed_distance_field();
        self.extrapolate_velocity_to_air();
        self.base.apply_boundary_condition();
    }

    /// Advection is particle motion: hand the projected grid velocity
    /// back to the particles and integrate their positions through it.
    fn compute_advection(&mut self, dt: f64) {
        self.extrapolate_velocity_to_air();
        self.base.apply_boundary_condition();
        self.transfer_grid_to_particles();
        self.move_particles(dt);
    }
}

/// Index and fraction of `x` in `[0, size - 1]` sample space, clamped.
fn barycentric(x: f64, size: usize) -> (usize, f64) {
    if size < 2 {
        return (0, 0.0);
    }
    let clamped = x.clamp(0.0, (size - 1) as f64);
    let i = (clamped.floor() as usize).min(size - 2);
    (i, (clamped - i as f64).clamp(0.0, 1.0))
}

fn grid_coords(
    pos: DVec2,
    sample_origin: DVec2,
    spacing: DVec2,
    nx: usize,
    ny: usize,
) -> (usize, usize, f64, f64) {
    let (i, fx) = barycentric((pos.x - sample_origin.x) / spacing.x, nx);
    let (j, fy) = barycentric((pos.y - sample_origin.y) / spacing.y, ny);
    (i, j, fx, fy)
}

/// Spatial gradients of the four bilinear weights, tap order
/// `(i, j), (i + 1, j), (i, j + 1), (i + 1, j + 1)`.
fn gradient_weights(fx: f64, fy: f64, spacing: DVec2) -> [DVec2; 4] {
    [
        DVec2::new((fy - 1.0) / spacing.x, (fx - 1.0) / spacing.y),
        DVec2::new((1.0 - fy) / spacing.x, -fx / spacing.y),
        DVec2::new(-fy / spacing.x, (1.0 - fx) / spacing.y),
        DVec2::new(fy / spacing.x, fx / spacing.y),
    ]
}

fn sample_staggered(
    data: &[f64],
    pos: DVec2,
    sample_origin: DVec2,
    spacing: DVec2,
    nx: usize,
    ny: usize,
) -> f64 {
    let (i, j, fx, fy) = grid_coords(pos, sample_origin, spacing, nx, ny);
    let i1 = (i + 1).min(nx - 1);
    let j1 = (j + 1).min(ny - 1);
    (1.0 - fx) * (1.0 - fy) * data[j * nx + i]
        + fx * (1.0 - fy) * data[j * nx + i1]
        + (1.0 - fx) * fy * data[j1 * nx + i]
        + fx * fy * data[j1 * nx + i1]
}

/// Builder for [`PicSolver`].
#[derive(Clone, Debug)]
pub struct PicSolverBuilder {
    base: GridFluidSolverBuilder,
    transfer: VelocityTransfer,
}

impl PicSolverBuilder {
    pub fn new() -> Self {
        Self {
            base: GridFluidSolverBuilder::new(),
            transfer: VelocityTransfer::Pic,
        }
    }

    pub fn with_resolution(mut self, width: usize, height: usize) -> Self {
        self.base = self.base.with_resolution(width, height);
        self
    }

    pub fn with_spacing(mut self, spacing: DVec2) -> Self {
        self.base = self.base.with_spacing(spacing);
        self
    }

    pub fn with_origin(mut self, origin: DVec2) -> Self {
        self.base = self.base.with_origin(origin);
        self
    }

    pub fn with_gravity(mut self, gravity: DVec2) -> Self {
        self.base = self.base.with_gravity(gravity);
        self
    }

    pub fn with_max_cfl(mut self, max_cfl: f64) -> Self {
        self.base = self.base.with_max_cfl(max_cfl);
        self
    }

    pub fn with_velocity_transfer(mut self, transfer: VelocityTransfer) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn build(self) -> PicSolver {
        PicSolver::with_base(self.base.build(), self.transfer)
    }
}

impl Default for PicSolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::Collider;
    use crate::frame::Frame;
    use crate::surface::{BoundingBox, Sphere};

    fn lattice_of_particles(solver: &mut PicSolver, velocity: DVec2) {
        let (width, height) = {
            let g = solver.base().grids();
            (g.width, g.height)
        };
        for j in 0..height {
            for i in 0..width {
                let pos = DVec2::new(i as f64 + 0.5, j as f64 + 0.5);
                solver.particles_mut().add_particle(pos, velocity);
            }
        }
    }

    #[test]
    fn pic_transfer_round_trips_a_uniform_field() {
        let mut solver = PicSolver::builder().with_resolution(8, 8).build();
        lattice_of_particles(&mut solver, DVec2::new(2.0, -1.0));

        solver.transfer_particles_to_grid();
        assert_eq!(solver.base().velocity().u_at(3, 4), 2.0);
        assert_eq!(solver.base().velocity().v_at(3, 4), -1.0);

        solver.transfer_grid_to_particles();
        for &v in &solver.particles().velocities {
            assert_eq!(v, DVec2::new(2.0, -1.0));
        }
    }

    #[test]
    fn flip_keeps_sub_grid_variation_that_pic_averages_away() {
        let mut pic = PicSolver::builder().with_resolution(8, 8).build();
        pic.particles_mut()
            .add_particle(DVec2::new(4.25, 4.5), DVec2::new(1.0, 0.0));
        pic.particles_mut()
            .add_particle(DVec2::new(4.75, 4.5), DVec2::new(-1.0, 0.0));
        pic.transfer_particles_to_grid();
        pic.transfer_grid_to_particles();
        assert!((pic.particles().velocities[0].x - 0.25).abs() < 1e-12);
        assert!((pic.particles().velocities[1].x + 0.25).abs() < 1e-12);

        let mut flip = PicSolver::builder()
            .with_resolution(8, 8)
            .with_velocity_transfer(VelocityTransfer::Flip {
                pic_blending_factor: 0.0,
            })
            .build();
        flip.particles_mut()
            .add_particle(DVec2::new(4.25, 4.5), DVec2::new(1.0, 0.0));
        flip.particles_mut()
            .add_particle(DVec2::new(4.75, 4.5), DVec2::new(-1.0, 0.0));
        flip.transfer_particles_to_grid();
        flip.transfer_grid_to_particles();
        assert_eq!(flip.particles().velocities[0].x, 1.0);
        assert_eq!(flip.particles().velocities[1].x, -1.0);
    }

    #[test]
    fn flip_blending_leans_toward_the_grid_sample() {
        let mut solver = PicSolver::builder()
            .with_resolution(8, 8)
            .with_velocity_transfer(VelocityTransfer::Flip {
                pic_blending_factor: 0.5,
            })
            .build();
        solver
            .particles_mut()
            .add_particle(DVec2::new(4.25, 4.5), DVec2::new(1.0, 0.0));
        solver
            .particles_mut()
            .add_particle(DVec2::new(4.75, 4.5), DVec2::new(-1.0, 0.0));

        solver.transfer_particles_to_grid();
        solver.transfer_grid_to_particles();

        // Halfway between the FLIP value (1.0) and the PIC sample (0.25).
        assert!((solver.particles().velocities[0].x - 0.625).abs() < 1e-12);
        assert!((solver.particles().velocities[1].x + 0.625).abs() < 1e-12);
    }

    #[test]
    fn apic_transfer_adds_no_spin_to_a_uniform_flow() {
        let mut solver = PicSolver::builder()
            .with_resolution(8, 8)
            .with_velocity_transfer(VelocityTransfer::Apic)
            .build();
        lattice_of_particles(&mut solver, DVec2::new(2.0, -1.0));

        solver.transfer_particles_to_grid();
        solver.transfer_grid_to_particles();

        for &v in &solver.particles().velocities {
            assert_eq!(v, DVec2::new(2.0, -1.0));
        }
        for (cx, cy) in solver.c_x.iter().zip(&solver.c_y) {
            assert_eq!(*cx, DVec2::ZERO);
            assert_eq!(*cy, DVec2::ZERO);
        }
    }

    #[test]
    fn emitted_particles_define_the_fluid_region() {
        let mut solver = PicSolver::builder().with_resolution(8, 8).build();
        solver.set_emitter(VolumeParticleEmitter::new(
            Box::new(Sphere::new(DVec2::new(4.0, 4.0), 2.0)),
            BoundingBox::new(DVec2::ZERO, DVec2::new(8.0, 8.0)),
            0.5,
            DVec2::ZERO,
        ));

        solver.update(Frame::new(0, 1.0 / 60.0));

        assert!(solver.particles().number_of_particles() > 0);
        assert!(solver.signed_distance_field().at(3, 3) < 0.0);
        assert!(solver.signed_distance_field().at(0, 0) > 0.0);
    }

    #[test]
    fn falling_particles_stay_inside_a_closed_domain() {
        let mut solver = PicSolver::builder().with_resolution(16, 16).build();
        solver.set_emitter(VolumeParticleEmitter::new(
            Box::new(Sphere::new(DVec2::new(8.0, 12.0), 3.0)),
            BoundingBox::new(DVec2::ZERO, DVec2::new(16.0, 16.0)),
            0.5,
            DVec2::ZERO,
        ));

        for i in 0..10 {
            solver.update(Frame::new(i, 0.25));
        }

        let count = solver.particles().number_of_particles();
        assert!(count > 0);
        for &p in &solver.particles().positions {
            assert!(p.x >= 0.0 && p.x <= 16.0);
            assert!(p.y >= 0.0 && p.y <= 16.0);
        }
    }

    #[test]
    fn collider_pushes_penetrating_particles_out() {
        let mut solver = PicSolver::builder().with_resolution(8, 8).build();
        solver.base_mut().set_collider(Some(Collider::new(Box::new(
            Sphere::new(DVec2::new(4.0, 2.0), 1.5),
        ))));
        solver
            .particles_mut()
            .add_particle(DVec2::new(4.0, 1.2), DVec2::new(0.0, -1.0));

        solver.move_particles(1e-3);

        let pos = solver.particles().positions[0];
        assert!((pos - DVec2::new(4.0, 0.5)).length() < 1e-9);
        assert_eq!(solver.particles().velocities[0], DVec2::new(0.0, -1.0));
    }

    #[test]
    fn builder_selects_the_transfer_scheme() {
        let solver = PicSolver::builder()
            .with_resolution(4, 4)
            .with_velocity_transfer(VelocityTransfer::Apic)
            .build();
        assert_eq!(solver.velocity_transfer(), VelocityTransfer::Apic);

        let default_solver = PicSolver::builder().with_resolution(4, 4).build();
        assert_eq!(default_solver.velocity_transfer(), VelocityTransfer::Pic);
    }

    #[test]
    fn flip_blending_factor_is_clamped() {
        let mut solver = PicSolver::builder().with_resolution(4, 4).build();
        solver.set_velocity_transfer(VelocityTransfer::Flip {
            pic_blending_factor: 2.0,
        });
        assert_eq!(
            solver.velocity_transfer(),
            VelocityTransfer::Flip {
                pic_blending_factor: 1.0
            }
        );
    }
}
