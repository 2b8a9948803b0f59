//! Smoke simulation: density and temperature layers transported by the
//! flow and feeding a buoyancy force back into it.

use glam::DVec2;
use rayon::prelude::*;

use crate::field::ScalarField;
use crate::grid::ScalarGrid;
use crate::parallel;
use crate::solver::{FluidRegion, FluidSolver, GridFluidSolver, GridFluidSolverBuilder};

/// Buoyant smoke on a grid.
///
/// Registers smoke density and temperature as advectable scalar layers.
/// The external-force stage is replaced by the buoyancy term
/// `density_factor * density + temperature_factor * (T - T_ambient)`
/// along the up direction (opposite gravity), with the ambient
/// temperature taken as the grid average. The end hook optionally
/// diffuses both layers and applies their exponential decay.
pub struct GridSmokeSolver {
    base: GridFluidSolver,
    smoke_density_data_id: usize,
    temperature_data_id: usize,
    smoke_diffusion_coefficient: f64,
    temperature_diffusion_coefficient: f64,
    buoyancy_smoke_density_factor: f64,
    buoyancy_temperature_factor: f64,
    smoke_decay_factor: f64,
    temperature_decay_factor: f64,
}

impl GridSmokeSolver {
    pub fn new(width: usize, height: usize, spacing: DVec2, origin: DVec2) -> Self {
        Self::with_base(GridFluidSolver::new(width, height, spacing, origin))
    }

    fn with_base(mut base: GridFluidSolver) -> Self {
        let smoke_density_data_id = base.grids_mut().add_advectable_scalar_data(0.0);
        let temperature_data_id = base.grids_mut().add_advectable_scalar_data(0.0);
        Self {
            base,
            smoke_density_data_id,
            temperature_data_id,
            smoke_diffusion_coefficient: 0.0,
            temperature_diffusion_coefficient: 0.0,
            buoyancy_smoke_density_factor: -0.000625,
            buoyancy_temperature_factor: 5.0,
            smoke_decay_factor: 0.001,
            temperature_decay_factor: 0.001,
        }
    }

    pub fn builder() -> GridSmokeSolverBuilder {
        GridSmokeSolverBuilder::new()
    }

    #[inline]
    pub fn smoke_density(&self) -> &ScalarGrid {
        self.base
            .grids()
            .advectable_scalar_data(self.smoke_density_data_id)
    }

    #[inline]
    pub fn smoke_density_mut(&mut self) -> &mut ScalarGrid {
        self.base
            .grids_mut()
            .advectable_scalar_data_mut(self.smoke_density_data_id)
    }

    #[inline]
    pub fn temperature(&self) -> &ScalarGrid {
        self.base
            .grids()
            .advectable_scalar_data(self.temperature_data_id)
    }

    #[inline]
    pub fn temperature_mut(&mut self) -> &mut ScalarGrid {
        self.base
            .grids_mut()
            .advectable_scalar_data_mut(self.temperature_data_id)
    }

    #[inline]
    pub fn smoke_diffusion_coefficient(&self) -> f64 {
        self.smoke_diffusion_coefficient
    }

    pub fn set_smoke_diffusion_coefficient(&mut self, coefficient: f64) {
        self.smoke_diffusion_coefficient = coefficient.max(0.0);
    }

    #[inline]
    pub fn temperature_diffusion_coefficient(&self) -> f64 {
        self.temperature_diffusion_coefficient
    }

    pub fn set_temperature_diffusion_coefficient(&mut self, coefficient: f64) {
        self.temperature_diffusion_coefficient = coefficient.max(0.0);
    }

    #[inline]
    pub fn buoyancy_smoke_density_factor(&self) -> f64 {
        self.buoyancy_smoke_density_factor
    }

    /// Negative values make dense smoke sink.
    pub fn set_buoyancy_smoke_density_factor(&mut self, factor: f64) {
        self.buoyancy_smoke_density_factor = factor;
    }

    #[inline]
    pub fn buoyancy_temperature_factor(&self) -> f64 {
        self.buoyancy_temperature_factor
    }

    /// Positive values make hot regions rise.
    pub fn set_buoyancy_temperature_factor(&mut self, factor: f64) {
        self.buoyancy_temperature_factor = factor;
    }

    #[inline]
    pub fn smoke_decay_factor(&self) -> f64 {
        self.smoke_decay_factor
    }

    /// Per-step decay fraction, clamped to [0, 1].
    pub fn set_smoke_decay_factor(&mut self, factor: f64) {
        self.smoke_decay_factor = factor.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn temperature_decay_factor(&self) -> f64 {
        self.temperature_decay_factor
    }

    /// Per-step decay fraction, clamped to [0, 1].
    pub fn set_temperature_decay_factor(&mut self, factor: f64) {
        self.temperature_decay_factor = factor.clamp(0.0, 1.0);
    }

    fn compute_buoyancy_force(&mut self, dt: f64) {
        if self.buoyancy_smoke_density_factor.abs() <= f64::EPSILON
            && self.buoyancy_temperature_factor.abs() <= f64::EPSILON
        {
            return;
        }

        let gravity = self.base.gravity();
        let up = if gravity.length_squared() > f64::EPSILON {
            -gravity.normalize()
        } else {
            DVec2::new(0.0, 1.0)
        };

        let density_factor = self.buoyancy_smoke_density_factor;
        let temperature_factor = self.buoyancy_temperature_factor;
        let density_id = self.smoke_density_data_id;
        let temperature_id = self.temperature_data_id;

        let (vel, scalars) = self.base.grids_mut().velocity_mut_and_scalar_data();
        let density = &scalars[density_id];
        let temperature = &scalars[temperature_id];
        let t_ambient =
            temperature.data.iter().sum::<f64>() / temperature.data.len().max(1) as f64;

        let width = vel.width;
        let (spacing, origin) = (vel.spacing, vel.origin);

        if up.x.abs() > f64::EPSILON {
            parallel::pool().install(|| {
                vel.u
                    .par_chunks_mut(width + 1)
                    .enumerate()
                    .for_each(|(j, row)| {
                        for (i, u) in row.iter_mut().enumerate() {
                            let pt = origin
                                + DVec2::new(
                                    i as f64 * spacing.x,
                                    (j as f64 + 0.5) * spacing.y,
                                );
                            let buoyancy = density_factor * density.sample(pt)
                                + temperature_factor * (temperature.sample(pt) - t_ambient);
                            *u += dt * buoyancy * up.x;
                        }
                    });
            });
        }
        if up.y.abs() > f64::EPSILON {
            parallel::pool().install(|| {
                vel.v
                    .par_chunks_mut(width.max(1))
                    .enumerate()
                    .for_each(|(j, row)| {
                        for (i, v) in row.iter_mut().enumerate() {
                            let pt = origin
                                + DVec2::new(
                                    (i as f64 + 0.5) * spacing.x,
                                    j as f64 * spacing.y,
                                );
                            let buoyancy = density_factor * density.sample(pt)
                                + temperature_factor * (temperature.sample(pt) - t_ambient);
                            *v += dt * buoyancy * up.y;
                        }
                    });
            });
        }

        self.base.apply_boundary_condition();
    }

    fn compute_layer_diffusion(&mut self, dt: f64) {
        if self.smoke_diffusion_coefficient > f64::EPSILON {
            self.base.diffuse_scalar_layer(
                self.smoke_density_data_id,
                self.smoke_diffusion_coefficient,
                dt,
                &FluidRegion::Everywhere,
            );
            self.base
                .extrapolate_scalar_into_collider(self.smoke_density_data_id);
        }
        if self.temperature_diffusion_coefficient > f64::EPSILON {
            self.base.diffuse_scalar_layer(
                self.temperature_data_id,
                self.temperature_diffusion_coefficient,
                dt,
                &FluidRegion::Everywhere,
            );
            self.base
                .extrapolate_scalar_into_collider(self.temperature_data_id);
        }

        let keep = 1.0 - self.smoke_decay_factor;
        let density = self
            .base
            .grids_mut()
            .advectable_scalar_data_mut(self.smoke_density_data_id);
        parallel::pool().install(|| {
            density.data.par_iter_mut().for_each(|d| *d *= keep);
        });

        let keep = 1.0 - self.temperature_decay_factor;
        let temperature = self
            .base
            .grids_mut()
            .advectable_scalar_data_mut(self.temperature_data_id);
        parallel::pool().install(|| {
            temperature.data.par_iter_mut().for_each(|t| *t *= keep);
        });
    }
}

impl FluidSolver for GridSmokeSolver {
    fn base(&self) -> &GridFluidSolver {
        &self.base
    }

    fn base_mut(&mut self) -> &mut GridFluidSolver {
        &mut self.base
    }

    /// Buoyancy replaces gravity: the carrier air is in equilibrium and
    /// only the density/temperature contrast drives the flow.
    fn compute_external_forces(&mut self, dt: f64) {
        self.compute_buoyancy_force(dt);
    }

    fn on_end_advance_time_step(&mut self, dt: f64) {
        self.compute_layer_diffusion(dt);
    }
}

/// Builder for [`GridSmokeSolver`]; configuration is validated and
/// clamped at `build`.
#[derive(Clone, Debug)]
pub struct GridSmokeSolverBuilder {
    base: GridFluidSolverBuilder,
    smoke_diffusion_coefficient: f64,
    temperature_diffusion_coefficient: f64,
    buoyancy_smoke_density_factor: f64,
    buoyancy_temperature_factor: f64,
    smoke_decay_factor: f64,
    temperature_decay_factor: f64,
}

impl GridSmokeSolverBuilder {
    pub fn new() -> Self {
        Self {
            base: GridFluidSolverBuilder::new(),
            smoke_diffusion_coefficient: 0.0,
            temperature_diffusion_coefficient: 0.0,
            buoyancy_smoke_density_factor: -0.000625,
            buoyancy_temperature_factor: 5.0,
            smoke_decay_factor: 0.001,
            temperature_decay_factor: 0.001,
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

    pub fn with_smoke_diffusion_coefficient(mut self, coefficient: f64) -> Self {
        self.smoke_diffusion_coefficient = coefficient;
        self
    }

    pub fn with_temperature_diffusion_coefficient(mut self, coefficient: f64) -> Self {
        self.temperature_diffusion_coefficient = coefficient;
        self
    }

    pub fn with_buoyancy_smoke_density_factor(mut self, factor: f64) -> Self {
        self.buoyancy_smoke_density_factor = factor;
        self
    }

    pub fn with_buoyancy_temperature_factor(mut self, factor: f64) -> Self {
        self.buoyancy_temperature_factor = factor;
        self
    }

    pub fn with_smoke_decay_factor(mut self, factor: f64) -> Self {
        self.smoke_decay_factor = factor;
        self
    }

    pub fn with_temperature_decay_factor(mut self, factor: f64) -> Self {
        self.temperature_decay_factor = factor;
        self
    }

    pub fn build(self) -> GridSmokeSolver {
        let mut solver = GridSmokeSolver::with_base(self.base.build());
        solver.set_smoke_diffusion_coefficient(self.smoke_diffusion_coefficient);
        solver.set_temperature_diffusion_coefficient(self.temperature_diffusion_coefficient);
        solver.set_buoyancy_smoke_density_factor(self.buoyancy_smoke_density_factor);
        solver.set_buoyancy_temperature_factor(self.buoyancy_temperature_factor);
        solver.set_smoke_decay_factor(self.smoke_decay_factor);
        solver.set_temperature_decay_factor(self.temperature_decay_factor);
        solver
    }
}

impl Default for GridSmokeSolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
