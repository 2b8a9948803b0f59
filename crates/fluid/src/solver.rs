//! Grid fluid solver driver: forces, viscosity, pressure and advection
//! per sub-step, with CFL-bounded sub-stepping.

use std::time::Instant;

use glam::DVec2;
use rayon::prelude::*;

use crate::advection::{AdvectionSolver, CubicSemiLagrangian};
use crate::boundary::{ColliderVelocityField, GridBoundaryConditionSolver, DIRECTION_ALL};
use crate::collider::Collider;
use crate::diffusion::{GridBackwardEulerDiffusionSolver, GridDiffusionSolver};
use crate::field::{ConstantScalarField, ScalarField};
use crate::frame::Frame;
use crate::grid::{extrapolate_to_region, FaceCenteredGrid, ScalarGrid};
use crate::level_set::is_inside_sdf;
use crate::parallel;
use crate::pressure::{GridFractionalSinglePhasePressureSolver, GridPressureSolver};
use crate::system_data::GridSystemData;

/// Fluid-occupied region seen by the viscosity and pressure stages.
#[derive(Clone, Debug)]
pub enum FluidRegion {
    /// The whole domain is fluid.
    Everywhere,
    /// Fluid wherever the signed distance is negative.
    SignedDistance(ScalarGrid),
}

impl ScalarField for FluidRegion {
    fn sample(&self, point: DVec2) -> f64 {
        match self {
            FluidRegion::Everywhere => -f64::MAX,
            FluidRegion::SignedDistance(sdf) => sdf.sample(point),
        }
    }
}

/// Frame stepping and the per-sub-step stage pipeline shared by every
/// grid-based solver.
///
/// Variants embed a [`GridFluidSolver`] and expose it through `base` /
/// `base_mut`; the provided methods run the standard pipeline and call
/// the `on_*` hooks and the overridable stage methods at fixed points.
/// The stage order never changes: begin, external forces, viscosity,
/// pressure, advection, end. Each velocity-mutating stage re-applies the
/// boundary condition before the next stage reads the field.
pub trait FluidSolver {
    fn base(&self) -> &GridFluidSolver;

    fn base_mut(&mut self) -> &mut GridFluidSolver;

    /// One-time setup, called before the first frame advances.
    fn initialize(&mut self) {}

    /// Advance to `frame`, one sub-stepped time step per index unit.
    /// Frames at or below the current index are ignored.
    fn update(&mut self, frame: Frame) {
        if frame.index <= self.base().current_frame.index {
            return;
        }
        if self.base().current_frame.index < 0 {
            self.initialize();
        }
        let number_of_frames = frame.index - self.base().current_frame.index;
        for _ in 0..number_of_frames {
            self.advance_time_step(frame.time_interval_in_seconds);
        }
        self.base_mut().current_frame = frame;
    }

    /// Split `dt` into equal sub-steps so each stays within the CFL
    /// limit, then run the pipeline once per sub-step.
    fn advance_time_step(&mut self, dt: f64) {
        let number_of_steps = self.number_of_sub_time_steps(dt);
        let sub_dt = dt / f64::from(number_of_steps);
        self.base_mut().last_number_of_sub_time_steps = number_of_steps;
        log::debug!(
            "advancing {:.4e} s in {} sub-steps of {:.4e} s",
            dt,
            number_of_steps,
            sub_dt
        );
        for _ in 0..number_of_steps {
            self.on_advance_time_step(sub_dt);
        }
    }

    /// Number of sub-steps a step of `dt` needs to stay within the CFL
    /// limit.
    fn number_of_sub_time_steps(&self, dt: f64) -> u32 {
        let cfl = self.base().cfl(dt);
        (cfl / self.base().max_cfl).ceil().max(1.0) as u32
    }

    /// One sub-step of the pipeline.
    fn on_advance_time_step(&mut self, dt: f64) {
        if self.base().grids.width == 0 || self.base().grids.height == 0 {
            return;
        }

        self.base_mut().begin_advance_time_step();
        self.on_begin_advance_time_step(dt);

        let timer = Instant::now();
        self.compute_external_forces(dt);
        log::debug!("external forces: {:.2} ms", timer.elapsed().as_secs_f64() * 1e3);

        let timer = Instant::now();
        self.compute_viscosity(dt);
        log::debug!("viscosity: {:.2} ms", timer.elapsed().as_secs_f64() * 1e3);

        let timer = Instant::now();
        self.compute_pressure(dt);
        log::debug!("pressure: {:.2} ms", timer.elapsed().as_secs_f64() * 1e3);

        let timer = Instant::now();
        self.compute_advection(dt);
        log::debug!("advection: {:.2} ms", timer.elapsed().as_secs_f64() * 1e3);

        self.on_end_advance_time_step(dt);
    }

    /// Called after the collider refresh, before the force stages.
    fn on_begin_advance_time_step(&mut self, _dt: f64) {}

    /// Called after advection completes the sub-step.
    fn on_end_advance_time_step(&mut self, _dt: f64) {}

    /// Region the viscosity and pressure stages treat as fluid.
    fn fluid_region(&self) -> FluidRegion {
        FluidRegion::Everywhere
    }

    fn compute_external_forces(&mut self, dt: f64) {
        self.base_mut().compute_gravity(dt);
    }

    fn compute_viscosity(&mut self, dt: f64) {
        if self.base().viscosity_coefficient > f64::EPSILON {
            let fluid = self.fluid_region();
            self.base_mut().diffuse_velocity(dt, &fluid);
        }
    }

    fn compute_pressure(&mut self, dt: f64) {
        let fluid = self.fluid_region();
        self.base_mut().project_velocity(dt, &fluid);
    }

    fn compute_advection(&mut self, dt: f64) {
        self.base_mut().advect_fields(dt);
    }
}

/// Single-phase incompressible flow on a staggered grid.
///
/// Owns the grid state and the four stage solvers. The defaults follow
/// the usual pairing: cubic semi-Lagrangian advection, backward Euler
/// diffusion, the fractional pressure solver with its matching boundary
/// condition solver, and gravity of (0, -9.8).
pub struct GridFluidSolver {
    grids: GridSystemData,
    collider: Option<Collider>,
    gravity: DVec2,
    viscosity_coefficient: f64,
    max_cfl: f64,
    closed_domain_boundary_flag: u32,
    use_compressed_linear_system: bool,
    advection_solver: Box<dyn AdvectionSolver>,
    diffusion_solver: Box<dyn GridDiffusionSolver>,
    pressure_solver: Box<dyn GridPressureSolver>,
    boundary_condition_solver: Box<dyn GridBoundaryConditionSolver>,
    current_frame: Frame,
    last_number_of_sub_time_steps: u32,
}

impl GridFluidSolver {
    pub fn new(width: usize, height: usize, spacing: DVec2, origin: DVec2) -> Self {
        let pressure_solver: Box<dyn GridPressureSolver> =
            Box::new(GridFractionalSinglePhasePressureSolver::new());
        let boundary_condition_solver = pressure_solver.suggested_boundary_condition_solver();
        Self {
            grids: GridSystemData::new(width, height, spacing, origin),
            collider: None,
            gravity: DVec2::new(0.0, -9.8),
            viscosity_coefficient: 0.0,
            max_cfl: 5.0,
            closed_domain_boundary_flag: DIRECTION_ALL,
            use_compressed_linear_system: false,
            advection_solver: Box::new(CubicSemiLagrangian::new()),
            diffusion_solver: Box::new(GridBackwardEulerDiffusionSolver::new()),
            pressure_solver,
            boundary_condition_solver,
            current_frame: Frame::new(-1, 1.0 / 60.0),
            last_number_of_sub_time_steps: 0,
        }
    }

    pub fn builder() -> GridFluidSolverBuilder {
        GridFluidSolverBuilder::new()
    }

    #[inline]
    pub fn grids(&self) -> &GridSystemData {
        &self.grids
    }

    #[inline]
    pub fn grids_mut(&mut self) -> &mut GridSystemData {
        &mut self.grids
    }

    #[inline]
    pub fn velocity(&self) -> &FaceCenteredGrid {
        self.grids.velocity()
    }

    #[inline]
    pub fn velocity_mut(&mut self) -> &mut FaceCenteredGrid {
        self.grids.velocity_mut()
    }

    #[inline]
    pub fn gravity(&self) -> DVec2 {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: DVec2) {
        self.gravity = gravity;
    }

    #[inline]
    pub fn viscosity_coefficient(&self) -> f64 {
        self.viscosity_coefficient
    }

    pub fn set_viscosity_coefficient(&mut self, coefficient: f64) {
        self.viscosity_coefficient = coefficient.max(0.0);
    }

    #[inline]
    pub fn max_cfl(&self) -> f64 {
        self.max_cfl
    }

    pub fn set_max_cfl(&mut self, max_cfl: f64) {
        self.max_cfl = max_cfl.max(f64::EPSILON);
    }

    #[inline]
    pub fn collider(&self) -> Option<&Collider> {
        self.collider.as_ref()
    }

    pub fn set_collider(&mut self, collider: Option<Collider>) {
        self.collider = collider;
    }

    #[inline]
    pub fn current_frame(&self) -> Frame {
        self.current_frame
    }

    /// Sub-steps executed by the most recent `advance_time_step`.
    #[inline]
    pub fn last_number_of_sub_time_steps(&self) -> u32 {
        self.last_number_of_sub_time_steps
    }

    #[inline]
    pub fn closed_domain_boundary_flag(&self) -> u32 {
        self.closed_domain_boundary_flag
    }

    /// Which domain walls act as solid boundaries. Takes effect on the
    /// next boundary condition application.
    pub fn set_closed_domain_boundary_flag(&mut self, flag: u32) {
        self.closed_domain_boundary_flag = flag;
        self.boundary_condition_solver
            .set_closed_domain_boundary_flag(flag);
    }

    #[inline]
    pub fn uses_compressed_linear_system(&self) -> bool {
        self.use_compressed_linear_system
    }

    /// Ask the pressure stage to assemble fluid-cell-only systems where
    /// the configured backend supports them.
    pub fn set_use_compressed_linear_system(&mut self, on: bool) {
        self.use_compressed_linear_system = on;
    }

    pub fn set_advection_solver(&mut self, solver: Box<dyn AdvectionSolver>) {
        self.advection_solver = solver;
    }

    pub fn set_diffusion_solver(&mut self, solver: Box<dyn GridDiffusionSolver>) {
        self.diffusion_solver = solver;
    }

    /// Swap the pressure solver and adopt the boundary condition solver
    /// it pairs with, keeping the closed-domain flag.
    pub fn set_pressure_solver(&mut self, solver: Box<dyn GridPressureSolver>) {
        self.pressure_solver = solver;
        self.boundary_condition_solver = self.pressure_solver.suggested_boundary_condition_solver();
        self.boundary_condition_solver
            .set_closed_domain_boundary_flag(self.closed_domain_boundary_flag);
    }

    #[inline]
    pub fn boundary_condition_solver(&self) -> &dyn GridBoundaryConditionSolver {
        self.boundary_condition_solver.as_ref()
    }

    /// Largest per-axis CFL number over the grid for a step of `dt`,
    /// accounting for one step of gravity.
    pub fn cfl(&self, dt: f64) -> f64 {
        let vel = self.grids.velocity();
        let mut max_vel: f64 = 0.0;
        for j in 0..self.grids.height {
            for i in 0..self.grids.width {
                let v = (vel.value_at_cell_center(i, j) + dt * self.gravity).abs();
                max_vel = max_vel.max(v.x).max(v.y);
            }
        }
        let min_spacing = self.grids.spacing.x.min(self.grids.spacing.y);
        max_vel * dt / min_spacing
    }

    /// Refresh the boundary solver against the current collider and
    /// re-clamp the velocity, in case the field was edited externally.
    fn begin_advance_time_step(&mut self) {
        let (width, height) = (self.grids.width, self.grids.height);
        let (spacing, origin) = (self.grids.spacing, self.grids.origin);
        self.boundary_condition_solver.update_collider(
            self.collider.as_ref(),
            width,
            height,
            spacing,
            origin,
        );
        self.apply_boundary_condition();
    }

    /// Re-apply collider and domain-wall constraints to the velocity.
    pub fn apply_boundary_condition(&mut self) {
        let depth = self.max_cfl.ceil() as u32;
        self.boundary_condition_solver
            .constrain_velocity(self.grids.velocity_mut(), depth);
    }

    /// Add `dt * gravity` to every velocity face.
    pub fn compute_gravity(&mut self, dt: f64) {
        if self.gravity.length_squared() < f64::EPSILON {
            return;
        }
        let gravity = self.gravity;
        let vel = self.grids.velocity_mut();
        if gravity.x != 0.0 {
            parallel::pool().install(|| {
                vel.u.par_iter_mut().for_each(|u| *u += dt * gravity.x);
            });
        }
        if gravity.y != 0.0 {
            parallel::pool().install(|| {
                vel.v.par_iter_mut().for_each(|v| *v += dt * gravity.y);
            });
        }
        self.apply_boundary_condition();
    }

    /// Implicit viscosity step on the velocity, then boundary re-apply.
    pub fn diffuse_velocity(&mut self, dt: f64, fluid_sdf: &dyn ScalarField) {
        if self.viscosity_coefficient <= f64::EPSILON {
            return;
        }
        let source = self.grids.velocity().clone();
        let open = ConstantScalarField::new(f64::MAX);
        let boundary_sdf: &dyn ScalarField = match self.boundary_condition_solver.collider_sdf() {
            Some(sdf) => sdf,
            None => &open,
        };
        self.diffusion_solver.solve_face_centered(
            &source,
            self.viscosity_coefficient,
            dt,
            self.grids.velocity_mut(),
            boundary_sdf,
            fluid_sdf,
        );
        self.apply_boundary_condition();
    }

    /// One implicit diffusion step on a registered scalar layer.
    pub fn diffuse_scalar_layer(
        &mut self,
        idx: usize,
        coefficient: f64,
        dt: f64,
        fluid_sdf: &dyn ScalarField,
    ) {
        if coefficient <= f64::EPSILON {
            return;
        }
        let source = self.grids.advectable_scalar_data(idx).clone();
        let open = ConstantScalarField::new(f64::MAX);
        let boundary_sdf: &dyn ScalarField = match self.boundary_condition_solver.collider_sdf() {
            Some(sdf) => sdf,
            None => &open,
        };
        self.diffusion_solver.solve_scalar(
            &source,
            coefficient,
            dt,
            self.grids.advectable_scalar_data_mut(idx),
            boundary_sdf,
            fluid_sdf,
        );
    }

    /// Pressure projection over the fluid region, then boundary re-apply.
    pub fn project_velocity(&mut self, dt: f64, fluid_sdf: &dyn ScalarField) {
        let input = self.grids.velocity().clone();
        let open = ConstantScalarField::new(f64::MAX);
        let boundary_sdf: &dyn ScalarField = match self.boundary_condition_solver.collider_sdf() {
            Some(sdf) => sdf,
            None => &open,
        };
        let boundary_velocity = ColliderVelocityField::new(self.boundary_condition_solver.as_ref());
        self.pressure_solver.solve(
            &input,
            dt,
            self.grids.velocity_mut(),
            boundary_sdf,
            &boundary_velocity,
            fluid_sdf,
            self.use_compressed_linear_system,
        );
        self.apply_boundary_condition();
    }

    /// Advect every registered layer and then the velocity itself through
    /// the pre-advection flow, ending with a boundary re-apply. Advected
    /// layers are refilled inside the collider by extrapolation.
    pub fn advect_fields(&mut self, dt: f64) {
        let flow = self.grids.velocity().clone();
        let open = ConstantScalarField::new(f64::MAX);

        for idx in 0..self.grids.number_of_advectable_scalar_data() {
            let source = self.grids.advectable_scalar_data(idx).clone();
            let boundary_sdf: &dyn ScalarField =
                match self.boundary_condition_solver.collider_sdf() {
                    Some(sdf) => sdf,
                    None => &open,
                };
            self.advection_solver.advect_scalar(
                &source,
                &flow,
                dt,
                self.grids.advectable_scalar_data_mut(idx),
                boundary_sdf,
            );
            self.extrapolate_scalar_into_collider(idx);
        }

        for idx in 0..self.grids.number_of_advectable_vector_data() {
            let source = self.grids.advectable_vector_data(idx).clone();
            let boundary_sdf: &dyn ScalarField =
                match self.boundary_condition_solver.collider_sdf() {
                    Some(sdf) => sdf,
                    None => &open,
                };
            self.advection_solver.advect_face_centered(
                &source,
                &flow,
                dt,
                self.grids.advectable_vector_data_mut(idx),
                boundary_sdf,
            );
            self.extrapolate_vector_into_collider(idx);
        }

        let boundary_sdf: &dyn ScalarField = match self.boundary_condition_solver.collider_sdf() {
            Some(sdf) => sdf,
            None => &open,
        };
        self.advection_solver
            .advect_face_centered(&flow, &flow, dt, self.grids.velocity_mut(), boundary_sdf);

        let depth = self.max_cfl.ceil() as u32;
        if let Some(sdf) = self.boundary_condition_solver.collider_sdf() {
            extrapolate_faces_into_collider(sdf, self.grids.velocity_mut(), depth);
        }
        self.apply_boundary_condition();
    }

    /// Refill a scalar layer inside the collider from outside samples.
    pub fn extrapolate_scalar_into_collider(&mut self, idx: usize) {
        let depth = self.max_cfl.ceil() as u32;
        let collider_sdf = match self.boundary_condition_solver.collider_sdf() {
            Some(sdf) => sdf,
            None => return,
        };
        let grid = self.grids.advectable_scalar_data_mut(idx);
        let (width, height) = (grid.width, grid.height);
        let mut valid = vec![false; width * height];
        for j in 0..height {
            for i in 0..width {
                valid[j * width + i] = !is_inside_sdf(collider_sdf.sample(grid.data_position(i, j)));
            }
        }
        extrapolate_to_region(&mut grid.data, &valid, width, height, depth);
    }

    /// Refill a vector layer inside the collider from outside samples.
    pub fn extrapolate_vector_into_collider(&mut self, idx: usize) {
        let depth = self.max_cfl.ceil() as u32;
        let collider_sdf = match self.boundary_condition_solver.collider_sdf() {
            Some(sdf) => sdf,
            None => return,
        };
        extrapolate_faces_into_collider(
            collider_sdf,
            self.grids.advectable_vector_data_mut(idx),
            depth,
        );
    }
}

impl FluidSolver for GridFluidSolver {
    fn base(&self) -> &GridFluidSolver {
        self
    }

    fn base_mut(&mut self) -> &mut GridFluidSolver {
        self
    }
}

fn extrapolate_faces_into_collider(
    collider_sdf: &ScalarGrid,
    grid: &mut FaceCenteredGrid,
    depth: u32,
) {
    let (width, height) = (grid.width, grid.height);

    let mut valid_u = vec![false; (width + 1) * height];
    for j in 0..height {
        for i in 0..=width {
            valid_u[grid.u_index(i, j)] = !is_inside_sdf(collider_sdf.sample(grid.u_position(i, j)));
        }
    }
    extrapolate_to_region(&mut grid.u, &valid_u, width + 1, height, depth);

    let mut valid_v = vec![false; width * (height + 1)];
    for j in 0..=height {
        for i in 0..width {
            valid_v[grid.v_index(i, j)] = !is_inside_sdf(collider_sdf.sample(grid.v_position(i, j)));
        }
    }
    extrapolate_to_region(&mut grid.v, &valid_v, width, height + 1, depth);
}

/// Builder for [`GridFluidSolver`]; configuration is validated at
/// `build`.
#[derive(Clone, Debug)]
pub struct GridFluidSolverBuilder {
    resolution: (usize, usize),
    spacing: DVec2,
    origin: DVec2,
    gravity: DVec2,
    viscosity_coefficient: f64,
    max_cfl: f64,
}

impl GridFluidSolverBuilder {
    pub fn new() -> Self {
        Self {
            resolution: (1, 1),
            spacing: DVec2::splat(1.0),
            origin: DVec2::ZERO,
            gravity: DVec2::new(0.0, -9.8),
            viscosity_coefficient: 0.0,
            max_cfl: 5.0,
        }
    }

    pub fn with_resolution(mut self, width: usize, height: usize) -> Self {
        self.resolution = (width, height);
        self
    }

    pub fn with_spacing(mut self, spacing: DVec2) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_origin(mut self, origin: DVec2) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_gravity(mut self, gravity: DVec2) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_viscosity_coefficient(mut self, coefficient: f64) -> Self {
        self.viscosity_coefficient = coefficient;
        self
    }

    pub fn with_max_cfl(mut self, max_cfl: f64) -> Self {
        self.max_cfl = max_cfl;
        self
    }

    pub fn build(self) -> GridFluidSolver {
        assert!(
            self.resolution.0 > 0 && self.resolution.1 > 0,
            "solver resolution must be at least 1x1, got {}x{}",
            self.resolution.0,
            self.resolution.1
        );
        assert!(
            self.spacing.x > 0.0 && self.spacing.y > 0.0,
            "grid spacing must be positive, got ({}, {})",
            self.spacing.x,
            self.spacing.y
        );
        assert!(
            self.viscosity_coefficient >= 0.0,
            "viscosity coefficient must be non-negative, got {}",
            self.viscosity_coefficient
        );
        assert!(
            self.max_cfl > 0.0,
            "max CFL must be positive, got {}",
            self.max_cfl
        );
        let mut solver = GridFluidSolver::new(
            self.resolution.0,
            self.resolution.1,
            self.spacing,
            self.origin,
        );
        solver.set_gravity(self.gravity);
        solver.set_viscosity_coefficient(self.viscosity_coefficient);
        solver.set_max_cfl(self.max_cfl);
        solver
    }
}

impl Default for GridFluidSolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
