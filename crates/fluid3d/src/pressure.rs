//! Pressure projection over the staggered velocity grid.

use glam::DVec3;
use rayon::prelude::*;

use crate::boundary::{
    GridBlockedBoundaryConditionSolver, GridBoundaryConditionSolver,
    GridFractionalBoundaryConditionSolver,
};
use crate::fdm::{
    level_dims, FdmCgSolver, FdmCompressedLinearSystem, FdmLinearSystem, FdmLinearSystemSolver,
    FdmMatrix, FdmMatrixRow, FdmMgLinearSystem, FdmMgSolver, FdmMgpcgSolver,
};
use crate::field::{ScalarField, VectorField};
use crate::grid::FaceCenteredGrid;
use crate::level_set::{fraction_inside_sdf, fraction_inside_sdf_quad, is_inside_sdf};
use crate::parallel;

pub const DEFAULT_PRESSURE_TOLERANCE: f64 = 1e-6;
const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Fractional weights below this snap up to it; near-zero matrix entries
/// make the system ill-conditioned.
const MIN_WEIGHT: f64 = 0.01;

/// Linear-system backend of a pressure solver.
///
/// The multigrid backends operate on the level hierarchy instead of a
/// single system, so the choice is an explicit variant rather than a
/// trait object.
pub enum PressureSystemSolver {
    Iterative(Box<dyn FdmLinearSystemSolver>),
    Mg(FdmMgSolver),
    Mgpcg(FdmMgpcgSolver),
}

impl PressureSystemSolver {
    fn max_number_of_levels(&self) -> usize {
        match self {
            PressureSystemSolver::Iterative(_) => 1,
            PressureSystemSolver::Mg(solver) => solver.params().max_number_of_levels,
            PressureSystemSolver::Mgpcg(solver) => solver.mg_params().max_number_of_levels,
        }
    }

    fn last_residual(&self) -> f64 {
        match self {
            PressureSystemSolver::Iterative(solver) => solver.last_residual(),
            PressureSystemSolver::Mg(solver) => solver.last_residual(),
            PressureSystemSolver::Mgpcg(solver) => solver.last_residual(),
        }
    }
}

/// Removes the divergent part of a velocity field.
///
/// `solve` builds the Poisson system from the input velocity and the two
/// SDFs, solves it, and writes the projected velocity to `output` (input
/// and output may alias the same grid contents; faces not owned by the
/// fluid region keep their input values).
pub trait GridPressureSolver: Send {
    #[allow(clippy::too_many_arguments)]
    fn solve(
        &mut self,
        input: &FaceCenteredGrid,
        dt: f64,
        output: &mut FaceCenteredGrid,
        boundary_sdf: &dyn ScalarField,
        boundary_velocity: &dyn VectorField,
        fluid_sdf: &dyn ScalarField,
        use_compressed: bool,
    );

    /// Boundary solver whose masks match this solver's discretization.
    fn suggested_boundary_condition_solver(&self) -> Box<dyn GridBoundaryConditionSolver>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Marker {
    Fluid,
    Air,
    Boundary,
}

/// Index of the largest count; ties fall to the later argument.
fn arg_max3(x: usize, y: usize, z: usize) -> usize {
    if x > y {
        if x > z {
            0
        } else {
            2
        }
    } else if y > z {
        1
    } else {
        2
    }
}

/// Fine-index window for one coarse sample along one axis.
fn coarsening_window(idx: usize, coarse_n: usize) -> [usize; 4] {
    [
        if idx > 0 { 2 * idx - 1 } else { 2 * idx },
        2 * idx,
        2 * idx + 1,
        if idx + 1 < coarse_n {
            2 * idx + 2
        } else {
            2 * idx + 1
        },
    ]
}

const CENTERED_KERNEL: [f64; 4] = [0.125, 0.375, 0.375, 0.125];
const STAGGERED_KERNEL: [f64; 4] = [0.0, 1.0, 0.0, 0.0];

/// 2x downsampling of a flat grid array.
///
/// Axes whose fine dimension is exactly twice the coarse dimension use the
/// centered four-tap kernel; staggered axes (2n+1 faces) collapse onto the
/// aligned fine sample.
fn downsample(
    finer: &[f64],
    finer_width: usize,
    finer_height: usize,
    coarser: &mut [f64],
    coarser_width: usize,
    coarser_height: usize,
    coarser_depth: usize,
) {
    debug_assert_eq!(
        coarser.len(),
        coarser_width * coarser_height * coarser_depth
    );
    let finer_depth = finer.len() / (finer_width * finer_height);

    let (x_taps, x_kernel): (usize, &[f64; 4]) = if finer_width == 2 * coarser_width {
        (4, &CENTERED_KERNEL)
    } else {
        (3, &STAGGERED_KERNEL)
    };
    let (y_taps, y_kernel): (usize, &[f64; 4]) = if finer_height == 2 * coarser_height {
        (4, &CENTERED_KERNEL)
    } else {
        (3, &STAGGERED_KERNEL)
    };
    let (z_taps, z_kernel): (usize, &[f64; 4]) = if finer_depth == 2 * coarser_depth {
        (4, &CENTERED_KERNEL)
    } else {
        (3, &STAGGERED_KERNEL)
    };

    let window = |idx: usize, taps: usize, coarse_n: usize| -> [usize; 4] {
        if taps == 3 {
            [
                if idx > 0 { 2 * idx - 1 } else { 2 * idx },
                2 * idx,
                if idx + 1 < coarse_n { 2 * idx + 1 } else { 2 * idx },
                0,
            ]
        } else {
            coarsening_window(idx, coarse_n)
        }
    };

    for ck in 0..coarser_depth {
        let k_idx = window(ck, z_taps, coarser_depth);
        for cj in 0..coarser_height {
            let j_idx = window(cj, y_taps, coarser_height);
            for ci in 0..coarser_width {
                let i_idx = window(ci, x_taps, coarser_width);
                let mut sum = 0.0;
                for z in 0..z_taps {
                    for y in 0..y_taps {
                        for x in 0..x_taps {
                            sum += x_kernel[x]
                                * y_kernel[y]
                                * z_kernel[z]
                                * finer[(k_idx[z] * finer_height + j_idx[y]) * finer_width
                                    + i_idx[x]];
                        }
                    }
                }
                coarser[(ck * coarser_height + cj) * coarser_width + ci] = sum;
            }
        }
    }
}

/// Halves a velocity grid onto the next multigrid level.
fn restrict_velocity(finer: &FaceCenteredGrid, coarser: &mut FaceCenteredGrid) {
    downsample(
        &finer.u,
        finer.width + 1,
        finer.height,
        &mut coarser.u,
        coarser.width + 1,
        coarser.height,
        coarser.depth,
    );
    downsample(
        &finer.v,
        finer.width,
        finer.height + 1,
        &mut coarser.v,
        coarser.width,
        coarser.height + 1,
        coarser.depth,
    );
    downsample(
        &finer.w,
        finer.width,
        finer.height,
        &mut coarser.w,
        coarser.width,
        coarser.height,
        coarser.depth + 1,
    );
}

/// Projection with binary cell markers; pairs with the blocked boundary
/// solver.
pub struct GridSinglePhasePressureSolver {
    system: FdmLinearSystem,
    comp_system: FdmCompressedLinearSystem,
    mg_system: FdmMgLinearSystem,
    system_solver: PressureSystemSolver,
    markers: Vec<Vec<Marker>>,
    level_dims: Vec<(usize, usize, usize)>,
}

impl Default for GridSinglePhasePressureSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GridSinglePhasePressureSolver {
    pub fn new() -> Self {
        Self::with_system_solver(PressureSystemSolver::Iterative(Box::new(FdmCgSolver::new(
            DEFAULT_MAX_ITERATIONS,
            DEFAULT_PRESSURE_TOLERANCE,
        ))))
    }

    pub fn with_system_solver(system_solver: PressureSystemSolver) -> Self {
        Self {
            system: FdmLinearSystem::new(0, 0, 0),
            comp_system: FdmCompressedLinearSystem::default(),
            mg_system: FdmMgLinearSystem::default(),
            system_solver,
            markers: Vec::new(),
            level_dims: Vec::new(),
        }
    }

    pub fn set_system_solver(&mut self, system_solver: PressureSystemSolver) {
        self.system_solver = system_solver;
    }

    /// Solved pressure of the last `solve` call, row-major over cells.
    pub fn pressure(&self) -> &[f64] {
        match self.system_solver {
            PressureSystemSolver::Iterative(_) => &self.system.x,
            _ => &self.mg_system.levels[0].x,
        }
    }

    fn build_markers(
        &mut self,
        input: &FaceCenteredGrid,
        boundary_sdf: &dyn ScalarField,
        fluid_sdf: &dyn ScalarField,
    ) {
        let max_levels = self.system_solver.max_number_of_levels();
        self.level_dims = level_dims(input.width, input.height, input.depth, max_levels);
        self.markers.resize(self.level_dims.len(), Vec::new());

        let (w0, h0, d0) = self.level_dims[0];
        let finest = &mut self.markers[0];
        finest.clear();
        finest.resize(w0 * h0 * d0, Marker::Air);
        let origin = input.origin;
        let spacing = input.spacing;
        parallel::pool().install(|| {
            finest
                .par_chunks_mut(w0.max(1))
                .enumerate()
                .for_each(|(jk, row)| {
                    let j = jk % h0.max(1);
                    let k = jk / h0.max(1);
                    for (i, marker) in row.iter_mut().enumerate() {
                        let pt = origin
                            + DVec3::new(
                                (i as f64 + 0.5) * spacing.x,
                                (j as f64 + 0.5) * spacing.y,
                                (k as f64 + 0.5) * spacing.z,
                            );
                        *marker = if is_inside_sdf(boundary_sdf.sample(pt)) {
                            Marker::Boundary
                        } else if is_inside_sdf(fluid_sdf.sample(pt)) {
                            Marker::Fluid
                        } else {
                            Marker::Air
                        };
                    }
                });
        });

        for l in 1..self.level_dims.len() {
            let (cw, ch, cd) = self.level_dims[l];
            let (fw, fh, _) = self.level_dims[l - 1];
            let (finer_levels, coarser_levels) = self.markers.split_at_mut(l);
            let finer = &finer_levels[l - 1];
            let coarser = &mut coarser_levels[0];
            coarser.clear();
            coarser.resize(cw * ch * cd, Marker::Air);
            for k in 0..cd {
                let k_idx = coarsening_window(k, cd);
                for j in 0..ch {
                    let j_idx = coarsening_window(j, ch);
                    for i in 0..cw {
                        let i_idx = coarsening_window(i, cw);
                        let mut counts = [0usize; 3];
                        for kk in k_idx {
                            for jj in j_idx {
                                for ii in i_idx {
                                    counts[finer[(kk * fh + jj) * fw + ii] as usize] += 1;
                                }
                            }
                        }
                        coarser[(k * ch + j) * cw + i] =
                            match arg_max3(counts[0], counts[1], counts[2]) {
                                0 => Marker::Fluid,
                                1 => Marker::Air,
                                _ => Marker::Boundary,
                            };
                    }
                }
            }
        }
    }

    fn build_system(&mut self, input: &FaceCenteredGrid, use_compressed: bool) {
        match self.system_solver {
            PressureSystemSolver::Iterative(_) => {
                if use_compressed {
                    self.system.resize(0, 0, 0);
                    build_single_compressed_system(&mut self.comp_system, &self.markers[0], input);
                } else {
                    self.comp_system.clear();
                    if self.system.width() != input.width
                        || self.system.height() != input.height
                        || self.system.depth() != input.depth
                    {
                        self.system.resize(input.width, input.height, input.depth);
                    }
                    build_single_system(
                        &mut self.system.a,
                        &mut self.system.b,
                        &self.markers[0],
                        input,
                    );
                }
            }
            _ => {
                let max_levels = self.system_solver.max_number_of_levels();
                self.mg_system.resize_with_finest(
                    input.width,
                    input.height,
                    input.depth,
                    max_levels,
                );

                let finest = &mut self.mg_system.levels[0];
                build_single_system(&mut finest.a, &mut finest.b, &self.markers[0], input);

                let mut finer_grid = input.clone();
                for l in 1..self.mg_system.levels.len() {
                    let (cw, ch, cd) = self.level_dims[l];
                    let mut coarser_grid = FaceCenteredGrid::new(
                        cw,
                        ch,
                        cd,
                        finer_grid.spacing * 2.0,
                        finer_grid.origin,
                    );
                    restrict_velocity(&finer_grid, &mut coarser_grid);

                    let level = &mut self.mg_system.levels[l];
                    build_single_system(&mut level.a, &mut level.b, &self.markers[l], &coarser_grid);
                    finer_grid = coarser_grid;
                }
            }
        }
    }

    /// Scatters the fluid-row solution back onto the full grid.
    fn decompress_solution(&mut self) {
        let (w0, h0, d0) = self.level_dims[0];
        if self.system.width() != w0 || self.system.height() != h0 || self.system.depth() != d0 {
            self.system.resize(w0, h0, d0);
        }
        self.system.x.fill(0.0);
        let mut row = 0;
        for (idx, marker) in self.markers[0].iter().enumerate() {
            if *marker == Marker::Fluid {
                self.system.x[idx] = self.comp_system.x[row];
                row += 1;
            }
        }
    }

    fn apply_pressure_gradient(&self, input: &FaceCenteredGrid, output: &mut FaceCenteredGrid) {
        let width = input.width;
        let height = input.height;
        let depth = input.depth;
        let slab = width * height;
        let markers = &self.markers[0];
        let x = self.pressure();
        let inv_h = DVec3::new(
            1.0 / input.spacing.x,
            1.0 / input.spacing.y,
            1.0 / input.spacing.z,
        );

        for k in 0..depth {
            for j in 0..height {
                for i in 0..width {
                    let idx = (k * height + j) * width + i;
                    if markers[idx] != Marker::Fluid {
                        continue;
                    }
                    if i + 1 < width && markers[idx + 1] != Marker::Boundary {
                        let u_idx = output.u_index(i + 1, j, k);
                        output.u[u_idx] =
                            input.u_at(i + 1, j, k) + inv_h.x * (x[idx + 1] - x[idx]);
                    }
                    if j + 1 < height && markers[idx + width] != Marker::Boundary {
                        let v_idx = output.v_index(i, j + 1, k);
                        output.v[v_idx] =
                            input.v_at(i, j + 1, k) + inv_h.y * (x[idx + width] - x[idx]);
                    }
                    if k + 1 < depth && markers[idx + slab] != Marker::Boundary {
                        let w_idx = output.w_index(i, j, k + 1);
                        output.w[w_idx] =
                            input.w_at(i, j, k + 1) + inv_h.z * (x[idx + slab] - x[idx]);
                    }
                }
            }
        }
    }
}

impl GridPressureSolver for GridSinglePhasePressureSolver {
    fn solve(
        &mut self,
        input: &FaceCenteredGrid,
        _dt: f64,
        output: &mut FaceCenteredGrid,
        boundary_sdf: &dyn ScalarField,
        _boundary_velocity: &dyn VectorField,
        fluid_sdf: &dyn ScalarField,
        use_compressed: bool,
    ) {
        self.build_markers(input, boundary_sdf, fluid_sdf);

        let compressed = use_compressed
            && matches!(
                &self.system_solver,
                PressureSystemSolver::Iterative(solver) if solver.can_solve_compressed()
            );
        self.build_system(input, compressed);

        let converged = match &mut self.system_solver {
            PressureSystemSolver::Iterative(solver) => {
                if compressed {
                    let ok = solver.solve_compressed(&mut self.comp_system);
                    self.decompress_solution();
                    ok
                } else {
                    solver.solve(&mut self.system)
                }
            }
            PressureSystemSolver::Mg(solver) => solver.solve(&mut self.mg_system),
            PressureSystemSolver::Mgpcg(solver) => solver.solve(&mut self.mg_system),
        };
        if !converged {
            log::warn!(
                "pressure solve did not converge: residual={:e}",
                self.system_solver.last_residual()
            );
        }

        self.apply_pressure_gradient(input, output);
    }

    fn suggested_boundary_condition_solver(&self) -> Box<dyn GridBoundaryConditionSolver> {
        Box::new(GridBlockedBoundaryConditionSolver::new())
    }
}

fn build_single_system(
    a: &mut FdmMatrix,
    b: &mut [f64],
    markers: &[Marker],
    input: &FaceCenteredGrid,
) {
    let width = input.width;
    let height = input.height;
    let depth = input.depth;
    let slab = width * height;
    let inv_h = DVec3::new(
        1.0 / input.spacing.x,
        1.0 / input.spacing.y,
        1.0 / input.spacing.z,
    );
    let inv_h_sqr = inv_h * inv_h;

    parallel::pool().install(|| {
        a.rows
            .par_chunks_mut(width.max(1))
            .zip(b.par_chunks_mut(width.max(1)))
            .enumerate()
            .for_each(|(jk, (row_chunk, b_chunk))| {
                let j = jk % height.max(1);
                let k = jk / height.max(1);
                for (i, (row, rhs)) in row_chunk.iter_mut().zip(b_chunk.iter_mut()).enumerate() {
                    let idx = (k * height + j) * width + i;
                    *row = FdmMatrixRow::default();
                    *rhs = 0.0;
                    if markers[idx] != Marker::Fluid {
                        row.center = 1.0;
                        continue;
                    }

                    *rhs = input.divergence_at_cell(i, j, k);

                    if i + 1 < width && markers[idx + 1] != Marker::Boundary {
                        row.center += inv_h_sqr.x;
                        if markers[idx + 1] == Marker::Fluid {
                            row.right -= inv_h_sqr.x;
                        }
                    }
                    if i > 0 && markers[idx - 1] != Marker::Boundary {
                        row.center += inv_h_sqr.x;
                    }
                    if j + 1 < height && markers[idx + width] != Marker::Boundary {
                        row.center += inv_h_sqr.y;
                        if markers[idx + width] == Marker::Fluid {
                            row.up -= inv_h_sqr.y;
                        }
                    }
                    if j > 0 && markers[idx - width] != Marker::Boundary {
                        row.center += inv_h_sqr.y;
                    }
                    if k + 1 < depth && markers[idx + slab] != Marker::Boundary {
                        row.center += inv_h_sqr.z;
                        if markers[idx + slab] == Marker::Fluid {
                            row.front -= inv_h_sqr.z;
                        }
                    }
                    if k > 0 && markers[idx - slab] != Marker::Boundary {
                        row.center += inv_h_sqr.z;
                    }
                }
            });
    });
}

fn build_single_compressed_system(
    comp: &mut FdmCompressedLinearSystem,
    markers: &[Marker],
    input: &FaceCenteredGrid,
) {
    let width = input.width;
    let height = input.height;
    let depth = input.depth;
    let slab = width * height;
    let inv_h = DVec3::new(
        1.0 / input.spacing.x,
        1.0 / input.spacing.y,
        1.0 / input.spacing.z,
    );
    let inv_h_sqr = inv_h * inv_h;

    comp.clear();

    let mut coord_to_index = vec![0usize; width * height * depth];
    let mut num_rows = 0usize;
    for (idx, marker) in markers.iter().enumerate() {
        if *marker == Marker::Fluid {
            coord_to_index[idx] = num_rows;
            num_rows += 1;
        }
    }

    comp.a.row_pointers.push(0);
    for k in 0..depth {
        for j in 0..height {
            for i in 0..width {
                let idx = (k * height + j) * width + i;
                if markers[idx] != Marker::Fluid {
                    continue;
                }

                comp.b.push(input.divergence_at_cell(i, j, k));

                let center_pos = comp.a.non_zeros.len();
                comp.a.non_zeros.push(0.0);
                comp.a.column_indices.push(coord_to_index[idx]);
                let mut center = 0.0;

                if i + 1 < width && markers[idx + 1] != Marker::Boundary {
                    center += inv_h_sqr.x;
                    if markers[idx + 1] == Marker::Fluid {
                        comp.a.non_zeros.push(-inv_h_sqr.x);
                        comp.a.column_indices.push(coord_to_index[idx + 1]);
                    }
                }
                if i > 0 && markers[idx - 1] != Marker::Boundary {
                    center += inv_h_sqr.x;
                    if markers[idx - 1] == Marker::Fluid {
                        comp.a.non_zeros.push(-inv_h_sqr.x);
                        comp.a.column_indices.push(coord_to_index[idx - 1]);
                    }
                }
                if j + 1 < height && markers[idx + width] != Marker::Boundary {
                    center += inv_h_sqr.y;
                    if markers[idx + width] == Marker::Fluid {
                        comp.a.non_zeros.push(-inv_h_sqr.y);
                        comp.a.column_indices.push(coord_to_index[idx + width]);
                    }
                }
                if j > 0 && markers[idx - width] != Marker::Boundary {
                    center += inv_h_sqr.y;
                    if markers[idx - width] == Marker::Fluid {
                        comp.a.non_zeros.push(-inv_h_sqr.y);
                        comp.a.column_indices.push(coord_to_index[idx - width]);
                    }
                }
                if k + 1 < depth && markers[idx + slab] != Marker::Boundary {
                    center += inv_h_sqr.z;
                    if markers[idx + slab] == Marker::Fluid {
                        comp.a.non_zeros.push(-inv_h_sqr.z);
                        comp.a.column_indices.push(coord_to_index[idx + slab]);
                    }
                }
                if k > 0 && markers[idx - slab] != Marker::Boundary {
                    center += inv_h_sqr.z;
                    if markers[idx - slab] == Marker::Fluid {
                        comp.a.non_zeros.push(-inv_h_sqr.z);
                        comp.a.column_indices.push(coord_to_index[idx - slab]);
                    }
                }

                comp.a.non_zeros[center_pos] = center;
                comp.a.row_pointers.push(comp.a.column_indices.len());
            }
        }
    }
    comp.x.resize(num_rows, 0.0);
}

/// Projection with sub-cell face weights and ghost-fluid free surfaces;
/// pairs with the fractional boundary solver.
pub struct GridFractionalSinglePhasePressureSolver {
    system: FdmLinearSystem,
    comp_system: FdmCompressedLinearSystem,
    mg_system: FdmMgLinearSystem,
    system_solver: PressureSystemSolver,
    u_weights: Vec<Vec<f64>>,
    v_weights: Vec<Vec<f64>>,
    w_weights: Vec<Vec<f64>>,
    cell_sdf: Vec<Vec<f64>>,
    level_dims: Vec<(usize, usize, usize)>,
}

impl Default for GridFractionalSinglePhasePressureSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GridFractionalSinglePhasePressureSolver {
    pub fn new() -> Self {
        Self::with_system_solver(PressureSystemSolver::Iterative(Box::new(FdmCgSolver::new(
            DEFAULT_MAX_ITERATIONS,
            DEFAULT_PRESSURE_TOLERANCE,
        ))))
    }

    pub fn with_system_solver(system_solver: PressureSystemSolver) -> Self {
        Self {
            system: FdmLinearSystem::new(0, 0, 0),
            comp_system: FdmCompressedLinearSystem::default(),
            mg_system: FdmMgLinearSystem::default(),
            system_solver,
            u_weights: Vec::new(),
            v_weights: Vec::new(),
            w_weights: Vec::new(),
            cell_sdf: Vec::new(),
            level_dims: Vec::new(),
        }
    }

    pub fn set_system_solver(&mut self, system_solver: PressureSystemSolver) {
        self.system_solver = system_solver;
    }

    /// Solved pressure of the last `solve` call, row-major over cells.
    pub fn pressure(&self) -> &[f64] {
        match self.system_solver {
            PressureSystemSolver::Iterative(_) => &self.system.x,
            _ => &self.mg_system.levels[0].x,
        }
    }

    fn build_weights(
        &mut self,
        input: &FaceCenteredGrid,
        boundary_sdf: &dyn ScalarField,
        fluid_sdf: &dyn ScalarField,
    ) {
        let max_levels = self.system_solver.max_number_of_levels();
        self.level_dims = level_dims(input.width, input.height, input.depth, max_levels);
        let num_levels = self.level_dims.len();
        self.u_weights.resize(num_levels, Vec::new());
        self.v_weights.resize(num_levels, Vec::new());
        self.w_weights.resize(num_levels, Vec::new());
        self.cell_sdf.resize(num_levels, Vec::new());

        let (w0, h0, d0) = self.level_dims[0];
        let h = input.spacing;
        let half_x = DVec3::new(0.5 * h.x, 0.0, 0.0);
        let half_y = DVec3::new(0.0, 0.5 * h.y, 0.0);
        let half_z = DVec3::new(0.0, 0.0, 0.5 * h.z);

        let face_weight = |pt: DVec3, half_a: DVec3, half_b: DVec3| -> f64 {
            let phi00 = boundary_sdf.sample(pt - half_a - half_b);
            let phi10 = boundary_sdf.sample(pt + half_a - half_b);
            let phi01 = boundary_sdf.sample(pt - half_a + half_b);
            let phi11 = boundary_sdf.sample(pt + half_a + half_b);
            let frac = fraction_inside_sdf_quad(phi00, phi10, phi01, phi11);
            let mut weight = (1.0 - frac).clamp(0.0, 1.0);
            if weight < MIN_WEIGHT && weight > 0.0 {
                weight = MIN_WEIGHT;
            }
            weight
        };

        let sdf0 = &mut self.cell_sdf[0];
        sdf0.clear();
        sdf0.resize(w0 * h0 * d0, 0.0);
        for k in 0..d0 {
            for j in 0..h0 {
                for i in 0..w0 {
                    sdf0[(k * h0 + j) * w0 + i] =
                        fluid_sdf.sample(input.cell_center_position(i, j, k));
                }
            }
        }

        let uw0 = &mut self.u_weights[0];
        uw0.clear();
        uw0.resize((w0 + 1) * h0 * d0, 0.0);
        for k in 0..d0 {
            for j in 0..h0 {
                for i in 0..=w0 {
                    uw0[(k * h0 + j) * (w0 + 1) + i] =
                        face_weight(input.u_position(i, j, k), half_y, half_z);
                }
            }
        }

        let vw0 = &mut self.v_weights[0];
        vw0.clear();
        vw0.resize(w0 * (h0 + 1) * d0, 0.0);
        for k in 0..d0 {
            for j in 0..=h0 {
                for i in 0..w0 {
                    vw0[(k * (h0 + 1) + j) * w0 + i] =
                        face_weight(input.v_position(i, j, k), half_z, half_x);
                }
            }
        }

        let ww0 = &mut self.w_weights[0];
        ww0.clear();
        ww0.resize(w0 * h0 * (d0 + 1), 0.0);
        for k in 0..=d0 {
            for j in 0..h0 {
                for i in 0..w0 {
                    ww0[(k * h0 + j) * w0 + i] =
                        face_weight(input.w_position(i, j, k), half_x, half_y);
                }
            }
        }

        for l in 1..num_levels {
            let (cw, ch, cd) = self.level_dims[l];
            let (fw, fh, _) = self.level_dims[l - 1];

            let (finer, coarser) = self.cell_sdf.split_at_mut(l);
            coarser[0].clear();
            coarser[0].resize(cw * ch * cd, 0.0);
            downsample(&finer[l - 1], fw, fh, &mut coarser[0], cw, ch, cd);

            let (finer, coarser) = self.u_weights.split_at_mut(l);
            coarser[0].clear();
            coarser[0].resize((cw + 1) * ch * cd, 0.0);
            downsample(&finer[l - 1], fw + 1, fh, &mut coarser[0], cw + 1, ch, cd);

            let (finer, coarser) = self.v_weights.split_at_mut(l);
            coarser[0].clear();
            coarser[0].resize(cw * (ch + 1) * cd, 0.0);
            downsample(&finer[l - 1], fw, fh + 1, &mut coarser[0], cw, ch + 1, cd);

            let (finer, coarser) = self.w_weights.split_at_mut(l);
            coarser[0].clear();
            coarser[0].resize(cw * ch * (cd + 1), 0.0);
            downsample(&finer[l - 1], fw, fh, &mut coarser[0], cw, ch, cd + 1);
        }
    }

    fn build_system(
        &mut self,
        input: &FaceCenteredGrid,
        boundary_velocity: &dyn VectorField,
        use_compressed: bool,
    ) {
        match self.system_solver {
            PressureSystemSolver::Iterative(_) => {
                if use_compressed {
                    self.system.resize(0, 0, 0);
                    build_single_fractional_compressed_system(
                        &mut self.comp_system,
                        &self.u_weights[0],
                        &self.v_weights[0],
                        &self.w_weights[0],
                        &self.cell_sdf[0],
                        boundary_velocity,
                        input,
                    );
                } else {
                    self.comp_system.clear();
                    if self.system.width() != input.width
                        || self.system.height() != input.height
                        || self.system.depth() != input.depth
                    {
                        self.system.resize(input.width, input.height, input.depth);
                    }
                    build_single_fractional_system(
                        &mut self.system.a,
                        &mut self.system.b,
                        &self.u_weights[0],
                        &self.v_weights[0],
                        &self.w_weights[0],
                        &self.cell_sdf[0],
                        boundary_velocity,
                        input,
                    );
                }
            }
            _ => {
                let max_levels = self.system_solver.max_number_of_levels();
                self.mg_system.resize_with_finest(
                    input.width,
                    input.height,
                    input.depth,
                    max_levels,
                );

                let finest = &mut self.mg_system.levels[0];
                build_single_fractional_system(
                    &mut finest.a,
                    &mut finest.b,
                    &self.u_weights[0],
                    &self.v_weights[0],
                    &self.w_weights[0],
                    &self.cell_sdf[0],
                    boundary_velocity,
                    input,
                );

                let mut finer_grid = input.clone();
                for l in 1..self.mg_system.levels.len() {
                    let (cw, ch, cd) = self.level_dims[l];
                    let mut coarser_grid = FaceCenteredGrid::new(
                        cw,
                        ch,
                        cd,
                        finer_grid.spacing * 2.0,
                        finer_grid.origin,
                    );
                    restrict_velocity(&finer_grid, &mut coarser_grid);

                    let level = &mut self.mg_system.levels[l];
                    build_single_fractional_system(
                        &mut level.a,
                        &mut level.b,
                        &self.u_weights[l],
                        &self.v_weights[l],
                        &self.w_weights[l],
                        &self.cell_sdf[l],
                        boundary_velocity,
                        &coarser_grid,
                    );
                    finer_grid = coarser_grid;
                }
            }
        }
    }

    fn decompress_solution(&mut self) {
        let (w0, h0, d0) = self.level_dims[0];
        if self.system.width() != w0 || self.system.height() != h0 || self.system.depth() != d0 {
            self.system.resize(w0, h0, d0);
        }
        self.system.x.fill(0.0);
        let mut row = 0;
        for (idx, &phi) in self.cell_sdf[0].iter().enumerate() {
            if is_inside_sdf(phi) {
                self.system.x[idx] = self.comp_system.x[row];
                row += 1;
            }
        }
    }

    fn apply_pressure_gradient(&self, input: &FaceCenteredGrid, output: &mut FaceCenteredGrid) {
        let width = input.width;
        let height = input.height;
        let depth = input.depth;
        let slab = width * height;
        let sdf = &self.cell_sdf[0];
        let u_weights = &self.u_weights[0];
        let v_weights = &self.v_weights[0];
        let w_weights = &self.w_weights[0];
        let x = self.pressure();
        let inv_h = DVec3::new(
            1.0 / input.spacing.x,
            1.0 / input.spacing.y,
            1.0 / input.spacing.z,
        );

        for k in 0..depth {
            for j in 0..height {
                for i in 0..width {
                    let idx = (k * height + j) * width + i;
                    let center_phi = sdf[idx];

                    if i + 1 < width
                        && u_weights[(k * height + j) * (width + 1) + i + 1] > 0.0
                        && (is_inside_sdf(center_phi) || is_inside_sdf(sdf[idx + 1]))
                    {
                        let right_phi = sdf[idx + 1];
                        let theta = fraction_inside_sdf(center_phi, right_phi).max(MIN_WEIGHT);
                        let u_idx = output.u_index(i + 1, j, k);
                        output.u[u_idx] =
                            input.u_at(i + 1, j, k) + inv_h.x / theta * (x[idx + 1] - x[idx]);
                    }
                    if j + 1 < height
                        && v_weights[(k * (height + 1) + j + 1) * width + i] > 0.0
                        && (is_inside_sdf(center_phi) || is_inside_sdf(sdf[idx + width]))
                    {
                        let up_phi = sdf[idx + width];
                        let theta = fraction_inside_sdf(center_phi, up_phi).max(MIN_WEIGHT);
                        let v_idx = output.v_index(i, j + 1, k);
                        output.v[v_idx] =
                            input.v_at(i, j + 1, k) + inv_h.y / theta * (x[idx + width] - x[idx]);
                    }
                    if k + 1 < depth
                        && w_weights[((k + 1) * height + j) * width + i] > 0.0
                        && (is_inside_sdf(center_phi) || is_inside_sdf(sdf[idx + slab]))
                    {
                        let front_phi = sdf[idx + slab];
                        let theta = fraction_inside_sdf(center_phi, front_phi).max(MIN_WEIGHT);
                        let w_idx = output.w_index(i, j, k + 1);
                        output.w[w_idx] =
                            input.w_at(i, j, k + 1) + inv_h.z / theta * (x[idx + slab] - x[idx]);
                    }
                }
            }
        }
    }
}

impl GridPressureSolver for GridFractionalSinglePhasePressureSolver {
    fn solve(
        &mut self,
        input: &FaceCenteredGrid,
        _dt: f64,
        output: &mut FaceCenteredGrid,
        boundary_sdf: &dyn ScalarField,
        boundary_velocity: &dyn VectorField,
        fluid_sdf: &dyn ScalarField,
        use_compressed: bool,
    ) {
        self.build_weights(input, boundary_sdf, fluid_sdf);

        let compressed = use_compressed
            && matches!(
                &self.system_solver,
                PressureSystemSolver::Iterative(solver) if solver.can_solve_compressed()
            );
        self.build_system(input, boundary_velocity, compressed);

        let converged = match &mut self.system_solver {
            PressureSystemSolver::Iterative(solver) => {
                if compressed {
                    let ok = solver.solve_compressed(&mut self.comp_system);
                    self.decompress_solution();
                    ok
                } else {
                    solver.solve(&mut self.system)
                }
            }
            PressureSystemSolver::Mg(solver) => solver.solve(&mut self.mg_system),
            PressureSystemSolver::Mgpcg(solver) => solver.solve(&mut self.mg_system),
        };
        if !converged {
            log::warn!(
                "pressure solve did not converge: residual={:e}",
                self.system_solver.last_residual()
            );
        }

        self.apply_pressure_gradient(input, output);
    }

    fn suggested_boundary_condition_solver(&self) -> Box<dyn GridBoundaryConditionSolver> {
        Box::new(GridFractionalBoundaryConditionSolver::new())
    }
}

#[allow(clippy::too_many_arguments)]
fn build_single_fractional_system(
    a: &mut FdmMatrix,
    b: &mut [f64],
    u_weights: &[f64],
    v_weights: &[f64],
    w_weights: &[f64],
    cell_sdf: &[f64],
    boundary_velocity: &dyn VectorField,
    input: &FaceCenteredGrid,
) {
    let width = input.width;
    let height = input.height;
    let depth = input.depth;
    let slab = width * height;
    let inv_h = DVec3::new(
        1.0 / input.spacing.x,
        1.0 / input.spacing.y,
        1.0 / input.spacing.z,
    );
    let inv_h_sqr = inv_h * inv_h;

    parallel::pool().install(|| {
        a.rows
            .par_chunks_mut(width.max(1))
            .zip(b.par_chunks_mut(width.max(1)))
            .enumerate()
            .for_each(|(jk, (row_chunk, b_chunk))| {
                let j = jk % height.max(1);
                let k = jk / height.max(1);
                for (i, (row, rhs)) in row_chunk.iter_mut().zip(b_chunk.iter_mut()).enumerate() {
                    let idx = (k * height + j) * width + i;
                    *row = FdmMatrixRow::default();
                    *rhs = 0.0;
                    let center_phi = cell_sdf[idx];
                    if !is_inside_sdf(center_phi) {
                        row.center = 1.0;
                        continue;
                    }

                    let u_right = u_weights[(k * height + j) * (width + 1) + i + 1];
                    if i + 1 < width {
                        let term = u_right * inv_h_sqr.x;
                        let right_phi = cell_sdf[idx + 1];
                        if is_inside_sdf(right_phi) {
                            row.center += term;
                            row.right -= term;
                        } else {
                            let theta = fraction_inside_sdf(center_phi, right_phi).max(MIN_WEIGHT);
                            row.center += term / theta;
                        }
                        *rhs += u_right * input.u_at(i + 1, j, k) * inv_h.x;
                    } else {
                        *rhs += input.u_at(i + 1, j, k) * inv_h.x;
                    }

                    let u_left = u_weights[(k * height + j) * (width + 1) + i];
                    if i > 0 {
                        let term = u_left * inv_h_sqr.x;
                        let left_phi = cell_sdf[idx - 1];
                        if is_inside_sdf(left_phi) {
                            row.center += term;
                        } else {
                            let theta = fraction_inside_sdf(center_phi, left_phi).max(MIN_WEIGHT);
                            row.center += term / theta;
                        }
                        *rhs -= u_left * input.u_at(i, j, k) * inv_h.x;
                    } else {
                        *rhs -= input.u_at(i, j, k) * inv_h.x;
                    }

                    let v_up = v_weights[(k * (height + 1) + j + 1) * width + i];
                    if j + 1 < height {
                        let term = v_up * inv_h_sqr.y;
                        let up_phi = cell_sdf[idx + width];
                        if is_inside_sdf(up_phi) {
                            row.center += term;
                            row.up -= term;
                        } else {
                            let theta = fraction_inside_sdf(center_phi, up_phi).max(MIN_WEIGHT);
                            row.center += term / theta;
                        }
                        *rhs += v_up * input.v_at(i, j + 1, k) * inv_h.y;
                    } else {
                        *rhs += input.v_at(i, j + 1, k) * inv_h.y;
                    }

                    let v_down = v_weights[(k * (height + 1) + j) * width + i];
                    if j > 0 {
                        let term = v_down * inv_h_sqr.y;
                        let down_phi = cell_sdf[idx - width];
                        if is_inside_sdf(down_phi) {
                            row.center += term;
                        } else {
                            let theta = fraction_inside_sdf(center_phi, down_phi).max(MIN_WEIGHT);
                            row.center += term / theta;
                        }
                        *rhs -= v_down * input.v_at(i, j, k) * inv_h.y;
                    } else {
                        *rhs -= input.v_at(i, j, k) * inv_h.y;
                    }

                    let w_front = w_weights[((k + 1) * height + j) * width + i];
                    if k + 1 < depth {
                        let term = w_front * inv_h_sqr.z;
                        let front_phi = cell_sdf[idx + slab];
                        if is_inside_sdf(front_phi) {
                            row.center += term;
                            row.front -= term;
                        } else {
                            let theta = fraction_inside_sdf(center_phi, front_phi).max(MIN_WEIGHT);
                            row.center += term / theta;
                        }
                        *rhs += w_front * input.w_at(i, j, k + 1) * inv_h.z;
                    } else {
                        *rhs += input.w_at(i, j, k + 1) * inv_h.z;
                    }

                    let w_back = w_weights[(k * height + j) * width + i];
                    if k > 0 {
                        let term = w_back * inv_h_sqr.z;
                        let back_phi = cell_sdf[idx - slab];
                        if is_inside_sdf(back_phi) {
                            row.center += term;
                        } else {
                            let theta = fraction_inside_sdf(center_phi, back_phi).max(MIN_WEIGHT);
                            row.center += term / theta;
                        }
                        *rhs -= w_back * input.w_at(i, j, k) * inv_h.z;
                    } else {
                        *rhs -= input.w_at(i, j, k) * inv_h.z;
                    }

                    // Open fractions of the faces move with the boundary.
                    *rhs += (1.0 - u_right)
                        * boundary_velocity.sample(input.u_position(i + 1, j, k)).x
                        * inv_h.x
                        - (1.0 - u_left) * boundary_velocity.sample(input.u_position(i, j, k)).x
                            * inv_h.x
                        + (1.0 - v_up) * boundary_velocity.sample(input.v_position(i, j + 1, k)).y
                            * inv_h.y
                        - (1.0 - v_down) * boundary_velocity.sample(input.v_position(i, j, k)).y
                            * inv_h.y
                        + (1.0 - w_front)
                            * boundary_velocity.sample(input.w_position(i, j, k + 1)).z
                            * inv_h.z
                        - (1.0 - w_back) * boundary_velocity.sample(input.w_position(i, j, k)).z
                            * inv_h.z;

                    // Fully closed-off cells have nothing to solve.
                    if row.center < f64::EPSILON {
                        row.center = 1.0;
                        *rhs = 0.0;
                    }
                }
            });
    });
}

#[allow(clippy::too_many_arguments)]
fn build_single_fractional_compressed_system(
    comp: &mut FdmCompressedLinearSystem,
    u_weights: &[f64],
    v_weights: &[f64],
    w_weights: &[f64],
    cell_sdf: &[f64],
    boundary_velocity: &dyn VectorField,
    input: &FaceCenteredGrid,
) {
    let width = input.width;
    let height = input.height;
    let depth = input.depth;
    let slab = width * height;
    let inv_h = DVec3::new(
        1.0 / input.spacing.x,
        1.0 / input.spacing.y,
        1.0 / input.spacing.z,
    );
    let inv_h_sqr = inv_h * inv_h;

    comp.clear();

    let mut coord_to_index = vec![0usize; width * height * depth];
    let mut num_rows = 0usize;
    for (idx, &phi) in cell_sdf.iter().enumerate() {
        if is_inside_sdf(phi) {
            coord_to_index[idx] = num_rows;
            num_rows += 1;
        }
    }

    comp.a.row_pointers.push(0);
    for k in 0..depth {
        for j in 0..height {
            for i in 0..width {
                let idx = (k * height + j) * width + i;
                let center_phi = cell_sdf[idx];
                if !is_inside_sdf(center_phi) {
                    continue;
                }

                let mut rhs = 0.0;
                let center_pos = comp.a.non_zeros.len();
                comp.a.non_zeros.push(0.0);
                comp.a.column_indices.push(coord_to_index[idx]);
                let mut center = 0.0;

                let u_right = u_weights[(k * height + j) * (width + 1) + i + 1];
                if i + 1 < width {
                    let term = u_right * inv_h_sqr.x;
                    let right_phi = cell_sdf[idx + 1];
                    if is_inside_sdf(right_phi) {
                        center += term;
                        comp.a.non_zeros.push(-term);
                        comp.a.column_indices.push(coord_to_index[idx + 1]);
                    } else {
                        let theta = fraction_inside_sdf(center_phi, right_phi).max(MIN_WEIGHT);
                        center += term / theta;
                    }
                    rhs += u_right * input.u_at(i + 1, j, k) * inv_h.x;
                } else {
                    rhs += input.u_at(i + 1, j, k) * inv_h.x;
                }

                let u_left = u_weights[(k * height + j) * (width + 1) + i];
                if i > 0 {
                    let term = u_left * inv_h_sqr.x;
                    let left_phi = cell_sdf[idx - 1];
                    if is_inside_sdf(left_phi) {
                        center += term;
                        comp.a.non_zeros.push(-term);
                        comp.a.column_indices.push(coord_to_index[idx - 1]);
                    } else {
                        let theta = fraction_inside_sdf(center_phi, left_phi).max(MIN_WEIGHT);
                        center += term / theta;
                    }
                    rhs -= u_left * input.u_at(i, j, k) * inv_h.x;
                } else {
                    rhs -= input.u_at(i, j, k) * inv_h.x;
                }

                let v_up = v_weights[(k * (height + 1) + j + 1) * width + i];
                if j + 1 < height {
                    let term = v_up * inv_h_sqr.y;
                    let up_phi = cell_sdf[idx + width];
                    if is_inside_sdf(up_phi) {
                        center += term;
                        comp.a.non_zeros.push(-term);
                        comp.a.column_indices.push(coord_to_index[idx + width]);
                    } else {
                        let theta = fraction_inside_sdf(center_phi, up_phi).max(MIN_WEIGHT);
                        center += term / theta;
                    }
                    rhs += v_up * input.v_at(i, j + 1, k) * inv_h.y;
                } else {
                    rhs += input.v_at(i, j + 1, k) * inv_h.y;
                }

                let v_down = v_weights[(k * (height + 1) + j) * width + i];
                if j > 0 {
                    let term = v_down * inv_h_sqr.y;
                    let down_phi = cell_sdf[idx - width];
                    if is_inside_sdf(down_phi) {
                        center += term;
                        comp.a.non_zeros.push(-term);
                        comp.a.column_indices.push(coord_to_index[idx - width]);
                    } else {
                        let theta = fraction_inside_sdf(center_phi, down_phi).max(MIN_WEIGHT);
                        center += term / theta;
                    }
                    rhs -= v_down * input.v_at(i, j, k) * inv_h.y;
                } else {
                    rhs -= input.v_at(i, j, k) * inv_h.y;
                }

                let w_front = w_weights[((k + 1) * height + j) * width + i];
                if k + 1 < depth {
                    let term = w_front * inv_h_sqr.z;
                    let front_phi = cell_sdf[idx + slab];
                    if is_inside_sdf(front_phi) {
                        center += term;
                        comp.a.non_zeros.push(-term);
                        comp.a.column_indices.push(coord_to_index[idx + slab]);
                    } else {
                        let theta = fraction_inside_sdf(center_phi, front_phi).max(MIN_WEIGHT);
                        center += term / theta;
                    }
                    rhs += w_front * input.w_at(i, j, k + 1) * inv_h.z;
                } else {
                    rhs += input.w_at(i, j, k + 1) * inv_h.z;
                }

                let w_back = w_weights[(k * height + j) * width + i];
                if k > 0 {
                    let term = w_back * inv_h_sqr.z;
                    let back_phi = cell_sdf[idx - slab];
                    if is_inside_sdf(back_phi) {
                        center += term;
                        comp.a.non_zeros.push(-term);
                        comp.a.column_indices.push(coord_to_index[idx - slab]);
                    } else {
                        let theta = fraction_inside_sdf(center_phi, back_phi).max(MIN_WEIGHT);
                        center += term / theta;
                    }
                    rhs -= w_back * input.w_at(i, j, k) * inv_h.z;
                } else {
                    rhs -= input.w_at(i, j, k) * inv_h.z;
                }

                rhs += (1.0 - u_right) * boundary_velocity.sample(input.u_position(i + 1, j, k)).x
                    * inv_h.x
                    - (1.0 - u_left) * boundary_velocity.sample(input.u_position(i, j, k)).x
                        * inv_h.x
                    + (1.0 - v_up) * boundary_velocity.sample(input.v_position(i, j + 1, k)).y
                        * inv_h.y
                    - (1.0 - v_down) * boundary_velocity.sample(input.v_position(i, j, k)).y
                        * inv_h.y
                    + (1.0 - w_front) * boundary_velocity.sample(input.w_position(i, j, k + 1)).z
                        * inv_h.z
                    - (1.0 - w_back) * boundary_velocity.sample(input.w_position(i, j, k)).z
                        * inv_h.z;

                if center < f64::EPSILON {
                    comp.a.non_zeros.truncate(center_pos + 1);
                    comp.a.column_indices.truncate(center_pos + 1);
                    center = 1.0;
                    rhs = 0.0;
                }

                comp.a.non_zeros[center_pos] = center;
                comp.a.row_pointers.push(comp.a.column_indices.len());
                comp.b.push(rhs);
            }
        }
    }
    comp.x.resize(num_rows, 0.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ConstantScalarField, ConstantVectorField};
    use crate::fdm::MgParameters;

    const OPEN: ConstantScalarField = ConstantScalarField::new(f64::MAX);
    const ALL_FLUID: ConstantScalarField = ConstantScalarField::new(-f64::MAX);
    const STILL: ConstantVectorField = ConstantVectorField::new(DVec3::ZERO);

    /// Fluid fills the half-space below `offset`.
    struct WaterLine {
        offset: f64,
    }

    impl ScalarField for WaterLine {
        fn sample(&self, point: DVec3) -> f64 {
            point.y - self.offset
        }
    }

    /// Upward column flow in a sealed box: u = w = 0, interior v = 1,
    /// border faces zeroed.
    fn column_flow(n: usize) -> FaceCenteredGrid {
        let mut vel = FaceCenteredGrid::new(n, n, n, DVec3::splat(1.0), DVec3::ZERO);
        for k in 0..n {
            for j in 1..n {
                for i in 0..n {
                    *vel.v_at_mut(i, j, k) = 1.0;
                }
            }
        }
        vel
    }

    #[test]
    fn closed_box_column_flow_is_projected_out() {
        let input = column_flow(3);
        let mut output = input.clone();
        let mut solver = GridSinglePhasePressureSolver::new();
        solver.solve(&input, 1.0, &mut output, &OPEN, &STILL, &ALL_FLUID, false);

        for k in 0..3 {
            for j in 0..3 {
                for i in 0..=3 {
                    assert!(output.u_at(i, j, k).abs() < 1e-5);
                }
            }
            for j in 0..=3 {
                for i in 0..3 {
                    assert!(output.v_at(i, j, k).abs() < 1e-5);
                }
            }
        }
        for j in 0..3 {
            for i in 0..3 {
                for k in 0..=3 {
                    assert!(output.w_at(i, j, k).abs() < 1e-5);
                }
            }
        }

        // Pressure drops by one per cell up the column.
        let p = solver.pressure();
        for k in 0..3 {
            for j in 0..2 {
                for i in 0..3 {
                    let dp = p[((k * 3) + j + 1) * 3 + i] - p[(k * 3 + j) * 3 + i];
                    assert!((dp + 1.0).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn compressed_path_matches_the_dense_solution() {
        let input = column_flow(3);

        let mut dense_out = input.clone();
        let mut solver = GridSinglePhasePressureSolver::new();
        solver.solve(&input, 1.0, &mut dense_out, &OPEN, &STILL, &ALL_FLUID, false);

        let mut comp_out = input.clone();
        let mut solver = GridSinglePhasePressureSolver::new();
        solver.solve(&input, 1.0, &mut comp_out, &OPEN, &STILL, &ALL_FLUID, true);

        for (a, b) in dense_out.u.iter().zip(&comp_out.u) {
            assert!((a - b).abs() < 1e-6);
        }
        for (a, b) in dense_out.v.iter().zip(&comp_out.v) {
            assert!((a - b).abs() < 1e-6);
        }
        for (a, b) in dense_out.w.iter().zip(&comp_out.w) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn air_cells_pin_the_pressure_to_zero() {
        let input = column_flow(3);
        let mut output = input.clone();
        let mut solver = GridSinglePhasePressureSolver::new();
        let water = WaterLine { offset: 2.0 };
        solver.solve(&input, 1.0, &mut output, &OPEN, &STILL, &water, false);

        let p = solver.pressure();
        // Top layer of cells is air; their rows are identity with zero rhs.
        for k in 0..3 {
            for i in 0..3 {
                assert_eq!(p[(k * 3 + 2) * 3 + i], 0.0);
            }
        }
        // Divergence vanishes in the fluid rows.
        for k in 0..3 {
            for j in 0..2 {
                for i in 0..3 {
                    assert!(output.divergence_at_cell(i, j, k).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn multigrid_backend_projects_a_free_surface_column() {
        let n = 16;
        let input = column_flow(n);
        let mut output = input.clone();

        let mut solver = GridSinglePhasePressureSolver::with_system_solver(
            PressureSystemSolver::Mgpcg(FdmMgpcgSolver::new(50, 1e-9, MgParameters::default())),
        );
        let water = WaterLine { offset: 15.0 };
        solver.solve(&input, 1.0, &mut output, &OPEN, &STILL, &water, false);

        for k in 0..n {
            for j in 0..15 {
                for i in 0..n {
                    assert!(
                        output.divergence_at_cell(i, j, k).abs() < 1e-6,
                        "cell ({}, {}, {}) kept divergence {}",
                        i,
                        j,
                        k,
                        output.divergence_at_cell(i, j, k)
                    );
                }
            }
        }
    }

    #[test]
    fn fractional_solver_matches_the_closed_box_solution() {
        let input = column_flow(3);
        let mut output = input.clone();
        let mut solver = GridFractionalSinglePhasePressureSolver::new();
        solver.solve(&input, 1.0, &mut output, &OPEN, &STILL, &ALL_FLUID, false);

        for k in 0..3 {
            for j in 0..=3 {
                for i in 0..3 {
                    assert!(output.v_at(i, j, k).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn fractional_solver_seals_a_submerged_wall() {
        // Solid slab below y = 1.9 closes the bottom of a 4x4x4 column.
        let mut input = FaceCenteredGrid::new(4, 4, 4, DVec3::splat(1.0), DVec3::ZERO);
        for k in 0..4 {
            for j in 1..4 {
                for i in 0..4 {
                    *input.v_at_mut(i, j, k) = 1.0;
                }
            }
        }
        let mut output = input.clone();

        struct Slab;
        impl ScalarField for Slab {
            fn sample(&self, point: DVec3) -> f64 {
                point.y - 1.9
            }
        }

        let mut solver = GridFractionalSinglePhasePressureSolver::new();
        solver.solve(&input, 1.0, &mut output, &Slab, &STILL, &ALL_FLUID, false);

        // Open faces above the slab lose their flow.
        for k in 0..4 {
            for i in 0..4 {
                assert!(output.v_at(i, 2, k).abs() < 1e-5);
                assert!(output.v_at(i, 3, k).abs() < 1e-5);
            }
        }
        // Faces buried in the slab have weight zero and keep their value.
        for k in 0..4 {
            for i in 0..4 {
                assert_eq!(output.v_at(i, 1, k), 1.0);
            }
        }
    }

    #[test]
    fn weight_downsampling_keeps_constants() {
        let fine = vec![1.0; 9 * 4 * 4];
        let mut coarse = vec![0.0; 5 * 2 * 2];
        // u-shaped array for an 8x4x4 grid halved to 4x2x2.
        downsample(&fine, 9, 4, &mut coarse, 5, 2, 2);
        assert!(coarse.iter().all(|&w| (w - 1.0).abs() < 1e-12));
    }

    #[test]
    fn marker_majority_prefers_solids_on_ties() {
        assert_eq!(arg_max3(8, 8, 0), 1);
        assert_eq!(arg_max3(8, 0, 8), 2);
        assert_eq!(arg_max3(0, 8, 8), 2);
        assert_eq!(arg_max3(16, 0, 0), 0);
    }
}
