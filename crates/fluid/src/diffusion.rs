//! Grid diffusion solvers.

use glam::DVec2;

use crate::fdm::{FdmCgSolver, FdmLinearSystem, FdmLinearSystemSolver};
use crate::field::ScalarField;
use crate::grid::{FaceCenteredGrid, ScalarGrid};
use crate::level_set::is_inside_sdf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Marker {
    Fluid,
    Air,
    Boundary,
}

/// Applies diffusion to a grid quantity over one time step.
///
/// Cells are classified against the two level sets: inside the boundary
/// SDF wins over inside the fluid SDF, everything else is air. Only fluid
/// cells receive diffusion; the flux into air and boundary cells depends
/// on the scheme.
pub trait GridDiffusionSolver: Send {
    fn solve_scalar(
        &mut self,
        source: &ScalarGrid,
        diffusion_coefficient: f64,
        dt: f64,
        dest: &mut ScalarGrid,
        boundary_sdf: &dyn ScalarField,
        fluid_sdf: &dyn ScalarField,
    );

    fn solve_face_centered(
        &mut self,
        source: &FaceCenteredGrid,
        diffusion_coefficient: f64,
        dt: f64,
        dest: &mut FaceCenteredGrid,
        boundary_sdf: &dyn ScalarField,
        fluid_sdf: &dyn ScalarField,
    );
}

fn build_markers(
    markers: &mut Vec<Marker>,
    nx: usize,
    ny: usize,
    position: impl Fn(usize, usize) -> DVec2,
    boundary_sdf: &dyn ScalarField,
    fluid_sdf: &dyn ScalarField,
) {
    markers.clear();
    markers.resize(nx * ny, Marker::Air);
    for j in 0..ny {
        for i in 0..nx {
            let pt = position(i, j);
            markers[j * nx + i] = if is_inside_sdf(boundary_sdf.sample(pt)) {
                Marker::Boundary
            } else if is_inside_sdf(fluid_sdf.sample(pt)) {
                Marker::Fluid
            } else {
                Marker::Air
            };
        }
    }
}

/// Laplacian with one-sided differences dropped toward non-fluid
/// neighbors, giving zero flux across the fluid boundary.
fn marked_laplacian(
    data: &[f64],
    markers: &[Marker],
    nx: usize,
    ny: usize,
    spacing: DVec2,
    i: usize,
    j: usize,
) -> f64 {
    let center = data[j * nx + i];
    let mut d_left = 0.0;
    let mut d_right = 0.0;
    let mut d_down = 0.0;
    let mut d_up = 0.0;

    if i > 0 && markers[j * nx + i - 1] == Marker::Fluid {
        d_left = center - data[j * nx + i - 1];
    }
    if i + 1 < nx && markers[j * nx + i + 1] == Marker::Fluid {
        d_right = data[j * nx + i + 1] - center;
    }
    if j > 0 && markers[(j - 1) * nx + i] == Marker::Fluid {
        d_down = center - data[(j - 1) * nx + i];
    }
    if j + 1 < ny && markers[(j + 1) * nx + i] == Marker::Fluid {
        d_up = data[(j + 1) * nx + i] - center;
    }

    (d_right - d_left) / (spacing.x * spacing.x) + (d_up - d_down) / (spacing.y * spacing.y)
}

/// Explicit diffusion: `dest = source + dt·coefficient·Laplacian(source)`.
///
/// Stable only while `dt·coefficient/h²` stays under the explicit limit;
/// the caller picks the step size.
#[derive(Debug, Default)]
pub struct GridForwardEulerDiffusionSolver {
    markers: Vec<Marker>,
}

impl GridForwardEulerDiffusionSolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn diffuse_component(
        &self,
        src: &[f64],
        nx: usize,
        ny: usize,
        spacing: DVec2,
        coefficient: f64,
        dt: f64,
        dest: &mut [f64],
    ) {
        for j in 0..ny {
            for i in 0..nx {
                let idx = j * nx + i;
                dest[idx] = if self.markers[idx] == Marker::Fluid {
                    src[idx]
                        + coefficient
                            * dt
                            * marked_laplacian(src, &self.markers, nx, ny, spacing, i, j)
                } else {
                    src[idx]
                };
            }
        }
    }
}

impl GridDiffusionSolver for GridForwardEulerDiffusionSolver {
    fn solve_scalar(
        &mut self,
        source: &ScalarGrid,
        diffusion_coefficient: f64,
        dt: f64,
        dest: &mut ScalarGrid,
        boundary_sdf: &dyn ScalarField,
        fluid_sdf: &dyn ScalarField,
    ) {
        build_markers(
            &mut self.markers,
            source.width,
            source.height,
            |i, j| source.data_position(i, j),
            boundary_sdf,
            fluid_sdf,
        );
        self.diffuse_component(
            &source.data,
            source.width,
            source.height,
            source.spacing,
            diffusion_coefficient,
            dt,
            &mut dest.data,
        );
    }

    fn solve_face_centered(
        &mut self,
        source: &FaceCenteredGrid,
        diffusion_coefficient: f64,
        dt: f64,
        dest: &mut FaceCenteredGrid,
        boundary_sdf: &dyn ScalarField,
        fluid_sdf: &dyn ScalarField,
    ) {
        let spacing = source.spacing;

        build_markers(
            &mut self.markers,
            source.width + 1,
            source.height,
            |i, j| source.u_position(i, j),
            boundary_sdf,
            fluid_sdf,
        );
        self.diffuse_component(
            &source.u,
            source.width + 1,
            source.height,
            spacing,
            diffusion_coefficient,
            dt,
            &mut dest.u,
        );

        build_markers(
            &mut self.markers,
            source.width,
            source.height + 1,
            |i, j| source.v_position(i, j),
            boundary_sdf,
            fluid_sdf,
        );
        self.diffuse_component(
            &source.v,
            source.width,
            source.height + 1,
            spacing,
            diffusion_coefficient,
            dt,
            &mut dest.v,
        );
    }
}

/// Boundary handling for the implicit scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryType {
    /// Non-fluid neighbors keep their source value; it enters the right
    /// hand side.
    Dirichlet,
    /// Flux-free: the coefficient toward non-fluid neighbors folds into
    /// the diagonal.
    Neumann,
}

/// Implicit diffusion: solves `(I + c·L) x = source` per component, with
/// `c = dt·coefficient/h²`.
///
/// Unconditionally stable, so large diffusion coefficients and time steps
/// are fine.
pub struct GridBackwardEulerDiffusionSolver {
    boundary_type: BoundaryType,
    system: FdmLinearSystem,
    system_solver: Box<dyn FdmLinearSystemSolver>,
    markers: Vec<Marker>,
}

impl GridBackwardEulerDiffusionSolver {
    /// Neumann boundary handling with a CG system solver.
    pub fn new() -> Self {
        Self::with_boundary_type(BoundaryType::Neumann)
    }

    pub fn with_boundary_type(boundary_type: BoundaryType) -> Self {
        Self {
            boundary_type,
            system: FdmLinearSystem::new(0, 0),
            system_solver: Box::new(FdmCgSolver::new(100, f64::EPSILON)),
            markers: Vec::new(),
        }
    }

    pub fn set_linear_system_solver(&mut self, solver: Box<dyn FdmLinearSystemSolver>) {
        self.system_solver = solver;
    }

    fn build_matrix(&mut self, nx: usize, ny: usize, c: DVec2) {
        if self.system.width() != nx || self.system.height() != ny {
            self.system.resize(nx, ny);
        }
        let is_dirichlet = self.boundary_type == BoundaryType::Dirichlet;

        for j in 0..ny {
            for i in 0..nx {
                let idx = j * nx + i;
                let row = &mut self.system.a.rows[idx];
                row.center = 1.0;
                row.right = 0.0;
                row.up = 0.0;

                if self.markers[idx] != Marker::Fluid {
                    continue;
                }

                if i + 1 < nx {
                    if (is_dirichlet && self.markers[idx + 1] != Marker::Air)
                        || self.markers[idx + 1] == Marker::Fluid
                    {
                        row.center += c.x;
                    }
                    if self.markers[idx + 1] == Marker::Fluid {
                        row.right -= c.x;
                    }
                }
                if i > 0
                    && ((is_dirichlet && self.markers[idx - 1] != Marker::Air)
                        || self.markers[idx - 1] == Marker::Fluid)
                {
                    row.center += c.x;
                }
                if j + 1 < ny {
                    if (is_dirichlet && self.markers[idx + nx] != Marker::Air)
                        || self.markers[idx + nx] == Marker::Fluid
                    {
                        row.center += c.y;
                    }
                    if self.markers[idx + nx] == Marker::Fluid {
                        row.up -= c.y;
                    }
                }
                if j > 0
                    && ((is_dirichlet && self.markers[idx - nx] != Marker::Air)
                        || self.markers[idx - nx] == Marker::Fluid)
                {
                    row.center += c.y;
                }
            }
        }
    }

    fn build_vectors(&mut self, f: &[f64], nx: usize, ny: usize, c: DVec2) {
        self.system.x.copy_from_slice(f);
        self.system.b.copy_from_slice(f);

        if self.boundary_type != BoundaryType::Dirichlet {
            return;
        }

        // Pinned boundary neighbors contribute their value to the rhs.
        for j in 0..ny {
            for i in 0..nx {
                let idx = j * nx + i;
                if self.markers[idx] != Marker::Fluid {
                    continue;
                }
                if i + 1 < nx && self.markers[idx + 1] == Marker::Boundary {
                    self.system.b[idx] += c.x * f[idx + 1];
                }
                if i > 0 && self.markers[idx - 1] == Marker::Boundary {
                    self.system.b[idx] += c.x * f[idx - 1];
                }
                if j + 1 < ny && self.markers[idx + nx] == Marker::Boundary {
                    self.system.b[idx] += c.y * f[idx + nx];
                }
                if j > 0 && self.markers[idx - nx] == Marker::Boundary {
                    self.system.b[idx] += c.y * f[idx - nx];
                }
            }
        }
    }

    fn solve_component(&mut self, src: &[f64], nx: usize, ny: usize, c: DVec2, dest: &mut [f64]) {
        self.build_matrix(nx, ny, c);
        self.build_vectors(src, nx, ny, c);
        if !self.system_solver.solve(&mut self.system) {
            log::warn!(
                "implicit diffusion did not converge: residual={}",
                self.system_solver.last_residual()
            );
        }
        dest.copy_from_slice(&self.system.x);
    }
}

impl Default for GridBackwardEulerDiffusionSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GridDiffusionSolver for GridBackwardEulerDiffusionSolver {
    fn solve_scalar(
        &mut self,
        source: &ScalarGrid,
        diffusion_coefficient: f64,
        dt: f64,
        dest: &mut ScalarGrid,
        boundary_sdf: &dyn ScalarField,
        fluid_sdf: &dyn ScalarField,
    ) {
        let h = source.spacing;
        let c = dt * diffusion_coefficient * DVec2::new(1.0 / (h.x * h.x), 1.0 / (h.y * h.y));

        build_markers(
            &mut self.markers,
            source.width,
            source.height,
            |i, j| source.data_position(i, j),
            boundary_sdf,
            fluid_sdf,
        );
        self.solve_component(&source.data, source.width, source.height, c, &mut dest.data);
    }

    fn solve_face_centered(
        &mut self,
        source: &FaceCenteredGrid,
        diffusion_coefficient: f64,
        dt: f64,
        dest: &mut FaceCenteredGrid,
        boundary_sdf: &dyn ScalarField,
        fluid_sdf: &dyn ScalarField,
    ) {
        let h = source.spacing;
        let c = dt * diffusion_coefficient * DVec2::new(1.0 / (h.x * h.x), 1.0 / (h.y * h.y));

        build_markers(
            &mut self.markers,
            source.width + 1,
            source.height,
            |i, j| source.u_position(i, j),
            boundary_sdf,
            fluid_sdf,
        );
        self.solve_component(&source.u, source.width + 1, source.height, c, &mut dest.u);

        build_markers(
            &mut self.markers,
            source.width,
            source.height + 1,
            |i, j| source.v_position(i, j),
            boundary_sdf,
            fluid_sdf,
        );
        self.solve_component(&source.v, source.width, source.height + 1, c, &mut dest.v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ConstantScalarField;

    const OPEN: ConstantScalarField = ConstantScalarField::new(f64::MAX);
    const ALL_FLUID: ConstantScalarField = ConstantScalarField::new(-f64::MAX);

    #[test]
    fn forward_euler_spreads_a_spike() {
        let mut source = ScalarGrid::new(5, 5, DVec2::splat(1.0), DVec2::ZERO);
        *source.at_mut(2, 2) = 4.0;
        let mut dest = source.clone();

        let mut solver = GridForwardEulerDiffusionSolver::new();
        solver.solve_scalar(&source, 1.0, 0.1, &mut dest, &OPEN, &ALL_FLUID);

        // Laplacian at the spike is -16, at each 4-neighbor +4.
        assert!((dest.at(2, 2) - (4.0 - 1.6)).abs() < 1e-12);
        assert!((dest.at(1, 2) - 0.4).abs() < 1e-12);
        assert!((dest.at(2, 3) - 0.4).abs() < 1e-12);
        // Diagonal neighbors see nothing after one step.
        assert!(dest.at(1, 1).abs() < 1e-12);
    }

    #[test]
    fn forward_euler_conserves_total_in_closed_fluid() {
        let mut source = ScalarGrid::new(6, 6, DVec2::splat(1.0), DVec2::ZERO);
        source.fill_with(|p| p.x + 2.0 * p.y);
        let mut dest = source.clone();

        let mut solver = GridForwardEulerDiffusionSolver::new();
        solver.solve_scalar(&source, 0.5, 0.2, &mut dest, &OPEN, &ALL_FLUID);

        let before: f64 = source.data.iter().sum();
        let after: f64 = dest.data.iter().sum();
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn boundary_cells_are_left_untouched() {
        let mut source = ScalarGrid::new(5, 5, DVec2::splat(1.0), DVec2::ZERO);
        source.fill(1.0);
        *source.at_mut(2, 2) = 9.0;
        let mut dest = source.clone();

        // Everything inside the boundary: nothing diffuses.
        let mut solver = GridForwardEulerDiffusionSolver::new();
        solver.solve_scalar(
            &source,
            1.0,
            0.1,
            &mut dest,
            &ConstantScalarField::new(-1.0),
            &ALL_FLUID,
        );

        assert_eq!(dest.data, source.data);
    }

    #[test]
    fn backward_euler_damps_towards_the_mean() {
        let mut source = ScalarGrid::new(8, 8, DVec2::splat(1.0), DVec2::ZERO);
        *source.at_mut(3, 3) = 64.0;
        let mut dest = source.clone();

        let mut solver = GridBackwardEulerDiffusionSolver::new();
        solver.solve_scalar(&source, 10.0, 1.0, &mut dest, &OPEN, &ALL_FLUID);

        // Strong implicit diffusion flattens the spike without ringing.
        assert!(dest.at(3, 3) < 32.0);
        assert!(dest.data.iter().all(|&x| x >= -1e-9));
        // Neumann walls conserve the total.
        let before: f64 = source.data.iter().sum();
        let after: f64 = dest.data.iter().sum();
        assert!((before - after).abs() < 1e-6);
    }

    #[test]
    fn backward_euler_face_centered_smooths_both_components() {
        let mut source = FaceCenteredGrid::new(6, 6, DVec2::splat(1.0), DVec2::ZERO);
        *source.u_at_mut(3, 3) = 10.0;
        *source.v_at_mut(2, 2) = -6.0;
        let mut dest = source.clone();

        let mut solver = GridBackwardEulerDiffusionSolver::new();
        solver.solve_face_centered(&source, 2.0, 0.5, &mut dest, &OPEN, &ALL_FLUID);

        assert!(dest.u_at(3, 3).abs() < 10.0);
        assert!(dest.u_at(3, 3) > 0.0);
        assert!(dest.v_at(2, 2).abs() < 6.0);
        assert!(dest.v_at(2, 2) < 0.0);
    }

    #[test]
    fn dirichlet_boundary_pulls_in_the_pinned_value() {
        let mut source = ScalarGrid::new(4, 1, DVec2::splat(1.0), DVec2::ZERO);
        source.data.copy_from_slice(&[8.0, 0.0, 0.0, 0.0]);
        let mut dest = source.clone();

        // Leftmost cell is boundary, the rest is fluid.
        struct LeftWall;
        impl ScalarField for LeftWall {
            fn sample(&self, point: DVec2) -> f64 {
                if point.x < 1.0 {
                    -1.0
                } else {
                    1.0
                }
            }
        }

        let mut solver =
            GridBackwardEulerDiffusionSolver::with_boundary_type(BoundaryType::Dirichlet);
        solver.solve_scalar(&source, 1.0, 1.0, &mut dest, &LeftWall, &ALL_FLUID);

        // The fluid cell next to the pinned wall moves toward its value.
        assert!(dest.at(1, 0) > 0.5);
        // The boundary cell itself stays at the source value.
        assert!((dest.at(0, 0) - 8.0).abs() < 1e-9);
    }
}
