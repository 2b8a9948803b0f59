//! Collider boundary condition solvers for the velocity grid.

use glam::DVec2;

use crate::collider::Collider;
use crate::field::VectorField;
use crate::grid::{extrapolate_to_region, FaceCenteredGrid, ScalarGrid};
use crate::level_set::{fraction_inside_sdf, is_inside_sdf};

pub const DIRECTION_NONE: u32 = 0;
pub const DIRECTION_LEFT: u32 = 1 << 0;
pub const DIRECTION_RIGHT: u32 = 1 << 1;
pub const DIRECTION_DOWN: u32 = 1 << 2;
pub const DIRECTION_UP: u32 = 1 << 3;
pub const DIRECTION_ALL: u32 = DIRECTION_LEFT | DIRECTION_RIGHT | DIRECTION_DOWN | DIRECTION_UP;

/// Enforces collider and domain-wall conditions on the velocity grid.
///
/// `update_collider` snapshots everything the solver needs from the
/// collider (signed distances at cell centers, the rigid-body velocity
/// parameters), so `constrain_velocity` runs without a collider reference.
/// Setters do not recompute cached state; the orchestrator refreshes via
/// `update_collider` every sub-step and after any grid resize.
pub trait GridBoundaryConditionSolver: Send + Sync {
    fn update_collider(
        &mut self,
        collider: Option<&Collider>,
        width: usize,
        height: usize,
        spacing: DVec2,
        origin: DVec2,
    );

    fn constrain_velocity(&mut self, velocity: &mut FaceCenteredGrid, extrapolation_depth: u32);

    /// Collider signed distances at cell centers, `None` before the first
    /// `update_collider` call.
    fn collider_sdf(&self) -> Option<&ScalarGrid>;

    /// Rigid-body velocity of the collider snapshot, zero without one.
    fn collider_velocity_at(&self, point: DVec2) -> DVec2;

    fn closed_domain_boundary_flag(&self) -> u32;

    fn set_closed_domain_boundary_flag(&mut self, flag: u32);
}

/// `VectorField` view of a boundary solver's cached collider velocity.
pub struct ColliderVelocityField<'a> {
    solver: &'a dyn GridBoundaryConditionSolver,
}

impl<'a> ColliderVelocityField<'a> {
    pub fn new(solver: &'a dyn GridBoundaryConditionSolver) -> Self {
        Self { solver }
    }
}

impl VectorField for ColliderVelocityField<'_> {
    #[inline]
    fn sample(&self, point: DVec2) -> DVec2 {
        self.solver.collider_velocity_at(point)
    }
}

/// Rigid-body parameters snapshotted from a collider.
#[derive(Clone, Copy, Debug)]
struct ColliderBody {
    linear_velocity: DVec2,
    angular_velocity: f64,
    rotation_origin: DVec2,
    friction_coefficient: f64,
}

impl ColliderBody {
    fn from_collider(collider: &Collider) -> Self {
        Self {
            linear_velocity: collider.linear_velocity,
            angular_velocity: collider.angular_velocity,
            rotation_origin: collider.rotation_origin,
            friction_coefficient: collider.friction_coefficient,
        }
    }

    #[inline]
    fn velocity_at(&self, point: DVec2) -> DVec2 {
        let r = point - self.rotation_origin;
        self.linear_velocity + self.angular_velocity * DVec2::new(-r.y, r.x)
    }
}

/// Tangential part of `vel` against `normal`, with friction damping
/// proportional to the removed inward normal speed.
fn project_and_apply_friction(vel: DVec2, normal: DVec2, friction_coefficient: f64) -> DVec2 {
    let mut velt = vel - normal * vel.dot(normal);
    if velt.length_squared() > 0.0 {
        let veln = (-vel.dot(normal)).max(0.0);
        velt *= (1.0 - friction_coefficient * veln / velt.length()).max(0.0);
    }
    velt
}

/// Sub-cell accurate boundary conditions from per-face solid fractions.
///
/// Faces fully covered by the collider take the collider velocity; partly
/// covered faces keep the fluid velocity and rely on the pressure solver's
/// fractional weights. Fluid velocity is extrapolated into the solid
/// region (free slip), then the normal component of the relative velocity
/// is removed wherever the face center sits inside the collider.
pub struct GridFractionalBoundaryConditionSolver {
    collider_sdf: ScalarGrid,
    body: Option<ColliderBody>,
    closed_domain_boundary_flag: u32,
}

impl Default for GridFractionalBoundaryConditionSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GridFractionalBoundaryConditionSolver {
    pub fn new() -> Self {
        Self {
            collider_sdf: ScalarGrid::new(0, 0, DVec2::splat(1.0), DVec2::ZERO),
            body: None,
            closed_domain_boundary_flag: DIRECTION_ALL,
        }
    }

    #[inline]
    fn friction_coefficient(&self) -> f64 {
        self.body.map_or(0.0, |b| b.friction_coefficient)
    }

    fn apply_closed_domain(&self, velocity: &mut FaceCenteredGrid) {
        let width = velocity.width;
        let height = velocity.height;
        let flag = self.closed_domain_boundary_flag;

        if flag & DIRECTION_LEFT != 0 {
            for j in 0..height {
                *velocity.u_at_mut(0, j) = 0.0;
            }
        }
        if flag & DIRECTION_RIGHT != 0 {
            for j in 0..height {
                *velocity.u_at_mut(width, j) = 0.0;
            }
        }
        if flag & DIRECTION_DOWN != 0 {
            for i in 0..width {
                *velocity.v_at_mut(i, 0) = 0.0;
            }
        }
        if flag & DIRECTION_UP != 0 {
            for i in 0..width {
                *velocity.v_at_mut(i, height) = 0.0;
            }
        }
    }
}

impl GridBoundaryConditionSolver for GridFractionalBoundaryConditionSolver {
    fn update_collider(
        &mut self,
        collider: Option<&Collider>,
        width: usize,
        height: usize,
        spacing: DVec2,
        origin: DVec2,
    ) {
        self.collider_sdf.resize(width, height, spacing, origin);
        match collider {
            Some(c) => {
                self.body = Some(ColliderBody::from_collider(c));
                self.collider_sdf.fill_with(|pt| c.signed_distance(pt));
            }
            None => {
                self.body = None;
                self.collider_sdf.fill(f64::MAX);
            }
        }
    }

    fn constrain_velocity(&mut self, velocity: &mut FaceCenteredGrid, extrapolation_depth: u32) {
        let width = velocity.width;
        let height = velocity.height;
        if self.collider_sdf.width != width || self.collider_sdf.height != height {
            // No update has been issued for this grid shape: open domain.
            self.update_collider(None, width, height, velocity.spacing, velocity.origin);
        }

        let spacing = velocity.spacing;
        let half_x = DVec2::new(0.5 * spacing.x, 0.0);
        let half_y = DVec2::new(0.0, 0.5 * spacing.y);

        // Classify faces by solid coverage along the face extent; fully
        // covered faces take the collider velocity.
        let mut u_marker = vec![true; velocity.u.len()];
        for j in 0..height {
            for i in 0..=width {
                let pt = velocity.u_position(i, j);
                let phi0 = self.collider_sdf.sample(pt - half_y);
                let phi1 = self.collider_sdf.sample(pt + half_y);
                let mut frac = fraction_inside_sdf(phi0, phi1);
                frac = 1.0 - frac.clamp(0.0, 1.0);

                let idx = velocity.u_index(i, j);
                if frac > 0.0 {
                    u_marker[idx] = true;
                } else {
                    velocity.u[idx] = self.collider_velocity_at(pt).x;
                    u_marker[idx] = false;
                }
            }
        }

        let mut v_marker = vec![true; velocity.v.len()];
        for j in 0..=height {
            for i in 0..width {
                let pt = velocity.v_position(i, j);
                let phi0 = self.collider_sdf.sample(pt - half_x);
                let phi1 = self.collider_sdf.sample(pt + half_x);
                let mut frac = fraction_inside_sdf(phi0, phi1);
                frac = 1.0 - frac.clamp(0.0, 1.0);

                let idx = velocity.v_index(i, j);
                if frac > 0.0 {
                    v_marker[idx] = true;
                } else {
                    velocity.v[idx] = self.collider_velocity_at(pt).y;
                    v_marker[idx] = false;
                }
            }
        }

        // Free-slip: carry fluid velocity into the solid region.
        extrapolate_to_region(&mut velocity.u, &u_marker, width + 1, height, extrapolation_depth);
        extrapolate_to_region(&mut velocity.v, &v_marker, width, height + 1, extrapolation_depth);

        // No-flux: inside the collider, remove the normal component of the
        // relative velocity and damp the tangential remainder.
        let mut u_temp = velocity.u.clone();
        for j in 0..height {
            for i in 0..=width {
                let pt = velocity.u_position(i, j);
                if is_inside_sdf(self.collider_sdf.sample(pt)) {
                    let collider_vel = self.collider_velocity_at(pt);
                    let vel = velocity.sample(pt);
                    let g = self.collider_sdf.gradient(pt);
                    let idx = velocity.u_index(i, j);
                    if g.length_squared() > 0.0 {
                        let n = g.normalize();
                        let velt = project_and_apply_friction(
                            vel - collider_vel,
                            n,
                            self.friction_coefficient(),
                        );
                        u_temp[idx] = (velt + collider_vel).x;
                    } else {
                        u_temp[idx] = collider_vel.x;
                    }
                }
            }
        }

        let mut v_temp = velocity.v.clone();
        for j in 0..=height {
            for i in 0..width {
                let pt = velocity.v_position(i, j);
                if is_inside_sdf(self.collider_sdf.sample(pt)) {
                    let collider_vel = self.collider_velocity_at(pt);
                    let vel = velocity.sample(pt);
                    let g = self.collider_sdf.gradient(pt);
                    let idx = velocity.v_index(i, j);
                    if g.length_squared() > 0.0 {
                        let n = g.normalize();
                        let velt = project_and_apply_friction(
                            vel - collider_vel,
                            n,
                            self.friction_coefficient(),
                        );
                        v_temp[idx] = (velt + collider_vel).y;
                    } else {
                        v_temp[idx] = collider_vel.y;
                    }
                }
            }
        }

        velocity.u.copy_from_slice(&u_temp);
        velocity.v.copy_from_slice(&v_temp);

        self.apply_closed_domain(velocity);
    }

    fn collider_sdf(&self) -> Option<&ScalarGrid> {
        if self.collider_sdf.width == 0 {
            None
        } else {
            Some(&self.collider_sdf)
        }
    }

    #[inline]
    fn collider_velocity_at(&self, point: DVec2) -> DVec2 {
        self.body.map_or(DVec2::ZERO, |b| b.velocity_at(point))
    }

    #[inline]
    fn closed_domain_boundary_flag(&self) -> u32 {
        self.closed_domain_boundary_flag
    }

    fn set_closed_domain_boundary_flag(&mut self, flag: u32) {
        self.closed_domain_boundary_flag = flag;
    }
}

/// Binary marker variant on top of the fractional solver.
///
/// After the fractional pass, every face adjacent to a cell whose center
/// lies inside the collider is snapped to the collider velocity, which
/// blocks all sub-cell leakage at the cost of stair-stepped boundaries.
pub struct GridBlockedBoundaryConditionSolver {
    fractional: GridFractionalBoundaryConditionSolver,
    markers: Vec<bool>,
    width: usize,
    height: usize,
}

impl Default for GridBlockedBoundaryConditionSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GridBlockedBoundaryConditionSolver {
    pub fn new() -> Self {
        Self {
            fractional: GridFractionalBoundaryConditionSolver::new(),
            markers: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    /// Whether the cell center lies inside the collider.
    #[inline]
    pub fn is_collider_cell(&self, i: usize, j: usize) -> bool {
        self.markers[j * self.width + i]
    }

    /// Row-major cell markers, true inside the collider.
    #[inline]
    pub fn markers(&self) -> &[bool] {
        &self.markers
    }
}

impl GridBoundaryConditionSolver for GridBlockedBoundaryConditionSolver {
    fn update_collider(
        &mut self,
        collider: Option<&Collider>,
        width: usize,
        height: usize,
        spacing: DVec2,
        origin: DVec2,
    ) {
        self.fractional
            .update_collider(collider, width, height, spacing, origin);
        self.width = width;
        self.height = height;

        let sdf = &self.fractional.collider_sdf;
        self.markers.clear();
        self.markers.resize(width * height, false);
        for j in 0..height {
            for i in 0..width {
                self.markers[j * width + i] = is_inside_sdf(sdf.at(i, j));
            }
        }
    }

    fn constrain_velocity(&mut self, velocity: &mut FaceCenteredGrid, extrapolation_depth: u32) {
        self.fractional
            .constrain_velocity(velocity, extrapolation_depth);

        if self.width != velocity.width || self.height != velocity.height {
            self.update_collider(
                None,
                velocity.width,
                velocity.height,
                velocity.spacing,
                velocity.origin,
            );
        }

        let width = self.width;
        let height = self.height;
        for j in 0..height {
            for i in 0..width {
                if !self.markers[j * width + i] {
                    continue;
                }
                if i > 0 && !self.markers[j * width + i - 1] {
                    let pt = velocity.u_position(i, j);
                    let idx = velocity.u_index(i, j);
                    velocity.u[idx] = self.fractional.collider_velocity_at(pt).x;
                }
                if i + 1 < width && !self.markers[j * width + i + 1] {
                    let pt = velocity.u_position(i + 1, j);
                    let idx = velocity.u_index(i + 1, j);
                    velocity.u[idx] = self.fractional.collider_velocity_at(pt).x;
                }
                if j > 0 && !self.markers[(j - 1) * width + i] {
                    let pt = velocity.v_position(i, j);
                    let idx = velocity.v_index(i, j);
                    velocity.v[idx] = self.fractional.collider_velocity_at(pt).y;
                }
                if j + 1 < height && !self.markers[(j + 1) * width + i] {
                    let pt = velocity.v_position(i, j + 1);
                    let idx = velocity.v_index(i, j + 1);
                    velocity.v[idx] = self.fractional.collider_velocity_at(pt).y;
                }
            }
        }
    }

    fn collider_sdf(&self) -> Option<&ScalarGrid> {
        self.fractional.collider_sdf()
    }

    #[inline]
    fn collider_velocity_at(&self, point: DVec2) -> DVec2 {
        self.fractional.collider_velocity_at(point)
    }

    #[inline]
    fn closed_domain_boundary_flag(&self) -> u32 {
        self.fractional.closed_domain_boundary_flag()
    }

    fn set_closed_domain_boundary_flag(&mut self, flag: u32) {
        self.fractional.set_closed_domain_boundary_flag(flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{BoxSurface, Sphere};

    #[test]
    fn friction_projection_removes_normal_component() {
        let n = DVec2::new(0.0, 1.0);
        let velt = project_and_apply_friction(DVec2::new(1.0, -1.0), n, 0.0);
        assert!((velt - DVec2::new(1.0, 0.0)).length() < 1e-12);

        // Heavy friction stops the tangential slide entirely.
        let stopped = project_and_apply_friction(DVec2::new(1.0, -1.0), n, 10.0);
        assert_eq!(stopped, DVec2::ZERO);

        // Separating contact picks up no friction.
        let sep = project_and_apply_friction(DVec2::new(1.0, 1.0), n, 10.0);
        assert!((sep - DVec2::new(1.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn closed_domain_zeroes_border_faces() {
        let mut velocity = FaceCenteredGrid::new(4, 4, DVec2::splat(1.0), DVec2::ZERO);
        velocity.fill(DVec2::new(1.0, 1.0));

        let mut solver = GridFractionalBoundaryConditionSolver::new();
        solver.constrain_velocity(&mut velocity, 2);

        for j in 0..4 {
            assert_eq!(velocity.u_at(0, j), 0.0);
            assert_eq!(velocity.u_at(4, j), 0.0);
        }
        for i in 0..4 {
            assert_eq!(velocity.v_at(i, 0), 0.0);
            assert_eq!(velocity.v_at(i, 4), 0.0);
        }
        // Interior faces are untouched without a collider.
        assert_eq!(velocity.u_at(2, 2), 1.0);
        assert_eq!(velocity.v_at(2, 2), 1.0);
    }

    #[test]
    fn open_domain_keeps_border_faces() {
        let mut velocity = FaceCenteredGrid::new(4, 4, DVec2::splat(1.0), DVec2::ZERO);
        velocity.fill(DVec2::new(1.0, 1.0));

        let mut solver = GridFractionalBoundaryConditionSolver::new();
        solver.set_closed_domain_boundary_flag(DIRECTION_NONE);
        solver.constrain_velocity(&mut velocity, 2);

        assert_eq!(velocity.u_at(0, 1), 1.0);
        assert_eq!(velocity.v_at(1, 0), 1.0);
    }

    #[test]
    fn static_wall_stops_flow_through_its_face() {
        let mut velocity = FaceCenteredGrid::new(8, 8, DVec2::splat(1.0), DVec2::ZERO);
        velocity.fill(DVec2::new(1.0, 0.0));

        // Solid slab filling x < 4, so the collider normal is (1, 0)
        // everywhere inside the domain.
        let collider = Collider::new(Box::new(BoxSurface::new(
            DVec2::new(-10.0, -20.0),
            DVec2::new(4.0, 20.0),
        )));
        let mut solver = GridFractionalBoundaryConditionSolver::new();
        solver.set_closed_domain_boundary_flag(DIRECTION_NONE);
        solver.update_collider(Some(&collider), 8, 8, DVec2::splat(1.0), DVec2::ZERO);
        solver.constrain_velocity(&mut velocity, 2);

        // Inside the slab the flow is normal to the surface, so the
        // projection removes it entirely.
        assert!(velocity.u_at(2, 4).abs() < 1e-12);
        assert!(velocity.u_at(1, 3).abs() < 1e-12);

        // Clear of the slab the flow is untouched.
        assert!((velocity.u_at(6, 4) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn blocked_solver_marks_interior_cells() {
        let collider = Collider::new(Box::new(Sphere::new(DVec2::new(4.0, 4.0), 2.0)));
        let mut solver = GridBlockedBoundaryConditionSolver::new();
        solver.update_collider(Some(&collider), 8, 8, DVec2::splat(1.0), DVec2::ZERO);

        assert!(solver.is_collider_cell(4, 4));
        assert!(solver.is_collider_cell(3, 3));
        assert!(!solver.is_collider_cell(0, 0));
        assert!(!solver.is_collider_cell(7, 7));
    }

    #[test]
    fn blocked_solver_snaps_faces_next_to_collider_cells() {
        let mut velocity = FaceCenteredGrid::new(8, 8, DVec2::splat(1.0), DVec2::ZERO);
        velocity.fill(DVec2::new(1.0, 1.0));

        let collider = Collider::new(Box::new(Sphere::new(DVec2::new(4.0, 4.0), 1.5)));
        let mut solver = GridBlockedBoundaryConditionSolver::new();
        solver.set_closed_domain_boundary_flag(DIRECTION_NONE);
        solver.update_collider(Some(&collider), 8, 8, DVec2::splat(1.0), DVec2::ZERO);
        solver.constrain_velocity(&mut velocity, 2);

        // Cell (3, 4) is inside, cell (2, 4) outside: the face between
        // them takes the (zero) collider velocity.
        assert!(solver.is_collider_cell(3, 4));
        assert!(!solver.is_collider_cell(2, 4));
        assert_eq!(velocity.u_at(3, 4), 0.0);
    }

    #[test]
    fn collider_sdf_is_available_after_update() {
        let mut solver = GridFractionalBoundaryConditionSolver::new();
        assert!(solver.collider_sdf().is_none());

        solver.update_collider(None, 4, 4, DVec2::splat(1.0), DVec2::ZERO);
        let sdf = solver.collider_sdf().unwrap();
        assert_eq!(sdf.width, 4);
        assert!(sdf.data.iter().all(|&d| d == f64::MAX));
    }
}
