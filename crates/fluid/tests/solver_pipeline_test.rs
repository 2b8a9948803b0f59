//! Whole-pipeline behavior of the grid solver: transport identity,
//! sub-step accounting, and viscous damping through a real update.

use fluid::boundary::DIRECTION_NONE;
use fluid::{FluidSolver, Frame, GridFluidSolver};
use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[test]
fn test_zero_velocity_update_leaves_layers_unchanged() {
    let mut solver = GridFluidSolver::builder()
        .with_resolution(8, 8)
        .with_gravity(DVec2::ZERO)
        .build();
    let layer = solver.grids_mut().add_advectable_scalar_data(0.0);
    solver
        .grids_mut()
        .advectable_scalar_data_mut(layer)
        .fill_with(|p| p.x + 2.0 * p.y);
    let before = solver.grids().advectable_scalar_data(layer).data.clone();

    solver.update(Frame::new(0, 1.0 / 60.0));

    let after = &solver.grids().advectable_scalar_data(layer).data;
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a, b);
    }
}

#[test]
fn test_sub_step_count_matches_the_cfl_formula() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for _ in 0..8 {
        let magnitude: f64 = rng.gen_range(1.0..80.0);
        let mut solver = GridFluidSolver::builder()
            .with_resolution(8, 8)
            .with_gravity(DVec2::ZERO)
            .build();
        solver.set_closed_domain_boundary_flag(DIRECTION_NONE);
        solver.velocity_mut().fill(DVec2::new(magnitude, 0.0));

        let dt = 0.5;
        let expected = (solver.cfl(dt) / solver.max_cfl()).ceil().max(1.0) as u32;
        solver.update(Frame::new(0, dt));

        assert_eq!(
            solver.last_number_of_sub_time_steps(),
            expected,
            "magnitude {}",
            magnitude
        );
    }
}

#[test]
fn test_viscosity_damps_a_shear_profile() {
    let mut solver = GridFluidSolver::builder()
        .with_resolution(8, 8)
        .with_gravity(DVec2::ZERO)
        .with_viscosity_coefficient(10.0)
        .build();
    solver.set_closed_domain_boundary_flag(DIRECTION_NONE);
    {
        let velocity = solver.velocity_mut();
        for j in 0..velocity.height {
            let value = if j < 4 { 1.0 } else { -1.0 };
            for i in 0..=velocity.width {
                *velocity.u_at_mut(i, j) = value;
            }
        }
    }

    solver.update(Frame::new(0, 1.0 / 60.0));

    let u_above = solver.velocity().u_at(4, 3);
    let u_below = solver.velocity().u_at(4, 4);
    assert!(u_above < 1.0 - 1e-3 && u_above > 0.0, "got {}", u_above);
    assert!(u_below > -1.0 + 1e-3 && u_below < 0.0, "got {}", u_below);
    // Momentum stays balanced across the shear line.
    assert!((u_above + u_below).abs() < 1e-6);
}
