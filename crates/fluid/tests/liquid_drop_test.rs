//! Multi-frame liquid behavior: a suspended block must fall, land, and
//! keep a plausible amount of liquid in the domain.

use fluid::{FluidSolver, Frame, LevelSetLiquidSolver};

fn block_sdf(solver: &mut LevelSetLiquidSolver) {
    solver.signed_distance_field_mut().fill_with(|pt| {
        let dx = (pt.x - 4.0).abs() - 2.0;
        let dy = (pt.y - 5.0).abs() - 1.0;
        dx.max(dy)
    });
}

#[test]
fn test_liquid_block_falls_to_the_floor() {
    let mut solver = LevelSetLiquidSolver::builder().with_resolution(8, 8).build();
    block_sdf(&mut solver);
    let initial_volume = solver.measure_volume();

    for i in 0..10 {
        solver.update(Frame::new(i, 0.1));
    }

    let sdf = solver.signed_distance_field();
    assert!(
        (0..8).any(|i| sdf.at(i, 0) < 0.0),
        "no liquid reached the floor"
    );
    assert!(
        (0..8).all(|i| sdf.at(i, 7) > 0.0),
        "liquid should not reach the ceiling"
    );

    let volume = solver.measure_volume();
    assert!(
        volume > 0.4 * initial_volume && volume < 1.6 * initial_volume,
        "volume drifted from {} to {}",
        initial_volume,
        volume
    );
}

#[test]
fn test_resting_pool_holds_its_surface_under_gravity() {
    let mut solver = LevelSetLiquidSolver::builder().with_resolution(8, 8).build();
    solver.signed_distance_field_mut().fill_with(|pt| pt.y - 2.0);

    for i in 0..10 {
        solver.update(Frame::new(i, 1.0 / 60.0));
    }

    // Pressure balances gravity, so the interface stays near y = 2.
    let sdf = solver.signed_distance_field();
    for i in 0..8 {
        assert!(sdf.at(i, 1) < 0.0, "column {} lost its liquid", i);
        assert!(sdf.at(i, 4) > 0.0, "column {} flooded the air side", i);
    }
}
