//! Multi-frame smoke behavior: a heated region must produce a rising
//! plume, measured by the temperature center of mass.

use fluid::{FluidSolver, Frame, GridSmokeSolver};

fn temperature_center_of_mass_y(solver: &GridSmokeSolver) -> f64 {
    let temperature = solver.temperature();
    let mut mass = 0.0;
    let mut moment = 0.0;
    for j in 0..temperature.height {
        for i in 0..temperature.width {
            let value = temperature.at(i, j);
            mass += value;
            moment += value * temperature.data_position(i, j).y;
        }
    }
    moment / mass.max(f64::EPSILON)
}

#[test]
fn test_hot_blob_rises_over_time() {
    let mut solver = GridSmokeSolver::builder().with_resolution(16, 16).build();
    for j in 2..5 {
        for i in 6..10 {
            *solver.temperature_mut().at_mut(i, j) = 1.0;
            *solver.smoke_density_mut().at_mut(i, j) = 1.0;
        }
    }

    let before = temperature_center_of_mass_y(&solver);
    for i in 0..30 {
        solver.update(Frame::new(i, 1.0 / 60.0));
    }
    let after = temperature_center_of_mass_y(&solver);

    assert!(
        after > before + 0.1,
        "plume did not rise: {} -> {}",
        before,
        after
    );
}

#[test]
fn test_smoke_never_turns_negative() {
    let mut solver = GridSmokeSolver::builder().with_resolution(16, 16).build();
    for j in 2..5 {
        for i in 6..10 {
            *solver.temperature_mut().at_mut(i, j) = 1.0;
            *solver.smoke_density_mut().at_mut(i, j) = 1.0;
        }
    }

    for i in 0..30 {
        solver.update(Frame::new(i, 1.0 / 60.0));
    }

    for &d in &solver.smoke_density().data {
        assert!(d >= 0.0, "density fell below zero: {}", d);
    }
    for &t in &solver.temperature().data {
        assert!(t >= 0.0, "temperature fell below zero: {}", t);
    }
}
