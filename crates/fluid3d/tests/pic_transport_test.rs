//! Hybrid particle transport over many frames, across all transfer
//! schemes. Seeded random particle clouds keep the scenarios honest.

use fluid3d::{FluidSolver, Frame, PicSolver, VelocityTransfer};
use glam::DVec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn seeded_solver(seed: u64, transfer: VelocityTransfer) -> PicSolver {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut solver = PicSolver::builder()
        .with_resolution(16, 16, 16)
        .with_velocity_transfer(transfer)
        .build();
    for _ in 0..600 {
        let pos = DVec3::new(
            rng.gen_range(2.0..14.0),
            rng.gen_range(2.0..14.0),
            rng.gen_range(2.0..14.0),
        );
        let vel = DVec3::new(
            rng.gen_range(-8.0..8.0),
            rng.gen_range(-8.0..8.0),
            rng.gen_range(-8.0..8.0),
        );
        solver.particles_mut().add_particle(pos, vel);
    }
    solver
}

#[test]
fn test_particles_remain_inside_the_closed_domain() {
    let schemes = [
        VelocityTransfer::Pic,
        VelocityTransfer::Flip {
            pic_blending_factor: 0.05,
        },
        VelocityTransfer::Apic,
    ];
    for transfer in schemes {
        let mut solver = seeded_solver(9, transfer);
        let count = solver.particles().number_of_particles();

        for i in 0..20 {
            solver.update(Frame::new(i, 1.0 / 60.0));
        }

        assert_eq!(
            solver.particles().number_of_particles(),
            count,
            "{:?} lost particles",
            transfer
        );
        for &p in &solver.particles().positions {
            assert!(
                p.x >= 0.0
                    && p.x <= 16.0
                    && p.y >= 0.0
                    && p.y <= 16.0
                    && p.z >= 0.0
                    && p.z <= 16.0,
                "{:?} pushed a particle to {:?}",
                transfer,
                p
            );
        }
    }
}

#[test]
fn test_particle_cloud_settles_toward_the_floor() {
    let mut solver = seeded_solver(31, VelocityTransfer::Flip {
        pic_blending_factor: 0.05,
    });

    let mean_y_before: f64 = solver.particles().positions.iter().map(|p| p.y).sum::<f64>()
        / solver.particles().number_of_particles() as f64;

    for i in 0..40 {
        solver.update(Frame::new(i, 1.0 / 60.0));
    }

    let mean_y_after: f64 = solver.particles().positions.iter().map(|p| p.y).sum::<f64>()
        / solver.particles().number_of_particles() as f64;

    assert!(
        mean_y_after < mean_y_before,
        "cloud did not settle: {} -> {}",
        mean_y_before,
        mean_y_after
    );
}

#[test]
fn test_fluid_region_follows_the_particles() {
    let mut solver = PicSolver::builder().with_resolution(16, 16, 16).build();
    // Dense half-spaced block filling [6, 10]^3.
    for k in 0..9 {
        for j in 0..9 {
            for i in 0..9 {
                let pos = DVec3::new(
                    6.0 + 0.5 * i as f64,
                    6.0 + 0.5 * j as f64,
                    6.0 + 0.5 * k as f64,
                );
                solver.particles_mut().add_particle(pos, DVec3::ZERO);
            }
        }
    }

    solver.update(Frame::new(0, 1.0 / 60.0));

    let sdf = solver.signed_distance_field();
    // The block interior is wet and the far corner cell stays dry.
    assert!(sdf.at(8, 8, 8) < 0.0);
    assert!(sdf.at(15, 15, 15) > 0.0);
}
