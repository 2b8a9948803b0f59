//! Particle storage for the hybrid solvers.

use glam::DVec2;

/// Plain array-of-attributes particle store.
///
/// Positions and velocities always have the same length; the solver that
/// owns the store is the only writer.
#[derive(Clone, Debug, Default)]
pub struct ParticleSystemData {
    pub positions: Vec<DVec2>,
    pub velocities: Vec<DVec2>,
}

impl ParticleSystemData {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn number_of_particles(&self) -> usize {
        self.positions.len()
    }

    pub fn add_particle(&mut self, position: DVec2, velocity: DVec2) {
        self.positions.push(position);
        self.velocities.push(velocity);
    }

    pub fn add_particles(&mut self, positions: &[DVec2], velocities: &[DVec2]) {
        assert!(
            positions.len() == velocities.len(),
            "position/velocity counts differ: {} vs {}",
            positions.len(),
            velocities.len()
        );
        self.positions.extend_from_slice(positions);
        self.velocities.extend_from_slice(velocities);
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.velocities.clear();
    }
}
