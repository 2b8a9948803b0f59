//! Particle storage for the hybrid solvers.

use glam::DVec3;

/// Plain array-of-attributes particle store.
///
/// Positions and velocities always have the same length; the solver that
/// owns the store is the only writer.
#[derive(Clone, Debug, Default)]
pub struct ParticleSystemData {
    pub positions: Vec<DVec3>,
    pub velocities: Vec<DVec3>,
}

impl ParticleSystemData {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn number_of_particles(&self) -> usize {
        self.positions.len()
    }

    pub fn add_particle(&mut self, position: DVec3, velocity: DVec3) {
        self.positions.push(position);
        self.velocities.push(velocity);
    }

    pub fn add_particles(&mut self, positions: &[DVec3], velocities: &[DVec3]) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_particles_extends_both_arrays() {
        let mut data = ParticleSystemData::new();
        data.add_particle(DVec3::ZERO, DVec3::X);
        data.add_particles(
            &[DVec3::new(1.0, 0.0, 0.0), DVec3::new(2.0, 0.0, 0.0)],
            &[DVec3::ZERO, DVec3::ZERO],
        );
        assert_eq!(data.number_of_particles(), 3);
        assert_eq!(data.velocities[0], DVec3::X);
    }

    #[test]
    #[should_panic(expected = "position/velocity counts differ")]
    fn mismatched_batches_are_rejected() {
        let mut data = ParticleSystemData::new();
        data.add_particles(&[DVec3::ZERO], &[]);
    }
}
