//! Particle emission from implicit volumes.

use std::f64::consts::PI;

use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::particles::ParticleSystemData;
use crate::surface::{BoundingBox, Surface};

/// Emits particles on a jittered regular lattice inside a surface.
///
/// Emission is capped at `max_number_of_particles` over the emitter's
/// lifetime. A one-shot emitter fires on its first update only; otherwise
/// it keeps topping up until the cap is reached.
pub struct VolumeParticleEmitter {
    surface: Box<dyn Surface + Send + Sync>,
    bounds: BoundingBox,
    spacing: f64,
    initial_velocity: DVec3,
    jitter: f64,
    is_one_shot: bool,
    max_number_of_particles: usize,
    number_of_emitted_particles: usize,
    has_emitted: bool,
    rng: StdRng,
}

impl VolumeParticleEmitter {
    pub fn new(
        surface: Box<dyn Surface + Send + Sync>,
        bounds: BoundingBox,
        spacing: f64,
        initial_velocity: DVec3,
    ) -> Self {
        assert!(spacing > 0.0, "emitter spacing must be positive, got {}", spacing);
        Self {
            surface,
            bounds,
            spacing,
            initial_velocity,
            jitter: 0.0,
            is_one_shot: true,
            max_number_of_particles: usize::MAX,
            number_of_emitted_particles: 0,
            has_emitted: false,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Jitter amount in [0, 1]: fraction of half a lattice spacing.
    pub fn set_jitter(&mut self, jitter: f64) {
        self.jitter = jitter.clamp(0.0, 1.0);
    }

    pub fn set_is_one_shot(&mut self, one_shot: bool) {
        self.is_one_shot = one_shot;
    }

    pub fn set_max_number_of_particles(&mut self, max: usize) {
        self.max_number_of_particles = max;
    }

    /// Reseed the jitter RNG (emission is deterministic per seed).
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    #[inline]
    pub fn number_of_emitted_particles(&self) -> usize {
        self.number_of_emitted_particles
    }

    /// Emit due particles into `particles`.
    pub fn update(&mut self, particles: &mut ParticleSystemData) {
        if self.is_one_shot && self.has_emitted {
            return;
        }
        self.emit(particles);
        self.has_emitted = true;
    }

    /// Uniform random direction on the unit sphere.
    fn random_direction(&mut self) -> DVec3 {
        let z = self.rng.gen::<f64>() * 2.0 - 1.0;
        let angle = self.rng.gen::<f64>() * 2.0 * PI;
        let r = (1.0 - z * z).max(0.0).sqrt();
        DVec3::new(r * angle.cos(), r * angle.sin(), z)
    }

    fn emit(&mut self, particles: &mut ParticleSystemData) {
        let max_jitter_distance = 0.5 * self.jitter * self.spacing;
        let half = 0.5 * self.spacing;

        let nx = ((self.bounds.upper.x - self.bounds.lower.x) / self.spacing).floor() as usize;
        let ny = ((self.bounds.upper.y - self.bounds.lower.y) / self.spacing).floor() as usize;
        let nz = ((self.bounds.upper.z - self.bounds.lower.z) / self.spacing).floor() as usize;

        'lattice: for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let point = self.bounds.lower
                        + DVec3::new(
                            half + i as f64 * self.spacing,
                            half + j as f64 * self.spacing,
                            half + k as f64 * self.spacing,
                        );
                    let offset = max_jitter_distance * self.random_direction();
                    let candidate = point + offset;

                    if self.surface.signed_distance(candidate) <= 0.0 {
                        if self.number_of_emitted_particles >= self.max_number_of_particles {
                            break 'lattice;
                        }
                        particles.add_particle(candidate, self.initial_velocity);
                        self.number_of_emitted_particles += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Sphere;

    fn emitter(max: usize) -> VolumeParticleEmitter {
        let mut e = VolumeParticleEmitter::new(
            Box::new(Sphere::new(DVec3::new(1.0, 1.0, 1.0), 0.5)),
            BoundingBox::new(DVec3::ZERO, DVec3::new(2.0, 2.0, 2.0)),
            0.1,
            DVec3::ZERO,
        );
        e.set_max_number_of_particles(max);
        e
    }

    #[test]
    fn emits_only_inside_the_surface() {
        let mut e = emitter(usize::MAX);
        let mut particles = ParticleSystemData::new();
        e.update(&mut particles);

        assert!(particles.number_of_particles() > 0);
        for &p in &particles.positions {
            assert!((p - DVec3::new(1.0, 1.0, 1.0)).length() <= 0.5 + 1e-12);
        }
    }

    #[test]
    fn one_shot_does_not_refill() {
        let mut e = emitter(usize::MAX);
        let mut particles = ParticleSystemData::new();
        e.update(&mut particles);
        let first = particles.number_of_particles();
        e.update(&mut particles);
        assert_eq!(particles.number_of_particles(), first);
    }

    #[test]
    fn respects_particle_cap() {
        let mut e = emitter(10);
        e.set_is_one_shot(false);
        let mut particles = ParticleSystemData::new();
        e.update(&mut particles);
        e.update(&mut particles);
        assert_eq!(particles.number_of_particles(), 10);
        assert_eq!(e.number_of_emitted_particles(), 10);
    }
}
