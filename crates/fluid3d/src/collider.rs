//! Rigid colliders: a surface plus a velocity model.

use glam::DVec3;

use crate::surface::Surface;

/// A moving solid obstacle.
///
/// Owns its surface; solver components receive the collider by reference
/// for the duration of a time step and never keep it.
pub struct Collider {
    surface: Box<dyn Surface + Send + Sync>,
    /// Translational velocity of the rigid body.
    pub linear_velocity: DVec3,
    /// Angular velocity in radians per second, right-hand rule.
    pub angular_velocity: DVec3,
    /// Reference point for the angular term of `velocity_at`.
    pub rotation_origin: DVec3,
    /// Tangential velocity damping applied on contact, in [0, 1] and up.
    pub friction_coefficient: f64,
}

impl Collider {
    pub fn new(surface: Box<dyn Surface + Send + Sync>) -> Self {
        Self {
            surface,
            linear_velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
            rotation_origin: DVec3::ZERO,
            friction_coefficient: 0.0,
        }
    }

    #[inline]
    pub fn surface(&self) -> &(dyn Surface + Send + Sync) {
        self.surface.as_ref()
    }

    #[inline]
    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.surface.signed_distance(point)
    }

    #[inline]
    pub fn is_inside(&self, point: DVec3) -> bool {
        self.surface.is_inside(point)
    }

    /// Rigid-body velocity of the collider at `point`.
    pub fn velocity_at(&self, point: DVec3) -> DVec3 {
        let r = point - self.rotation_origin;
        self.linear_velocity + self.angular_velocity.cross(r)
    }

    /// Whether a particle of `radius` at `position` overlaps the collider.
    pub fn is_penetrating(&self, position: DVec3, radius: f64) -> bool {
        self.surface.is_inside(position) || self.surface.closest_distance(position) < radius
    }

    /// Push a penetrating particle back to the surface and respond to the
    /// contact.
    ///
    /// The normal component of the relative velocity is reflected by the
    /// restitution coefficient; the tangential component is scaled down by
    /// friction. Position lands on the surface offset by `radius`.
    pub fn resolve_collision(
        &self,
        radius: f64,
        restitution_coefficient: f64,
        position: &mut DVec3,
        velocity: &mut DVec3,
    ) {
        if !self.is_penetrating(*position, radius) {
            return;
        }

        let target_normal = self.surface.closest_normal(*position);
        let target_point = self.surface.closest_point(*position) + radius * target_normal;
        let collider_velocity = self.velocity_at(*position);

        let relative_velocity = *velocity - collider_velocity;
        let normal_dot = target_normal.dot(relative_velocity);

        if normal_dot < 0.0 {
            let mut relative_velocity_n = normal_dot * target_normal;
            let mut relative_velocity_t = relative_velocity - relative_velocity_n;

            let delta_n = (-restitution_coefficient - 1.0) * relative_velocity_n;
            relative_velocity_n *= -restitution_coefficient;

            if relative_velocity_t.length_squared() > 0.0 {
                let friction_scale = (1.0
                    - self.friction_coefficient * delta_n.length()
                        / relative_velocity_t.length())
                .max(0.0);
                relative_velocity_t *= friction_scale;
            }

            *velocity = relative_velocity_n + relative_velocity_t + collider_velocity;
        }

        *position = target_point;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Sphere;

    #[test]
    fn collision_pushes_particle_out() {
        let collider = Collider::new(Box::new(Sphere::new(DVec3::ZERO, 1.0)));

        let mut position = DVec3::new(0.5, 0.0, 0.0);
        let mut velocity = DVec3::new(-1.0, 0.0, 0.0);
        collider.resolve_collision(0.0, 0.0, &mut position, &mut velocity);

        assert!(collider.signed_distance(position) >= -1e-12);
        // Zero restitution kills the inward normal velocity.
        assert!(velocity.x.abs() < 1e-12);
    }

    #[test]
    fn separating_contact_keeps_velocity() {
        let collider = Collider::new(Box::new(Sphere::new(DVec3::ZERO, 1.0)));

        let mut position = DVec3::new(0.9, 0.0, 0.0);
        let mut velocity = DVec3::new(2.0, 0.0, 0.0);
        collider.resolve_collision(0.0, 0.5, &mut position, &mut velocity);

        // Outward-moving contact is repositioned but not reflected.
        assert_eq!(velocity, DVec3::new(2.0, 0.0, 0.0));
        assert!((position.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn velocity_at_composes_rotation() {
        let mut collider = Collider::new(Box::new(Sphere::new(DVec3::ZERO, 1.0)));
        collider.linear_velocity = DVec3::new(1.0, 0.0, 0.0);
        collider.angular_velocity = DVec3::new(0.0, 0.0, 2.0);

        let v = collider.velocity_at(DVec3::new(0.0, 1.0, 0.0));
        // omega x r at (0, 1, 0) points along -x.
        assert!((v - DVec3::new(-1.0, 0.0, 0.0)).length() < 1e-12);
    }
}
