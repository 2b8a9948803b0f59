//! Rigid colliders: a surface plus a velocity model.

use glam::DVec2;

use crate::surface::Surface;

/// A moving solid obstacle.
///
/// Owns its surface; solver components receive the collider by reference
/// for the duration of a time step and never keep it.
pub struct Collider {
    surface: Box<dyn Surface + Send + Sync>,
    /// Translational velocity of the rigid body.
    pub linear_velocity: DVec2,
    /// Angular velocity (counterclockwise, radians per second).
    pub angular_velocity: f64,
    /// Reference point for the angular term of `velocity_at`.
    pub rotation_origin: DVec2,
    /// Tangential velocity damping applied on contact, in [0, 1] and up.
    pub friction_coefficient: f64,
}

impl Collider {
    pub fn new(surface: Box<dyn Surface + Send + Sync>) -> Self {
        Self {
            surface,
            linear_velocity: DVec2::ZERO,
            angular_velocity: 0.0,
            rotation_origin: DVec2::ZERO,
            friction_coefficient: 0.0,
        }
    }

    #[inline]
    pub fn surface(&self) -> &(dyn Surface + Send + Sync) {
        self.surface.as_ref()
    }

    #[inline]
    pub fn signed_distance(&self, point: DVec2) -> f64 {
        self.surface.signed_distance(point)
    }

    #[inline]
    pub fn is_inside(&self, point: DVec2) -> bool {
        self.surface.is_inside(point)
    }

    /// Rigid-body velocity of the collider at `point`.
    pub fn velocity_at(&self, point: DVec2) -> DVec2 {
        let r = point - self.rotation_origin;
        self.linear_velocity + self.angular_velocity * DVec2::new(-r.y, r.x)
    }

    /// Whether a particle of `radius` at `position` overlaps the collider.
    pub fn is_penetrating(&self, position: DVec2, radius: f64) -> bool {
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
        position: &mut DVec2,
        velocity: &mut DVec2,
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
