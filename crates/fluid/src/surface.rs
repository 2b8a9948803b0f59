//! Implicit surface geometry used for collider queries.

use glam::DVec2;

/// Axis-aligned box in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub lower: DVec2,
    pub upper: DVec2,
}

impl BoundingBox {
    pub fn new(lower: DVec2, upper: DVec2) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub fn contains(&self, point: DVec2) -> bool {
        point.x >= self.lower.x
            && point.x <= self.upper.x
            && point.y >= self.lower.y
            && point.y <= self.upper.y
    }

    #[inline]
    pub fn clamp(&self, point: DVec2) -> DVec2 {
        point.clamp(self.lower, self.upper)
    }

    #[inline]
    pub fn mid_point(&self) -> DVec2 {
        0.5 * (self.lower + self.upper)
    }

    /// Grow the box by `delta` on every side (shrink when negative).
    pub fn expanded(&self, delta: f64) -> Self {
        Self {
            lower: self.lower - DVec2::splat(delta),
            upper: self.upper + DVec2::splat(delta),
        }
    }
}

/// Geometric surface with signed-distance and closest-point queries.
///
/// The sign convention is negative inside, positive outside.
pub trait Surface {
    /// Closest point on the surface to `point`.
    fn closest_point(&self, point: DVec2) -> DVec2;

    /// Outward normal at the closest surface point to `point`.
    fn closest_normal(&self, point: DVec2) -> DVec2;

    /// Signed distance from `point` to the surface.
    fn signed_distance(&self, point: DVec2) -> f64;

    /// Whether `point` lies inside the surface.
    fn is_inside(&self, point: DVec2) -> bool {
        self.signed_distance(point) < 0.0
    }

    /// Unsigned distance from `point` to the surface.
    fn closest_distance(&self, point: DVec2) -> f64 {
        self.signed_distance(point).abs()
    }
}

/// Circle (a 2-D sphere) defined by center and radius.
#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub center: DVec2,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: DVec2, radius: f64) -> Self {
        assert!(radius > 0.0, "sphere radius must be positive, got {}", radius);
        Self { center, radius }
    }
}

impl Surface for Sphere {
    fn closest_point(&self, point: DVec2) -> DVec2 {
        self.center + self.radius * self.closest_normal(point)
    }

    fn closest_normal(&self, point: DVec2) -> DVec2 {
        let offset = point - self.center;
        if offset.length_squared() < f64::EPSILON {
            DVec2::X
        } else {
            offset.normalize()
        }
    }

    fn signed_distance(&self, point: DVec2) -> f64 {
        (point - self.center).length() - self.radius
    }
}

/// Axis-aligned solid box surface.
#[derive(Clone, Copy, Debug)]
pub struct BoxSurface {
    pub bound: BoundingBox,
}

impl BoxSurface {
    pub fn new(lower: DVec2, upper: DVec2) -> Self {
        assert!(
            lower.x < upper.x && lower.y < upper.y,
            "box corners must be ordered, got ({}, {}) .. ({}, {})",
            lower.x,
            lower.y,
            upper.x,
            upper.y
        );
        Self {
            bound: BoundingBox::new(lower, upper),
        }
    }
}

impl Surface for BoxSurface {
    fn closest_point(&self, point: DVec2) -> DVec2 {
        if self.bound.contains(point) {
            // Snap to the nearest face.
            let d_left = point.x - self.bound.lower.x;
            let d_right = self.bound.upper.x - point.x;
            let d_down = point.y - self.bound.lower.y;
            let d_up = self.bound.upper.y - point.y;
            let min = d_left.min(d_right).min(d_down).min(d_up);
            if min == d_left {
                DVec2::new(self.bound.lower.x, point.y)
            } else if min == d_right {
                DVec2::new(self.bound.upper.x, point.y)
            } else if min == d_down {
                DVec2::new(point.x, self.bound.lower.y)
            } else {
                DVec2::new(point.x, self.bound.upper.y)
            }
        } else {
            self.bound.clamp(point)
        }
    }

    fn closest_normal(&self, point: DVec2) -> DVec2 {
        if self.bound.contains(point) {
            let d_left = point.x - self.bound.lower.x;
            let d_right = self.bound.upper.x - point.x;
            let d_down = point.y - self.bound.lower.y;
            let d_up = self.bound.upper.y - point.y;
            let min = d_left.min(d_right).min(d_down).min(d_up);
            if min == d_left {
                DVec2::NEG_X
            } else if min == d_right {
                DVec2::X
            } else if min == d_down {
                DVec2::NEG_Y
            } else {
                DVec2::Y
            }
        } else {
            let offset = point - self.bound.clamp(point);
            if offset.length_squared() < f64::EPSILON {
                DVec2::X
            } else {
                offset.normalize()
            }
        }
    }

    fn signed_distance(&self, point: DVec2) -> f64 {
        if self.bound.contains(point) {
            let d_left = point.x - self.bound.lower.x;
            let d_right = self.bound.upper.x - point.x;
            let d_down = point.y - self.bound.lower.y;
            let d_up = self.bound.upper.y - point.y;
            -d_left.min(d_right).min(d_down).min(d_up)
        } else {
            (point - self.bound.clamp(point)).length()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_signed_distance_and_normal() {
        let sphere = Sphere::new(DVec2::new(1.0, 1.0), 2.0);
        assert!((sphere.signed_distance(DVec2::new(4.0, 1.0)) - 1.0).abs() < 1e-12);
        assert!((sphere.signed_distance(DVec2::new(1.0, 1.0)) + 2.0).abs() < 1e-12);
        assert!(sphere.is_inside(DVec2::new(1.5, 1.5)));
        assert_eq!(sphere.closest_normal(DVec2::new(5.0, 1.0)), DVec2::X);
        let cp = sphere.closest_point(DVec2::new(5.0, 1.0));
        assert!((cp - DVec2::new(3.0, 1.0)).length() < 1e-12);
    }

    #[test]
    fn box_queries_inside_and_outside() {
        let surface = BoxSurface::new(DVec2::ZERO, DVec2::new(2.0, 1.0));

        // Outside: closest point clamps to the corner.
        let p = DVec2::new(3.0, 2.0);
        assert_eq!(surface.closest_point(p), DVec2::new(2.0, 1.0));
        assert!((surface.signed_distance(p) - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!(!surface.is_inside(p));

        // Inside: nearest face is the top.
        let q = DVec2::new(1.0, 0.9);
        assert!(surface.is_inside(q));
        assert_eq!(surface.closest_point(q), DVec2::new(1.0, 1.0));
        assert_eq!(surface.closest_normal(q), DVec2::Y);
        assert!((surface.signed_distance(q) + 0.1).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "sphere radius must be positive")]
    fn degenerate_sphere_is_rejected() {
        let _ = Sphere::new(DVec2::ZERO, 0.0);
    }
}
