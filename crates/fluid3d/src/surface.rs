//! Implicit surface geometry used for collider queries.

use glam::DVec3;

/// Axis-aligned box in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub lower: DVec3,
    pub upper: DVec3,
}

impl BoundingBox {
    pub fn new(lower: DVec3, upper: DVec3) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub fn contains(&self, point: DVec3) -> bool {
        point.x >= self.lower.x
            && point.x <= self.upper.x
            && point.y >= self.lower.y
            && point.y <= self.upper.y
            && point.z >= self.lower.z
            && point.z <= self.upper.z
    }

    #[inline]
    pub fn clamp(&self, point: DVec3) -> DVec3 {
        point.clamp(self.lower, self.upper)
    }

    #[inline]
    pub fn mid_point(&self) -> DVec3 {
        0.5 * (self.lower + self.upper)
    }

    /// Grow the box by `delta` on every side (shrink when negative).
    pub fn expanded(&self, delta: f64) -> Self {
        Self {
            lower: self.lower - DVec3::splat(delta),
            upper: self.upper + DVec3::splat(delta),
        }
    }
}

/// Geometric surface with signed-distance and closest-point queries.
///
/// The sign convention is negative inside, positive outside.
pub trait Surface {
    /// Closest point on the surface to `point`.
    fn closest_point(&self, point: DVec3) -> DVec3;

    /// Outward normal at the closest surface point to `point`.
    fn closest_normal(&self, point: DVec3) -> DVec3;

    /// Signed distance from `point` to the surface.
    fn signed_distance(&self, point: DVec3) -> f64;

    /// Whether `point` lies inside the surface.
    fn is_inside(&self, point: DVec3) -> bool {
        self.signed_distance(point) < 0.0
    }

    /// Unsigned distance from `point` to the surface.
    fn closest_distance(&self, point: DVec3) -> f64 {
        self.signed_distance(point).abs()
    }
}

/// Sphere defined by center and radius.
#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub center: DVec3,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: DVec3, radius: f64) -> Self {
        assert!(radius > 0.0, "sphere radius must be positive, got {}", radius);
        Self { center, radius }
    }
}

impl Surface for Sphere {
    fn closest_point(&self, point: DVec3) -> DVec3 {
        self.center + self.radius * self.closest_normal(point)
    }

    fn closest_normal(&self, point: DVec3) -> DVec3 {
        let offset = point - self.center;
        if offset.length_squared() < f64::EPSILON {
            DVec3::X
        } else {
            offset.normalize()
        }
    }

    fn signed_distance(&self, point: DVec3) -> f64 {
        (point - self.center).length() - self.radius
    }
}

/// Axis-aligned solid box surface.
#[derive(Clone, Copy, Debug)]
pub struct BoxSurface {
    pub bound: BoundingBox,
}

impl BoxSurface {
    pub fn new(lower: DVec3, upper: DVec3) -> Self {
        assert!(
            lower.x < upper.x && lower.y < upper.y && lower.z < upper.z,
            "box corners must be ordered, got ({}, {}, {}) .. ({}, {}, {})",
            lower.x,
            lower.y,
            lower.z,
            upper.x,
            upper.y,
            upper.z
        );
        Self {
            bound: BoundingBox::new(lower, upper),
        }
    }

    /// Distances to the six faces and the axis index of the nearest one,
    /// for points inside the box.
    fn nearest_face(&self, point: DVec3) -> (f64, DVec3) {
        let faces = [
            (point.x - self.bound.lower.x, DVec3::NEG_X),
            (self.bound.upper.x - point.x, DVec3::X),
            (point.y - self.bound.lower.y, DVec3::NEG_Y),
            (self.bound.upper.y - point.y, DVec3::Y),
            (point.z - self.bound.lower.z, DVec3::NEG_Z),
            (self.bound.upper.z - point.z, DVec3::Z),
        ];
        let mut best = faces[0];
        for face in &faces[1..] {
            if face.0 < best.0 {
                best = *face;
            }
        }
        best
    }
}

impl Surface for BoxSurface {
    fn closest_point(&self, point: DVec3) -> DVec3 {
        if self.bound.contains(point) {
            // Snap to the nearest face.
            let (distance, normal) = self.nearest_face(point);
            point + distance * normal
        } else {
            self.bound.clamp(point)
        }
    }

    fn closest_normal(&self, point: DVec3) -> DVec3 {
        if self.bound.contains(point) {
            self.nearest_face(point).1
        } else {
            let offset = point - self.bound.clamp(point);
            if offset.length_squared() < f64::EPSILON {
                DVec3::X
            } else {
                offset.normalize()
            }
        }
    }

    fn signed_distance(&self, point: DVec3) -> f64 {
        if self.bound.contains(point) {
            -self.nearest_face(point).0
        } else {
            (point - self.bound.clamp(point)).length()
        }
    }
}
