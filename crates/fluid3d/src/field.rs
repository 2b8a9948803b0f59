//! Scalar and vector field abstractions.
//!
//! Solver stages consume fields through these traits so they can take
//! grid-backed data and analytic fields (constant gravity, collider
//! velocity) through the same interface.

use glam::DVec3;

/// Continuous scalar field sampled at arbitrary world-space points.
///
/// `Send + Sync` so fields can be shared across worker threads.
pub trait ScalarField: Send + Sync {
    /// Field value at `point`.
    fn sample(&self, point: DVec3) -> f64;
}

/// Continuous vector field sampled at arbitrary world-space points.
pub trait VectorField: Send + Sync {
    /// Field value at `point`.
    fn sample(&self, point: DVec3) -> DVec3;
}

/// Scalar field with the same value everywhere.
#[derive(Clone, Copy, Debug)]
pub struct ConstantScalarField {
    value: f64,
}

impl ConstantScalarField {
    pub const fn new(value: f64) -> Self {
        Self { value }
    }
}

impl ScalarField for ConstantScalarField {
    #[inline]
    fn sample(&self, _point: DVec3) -> f64 {
        self.value
    }
}

/// Vector field with the same value everywhere.
#[derive(Clone, Copy, Debug)]
pub struct ConstantVectorField {
    value: DVec3,
}

impl ConstantVectorField {
    pub const fn new(value: DVec3) -> Self {
        Self { value }
    }
}

impl VectorField for ConstantVectorField {
    #[inline]
    fn sample(&self, _point: DVec3) -> DVec3 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_fields_ignore_position() {
        let s = ConstantScalarField::new(4.5);
        let v = ConstantVectorField::new(DVec3::new(1.0, -2.0, 0.5));
        assert_eq!(s.sample(DVec3::ZERO), 4.5);
        assert_eq!(s.sample(DVec3::new(100.0, -3.0, 9.0)), 4.5);
        assert_eq!(v.sample(DVec3::new(7.0, 7.0, 7.0)), DVec3::new(1.0, -2.0, 0.5));
    }
}
