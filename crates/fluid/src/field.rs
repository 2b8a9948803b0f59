//! Scalar and vector field abstractions.
//!
//! Solver stages consume fields through these traits so they can take
//! grid-backed data and analytic fields (constant gravity, collider
//! velocity) through the same interface.

use glam::DVec2;

/// Continuous scalar field sampled at arbitrary world-space points.
///
/// `Send + Sync` so fields can be shared across worker threads.
pub trait ScalarField: Send + Sync {
    /// Field value at `point`.
    fn sample(&self, point: DVec2) -> f64;
}

/// Continuous vector field sampled at arbitrary world-space points.
pub trait VectorField: Send + Sync {
    /// Field value at `point`.
    fn sample(&self, point: DVec2) -> DVec2;
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
    fn sample(&self, _point: DVec2) -> f64 {
        self.value
    }
}

/// Vector field with the same value everywhere.
#[derive(Clone, Copy, Debug)]
pub struct ConstantVectorField {
    value: DVec2,
}

impl ConstantVectorField {
    pub const fn new(value: DVec2) -> Self {
        Self { value }
    }
}

impl VectorField for ConstantVectorField {
    #[inline]
    fn sample(&self, _point: DVec2) -> DVec2 {
        self.value
    }
}
