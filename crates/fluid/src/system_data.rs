//! Bundled grid state owned by a fluid solver.

use glam::DVec2;

use crate::grid::{FaceCenteredGrid, ScalarGrid};

/// Velocity plus any number of registered advectable data layers, all
/// sharing one resolution, spacing and origin.
///
/// Layers are addressed by the index returned at registration; the solver
/// advects every registered layer each sub-step.
#[derive(Clone, Debug)]
pub struct GridSystemData {
    pub width: usize,
    pub height: usize,
    pub spacing: DVec2,
    pub origin: DVec2,
    velocity: FaceCenteredGrid,
    advectable_scalar_data: Vec<ScalarGrid>,
    advectable_vector_data: Vec<FaceCenteredGrid>,
}

impl GridSystemData {
    pub fn new(width: usize, height: usize, spacing: DVec2, origin: DVec2) -> Self {
        Self {
            width,
            height,
            spacing,
            origin,
            velocity: FaceCenteredGrid::new(width, height, spacing, origin),
            advectable_scalar_data: Vec::new(),
            advectable_vector_data: Vec::new(),
        }
    }

    /// Rebuild every layer at a new resolution, dropping old content.
    pub fn resize(&mut self, width: usize, height: usize, spacing: DVec2, origin: DVec2) {
        self.width = width;
        self.height = height;
        self.spacing = spacing;
        self.origin = origin;
        self.velocity.resize(width, height, spacing, origin);
        for grid in &mut self.advectable_scalar_data {
            grid.resize(width, height, spacing, origin);
        }
        for grid in &mut self.advectable_vector_data {
            grid.resize(width, height, spacing, origin);
        }
    }

    /// Register a cell-centered scalar layer advected with the flow.
    /// Returns the layer's index.
    pub fn add_advectable_scalar_data(&mut self, initial_value: f64) -> usize {
        self.advectable_scalar_data.push(ScalarGrid::with_value(
            self.width,
            self.height,
            self.spacing,
            self.origin,
            initial_value,
        ));
        self.advectable_scalar_data.len() - 1
    }

    /// Register a face-centered vector layer advected with the flow.
    /// Returns the layer's index.
    pub fn add_advectable_vector_data(&mut self) -> usize {
        self.advectable_vector_data.push(FaceCenteredGrid::new(
            self.width,
            self.height,
            self.spacing,
            self.origin,
        ));
        self.advectable_vector_data.len() - 1
    }

    #[inline]
    pub fn velocity(&self) -> &FaceCenteredGrid {
        &self.velocity
    }

    #[inline]
    pub fn velocity_mut(&mut self) -> &mut FaceCenteredGrid {
        &mut self.velocity
    }

    /// Mutable velocity alongside read access to every scalar layer, for
    /// passes that write velocity from layer samples.
    #[inline]
    pub fn velocity_mut_and_scalar_data(&mut self) -> (&mut FaceCenteredGrid, &[ScalarGrid]) {
        (&mut self.velocity, &self.advectable_scalar_data)
    }

    #[inline]
    pub fn advectable_scalar_data(&self, idx: usize) -> &ScalarGrid {
        &self.advectable_scalar_data[idx]
    }

    #[inline]
    pub fn advectable_scalar_data_mut(&mut self, idx: usize) -> &mut ScalarGrid {
        &mut self.advectable_scalar_data[idx]
    }

    #[inline]
    pub fn number_of_advectable_scalar_data(&self) -> usize {
        self.advectable_scalar_data.len()
    }

    #[inline]
    pub fn advectable_vector_data(&self, idx: usize) -> &FaceCenteredGrid {
        &self.advectable_vector_data[idx]
    }

    #[inline]
    pub fn advectable_vector_data_mut(&mut self, idx: usize) -> &mut FaceCenteredGrid {
        &mut self.advectable_vector_data[idx]
    }

    #[inline]
    pub fn number_of_advectable_vector_data(&self) -> usize {
        self.advectable_vector_data.len()
    }

    /// Cell center position shared by every cell-centered layer.
    #[inline]
    pub fn cell_center_position(&self, i: usize, j: usize) -> DVec2 {
        self.origin
            + DVec2::new(
                (i as f64 + 0.5) * self.spacing.x,
                (j as f64 + 0.5) * self.spacing.y,
            )
    }

    /// World-space bounding box of the whole grid.
    pub fn bounding_box(&self) -> (DVec2, DVec2) {
        (
            self.origin,
            self.origin
                + DVec2::new(
                    self.width as f64 * self.spacing.x,
                    self.height as f64 * self.spacing.y,
                ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_follow_resize() {
        let mut data = GridSystemData::new(4, 4, DVec2::splat(1.0), DVec2::ZERO);
        let density = data.add_advectable_scalar_data(0.0);
        let extra = data.add_advectable_vector_data();
        assert_eq!(density, 0);
        assert_eq!(extra, 0);

        data.resize(8, 6, DVec2::splat(0.5), DVec2::new(1.0, 1.0));
        assert_eq!(data.advectable_scalar_data(density).width, 8);
        assert_eq!(data.advectable_scalar_data(density).height, 6);
        assert_eq!(data.advectable_vector_data(extra).u.len(), 9 * 6);
        assert_eq!(data.velocity().origin, DVec2::new(1.0, 1.0));
    }

    #[test]
    fn registered_layer_starts_at_initial_value() {
        let mut data = GridSystemData::new(3, 3, DVec2::splat(1.0), DVec2::ZERO);
        let idx = data.add_advectable_scalar_data(273.0);
        assert!(data
            .advectable_scalar_data(idx)
            .data
            .iter()
            .all(|&t| t == 273.0));
    }
}
