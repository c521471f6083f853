use crate::geometry::Geometry;

use ndarray::Array3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Array shape {array:?} does not match geometry dimensions {dimensions:?}")]
    ShapeMismatch {
        array: (usize, usize, usize),
        dimensions: [usize; 3],
    },
}

/// A scalar volume together with the geometry placing it in patient space.
///
/// Data is stored in slice-row-column order, shape `(nz, ny, nx)`.
#[derive(Debug, Clone)]
pub struct VoxelGrid<T> {
    data: Array3<T>,
    geometry: Geometry,
}

impl<T> VoxelGrid<T> {
    pub fn new(data: Array3<T>, geometry: Geometry) -> Result<Self, VolumeError> {
        if data.dim() != geometry.array_shape() {
            return Err(VolumeError::ShapeMismatch {
                array: data.dim(),
                dimensions: geometry.dimensions(),
            });
        }
        Ok(Self { data, geometry })
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

impl VoxelGrid<f32> {
    /// Number of voxels strictly above `threshold`.
    pub fn count_above(&self, threshold: f32) -> usize {
        self.data.iter().filter(|&&v| v > threshold).count()
    }

    /// Sorted distinct values, for label-set checks.
    pub fn distinct_values(&self) -> Vec<f32> {
        let mut values: Vec<f32> = self.data.iter().copied().collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        values
    }
}
