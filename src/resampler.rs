use crate::{
    geometry::{Geometry, ReferenceGeometry, matrix_rows},
    volume::{VolumeError, VoxelGrid},
};

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, Zip};
use thiserror::Error;
use tracing::debug;

/// Value given to output voxels that map outside the source volume.
pub const BACKGROUND: f32 = 0.0;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("Source grid is singular, index matrix {0:?} has no inverse")]
    SingularGeometry([[f64; 3]; 3]),

    #[error(transparent)]
    Volume(#[from] VolumeError),
}

/// Nearest-neighbour resampling onto a reference grid.
pub struct Resampler;

impl Resampler {
    /// Resample `mask` onto the exact grid of `reference`.
    ///
    /// Each output voxel takes the value of the source voxel nearest to its
    /// physical centre, so label values are never blended.
    pub fn resample(
        mask: &VoxelGrid<f32>,
        reference: &ReferenceGeometry,
    ) -> Result<VoxelGrid<f32>, ResampleError> {
        let source = mask.geometry();
        let (linear, offset) = Self::index_map(source, reference.geometry())?;
        let source_data = mask.data();

        let mut output = Array3::<f32>::from_elem(reference.array_shape(), BACKGROUND);
        Zip::indexed(&mut output).par_for_each(|(k, j, i), value| {
            let continuous = linear * Vector3::new(i as f64, j as f64, k as f64) + offset;
            let nearest = [
                continuous[0].round() as i64,
                continuous[1].round() as i64,
                continuous[2].round() as i64,
            ];
            if source.contains_index(nearest) {
                let [si, sj, sk] = nearest.map(|c| c as usize);
                *value = source_data[[sk, sj, si]];
            }
        });

        debug!(
            "resampled {:?} -> {:?}",
            source.dimensions(),
            reference.dimensions()
        );
        Ok(VoxelGrid::new(output, reference.geometry().clone())?)
    }

    /// Affine taking a target index straight to a continuous source index.
    ///
    /// `source_index = A * target_index + b` with
    /// `A = M_src^-1 * M_ref` and `b = M_src^-1 * (o_ref - o_src)`.
    pub fn index_map(
        source: &Geometry,
        target: &Geometry,
    ) -> Result<(Matrix3<f64>, Vector3<f64>), ResampleError> {
        let source_matrix = source.index_to_physical_matrix();
        let inverse = source_matrix
            .try_inverse()
            .ok_or_else(|| ResampleError::SingularGeometry(matrix_rows(&source_matrix)))?;
        let linear = inverse * target.index_to_physical_matrix();
        let offset = inverse * (target.origin() - source.origin());
        Ok((linear, offset))
    }
}
