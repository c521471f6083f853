//! NIfTI label volumes, brought into the DICOM patient frame.

use crate::{
    geometry::{Geometry, GeometryError},
    volume::{VolumeError, VoxelGrid},
};

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use ndarray::{Array3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MaskLoaderError {
    #[error("Mask file {0} does not exist")]
    NotFound(PathBuf),

    #[error("Failed to read NIfTI file: {0}")]
    Nifti(#[from] nifti::error::NiftiError),

    #[error("Expected a 3D volume, got shape {0:?}")]
    NotThreeDimensional(Vec<usize>),

    #[error("Mask has no voxel above threshold {0}")]
    Empty(f32),

    #[error("Invalid mask geometry: {0}")]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Volume(#[from] VolumeError),
}

pub struct MaskLoader;

impl MaskLoader {
    /// Load a label volume and reject it when no voxel exceeds `threshold`.
    ///
    /// Both `.nii` and `.nii.gz` are accepted. A 4D file is accepted when it
    /// holds a single volume.
    pub fn load(path: impl AsRef<Path>, threshold: f32) -> Result<VoxelGrid<f32>, MaskLoaderError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(MaskLoaderError::NotFound(path.to_path_buf()));
        }

        let object = ReaderOptions::new().read_file(path)?;
        let geometry_header = object.header().clone();
        let array = object.into_volume().into_ndarray::<f32>()?;

        let shape = array.shape().to_vec();
        let array = match array.ndim() {
            3 => array,
            4 if shape[3] == 1 => array.index_axis_move(Axis(3), 0),
            _ => return Err(MaskLoaderError::NotThreeDimensional(shape)),
        };
        let array = array
            .into_dimensionality::<Ix3>()
            .map_err(|_| MaskLoaderError::NotThreeDimensional(shape.clone()))?;

        let (nx, ny, nz) = array.dim();
        let geometry = Self::geometry_from_header(&geometry_header, [nx, ny, nz])?;

        // NIfTI arrays are indexed [i, j, k]; grids are stored [k, j, i].
        let data: Array3<f32> = array.permuted_axes([2, 1, 0]);
        let grid = VoxelGrid::new(data, geometry)?;

        let foreground = grid.count_above(threshold);
        if foreground == 0 {
            return Err(MaskLoaderError::Empty(threshold));
        }
        info!(
            "loaded mask {} dim {:?}, {} foreground voxels",
            path.display(),
            grid.dim(),
            foreground
        );
        Ok(grid)
    }

    /// Geometry in DICOM LPS coordinates from the header's affine.
    pub fn geometry_from_header(
        header: &NiftiHeader,
        dimensions: [usize; 3],
    ) -> Result<Geometry, MaskLoaderError> {
        let (linear, offset) = Self::affine_ras(header);

        // RAS to LPS: negate the x and y rows.
        let flip = Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0));
        let linear = flip * linear;
        let offset = flip * offset;

        let spacing = Vector3::new(
            linear.column(0).norm(),
            linear.column(1).norm(),
            linear.column(2).norm(),
        );
        if spacing.iter().any(|s| *s == 0.0) {
            return Err(GeometryError::InvalidSpacing(spacing.into()).into());
        }
        let direction = Matrix3::from_columns(&[
            linear.column(0) / spacing[0],
            linear.column(1) / spacing[1],
            linear.column(2) / spacing[2],
        ]);

        Ok(Geometry::new(dimensions, spacing, offset, direction)?)
    }

    /// Linear part and translation of the voxel to RAS mapping.
    fn affine_ras(header: &NiftiHeader) -> (Matrix3<f64>, Vector3<f64>) {
        let pixdim = |i: usize| header.pixdim[i] as f64;

        if header.sform_code > 0 {
            debug!("using sform (code {})", header.sform_code);
            let rows = [header.srow_x, header.srow_y, header.srow_z];
            let linear = Matrix3::from_fn(|r, c| rows[r][c] as f64);
            let offset = Vector3::new(rows[0][3] as f64, rows[1][3] as f64, rows[2][3] as f64);
            return (linear, offset);
        }

        if header.qform_code > 0 {
            debug!("using qform (code {})", header.qform_code);
            let (b, c, d) = (
                header.quatern_b as f64,
                header.quatern_c as f64,
                header.quatern_d as f64,
            );
            let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
            let rotation = UnitQuaternion::from_quaternion(Quaternion::new(a, b, c, d))
                .to_rotation_matrix()
                .into_inner();
            let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let scale =
                Matrix3::from_diagonal(&Vector3::new(pixdim(1), pixdim(2), qfac * pixdim(3)));
            let offset = Vector3::new(
                header.quatern_x as f64,
                header.quatern_y as f64,
                header.quatern_z as f64,
            );
            return (rotation * scale, offset);
        }

        debug!("no sform or qform, falling back to pixdim scaling");
        (
            Matrix3::from_diagonal(&Vector3::new(pixdim(1), pixdim(2), pixdim(3))),
            Vector3::zeros(),
        )
    }
}
