//! Physical-space geometry shared by every voxel grid.
//!
//! Index axes follow the ITK convention: `i` runs along image columns, `j`
//! along image rows and `k` across slices. Physical space is DICOM patient
//! space (LPS).

use nalgebra::{Matrix3, Vector3};
use std::ops::Deref;
use thiserror::Error;

/// Tolerance used when checking that a direction matrix is orthonormal.
pub const ORTHONORMAL_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("Direction matrix is not orthonormal: {0:?}")]
    NonOrthonormalDirection([[f64; 3]; 3]),

    #[error("Invalid spacing {0:?}, every component must be finite and positive")]
    InvalidSpacing([f64; 3]),

    #[error("Invalid dimensions {0:?}, every axis needs at least one voxel")]
    EmptyDimensions([usize; 3]),
}

/// Dimensions, spacing, origin and direction cosines of a 3D grid.
///
/// `dimensions` and `spacing` are ordered `(x, y, z)` = `(i, j, k)`. The
/// columns of `direction` are the physical unit vectors of the index axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    dimensions: [usize; 3],
    spacing: Vector3<f64>,
    origin: Vector3<f64>,
    direction: Matrix3<f64>,
}

impl Geometry {
    pub fn new(
        dimensions: [usize; 3],
        spacing: Vector3<f64>,
        origin: Vector3<f64>,
        direction: Matrix3<f64>,
    ) -> Result<Self, GeometryError> {
        if dimensions.contains(&0) {
            return Err(GeometryError::EmptyDimensions(dimensions));
        }
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(GeometryError::InvalidSpacing(spacing.into()));
        }
        if !is_orthonormal(&direction) {
            return Err(GeometryError::NonOrthonormalDirection(matrix_rows(
                &direction,
            )));
        }
        Ok(Self {
            dimensions,
            spacing,
            origin,
            direction,
        })
    }

    /// Geometry with unit spacing, zero origin and identity direction.
    pub fn identity(dimensions: [usize; 3]) -> Result<Self, GeometryError> {
        Self::new(
            dimensions,
            Vector3::repeat(1.0),
            Vector3::zeros(),
            Matrix3::identity(),
        )
    }

    pub fn dimensions(&self) -> [usize; 3] {
        self.dimensions
    }

    pub fn spacing(&self) -> &Vector3<f64> {
        &self.spacing
    }

    pub fn origin(&self) -> &Vector3<f64> {
        &self.origin
    }

    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    /// Shape of an array stored in slice-row-column order: `(nz, ny, nx)`.
    pub fn array_shape(&self) -> (usize, usize, usize) {
        let [nx, ny, nz] = self.dimensions;
        (nz, ny, nx)
    }

    /// Direction scaled by spacing, mapping index steps to millimetres.
    pub fn index_to_physical_matrix(&self) -> Matrix3<f64> {
        self.direction * Matrix3::from_diagonal(&self.spacing)
    }

    /// Physical coordinate of a (possibly fractional) index `(i, j, k)`.
    pub fn index_to_physical(&self, index: &Vector3<f64>) -> Vector3<f64> {
        self.origin + self.index_to_physical_matrix() * index
    }

    /// Whether an integer index lies inside the grid.
    pub fn contains_index(&self, index: [i64; 3]) -> bool {
        index
            .iter()
            .zip(self.dimensions.iter())
            .all(|(&idx, &dim)| idx >= 0 && (idx as u64) < dim as u64)
    }
}

/// Geometry of the reference DICOM series, the target of every resampling.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGeometry(Geometry);

impl ReferenceGeometry {
    pub fn new(geometry: Geometry) -> Self {
        Self(geometry)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.0
    }
}

impl Deref for ReferenceGeometry {
    type Target = Geometry;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub fn is_orthonormal(direction: &Matrix3<f64>) -> bool {
    let columns: Vec<Vector3<f64>> = direction.column_iter().map(|c| c.into_owned()).collect();
    let unit = columns
        .iter()
        .all(|c| (c.norm() - 1.0).abs() <= ORTHONORMAL_TOLERANCE);
    let orthogonal = (0..3).all(|a| {
        ((a + 1)..3).all(|b| columns[a].dot(&columns[b]).abs() <= ORTHONORMAL_TOLERANCE)
    });
    unit && orthogonal
}

/// Row-major copy of a matrix, used for diagnostics.
pub fn matrix_rows(matrix: &Matrix3<f64>) -> [[f64; 3]; 3] {
    let mut rows = [[0.0; 3]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = matrix[(r, c)];
        }
    }
    rows
}
