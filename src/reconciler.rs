use crate::{
    enums::{AxisFlips, FlipPolicy},
    geometry::{Geometry, matrix_rows},
    validator::ValidatedGrid,
};

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayView2, ArrayView3, Axis, s};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("UnsupportedOrientation: direction {direction:?} is not diagonally dominant")]
    UnsupportedOrientation { direction: [[f64; 3]; 3] },
}

/// Array axis of a row-column-slice mask holding spatial axis `x`, `y` or `z`.
const fn array_axis(spatial: usize) -> usize {
    match spatial {
        0 => 1,
        1 => 0,
        _ => 2,
    }
}

/// Boolean mask on the reference grid, stored row-column-slice.
///
/// `data[[row, column, slice]]`, shape `(ny, nx, nz)`. Along every spatial
/// axis recorded in `flips` the index order is reversed relative to the
/// reference grid, so that increasing index follows increasing physical
/// coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedMask {
    data: Array3<bool>,
    geometry: Geometry,
    flips: AxisFlips,
}

impl AlignedMask {
    pub fn data(&self) -> &Array3<bool> {
        &self.data
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn flips(&self) -> AxisFlips {
        self.flips
    }

    /// `(rows, columns, slices)`
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Plane `slice` as a `(rows, columns)` view.
    pub fn slice(&self, slice: usize) -> Option<ArrayView2<'_, bool>> {
        (slice < self.data.dim().2).then(|| self.data.slice(s![.., .., slice]))
    }

    /// Reference grid index `(i, j, k)` of an aligned index.
    pub fn source_index(&self, row: usize, column: usize, slice: usize) -> [usize; 3] {
        let [nx, ny, nz] = self.geometry.dimensions();
        let unflip = |axis: usize, index: usize, len: usize| {
            if self.flips.is_flipped(axis) {
                len - 1 - index
            } else {
                index
            }
        };
        [
            unflip(0, column, nx),
            unflip(1, row, ny),
            unflip(2, slice, nz),
        ]
    }

    /// Physical centre of an aligned voxel.
    pub fn physical_point(&self, row: usize, column: usize, slice: usize) -> Vector3<f64> {
        let [i, j, k] = self.source_index(row, column, slice);
        self.geometry
            .index_to_physical(&Vector3::new(i as f64, j as f64, k as f64))
    }
}

/// Converts validated slice-row-column grids into [`AlignedMask`]s.
#[derive(Debug, Clone, Copy)]
pub struct AxisReconciler {
    policy: FlipPolicy,
    threshold: f32,
}

impl Default for AxisReconciler {
    fn default() -> Self {
        Self::new(FlipPolicy::default(), DEFAULT_THRESHOLD)
    }
}

impl AxisReconciler {
    pub fn new(policy: FlipPolicy, threshold: f32) -> Self {
        Self { policy, threshold }
    }

    /// Spatial axes to reverse for a grid with `direction`.
    ///
    /// Sign inspection is only meaningful when every index axis maps mostly
    /// onto its own patient axis; anything else is rejected.
    pub fn required_flips(&self, direction: &Matrix3<f64>) -> Result<AxisFlips, ReconcileError> {
        if !is_diagonally_dominant(direction) {
            return Err(ReconcileError::UnsupportedOrientation {
                direction: matrix_rows(direction),
            });
        }
        match self.policy {
            FlipPolicy::DirectionCosines => Ok(AxisFlips([
                direction[(0, 0)] < 0.0,
                direction[(1, 1)] < 0.0,
                direction[(2, 2)] < 0.0,
            ])),
            FlipPolicy::Forced { axes } => {
                warn!("forced flip policy in use, flipping {axes} regardless of direction");
                Ok(axes)
            }
        }
    }

    /// Transpose to row-column-slice, apply flips and binarise.
    pub fn reconcile(&self, validated: &ValidatedGrid) -> Result<AlignedMask, ReconcileError> {
        let grid = validated.grid();
        let geometry = grid.geometry();
        let flips = self.required_flips(geometry.direction())?;

        // [k, j, i] -> [j, i, k]
        let view = grid.data().view().permuted_axes([1, 2, 0]);
        let view = Self::flip_view(view, flips);
        let threshold = self.threshold;
        let data = view.mapv(|v| v > threshold);

        debug!("reconciled mask to {:?}, flipped {}", data.dim(), flips);
        Ok(AlignedMask {
            data,
            geometry: geometry.clone(),
            flips,
        })
    }

    /// Bring an already aligned mask in line with this reconciler's policy.
    ///
    /// Only axes whose flip state differs from the requirement are reversed,
    /// so reconciling a mask twice is a no-op.
    pub fn reconcile_aligned(&self, mask: &AlignedMask) -> Result<AlignedMask, ReconcileError> {
        let flips = self.required_flips(mask.geometry.direction())?;
        let pending = flips.difference(&mask.flips);
        let data = Self::flip_view(mask.data.view(), pending).to_owned();
        Ok(AlignedMask {
            data,
            geometry: mask.geometry.clone(),
            flips,
        })
    }

    fn flip_view<T>(mut view: ArrayView3<'_, T>, flips: AxisFlips) -> ArrayView3<'_, T> {
        for spatial in 0..3 {
            if flips.is_flipped(spatial) {
                view.invert_axis(Axis(array_axis(spatial)));
            }
        }
        view
    }
}

/// Row-wise strict diagonal dominance on absolute values.
pub fn is_diagonally_dominant(direction: &Matrix3<f64>) -> bool {
    (0..3).all(|r| {
        let diagonal = direction[(r, r)].abs();
        let off: f64 = (0..3)
            .filter(|&c| c != r)
            .map(|c| direction[(r, c)].abs())
            .sum();
        diagonal > off
    })
}
