//! Geometry gate between resampling and axis reconciliation.
//!
//! A resampled grid has to match the reference geometry before any contour
//! is derived from it. Mismatches abort the case; nothing is corrected here.

use crate::{geometry::ReferenceGeometry, volume::VoxelGrid};

use thiserror::Error;

pub const DEFAULT_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("DimensionMismatch: reference {reference:?}, resampled {resampled:?}")]
    DimensionMismatch {
        reference: [usize; 3],
        resampled: [usize; 3],
    },

    #[error(
        "OriginMismatch on axis {axis}: reference {reference:?}, resampled {resampled:?} (tolerance {tolerance})"
    )]
    OriginMismatch {
        axis: usize,
        reference: [f64; 3],
        resampled: [f64; 3],
        tolerance: f64,
    },

    #[error(
        "SpacingMismatch on axis {axis}: reference {reference:?}, resampled {resampled:?} (tolerance {tolerance})"
    )]
    SpacingMismatch {
        axis: usize,
        reference: [f64; 3],
        resampled: [f64; 3],
        tolerance: f64,
    },

    #[error(
        "DirectionMismatch at [{row}][{column}]: reference {reference}, resampled {resampled} (tolerance {tolerance})"
    )]
    DirectionMismatch {
        row: usize,
        column: usize,
        reference: f64,
        resampled: f64,
        tolerance: f64,
    },
}

/// A resampled grid whose geometry passed [`validate`].
///
/// Only [`gate`] creates one, so holding a `ValidatedGrid` proves the check ran.
#[derive(Debug, Clone)]
pub struct ValidatedGrid {
    grid: VoxelGrid<f32>,
}

impl ValidatedGrid {
    pub fn grid(&self) -> &VoxelGrid<f32> {
        &self.grid
    }
}

/// Compare `resampled` against `reference`, failing on the first violation.
///
/// Dimensions must match exactly; origin, spacing and direction entries
/// elementwise within `tolerance`.
pub fn validate(
    reference: &ReferenceGeometry,
    resampled: &VoxelGrid<f32>,
    tolerance: f64,
) -> Result<(), AlignmentError> {
    let actual = resampled.geometry();

    if reference.dimensions() != actual.dimensions() {
        return Err(AlignmentError::DimensionMismatch {
            reference: reference.dimensions(),
            resampled: actual.dimensions(),
        });
    }

    if let Some(axis) =
        first_violation(reference.origin().iter(), actual.origin().iter(), tolerance)
    {
        return Err(AlignmentError::OriginMismatch {
            axis,
            reference: (*reference.origin()).into(),
            resampled: (*actual.origin()).into(),
            tolerance,
        });
    }

    if let Some(axis) =
        first_violation(reference.spacing().iter(), actual.spacing().iter(), tolerance)
    {
        return Err(AlignmentError::SpacingMismatch {
            axis,
            reference: (*reference.spacing()).into(),
            resampled: (*actual.spacing()).into(),
            tolerance,
        });
    }

    for row in 0..3 {
        for column in 0..3 {
            let expected = reference.direction()[(row, column)];
            let found = actual.direction()[(row, column)];
            if !within(expected, found, tolerance) {
                return Err(AlignmentError::DirectionMismatch {
                    row,
                    column,
                    reference: expected,
                    resampled: found,
                    tolerance,
                });
            }
        }
    }

    Ok(())
}

/// Run [`validate`] and wrap the grid on success.
pub fn gate(
    reference: &ReferenceGeometry,
    resampled: VoxelGrid<f32>,
    tolerance: f64,
) -> Result<ValidatedGrid, AlignmentError> {
    validate(reference, &resampled, tolerance)?;
    Ok(ValidatedGrid { grid: resampled })
}

fn within(a: f64, b: f64, tolerance: f64) -> bool {
    // NaN never passes.
    (a - b).abs() <= tolerance
}

fn first_violation<'a>(
    expected: impl Iterator<Item = &'a f64>,
    found: impl Iterator<Item = &'a f64>,
    tolerance: f64,
) -> Option<usize> {
    expected
        .zip(found)
        .position(|(a, b)| !within(*a, *b, tolerance))
}
