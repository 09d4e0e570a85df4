//! Tensor math for dielectric and piezoelectric properties.
//!
//! # Responsibility
//! - Decide centrosymmetry from a structure's symmetry operations.
//! - Reduce a dielectric tensor to its scalar invariant.
//! - Combine and symmetrize electronic + ionic piezoelectric tensors.
//!
//! # Invariants
//! - All functions are pure; no I/O, no shared state.
//! - Invalid numeric input is reported, never masked as `NaN`/`inf`.

pub mod piezo;
pub mod symmetry;

use crate::model::material::Structure;
use crate::model::task::{Tensor3x3, VoigtPiezo};
use piezo::PiezoTensor;
use std::error::Error;
use std::fmt::{Display, Formatter};
use symmetry::{
    has_inversion, point_group_rotations, SymmOp, SymmetryAnalyzer, SymmetryError,
};

/// Numeric failure while reducing tensor data.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorError {
    /// Sum of pairwise diagonal products is zero (or the ratio is not finite).
    ZeroDenominator { diagonal: [f64; 3] },
}

impl Display for TensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroDenominator { diagonal } => write!(
                f,
                "invariant scalar undefined for diagonal {diagonal:?}: pairwise product sum is zero"
            ),
        }
    }
}

impl Error for TensorError {}

/// Combined piezoelectric response for one structure.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedPiezo {
    pub voigt: VoigtPiezo,
    /// Largest absolute Voigt coefficient.
    pub max_coefficient: f64,
}

/// Whether the structure's symmetry operations include point inversion.
///
/// Any operation whose rotation part is `-I` counts, regardless of its
/// translation, so the answer does not depend on the cell origin.
pub fn is_centrosymmetric(
    structure: &Structure,
    analyzer: &dyn SymmetryAnalyzer,
) -> Result<bool, SymmetryError> {
    let ops = analyzer.symmetry_operations(structure)?;
    Ok(has_inversion(&ops))
}

/// Scalar invariant of a dielectric tensor:
/// `e1*e2*e3 / (e1*e2 + e1*e3 + e2*e3)` over the diagonal.
///
/// Symmetric in the diagonal entries; off-diagonal entries are ignored.
pub fn invariant_scalar(matrix: &Tensor3x3) -> Result<f64, TensorError> {
    let diagonal = [matrix[0][0], matrix[1][1], matrix[2][2]];
    let product = diagonal.iter().product::<f64>();
    let [e1, e2, e3] = diagonal;
    let pair_sum = e1 * e2 + e1 * e3 + e2 * e3;
    if pair_sum == 0.0 {
        return Err(TensorError::ZeroDenominator { diagonal });
    }
    let value = product / pair_sum;
    if !value.is_finite() {
        return Err(TensorError::ZeroDenominator { diagonal });
    }
    Ok(value)
}

/// Element-wise sum of two 3x3 tensors.
pub fn add_tensors(lhs: &Tensor3x3, rhs: &Tensor3x3) -> Tensor3x3 {
    let mut out = *lhs;
    for (row, rhs_row) in out.iter_mut().zip(rhs.iter()) {
        for (value, addend) in row.iter_mut().zip(rhs_row.iter()) {
            *value += addend;
        }
    }
    out
}

/// Sums electronic and ionic piezoelectric tensors and projects the sum onto
/// the point group behind `ops`, the space-group operations of `structure`.
pub fn combine_piezo(
    electronic: &VoigtPiezo,
    ionic: &VoigtPiezo,
    structure: &Structure,
    ops: &[SymmOp],
) -> Result<CombinedPiezo, SymmetryError> {
    let rotations = point_group_rotations(ops, structure)?;
    let total = PiezoTensor::from_voigt(electronic) + PiezoTensor::from_voigt(ionic);
    let symmetrized = total.symmetrized(&rotations);
    Ok(CombinedPiezo {
        voigt: symmetrized.to_voigt(),
        max_coefficient: symmetrized.max_abs(),
    })
}

#[cfg(test)]
mod tests {
    use super::{add_tensors, invariant_scalar, TensorError};

    #[test]
    fn invariant_of_isotropic_tensor_is_a_third_of_the_entry() {
        let value = invariant_scalar(&[[3.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 3.0]]).unwrap();
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_pair_sum_is_an_error() {
        let err = invariant_scalar(&[[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 5.0]])
            .unwrap_err();
        assert_eq!(
            err,
            TensorError::ZeroDenominator {
                diagonal: [0.0, 0.0, 5.0]
            }
        );
    }

    #[test]
    fn add_tensors_is_elementwise() {
        let sum = add_tensors(
            &[[2.0, 0.1, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]],
            &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.2], [0.0, 0.0, 1.0]],
        );
        assert_eq!(sum, [[3.0, 0.1, 0.0], [0.0, 3.0, 0.2], [0.0, 0.0, 3.0]]);
    }
}
