//! Rank-3 piezoelectric tensors and point-group symmetrization.
//!
//! # Responsibility
//! - Convert between Voigt form (3x6) and full rank-3 form (3x3x3).
//! - Project a tensor onto the subspace allowed by a point group.
//!
//! # Invariants
//! - Full tensors are symmetric in their last two indices.
//! - Voigt conversion uses unit scaling for every component.
//! - Symmetrization is the group average and therefore idempotent.

use crate::model::task::VoigtPiezo;
use nalgebra::Matrix3;
use std::ops::Add;

/// Voigt index -> (j, k) pair of the symmetric strain index.
const VOIGT_PAIRS: [(usize, usize); 6] = [(0, 0), (1, 1), (2, 2), (1, 2), (0, 2), (0, 1)];

/// Full-form piezoelectric tensor `d[i][j][k]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiezoTensor(pub [[[f64; 3]; 3]; 3]);

impl PiezoTensor {
    pub fn zeros() -> Self {
        Self([[[0.0; 3]; 3]; 3])
    }

    /// Expands a 3x6 Voigt array, filling both `(j, k)` and `(k, j)`.
    pub fn from_voigt(voigt: &VoigtPiezo) -> Self {
        let mut full = [[[0.0; 3]; 3]; 3];
        for (i, row) in voigt.iter().enumerate() {
            for (v, &(j, k)) in VOIGT_PAIRS.iter().enumerate() {
                full[i][j][k] = row[v];
                full[i][k][j] = row[v];
            }
        }
        Self(full)
    }

    /// Compresses to Voigt form, averaging `(j, k)` and `(k, j)`.
    pub fn to_voigt(&self) -> VoigtPiezo {
        let mut voigt = [[0.0; 6]; 3];
        for (i, row) in voigt.iter_mut().enumerate() {
            for (v, &(j, k)) in VOIGT_PAIRS.iter().enumerate() {
                row[v] = 0.5 * (self.0[i][j][k] + self.0[i][k][j]);
            }
        }
        voigt
    }

    /// Applies a Cartesian rotation: `d'_ijk = R_ia R_jb R_kc d_abc`.
    pub fn transform(&self, rotation: &Matrix3<f64>) -> Self {
        let mut out = [[[0.0; 3]; 3]; 3];
        for (i, plane) in out.iter_mut().enumerate() {
            for (j, row) in plane.iter_mut().enumerate() {
                for (k, value) in row.iter_mut().enumerate() {
                    let mut sum = 0.0;
                    for a in 0..3 {
                        for b in 0..3 {
                            for c in 0..3 {
                                sum += rotation[(i, a)]
                                    * rotation[(j, b)]
                                    * rotation[(k, c)]
                                    * self.0[a][b][c];
                            }
                        }
                    }
                    *value = sum;
                }
            }
        }
        Self(out)
    }

    fn scaled(&self, factor: f64) -> Self {
        let mut out = self.0;
        out.iter_mut()
            .flatten()
            .flatten()
            .for_each(|value| *value *= factor);
        Self(out)
    }

    /// Averages the tensor over `rotations`, removing forbidden components.
    ///
    /// `rotations` must form a group (closed under composition) for the
    /// result to be idempotent. An empty slice returns the tensor unchanged.
    pub fn symmetrized(&self, rotations: &[Matrix3<f64>]) -> Self {
        if rotations.is_empty() {
            return *self;
        }
        let sum = rotations
            .iter()
            .fold(Self::zeros(), |acc, rotation| acc + self.transform(rotation));
        sum.scaled(1.0 / rotations.len() as f64)
    }

    /// Largest absolute component.
    pub fn max_abs(&self) -> f64 {
        self.0
            .iter()
            .flatten()
            .flatten()
            .fold(0.0_f64, |acc, value| acc.max(value.abs()))
    }
}

impl Add for PiezoTensor {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let mut out = self.0;
        let addends = rhs.0.iter().flatten().flatten();
        for (slot, addend) in out.iter_mut().flatten().flatten().zip(addends) {
            *slot += addend;
        }
        Self(out)
    }
}

#[cfg(test)]
mod tests {
    use super::PiezoTensor;
    use nalgebra::Matrix3;

    fn sample_voigt() -> [[f64; 6]; 3] {
        [
            [0.1, -0.2, 0.3, 0.4, 0.5, -0.6],
            [0.7, 0.8, -0.9, 1.0, 1.1, 1.2],
            [-1.3, 1.4, 1.5, 1.6, -1.7, 1.8],
        ]
    }

    #[test]
    fn voigt_expansion_round_trips() {
        let voigt = sample_voigt();
        let full = PiezoTensor::from_voigt(&voigt);
        assert_eq!(full.0[2][1][2], 1.6);
        assert_eq!(full.0[2][2][1], 1.6);
        assert_eq!(full.to_voigt(), voigt);
    }

    #[test]
    fn identity_group_leaves_tensor_unchanged() {
        let tensor = PiezoTensor::from_voigt(&sample_voigt());
        assert_eq!(tensor.symmetrized(&[Matrix3::identity()]), tensor);
    }

    #[test]
    fn inversion_group_projects_to_zero() {
        let tensor = PiezoTensor::from_voigt(&sample_voigt());
        let group = [Matrix3::identity(), -Matrix3::identity()];
        assert!(tensor.symmetrized(&group).max_abs() < 1e-12);
    }

    #[test]
    fn max_abs_uses_magnitude() {
        let tensor = PiezoTensor::from_voigt(&sample_voigt());
        assert!((tensor.max_abs() - 1.8).abs() < 1e-12);
    }
}
