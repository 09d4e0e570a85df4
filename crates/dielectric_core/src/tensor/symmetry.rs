//! Space-group operation finder for periodic structures.
//!
//! # Responsibility
//! - Enumerate symmetry operations `x' = W x + t` (fractional coordinates)
//!   that map a structure onto itself.
//! - Derive Cartesian point-group rotations for tensor symmetrization.
//!
//! # Invariants
//! - The search runs in a reduced cell, where every lattice rotation has
//!   entries in {-1, 0, 1}; operations are reported in the input basis.
//! - Site matching is species-aware and periodic, within `symprec` Angstrom.

use crate::model::material::Structure;
use nalgebra::{Matrix3, Vector3};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Default distance tolerance in Angstrom.
pub const DEFAULT_SYMPREC: f64 = 0.01;

const MIN_CELL_VOLUME: f64 = 1e-6;
const ROTATION_TOL: f64 = 1e-6;
const CANDIDATE_ROTATIONS: u32 = 19_683; // 3^9
const MAX_REDUCTION_STEPS: usize = 1_000;
const REDUCTION_TOL: f64 = 1e-9;

/// Failure to enumerate symmetry operations for a structure.
#[derive(Debug, Clone, PartialEq)]
pub enum SymmetryError {
    /// Lattice vectors are (nearly) linearly dependent.
    DegenerateLattice { volume: f64 },
    /// Structure has no sites to match.
    EmptyStructure,
    /// No operation (not even identity) matched within tolerance.
    NoOperations,
}

impl Display for SymmetryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DegenerateLattice { volume } => {
                write!(f, "degenerate lattice with cell volume {volume:e}")
            }
            Self::EmptyStructure => write!(f, "structure has no sites"),
            Self::NoOperations => write!(f, "no symmetry operation found within tolerance"),
        }
    }
}

impl Error for SymmetryError {}

/// One space-group operation in fractional coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmOp {
    pub rotation: Matrix3<i32>,
    /// Translation wrapped into `[0, 1)`.
    pub translation: Vector3<f64>,
}

impl SymmOp {
    /// Whether the rotation part is point inversion (`-I`).
    pub fn is_inversion(&self) -> bool {
        self.rotation == -Matrix3::<i32>::identity()
    }

    /// Rotation expressed in Cartesian coordinates for the given basis.
    pub fn cartesian_rotation(
        &self,
        basis: &Matrix3<f64>,
        basis_inv: &Matrix3<f64>,
    ) -> Matrix3<f64> {
        basis * self.rotation.map(f64::from) * basis_inv
    }
}

/// Source of symmetry operations for a structure.
pub trait SymmetryAnalyzer {
    fn symmetry_operations(&self, structure: &Structure) -> Result<Vec<SymmOp>, SymmetryError>;
}

/// Brute-force finder over metric-preserving integer rotations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeSymmetryAnalyzer {
    /// Site-matching tolerance in Angstrom.
    pub symprec: f64,
}

impl Default for LatticeSymmetryAnalyzer {
    fn default() -> Self {
        Self {
            symprec: DEFAULT_SYMPREC,
        }
    }
}

impl LatticeSymmetryAnalyzer {
    pub fn new(symprec: f64) -> Self {
        Self { symprec }
    }

    /// Integer rotations `W` with `W^T G W = G` for metric `G = A^T A`.
    ///
    /// Complete only when `basis` is reduced.
    fn lattice_rotations(&self, basis: &Matrix3<f64>) -> Vec<Matrix3<i32>> {
        let metric = basis.transpose() * basis;
        let max_length = (0..3)
            .map(|axis| metric[(axis, axis)].sqrt())
            .fold(0.0_f64, f64::max);
        // |a|^2 moves by roughly 2|a|d when a vector moves by d.
        let metric_tol = 2.0 * max_length * self.symprec + self.symprec * self.symprec;

        let mut rotations = Vec::new();
        for code in 0..CANDIDATE_ROTATIONS {
            let candidate = decode_rotation(code);
            let det = integer_determinant(&candidate);
            if det != 1 && det != -1 {
                continue;
            }
            let w = candidate.map(f64::from);
            let transformed = w.transpose() * metric * w;
            if (transformed - metric).iter().all(|delta| delta.abs() <= metric_tol) {
                rotations.push(candidate);
            }
        }
        rotations
    }

    fn maps_onto_itself(
        &self,
        sites: &[(&str, Vector3<f64>)],
        basis: &Matrix3<f64>,
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
    ) -> bool {
        sites.iter().all(|(species, coords)| {
            let image = rotation * coords + translation;
            sites.iter().any(|(other_species, other)| {
                other_species == species
                    && periodic_distance(basis, &image, other) <= self.symprec
            })
        })
    }

    /// Operations in the reduced setting `cell`, fractional in its basis.
    fn reduced_operations(
        &self,
        cell: &ReducedCell,
        sites: &[(&str, Vector3<f64>)],
    ) -> Vec<SymmOp> {
        // Anchor on the rarest species: fewest candidate translations.
        let Some((anchor_species, anchor)) = sites.iter().min_by_key(|(species, _)| {
            sites
                .iter()
                .filter(|(other, _)| other == species)
                .count()
        }) else {
            return Vec::new();
        };

        let mut ops: Vec<SymmOp> = Vec::new();
        for rotation in self.lattice_rotations(&cell.basis) {
            let w = rotation.map(f64::from);
            let rotated_anchor = w * anchor;
            for (_, target) in sites.iter().filter(|(species, _)| species == anchor_species) {
                let translation = wrap_unit(target - rotated_anchor);
                let duplicate = ops.iter().any(|op| {
                    op.rotation == rotation
                        && periodic_distance(&cell.basis, &op.translation, &translation)
                            <= self.symprec
                });
                if duplicate {
                    continue;
                }
                if self.maps_onto_itself(sites, &cell.basis, &w, &translation) {
                    ops.push(SymmOp {
                        rotation,
                        translation,
                    });
                }
            }
        }
        ops
    }
}

impl SymmetryAnalyzer for LatticeSymmetryAnalyzer {
    fn symmetry_operations(&self, structure: &Structure) -> Result<Vec<SymmOp>, SymmetryError> {
        if structure.sites.is_empty() {
            return Err(SymmetryError::EmptyStructure);
        }
        let volume = structure.volume();
        if !volume.is_finite() || volume.abs() < MIN_CELL_VOLUME {
            return Err(SymmetryError::DegenerateLattice { volume });
        }
        let cell = ReducedCell::new(&structure.basis())
            .ok_or(SymmetryError::DegenerateLattice { volume })?;

        let sites: Vec<(&str, Vector3<f64>)> = structure
            .sites
            .iter()
            .map(|site| {
                (
                    site.species.as_str(),
                    wrap_unit(cell.inverse * frac(site.frac_coords)),
                )
            })
            .collect();

        let ops: Vec<SymmOp> = self
            .reduced_operations(&cell, &sites)
            .iter()
            .map(|op| cell.to_original(op))
            .collect();
        if ops.is_empty() {
            return Err(SymmetryError::NoOperations);
        }
        Ok(ops)
    }
}

/// Lattice rewritten in short, nearly orthogonal vectors.
///
/// `basis = original * transform`, with `transform` unimodular. Fractional
/// coordinates convert as `x_reduced = inverse * x_original`.
#[derive(Debug, Clone, PartialEq)]
struct ReducedCell {
    basis: Matrix3<f64>,
    transform: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl ReducedCell {
    /// Greedy 3D reduction: size-reduce every pair, then try to shorten the
    /// longest vector with `c +- a +- b`, until nothing shrinks.
    fn new(original: &Matrix3<f64>) -> Option<Self> {
        let mut vectors: [Vector3<f64>; 3] = [
            original.column(0).into_owned(),
            original.column(1).into_owned(),
            original.column(2).into_owned(),
        ];
        let mut coeffs: [Vector3<f64>; 3] = [Vector3::x(), Vector3::y(), Vector3::z()];

        for _ in 0..MAX_REDUCTION_STEPS {
            let mut order = [0_usize, 1, 2];
            order.sort_by(|&lhs, &rhs| {
                vectors[lhs]
                    .norm_squared()
                    .total_cmp(&vectors[rhs].norm_squared())
            });
            vectors = order.map(|index| vectors[index]);
            coeffs = order.map(|index| coeffs[index]);

            let mut changed = false;
            for i in 0..3 {
                for j in 0..3 {
                    if i == j {
                        continue;
                    }
                    let ratio = vectors[i].dot(&vectors[j]) / vectors[j].norm_squared();
                    if ratio.abs() <= 0.5 + REDUCTION_TOL {
                        continue;
                    }
                    let k = ratio.round();
                    let (step, coeff_step) = (vectors[j] * k, coeffs[j] * k);
                    vectors[i] -= step;
                    coeffs[i] -= coeff_step;
                    changed = true;
                }
            }

            for (sa, sb) in [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
                let candidate = vectors[2] + vectors[0] * sa + vectors[1] * sb;
                if candidate.norm_squared() < vectors[2].norm_squared() * (1.0 - REDUCTION_TOL) {
                    vectors[2] = candidate;
                    coeffs[2] = coeffs[2] + coeffs[0] * sa + coeffs[1] * sb;
                    changed = true;
                }
            }

            if !changed {
                let transform = Matrix3::from_columns(&coeffs);
                let inverse = transform.try_inverse()?.map(f64::round);
                return Some(Self {
                    basis: Matrix3::from_columns(&vectors),
                    transform,
                    inverse,
                });
            }
        }
        None
    }

    /// Rewrites an operation found in the reduced setting for the original
    /// basis: `W = P W' P^-1`, `t = P t'`.
    fn to_original(&self, op: &SymmOp) -> SymmOp {
        let rotation = self.transform * op.rotation.map(f64::from) * self.inverse;
        SymmOp {
            rotation: rotation.map(|value| value.round() as i32),
            translation: wrap_unit(self.transform * op.translation),
        }
    }
}

/// Whether any operation has inversion as its rotation part.
pub fn has_inversion(ops: &[SymmOp]) -> bool {
    ops.iter().any(SymmOp::is_inversion)
}

/// Unique Cartesian rotations of the point group behind `ops`.
pub fn point_group_rotations(
    ops: &[SymmOp],
    structure: &Structure,
) -> Result<Vec<Matrix3<f64>>, SymmetryError> {
    let basis = structure.basis();
    let basis_inv = basis
        .try_inverse()
        .ok_or(SymmetryError::DegenerateLattice {
            volume: structure.volume(),
        })?;

    let mut rotations: Vec<Matrix3<f64>> = Vec::new();
    for op in ops {
        let cartesian = op.cartesian_rotation(&basis, &basis_inv);
        let seen = rotations
            .iter()
            .any(|known| (known - cartesian).iter().all(|delta| delta.abs() < ROTATION_TOL));
        if !seen {
            rotations.push(cartesian);
        }
    }
    Ok(rotations)
}

fn decode_rotation(mut code: u32) -> Matrix3<i32> {
    let mut entries = [0_i32; 9];
    for entry in &mut entries {
        *entry = (code % 3) as i32 - 1;
        code /= 3;
    }
    Matrix3::from_row_slice(&entries)
}

fn integer_determinant(m: &Matrix3<i32>) -> i32 {
    m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
        - m[(0, 1)] * (m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)])
        + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)])
}

fn frac(coords: [f64; 3]) -> Vector3<f64> {
    Vector3::new(coords[0], coords[1], coords[2])
}

fn wrap_unit(v: Vector3<f64>) -> Vector3<f64> {
    v.map(|x| {
        let wrapped = x - x.floor();
        // 0.9999999 and 0.0 are the same lattice point.
        if wrapped >= 1.0 - 1e-12 {
            0.0
        } else {
            wrapped
        }
    })
}

/// Cartesian distance between two fractional points, nearest periodic image.
fn periodic_distance(basis: &Matrix3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let delta = (a - b).map(|x| x - x.round());
    (basis * delta).norm()
}
