//! Material and crystal-structure documents.
//!
//! # Responsibility
//! - Define the source-side material document read by the dielectric builder.
//! - Provide the lattice/site geometry used by the symmetry finder.
//!
//! # Invariants
//! - `material_id` is the unique key shared with the derived collection.
//! - `lattice` rows are the three lattice vectors in Angstrom.
//! - `frac_coords` are fractional coordinates in the lattice basis.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Stable identifier for a material (e.g. `mp-149`).
pub type MaterialId = String;

/// One atomic site in a periodic structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Element or species label. Sites only map onto sites with equal labels.
    pub species: String,
    pub frac_coords: [f64; 3],
}

/// Periodic crystal structure: lattice plus decorated sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// Lattice vectors as rows (`lattice[0]` is `a`).
    pub lattice: [[f64; 3]; 3],
    pub sites: Vec<Site>,
}

impl Structure {
    /// Creates a structure from row-wise lattice vectors and `(species, frac)` pairs.
    pub fn new(lattice: [[f64; 3]; 3], sites: Vec<(&str, [f64; 3])>) -> Self {
        Self {
            lattice,
            sites: sites
                .into_iter()
                .map(|(species, frac_coords)| Site {
                    species: species.to_string(),
                    frac_coords,
                })
                .collect(),
        }
    }

    /// Returns the lattice as a matrix whose columns are the lattice vectors.
    ///
    /// With this layout `cartesian = basis * fractional`.
    pub fn basis(&self) -> Matrix3<f64> {
        let [a, b, c] = self.lattice;
        Matrix3::from_columns(&[
            Vector3::new(a[0], a[1], a[2]),
            Vector3::new(b[0], b[1], b[2]),
            Vector3::new(c[0], c[1], c[2]),
        ])
    }

    /// Signed cell volume in cubic Angstrom.
    pub fn volume(&self) -> f64 {
        self.basis().determinant()
    }
}

/// Full source-side material document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub material_id: MaterialId,
    /// Band gap in eV.
    pub band_gap: f64,
    pub structure: Structure,
    pub task_ids: Vec<String>,
    /// Unix epoch milliseconds of the last source-side change.
    pub last_updated: i64,
}

impl Material {
    /// Returns the projection consumed by the dielectric builder.
    pub fn summary(&self) -> MaterialSummary {
        MaterialSummary {
            material_id: self.material_id.clone(),
            structure: self.structure.clone(),
            task_ids: self.task_ids.clone(),
            last_updated: self.last_updated,
        }
    }
}

/// Projection of a material carried through one build: id, structure, task ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSummary {
    pub material_id: MaterialId,
    pub structure: Structure,
    pub task_ids: Vec<String>,
    /// Source timestamp; the derived record is never stamped earlier.
    pub last_updated: i64,
}
