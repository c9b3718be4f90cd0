//! Core geometry and normal-mode data structures.
//!
//! This module provides the fundamental data types used throughout the
//! transition state checks:
//!
//! - [`Geometry`]: Molecular structure with element symbols and Cartesian coordinates
//! - [`NormalMode`]: A vibrational mode (per-atom displacement vectors) and its frequency
//!
//! All coordinates are in Angstroms. Atom ordering is significant: reactant,
//! product and every TS candidate of one reaction must list the same atoms in
//! the same order, since bonds are identified by atom-index pairs.

use nalgebra::{DMatrix, DVector};

/// Number of back-steps used when clamping a displacement along a mode.
const DISPLACEMENT_BACK_STEPS: usize = 20;

/// Represents a molecular geometry with atomic elements and Cartesian coordinates.
///
/// Coordinates are stored flat as `[x1, y1, z1, x2, y2, z2, ...]` in a
/// `DVector<f64>`, which keeps displacement arithmetic a single vector operation.
///
/// # Examples
///
/// ```
/// use opents::geometry::Geometry;
///
/// let geometry = Geometry::new(
///     vec!["O".to_string(), "H".to_string(), "H".to_string()],
///     vec![0.0, 0.0, 0.0, 0.757, 0.586, 0.0, -0.757, 0.586, 0.0],
/// );
/// assert_eq!(geometry.num_atoms, 3);
/// assert!((geometry.distance(1, 2) - 1.514).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Chemical element symbols for each atom in order
    pub elements: Vec<String>,
    /// Flattened Cartesian coordinates [x1, y1, z1, x2, y2, z2, ...] in Angstroms
    pub coords: DVector<f64>,
    /// Number of atoms in the molecule
    pub num_atoms: usize,
}

impl Geometry {
    /// Create a new `Geometry` from element list and coordinate vector.
    ///
    /// # Panics
    ///
    /// Panics if `coords.len() != elements.len() * 3`. Parsers in this crate
    /// check the lengths before constructing a geometry.
    pub fn new(elements: Vec<String>, coords: Vec<f64>) -> Self {
        let num_atoms = elements.len();
        assert_eq!(coords.len(), num_atoms * 3);
        Self {
            elements,
            coords: DVector::from_vec(coords),
            num_atoms,
        }
    }

    /// Get the Cartesian coordinates of a specific atom.
    pub fn get_atom_coords(&self, atom_idx: usize) -> [f64; 3] {
        let i = atom_idx * 3;
        [self.coords[i], self.coords[i + 1], self.coords[i + 2]]
    }

    /// Euclidean distance between atoms `i` and `j` in Angstroms.
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        let a = self.get_atom_coords(i);
        let b = self.get_atom_coords(j);
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
    }

    /// Symmetric N x N matrix of pairwise distances.
    ///
    /// The matrix is computed on every call; it belongs to this geometry only.
    pub fn distance_matrix(&self) -> DMatrix<f64> {
        let n = self.num_atoms;
        let mut matrix = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in (i + 1)..n {
                let d = self.distance(i, j);
                matrix[(i, j)] = d;
                matrix[(j, i)] = d;
            }
        }
        matrix
    }

    /// Returns true when `other` lists the same elements in the same order.
    pub fn same_atom_ordering(&self, other: &Geometry) -> bool {
        self.num_atoms == other.num_atoms
            && self
                .elements
                .iter()
                .zip(&other.elements)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Displaces the geometry along a normal mode.
    ///
    /// The new coordinates are `coords + disp_factor * mode`. If any single atom
    /// moved by `max_atom_disp` or more, the step is shrunk by
    /// `disp_factor / 20 * mode` repeatedly (at most 20 times) until every atom
    /// moved less than the ceiling.
    ///
    /// # Panics
    ///
    /// Panics if the mode does not cover exactly `num_atoms` atoms.
    ///
    /// # Examples
    ///
    /// ```
    /// use opents::geometry::{Geometry, NormalMode};
    ///
    /// let geom = Geometry::new(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0]);
    /// let mode = NormalMode::new(-500.0, vec![0.0, 0.0, 0.0, 0.5, 0.0, 0.0]);
    ///
    /// let stretched = geom.displaced_along_mode(&mode, 1.0, 99.9);
    /// assert!((stretched.distance(0, 1) - 1.24).abs() < 1e-9);
    ///
    /// // A 0.31 A ceiling shrinks the 0.5 A step back to 0.30 A
    /// let clamped = geom.displaced_along_mode(&mode, 1.0, 0.31);
    /// assert!((clamped.distance(0, 1) - 1.04).abs() < 1e-9);
    /// ```
    pub fn displaced_along_mode(
        &self,
        mode: &NormalMode,
        disp_factor: f64,
        max_atom_disp: f64,
    ) -> Geometry {
        assert_eq!(mode.displacements.len(), self.coords.len());

        let step = &mode.displacements * (disp_factor / DISPLACEMENT_BACK_STEPS as f64);
        let mut displaced = &self.coords + &mode.displacements * disp_factor;

        for _ in 0..DISPLACEMENT_BACK_STEPS {
            if max_atom_shift(&self.coords, &displaced) < max_atom_disp {
                break;
            }
            displaced -= &step;
        }

        Geometry {
            elements: self.elements.clone(),
            coords: displaced,
            num_atoms: self.num_atoms,
        }
    }
}

fn max_atom_shift(before: &DVector<f64>, after: &DVector<f64>) -> f64 {
    let diff = after - before;
    diff.as_slice()
        .chunks(3)
        .map(|d| (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt())
        .fold(0.0, f64::max)
}

/// A vibrational normal mode with its frequency.
///
/// The displacement vector uses the same flat layout as [`Geometry::coords`].
/// A negative frequency denotes an imaginary mode, the signature of a
/// first-order saddle point.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalMode {
    /// Frequency in cm^-1 (negative = imaginary)
    pub frequency: f64,
    /// Per-atom displacement vectors, flattened
    pub displacements: DVector<f64>,
}

impl NormalMode {
    /// Creates a normal mode from a frequency and flattened displacements.
    pub fn new(frequency: f64, displacements: Vec<f64>) -> Self {
        Self {
            frequency,
            displacements: DVector::from_vec(displacements),
        }
    }

    /// Number of atoms covered by the mode vector.
    pub fn num_atoms(&self) -> usize {
        self.displacements.len() / 3
    }

    /// True when the frequency is imaginary (reported as negative).
    pub fn is_imaginary(&self) -> bool {
        self.frequency < 0.0
    }
}

const ELEMENT_SYMBOLS: [&str; 86] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn",
];

/// Converts an atomic number (1 = H ... 86 = Rn) to its element symbol.
pub fn atomic_number_to_symbol(num: usize) -> Option<&'static str> {
    num.checked_sub(1).and_then(|i| ELEMENT_SYMBOLS.get(i)).copied()
}
