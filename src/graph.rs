//! Bond graphs and bond-graph inference.
//!
//! A [`BondGraph`] is the set of bonded atom-index pairs of one geometry. It is
//! always derived from coordinates by a [`BondPerception`] implementation under
//! a relative tolerance; nothing in this crate builds graphs by hand except tests.
//!
//! The default perception, [`CovalentRadii`], bonds atoms `i` and `j` when
//!
//! ```text
//! d(i, j) < (1 + rel_tolerance) * (r_i + r_j)
//! ```
//!
//! with `r` the tabulated single-bond covalent radius of each element.

use crate::geometry::Geometry;
use std::collections::BTreeSet;

/// Default relative tolerance for bond perception.
pub const DEFAULT_REL_TOLERANCE: f64 = 0.25;

/// Unordered atom-index pair, stored with the smaller index first.
pub type Bond = (usize, usize);

/// Normalizes an atom pair so that the smaller index comes first.
pub fn bond(i: usize, j: usize) -> Bond {
    if i <= j {
        (i, j)
    } else {
        (j, i)
    }
}

/// Set of bonds inferred from one geometry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BondGraph {
    edges: BTreeSet<Bond>,
}

impl BondGraph {
    /// Builds a graph from atom pairs in any orientation.
    ///
    /// # Examples
    ///
    /// ```
    /// use opents::graph::BondGraph;
    ///
    /// let g = BondGraph::from_edges([(1, 0), (1, 2)]);
    /// assert!(g.contains((0, 1)));
    /// assert!(g.contains((2, 1)));
    /// assert_eq!(g.len(), 2);
    /// ```
    pub fn from_edges<I: IntoIterator<Item = Bond>>(edges: I) -> Self {
        Self {
            edges: edges.into_iter().map(|(i, j)| bond(i, j)).collect(),
        }
    }

    /// Returns true if atoms of `pair` are bonded.
    pub fn contains(&self, pair: Bond) -> bool {
        self.edges.contains(&bond(pair.0, pair.1))
    }

    /// Iterates over the edges in ascending order.
    pub fn edges(&self) -> impl Iterator<Item = &Bond> {
        self.edges.iter()
    }

    /// Number of bonds.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// True when the graph has no bonds.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Bonds present in `self` but not in `other`.
    pub fn difference(&self, other: &BondGraph) -> BTreeSet<Bond> {
        self.edges.difference(&other.edges).copied().collect()
    }

    /// Bonds present in either graph.
    pub fn union(&self, other: &BondGraph) -> BTreeSet<Bond> {
        self.edges.union(&other.edges).copied().collect()
    }
}

/// Infers a bond graph from a geometry.
///
/// Implementations must be pure functions of their inputs; they are shared
/// between worker threads.
pub trait BondPerception: Send + Sync {
    /// Returns the bonds of `geometry` under the relative tolerance `rel_tolerance`.
    fn perceive(&self, geometry: &Geometry, rel_tolerance: f64) -> BondGraph;
}

/// Distance-based bond perception using single-bond covalent radii.
#[derive(Debug, Clone, Copy, Default)]
pub struct CovalentRadii;

impl BondPerception for CovalentRadii {
    fn perceive(&self, geometry: &Geometry, rel_tolerance: f64) -> BondGraph {
        let radii: Vec<f64> = geometry.elements.iter().map(|e| covalent_radius(e)).collect();
        let mut edges = BTreeSet::new();
        for i in 0..geometry.num_atoms {
            for j in (i + 1)..geometry.num_atoms {
                let threshold = (1.0 + rel_tolerance) * (radii[i] + radii[j]);
                if geometry.distance(i, j) < threshold {
                    edges.insert((i, j));
                }
            }
        }
        BondGraph { edges }
    }
}

/// Single-bond covalent radius in Angstroms (Cordero et al., Dalton Trans. 2008).
///
/// Unknown symbols fall back to 1.50 A.
pub fn covalent_radius(symbol: &str) -> f64 {
    let normalized = normalize_symbol(symbol);
    match normalized.as_str() {
        "H" => 0.31,
        "He" => 0.28,
        "Li" => 1.28,
        "Be" => 0.96,
        "B" => 0.84,
        "C" => 0.76,
        "N" => 0.71,
        "O" => 0.66,
        "F" => 0.57,
        "Ne" => 0.58,
        "Na" => 1.66,
        "Mg" => 1.41,
        "Al" => 1.21,
        "Si" => 1.11,
        "P" => 1.07,
        "S" => 1.05,
        "Cl" => 1.02,
        "Ar" => 1.06,
        "K" => 2.03,
        "Ca" => 1.76,
        "Sc" => 1.70,
        "Ti" => 1.60,
        "V" => 1.53,
        "Cr" => 1.39,
        "Mn" => 1.39,
        "Fe" => 1.32,
        "Co" => 1.26,
        "Ni" => 1.24,
        "Cu" => 1.32,
        "Zn" => 1.22,
        "Ga" => 1.22,
        "Ge" => 1.20,
        "As" => 1.19,
        "Se" => 1.20,
        "Br" => 1.20,
        "Kr" => 1.16,
        "Rb" => 2.20,
        "Sr" => 1.95,
        "Y" => 1.90,
        "Zr" => 1.75,
        "Nb" => 1.64,
        "Mo" => 1.54,
        "Tc" => 1.47,
        "Ru" => 1.46,
        "Rh" => 1.42,
        "Pd" => 1.39,
        "Ag" => 1.45,
        "Cd" => 1.44,
        "In" => 1.42,
        "Sn" => 1.39,
        "Sb" => 1.39,
        "Te" => 1.38,
        "I" => 1.39,
        "Xe" => 1.40,
        "Pt" => 1.36,
        "Au" => 1.36,
        "Hg" => 1.32,
        "Pb" => 1.46,
        "Bi" => 1.48,
        _ => 1.50,
    }
}

fn normalize_symbol(symbol: &str) -> String {
    let mut chars = symbol.trim().chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Bonds that change between reactant and product.
///
/// `forming = edges(product) - edges(reactant)` and
/// `breaking = edges(reactant) - edges(product)`; the two sets are disjoint by
/// construction. The set is recomputed for every validation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveBondSet {
    /// Bonds present in the product only
    pub forming: BTreeSet<Bond>,
    /// Bonds present in the reactant only
    pub breaking: BTreeSet<Bond>,
}

impl ActiveBondSet {
    /// Computes forming and breaking bonds between two graphs.
    ///
    /// # Examples
    ///
    /// ```
    /// use opents::graph::{ActiveBondSet, BondGraph};
    ///
    /// let reactant = BondGraph::from_edges([(0, 1), (1, 2)]);
    /// let product = BondGraph::from_edges([(1, 2), (2, 3)]);
    /// let active = ActiveBondSet::between(&reactant, &product);
    ///
    /// assert_eq!(active.forming.into_iter().collect::<Vec<_>>(), vec![(2, 3)]);
    /// assert_eq!(active.breaking.into_iter().collect::<Vec<_>>(), vec![(0, 1)]);
    /// ```
    pub fn between(reactant: &BondGraph, product: &BondGraph) -> Self {
        Self {
            forming: product.difference(reactant),
            breaking: reactant.difference(product),
        }
    }

    /// True if `pair` is forming or breaking.
    pub fn contains(&self, pair: Bond) -> bool {
        let pair = bond(pair.0, pair.1);
        self.forming.contains(&pair) || self.breaking.contains(&pair)
    }

    /// True when reactant and product graphs are identical.
    pub fn is_empty(&self) -> bool {
        self.forming.is_empty() && self.breaking.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h3(x1: f64, x2: f64) -> Geometry {
        Geometry::new(
            vec!["H".to_string(), "H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, x1, 0.0, 0.0, x2, 0.0, 0.0],
        )
    }

    #[test]
    fn test_covalent_perception_bonds_short_contacts_only() {
        let graph = CovalentRadii.perceive(&h3(0.74, 3.74), DEFAULT_REL_TOLERANCE);
        assert_eq!(graph, BondGraph::from_edges([(0, 1)]));
    }

    #[test]
    fn test_perception_is_tolerance_sensitive() {
        // H-H threshold: 0.62 * 1.30 = 0.806 vs 0.62 * 1.25 = 0.775
        let geom = h3(0.79, 4.0);
        assert!(CovalentRadii.perceive(&geom, 0.30).contains((0, 1)));
        assert!(!CovalentRadii.perceive(&geom, 0.25).contains((0, 1)));
    }

    #[test]
    fn test_forming_and_breaking_are_disjoint() {
        let graphs = [
            BondGraph::from_edges([(0, 1), (1, 2), (2, 3)]),
            BondGraph::from_edges([(0, 2), (1, 2)]),
            BondGraph::from_edges([]),
            BondGraph::from_edges([(0, 1), (0, 2), (0, 3), (3, 4)]),
        ];
        for reactant in &graphs {
            for product in &graphs {
                let active = ActiveBondSet::between(reactant, product);
                assert!(active.forming.is_disjoint(&active.breaking));
            }
        }
    }

    #[test]
    fn test_identical_graphs_have_no_active_bonds() {
        let g = BondGraph::from_edges([(0, 1), (1, 2)]);
        assert!(ActiveBondSet::between(&g, &g).is_empty());
    }

    #[test]
    fn test_symbol_normalization() {
        assert_eq!(covalent_radius("CL"), 1.02);
        assert_eq!(covalent_radius("cl"), 1.02);
        assert_eq!(covalent_radius("Xx"), 1.50);
    }
}
