//! Bond classification along a vibrational mode.
//!
//! The TS candidate is displaced forward (`+1`) and backward (`-1`) along its
//! dominant normal mode. The difference of the two distance matrices
//! (the *delta mode*) tells how strongly each bond stretches or compresses in
//! the mode. Every bond of `edges(reactant) ∪ edges(product)` is then
//! classified:
//!
//! - **active** (forming or breaking): kept when `|delta| >= active_ratio * cutoff`
//! - **extra** (common to both graphs): kept when `|delta| >= cutoff`
//!
//! With the conventional `active_ratio = 2`, a reaction-defining bond needs
//! twice the signal an incidental bond needs before it counts.

use crate::geometry::{Geometry, NormalMode};
use crate::graph::{ActiveBondSet, Bond, BondGraph};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// Bonds that move in the mode, mapped to their signed delta-mode value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BondInvolvement {
    /// Forming/breaking bonds above the active threshold
    pub active: BTreeMap<Bond, f64>,
    /// Other bonds above the extra threshold
    pub extra: BTreeMap<Bond, f64>,
}

impl BondInvolvement {
    /// Signed displacements of the involved active bonds that belong to `subset`.
    pub fn active_values_in<'a, I>(&self, subset: I) -> Vec<f64>
    where
        I: IntoIterator<Item = &'a Bond>,
    {
        subset
            .into_iter()
            .filter_map(|b| self.active.get(b).copied())
            .collect()
    }
}

/// Displacement thresholds used for classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cutoffs {
    /// Minimum |delta| for an extra bond to register
    pub extra: f64,
    /// Minimum |delta| for an active bond to register
    pub active: f64,
}

impl Cutoffs {
    /// Builds thresholds from the displacement cutoff and the active/extra ratio.
    pub fn new(disp_cutoff: f64, active_ratio: f64) -> Self {
        Self {
            extra: disp_cutoff,
            active: active_ratio * disp_cutoff,
        }
    }
}

/// Distance-matrix difference between the forward and backward displaced geometries.
pub fn delta_mode(forward: &Geometry, backward: &Geometry) -> DMatrix<f64> {
    forward.distance_matrix() - backward.distance_matrix()
}

/// Classifies reactant/product bonds by their delta-mode value.
pub fn classify_bonds(
    reactant: &BondGraph,
    product: &BondGraph,
    active_bonds: &ActiveBondSet,
    delta: &DMatrix<f64>,
    cutoffs: Cutoffs,
) -> BondInvolvement {
    let mut involvement = BondInvolvement::default();

    for pair in reactant.union(product) {
        let value = delta[(pair.0, pair.1)];
        if active_bonds.contains(pair) {
            if value.abs() >= cutoffs.active {
                involvement.active.insert(pair, value);
            }
        } else if value.abs() >= cutoffs.extra {
            involvement.extra.insert(pair, value);
        }
    }

    involvement
}

/// Displaces `ts` along `mode` in both directions and classifies the bonds.
///
/// `max_atom_disp` caps the displacement of any single atom, see
/// [`Geometry::displaced_along_mode`].
pub fn classify_mode(
    ts: &Geometry,
    mode: &NormalMode,
    reactant: &BondGraph,
    product: &BondGraph,
    cutoffs: Cutoffs,
    max_atom_disp: f64,
) -> BondInvolvement {
    let forward = ts.displaced_along_mode(mode, 1.0, max_atom_disp);
    let backward = ts.displaced_along_mode(mode, -1.0, max_atom_disp);
    let delta = delta_mode(&forward, &backward);
    let active_bonds = ActiveBondSet::between(reactant, product);
    classify_bonds(reactant, product, &active_bonds, &delta, cutoffs)
}
