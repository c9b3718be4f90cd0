//! Transition state validity decisions.
//!
//! This module decides whether a candidate geometry is a genuine transition
//! state for the bond changes between a reactant and a product. For one
//! candidate it:
//!
//! 1. loads `reactants_geometry.xyz` and `products_geometry.xyz` from the
//!    reaction working directory,
//! 2. extracts the first normal mode and its frequency,
//! 3. infers reactant/product bond graphs and classifies every bond by its
//!    motion along the mode (see [`classify`](crate::classify)),
//! 4. combines the results into a [`Verdict`].
//!
//! A candidate is accepted iff
//!
//! - no extra (spectator) bond moves in the mode,
//! - at least one active bond moves in the mode,
//! - forming bonds in the mode move in one direction, and so do breaking bonds,
//! - every forming bond is still at least `factor` times its product length and
//!   every breaking bond at least `factor` times its reactant length,
//! - the frequency is below `-freq_cutoff`.
//!
//! A rejection is a normal outcome, not an error. [`TsError`] is reserved for
//! missing files, unparsable output and inconsistent inputs.
//!
//! # Examples
//!
//! ```no_run
//! use opents::config::ValidationParams;
//! use opents::validation::validate_ts_guess;
//! use std::path::Path;
//!
//! let params = ValidationParams { freq_cutoff: 150.0, ..Default::default() };
//! let valid = validate_ts_guess(
//!     Path::new("work_dir/reaction_7/ts_guess_0.xyz"),
//!     Path::new("work_dir/reaction_7"),
//!     &params,
//!     None,
//! )?;
//! println!("accepted: {}", valid);
//! # Ok::<(), opents::validation::TsError>(())
//! ```

use crate::classify::{classify_mode, BondInvolvement, Cutoffs};
use crate::config::ValidationParams;
use crate::geometry::{Geometry, NormalMode};
use crate::graph::{ActiveBondSet, Bond, BondPerception, CovalentRadii};
use crate::io;
use crate::naming::{ReactionNaming, PRODUCTS_XYZ, REACTANTS_XYZ, SPECTRUM_FILE};
use crate::parser::{read_spectrum_file, read_xyz, ParseError, SpectrumFormat};
use crate::qm_interface::QMError;
use log::{debug, info};
use nalgebra::DMatrix;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for a single validation or search attempt.
#[derive(Error, Debug)]
pub enum TsError {
    /// An expected geometry or spectrum file is absent
    #[error("Missing input file: {}", .0.display())]
    MissingInputFile(PathBuf),
    /// Program output could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    /// An external program failed
    #[error("External program error: {0}")]
    External(#[from] QMError),
    /// File system error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Atom count or ordering differs between reactant, product and candidate
    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),
}

/// Type alias for validation results
pub type Result<T> = std::result::Result<T, TsError>;

/// A TS candidate: its geometry file and the file holding its vibrational analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct TsCandidate {
    /// XYZ file of the candidate geometry
    pub geometry: PathBuf,
    /// Frequency output covering the candidate
    pub spectrum: PathBuf,
    /// Layout of `spectrum`
    pub format: SpectrumFormat,
}

impl TsCandidate {
    /// Candidate whose spectrum is the `g98.out` co-located in `workdir`.
    pub fn in_workdir(ts_file: &Path, workdir: &Path) -> Self {
        Self {
            geometry: ts_file.to_path_buf(),
            spectrum: workdir.join(SPECTRUM_FILE),
            format: SpectrumFormat::G98,
        }
    }

    /// Candidate whose spectrum is a Gaussian TS optimization log.
    pub fn from_gaussian_log(ts_file: &Path, log: &Path) -> Self {
        Self {
            geometry: ts_file.to_path_buf(),
            spectrum: log.to_path_buf(),
            format: SpectrumFormat::GaussianLog,
        }
    }
}

/// Destination of an accepted TS guess in the shared collection directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalGuessTarget {
    /// Shared `final_ts_guesses` directory
    pub dir: PathBuf,
    /// Identifier used to name the placed file
    pub reaction_id: String,
}

impl FinalGuessTarget {
    /// Copies `geometry` into the shared directory as
    /// `<reaction_id>_final_ts_guess.xyz`, replacing an earlier file.
    pub fn place(&self, geometry: &Path) -> Result<PathBuf> {
        let name = ReactionNaming::new(&self.reaction_id).final_ts_guess();
        let placed = io::place_atomically(geometry, &self.dir, &name)?;
        info!("Placed final TS guess at {}", placed.display());
        Ok(placed)
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// Bonds common to reactant and product move in the mode
    ExtraBondsInMode(Vec<Bond>),
    /// No forming or breaking bond moves in the mode
    NoActiveBondsInMode,
    /// Forming bonds move in opposite directions
    InconsistentFormingDirection,
    /// Breaking bonds move in opposite directions
    InconsistentBreakingDirection,
    /// Active bonds already as short as in the reactant or product
    BondLengthsNotIntermediate(Vec<Bond>),
    /// The frequency is not sufficiently imaginary
    FrequencyNotImaginaryEnough {
        /// Observed frequency in cm^-1
        frequency: f64,
        /// Required upper bound in cm^-1
        threshold: f64,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::ExtraBondsInMode(bonds) => write!(f, "extra bonds move in mode: {:?}", bonds),
            RejectionReason::NoActiveBondsInMode => write!(f, "no active bond moves in mode"),
            RejectionReason::InconsistentFormingDirection => write!(f, "forming bonds move in opposite directions"),
            RejectionReason::InconsistentBreakingDirection => write!(f, "breaking bonds move in opposite directions"),
            RejectionReason::BondLengthsNotIntermediate(bonds) => {
                write!(f, "bond lengths not intermediate: {:?}", bonds)
            }
            RejectionReason::FrequencyNotImaginaryEnough { frequency, threshold } => {
                write!(f, "frequency {:.2} is not below {:.2}", frequency, threshold)
            }
        }
    }
}

/// Outcome of the decision for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Frequency of the analysed mode
    pub frequency: f64,
    /// Failed criteria; empty iff the candidate is accepted
    pub reasons: Vec<RejectionReason>,
}

impl Verdict {
    /// True when no criterion failed.
    pub fn accepted(&self) -> bool {
        self.reasons.is_empty()
    }
}

/// Everything the decision needs about one candidate.
#[derive(Debug, Clone)]
pub struct TsAnalysis {
    /// Frequency of the first normal mode in cm^-1
    pub frequency: f64,
    /// Bonds moving in the mode
    pub involvement: BondInvolvement,
    /// Forming and breaking bonds between reactant and product
    pub active_bonds: ActiveBondSet,
    /// Pairwise distances of the reactant
    pub reactant_distances: DMatrix<f64>,
    /// Pairwise distances of the product
    pub product_distances: DMatrix<f64>,
    /// Pairwise distances of the candidate
    pub ts_distances: DMatrix<f64>,
}

impl TsAnalysis {
    /// Signed mode displacements of the forming bonds that move in the mode.
    pub fn forming_in_mode(&self) -> Vec<f64> {
        self.involvement.active_values_in(&self.active_bonds.forming)
    }

    /// Signed mode displacements of the breaking bonds that move in the mode.
    pub fn breaking_in_mode(&self) -> Vec<f64> {
        self.involvement.active_values_in(&self.active_bonds.breaking)
    }

    /// Active bonds whose candidate length is below `factor` times the length
    /// in the structure where they exist.
    ///
    /// Forming bonds are compared to the product, breaking bonds to the
    /// reactant. Forming bonds come first, each group in ascending order.
    pub fn unactivated_bonds(&self, factor: f64) -> Vec<Bond> {
        let forming = self
            .active_bonds
            .forming
            .iter()
            .filter(|&&(i, j)| self.ts_distances[(i, j)] < factor * self.product_distances[(i, j)]);
        let breaking = self
            .active_bonds
            .breaking
            .iter()
            .filter(|&&(i, j)| self.ts_distances[(i, j)] < factor * self.reactant_distances[(i, j)]);
        forming.chain(breaking).copied().collect()
    }

    /// True when every active bond lies between reactant and product lengths.
    pub fn bond_lengths_intermediate(&self, factor: f64) -> bool {
        self.unactivated_bonds(factor).is_empty()
    }

    /// Applies the acceptance criteria.
    pub fn verdict(&self, params: &ValidationParams) -> Verdict {
        let mut reasons = Vec::new();

        if !self.involvement.extra.is_empty() {
            reasons.push(RejectionReason::ExtraBondsInMode(
                self.involvement.extra.keys().copied().collect(),
            ));
        }
        if self.involvement.active.is_empty() {
            reasons.push(RejectionReason::NoActiveBondsInMode);
        }
        if !check_same_sign(&self.forming_in_mode()) {
            reasons.push(RejectionReason::InconsistentFormingDirection);
        }
        if !check_same_sign(&self.breaking_in_mode()) {
            reasons.push(RejectionReason::InconsistentBreakingDirection);
        }
        let unactivated = self.unactivated_bonds(params.factor);
        if !unactivated.is_empty() {
            reasons.push(RejectionReason::BondLengthsNotIntermediate(unactivated));
        }
        let imaginary_enough = self.frequency < -params.freq_cutoff;
        if !imaginary_enough {
            reasons.push(RejectionReason::FrequencyNotImaginaryEnough {
                frequency: self.frequency,
                threshold: -params.freq_cutoff,
            });
        }

        Verdict {
            frequency: self.frequency,
            reasons,
        }
    }
}

/// Returns true if no two non-zero values disagree in sign.
///
/// Zeros are neutral; the first non-zero value fixes the reference sign. An
/// empty list passes.
///
/// # Examples
///
/// ```
/// use opents::validation::check_same_sign;
///
/// assert!(check_same_sign(&[]));
/// assert!(check_same_sign(&[0.0, 1.2, 0.0, 0.7]));
/// assert!(check_same_sign(&[-1.0, 0.0, -0.3]));
/// assert!(!check_same_sign(&[0.8, -1.1]));
/// ```
pub fn check_same_sign(values: &[f64]) -> bool {
    let mut reference = 0;
    for &value in values {
        let sign = if value > 0.0 {
            1
        } else if value < 0.0 {
            -1
        } else {
            continue;
        };
        if reference == 0 {
            reference = sign;
        } else if sign != reference {
            return false;
        }
    }
    true
}

/// Analyses a candidate against its reactant and product.
///
/// Bond graphs are inferred with `perception` at `params.graph_tolerance`. The
/// candidate is displaced by `+1` and `-1` along `mode`.
///
/// # Errors
///
/// [`TsError::GeometryMismatch`] if the three geometries or the mode do not
/// describe the same atoms in the same order.
pub fn analyse_ts_guess<P: BondPerception + ?Sized>(
    ts: &Geometry,
    reactant: &Geometry,
    product: &Geometry,
    mode: &NormalMode,
    perception: &P,
    params: &ValidationParams,
) -> Result<TsAnalysis> {
    if !ts.same_atom_ordering(reactant) || !ts.same_atom_ordering(product) {
        return Err(TsError::GeometryMismatch(format!(
            "candidate has {} atoms, reactant {}, product {} (or element order differs)",
            ts.num_atoms, reactant.num_atoms, product.num_atoms
        )));
    }
    if mode.num_atoms() != ts.num_atoms {
        return Err(TsError::GeometryMismatch(format!(
            "mode covers {} atoms, candidate has {}",
            mode.num_atoms(),
            ts.num_atoms
        )));
    }

    let reactant_graph = perception.perceive(reactant, params.graph_tolerance);
    let product_graph = perception.perceive(product, params.graph_tolerance);
    let cutoffs = Cutoffs::new(params.disp_cutoff, params.active_cutoff_ratio);
    let involvement = classify_mode(ts, mode, &reactant_graph, &product_graph, cutoffs, params.max_atom_disp);

    Ok(TsAnalysis {
        frequency: mode.frequency,
        involvement,
        active_bonds: ActiveBondSet::between(&reactant_graph, &product_graph),
        reactant_distances: reactant.distance_matrix(),
        product_distances: product.distance_matrix(),
        ts_distances: ts.distance_matrix(),
    })
}

/// Loads the reactant and product geometries of a working directory.
pub fn load_endpoints(workdir: &Path) -> Result<(Geometry, Geometry)> {
    let reactant = read_existing_xyz(&workdir.join(REACTANTS_XYZ))?;
    let product = read_existing_xyz(&workdir.join(PRODUCTS_XYZ))?;
    Ok((reactant, product))
}

fn read_existing_xyz(path: &Path) -> Result<Geometry> {
    require_file(path)?;
    Ok(read_xyz(path)?)
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(TsError::MissingInputFile(path.to_path_buf()))
    }
}

/// Decision engine bound to a bond-perception strategy and thresholds.
#[derive(Debug, Clone)]
pub struct TsValidator<P: BondPerception = CovalentRadii> {
    perception: P,
    params: ValidationParams,
}

impl TsValidator<CovalentRadii> {
    /// Validator using covalent-radii bond perception.
    pub fn new(params: ValidationParams) -> Self {
        Self::with_perception(CovalentRadii, params)
    }
}

impl<P: BondPerception> TsValidator<P> {
    /// Validator using a custom bond perception.
    pub fn with_perception(perception: P, params: ValidationParams) -> Self {
        Self { perception, params }
    }

    /// Thresholds in use
    pub fn params(&self) -> &ValidationParams {
        &self.params
    }

    /// Reads the candidate and its reactant/product and analyses the mode.
    ///
    /// # Errors
    ///
    /// - [`TsError::MissingInputFile`] if a geometry or the spectrum is absent
    /// - [`TsError::Parse`] if any file cannot be parsed
    /// - [`TsError::GeometryMismatch`] if the atoms do not line up
    pub fn analyse(&self, candidate: &TsCandidate, workdir: &Path) -> Result<TsAnalysis> {
        let (reactant, product) = load_endpoints(workdir)?;
        let ts = read_existing_xyz(&candidate.geometry)?;
        require_file(&candidate.spectrum)?;
        let mode = read_spectrum_file(&candidate.spectrum, candidate.format, ts.num_atoms)?;

        analyse_ts_guess(&ts, &reactant, &product, &mode, &self.perception, &self.params)
    }

    /// Decides on a candidate.
    ///
    /// When the candidate is accepted and `finalize` is given, its geometry
    /// file is placed into `finalize.dir` as `<reaction_id>_final_ts_guess.xyz`,
    /// replacing any earlier file of the same reaction.
    pub fn validate(
        &self,
        candidate: &TsCandidate,
        workdir: &Path,
        finalize: Option<&FinalGuessTarget>,
    ) -> Result<Verdict> {
        let analysis = self.analyse(candidate, workdir)?;
        let verdict = analysis.verdict(&self.params);

        debug!(
            "{}: frequency {:.2}, active {:?}, extra {:?}",
            candidate.geometry.display(),
            analysis.frequency,
            analysis.involvement.active,
            analysis.involvement.extra
        );

        if verdict.accepted() {
            info!("Accepted TS candidate {}", candidate.geometry.display());
            if let Some(target) = finalize {
                target.place(&candidate.geometry)?;
            }
        } else {
            let reasons: Vec<String> = verdict.reasons.iter().map(|r| r.to_string()).collect();
            info!(
                "Rejected TS candidate {}: {}",
                candidate.geometry.display(),
                reasons.join("; ")
            );
        }

        Ok(verdict)
    }

    /// Forming/breaking bonds that are not yet activated in the candidate.
    ///
    /// Read-only; uses `params.factor` as the activation margin.
    pub fn unactivated_bonds(&self, candidate: &TsCandidate, workdir: &Path) -> Result<Vec<Bond>> {
        let analysis = self.analyse(candidate, workdir)?;
        Ok(analysis.unactivated_bonds(self.params.factor))
    }
}

/// Validates the TS guess `ts_file` against the reactant and product in `workdir`.
///
/// The spectrum is read from `workdir/g98.out`.
///
/// # Returns
///
/// `Ok(true)` if the candidate is accepted, `Ok(false)` if it is rejected.
pub fn validate_ts_guess(
    ts_file: &Path,
    workdir: &Path,
    params: &ValidationParams,
    finalize: Option<&FinalGuessTarget>,
) -> Result<bool> {
    let validator = TsValidator::new(params.clone());
    let verdict = validator.validate(&TsCandidate::in_workdir(ts_file, workdir), workdir, finalize)?;
    Ok(verdict.accepted())
}

/// Lists the active bonds of `ts_file` that have not reached `params.factor`
/// times their reactant (breaking) or product (forming) length.
pub fn determine_unactivated_bonds(ts_file: &Path, workdir: &Path, params: &ValidationParams) -> Result<Vec<Bond>> {
    let validator = TsValidator::new(params.clone());
    validator.unactivated_bonds(&TsCandidate::in_workdir(ts_file, workdir), workdir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn distances(values: &[((usize, usize), f64)], n: usize) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(n, n);
        for &((i, j), v) in values {
            m[(i, j)] = v;
            m[(j, i)] = v;
        }
        m
    }

    /// Analysis of a single forming bond (0,1) with a clean mode.
    fn forming_only(frequency: f64, ts_len: f64, product_len: f64) -> TsAnalysis {
        TsAnalysis {
            frequency,
            involvement: BondInvolvement {
                active: BTreeMap::from([((0, 1), -1.3)]),
                extra: BTreeMap::new(),
            },
            active_bonds: ActiveBondSet {
                forming: BTreeSet::from([(0, 1)]),
                breaking: BTreeSet::new(),
            },
            reactant_distances: distances(&[((0, 1), 3.5)], 2),
            product_distances: distances(&[((0, 1), product_len)], 2),
            ts_distances: distances(&[((0, 1), ts_len)], 2),
        }
    }

    fn params(freq_cutoff: f64) -> ValidationParams {
        ValidationParams {
            freq_cutoff,
            ..Default::default()
        }
    }

    #[test]
    fn test_same_sign_rule() {
        assert!(check_same_sign(&[0.5, 0.0, 2.0]));
        assert!(!check_same_sign(&[0.5, -0.5]));
        assert!(check_same_sign(&[0.0, 0.0]));
        assert!(!check_same_sign(&[0.0, -1.0, 1.0]));
    }

    #[test]
    fn test_frequency_threshold() {
        let accepted = forming_only(-300.0, 2.0, 1.5).verdict(&params(150.0));
        assert!(accepted.accepted());

        let rejected = forming_only(-100.0, 2.0, 1.5).verdict(&params(150.0));
        assert_eq!(
            rejected.reasons,
            vec![RejectionReason::FrequencyNotImaginaryEnough {
                frequency: -100.0,
                threshold: -150.0
            }]
        );
    }

    #[test]
    fn test_frequency_equal_to_cutoff_is_rejected() {
        assert!(!forming_only(-150.0, 2.0, 1.5).verdict(&params(150.0)).accepted());
    }

    #[test]
    fn test_forming_bond_intermediacy() {
        // 2.00 >= 1.05 * 1.50 = 1.575
        assert!(forming_only(-300.0, 2.0, 1.5).bond_lengths_intermediate(1.05));
        // 1.55 < 1.575
        assert_eq!(forming_only(-300.0, 1.55, 1.5).unactivated_bonds(1.05), vec![(0, 1)]);
    }

    #[test]
    fn test_intermediacy_is_monotonic_in_factor() {
        let analysis = forming_only(-300.0, 1.6, 1.5);
        let mut previously_passing = true;
        for factor in [1.0, 1.02, 1.05, 1.066, 1.067, 1.1, 1.2] {
            let passes = analysis.bond_lengths_intermediate(factor);
            assert!(previously_passing || !passes);
            previously_passing = passes;
        }
        assert!(!previously_passing);
    }

    #[test]
    fn test_extra_bonds_reject_regardless_of_other_criteria() {
        let mut analysis = forming_only(-900.0, 2.5, 1.5);
        analysis.involvement.extra.insert((1, 2), 0.7);

        let verdict = analysis.verdict(&params(50.0));
        assert_eq!(verdict.reasons, vec![RejectionReason::ExtraBondsInMode(vec![(1, 2)])]);
    }

    #[test]
    fn test_no_active_bonds_in_mode() {
        let mut analysis = forming_only(-900.0, 2.5, 1.5);
        analysis.involvement.active.clear();

        let verdict = analysis.verdict(&params(50.0));
        assert_eq!(verdict.reasons, vec![RejectionReason::NoActiveBondsInMode]);
    }

    #[test]
    fn test_breaking_bonds_must_agree_in_direction() {
        let analysis = TsAnalysis {
            frequency: -800.0,
            involvement: BondInvolvement {
                active: BTreeMap::from([((0, 1), 1.1), ((2, 3), -1.1)]),
                extra: BTreeMap::new(),
            },
            active_bonds: ActiveBondSet {
                forming: BTreeSet::new(),
                breaking: BTreeSet::from([(0, 1), (2, 3)]),
            },
            reactant_distances: distances(&[((0, 1), 1.0), ((2, 3), 1.0)], 4),
            product_distances: distances(&[((0, 1), 3.0), ((2, 3), 3.0)], 4),
            ts_distances: distances(&[((0, 1), 1.8), ((2, 3), 1.8)], 4),
        };

        let verdict = analysis.verdict(&params(50.0));
        assert_eq!(verdict.reasons, vec![RejectionReason::InconsistentBreakingDirection]);
    }

    #[test]
    fn test_mismatched_atoms_are_an_error() {
        let h2 = Geometry::new(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0]);
        let hf = Geometry::new(vec!["H".into(), "F".into()], vec![0.0, 0.0, 0.0, 0.92, 0.0, 0.0]);
        let mode = NormalMode::new(-500.0, vec![0.0; 6]);

        let result = analyse_ts_guess(&h2, &h2, &hf, &mode, &CovalentRadii, &ValidationParams::default());
        assert!(matches!(result, Err(TsError::GeometryMismatch(_))));
    }

    #[test]
    fn test_missing_reactant_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = load_endpoints(dir.path());
        match result {
            Err(TsError::MissingInputFile(path)) => assert!(path.ends_with(REACTANTS_XYZ)),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
