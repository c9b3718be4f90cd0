//! IRC reconciliation.
//!
//! A TS guess that passed the mode analysis is confirmed by following the
//! reaction path in both directions. The terminal points of the forward and
//! reverse IRC runs are re-optimized (see [`EndpointOptimizer`]) and their
//! bond graphs compared with the reactant and product graphs.
//!
//! Bond perception is tolerance-sensitive near breaking distances, so the
//! comparison sweeps a sequence of relative tolerances (by default 0.30 down to
//! 0.10, set through `[irc] tolerances`) and stops at the first tolerance where
//! either orientation matches exactly:
//!
//! ```text
//! (forward == reactant && reverse == product) || (forward == product && reverse == reactant)
//! ```
//!
//! This module also writes the forward/reverse Gaussian IRC inputs and pulls
//! the terminal geometries out of their logs.

use crate::config::{ProgramConfig, DEFAULT_IRC_TOLERANCES};
use crate::geometry::Geometry;
use crate::graph::{BondPerception, CovalentRadii};
use crate::io;
use crate::parser::{extract_irc_endpoint, read_xyz};
use crate::qm_interface::{GaussianJob, QMError};
use crate::validation::{Result, TsError};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// Re-optimizes an IRC terminal geometry.
///
/// Implementations run a blocking external optimization and return the path
/// of an XYZ file holding the optimized geometry.
pub trait EndpointOptimizer: Send + Sync {
    /// Optimizes the geometry in `xyz`.
    ///
    /// # Arguments
    ///
    /// * `xyz` - Terminal geometry of an IRC run
    /// * `charge` - Total charge
    /// * `multiplicity` - Spin multiplicity
    /// * `solvent` - Implicit solvent, if any
    fn optimize(
        &self,
        xyz: &Path,
        charge: i32,
        multiplicity: u32,
        solvent: Option<&str>,
    ) -> std::result::Result<PathBuf, QMError>;
}

/// Charge, multiplicity and solvent of the reacting system.
#[derive(Debug, Clone, PartialEq)]
pub struct MolecularSystem {
    /// Total charge
    pub charge: i32,
    /// Spin multiplicity
    pub multiplicity: u32,
    /// Implicit solvent, if any
    pub solvent: Option<String>,
}

impl Default for MolecularSystem {
    fn default() -> Self {
        Self {
            charge: 0,
            multiplicity: 1,
            solvent: None,
        }
    }
}

/// Which IRC direction corresponds to the reactant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// The forward endpoint is the reactant, the reverse endpoint the product
    ForwardIsReactant,
    /// The forward endpoint is the product, the reverse endpoint the reactant
    ForwardIsProduct,
}

/// First tolerance at which the endpoints matched, and how.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrcMatch {
    /// Relative tolerance of bond perception
    pub tolerance: f64,
    /// Matching orientation
    pub orientation: Orientation,
}

/// Compares IRC endpoints with the reactant and product over `tolerances`.
///
/// Tolerances are tried in the given order. At each one all four graphs are
/// rebuilt and both orientations tested, forward-is-reactant first.
///
/// # Returns
///
/// The first match, or `None` if no tolerance yields exact graph equality.
pub fn match_endpoints<P: BondPerception + ?Sized>(
    forward: &Geometry,
    reverse: &Geometry,
    reactant: &Geometry,
    product: &Geometry,
    perception: &P,
    tolerances: &[f64],
) -> Option<IrcMatch> {
    for &tolerance in tolerances {
        let forward_graph = perception.perceive(forward, tolerance);
        let reverse_graph = perception.perceive(reverse, tolerance);
        let reactant_graph = perception.perceive(reactant, tolerance);
        let product_graph = perception.perceive(product, tolerance);

        let orientation = if forward_graph == reactant_graph && reverse_graph == product_graph {
            Some(Orientation::ForwardIsReactant)
        } else if forward_graph == product_graph && reverse_graph == reactant_graph {
            Some(Orientation::ForwardIsProduct)
        } else {
            None
        };

        if let Some(orientation) = orientation {
            return Some(IrcMatch { tolerance, orientation });
        }
        debug!("IRC endpoints do not match at tolerance {:.2}", tolerance);
    }
    None
}

/// Confirms a TS guess from its IRC terminal geometries.
///
/// # Examples
///
/// ```no_run
/// use opents::irc::{IrcReconciler, MolecularSystem};
/// use opents::qm_interface::XtbInterface;
/// use std::path::Path;
///
/// let reconciler = IrcReconciler::new(XtbInterface::new("xtb".into()));
/// let confirmed = reconciler.reconcile(
///     Path::new("irc/forward_endpoint.xyz"),
///     Path::new("irc/reverse_endpoint.xyz"),
///     Path::new("irc/reactants_geometry.xyz"),
///     Path::new("irc/products_geometry.xyz"),
///     &MolecularSystem::default(),
/// )?;
/// # Ok::<(), opents::validation::TsError>(())
/// ```
#[derive(Debug, Clone)]
pub struct IrcReconciler<O: EndpointOptimizer, P: BondPerception = CovalentRadii> {
    optimizer: O,
    perception: P,
    tolerances: Vec<f64>,
}

impl<O: EndpointOptimizer> IrcReconciler<O, CovalentRadii> {
    /// Reconciler with covalent-radii perception and the default tolerance sweep.
    pub fn new(optimizer: O) -> Self {
        Self::with_perception(optimizer, CovalentRadii, DEFAULT_IRC_TOLERANCES.to_vec())
    }
}

impl<O: EndpointOptimizer, P: BondPerception> IrcReconciler<O, P> {
    /// Reconciler with a custom perception and tolerance sweep.
    pub fn with_perception(optimizer: O, perception: P, tolerances: Vec<f64>) -> Self {
        Self {
            optimizer,
            perception,
            tolerances,
        }
    }

    /// Replaces the tolerance sweep; tolerances are tried in the given order.
    pub fn with_tolerances(mut self, tolerances: Vec<f64>) -> Self {
        self.tolerances = tolerances;
        self
    }

    /// Re-optimizes both endpoints and compares them with reactant and product.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if some tolerance of the sweep matches.
    ///
    /// # Errors
    ///
    /// Missing files, optimizer failures and unparsable geometries are errors;
    /// a mismatch is `Ok(false)`.
    pub fn reconcile(
        &self,
        forward_xyz: &Path,
        reverse_xyz: &Path,
        reactant_xyz: &Path,
        product_xyz: &Path,
        system: &MolecularSystem,
    ) -> Result<bool> {
        for path in [forward_xyz, reverse_xyz, reactant_xyz, product_xyz] {
            if !path.is_file() {
                return Err(TsError::MissingInputFile(path.to_path_buf()));
            }
        }

        let solvent = system.solvent.as_deref();
        let forward_opt = self
            .optimizer
            .optimize(forward_xyz, system.charge, system.multiplicity, solvent)?;
        let reverse_opt = self
            .optimizer
            .optimize(reverse_xyz, system.charge, system.multiplicity, solvent)?;

        let forward = read_xyz(&forward_opt)?;
        let reverse = read_xyz(&reverse_opt)?;
        let reactant = read_xyz(reactant_xyz)?;
        let product = read_xyz(product_xyz)?;

        match match_endpoints(&forward, &reverse, &reactant, &product, &self.perception, &self.tolerances) {
            Some(found) => {
                info!(
                    "IRC endpoints match at tolerance {:.2} ({:?})",
                    found.tolerance, found.orientation
                );
                Ok(true)
            }
            None => {
                info!("IRC endpoints do not match reactant/product at any tolerance");
                Ok(false)
            }
        }
    }
}

/// Settings of the forward/reverse Gaussian IRC jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct IrcSettings {
    /// Level of theory as written on the route line (e.g. `UB3LYP/6-31G(d,p)`)
    pub method: String,
    /// `%Mem`
    pub mem: String,
    /// `%NProc`
    pub nprocs: usize,
    /// Charge, multiplicity and solvent
    pub system: MolecularSystem,
    /// File name prefix of the two inputs
    pub prefix: String,
}

impl IrcSettings {
    /// Settings derived from the program configuration.
    pub fn from_programs(programs: &ProgramConfig, system: MolecularSystem) -> Self {
        Self {
            method: programs.level_of_theory(),
            mem: programs.mem.clone(),
            nprocs: programs.nprocs,
            system,
            prefix: "irc_calc".to_string(),
        }
    }

    fn job(&self, checkpoint: String, direction: &str) -> GaussianJob {
        let external = self.method.contains("external");
        let mut route = format!(
            "p IRC(calcfc, maxpoint=50, stepsize=15, {}) {}",
            direction, self.method
        );
        if let Some(solvent) = &self.system.solvent {
            route.push_str(&format!(" SCRF=(Solvent={})", solvent));
        }

        GaussianJob {
            checkpoint: Some(checkpoint),
            nprocs: (!external).then_some(self.nprocs),
            mem: (!external).then(|| self.mem.clone()),
            route,
            title: "IRC Calculation".to_string(),
            charge: self.system.charge,
            multiplicity: self.system.multiplicity,
        }
    }
}

/// Writes `<prefix>_forward.com` and `<prefix>_reverse.com` for the TS in `ts_xyz`.
///
/// Both decks share the checkpoint `<ts stem>.chk`. `%NProc` and `%Mem` are
/// omitted for `external=` methods.
///
/// # Returns
///
/// The paths of the forward and reverse inputs.
pub fn write_irc_inputs(ts_xyz: &Path, output_dir: &Path, settings: &IrcSettings) -> Result<(PathBuf, PathBuf)> {
    let ts = read_xyz(ts_xyz)?;
    let stem = ts_xyz
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("ts");
    let checkpoint = format!("{}.chk", stem);

    fs::create_dir_all(output_dir)?;
    let forward = output_dir.join(format!("{}_forward.com", settings.prefix));
    let reverse = output_dir.join(format!("{}_reverse.com", settings.prefix));
    fs::write(&forward, settings.job(checkpoint.clone(), "Forward").render(&ts))?;
    fs::write(&reverse, settings.job(checkpoint, "Reverse").render(&ts))?;

    info!("Wrote IRC inputs {} and {}", forward.display(), reverse.display());
    Ok((forward, reverse))
}

/// Extracts the terminal geometries of the forward and reverse IRC logs.
///
/// Writes `forward_endpoint.xyz` and `reverse_endpoint.xyz` into `output_dir`.
pub fn extract_irc_endpoints(forward_log: &Path, reverse_log: &Path, output_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let forward = write_endpoint(forward_log, &output_dir.join("forward_endpoint.xyz"))?;
    let reverse = write_endpoint(reverse_log, &output_dir.join("reverse_endpoint.xyz"))?;
    Ok((forward, reverse))
}

fn write_endpoint(log: &Path, xyz: &Path) -> Result<PathBuf> {
    if !log.is_file() {
        return Err(TsError::MissingInputFile(log.to_path_buf()));
    }
    let geometry = extract_irc_endpoint(&fs::read_to_string(log)?)?;
    io::write_xyz(&geometry, "IRC endpoint", xyz)?;
    Ok(xyz.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h3(x1: f64, x2: f64) -> Geometry {
        Geometry::new(
            vec!["H".into(), "H".into(), "H".into()],
            vec![0.0, 0.0, 0.0, x1, 0.0, 0.0, x2, 0.0, 0.0],
        )
    }

    #[test]
    fn test_reversed_orientation_matches() {
        let reactant = h3(0.74, 3.74);
        let product = h3(3.0, 3.74);

        let found = match_endpoints(&product, &reactant, &reactant, &product, &CovalentRadii, &DEFAULT_IRC_TOLERANCES);
        assert_eq!(
            found,
            Some(IrcMatch {
                tolerance: 0.30,
                orientation: Orientation::ForwardIsProduct
            })
        );
    }

    #[test]
    fn test_stretched_bond_needs_loose_tolerance() {
        // 0.79 A is bonded only for tolerances >= 0.30
        let stretched = h3(0.79, 4.0);
        let reactant = h3(0.74, 4.0);
        let product = h3(4.0, 4.74);

        let found = match_endpoints(&stretched, &product, &reactant, &product, &CovalentRadii, &DEFAULT_IRC_TOLERANCES);
        assert_eq!(found.map(|m| m.tolerance), Some(0.30));

        let tight = [0.25, 0.20];
        assert_eq!(match_endpoints(&stretched, &product, &reactant, &product, &CovalentRadii, &tight), None);
    }

    #[test]
    fn test_external_method_drops_resources() {
        let programs = ProgramConfig {
            method: "external=\"xtb_external.py\"".into(),
            ..Default::default()
        };
        let settings = IrcSettings::from_programs(
            &programs,
            MolecularSystem {
                solvent: Some("water".into()),
                ..Default::default()
            },
        );
        let job = settings.job("ts.chk".into(), "Reverse");

        assert_eq!(job.nprocs, None);
        assert_eq!(job.mem, None);
        assert_eq!(
            job.route,
            "p IRC(calcfc, maxpoint=50, stepsize=15, Reverse) external=\"xtb_external.py\" SCRF=(Solvent=water)"
        );
    }
}
