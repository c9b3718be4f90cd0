//! Configuration structures for TS validation and batch runs.
//!
//! This module defines all configuration structures used by the library:
//!
//! - [`ValidationParams`]: Thresholds of the TS validity decision
//! - [`SearchConfig`]: Parameters of the batch TS search
//! - [`ValidationBatchConfig`]: Parameters of the batch validation of existing guesses
//! - [`ProgramConfig`]: External program commands and Gaussian route settings
//!
//! Every struct has a `Default` carrying the established values. They can be
//! overridden from `opents_config.cfg` (see [`settings`](crate::settings)) or
//! from the command line.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Relative tolerances tried, in order, when matching IRC endpoints.
pub const DEFAULT_IRC_TOLERANCES: [f64; 5] = [0.30, 0.25, 0.20, 0.15, 0.10];

/// Thresholds of the TS validity decision.
///
/// # Default Values
///
/// - `factor`: 1.05 (bond-length intermediacy margin)
/// - `disp_cutoff`: 0.5 A (minimum delta-mode value of an extra bond)
/// - `active_cutoff_ratio`: 2.0 (active bonds need `2 * disp_cutoff`)
/// - `freq_cutoff`: 50 cm^-1 (frequency must be below `-freq_cutoff`)
/// - `max_atom_disp`: 99.9 A (per-atom displacement ceiling, effectively inactive)
/// - `graph_tolerance`: 0.25 (relative tolerance of bond perception)
///
/// # Examples
///
/// ```
/// use opents::config::ValidationParams;
///
/// let params = ValidationParams { freq_cutoff: 150.0, ..Default::default() };
/// assert_eq!(params.factor, 1.05);
/// assert_eq!(params.active_cutoff(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationParams {
    /// Multiplier applied to reactant/product bond lengths in the intermediacy check
    pub factor: f64,
    /// Displacement cutoff for extra (spectator) bonds in Angstroms
    pub disp_cutoff: f64,
    /// Ratio between the active-bond and extra-bond cutoffs
    pub active_cutoff_ratio: f64,
    /// Imaginary frequency threshold in cm^-1 (positive number)
    pub freq_cutoff: f64,
    /// Maximum displacement of any atom along the mode in Angstroms
    pub max_atom_disp: f64,
    /// Relative tolerance used when inferring bond graphs
    pub graph_tolerance: f64,
    /// Charge of the reacting system
    pub charge: i32,
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self {
            factor: 1.05,
            disp_cutoff: 0.5,
            active_cutoff_ratio: 2.0,
            freq_cutoff: 50.0,
            max_atom_disp: 99.9,
            graph_tolerance: crate::graph::DEFAULT_REL_TOLERANCE,
            charge: 0,
        }
    }
}

impl ValidationParams {
    /// Threshold an active (forming/breaking) bond must reach.
    pub fn active_cutoff(&self) -> f64 {
        self.active_cutoff_ratio * self.disp_cutoff
    }
}

/// External program commands and Gaussian route settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Gaussian executable (e.g. "g16")
    pub gaussian: String,
    /// xtb executable
    pub xtb: String,
    /// Executable producing TS guesses for a reaction and reactive complex factor
    pub guess_generator: String,
    /// Electronic structure method (e.g. "UB3LYP", or `external="..."`)
    pub method: String,
    /// Basis set, ignored for `external` methods
    pub basis_set: String,
    /// Route keywords of the TS optimization + frequency job
    pub ts_keywords: String,
    /// Memory for Gaussian jobs (e.g. "16GB")
    pub mem: String,
    /// Processor count for Gaussian jobs
    pub nprocs: usize,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            gaussian: "g16".to_string(),
            xtb: "xtb".to_string(),
            guess_generator: "ts-guess".to_string(),
            method: "UB3LYP".to_string(),
            basis_set: "6-31G(d,p)".to_string(),
            ts_keywords: "opt=(calcfc,ts,noeigen) freq=noraman".to_string(),
            mem: "16GB".to_string(),
            nprocs: 8,
        }
    }
}

impl ProgramConfig {
    /// True when the method delegates energies to an external script.
    pub fn is_external_method(&self) -> bool {
        self.method.contains("external")
    }

    /// Level of theory for the route line: `method/basis`, or the bare
    /// method for `external` methods.
    pub fn level_of_theory(&self) -> String {
        if self.is_external_method() {
            self.method.clone()
        } else {
            format!("{}/{}", self.method, self.basis_set)
        }
    }
}

/// Parameters of the batch TS search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Directory holding one working directory per reaction
    pub target_dir: PathBuf,
    /// Reactive complex factors tried, in order, for intramolecular reactions
    pub intra_factors: Vec<f64>,
    /// Reactive complex factors tried, in order, for intermolecular reactions
    pub inter_factors: Vec<f64>,
    /// Attempts per reactive complex factor
    pub attempts_per_factor: usize,
    /// Solvent for implicit solvation, if any
    pub solvent: Option<String>,
    /// Worker count; `None` uses the full host parallelism
    pub workers: Option<usize>,
    /// Decision thresholds applied to every candidate
    pub validation: ValidationParams,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("work_dir"),
            intra_factors: vec![1.2, 1.3, 1.8],
            inter_factors: vec![2.5, 1.8, 2.8, 1.3],
            attempts_per_factor: 3,
            solvent: None,
            workers: None,
            validation: ValidationParams {
                freq_cutoff: 150.0,
                ..ValidationParams::default()
            },
        }
    }
}

/// Parameters of the batch validation of pre-generated TS guesses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationBatchConfig {
    /// Directory holding `final_outputs_reaction_<id>` folders
    pub input_dir: PathBuf,
    /// Directory receiving one working directory per reaction
    pub output_dir: PathBuf,
    /// Solvent for implicit solvation, if any
    pub solvent: Option<String>,
    /// Worker count; `None` uses half the host parallelism
    pub workers: Option<usize>,
    /// Decision thresholds
    pub validation: ValidationParams,
}

impl Default for ValidationBatchConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("final_work_dir"),
            output_dir: PathBuf::from("validation_dir"),
            solvent: None,
            workers: None,
            validation: ValidationParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.intra_factors, vec![1.2, 1.3, 1.8]);
        assert_eq!(config.inter_factors, vec![2.5, 1.8, 2.8, 1.3]);
        assert_eq!(config.attempts_per_factor, 3);
        assert_eq!(config.validation.freq_cutoff, 150.0);
    }

    #[test]
    fn test_external_method_detection() {
        let mut programs = ProgramConfig::default();
        assert!(!programs.is_external_method());
        assert_eq!(programs.level_of_theory(), "UB3LYP/6-31G(d,p)");
        programs.method = r#"external="/opt/xtb_external.py""#.to_string();
        assert!(programs.is_external_method());
        assert_eq!(programs.level_of_theory(), programs.method);
    }

    #[test]
    fn test_validation_params_roundtrip_through_json() {
        let params = ValidationParams {
            charge: -1,
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: ValidationParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
