#![warn(missing_docs)]

//! opents - Transition State Validation and Batch Search
//!
//! opents decides whether a transition-state (TS) guess connects a given
//! reactant and product, and drives batch TS searches and validations over
//! reaction lists with external quantum chemistry programs.
//!
//! # Overview
//!
//! A TS guess is accepted when its lowest vibrational mode:
//!
//! 1. Is imaginary enough (frequency below `-freq_cutoff`)
//! 2. Only stretches or compresses bonds that are formed or broken in the reaction
//! 3. Moves at least one of those active bonds
//! 4. Moves all forming bonds in one direction and all breaking bonds in one direction
//!
//! and its active bond lengths lie between the reactant and product values.
//!
//! # Algorithm
//!
//! The TS geometry is displaced forward and backward along the raw mode
//! displacement vector, as printed by the frequency calculation. For every atom pair the difference of the two displaced distance
//! matrices gives the delta-mode value:
//!
//! ```text
//! delta(i, j) = d_forward(i, j) - d_backward(i, j)
//! ```
//!
//! Pairs bonded in the reactant or the product are sorted into active
//! (forming/breaking) and extra (spectator) bonds by comparing `|delta|` with
//! the extra and active cutoffs.
//!
//! # Quick Start
//!
//! ```no_run
//! use opents::config::ValidationParams;
//! use opents::validation::validate_ts_guess;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let params = ValidationParams { freq_cutoff: 150.0, ..Default::default() };
//!     let accepted = validate_ts_guess(
//!         Path::new("reaction_0/ts_guess_0.xyz"),
//!         Path::new("reaction_0"),
//!         &params,
//!         None,
//!     )?;
//!     println!("TS guess accepted: {}", accepted);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`geometry`](geometry/index.html) - Molecular geometries and normal modes
//! - [`parser`](parser/index.html) - XYZ, spectrum and Gaussian/xtb output parsing
//! - [`graph`](graph/index.html) - Bond perception and active bond sets
//! - [`classify`](classify/index.html) - Delta-mode bond classification
//! - [`validation`](validation/index.html) - TS validity decision
//! - [`irc`](irc/index.html) - IRC inputs and endpoint reconciliation
//! - [`qm_interface`](qm_interface/index.html) - Gaussian, xtb and guess generator drivers
//! - [`search`](search/index.html) - Per-reaction search state machine
//! - [`batch`](batch/index.html) - Worker pools over reaction lists
//! - [`reaction`](reaction/index.html) - Reaction lists and outcomes
//! - [`naming`](naming/index.html) - File and directory naming
//! - [`io`](io/index.html) - XYZ writing and atomic placement
//! - [`cleanup`](cleanup/index.html) - Scratch cleanup between attempts
//! - [`config`](config/index.html) - Configuration structures
//! - [`settings`](settings/index.html) - INI configuration files
//!
//! # Working Directory Layout
//!
//! ```text
//! work_dir/
//! ├── final_ts_guesses/
//! │   └── <id>_final_ts_guess.xyz
//! └── reaction_<id>/
//!     ├── reactants_geometry.xyz
//!     ├── products_geometry.xyz
//!     ├── g98.out
//!     └── final_outputs/
//! final_work_dir/
//! ├── summary.json
//! └── final_outputs_reaction_<id>/
//! ```

pub mod batch;
pub mod classify;
pub mod cleanup;
pub mod config;
pub mod geometry;
pub mod graph;
pub mod io;
pub mod irc;
pub mod naming;
pub mod parser;
pub mod qm_interface;
pub mod reaction;
pub mod search;
pub mod settings;
pub mod validation;
