//! File and directory naming for reaction working directories.
//!
//! Every reaction owns a working directory and a handful of well-known files.
//! This module centralizes those names so that the search orchestrator, the
//! validation orchestrator and the decision engine agree on the layout:
//!
//! ```text
//! <target>/
//! ├── final_ts_guesses/
//! │   └── <id>_final_ts_guess.xyz
//! └── reaction_<id>/
//!     ├── reactants_geometry.xyz
//!     ├── products_geometry.xyz
//!     ├── g98.out
//!     └── final_outputs/
//! final_<target>/
//! └── final_outputs_reaction_<id>/
//! ```
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use opents::naming::ReactionNaming;
//!
//! let naming = ReactionNaming::new("R7");
//! assert_eq!(naming.workdir(Path::new("work")), Path::new("work/reaction_R7"));
//! assert_eq!(naming.final_ts_guess(), "R7_final_ts_guess.xyz");
//! assert_eq!(naming.final_outputs_dir(), "final_outputs_reaction_R7");
//! ```

use std::path::{Path, PathBuf};

/// Reactant geometry file inside a reaction working directory.
pub const REACTANTS_XYZ: &str = "reactants_geometry.xyz";
/// Product geometry file inside a reaction working directory.
pub const PRODUCTS_XYZ: &str = "products_geometry.xyz";
/// Default vibrational-analysis output co-located with a TS candidate.
pub const SPECTRUM_FILE: &str = "g98.out";
/// Shared collection directory of accepted TS guesses.
pub const FINAL_TS_GUESSES_DIR: &str = "final_ts_guesses";
/// Per-reaction directory holding the accepted TS guess and its endpoints.
pub const FINAL_OUTPUTS_DIR: &str = "final_outputs";
/// Aggregate statistics written into a results directory.
pub const SUMMARY_FILE: &str = "summary.json";

/// Names derived from a reaction identifier.
#[derive(Debug, Clone)]
pub struct ReactionNaming {
    reaction_id: String,
}

impl ReactionNaming {
    /// Creates naming helpers for one reaction.
    pub fn new(reaction_id: &str) -> Self {
        Self {
            reaction_id: reaction_id.to_string(),
        }
    }

    /// Returns the reaction identifier
    pub fn reaction_id(&self) -> &str {
        &self.reaction_id
    }

    /// Working directory name
    ///
    /// Format: `reaction_{id}`
    pub fn workdir_name(&self) -> String {
        format!("reaction_{}", self.reaction_id)
    }

    /// Working directory below `target`
    pub fn workdir(&self, target: &Path) -> PathBuf {
        target.join(self.workdir_name())
    }

    /// Name of the accepted TS guess in the shared collection
    ///
    /// Format: `{id}_final_ts_guess.xyz`
    pub fn final_ts_guess(&self) -> String {
        format!("{}_final_ts_guess.xyz", self.reaction_id)
    }

    /// Results directory of this reaction
    ///
    /// Format: `final_outputs_reaction_{id}`
    pub fn final_outputs_dir(&self) -> String {
        format!("final_outputs_reaction_{}", self.reaction_id)
    }
}

/// Results directory collecting the successful reactions of `target`.
///
/// Format: `final_{target file name}`, placed next to `target`.
pub fn results_dir(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("work_dir");
    let results = format!("final_{}", name);
    match target.parent() {
        Some(parent) => parent.join(results),
        None => PathBuf::from(results),
    }
}

/// True for candidate TS geometry files (`*ts_guess*.xyz`).
pub fn is_ts_guess_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|s| s.to_str()) {
        Some(name) => name,
        None => return false,
    };
    name.contains("ts_guess") && name.ends_with(".xyz")
}
