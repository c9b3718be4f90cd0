//! Reactions and their outcomes.
//!
//! A reaction list is a plain-text file with one `id,reaction_smiles` entry per
//! line:
//!
//! ```text
//! id,rxn_smiles
//! # comments and blank lines are ignored
//! 0,[H][H].[F]>>[H].[H][F]
//! 1,C=CC=C.C=C>>C1=CCCCC1
//! ```
//!
//! A header line whose second field contains `smiles` is skipped.

use crate::parser::{ParseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// One reaction of a batch, owned by exactly one worker for its lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionTask {
    /// Reaction identifier
    pub id: String,
    /// Reaction SMILES (`reactants>>products`)
    pub smiles: String,
    /// Implicit solvent, if any
    pub solvent: Option<String>,
    /// Working directory of this reaction
    pub workdir: PathBuf,
}

impl ReactionTask {
    /// True when the reactant side is a single fragment.
    ///
    /// # Examples
    ///
    /// ```
    /// use opents::reaction::ReactionTask;
    ///
    /// let mut task = ReactionTask {
    ///     id: "0".into(),
    ///     smiles: "C=CCC=O>>C1CC1C=O".into(),
    ///     solvent: None,
    ///     workdir: "work/reaction_0".into(),
    /// };
    /// assert!(task.is_intramolecular());
    ///
    /// task.smiles = "C=C.C=CC=C>>C1=CCCCC1".into();
    /// assert!(!task.is_intramolecular());
    /// ```
    pub fn is_intramolecular(&self) -> bool {
        let reactants = self.smiles.split(">>").next().unwrap_or_default();
        !reactants.contains('.')
    }
}

/// Final classification of one reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReactionOutcome {
    /// A TS was accepted for the reaction
    Validated(String),
    /// Every attempt was rejected or failed
    Failed(String, String),
}

impl ReactionOutcome {
    /// Identifier of the reaction
    pub fn reaction_id(&self) -> &str {
        match self {
            ReactionOutcome::Validated(id) | ReactionOutcome::Failed(id, _) => id,
        }
    }

    /// True for [`ReactionOutcome::Validated`]
    pub fn is_validated(&self) -> bool {
        matches!(self, ReactionOutcome::Validated(_))
    }
}

/// Parses a reaction list into `(id, smiles)` pairs.
///
/// Identifiers must be unique: each one names its own working directory.
pub fn parse_reaction_list(text: &str) -> Result<Vec<(String, String)>> {
    let mut reactions = Vec::new();
    let mut seen = HashSet::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (id, smiles) = line.split_once(',').ok_or_else(|| {
            ParseError::Format(format!("line {}: expected 'id,reaction_smiles'", line_no + 1))
        })?;
        let (id, smiles) = (id.trim(), smiles.trim());
        if smiles.to_lowercase().contains("smiles") {
            continue;
        }
        if id.is_empty() || !smiles.contains(">>") {
            return Err(ParseError::Format(format!(
                "line {}: invalid reaction entry '{}'",
                line_no + 1,
                line
            )));
        }
        if !seen.insert(id) {
            return Err(ParseError::Format(format!(
                "line {}: duplicate reaction id '{}'",
                line_no + 1,
                id
            )));
        }
        reactions.push((id.to_string(), smiles.to_string()));
    }
    Ok(reactions)
}

/// Reads a reaction list file, see [`parse_reaction_list`].
pub fn read_reaction_list(path: &Path) -> Result<Vec<(String, String)>> {
    let content = fs::read_to_string(path)?;
    parse_reaction_list(&content)
}
