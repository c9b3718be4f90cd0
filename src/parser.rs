//! Extraction of geometries and vibrational modes from program output.
//!
//! This module turns raw text into typed records:
//!
//! - [`parse_xyz`]: XYZ geometry blocks (`reactants_geometry.xyz`, TS guesses, ...)
//! - [`read_first_normal_mode`]: the dominant vibrational mode and its frequency,
//!   from either a g98-style frequency file or a Gaussian optimization log
//! - [`extract_stationary_geometry`]: final geometry of a Gaussian TS optimization
//! - [`extract_irc_endpoint`]: terminal geometry of a Gaussian IRC run
//! - [`extract_final_structure`]: optimized geometry from an xtb output
//!
//! # Frequency Blocks
//!
//! Both supported spectrum formats share the Gaussian layout:
//!
//! ```text
//!  Frequencies --   -350.1234               120.5521               400.0012
//!  Red. masses --      1.0843                 1.0000                 1.0000
//!  ...
//!   Atom AN      X      Y      Z        X      Y      Z        X      Y      Z
//!     1   6    -0.01   0.02   0.03     ...
//! ```
//!
//! Only the first column triple (the first, most imaginary mode) is read.
//!
//! Parsing is deterministic: a missing marker or an atom-count mismatch is a
//! [`ParseError`] and is never retried.

use crate::geometry::{atomic_number_to_symbol, Geometry, NormalMode};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Error type for extraction from program output.
#[derive(Error, Debug)]
pub enum ParseError {
    /// I/O error when reading files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// An expected marker line was not found in the text
    #[error("Missing marker '{0}' in program output")]
    MissingMarker(&'static str),
    /// Number of parsed atoms differs from the declared or expected count
    #[error("Atom count mismatch: expected {expected}, found {found}")]
    AtomCountMismatch {
        /// Declared or expected number of atoms
        expected: usize,
        /// Number of atoms actually parsed
        found: usize,
    },
    /// A numeric field could not be parsed
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
    /// Malformed content with descriptive message
    #[error("Format error: {0}")]
    Format(String),
}

/// Type alias for parse operation results
pub type Result<T> = std::result::Result<T, ParseError>;

/// Layout of the file holding the vibrational analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SpectrumFormat {
    /// g98-style frequency file (e.g. `g98.out` written by xtb `--hess`)
    G98,
    /// Gaussian TS optimization log; only the block after the converged
    /// stationary point is considered
    GaussianLog,
}

lazy_static! {
    // Robust floating-point regex: handles 1.23, -0.032, 1.2e-4, .123, etc.
    static ref FLOAT_RE: String = r"[-+]?(?:\d+\.\d*|\.\d+)(?:[eE][-+]?\d+)?".to_string();

    // Mode row: "   1   6    -0.01   0.02   0.03    0.00 ..."
    static ref MODE_ROW_RE: Regex = Regex::new(&format!(
        r"^\s*(\d+)\s+\d+\s+({0})\s+({0})\s+({0})",
        *FLOAT_RE
    )).unwrap();

    // Orientation row: "   1   6   0   -0.032351   0.050284   0.089439"
    static ref ORIENTATION_ROW_RE: Regex = Regex::new(&format!(
        r"^\s*\d+\s+(\d+)\s+\d+\s+({0})\s+({0})\s+({0})\s*$",
        *FLOAT_RE
    )).unwrap();

    // IRC row: "   1   6   -0.032351   0.050284   0.089439"
    static ref IRC_ROW_RE: Regex = Regex::new(&format!(
        r"^\s*\d+\s+(\d+)\s+({0})\s+({0})\s+({0})\s*$",
        *FLOAT_RE
    )).unwrap();

    static ref DASHES_RE: Regex = Regex::new(r"^\s*-{5,}\s*$").unwrap();
}

const FREQUENCIES_MARKER: &str = "Frequencies";
const STATIONARY_MARKER: &str = "-- Stationary point found.";
const HARMONIC_MARKER: &str = "Harmonic frequencies (cm**-1)";
const STANDARD_ORIENTATION_MARKER: &str = "Standard orientation";
const IRC_GEOMETRY_MARKER: &str = "Cartesian Coordinates (Ang):";
const FINAL_STRUCTURE_MARKER: &str = "final structure";

fn parse_f64(token: &str) -> Result<f64> {
    token
        .parse()
        .map_err(|_| ParseError::InvalidNumber(token.to_string()))
}

/// Parses an XYZ geometry block.
///
/// Line 1 holds the atom count, line 2 is a free-text comment and each
/// following non-empty line is `<element> <x> <y> <z>`.
///
/// # Examples
///
/// ```
/// use opents::parser::parse_xyz;
///
/// let geom = parse_xyz("2\nhydrogen\nH 0.0 0.0 0.0\nH 0.74 0.0 0.0\n").unwrap();
/// assert_eq!(geom.num_atoms, 2);
/// assert_eq!(geom.elements, vec!["H", "H"]);
/// ```
pub fn parse_xyz(text: &str) -> Result<Geometry> {
    let mut lines = text.lines();
    let count_line = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .ok_or(ParseError::MissingMarker("atom count"))?;
    let expected: usize = count_line
        .trim()
        .parse()
        .map_err(|_| ParseError::Format(format!("Invalid XYZ atom count line '{}'", count_line.trim())))?;

    // Comment line
    lines.next();

    let mut elements = Vec::with_capacity(expected);
    let mut coords = Vec::with_capacity(expected * 3);
    for line in lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if parts.len() < 4 {
            return Err(ParseError::Format(format!("Malformed XYZ atom line '{}'", line.trim())));
        }
        elements.push(parts[0].to_string());
        for token in &parts[1..4] {
            coords.push(parse_f64(token)?);
        }
    }

    if elements.len() != expected {
        return Err(ParseError::AtomCountMismatch {
            expected,
            found: elements.len(),
        });
    }
    Ok(Geometry::new(elements, coords))
}

/// Reads and parses an XYZ file.
pub fn read_xyz(path: &Path) -> Result<Geometry> {
    let content = fs::read_to_string(path)?;
    parse_xyz(&content)
}

/// Extracts the first normal mode and its frequency.
///
/// # Arguments
///
/// * `text` - Contents of the frequency file or Gaussian log
/// * `format` - Layout of the text
/// * `num_atoms` - Atom count the mode vector must cover
///
/// # Errors
///
/// - [`ParseError::MissingMarker`] if the frequency block (or, for logs, the
///   converged stationary point) is absent
/// - [`ParseError::AtomCountMismatch`] if the number of mode rows differs from `num_atoms`
///
/// # Examples
///
/// ```
/// use opents::parser::{read_first_normal_mode, SpectrumFormat};
///
/// let text = "\
///  Frequencies --  -512.3456               88.1234               95.0000
///  Red. masses --     1.0000                1.0000                1.0000
///  Frc consts  --     0.1000                0.1000                0.1000
///  IR Inten    --     0.0000                0.0000                0.0000
///  Raman Activ --     0.0000                0.0000                0.0000
///  Depolar     --     0.0000                0.0000                0.0000
///  Atom AN      X      Y      Z        X      Y      Z        X      Y      Z
///    1   1    -0.50   0.00   0.00     0.00   0.00   1.00     0.00   1.00   0.00
///    2   1     0.50   0.00   0.00     0.00   0.00  -1.00     0.00  -1.00   0.00
/// ";
/// let mode = read_first_normal_mode(text, SpectrumFormat::G98, 2).unwrap();
/// assert_eq!(mode.frequency, -512.3456);
/// assert_eq!(mode.displacements.as_slice(), &[-0.5, 0.0, 0.0, 0.5, 0.0, 0.0]);
/// ```
pub fn read_first_normal_mode(text: &str, format: SpectrumFormat, num_atoms: usize) -> Result<NormalMode> {
    let lines: Vec<&str> = text.lines().collect();
    let lines = match format {
        SpectrumFormat::G98 => &lines[..],
        SpectrumFormat::GaussianLog => truncate_to_final_frequencies(&lines)?,
    };

    let freq_idx = lines
        .iter()
        .position(|l| l.contains(FREQUENCIES_MARKER))
        .ok_or(ParseError::MissingMarker(FREQUENCIES_MARKER))?;
    let frequency = lines[freq_idx]
        .split("--")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| ParseError::Format(format!("No value on frequency line '{}'", lines[freq_idx].trim())))
        .and_then(parse_f64)?;

    let header_idx = lines[freq_idx..]
        .iter()
        .position(|l| l.trim_start().starts_with("Atom"))
        .map(|offset| freq_idx + offset)
        .ok_or(ParseError::MissingMarker("Atom AN"))?;

    let mut displacements = Vec::with_capacity(num_atoms * 3);
    for line in &lines[header_idx + 1..] {
        match MODE_ROW_RE.captures(line) {
            Some(caps) => {
                for k in 2..=4 {
                    displacements.push(parse_f64(&caps[k])?);
                }
            }
            None => break,
        }
    }

    let found = displacements.len() / 3;
    if found != num_atoms {
        return Err(ParseError::AtomCountMismatch {
            expected: num_atoms,
            found,
        });
    }
    Ok(NormalMode::new(frequency, displacements))
}

/// Reads a spectrum file from disk, see [`read_first_normal_mode`].
pub fn read_spectrum_file(path: &Path, format: SpectrumFormat, num_atoms: usize) -> Result<NormalMode> {
    let content = fs::read_to_string(path)?;
    read_first_normal_mode(&content, format, num_atoms)
}

/// Keeps only the frequency analysis that follows the last converged stationary point.
fn truncate_to_final_frequencies<'a>(lines: &'a [&'a str]) -> Result<&'a [&'a str]> {
    let stationary = lines
        .iter()
        .rposition(|l| l.contains(STATIONARY_MARKER))
        .ok_or(ParseError::MissingMarker(STATIONARY_MARKER))?;
    let harmonic = lines[stationary..]
        .iter()
        .position(|l| l.contains(HARMONIC_MARKER))
        .ok_or(ParseError::MissingMarker(HARMONIC_MARKER))?;
    Ok(&lines[stationary + harmonic..])
}

/// Collects the last complete coordinate block introduced by `marker`.
///
/// Rows are matched by `row_re` (captures: atomic number, x, y, z); a block ends
/// at the first dashed rule after at least one row.
fn last_coordinate_block(
    lines: &[&str],
    marker: &str,
    row_re: &Regex,
) -> Result<Option<(Vec<String>, Vec<f64>)>> {
    let mut last = None;
    let mut current: Option<(Vec<String>, Vec<f64>)> = None;

    for line in lines {
        if line.contains(marker) {
            current = Some((Vec::new(), Vec::new()));
            continue;
        }
        let Some((elements, coords)) = current.as_mut() else {
            continue;
        };
        if let Some(caps) = row_re.captures(line) {
            let atomic_num: usize = caps[1]
                .parse()
                .map_err(|_| ParseError::InvalidNumber(caps[1].to_string()))?;
            let symbol = atomic_number_to_symbol(atomic_num)
                .ok_or_else(|| ParseError::Format(format!("Unknown atomic number {}", atomic_num)))?;
            elements.push(symbol.to_string());
            for k in 2..=4 {
                coords.push(parse_f64(&caps[k])?);
            }
        } else if DASHES_RE.is_match(line) && !elements.is_empty() {
            last = current.take();
        }
    }
    Ok(last)
}

/// Extracts the converged geometry of a Gaussian TS optimization.
///
/// Uses the last `Standard orientation` block printed after
/// `-- Stationary point found.`.
pub fn extract_stationary_geometry(log_text: &str) -> Result<Geometry> {
    let lines: Vec<&str> = log_text.lines().collect();
    let stationary = lines
        .iter()
        .position(|l| l.contains(STATIONARY_MARKER))
        .ok_or(ParseError::MissingMarker(STATIONARY_MARKER))?;
    let (elements, coords) = last_coordinate_block(&lines[stationary..], STANDARD_ORIENTATION_MARKER, &ORIENTATION_ROW_RE)?
        .ok_or(ParseError::MissingMarker(STANDARD_ORIENTATION_MARKER))?;
    Ok(Geometry::new(elements, coords))
}

/// Extracts the terminal geometry of a Gaussian IRC run.
///
/// The last `Cartesian Coordinates (Ang):` block of the log is the point
/// reached when the path was terminated.
pub fn extract_irc_endpoint(log_text: &str) -> Result<Geometry> {
    let lines: Vec<&str> = log_text.lines().collect();
    let (elements, coords) = last_coordinate_block(&lines, IRC_GEOMETRY_MARKER, &IRC_ROW_RE)?
        .ok_or(ParseError::MissingMarker(IRC_GEOMETRY_MARKER))?;
    Ok(Geometry::new(elements, coords))
}

/// Extracts the optimized geometry from an xtb optimization output.
///
/// Reads the `final structure` block: atom lines `<element> <x> <y> <z>` up to
/// the first blank line. Count and comment lines inside the block are skipped.
pub fn extract_final_structure(xtb_output: &str) -> Result<Geometry> {
    let mut found = false;
    let mut elements = Vec::new();
    let mut coords = Vec::new();

    for line in xtb_output.lines() {
        if !found {
            found = line.to_lowercase().contains(FINAL_STRUCTURE_MARKER);
            continue;
        }
        if line.trim().is_empty() {
            if elements.is_empty() {
                continue;
            }
            break;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let is_atom_line = parts.len() == 4
            && parts[0].chars().all(|c| c.is_ascii_alphabetic())
            && parts[1..].iter().all(|t| t.parse::<f64>().is_ok());
        if is_atom_line {
            elements.push(parts[0].to_string());
            for token in &parts[1..] {
                coords.push(parse_f64(token)?);
            }
        }
    }

    if !found {
        return Err(ParseError::MissingMarker(FINAL_STRUCTURE_MARKER));
    }
    if elements.is_empty() {
        return Err(ParseError::Format("Empty final structure block in xtb output".into()));
    }
    Ok(Geometry::new(elements, coords))
}
