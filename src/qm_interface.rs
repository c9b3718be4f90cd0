//! External program interfaces.
//!
//! Every external program runs as a blocking subprocess whose working
//! directory is set explicitly with [`Command::current_dir`]; the process-wide
//! working directory is never changed, so several reactions can run side by
//! side in one process.
//!
//! # Supported Programs
//!
//! - **Gaussian**: TS optimization + frequency jobs and IRC jobs
//! - **xtb**: Endpoint re-optimization under a confining wall potential
//! - **Guess generator**: Any executable that writes `*ts_guess*.xyz` files
//!   plus the reactant/product geometries for a reaction SMILES
//!
//! # Error Handling
//!
//! All operations return a [`QMError`]:
//! - `Io`: File system errors
//! - `Calculation`: The program could not be started or exited abnormally
//! - `MissingOutput`: The program exited normally but an expected file is absent
//! - `Parse`: Output could not be interpreted

use crate::geometry::Geometry;
use crate::io;
use crate::irc::EndpointOptimizer;
use crate::naming::is_ts_guess_file;
use crate::parser::{self, ParseError};
use log::debug;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use thiserror::Error;

/// Error type for external program operations.
#[derive(Error, Debug)]
pub enum QMError {
    /// File system or I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// External program could not be started or exited abnormally
    #[error("External calculation failed: {0}")]
    Calculation(String),
    /// Program finished but did not produce an expected file
    #[error("Expected output not produced: {}", .0.display())]
    MissingOutput(PathBuf),
    /// Failed to parse program output
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Type alias for QM operation results
pub type Result<T> = std::result::Result<T, QMError>;

/// Runs a prepared command, mapping spawn failures and non-zero exits to
/// [`QMError::Calculation`].
fn run_checked(command: &mut Command, program: &str) -> Result<Output> {
    debug!("Running {:?}", command);
    let output = command
        .output()
        .map_err(|e| QMError::Calculation(format!("failed to start '{}': {}", program, e)))?;

    if !output.status.success() {
        return Err(QMError::Calculation(format!(
            "'{}' exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}

/// Directory a file lives in, `.` for bare file names.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Route, resources and molecular specification of a Gaussian job.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianJob {
    /// Checkpoint file name, if any
    pub checkpoint: Option<String>,
    /// `%NProc`; omitted when `None`
    pub nprocs: Option<usize>,
    /// `%Mem`; omitted when `None`
    pub mem: Option<String>,
    /// Route line without the leading `#`
    pub route: String,
    /// Title section
    pub title: String,
    /// Total charge
    pub charge: i32,
    /// Spin multiplicity
    pub multiplicity: u32,
}

impl GaussianJob {
    /// Renders the complete input deck for `geom`.
    ///
    /// # Examples
    ///
    /// ```
    /// use opents::geometry::Geometry;
    /// use opents::qm_interface::GaussianJob;
    ///
    /// let job = GaussianJob {
    ///     checkpoint: None,
    ///     nprocs: Some(8),
    ///     mem: Some("16GB".into()),
    ///     route: "UB3LYP/6-31G(d,p) opt=(calcfc,ts,noeigen) freq=noraman".into(),
    ///     title: "Title".into(),
    ///     charge: 0,
    ///     multiplicity: 1,
    /// };
    /// let geom = Geometry::new(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0]);
    /// let deck = job.render(&geom);
    ///
    /// assert!(deck.starts_with("%NProc=8\n%Mem=16GB\n# UB3LYP/6-31G(d,p)"));
    /// assert!(deck.contains("\n0 1\nH 0.000000 0.000000 0.000000\n"));
    /// assert!(deck.ends_with("\n\n"));
    /// ```
    pub fn render(&self, geom: &Geometry) -> String {
        let mut content = String::new();
        if let Some(chk) = &self.checkpoint {
            content.push_str(&format!("%Chk={}\n", chk));
        }
        if let Some(nprocs) = self.nprocs {
            content.push_str(&format!("%NProc={}\n", nprocs));
        }
        if let Some(mem) = &self.mem {
            content.push_str(&format!("%Mem={}\n", mem));
        }
        content.push_str(&format!("# {}\n\n{}\n\n{} {}\n", self.route, self.title, self.charge, self.multiplicity));

        for i in 0..geom.num_atoms {
            let coords = geom.get_atom_coords(i);
            content.push_str(&format!(
                "{} {:.6} {:.6} {:.6}\n",
                geom.elements[i], coords[0], coords[1], coords[2]
            ));
        }

        content.push('\n');
        content
    }
}

/// Gaussian program interface.
///
/// # Examples
///
/// ```
/// use opents::qm_interface::GaussianInterface;
///
/// let g16 = GaussianInterface::new("g16".to_string());
/// assert_eq!(g16.command, "g16");
/// ```
#[derive(Debug, Clone)]
pub struct GaussianInterface {
    /// Gaussian command to execute (e.g., "g16", "g09")
    pub command: String,
}

impl GaussianInterface {
    /// Creates a new Gaussian interface.
    pub fn new(command: String) -> Self {
        Self { command }
    }

    /// Writes the input deck of `job` for `geom` to `path`.
    pub fn write_input(&self, geom: &Geometry, job: &GaussianJob, path: &Path) -> Result<()> {
        fs::write(path, job.render(geom))?;
        Ok(())
    }

    /// Runs Gaussian on `input_path` inside the input's directory.
    ///
    /// # Returns
    ///
    /// The path of the log file (`<input stem>.log`).
    pub fn run_calculation(&self, input_path: &Path) -> Result<PathBuf> {
        let workdir = parent_dir(input_path);
        let file_name = input_path
            .file_name()
            .ok_or_else(|| QMError::Calculation(format!("invalid input path {}", input_path.display())))?;

        run_checked(
            Command::new(&self.command)
                .arg(file_name)
                .current_dir(workdir)
                .stdout(Stdio::null()),
            &self.command,
        )?;

        let log = input_path.with_extension("log");
        if !log.is_file() {
            return Err(QMError::MissingOutput(log));
        }
        Ok(log)
    }
}

/// Contents of the xtb detailed input restraining atoms to a sphere.
const XTB_WALL_INPUT: &str = "$wall\n   potential=logfermi\n   sphere: auto, all\n$end\n";

/// xtb interface used to re-optimize IRC endpoints.
///
/// The optimization runs with a logfermi wall potential around the whole
/// system, which keeps fragments from drifting apart.
#[derive(Debug, Clone)]
pub struct XtbInterface {
    /// xtb executable
    pub command: String,
}

impl XtbInterface {
    /// Creates a new xtb interface.
    ///
    /// # Examples
    ///
    /// ```
    /// use opents::qm_interface::XtbInterface;
    ///
    /// let xtb = XtbInterface::new("xtb".to_string());
    /// ```
    pub fn new(command: String) -> Self {
        Self { command }
    }

    /// Command-line arguments after the input and geometry files.
    fn optimization_args(charge: i32, multiplicity: u32, solvent: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "--opt".to_string(),
            "--cma".to_string(),
            "--charge".to_string(),
            charge.to_string(),
        ];
        if multiplicity == 2 {
            args.push("--uhf".to_string());
            args.push("1".to_string());
        }
        if let Some(solvent) = solvent {
            args.push("--alpb".to_string());
            args.push(solvent.to_string());
        }
        args
    }
}

impl EndpointOptimizer for XtbInterface {
    fn optimize(&self, xyz: &Path, charge: i32, multiplicity: u32, solvent: Option<&str>) -> Result<PathBuf> {
        let workdir = parent_dir(xyz);
        let input = workdir.join("xtb.inp");
        fs::write(&input, XTB_WALL_INPUT)?;

        let output_path = xyz.with_extension("out");
        let stdout = File::create(&output_path)?;
        let file_name = xyz
            .file_name()
            .ok_or_else(|| QMError::Calculation(format!("invalid geometry path {}", xyz.display())))?;

        run_checked(
            Command::new(&self.command)
                .arg("--input")
                .arg("xtb.inp")
                .arg(file_name)
                .args(Self::optimization_args(charge, multiplicity, solvent))
                .current_dir(workdir)
                .stdout(Stdio::from(stdout))
                .stderr(Stdio::null()),
            &self.command,
        )?;

        let text = fs::read_to_string(&output_path)?;
        let geometry = parser::extract_final_structure(&text)?;

        let stem = xyz
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("endpoint");
        let optimized = workdir.join(format!("{}_opt.xyz", stem));
        io::write_xyz(&geometry, "xtb optimized", &optimized)?;
        Ok(optimized)
    }
}

/// Runs the external TS-guess generator for one reaction.
///
/// The generator is invoked as
///
/// ```text
/// <command> --reaction-smiles <smiles> --reactive-complex-factor <f>
///           --output-dir <dir> [--solvent <solvent>]
/// ```
///
/// and must leave `reactants_geometry.xyz`, `products_geometry.xyz` and one or
/// more `*ts_guess*.xyz` files in `<dir>`.
#[derive(Debug, Clone)]
pub struct GuessGenerator {
    /// Generator executable
    pub command: String,
}

impl GuessGenerator {
    /// Creates a new generator interface.
    pub fn new(command: String) -> Self {
        Self { command }
    }

    /// Generates TS guesses into `output_dir`.
    ///
    /// # Returns
    ///
    /// The generated guess files, sorted by name.
    pub fn generate(
        &self,
        reaction_smiles: &str,
        factor: f64,
        solvent: Option<&str>,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(output_dir)?;

        let mut command = Command::new(&self.command);
        command
            .arg("--reaction-smiles")
            .arg(reaction_smiles)
            .arg("--reactive-complex-factor")
            .arg(factor.to_string())
            .arg("--output-dir")
            .arg(".")
            .current_dir(output_dir);
        if let Some(solvent) = solvent {
            command.arg("--solvent").arg(solvent);
        }
        run_checked(&mut command, &self.command)?;

        let mut guesses: Vec<PathBuf> = fs::read_dir(output_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_ts_guess_file(path))
            .collect();
        guesses.sort();
        Ok(guesses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xtb_arguments() {
        assert_eq!(
            XtbInterface::optimization_args(0, 1, None),
            vec!["--opt", "--cma", "--charge", "0"]
        );
        assert_eq!(
            XtbInterface::optimization_args(-1, 2, Some("water")),
            vec!["--opt", "--cma", "--charge", "-1", "--uhf", "1", "--alpb", "water"]
        );
    }

    #[test]
    fn test_missing_program_is_a_calculation_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("job.com");
        fs::write(&input, "").unwrap();

        let gaussian = GaussianInterface::new("opents-no-such-program".to_string());
        assert!(matches!(gaussian.run_calculation(&input), Err(QMError::Calculation(_))));
    }

    #[test]
    fn test_render_with_checkpoint_and_without_resources() {
        let job = GaussianJob {
            checkpoint: Some("irc_forward.chk".into()),
            nprocs: None,
            mem: None,
            route: "p IRC(calcfc, maxpoint=50, stepsize=15, Forward) external=\"run.py\"".into(),
            title: "IRC Calculation".into(),
            charge: 1,
            multiplicity: 2,
        };
        let geom = Geometry::new(vec!["H".into()], vec![0.0, 0.0, 0.0]);
        let deck = job.render(&geom);

        assert!(deck.starts_with("%Chk=irc_forward.chk\n# p IRC("));
        assert!(!deck.contains("%NProc"));
        assert!(deck.contains("\n\nIRC Calculation\n\n1 2\n"));
    }
}
