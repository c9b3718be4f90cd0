//! Per-reaction TS search.
//!
//! For one reaction the search walks an ordered list of reactive complex
//! factors and makes a bounded number of attempts per factor. Each attempt
//! generates TS guesses, refines them and hands the refined candidates to the
//! [`TsValidator`]. The search is a small state machine:
//!
//! ```text
//! TryNextFactor --(Validated)--> Found
//!      |  ^
//!      |  +--(Rejected / Errored, attempts left or next factor)
//!      +--(no factors left)--> Exhausted
//! ```
//!
//! Errors never leave an attempt: they are logged and the search advances.

use crate::cleanup::ScratchCleaner;
use crate::config::{ProgramConfig, SearchConfig};
use crate::geometry::Geometry;
use crate::graph::BondPerception;
use crate::io;
use crate::naming::{ReactionNaming, FINAL_OUTPUTS_DIR, FINAL_TS_GUESSES_DIR, PRODUCTS_XYZ, REACTANTS_XYZ};
use crate::parser::extract_stationary_geometry;
use crate::qm_interface::{GaussianInterface, GaussianJob, GuessGenerator};
use crate::reaction::{ReactionOutcome, ReactionTask};
use crate::validation::{FinalGuessTarget, Result, TsCandidate, TsError, TsValidator};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Produces and refines TS candidates for a reaction.
///
/// Implementations must leave `reactants_geometry.xyz` and
/// `products_geometry.xyz` in the task's working directory when generating
/// guesses.
pub trait TsSearchBackend: Send + Sync {
    /// Generates TS guess geometries for one reactive complex factor.
    fn generate_guesses(&self, task: &ReactionTask, factor: f64) -> Result<Vec<PathBuf>>;

    /// Refines a guess into a candidate with a vibrational analysis.
    fn refine(&self, task: &ReactionTask, guess: &Path) -> Result<TsCandidate>;
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A candidate was accepted; holds its geometry file
    Validated(PathBuf),
    /// Every candidate of the attempt was rejected
    Rejected,
    /// The attempt failed before any candidate could be judged
    Errored(TsError),
}

/// State of the per-reaction search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchState {
    /// The factor at `index` is next
    TryNextFactor {
        /// Position in the factor list
        index: usize,
    },
    /// A candidate was accepted
    Found {
        /// Reactive complex factor of the successful attempt
        factor: f64,
        /// 1-based attempt number within that factor
        attempt: usize,
        /// Accepted geometry file
        ts_guess: PathBuf,
    },
    /// All factors and attempts were used up
    Exhausted,
}

/// Runs the search state machine.
///
/// `attempt(factor, n)` is called for `n = 1..=attempts_per_factor` for each
/// factor in order, until it returns [`AttemptOutcome::Validated`].
///
/// # Examples
///
/// ```
/// use opents::search::{search_reaction, AttemptOutcome, SearchState};
///
/// let state = search_reaction(&[1.2, 1.3, 1.8], 3, |factor, n| {
///     if factor == 1.3 && n == 2 {
///         AttemptOutcome::Validated("ts_guess.xyz".into())
///     } else {
///         AttemptOutcome::Rejected
///     }
/// });
/// assert_eq!(
///     state,
///     SearchState::Found { factor: 1.3, attempt: 2, ts_guess: "ts_guess.xyz".into() }
/// );
/// ```
pub fn search_reaction<F>(factors: &[f64], attempts_per_factor: usize, mut attempt: F) -> SearchState
where
    F: FnMut(f64, usize) -> AttemptOutcome,
{
    let mut state = SearchState::TryNextFactor { index: 0 };
    loop {
        state = match state {
            SearchState::TryNextFactor { index } => match factors.get(index) {
                None => SearchState::Exhausted,
                Some(&factor) => {
                    let mut next = SearchState::TryNextFactor { index: index + 1 };
                    for n in 1..=attempts_per_factor {
                        match attempt(factor, n) {
                            AttemptOutcome::Validated(ts_guess) => {
                                next = SearchState::Found {
                                    factor,
                                    attempt: n,
                                    ts_guess,
                                };
                                break;
                            }
                            AttemptOutcome::Rejected => debug!("Factor {} attempt {}: no valid TS", factor, n),
                            AttemptOutcome::Errored(e) => warn!("Factor {} attempt {} failed: {}", factor, n, e),
                        }
                    }
                    next
                }
            },
            terminal => return terminal,
        }
    }
}

/// Drives the search for single reactions.
pub struct TsSearcher<'a, B: TsSearchBackend + ?Sized, P: BondPerception> {
    backend: &'a B,
    validator: &'a TsValidator<P>,
    config: &'a SearchConfig,
    cleaner: &'a ScratchCleaner,
}

impl<'a, B: TsSearchBackend + ?Sized, P: BondPerception> TsSearcher<'a, B, P> {
    /// Creates a searcher from its collaborators.
    pub fn new(
        backend: &'a B,
        validator: &'a TsValidator<P>,
        config: &'a SearchConfig,
        cleaner: &'a ScratchCleaner,
    ) -> Self {
        Self {
            backend,
            validator,
            config,
            cleaner,
        }
    }

    /// Factors to try for `task`.
    pub fn factors_for(&self, task: &ReactionTask) -> &'a [f64] {
        if task.is_intramolecular() {
            &self.config.intra_factors
        } else {
            &self.config.inter_factors
        }
    }

    /// Searches a TS for one reaction. Never fails; errors become a
    /// [`ReactionOutcome::Failed`].
    ///
    /// On success, the accepted geometry is placed in the shared
    /// `final_ts_guesses` directory of the target and, together with the
    /// reactant and product, in `<workdir>/final_outputs/`.
    pub fn process_reaction(&self, task: &ReactionTask) -> ReactionOutcome {
        let started = Instant::now();
        if let Err(e) = fs::create_dir_all(&task.workdir) {
            return ReactionOutcome::Failed(task.id.clone(), format!("cannot create working directory: {}", e));
        }

        let final_target = FinalGuessTarget {
            dir: self.config.target_dir.join(FINAL_TS_GUESSES_DIR),
            reaction_id: task.id.clone(),
        };

        let state = search_reaction(self.factors_for(task), self.config.attempts_per_factor, |factor, n| {
            let outcome = match self.attempt(task, factor) {
                AttemptOutcome::Validated(ts_guess) => match finalize(task, &ts_guess, &final_target) {
                    Ok(placed) => AttemptOutcome::Validated(placed),
                    Err(e) => AttemptOutcome::Errored(e),
                },
                outcome => outcome,
            };
            if !matches!(outcome, AttemptOutcome::Validated(_)) {
                if let Err(e) = self.cleaner.clean(&task.workdir) {
                    warn!("Reaction {}: cleanup after attempt {} failed: {}", task.id, n, e);
                }
            }
            outcome
        });

        let elapsed = started.elapsed().as_secs_f64();
        match state {
            SearchState::Found { factor, attempt, .. } => {
                info!(
                    "Final TS guess found for reaction {} with factor {} (attempt {}) in {:.1} s",
                    task.id, factor, attempt, elapsed
                );
                ReactionOutcome::Validated(task.id.clone())
            }
            _ => {
                info!("No TS guess found for reaction {} after {:.1} s", task.id, elapsed);
                ReactionOutcome::Failed(task.id.clone(), "all factors and attempts exhausted".to_string())
            }
        }
    }

    /// One attempt: generate, refine and judge every guess in turn.
    fn attempt(&self, task: &ReactionTask, factor: f64) -> AttemptOutcome {
        let guesses = match self.backend.generate_guesses(task, factor) {
            Ok(guesses) if guesses.is_empty() => {
                return AttemptOutcome::Errored(TsError::MissingInputFile(task.workdir.join("*ts_guess*.xyz")))
            }
            Ok(guesses) => guesses,
            Err(e) => return AttemptOutcome::Errored(e),
        };

        let mut last_error = None;
        let mut judged = false;
        for guess in &guesses {
            let verdict = self
                .backend
                .refine(task, guess)
                .and_then(|candidate| {
                    let verdict = self.validator.validate(&candidate, &task.workdir, None)?;
                    Ok((candidate, verdict))
                });
            match verdict {
                Ok((candidate, verdict)) if verdict.accepted() => {
                    return AttemptOutcome::Validated(candidate.geometry)
                }
                Ok(_) => judged = true,
                Err(e) => {
                    debug!("Reaction {}: guess {} failed: {}", task.id, guess.display(), e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !judged => AttemptOutcome::Errored(e),
            _ => AttemptOutcome::Rejected,
        }
    }
}

/// Copies the accepted geometry and the reactant/product into `<workdir>/final_outputs/`.
///
/// Returns the path of the copied TS geometry.
pub fn collect_final_outputs(task: &ReactionTask, ts_guess: &Path) -> Result<PathBuf> {
    let final_dir = task.workdir.join(FINAL_OUTPUTS_DIR);
    let naming = ReactionNaming::new(&task.id);
    let placed = io::place_atomically(ts_guess, &final_dir, &naming.final_ts_guess())?;
    for name in [REACTANTS_XYZ, PRODUCTS_XYZ] {
        let source = task.workdir.join(name);
        if !source.is_file() {
            return Err(TsError::MissingInputFile(source));
        }
        fs::copy(&source, final_dir.join(name))?;
    }
    Ok(placed)
}

/// Collects the outputs of an accepted guess, then publishes it to the shared
/// `final_ts_guesses` directory.
///
/// Nothing reaches the shared directory when collecting fails.
pub fn finalize(task: &ReactionTask, ts_guess: &Path, target: &FinalGuessTarget) -> Result<PathBuf> {
    let placed = collect_final_outputs(task, ts_guess)?;
    target.place(&placed)?;
    Ok(placed)
}

/// Search backend driving an external guess generator and Gaussian.
///
/// Guesses are generated into the working directory; each guess is refined by
/// a Gaussian TS optimization + frequency job, whose log supplies both the
/// stationary geometry and the spectrum.
#[derive(Debug, Clone)]
pub struct GaussianBackend {
    generator: GuessGenerator,
    gaussian: GaussianInterface,
    programs: ProgramConfig,
    charge: i32,
    multiplicity: u32,
}

impl GaussianBackend {
    /// Creates a backend for a neutral singlet system.
    pub fn new(programs: ProgramConfig) -> Self {
        Self {
            generator: GuessGenerator::new(programs.guess_generator.clone()),
            gaussian: GaussianInterface::new(programs.gaussian.clone()),
            programs,
            charge: 0,
            multiplicity: 1,
        }
    }

    /// Sets charge and multiplicity of the reacting system.
    pub fn with_charge(mut self, charge: i32, multiplicity: u32) -> Self {
        self.charge = charge;
        self.multiplicity = multiplicity;
        self
    }

    fn ts_job(&self, solvent: Option<&str>) -> GaussianJob {
        let mut route = format!("{} {}", self.programs.level_of_theory(), self.programs.ts_keywords);
        if let Some(solvent) = solvent {
            route.push_str(&format!(" SCRF=(Solvent={})", solvent));
        }
        let external = self.programs.is_external_method();
        GaussianJob {
            checkpoint: None,
            nprocs: (!external).then_some(self.programs.nprocs),
            mem: (!external).then(|| self.programs.mem.clone()),
            route,
            title: "Title".to_string(),
            charge: self.charge,
            multiplicity: self.multiplicity,
        }
    }
}

impl TsSearchBackend for GaussianBackend {
    fn generate_guesses(&self, task: &ReactionTask, factor: f64) -> Result<Vec<PathBuf>> {
        Ok(self
            .generator
            .generate(&task.smiles, factor, task.solvent.as_deref(), &task.workdir)?)
    }

    fn refine(&self, task: &ReactionTask, guess: &Path) -> Result<TsCandidate> {
        let geometry: Geometry = crate::parser::read_xyz(guess)?;
        let stem = guess
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("ts_guess");

        let input = task.workdir.join(format!("{}.com", stem));
        self.gaussian
            .write_input(&geometry, &self.ts_job(task.solvent.as_deref()), &input)?;
        let log = self.gaussian.run_calculation(&input)?;

        let optimized = extract_stationary_geometry(&fs::read_to_string(&log)?)?;
        let optimized_xyz = task.workdir.join(format!("{}_opt.xyz", stem));
        io::write_xyz(&optimized, "Gaussian stationary point", &optimized_xyz)?;

        Ok(TsCandidate::from_gaussian_log(&optimized_xyz, &log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_exhausts_after_all_attempts() {
        let mut calls = Vec::new();
        let state = search_reaction(&[2.5, 1.8], 3, |factor, n| {
            calls.push((factor, n));
            AttemptOutcome::Rejected
        });

        assert_eq!(state, SearchState::Exhausted);
        assert_eq!(calls.len(), 6);
        assert_eq!(calls[3], (1.8, 1));
    }

    #[test]
    fn test_errors_advance_the_search() {
        let mut calls = 0;
        let state = search_reaction(&[1.2], 3, |_, n| {
            calls += 1;
            if n < 3 {
                AttemptOutcome::Errored(TsError::GeometryMismatch("bad guess".into()))
            } else {
                AttemptOutcome::Validated("found.xyz".into())
            }
        });

        assert_eq!(calls, 3);
        assert!(matches!(state, SearchState::Found { attempt: 3, .. }));
    }

    #[test]
    fn test_empty_factor_list_is_exhausted() {
        let state = search_reaction(&[], 3, |_, _| AttemptOutcome::Validated("x.xyz".into()));
        assert_eq!(state, SearchState::Exhausted);
    }

    #[test]
    fn test_ts_job_route() {
        let backend = GaussianBackend::new(ProgramConfig::default()).with_charge(-1, 2);
        let job = backend.ts_job(Some("water"));
        assert_eq!(
            job.route,
            "UB3LYP/6-31G(d,p) opt=(calcfc,ts,noeigen) freq=noraman SCRF=(Solvent=water)"
        );
        assert_eq!(job.nprocs, Some(8));
        assert_eq!((job.charge, job.multiplicity), (-1, 2));
    }
}
