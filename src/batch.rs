//! Batch orchestration across reactions.
//!
//! Two entry points share one worker-pool runner:
//!
//! - [`search_batch`]: searches a TS for every reaction of a list, with a pool
//!   sized to the full host parallelism
//! - [`validate_batch`]: validates pre-generated TS guesses, with a pool sized
//!   to half the host parallelism (at least one worker)
//!
//! Each reaction is processed exactly once by one worker inside its own
//! working directory. Workers pull reactions from a task channel and push
//! [`ReactionOutcome`]s to a result channel, so outcomes arrive in completion
//! order. A failing or panicking reaction is recorded as
//! [`ReactionOutcome::Failed`] and never stops the batch.

use crate::cleanup::ScratchCleaner;
use crate::config::{SearchConfig, ValidationBatchConfig};
use crate::graph::BondPerception;
use crate::io::copy_dir_recursive;
use crate::naming::{
    is_ts_guess_file, results_dir, ReactionNaming, FINAL_OUTPUTS_DIR, FINAL_TS_GUESSES_DIR, PRODUCTS_XYZ,
    REACTANTS_XYZ, SUMMARY_FILE,
};
use crate::reaction::{ReactionOutcome, ReactionTask};
use crate::search::{finalize, TsSearchBackend, TsSearcher};
use crate::validation::{FinalGuessTarget, TsError, TsValidator};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Errors that abort a whole batch before or after the reactions run.
#[derive(Error, Debug)]
pub enum BatchError {
    /// File system error outside a single reaction
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The worker pool could not be created
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    /// The summary could not be serialized
    #[error("Failed to serialize summary: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Two reactions share an identifier and would share a working directory
    #[error("Duplicate reaction id: {0}")]
    DuplicateReaction(String),
}

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Aggregate statistics of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of reactions dispatched
    pub total: usize,
    /// Number of validated reactions
    pub succeeded: usize,
    /// Number of failed reactions
    pub failed: usize,
    /// `succeeded / total`, 0 for an empty batch
    pub success_ratio: f64,
    /// Wall-clock duration of the batch
    pub elapsed_seconds: f64,
    /// Identifiers of the validated reactions, sorted
    pub validated: Vec<String>,
    /// Failure reason per failed reaction
    pub failures: BTreeMap<String, String>,
}

impl BatchSummary {
    /// Aggregates outcomes in any order.
    pub fn from_outcomes(outcomes: &[ReactionOutcome], elapsed_seconds: f64) -> Self {
        let mut validated = Vec::new();
        let mut failures = BTreeMap::new();
        for outcome in outcomes {
            match outcome {
                ReactionOutcome::Validated(id) => validated.push(id.clone()),
                ReactionOutcome::Failed(id, reason) => {
                    failures.insert(id.clone(), reason.clone());
                }
            }
        }
        validated.sort();

        let total = outcomes.len();
        let succeeded = validated.len();
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            success_ratio: if total == 0 { 0.0 } else { succeeded as f64 / total as f64 },
            elapsed_seconds,
            validated,
            failures,
        }
    }

    /// Writes the summary as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reactions processed: {}", self.total)?;
        writeln!(f, "Validated:           {}", self.succeeded)?;
        writeln!(f, "Failed:              {}", self.failed)?;
        writeln!(f, "Success ratio:       {:.2}", self.success_ratio)?;
        write!(f, "Elapsed time:        {:.1} s", self.elapsed_seconds)
    }
}

/// Outcomes and statistics of a finished batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One outcome per reaction, in completion order
    pub outcomes: Vec<ReactionOutcome>,
    /// Aggregate statistics
    pub summary: BatchSummary,
    /// Directory holding the collected results and `summary.json`
    pub results_dir: PathBuf,
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Worker count of the search pool: the configured count or the host parallelism.
pub fn search_workers(configured: Option<usize>) -> usize {
    configured.unwrap_or_else(host_parallelism).max(1)
}

/// Worker count of the validation pool: the configured count or half the
/// host parallelism, at least one.
pub fn validation_workers(configured: Option<usize>) -> usize {
    configured.unwrap_or_else(|| host_parallelism() / 2).max(1)
}

fn build_thread_pool(threads: usize) -> Result<rayon::ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("opents-worker-{}", i))
        .build()?)
}

/// Processes every task on a fixed pool of `workers` threads.
///
/// Blocks until every task has an outcome. A panic inside `process` is caught
/// and recorded as a failure of that reaction.
pub fn run_pool<F>(tasks: Vec<ReactionTask>, workers: usize, process: F) -> Result<Vec<ReactionOutcome>>
where
    F: Fn(&ReactionTask) -> ReactionOutcome + Sync,
{
    let pool = build_thread_pool(workers.max(1))?;
    let worker_count = pool.current_num_threads().max(1);

    let (task_tx, task_rx) = unbounded::<ReactionTask>();
    let (result_tx, result_rx) = unbounded::<ReactionOutcome>();

    for task in tasks {
        // The receiver is alive until the pool finishes
        let _ = task_tx.send(task);
    }
    drop(task_tx);

    let process = &process;
    pool.scope(|scope| {
        for _ in 0..worker_count {
            let worker_task_rx = task_rx.clone();
            let worker_result_tx = result_tx.clone();
            scope.spawn(move |_| run_worker(worker_task_rx, worker_result_tx, process));
        }
    });
    drop(result_tx);

    Ok(result_rx.iter().collect())
}

fn run_worker<F>(task_rx: Receiver<ReactionTask>, result_tx: Sender<ReactionOutcome>, process: &F)
where
    F: Fn(&ReactionTask) -> ReactionOutcome + Sync,
{
    while let Ok(task) = task_rx.recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| process(&task))).unwrap_or_else(|payload| {
            let message = panic_message(&*payload);
            error!("Reaction {} panicked: {}", task.id, message);
            ReactionOutcome::Failed(task.id.clone(), format!("worker panicked: {}", message))
        });
        if result_tx.send(outcome).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Copies `<target>/reaction_<id>/final_outputs` of every validated reaction to
/// `<results>/final_outputs_reaction_<id>`.
///
/// A reaction whose outputs cannot be copied is logged and skipped.
pub fn copy_final_outputs(target: &Path, results: &Path, outcomes: &[ReactionOutcome]) -> Result<usize> {
    fs::create_dir_all(results)?;
    let mut copied = 0;
    for outcome in outcomes.iter().filter(|o| o.is_validated()) {
        let naming = ReactionNaming::new(outcome.reaction_id());
        let source = naming.workdir(target).join(FINAL_OUTPUTS_DIR);
        let dest = results.join(naming.final_outputs_dir());
        match copy_dir_recursive(&source, &dest) {
            Ok(()) => copied += 1,
            Err(e) => warn!("Could not collect outputs of reaction {}: {}", outcome.reaction_id(), e),
        }
    }
    Ok(copied)
}

fn tasks_for(reactions: &[(String, String)], root: &Path, solvent: &Option<String>) -> Result<Vec<ReactionTask>> {
    let mut seen = HashSet::new();
    reactions
        .iter()
        .map(|(id, smiles)| {
            if !seen.insert(id.as_str()) {
                return Err(BatchError::DuplicateReaction(id.clone()));
            }
            Ok(ReactionTask {
                id: id.clone(),
                smiles: smiles.clone(),
                solvent: solvent.clone(),
                workdir: ReactionNaming::new(id).workdir(root),
            })
        })
        .collect()
}

/// Searches transition states for every reaction.
///
/// Working directories are created below `config.target_dir`. Successful
/// reactions are collected into `final_<target>` next to the target directory,
/// together with `summary.json`.
pub fn search_batch<B, P>(
    reactions: &[(String, String)],
    config: &SearchConfig,
    backend: &B,
    validator: &TsValidator<P>,
    cleaner: &ScratchCleaner,
) -> Result<BatchReport>
where
    B: TsSearchBackend + ?Sized,
    P: BondPerception,
{
    let started = Instant::now();
    let tasks = tasks_for(reactions, &config.target_dir, &config.solvent)?;
    fs::create_dir_all(config.target_dir.join(FINAL_TS_GUESSES_DIR))?;

    let workers = search_workers(config.workers);
    info!(
        "Searching transition states for {} reactions with {} workers",
        reactions.len(),
        workers
    );

    let searcher = TsSearcher::new(backend, validator, config, cleaner);
    let outcomes = run_pool(tasks, workers, |task| searcher.process_reaction(task))?;

    let results = results_dir(&config.target_dir);
    let copied = copy_final_outputs(&config.target_dir, &results, &outcomes)?;
    info!("Collected outputs of {} reactions into {}", copied, results.display());

    let summary = BatchSummary::from_outcomes(&outcomes, started.elapsed().as_secs_f64());
    summary.write_json(&results.join(SUMMARY_FILE))?;

    Ok(BatchReport {
        outcomes,
        summary,
        results_dir: results,
    })
}

/// Locates the TS guess of a reaction in `guess_dir` and copies the reactant
/// and product geometries found there into `workdir`.
pub fn discover_guess(guess_dir: &Path, workdir: &Path) -> std::result::Result<PathBuf, TsError> {
    if !guess_dir.is_dir() {
        return Err(TsError::MissingInputFile(guess_dir.to_path_buf()));
    }
    fs::create_dir_all(workdir)?;

    let mut guesses = Vec::new();
    for entry in fs::read_dir(guess_dir)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        if name == REACTANTS_XYZ || name == PRODUCTS_XYZ {
            fs::copy(&path, workdir.join(name))?;
        } else if is_ts_guess_file(&path) {
            guesses.push(path);
        }
    }
    guesses.sort();

    guesses
        .pop()
        .ok_or_else(|| TsError::MissingInputFile(guess_dir.join("*ts_guess*.xyz")))
}

fn validate_reaction<B, P>(
    task: &ReactionTask,
    guess_dir: &Path,
    backend: &B,
    validator: &TsValidator<P>,
    final_target: &FinalGuessTarget,
) -> std::result::Result<bool, TsError>
where
    B: TsSearchBackend + ?Sized,
    P: BondPerception,
{
    let guess = discover_guess(guess_dir, &task.workdir)?;
    let candidate = backend.refine(task, &guess)?;
    let verdict = validator.validate(&candidate, &task.workdir, None)?;
    if verdict.accepted() {
        finalize(task, &candidate.geometry, final_target)?;
    }
    Ok(verdict.accepted())
}

/// Validates the pre-generated TS guess of every reaction.
///
/// For reaction `<id>` the guess is looked up in
/// `<input_dir>/final_outputs_reaction_<id>/`; work happens in
/// `<output_dir>/reaction_<id>/`. Each reaction gets a single attempt.
pub fn validate_batch<B, P>(
    reactions: &[(String, String)],
    config: &ValidationBatchConfig,
    backend: &B,
    validator: &TsValidator<P>,
) -> Result<BatchReport>
where
    B: TsSearchBackend + ?Sized,
    P: BondPerception,
{
    let started = Instant::now();
    let tasks = tasks_for(reactions, &config.output_dir, &config.solvent)?;
    let final_dir = config.output_dir.join(FINAL_TS_GUESSES_DIR);
    fs::create_dir_all(&final_dir)?;

    let workers = validation_workers(config.workers);
    info!("Validating {} TS guesses with {} workers", reactions.len(), workers);

    let outcomes = run_pool(tasks, workers, |task| {
        let guess_dir = config
            .input_dir
            .join(ReactionNaming::new(&task.id).final_outputs_dir());
        let final_target = FinalGuessTarget {
            dir: final_dir.clone(),
            reaction_id: task.id.clone(),
        };
        match validate_reaction(task, &guess_dir, backend, validator, &final_target) {
            Ok(true) => ReactionOutcome::Validated(task.id.clone()),
            Ok(false) => ReactionOutcome::Failed(task.id.clone(), "TS guess rejected".to_string()),
            Err(e) => {
                warn!("Validation of reaction {} failed: {}", task.id, e);
                ReactionOutcome::Failed(task.id.clone(), e.to_string())
            }
        }
    })?;

    let summary = BatchSummary::from_outcomes(&outcomes, started.elapsed().as_secs_f64());
    summary.write_json(&config.output_dir.join(SUMMARY_FILE))?;

    Ok(BatchReport {
        outcomes,
        summary,
        results_dir: config.output_dir.clone(),
    })
}
