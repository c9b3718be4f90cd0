use opents::batch::{search_batch, validate_batch, BatchError, BatchSummary};
use opents::cleanup::ScratchCleaner;
use opents::config::{SearchConfig, ValidationBatchConfig, ValidationParams};
use opents::naming::{FINAL_OUTPUTS_DIR, FINAL_TS_GUESSES_DIR, PRODUCTS_XYZ, REACTANTS_XYZ, SPECTRUM_FILE, SUMMARY_FILE};
use opents::qm_interface::QMError;
use opents::reaction::{ReactionOutcome, ReactionTask};
use opents::search::TsSearchBackend;
use opents::validation::{Result, TsCandidate, TsError, TsValidator};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const REACTANT: &str = "3\nreactant\nH 0.0 0.0 0.0\nH 0.74 0.0 0.0\nH 3.74 0.0 0.0\n";
const PRODUCT: &str = "3\nproduct\nH 0.0 0.0 0.0\nH 3.0 0.0 0.0\nH 3.74 0.0 0.0\n";
const TS: &str = "3\nts guess\nH 0.0 0.0 0.0\nH 1.0 0.0 0.0\nH 2.0 0.0 0.0\n";

fn spectrum(frequency: f64) -> String {
    format!(
        " Frequencies --  {:.4}
 Red. masses --     1.0000
 Frc consts  --     0.1000
 IR Inten    --     0.0000
 Raman Activ --     0.0000
 Depolar     --     0.0000
 Atom AN      X      Y      Z
   1   1     0.00   0.00   0.00
   2   1     0.60   0.00   0.00
   3   1     0.00   0.00   0.00
",
        frequency
    )
}

#[derive(Clone, Copy)]
enum Behaviour {
    /// Strong imaginary mode from this factor and attempt onwards
    SucceedAt(f64, usize),
    /// Always a weak imaginary mode
    NeverValid,
    /// The generator always fails
    GeneratorFails,
    /// The backend panics
    Panics,
    /// Valid guesses, but `final_outputs` is a plain file so collection fails
    BlockedOutputs,
}

/// Scripted backend writing real geometry and spectrum files.
struct ScriptedBackend {
    behaviours: HashMap<String, Behaviour>,
    attempts: Mutex<HashMap<(String, u64), usize>>,
    pending: Mutex<HashMap<String, f64>>,
    generated: Mutex<Vec<(String, f64)>>,
}

impl ScriptedBackend {
    fn new(behaviours: &[(&str, Behaviour)]) -> Self {
        Self {
            behaviours: behaviours.iter().map(|(id, b)| (id.to_string(), *b)).collect(),
            attempts: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            generated: Mutex::new(Vec::new()),
        }
    }

    fn generated_for(&self, id: &str) -> Vec<f64> {
        self.generated
            .lock()
            .unwrap()
            .iter()
            .filter(|(rid, _)| rid == id)
            .map(|(_, f)| *f)
            .collect()
    }
}

impl TsSearchBackend for ScriptedBackend {
    fn generate_guesses(&self, task: &ReactionTask, factor: f64) -> Result<Vec<PathBuf>> {
        self.generated.lock().unwrap().push((task.id.clone(), factor));
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry((task.id.clone(), factor.to_bits())).or_insert(0);
            *count += 1;
            *count
        };

        let frequency = match self.behaviours[&task.id] {
            Behaviour::SucceedAt(f, n) if f == factor && attempt >= n => -1500.0,
            Behaviour::BlockedOutputs => {
                fs::write(task.workdir.join(FINAL_OUTPUTS_DIR), "not a directory")?;
                -1500.0
            }
            Behaviour::GeneratorFails => {
                return Err(TsError::External(QMError::Calculation("generator exited with 1".into())))
            }
            Behaviour::Panics => panic!("generator crashed for {}", task.id),
            _ => -20.0,
        };
        self.pending.lock().unwrap().insert(task.id.clone(), frequency);

        fs::write(task.workdir.join(REACTANTS_XYZ), REACTANT)?;
        fs::write(task.workdir.join(PRODUCTS_XYZ), PRODUCT)?;
        let guess = task.workdir.join("ts_guess_0.xyz");
        fs::write(&guess, TS)?;
        Ok(vec![guess])
    }

    fn refine(&self, task: &ReactionTask, guess: &Path) -> Result<TsCandidate> {
        let frequency = self.pending.lock().unwrap().get(&task.id).copied().unwrap_or(-1500.0);
        fs::write(task.workdir.join(SPECTRUM_FILE), spectrum(frequency))?;
        Ok(TsCandidate::in_workdir(guess, &task.workdir))
    }
}

fn search_config(root: &Path) -> SearchConfig {
    SearchConfig {
        target_dir: root.join("work_dir"),
        workers: Some(2),
        ..SearchConfig::default()
    }
}

fn reactions(ids: &[&str]) -> Vec<(String, String)> {
    // Intramolecular: factors 1.2, 1.3, 1.8
    ids.iter()
        .map(|id| (id.to_string(), "C=CCC=O>>C1CC1C=O".to_string()))
        .collect()
}

#[test]
fn test_search_batch_validates_expected_reactions() {
    let dir = TempDir::new().unwrap();
    let config = search_config(dir.path());
    let backend = ScriptedBackend::new(&[
        ("A", Behaviour::SucceedAt(1.3, 2)),
        ("B", Behaviour::NeverValid),
        ("C", Behaviour::SucceedAt(1.2, 1)),
    ]);
    let validator = TsValidator::new(config.validation.clone());

    let report = search_batch(
        &reactions(&["A", "B", "C"]),
        &config,
        &backend,
        &validator,
        &ScratchCleaner::default(),
    )
    .unwrap();

    assert_eq!(report.summary.validated, vec!["A", "C"]);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.outcomes.len(), 3);

    // A: three rejected attempts at 1.2, accepted on the second attempt at 1.3
    assert_eq!(backend.generated_for("A"), vec![1.2, 1.2, 1.2, 1.3, 1.3]);
    assert_eq!(backend.generated_for("B").len(), 9);
    assert_eq!(backend.generated_for("C"), vec![1.2]);

    let final_guesses = config.target_dir.join(FINAL_TS_GUESSES_DIR);
    assert!(final_guesses.join("A_final_ts_guess.xyz").is_file());
    assert!(final_guesses.join("C_final_ts_guess.xyz").is_file());
    assert!(!final_guesses.join("B_final_ts_guess.xyz").exists());

    let results = dir.path().join("final_work_dir");
    assert_eq!(report.results_dir, results);
    for id in ["A", "C"] {
        let collected = results.join(format!("final_outputs_reaction_{}", id));
        assert!(collected.join(format!("{}_final_ts_guess.xyz", id)).is_file());
        assert!(collected.join(REACTANTS_XYZ).is_file());
        assert!(collected.join(PRODUCTS_XYZ).is_file());
    }
    assert!(!results.join("final_outputs_reaction_B").exists());

    let summary: BatchSummary = serde_json::from_str(&fs::read_to_string(results.join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary.validated, vec!["A", "C"]);
}

#[test]
fn test_failed_reaction_workdir_keeps_only_endpoints() {
    let dir = TempDir::new().unwrap();
    let config = search_config(dir.path());
    let backend = ScriptedBackend::new(&[("B", Behaviour::NeverValid)]);
    let validator = TsValidator::new(config.validation.clone());

    search_batch(&reactions(&["B"]), &config, &backend, &validator, &ScratchCleaner::default()).unwrap();

    let workdir = config.target_dir.join("reaction_B");
    let mut names: Vec<String> = fs::read_dir(&workdir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec![PRODUCTS_XYZ, REACTANTS_XYZ]);
}

#[test]
fn test_generator_errors_and_panics_do_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    let config = search_config(dir.path());
    let backend = ScriptedBackend::new(&[
        ("broken", Behaviour::GeneratorFails),
        ("crash", Behaviour::Panics),
        ("ok", Behaviour::SucceedAt(1.2, 1)),
    ]);
    let validator = TsValidator::new(config.validation.clone());

    let report = search_batch(
        &reactions(&["broken", "crash", "ok"]),
        &config,
        &backend,
        &validator,
        &ScratchCleaner::default(),
    )
    .unwrap();

    assert_eq!(report.summary.validated, vec!["ok"]);
    assert_eq!(backend.generated_for("broken").len(), 9);
    assert!(report.summary.failures["crash"].contains("panicked"));
    assert!(report
        .outcomes
        .iter()
        .any(|o| matches!(o, ReactionOutcome::Failed(id, _) if id == "broken")));
}

#[test]
fn test_failed_collection_leaves_shared_folder_untouched() {
    let dir = TempDir::new().unwrap();
    let config = search_config(dir.path());
    let backend = ScriptedBackend::new(&[("X", Behaviour::BlockedOutputs), ("C", Behaviour::SucceedAt(1.2, 1))]);
    let validator = TsValidator::new(config.validation.clone());

    let report = search_batch(
        &reactions(&["X", "C"]),
        &config,
        &backend,
        &validator,
        &ScratchCleaner::default(),
    )
    .unwrap();

    assert_eq!(report.summary.validated, vec!["C"]);
    assert!(report.summary.failures.contains_key("X"));
    assert_eq!(backend.generated_for("X").len(), 9);

    let final_guesses = config.target_dir.join(FINAL_TS_GUESSES_DIR);
    assert!(final_guesses.join("C_final_ts_guess.xyz").is_file());
    assert!(!final_guesses.join("X_final_ts_guess.xyz").exists());
}

#[test]
fn test_duplicate_reaction_ids_abort_the_batch() {
    let dir = TempDir::new().unwrap();
    let config = search_config(dir.path());
    let backend = ScriptedBackend::new(&[("A", Behaviour::SucceedAt(1.2, 1))]);
    let validator = TsValidator::new(config.validation.clone());

    let err = search_batch(&reactions(&["A", "A"]), &config, &backend, &validator, &ScratchCleaner::default())
        .unwrap_err();

    assert!(matches!(err, BatchError::DuplicateReaction(ref id) if id == "A"));
    assert!(backend.generated_for("A").is_empty());
}

#[test]
fn test_empty_batch() {
    let dir = TempDir::new().unwrap();
    let config = search_config(dir.path());
    let backend = ScriptedBackend::new(&[]);
    let validator = TsValidator::new(config.validation.clone());

    let report = search_batch(&[], &config, &backend, &validator, &ScratchCleaner::default()).unwrap();

    assert_eq!(report.summary.total, 0);
    assert_eq!(report.summary.success_ratio, 0.0);
}

#[test]
fn test_validate_batch_uses_pregenerated_guesses() {
    let dir = TempDir::new().unwrap();
    let input_dir = dir.path().join("final_work_dir");
    for id in ["A", "B"] {
        let guess_dir = input_dir.join(format!("final_outputs_reaction_{}", id));
        fs::create_dir_all(&guess_dir).unwrap();
        fs::write(guess_dir.join(REACTANTS_XYZ), REACTANT).unwrap();
        fs::write(guess_dir.join(PRODUCTS_XYZ), PRODUCT).unwrap();
        fs::write(guess_dir.join(format!("{}_final_ts_guess.xyz", id)), TS).unwrap();
    }
    // No guess directory for C

    let config = ValidationBatchConfig {
        input_dir,
        output_dir: dir.path().join("validation_dir"),
        workers: Some(2),
        validation: ValidationParams {
            freq_cutoff: 150.0,
            ..Default::default()
        },
        ..ValidationBatchConfig::default()
    };
    let backend = ScriptedBackend::new(&[]);
    backend.pending.lock().unwrap().insert("B".to_string(), -20.0);
    let validator = TsValidator::new(config.validation.clone());

    let report = validate_batch(&reactions(&["A", "B", "C"]), &config, &backend, &validator).unwrap();

    assert_eq!(report.summary.validated, vec!["A"]);
    assert_eq!(report.summary.failures["B"], "TS guess rejected");
    assert!(report.summary.failures["C"].contains("Missing input file"));

    let output = &config.output_dir;
    assert!(output.join(FINAL_TS_GUESSES_DIR).join("A_final_ts_guess.xyz").is_file());
    assert!(output.join("reaction_A").join(FINAL_OUTPUTS_DIR).join(REACTANTS_XYZ).is_file());
    assert!(output.join(SUMMARY_FILE).is_file());
}
