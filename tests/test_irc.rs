use opents::config::ProgramConfig;
use opents::irc::{
    extract_irc_endpoints, write_irc_inputs, EndpointOptimizer, IrcReconciler, IrcSettings, MolecularSystem,
};
use opents::qm_interface::QMError;
use opents::validation::TsError;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const REACTANT: &str = "3\nreactant\nH 0.0 0.0 0.0\nH 0.74 0.0 0.0\nH 3.74 0.0 0.0\n";
const PRODUCT: &str = "3\nproduct\nH 0.0 0.0 0.0\nH 3.0 0.0 0.0\nH 3.74 0.0 0.0\n";
const TS: &str = "3\nts\nH 0.0 0.0 0.0\nH 1.0 0.0 0.0\nH 2.0 0.0 0.0\n";

/// Returns the endpoint unchanged, as an already converged optimization would.
struct IdentityOptimizer;

impl EndpointOptimizer for IdentityOptimizer {
    fn optimize(&self, xyz: &Path, _charge: i32, _multiplicity: u32, _solvent: Option<&str>) -> Result<PathBuf, QMError> {
        let stem = xyz.file_stem().unwrap().to_string_lossy();
        let optimized = xyz.with_file_name(format!("{}_opt.xyz", stem));
        fs::copy(xyz, &optimized)?;
        Ok(optimized)
    }
}

struct FailingOptimizer;

impl EndpointOptimizer for FailingOptimizer {
    fn optimize(&self, _xyz: &Path, _charge: i32, _multiplicity: u32, _solvent: Option<&str>) -> Result<PathBuf, QMError> {
        Err(QMError::Calculation("xtb terminated abnormally".to_string()))
    }
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn irc_log(rows: &[(f64, f64, f64)]) -> String {
    let rule = " ---------------------------------------------------------------------\n";
    let mut block = String::from(" Cartesian Coordinates (Ang):\n");
    block.push_str(rule);
    block.push_str(" Center     Atomic                     Coordinates (Angstroms)\n");
    block.push_str(" Number     Number                    X              Y              Z\n");
    block.push_str(rule);
    for (i, (x, y, z)) in rows.iter().enumerate() {
        block.push_str(&format!("{:>7}{:>11}{:>24.6}{:>15.6}{:>15.6}\n", i + 1, 1, x, y, z));
    }
    block.push_str(rule);
    block
}

#[test]
fn test_irc_connecting_reactant_and_product() {
    let dir = TempDir::new().unwrap();
    let reactant = write(dir.path(), "reactants_geometry.xyz", REACTANT);
    let product = write(dir.path(), "products_geometry.xyz", PRODUCT);

    // The forward direction may lead to either side
    let forward = write(dir.path(), "forward_endpoint.xyz", PRODUCT);
    let reverse = write(dir.path(), "reverse_endpoint.xyz", REACTANT);

    let reconciler = IrcReconciler::new(IdentityOptimizer);
    let system = MolecularSystem::default();
    assert!(reconciler.reconcile(&forward, &reverse, &reactant, &product, &system).unwrap());
    assert!(reconciler.reconcile(&reverse, &forward, &reactant, &product, &system).unwrap());
}

#[test]
fn test_irc_returning_to_reactant_twice_is_rejected() {
    let dir = TempDir::new().unwrap();
    let reactant = write(dir.path(), "reactants_geometry.xyz", REACTANT);
    let product = write(dir.path(), "products_geometry.xyz", PRODUCT);
    let forward = write(dir.path(), "forward_endpoint.xyz", REACTANT);
    let reverse = write(dir.path(), "reverse_endpoint.xyz", REACTANT);

    let reconciler = IrcReconciler::new(IdentityOptimizer);
    assert!(!reconciler
        .reconcile(&forward, &reverse, &reactant, &product, &MolecularSystem::default())
        .unwrap());
}

#[test]
fn test_irc_tolerance_sweep_is_configurable() {
    let dir = TempDir::new().unwrap();
    let reactant = write(dir.path(), "reactants_geometry.xyz", "3\n\nH 0.0 0.0 0.0\nH 0.74 0.0 0.0\nH 4.0 0.0 0.0\n");
    let product = write(dir.path(), "products_geometry.xyz", "3\n\nH 0.0 0.0 0.0\nH 4.0 0.0 0.0\nH 4.74 0.0 0.0\n");
    // The reactant bond ends up slightly stretched
    let forward = write(dir.path(), "forward_endpoint.xyz", "3\n\nH 0.0 0.0 0.0\nH 0.79 0.0 0.0\nH 4.0 0.0 0.0\n");
    let reverse = write(dir.path(), "reverse_endpoint.xyz", "3\n\nH 0.0 0.0 0.0\nH 4.0 0.0 0.0\nH 4.74 0.0 0.0\n");
    let system = MolecularSystem::default();

    let loose = IrcReconciler::new(IdentityOptimizer);
    assert!(loose.reconcile(&forward, &reverse, &reactant, &product, &system).unwrap());

    let tight = IrcReconciler::new(IdentityOptimizer).with_tolerances(vec![0.25, 0.20]);
    assert!(!tight.reconcile(&forward, &reverse, &reactant, &product, &system).unwrap());
}

#[test]
fn test_irc_missing_or_failing_inputs_are_errors() {
    let dir = TempDir::new().unwrap();
    let reactant = write(dir.path(), "reactants_geometry.xyz", REACTANT);
    let product = write(dir.path(), "products_geometry.xyz", PRODUCT);
    let reverse = write(dir.path(), "reverse_endpoint.xyz", REACTANT);
    let forward = dir.path().join("forward_endpoint.xyz");

    let err = IrcReconciler::new(IdentityOptimizer)
        .reconcile(&forward, &reverse, &reactant, &product, &MolecularSystem::default())
        .unwrap_err();
    assert!(matches!(err, TsError::MissingInputFile(ref p) if p == &forward));

    write(dir.path(), "forward_endpoint.xyz", PRODUCT);
    let err = IrcReconciler::new(FailingOptimizer)
        .reconcile(&forward, &reverse, &reactant, &product, &MolecularSystem::default())
        .unwrap_err();
    assert!(matches!(err, TsError::External(QMError::Calculation(_))));
}

#[test]
fn test_irc_inputs_and_endpoint_extraction() {
    let dir = TempDir::new().unwrap();
    let ts = write(dir.path(), "ts_guess_3.xyz", TS);
    let irc_dir = dir.path().join("irc");

    let system = MolecularSystem {
        charge: -1,
        multiplicity: 2,
        solvent: Some("water".to_string()),
    };
    let settings = IrcSettings::from_programs(&ProgramConfig::default(), system);
    let (forward_com, reverse_com) = write_irc_inputs(&ts, &irc_dir, &settings).unwrap();

    let forward_text = fs::read_to_string(&forward_com).unwrap();
    assert!(forward_text.contains("%Chk=ts_guess_3.chk"));
    assert!(forward_text.contains("IRC(calcfc, maxpoint=50, stepsize=15, Forward) UB3LYP/6-31G(d,p) SCRF=(Solvent=water)"));
    assert!(forward_text.contains("-1 2"));
    let reverse_text = fs::read_to_string(&reverse_com).unwrap();
    assert!(reverse_text.contains("Reverse"));

    // Gaussian prints a coordinate block per IRC point; the last one is the endpoint
    let forward_log = write(
        &irc_dir,
        "irc_calc_forward.log",
        &(irc_log(&[(0.0, 0.0, 0.0), (1.5, 0.0, 0.0), (2.0, 0.0, 0.0)])
            + &irc_log(&[(0.0, 0.0, 0.0), (3.0, 0.0, 0.0), (3.74, 0.0, 0.0)])),
    );
    let reverse_log = write(
        &irc_dir,
        "irc_calc_reverse.log",
        &irc_log(&[(0.0, 0.0, 0.0), (0.74, 0.0, 0.0), (3.74, 0.0, 0.0)]),
    );

    let (forward, reverse) = extract_irc_endpoints(&forward_log, &reverse_log, &irc_dir).unwrap();
    assert!(forward.ends_with("forward_endpoint.xyz"));

    let reactant = write(dir.path(), "reactants_geometry.xyz", REACTANT);
    let product = write(dir.path(), "products_geometry.xyz", PRODUCT);
    let connected = IrcReconciler::new(IdentityOptimizer)
        .reconcile(&forward, &reverse, &reactant, &product, &MolecularSystem::default())
        .unwrap();
    assert!(connected);
}
