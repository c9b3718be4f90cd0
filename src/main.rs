//! opents Command-Line Interface
//!
//! Entry point of the `opents` program: parses the command line, loads the
//! INI settings, sets up logging and dispatches to the library.
//!
//! # Usage
//!
//! ```bash
//! # Search TS for every reaction of a list
//! opents search reactions.csv --target-dir work_dir --solvent water
//! opents search reactions.csv --inter-factors 2.5,1.8 --freq-cutoff 100 --nprocs 4 --mem 8GB
//!
//! # Validate pre-generated guesses found in final_work_dir/
//! opents validate-batch reactions.csv --input-dir final_work_dir
//!
//! # Validate one guess against reaction_0/{reactants,products}_geometry.xyz and reaction_0/g98.out
//! opents validate reaction_0/ts_guess_0.xyz reaction_0
//!
//! # Write and reconcile IRC calculations
//! opents irc-inputs ts.xyz --output-dir irc
//! opents irc irc/irc_calc_forward.log irc/irc_calc_reverse.log reactants.xyz products.xyz
//!
//! # Write a settings template
//! opents init-config
//! ```

use clap::{Args, Parser, Subcommand};
use opents::batch::{search_batch, validate_batch, BatchReport};
use opents::cleanup::ScratchCleaner;
use opents::config::{ProgramConfig, ValidationParams};
use opents::irc::{extract_irc_endpoints, write_irc_inputs, IrcReconciler, IrcSettings, MolecularSystem};
use opents::qm_interface::XtbInterface;
use opents::reaction::read_reaction_list;
use opents::search::GaussianBackend;
use opents::settings::{Settings, SettingsManager, CONFIG_FILE_NAME};
use opents::validation::{FinalGuessTarget, TsCandidate, TsValidator};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "opents", version, about = "Transition state validation and batch search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file used instead of the standard locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides the configuration)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search a TS for every reaction of a reaction list
    Search {
        reactions: PathBuf,
        #[arg(long, default_value = "work_dir")]
        target_dir: PathBuf,
        #[arg(long)]
        solvent: Option<String>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value_t = 1)]
        multiplicity: u32,
        /// Reactive complex factors for intramolecular reactions
        #[arg(long, value_delimiter = ',')]
        intra_factors: Option<Vec<f64>>,
        /// Reactive complex factors for intermolecular reactions
        #[arg(long, value_delimiter = ',')]
        inter_factors: Option<Vec<f64>>,
        /// Imaginary frequency threshold of the search (cm^-1)
        #[arg(long)]
        freq_cutoff: Option<f64>,
        #[command(flatten)]
        resources: Resources,
    },
    /// Validate pre-generated TS guesses of a reaction list
    ValidateBatch {
        reactions: PathBuf,
        #[arg(long, default_value = "final_work_dir")]
        input_dir: PathBuf,
        #[arg(long, default_value = "validation_dir")]
        output_dir: PathBuf,
        #[arg(long)]
        solvent: Option<String>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value_t = 1)]
        multiplicity: u32,
        #[arg(long)]
        freq_cutoff: Option<f64>,
        #[command(flatten)]
        resources: Resources,
    },
    /// Validate one TS guess against the reactant and product in a working directory
    Validate {
        ts_file: PathBuf,
        workdir: PathBuf,
        /// Gaussian log holding the frequencies (default: <workdir>/g98.out)
        #[arg(long)]
        log: Option<PathBuf>,
        #[arg(long)]
        freq_cutoff: Option<f64>,
        /// Place an accepted guess in this directory
        #[arg(long, requires = "reaction_id")]
        final_dir: Option<PathBuf>,
        #[arg(long)]
        reaction_id: Option<String>,
    },
    /// List active bonds that are not yet stretched or compressed enough
    Unactivated {
        ts_file: PathBuf,
        workdir: PathBuf,
        #[arg(long)]
        factor: Option<f64>,
    },
    /// Write forward and reverse Gaussian IRC inputs for a TS geometry
    IrcInputs {
        ts_file: PathBuf,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        multiplicity: u32,
        #[arg(long)]
        solvent: Option<String>,
    },
    /// Check that finished IRC runs connect the reactant and the product
    Irc {
        forward_log: PathBuf,
        reverse_log: PathBuf,
        reactant: PathBuf,
        product: PathBuf,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        multiplicity: u32,
        #[arg(long)]
        solvent: Option<String>,
    },
    /// Write a commented configuration template
    InitConfig {
        #[arg(default_value = CONFIG_FILE_NAME)]
        path: PathBuf,
    },
}

/// Gaussian resources, overriding `[programs]`
#[derive(Args, Debug)]
struct Resources {
    /// Gaussian memory, e.g. 16GB
    #[arg(long)]
    mem: Option<String>,
    /// Gaussian processor count
    #[arg(long)]
    nprocs: Option<usize>,
}

impl Resources {
    fn apply(self, programs: &mut ProgramConfig) {
        if let Some(mem) = self.mem {
            programs.mem = mem;
        }
        if let Some(nprocs) = self.nprocs {
            programs.nprocs = nprocs;
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => SettingsManager::load_file(path),
        None => SettingsManager::load(),
    };
    let manager = match manager {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(manager.settings().logging.level.as_str())
        .parse()
        .unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .target(env_logger::Target::Stdout)
        .format_timestamp_millis()
        .init();
    log::debug!("Configuration loaded from: {}", manager.config_source());

    if let Err(e) = run(cli.command, manager.settings()) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(command: Commands, settings: &Settings) -> CliResult<()> {
    match command {
        Commands::Search {
            reactions,
            target_dir,
            solvent,
            workers,
            multiplicity,
            intra_factors,
            inter_factors,
            freq_cutoff,
            resources,
        } => {
            let reactions = read_reaction_list(&reactions)?;
            let mut config = settings.search_config(target_dir, solvent);
            config.workers = workers.or(config.workers);
            if let Some(factors) = intra_factors {
                config.intra_factors = factors;
            }
            if let Some(factors) = inter_factors {
                config.inter_factors = factors;
            }
            if let Some(cutoff) = freq_cutoff {
                config.validation.freq_cutoff = cutoff;
            }
            let mut programs = settings.programs.clone();
            resources.apply(&mut programs);

            let backend = GaussianBackend::new(programs)
                .with_charge(config.validation.charge, multiplicity);
            let validator = TsValidator::new(config.validation.clone());
            let cleaner = ScratchCleaner::new(settings.cleanup.clone());

            let report = search_batch(&reactions, &config, &backend, &validator, &cleaner)?;
            print_report(&report);
        }
        Commands::ValidateBatch {
            reactions,
            input_dir,
            output_dir,
            solvent,
            workers,
            multiplicity,
            freq_cutoff,
            resources,
        } => {
            let reactions = read_reaction_list(&reactions)?;
            let mut config = settings.validation_batch_config(input_dir, output_dir, solvent);
            config.workers = workers.or(config.workers);
            if let Some(cutoff) = freq_cutoff {
                config.validation.freq_cutoff = cutoff;
            }
            let mut programs = settings.programs.clone();
            resources.apply(&mut programs);

            let backend = GaussianBackend::new(programs)
                .with_charge(config.validation.charge, multiplicity);
            let validator = TsValidator::new(config.validation.clone());

            let report = validate_batch(&reactions, &config, &backend, &validator)?;
            print_report(&report);
        }
        Commands::Validate {
            ts_file,
            workdir,
            log,
            freq_cutoff,
            final_dir,
            reaction_id,
        } => {
            let params = ValidationParams {
                freq_cutoff: freq_cutoff.unwrap_or(settings.validation.freq_cutoff),
                ..settings.validation.clone()
            };
            let candidate = match log {
                Some(log) => TsCandidate::from_gaussian_log(&ts_file, &log),
                None => TsCandidate::in_workdir(&ts_file, &workdir),
            };
            let target = final_dir.zip(reaction_id).map(|(dir, reaction_id)| FinalGuessTarget { dir, reaction_id });

            let verdict = TsValidator::new(params).validate(&candidate, &workdir, target.as_ref())?;
            if verdict.accepted() {
                println!("✓ TS guess accepted (imaginary frequency {:.1} cm^-1)", verdict.frequency);
            } else {
                println!("✗ TS guess rejected (frequency {:.1} cm^-1)", verdict.frequency);
                for reason in &verdict.reasons {
                    println!("  - {}", reason);
                }
                process::exit(2);
            }
        }
        Commands::Unactivated {
            ts_file,
            workdir,
            factor,
        } => {
            let params = ValidationParams {
                factor: factor.unwrap_or(settings.validation.factor),
                ..settings.validation.clone()
            };
            let bonds = TsValidator::new(params).unactivated_bonds(&TsCandidate::in_workdir(&ts_file, &workdir), &workdir)?;
            if bonds.is_empty() {
                println!("All active bonds are activated");
            }
            for (i, j) in bonds {
                println!("{} {}", i, j);
            }
        }
        Commands::IrcInputs {
            ts_file,
            output_dir,
            multiplicity,
            solvent,
        } => {
            let irc = IrcSettings::from_programs(&settings.programs, system(settings, multiplicity, solvent));
            let (forward, reverse) = write_irc_inputs(&ts_file, &output_dir, &irc)?;
            println!("✓ IRC inputs written:");
            println!("  {}", forward.display());
            println!("  {}", reverse.display());
        }
        Commands::Irc {
            forward_log,
            reverse_log,
            reactant,
            product,
            output_dir,
            multiplicity,
            solvent,
        } => {
            let (forward, reverse) = extract_irc_endpoints(&forward_log, &reverse_log, &output_dir)?;
            let reconciler = IrcReconciler::new(XtbInterface::new(settings.programs.xtb.clone()))
                .with_tolerances(settings.irc.tolerances.clone());
            let connected = reconciler.reconcile(
                &forward,
                &reverse,
                &reactant,
                &product,
                &system(settings, multiplicity, solvent),
            )?;
            if connected {
                println!("✓ IRC connects reactant and product");
            } else {
                println!("✗ IRC endpoints do not match reactant and product");
                process::exit(2);
            }
        }
        Commands::InitConfig { path } => create_settings_template(&path)?,
    }
    Ok(())
}

fn system(settings: &Settings, multiplicity: u32, solvent: Option<String>) -> MolecularSystem {
    MolecularSystem {
        charge: settings.validation.charge,
        multiplicity,
        solvent,
    }
}

fn print_report(report: &BatchReport) {
    println!("\n{}", report.summary);
    if !report.summary.failures.is_empty() {
        println!("\nFailed reactions:");
        for (id, reason) in &report.summary.failures {
            println!("  {}: {}", id, reason);
        }
    }
    println!("\nResults written to {}", report.results_dir.display());
}

fn create_settings_template(path: &Path) -> CliResult<()> {
    SettingsManager::create_template(path)?;
    println!("✓ Settings template created successfully!");
    println!("  Output file: {}", path.display());
    println!("\nNext steps:");
    println!("  1. Review and edit {}", path.display());
    println!("  2. Set the program commands and level of theory in [programs]");
    println!("  3. The settings are loaded automatically from the working directory");
    Ok(())
}
