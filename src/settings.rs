//! Configuration management for opents.
//!
//! Settings are read from INI files with the following precedence, later
//! files overriding individual keys of earlier ones:
//!
//! 1. System configuration (`/etc/opents/opents_config.cfg`)
//! 2. User configuration (`~/.config/opents/opents_config.cfg`)
//! 3. Local configuration (`./opents_config.cfg`)
//!
//! Keys absent from every file keep their built-in defaults.
//!
//! # Configuration File Format
//!
//! ```ini
//! [validation]
//! factor = 1.05
//! disp_cutoff = 0.5
//! freq_cutoff = 50
//!
//! [search]
//! intra_factors = 1.2,1.3,1.8
//! inter_factors = 2.5,1.8,2.8,1.3
//! attempts_per_factor = 3
//! freq_cutoff = 150
//!
//! [programs]
//! gaussian = g16
//! method = UB3LYP
//! basis_set = 6-31G(d,p)
//!
//! [cleanup]
//! enabled = true
//!
//! [irc]
//! tolerances = 0.30,0.25,0.20,0.15,0.10
//!
//! [logging]
//! level = info
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use opents::settings::SettingsManager;
//!
//! let manager = SettingsManager::load()?;
//! println!("Configuration loaded from: {}", manager.config_source());
//! # Ok::<(), opents::settings::ConfigError>(())
//! ```

use crate::cleanup::CleanupConfig;
use crate::config::{ProgramConfig, SearchConfig, ValidationBatchConfig, ValidationParams, DEFAULT_IRC_TOLERANCES};
use configparser::ini::Ini;
use log::{debug, info};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Name of the configuration file looked up in every location.
pub const CONFIG_FILE_NAME: &str = "opents_config.cfg";

/// Errors that can occur during configuration loading and processing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    /// A configuration file that exists could not be loaded
    #[error("{}: {source}", path.display())]
    File {
        /// Offending file
        path: PathBuf,
        /// Underlying error
        source: Box<ConfigError>,
    },
}

type Section = HashMap<String, Option<String>>;

/// Search-specific settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    /// Reactive complex factors for intramolecular reactions
    pub intra_factors: Vec<f64>,
    /// Reactive complex factors for intermolecular reactions
    pub inter_factors: Vec<f64>,
    /// Attempts per factor
    pub attempts_per_factor: usize,
    /// Worker count, `None` for the host parallelism
    pub workers: Option<usize>,
    /// Imaginary frequency threshold used during the search
    pub freq_cutoff: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        let search = SearchConfig::default();
        Self {
            intra_factors: search.intra_factors,
            inter_factors: search.inter_factors,
            attempts_per_factor: search.attempts_per_factor,
            workers: search.workers,
            freq_cutoff: search.validation.freq_cutoff,
        }
    }
}

/// IRC endpoint matching settings.
#[derive(Debug, Clone, PartialEq)]
pub struct IrcMatchSettings {
    /// Relative bond-perception tolerances, tried in order
    pub tolerances: Vec<f64>,
}

impl Default for IrcMatchSettings {
    fn default() -> Self {
        Self {
            tolerances: DEFAULT_IRC_TOLERANCES.to_vec(),
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Log level (default: "info")
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// All program settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    /// Decision thresholds shared by every command
    pub validation: ValidationParams,
    /// Worker count of the batch validation, `None` for half the host parallelism
    pub validation_workers: Option<usize>,
    /// Search settings
    pub search: SearchSettings,
    /// External programs and Gaussian route settings
    pub programs: ProgramConfig,
    /// Scratch cleanup between attempts
    pub cleanup: CleanupConfig,
    /// IRC endpoint matching
    pub irc: IrcMatchSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl Settings {
    /// Builds the configuration of a batch search.
    ///
    /// # Examples
    ///
    /// ```
    /// use opents::settings::Settings;
    ///
    /// let config = Settings::default().search_config("work_dir".into(), Some("water".into()));
    /// assert_eq!(config.validation.freq_cutoff, 150.0);
    /// assert_eq!(config.validation.factor, 1.05);
    /// ```
    pub fn search_config(&self, target_dir: PathBuf, solvent: Option<String>) -> SearchConfig {
        SearchConfig {
            target_dir,
            intra_factors: self.search.intra_factors.clone(),
            inter_factors: self.search.inter_factors.clone(),
            attempts_per_factor: self.search.attempts_per_factor,
            solvent,
            workers: self.search.workers,
            validation: ValidationParams {
                freq_cutoff: self.search.freq_cutoff,
                ..self.validation.clone()
            },
        }
    }

    /// Builds the configuration of a batch validation.
    pub fn validation_batch_config(
        &self,
        input_dir: PathBuf,
        output_dir: PathBuf,
        solvent: Option<String>,
    ) -> ValidationBatchConfig {
        ValidationBatchConfig {
            input_dir,
            output_dir,
            solvent,
            workers: self.validation_workers,
            validation: self.validation.clone(),
        }
    }

    /// Applies every section of a parsed INI file on top of the current values.
    fn apply(&mut self, ini: &Ini) -> Result<(), ConfigError> {
        let map = ini.get_map_ref();
        if let Some(section) = map.get("validation") {
            self.apply_validation(section)?;
        }
        if let Some(section) = map.get("search") {
            self.apply_search(section)?;
        }
        if let Some(section) = map.get("programs") {
            self.apply_programs(section)?;
        }
        if let Some(section) = map.get("cleanup") {
            self.apply_cleanup(section)?;
        }
        if let Some(Some(value)) = map.get("irc").and_then(|s| s.get("tolerances")) {
            let tolerances = parse_list(value, "tolerances")?;
            if tolerances.is_empty() || tolerances.iter().any(|&t| t <= 0.0) {
                return Err(ConfigError::InvalidValue(format!(
                    "irc tolerances must be a non-empty list of positive values, got '{}'",
                    value
                )));
            }
            self.irc.tolerances = tolerances;
        }
        if let Some(Some(level)) = map.get("logging").and_then(|s| s.get("level")) {
            self.logging.level = level.clone();
        }
        Ok(())
    }

    fn apply_validation(&mut self, section: &Section) -> Result<(), ConfigError> {
        let params = &mut self.validation;
        set_parsed(section, "factor", &mut params.factor)?;
        set_parsed(section, "disp_cutoff", &mut params.disp_cutoff)?;
        set_parsed(section, "active_cutoff_ratio", &mut params.active_cutoff_ratio)?;
        set_parsed(section, "freq_cutoff", &mut params.freq_cutoff)?;
        set_parsed(section, "max_atom_disp", &mut params.max_atom_disp)?;
        set_parsed(section, "graph_tolerance", &mut params.graph_tolerance)?;
        set_parsed(section, "charge", &mut params.charge)?;
        if let Some(workers) = parse_value::<usize>(section, "workers")? {
            self.validation_workers = Some(workers);
        }

        if params.freq_cutoff < 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "freq_cutoff must be positive, got {}",
                params.freq_cutoff
            )));
        }
        Ok(())
    }

    fn apply_search(&mut self, section: &Section) -> Result<(), ConfigError> {
        let search = &mut self.search;
        if let Some(Some(value)) = section.get("intra_factors") {
            search.intra_factors = parse_list(value, "intra_factors")?;
        }
        if let Some(Some(value)) = section.get("inter_factors") {
            search.inter_factors = parse_list(value, "inter_factors")?;
        }
        set_parsed(section, "attempts_per_factor", &mut search.attempts_per_factor)?;
        set_parsed(section, "freq_cutoff", &mut search.freq_cutoff)?;
        if let Some(workers) = parse_value::<usize>(section, "workers")? {
            search.workers = Some(workers);
        }
        Ok(())
    }

    fn apply_programs(&mut self, section: &Section) -> Result<(), ConfigError> {
        let programs = &mut self.programs;
        for (key, field) in [
            ("gaussian", &mut programs.gaussian),
            ("xtb", &mut programs.xtb),
            ("guess_generator", &mut programs.guess_generator),
            ("method", &mut programs.method),
            ("basis_set", &mut programs.basis_set),
            ("ts_keywords", &mut programs.ts_keywords),
            ("mem", &mut programs.mem),
        ] {
            if let Some(Some(value)) = section.get(key) {
                *field = value.clone();
            }
        }
        set_parsed(section, "nprocs", &mut programs.nprocs)?;
        Ok(())
    }

    fn apply_cleanup(&mut self, section: &Section) -> Result<(), ConfigError> {
        set_parsed(section, "enabled", &mut self.cleanup.enabled)?;
        if let Some(Some(preserve_extensions)) = section.get("preserve_extensions") {
            self.cleanup.preserve_extensions = preserve_extensions
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(section: &Section, key: &str) -> Result<Option<T>, ConfigError> {
    match section.get(key) {
        Some(Some(raw)) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("Invalid {}: {}", key, raw))),
        _ => Ok(None),
    }
}

fn set_parsed<T: FromStr>(section: &Section, key: &str, field: &mut T) -> Result<(), ConfigError> {
    if let Some(value) = parse_value(section, key)? {
        *field = value;
    }
    Ok(())
}

fn parse_list(raw: &str, key: &str) -> Result<Vec<f64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| ConfigError::InvalidValue(format!("Invalid {} entry: {}", key, s)))
        })
        .collect()
}

/// Configuration manager that handles loading and accessing program settings.
#[derive(Debug, Clone)]
pub struct SettingsManager {
    settings: Settings,
    config_source: String,
}

impl SettingsManager {
    /// Loads configuration from the available configuration files.
    ///
    /// A file that exists but cannot be parsed is an error.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_layers(&[
            ("system", Self::get_system_config_path()),
            ("user", Self::get_user_config_path()),
            ("local", Some(PathBuf::from(CONFIG_FILE_NAME))),
        ])
    }

    fn load_layers(candidates: &[(&str, Option<PathBuf>)]) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        let mut config_source = "built-in defaults".to_string();

        for (label, path) in candidates {
            let Some(path) = path.as_ref().filter(|p| p.exists()) else {
                continue;
            };
            settings = Self::load_config(path, &settings).map_err(|e| ConfigError::File {
                path: path.clone(),
                source: Box::new(e),
            })?;
            config_source = format!("{} config ({})", label, path.display());
            debug!("Loaded {} configuration from: {}", label, path.display());
        }

        info!("Configuration loaded from: {}", config_source);
        Ok(Self {
            settings,
            config_source,
        })
    }

    /// Loads a single configuration file on top of the built-in defaults.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let settings = Self::load_config(path, &Settings::default())?;
        Ok(Self {
            settings,
            config_source: format!("file ({})", path.display()),
        })
    }

    /// Returns the source of the loaded configuration.
    pub fn config_source(&self) -> &str {
        &self.config_source
    }

    /// Gets a reference to the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn load_config(path: &Path, base: &Settings) -> Result<Settings, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut ini = Ini::new();
        ini.read(content)
            .map_err(|e| ConfigError::IniParse(format!("Failed to parse INI: {}", e)))?;

        let mut settings = base.clone();
        settings.apply(&ini)?;
        Ok(settings)
    }

    fn get_system_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            Some(PathBuf::from("/etc/opents").join(CONFIG_FILE_NAME))
        }
        #[cfg(not(unix))]
        {
            std::env::var("PROGRAMDATA")
                .ok()
                .map(|pd| PathBuf::from(pd).join("opents").join(CONFIG_FILE_NAME))
        }
    }

    fn get_user_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".config").join("opents").join(CONFIG_FILE_NAME))
        }
        #[cfg(not(unix))]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|appdata| PathBuf::from(appdata).join("opents").join(CONFIG_FILE_NAME))
        }
    }

    /// Writes a commented configuration file listing every option with its default.
    ///
    /// # Arguments
    ///
    /// * `path` - Path where the configuration file should be created
    pub fn create_template(path: &Path) -> Result<(), ConfigError> {
        fs::write(path, Self::generate_template_content())?;
        info!("Created settings template at: {}", path.display());
        Ok(())
    }

    fn generate_template_content() -> String {
        let defaults = Settings::default();
        let join = |values: &[f64]| {
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };

        format!(
            r#"# opents configuration file
#
# Files are loaded in this order, later files overriding earlier ones:
#
# 1. /etc/opents/opents_config.cfg
# 2. ~/.config/opents/opents_config.cfg
# 3. ./opents_config.cfg
#
# Missing sections or values use the defaults shown below.

[validation]
# Bond-length intermediacy margin
factor = {}
# Minimum delta-mode value (A) for a non-reacting bond to disqualify the mode
disp_cutoff = {}
# Active bonds must move at least active_cutoff_ratio * disp_cutoff
active_cutoff_ratio = {}
# The imaginary frequency must lie below -freq_cutoff (cm^-1)
freq_cutoff = {}
# Per-atom displacement ceiling (A)
max_atom_disp = {}
# Relative tolerance of covalent-radius bond perception
graph_tolerance = {}
# Charge of the reacting system
charge = {}
# Workers of validate-batch (default: half the CPU count)
# workers = 4

[search]
# Reactive complex factors, tried in order
intra_factors = {}
inter_factors = {}
attempts_per_factor = {}
# Frequency threshold applied during the search (cm^-1)
freq_cutoff = {}
# Workers of the search (default: CPU count)
# workers = 8

[programs]
gaussian = {}
xtb = {}
guess_generator = {}
method = {}
basis_set = {}
ts_keywords = {}
mem = {}
nprocs = {}

[cleanup]
# Remove attempt scratch between attempts
enabled = {}
# Extra file extensions to keep (comma-separated)
preserve_extensions = {}

[irc]
# Relative bond-perception tolerances tried when matching IRC endpoints
tolerances = {}

[logging]
# debug, info, warn or error
level = {}
"#,
            defaults.validation.factor,
            defaults.validation.disp_cutoff,
            defaults.validation.active_cutoff_ratio,
            defaults.validation.freq_cutoff,
            defaults.validation.max_atom_disp,
            defaults.validation.graph_tolerance,
            defaults.validation.charge,
            join(&defaults.search.intra_factors),
            join(&defaults.search.inter_factors),
            defaults.search.attempts_per_factor,
            defaults.search.freq_cutoff,
            defaults.programs.gaussian,
            defaults.programs.xtb,
            defaults.programs.guess_generator,
            defaults.programs.method,
            defaults.programs.basis_set,
            defaults.programs.ts_keywords,
            defaults.programs.mem,
            defaults.programs.nprocs,
            defaults.cleanup.enabled,
            defaults.cleanup.preserve_extensions.join(","),
            join(&defaults.irc.tolerances),
            defaults.logging.level,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_template_loads_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        SettingsManager::create_template(&path).unwrap();

        let manager = SettingsManager::load_file(&path).unwrap();
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_malformed_layer_is_an_error() {
        let dir = TempDir::new().unwrap();
        let system = dir.path().join("system.cfg");
        let local = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&system, "[validation]\nfreq_cutoff = 80\n").unwrap();
        fs::write(&local, "[search]\nintra_factors = 1.2, fast\n").unwrap();

        let err = SettingsManager::load_layers(&[
            ("system", Some(system.clone())),
            ("user", None),
            ("local", Some(local.clone())),
        ])
        .unwrap_err();
        match err {
            ConfigError::File { path, source } => {
                assert_eq!(path, local);
                assert!(matches!(*source, ConfigError::InvalidValue(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Without the broken file the earlier layer applies
        let manager = SettingsManager::load_layers(&[("system", Some(system)), ("local", None)]).unwrap();
        assert_eq!(manager.settings().validation.freq_cutoff, 80.0);
        assert!(manager.config_source().starts_with("system config"));
    }

    #[test]
    fn test_partial_file_overrides_single_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[validation]\nfreq_cutoff = 80\nworkers = 3\n\n[search]\ninter_factors = 2.0, 3.0\n\n[cleanup]\npreserve_extensions = .log,chk\n",
        )
        .unwrap();

        let settings = SettingsManager::load_file(&path).unwrap().settings().clone();
        assert_eq!(settings.validation.freq_cutoff, 80.0);
        assert_eq!(settings.validation.factor, 1.05);
        assert_eq!(settings.validation_workers, Some(3));
        assert_eq!(settings.search.inter_factors, vec![2.0, 3.0]);
        assert_eq!(settings.search.intra_factors, vec![1.2, 1.3, 1.8]);
        assert_eq!(settings.cleanup.preserve_extensions, vec!["log", "chk"]);

        let search = settings.search_config("work".into(), None);
        assert_eq!(search.validation.freq_cutoff, 150.0);
        let batch = settings.validation_batch_config("in".into(), "out".into(), None);
        assert_eq!(batch.validation.freq_cutoff, 80.0);
        assert_eq!(batch.workers, Some(3));
    }

    #[test]
    fn test_irc_tolerances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[irc]\ntolerances = 0.35, 0.2\n").unwrap();
        let settings = SettingsManager::load_file(&path).unwrap().settings().clone();
        assert_eq!(settings.irc.tolerances, vec![0.35, 0.2]);

        fs::write(&path, "[irc]\ntolerances = 0.3, -0.1\n").unwrap();
        assert!(matches!(
            SettingsManager::load_file(&path),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[search]\nattempts_per_factor = many\n").unwrap();
        assert!(matches!(
            SettingsManager::load_file(&path),
            Err(ConfigError::InvalidValue(_))
        ));

        fs::write(&path, "[validation]\nfreq_cutoff = -100\n").unwrap();
        assert!(matches!(
            SettingsManager::load_file(&path),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
