//! Scratch cleanup of reaction working directories.
//!
//! Every search attempt leaves generator output, Gaussian inputs, logs and
//! checkpoints in the reaction working directory. Between attempts the
//! [`ScratchCleaner`] removes them so that the next attempt starts clean and
//! long batches do not accumulate thousands of files.
//!
//! # File Preservation Strategy
//!
//! - **Always kept**: `reactants_geometry.xyz`, `products_geometry.xyz` and the
//!   `final_outputs/` directory
//! - **Configurable**: files whose extension is listed in `preserve_extensions`
//! - **Deleted**: everything else, including subdirectories
//!
//! # Configuration
//!
//! ```ini
//! [cleanup]
//! # Enable or disable scratch cleanup between attempts (default: true)
//! enabled = true
//! # Additional file extensions to preserve (comma-separated)
//! # preserve_extensions = log,chk
//! ```

use crate::naming::{FINAL_OUTPUTS_DIR, PRODUCTS_XYZ, REACTANTS_XYZ};
use log::{debug, warn};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during cleanup operations.
#[derive(Error, Debug)]
pub enum CleanupError {
    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid path error
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for cleanup operations
pub type Result<T> = std::result::Result<T, CleanupError>;

/// Configuration for cleanup operations.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupConfig {
    /// Enable cleanup between attempts
    pub enabled: bool,

    /// File extensions to preserve (whitelist, without the dot)
    pub preserve_extensions: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preserve_extensions: Vec::new(),
        }
    }
}

/// Removes attempt scratch from reaction working directories.
#[derive(Debug, Clone, Default)]
pub struct ScratchCleaner {
    config: CleanupConfig,
}

impl ScratchCleaner {
    /// Creates a cleaner with the given configuration.
    pub fn new(config: CleanupConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration
    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Returns true if the entry `name` of a working directory must survive cleanup.
    pub fn would_preserve(&self, name: &str) -> bool {
        if name == REACTANTS_XYZ || name == PRODUCTS_XYZ || name == FINAL_OUTPUTS_DIR {
            return true;
        }
        match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .config
                .preserve_extensions
                .iter()
                .any(|keep| keep.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    /// Cleans `directory`, returning the number of removed entries.
    ///
    /// A missing directory is not an error. Entries that cannot be removed are
    /// logged and skipped.
    pub fn clean(&self, directory: &Path) -> Result<usize> {
        if !self.config.enabled || !directory.exists() {
            return Ok(0);
        }
        if !directory.is_dir() {
            return Err(CleanupError::InvalidPath(format!(
                "Path is not a directory: {}",
                directory.display()
            )));
        }

        let mut removed = 0;
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let name = entry.file_name();
            if self.would_preserve(&name.to_string_lossy()) {
                continue;
            }

            let path = entry.path();
            let result = if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        debug!("Removed {} scratch entries from {}", removed, directory.display());
        Ok(removed)
    }
}
