//! Bootstrap configuration loading and root folder resolution
//!
//! Services read a small TOML bootstrap file at startup. Everything here
//! degrades gracefully: a missing TOML file produces a warning and built-in
//! defaults, never a startup failure. A TOML file that exists but cannot be
//! parsed is reported as an error, since silently ignoring it would hide
//! operator mistakes.
//!
//! # Root folder priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`BEATS_ROOT_FOLDER`)
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "BEATS_ROOT_FOLDER";

/// Directory name used under the OS config/data directories
const APP_DIR_NAME: &str = "burnt-beats";

/// Database file name inside the root folder
const DATABASE_FILE_NAME: &str = "beats.db";

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stdout if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load a TOML bootstrap file into `T`
///
/// Missing file: logs a warning and returns `T::default()`.
/// Unreadable or unparsable file: returns [`Error::Config`].
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        warn!(
            "Config file not found at {}, using built-in defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

    info!("Loaded TOML configuration from {}", path.display());
    Ok(config)
}

/// Default location of a module's TOML file
///
/// `~/.config/burnt-beats/<module>.toml` on Linux, the platform equivalent
/// elsewhere, or `./<module>.toml` when no config directory is known.
pub fn default_config_path(module_name: &str) -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR_NAME).join(format!("{}.toml", module_name)))
        .unwrap_or_else(|| PathBuf::from(format!("{}.toml", module_name)))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./burnt_beats_data"))
}

/// Resolves the root folder following the documented priority order
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_override: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl RootFolderResolver {
    /// Create a resolver for the given module (used for logging only)
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_override: None,
            toml_value: None,
        }
    }

    /// Set the command-line override (priority 1)
    pub fn with_cli(mut self, path: Option<PathBuf>) -> Self {
        self.cli_override = path;
        self
    }

    /// Set the value read from the TOML file (priority 3)
    pub fn with_toml(mut self, path: Option<PathBuf>) -> Self {
        self.toml_value = path;
        self
    }

    /// Resolve the root folder
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_override {
            info!("{}: root folder {} (command line)", self.module_name, path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("{}: root folder {} (environment)", self.module_name, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_value {
            info!("{}: root folder {} (TOML)", self.module_name, path.display());
            return path.clone();
        }

        let path = default_root_folder();
        info!("{}: root folder {} (default)", self.module_name, path.display());
        path
    }
}

/// Creates the root folder and derives well-known paths inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder if it does not exist
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    /// Path of the SQLite database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    /// Resolve a possibly-relative path against the root folder
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_folder.join(path)
        }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }
}
