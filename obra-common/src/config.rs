//! Bootstrap configuration loading
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is not fatal: a warning is logged and the
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the database path
pub const ENV_DATABASE_PATH: &str = "OBRA_DATABASE_PATH";

/// Environment variable overriding the TOML config location
pub const ENV_CONFIG_PATH: &str = "OBRA_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP server port
    #[serde(default)]
    pub port: Option<u16>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Regulator endpoint and submission policy
    #[serde(default)]
    pub regulator: RegulatorConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Regulator connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatorConfig {
    /// Base URL of the Regulator's interoperability API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-call timeout for submissions and page fetches
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Minimum spacing between consecutive requests
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Attempts per record; 1 means no automatic retry
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Reject invalid records before they reach the Regulator
    #[serde(default)]
    pub require_valid_before_submit: bool,

    /// Upper bound on pages fetched by one import run
    #[serde(default = "default_import_max_pages")]
    pub import_max_pages: u32,

    /// Fallback username when none is stored for the tenant
    #[serde(default)]
    pub username: Option<String>,

    /// Fallback token when none is stored for the tenant
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            min_interval_ms: default_min_interval_ms(),
            max_attempts: default_max_attempts(),
            require_valid_before_submit: false,
            import_max_pages: default_import_max_pages(),
            username: None,
            token: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:8099/api/v1".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_min_interval_ms() -> u64 {
    200
}

fn default_max_attempts() -> u32 {
    1
}

fn default_import_max_pages() -> u32 {
    100
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from an explicit path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load configuration, degrading to defaults when the file is missing or invalid
    pub fn load_or_default(cli_path: Option<&Path>) -> Self {
        let path = match cli_path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        };

        match path {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring invalid configuration file: {}", e);
                    Self::default()
                }
            },
            Some(path) => {
                warn!("Config file not found at {}, using defaults", path.display());
                Self::default()
            }
            None => {
                warn!("No config directory available, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve the database path: CLI → ENV → TOML → compiled default
    pub fn resolve_database_path(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.database_path {
            return path.clone();
        }

        default_data_folder().join("obra.db")
    }
}

/// Default configuration file path for the platform
///
/// `OBRA_CONFIG` takes precedence over the per-user config directory.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("obra").join("obra-interop.toml"))
}

/// OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("obra"))
        .unwrap_or_else(|| PathBuf::from("./obra_data"))
}
