use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// bd-workflow configuration read from `~/.config/bd-workflow/config.toml`.
///
/// Every field has a default, so a missing or partial file is valid.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub agents: AgentsConfig,
    pub workflows: WorkflowsConfig,
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub coordination_path: PathBuf,
    pub engine_path: PathBuf,
    pub issues_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            coordination_path: PathBuf::from("./data/coordination.db"),
            engine_path: PathBuf::from("./data/tempolite.db"),
            issues_path: PathBuf::from("./.beads/beads.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    pub default_max_workload: i64,
    /// Base delay between step retries; attempt `n` waits `n` times this.
    pub retry_backoff_ms: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default_max_workload: 5,
            retry_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowsConfig {
    pub default_priority: i32,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self { default_priority: 2 }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationsConfig {
    pub directory: PathBuf,
    pub auto_migrate: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./migrations"),
            auto_migrate: true,
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bd-workflow").join("config.toml"))
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present and built-in defaults otherwise. Environment variables
    /// override file values.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found at {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => config_path().filter(|p| p.exists()),
        };

        let config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Apply `BD_WORKFLOW_DB` and `BD_WORKFLOW_LOG` overrides.
    pub fn with_env<F: Fn(&str) -> Option<String>>(mut self, lookup: F) -> Self {
        if let Some(db) = lookup("BD_WORKFLOW_DB").filter(|v| !v.is_empty()) {
            self.database.coordination_path = PathBuf::from(db);
        }
        if let Some(level) = lookup("BD_WORKFLOW_LOG").filter(|v| !v.is_empty()) {
            self.logging.level = level;
        }
        self
    }
}
