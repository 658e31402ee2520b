//! Migration tool configuration
//!
//! [`MigrateConfig::load`] reads an optional TOML file and then environment
//! variables prefixed with `DOCSHIFT` (nested keys joined by `__`, e.g.
//! `DOCSHIFT__DATABASE__DIR`). `DOCSHIFT__SCRIPT__COMMAND` is split on
//! whitespace into an argv list.

use crate::store::{CommandScriptRunner, FileStore, StoreError};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/docshift.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct MigrateConfig {
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub script: ScriptSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Target database
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Directory of the file-backed store
    #[serde(default = "default_database_dir")]
    pub dir: PathBuf,
}

/// External runner for script migrations
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptSettings {
    /// Program and arguments; the script body is written to its stdin
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_script_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Per-migration deadline; unset means no limit
    #[serde(default)]
    pub step_timeout_seconds: Option<u64>,
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_database_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_script_timeout_seconds() -> u64 {
    300
}

fn default_lock_timeout_seconds() -> u64 {
    30
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            migrations_dir: default_migrations_dir(),
            database: DatabaseSettings::default(),
            script: ScriptSettings::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { dir: default_database_dir() }
    }
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_seconds: default_script_timeout_seconds(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_timeout_seconds: None,
            lock_timeout_seconds: default_lock_timeout_seconds(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("DOCSHIFT")
        .separator("__")
        .try_parsing(true)
        .list_separator(" ")
        .with_list_parse_key("script.command")
}

impl MigrateConfig {
    /// Load the configuration from `path` (default `config/docshift.toml`),
    /// falling back to env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let builder = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(environment());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // File present but unusable: warn and retry with env only
                if path.exists() {
                    log::warn!(
                        "Failed to load config file {}, falling back to env. Error: {}",
                        path.display(),
                        err
                    );
                }
                Config::builder()
                    .add_source(environment())
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {}, then env-only error: {}",
                            err, env_err
                        ))
                    })?
            }
        };

        settings.try_deserialize::<MigrateConfig>().map_err(|e| {
            ConfigError::Message(format!("Migration configuration is invalid: {}", e))
        })
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.engine.step_timeout_seconds.map(Duration::from_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.lock_timeout_seconds)
    }

    /// Runner for script migrations, if a command is configured
    pub fn script_runner(&self) -> Option<CommandScriptRunner> {
        CommandScriptRunner::from_argv(&self.script.command)
            .map(|runner| runner.with_timeout(Duration::from_secs(self.script.timeout_seconds)))
    }

    /// Open the configured file store with the configured lock timeout and script runner
    pub fn open_store(&self) -> Result<FileStore, StoreError> {
        let store = FileStore::open(&self.database.dir)?.with_lock_timeout(self.lock_timeout());
        Ok(match self.script_runner() {
            Some(runner) => store.with_script_runner(runner),
            None => store,
        })
    }
}
