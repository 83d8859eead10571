//! Configuration for upload runs.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (stagelift.toml)
//! ```toml
//! threads = 8
//! max_errors = 40
//! shuffle = true
//! state_path = "data/uploader.json"
//! dump_dir = "/tmp/stagelift"
//! ```

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for one upload run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Workers per stage
    pub threads: usize,
    /// Failures tolerated per stage pass, split evenly across workers
    pub max_errors: usize,
    /// Shuffle records before partitioning to spread correlated keys
    pub shuffle: bool,
    /// Fixed shuffle seed; random when unset
    pub shuffle_seed: Option<u64>,
    /// Save state every N cumulative successes
    pub checkpoint_every: usize,
    /// Upper bound on full passes over a failing stage. The last one runs on
    /// a single worker without an error budget.
    pub max_full_passes: usize,
    /// Where the upload state lives
    pub state_path: PathBuf,
    /// Directory for error dumps (system temp dir when unset)
    pub dump_dir: Option<PathBuf>,
    /// Persist state and report progress. Off for trial runs against fake ids.
    pub wet_run: bool,
    /// Records kept per stage in a partial run
    pub partial_sample: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            max_errors: DEFAULT_MAX_ERRORS,
            shuffle: false,
            shuffle_seed: None,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            max_full_passes: DEFAULT_MAX_FULL_PASSES,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            dump_dir: None,
            wet_run: true,
            partial_sample: DEFAULT_PARTIAL_SAMPLE,
        }
    }
}

impl UploadConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(config_path: Option<&str>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(UploadConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("STAGELIFT_"));

        figment = figment.merge(Serialized::defaults(overrides));

        let config: UploadConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    /// Configuration for a local validation run: one worker, no shuffle,
    /// nothing persisted.
    pub fn dry_run() -> Self {
        Self {
            wet_run: false,
            ..Self::default()
        }
    }

    /// Errors each worker may accumulate before it stops the stage.
    pub fn errors_per_worker(&self, workers: usize) -> usize {
        self.max_errors / workers.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::new("threads must be at least 1"));
        }
        if self.errors_per_worker(self.threads) < 1 {
            return Err(ConfigError::new(format!(
                "max errors per thread must be at least 1 (max_errors {} / threads {})",
                self.max_errors, self.threads
            )));
        }
        if self.checkpoint_every == 0 {
            return Err(ConfigError::new("checkpoint_every must be at least 1"));
        }
        if self.max_full_passes < 2 {
            return Err(ConfigError::new(format!(
                "max_full_passes must be at least 2 (got {}): the last pass runs serially without an error budget",
                self.max_full_passes
            )));
        }
        Ok(())
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_errors: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle_seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wet_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_sample: Option<usize>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
