//! Configuration settings and validation.

use crate::embeddings::{ModelArtifact, PoolConfig, DEFAULT_BATCH_SIZE, MAX_SEQ_LENGTH};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Longest sequence the reference model has position embeddings for.
const MODEL_POSITION_LIMIT: usize = 512;

/// Main configuration for embedpool.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the model cache.
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Number of parallel worker slots.
    pub pool_size: usize,

    /// Maximum time a caller waits for an idle worker.
    pub checkout_timeout: Duration,

    /// Token length every text is truncated or padded to.
    pub max_sequence_length: usize,

    /// Texts per inference call.
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            pool_size: default_pool_size(),
            checkout_timeout: Duration::from_secs(60),
            max_sequence_length: MAX_SEQ_LENGTH,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Number of available processor cores, falling back to 1.
#[must_use]
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.pool_size == 0 {
            return Err(Error::config("pool_size cannot be 0"));
        }

        if self.checkout_timeout.is_zero() {
            return Err(Error::config("checkout_timeout cannot be 0"));
        }

        if self.batch_size == 0 {
            return Err(Error::config("batch_size cannot be 0"));
        }

        if self.max_sequence_length == 0 || self.max_sequence_length > MODEL_POSITION_LIMIT {
            return Err(Error::config(format!(
                "max_sequence_length must be between 1 and {MODEL_POSITION_LIMIT}"
            )));
        }

        Ok(())
    }

    /// Directory the model archive is cached in.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    /// Pool parameters derived from this configuration.
    #[must_use]
    pub const fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            checkout_timeout: self.checkout_timeout,
            max_sequence_length: self.max_sequence_length,
            batch_size: self.batch_size,
        }
    }

    /// The reference model artifact, cached under [`Config::models_dir`].
    #[must_use]
    pub fn artifact(&self) -> ModelArtifact {
        ModelArtifact::minilm(self.models_dir())
    }
}
