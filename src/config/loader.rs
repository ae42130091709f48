//! Configuration Loader
//!
//! Layers an optional configuration file (any format the `config` crate
//! detects from the extension) under environment overrides such as
//! `FLEET__WORKER__NAME=micro`, then validates the result.

use super::FleetConfig;
use crate::error::{FleetError, Result};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "FLEET";

/// Builder for [`FleetConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration file; a missing file is an error
    pub fn with_file(mut self, path: Option<&Path>) -> Self {
        self.file = path.map(Path::to_path_buf);
        self
    }

    /// Use a different environment prefix (mostly for tests)
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    pub fn load(&self) -> Result<FleetConfig> {
        let prefix = self.env_prefix.as_deref().unwrap_or(ENV_PREFIX);
        let mut builder = Config::builder();

        if let Some(file) = &self.file {
            debug!(file = %file.display(), "Loading configuration file");
            builder = builder.add_source(File::from(file.as_path()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: FleetConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FleetError::Configuration(e.to_string()))?;

        config.validate()?;
        debug!(worker = %config.worker.name, index = %config.index.addr, "Configuration loaded");
        Ok(config)
    }
}
