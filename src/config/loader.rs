//! Configuration Loader
//!
//! Environment-aware configuration loading: defaults, an optional TOML file, then
//! `CONDUCTOR__SECTION__KEY` environment overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::ConductorConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "CONDUCTOR";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_CONFIG_FILE: &str = "config/conductor.toml";

/// Loaded configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ConductorConfig,
    environment: String,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_path(None)
    }

    /// Load configuration from an explicit TOML file.
    ///
    /// Without a path the default `config/conductor.toml` is used when present; an
    /// explicit path must exist.
    pub fn load_from_path(path: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_sources(path, None)
    }

    /// Load with an explicit environment map instead of the process environment.
    /// This is useful for testing without modifying global environment variables.
    pub fn load_with_sources(
        path: Option<PathBuf>,
        env_source: Option<Vec<(String, String)>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let (file, required) = match path {
            Some(path) => (path, true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        debug!(
            environment = %environment,
            path = %file.display(),
            required = required,
            "Loading conductor configuration"
        );

        let config = Self::build(&file, required, env_source)?;
        config.validate()?;

        let source_path = (required || file.exists()).then_some(file);
        info!(
            environment = %environment,
            source = ?source_path,
            coordination_backend = ?config.coordination.backend,
            max_conflict_retries = config.workflow_engine.max_conflict_retries,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source_path,
        }))
    }

    fn build(
        file: &Path,
        required: bool,
        env_source: Option<Vec<(String, String)>>,
    ) -> ConfigResult<ConductorConfig> {
        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);
        if let Some(vars) = env_source {
            environment = environment.source(Some(vars.into_iter().collect()));
        }

        let settings = Config::builder()
            .add_source(
                File::from(file)
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(environment)
            .build()
            .map_err(|e| ConfigurationError::load_error(file.display().to_string(), e))?;

        Ok(settings.try_deserialize::<ConductorConfig>()?)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Detect the current environment from `CONDUCTOR_ENV`
    pub fn detect_environment() -> String {
        env::var("CONDUCTOR_ENV").unwrap_or_else(|_| "development".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinationBackend;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write toml");
        file
    }

    #[test]
    fn test_file_values_override_defaults() {
        let file = write_toml(
            r#"
            [coordination]
            backend = "local"
            lock_timeout_ms = 500

            [callback]
            max_retries = 3
            "#,
        );

        let manager =
            ConfigManager::load_with_sources(Some(file.path().to_path_buf()), Some(vec![]))
                .unwrap();
        let config = manager.config();

        assert_eq!(config.coordination.backend, CoordinationBackend::Local);
        assert_eq!(config.coordination.lock_timeout_ms, 500);
        assert_eq!(config.callback.max_retries, Some(3));
        assert_eq!(
            config.workflow_engine,
            crate::config::WorkflowEngineConfig::default()
        );
        assert_eq!(manager.source_path(), Some(file.path()));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_toml("[workflow_engine]\nmax_conflict_retries = 2\n");
        let vars = vec![(
            "CONDUCTOR__WORKFLOW_ENGINE__MAX_CONFLICT_RETRIES".to_string(),
            "7".to_string(),
        )];

        let manager =
            ConfigManager::load_with_sources(Some(file.path().to_path_buf()), Some(vars)).unwrap();
        assert_eq!(manager.config().workflow_engine.max_conflict_retries, 7);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = ConfigManager::load_with_sources(Some(missing), Some(vec![])).unwrap_err();
        assert!(matches!(err, ConfigurationError::LoadError { .. }));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let file = write_toml("[events]\nchannel_capacity = 0\n");
        let err = ConfigManager::load_with_sources(Some(file.path().to_path_buf()), Some(vec![]))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }
}
