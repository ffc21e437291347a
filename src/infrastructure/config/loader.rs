use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{Config, DEFAULT_RETRY_KEY};
use crate::infrastructure::logging::config::{LOG_FORMATS, LOG_LEVELS, ROTATIONS};

/// Project directory holding `config.yaml` and `local.yaml`.
pub const CONFIG_DIR: &str = ".warden";

/// Prefix of environment overrides, e.g. `WARDEN_LEDGER__TOTAL_BUDGET`.
pub const ENV_PREFIX: &str = "WARDEN_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid total_budget: must be greater than 0")]
    ZeroBudget,

    #[error("Invalid {0}: must be at least 1")]
    BelowMinimum(&'static str),

    #[error(
        "Invalid backoff configuration: base_delay_seconds ({0}) must not exceed max_delay_seconds ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("max_retries_by_type must contain a 'default' entry")]
    MissingDefaultRetries,

    #[error("Storage path {0} cannot be empty")]
    EmptyPath(&'static str),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .warden/config.yaml
    /// 3. .warden/local.yaml (optional local overrides)
    /// 4. Environment variables (WARDEN_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(Path::new("."))
    }

    /// Same as [`ConfigLoader::load`], rooted at `project_dir`.
    pub fn load_from_dir(project_dir: &Path) -> Result<Config> {
        let config_dir = project_dir.join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(config_dir.join("config.yaml")))
            .merge(Yaml::file(config_dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load defaults plus exactly one file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.ledger.total_budget == 0 {
            return Err(ConfigError::ZeroBudget);
        }

        let minimums: [(&'static str, u64); 8] = [
            ("ledger.lock_timeout_ms", config.ledger.lock_timeout_ms),
            (
                "ledger.reclaim_interval_seconds",
                config.ledger.reclaim_interval_seconds,
            ),
            (
                "detector.zombie_threshold_seconds",
                config.detector.zombie_threshold_seconds,
            ),
            (
                "detector.check_interval_seconds",
                config.detector.check_interval_seconds,
            ),
            (
                "detector.max_cleanups_per_minute",
                u64::from(config.detector.max_cleanups_per_minute),
            ),
            (
                "restart.circuit_breaker.failure_threshold",
                u64::from(config.restart.circuit_breaker.failure_threshold),
            ),
            (
                "restart.rate_limits.global_max_per_minute",
                u64::from(config.restart.rate_limits.global_max_per_minute),
            ),
            (
                "restart.rate_limits.per_type_max_per_minute",
                u64::from(config.restart.rate_limits.per_type_max_per_minute),
            ),
        ];
        if let Some(&(name, _)) = minimums.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::BelowMinimum(name));
        }
        if config.detector.max_concurrent_cleanups == 0 {
            return Err(ConfigError::BelowMinimum("detector.max_concurrent_cleanups"));
        }

        let backoff = &config.restart.backoff;
        if backoff.base_delay_seconds > backoff.max_delay_seconds {
            return Err(ConfigError::InvalidBackoff(
                backoff.base_delay_seconds,
                backoff.max_delay_seconds,
            ));
        }

        if !config
            .restart
            .max_retries_by_type
            .contains_key(DEFAULT_RETRY_KEY)
        {
            return Err(ConfigError::MissingDefaultRetries);
        }

        let storage = &config.storage;
        for (name, value) in [
            ("state_dir", &storage.state_dir),
            ("log_dir", &storage.log_dir),
            ("archive_dir", &storage.archive_dir),
            ("pid_dir", &storage.pid_dir),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyPath(name));
            }
        }

        let logging = &config.logging;
        if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(logging.level.clone()));
        }
        if !LOG_FORMATS.contains(&logging.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(logging.format.clone()));
        }
        if !ROTATIONS.contains(&logging.rotation.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidRotation(logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project_with(config_yaml: Option<&str>, local_yaml: Option<&str>) -> TempDir {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        if let Some(yaml) = config_yaml {
            fs::write(config_dir.join("config.yaml"), yaml).unwrap();
        }
        if let Some(yaml) = local_yaml {
            fs::write(config_dir.join("local.yaml"), yaml).unwrap();
        }
        dir
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ledger.total_budget, 100_000);
        assert_eq!(config.ledger.lock_timeout_ms, 3000);
        assert_eq!(config.detector.zombie_threshold_seconds, 300);
        assert_eq!(config.detector.verification_delay_seconds, 2);
        assert_eq!(config.detector.max_cleanups_per_minute, 5);
        assert_eq!(config.restart.backoff.base_delay_seconds, 5);
        assert_eq!(config.restart.backoff.max_delay_seconds, 60);
        assert_eq!(config.restart.max_retries_by_type[DEFAULT_RETRY_KEY], 3);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
ledger:
  total_budget: 5000
restart:
  enabled: false
  max_retries_by_type:
    default: 2
    crawler: 7
  circuit_breaker:
    failure_threshold: 9
logging:
  level: debug
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.ledger.total_budget, 5000);
        assert_eq!(config.ledger.lock_timeout_ms, 3000);
        assert!(!config.restart.enabled);
        assert_eq!(config.restart.max_retries_by_type["crawler"], 7);
        assert_eq!(config.restart.circuit_breaker.failure_threshold, 9);
        assert_eq!(config.restart.circuit_breaker.reset_timeout_seconds, 300);
        assert_eq!(config.logging.level, "debug");
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_budget() {
        let mut config = Config::default();
        config.ledger.total_budget = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroBudget)
        ));
    }

    #[test]
    fn test_validate_zero_threshold() {
        let mut config = Config::default();
        config.restart.circuit_breaker.failure_threshold = 0;
        match ConfigLoader::validate(&config) {
            Err(ConfigError::BelowMinimum(name)) => {
                assert_eq!(name, "restart.circuit_breaker.failure_threshold");
            }
            other => panic!("Expected BelowMinimum, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.restart.backoff.base_delay_seconds = 120;
        config.restart.backoff.max_delay_seconds = 60;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(120, 60))
        ));
    }

    #[test]
    fn test_validate_missing_default_retries() {
        let mut config = Config::default();
        config.restart.max_retries_by_type.clear();
        config
            .restart
            .max_retries_by_type
            .insert("crawler".to_string(), 2);
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::MissingDefaultRetries)
        ));
    }

    #[test]
    fn test_validate_empty_path() {
        let mut config = Config::default();
        config.storage.pid_dir = "  ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyPath("pid_dir"))
        ));
    }

    #[test]
    fn test_validate_invalid_logging() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));

        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRotation(_))
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        let project = project_with(
            Some("ledger:\n  total_budget: 5000\n  lock_timeout_ms: 1000\nlogging:\n  format: json\n"),
            Some("ledger:\n  total_budget: 8000\n"),
        );

        let config = temp_env::with_vars_unset(
            ["WARDEN_LEDGER__TOTAL_BUDGET", "WARDEN_LOGGING__LEVEL"],
            || ConfigLoader::load_from_dir(project.path()).unwrap(),
        );

        assert_eq!(config.ledger.total_budget, 8000, "Local override should win");
        assert_eq!(config.ledger.lock_timeout_ms, 1000, "Base value should persist");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_env_override() {
        let project = project_with(Some("ledger:\n  total_budget: 5000\n"), None);

        let config = temp_env::with_vars(
            [
                ("WARDEN_LEDGER__TOTAL_BUDGET", Some("42000")),
                ("WARDEN_DETECTOR__ZOMBIE_THRESHOLD_SECONDS", Some("90")),
                ("WARDEN_LOGGING__LEVEL", Some("debug")),
            ],
            || ConfigLoader::load_from_dir(project.path()).unwrap(),
        );

        assert_eq!(config.ledger.total_budget, 42000);
        assert_eq!(config.detector.zombie_threshold_seconds, 90);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let project = project_with(Some("ledger:\n  total_budget: 0\n"), None);
        let path = project.path().join(CONFIG_DIR).join("config.yaml");
        let err = ConfigLoader::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("total_budget"));

        assert!(ConfigLoader::load_from_file(project.path().join("missing.yaml")).is_err());
    }
}
