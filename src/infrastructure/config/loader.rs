use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::{MAX_FIX_LOOPS, MAX_NEGOTIATION_ROUNDS};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid workers: {0}. Must be between 1 and 64")]
    InvalidWorkers(usize),

    #[error("Invalid max_loops: {0}. Must be between 1 and 3")]
    InvalidMaxLoops(u32),

    #[error("Invalid max_rounds: {0}. Must be between 1 and 5")]
    InvalidMaxRounds(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid temperature schedule: start ({0}) must be >= 0 and <= end ({1}), end <= 2")]
    InvalidTemperature(f64, f64),

    #[error("Invalid repeat_runs: {0}. Must be at least 1")]
    InvalidRepeatRuns(u32),

    #[error(
        "Invalid thresholds: collapse_threshold ({0}) must be below cross_examination_threshold ({1}), which must be at most 100"
    )]
    InvalidThresholds(u8, u8),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .ecoverify/config.yaml (project config)
    /// 3. .ecoverify/local.yaml (local overrides, optional)
    /// 4. Environment variables (ECOVERIFY_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".ecoverify/config.yaml"))
            .merge(Yaml::file(".ecoverify/local.yaml"))
            .merge(Env::prefixed("ECOVERIFY_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("ECOVERIFY_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.workers == 0 || config.workers > 64 {
            return Err(ConfigError::InvalidWorkers(config.workers));
        }
        if config.max_loops == 0 || config.max_loops > MAX_FIX_LOOPS {
            return Err(ConfigError::InvalidMaxLoops(config.max_loops));
        }
        if config.max_rounds == 0 || config.max_rounds > MAX_NEGOTIATION_ROUNDS {
            return Err(ConfigError::InvalidMaxRounds(config.max_rounds));
        }
        if config.project_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "project_timeout_secs must be positive".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let escalation = &config.escalation;
        if escalation.temperature_start < 0.0
            || escalation.temperature_start > escalation.temperature_end
            || escalation.temperature_end > 2.0
        {
            return Err(ConfigError::InvalidTemperature(
                escalation.temperature_start,
                escalation.temperature_end,
            ));
        }
        if escalation.round_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "escalation.round_timeout_secs must be positive".to_string(),
            ));
        }
        if let Some(agent) = &escalation.agent {
            if agent.endpoint.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "escalation.agent.endpoint cannot be empty".to_string(),
                ));
            }
        }

        let audit = &config.audit;
        if audit.repeat_runs == 0 {
            return Err(ConfigError::InvalidRepeatRuns(audit.repeat_runs));
        }
        if audit.cross_examination_threshold > 100
            || audit.collapse_threshold >= audit.cross_examination_threshold
        {
            return Err(ConfigError::InvalidThresholds(
                audit.collapse_threshold,
                audit.cross_examination_threshold,
            ));
        }

        if config.vcs.branch_prefix.trim().is_empty() || config.vcs.tag_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "vcs branch and tag prefixes cannot be empty".to_string(),
            ));
        }
        if config.vcs.branch_prefix == config.vcs.tag_prefix {
            return Err(ConfigError::ValidationFailed(
                "vcs branch and tag prefixes must differ".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::{AgentEndpointConfig, LogFormat};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_loops, 3);
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.audit.collapse_threshold, 25);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
workers: 8
max_loops: 2
audit:
  repeat_runs: 5
  penalties:
    missing_evidence: 25
escalation:
  temperature_start: 0.2
  agent:
    endpoint: http://localhost:8080/propose
logging:
  level: debug
  format: json
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.workers, 8);
        assert_eq!(config.max_loops, 2);
        assert_eq!(config.audit.repeat_runs, 5);
        assert_eq!(config.audit.penalties.missing_evidence, 25);
        assert_eq!(config.audit.penalties.below_floor, 30);
        assert!((config.escalation.temperature_start - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.escalation.agent.as_ref().unwrap().max_retries, 2);
        assert_eq!(config.logging.format, LogFormat::Json);
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_workers() {
        let config = Config {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidWorkers(0)
        ));
    }

    #[test]
    fn test_validate_loop_and_round_bounds() {
        let config = Config {
            max_loops: 4,
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxLoops(4)
        ));

        let config = Config {
            max_rounds: 6,
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxRounds(6)
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_decreasing_temperature() {
        let mut config = Config::default();
        config.escalation.temperature_start = 0.9;
        config.escalation.temperature_end = 0.3;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidTemperature(_, _)
        ));
    }

    #[test]
    fn test_validate_thresholds() {
        let mut config = Config::default();
        config.audit.collapse_threshold = 95;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidThresholds(95, 90)
        ));
    }

    #[test]
    fn test_validate_empty_agent_endpoint() {
        let mut config = Config::default();
        config.escalation.agent = Some(AgentEndpointConfig {
            endpoint: "  ".to_string(),
            model: None,
            api_key_env: None,
            max_retries: 1,
        });
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::ValidationFailed(_)
        ));
    }

    #[test]
    fn test_env_override() {
        temp_env::with_vars(
            [
                ("ECOVERIFY_WORKERS", Some("12")),
                ("ECOVERIFY_AUDIT__REPEAT_RUNS", Some("1")),
                ("ECOVERIFY_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load().expect("env overrides should load");
                assert_eq!(config.workers, 12);
                assert_eq!(config.audit.repeat_runs, 1);
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_env_override_is_validated() {
        temp_env::with_var("ECOVERIFY_MAX_LOOPS", Some("9"), || {
            assert!(ConfigLoader::load().is_err());
        });
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "workers: 2\nvcs:\n  branch_prefix: verify/fix").unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.vcs.branch_prefix, "verify/fix");
        assert_eq!(config.vcs.tag_prefix, "ecoverify/baseline");
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(ConfigLoader::load_from_file("/nonexistent/ecoverify.yaml").is_err());
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "workers: 5\nlogging:\n  level: info\n  format: json").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "workers: 7\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.workers, 7, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.format,
            LogFormat::Json,
            "Base value should persist when not overridden"
        );
    }
}
