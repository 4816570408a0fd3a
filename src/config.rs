use std::path::PathBuf;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Where a configuration value came from. Tracked per-field so that a
/// validation error can tell the operator exactly which environment
/// variable or `config.toml` key to fix, the way `fspulse`'s config layer
/// does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigSource {
    Environment,
    ConfigFile,
    Default,
}

fn default_source() -> ConfigSource {
    ConfigSource::Default
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigValue<T> {
    pub value: T,
    #[serde(skip, default = "default_source")]
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    fn new(value: T, source: ConfigSource) -> Self {
        ConfigValue { value, source }
    }
}

/// Raw, un-provenanced shape used as the Figment merge target. Figment
/// can't track per-field provenance itself, so we merge into this plain
/// struct first and then re-wrap each field with the layer it actually
/// came from (see [`Config::load`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawConfig {
    base_dir: Option<String>,
    bind_host: String,
    bind_port: u16,
    log_level: String,
    excluded_patterns: Vec<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            base_dir: None,
            bind_host: "127.0.0.1".to_string(),
            bind_port: 8980,
            log_level: "info".to_string(),
            excluded_patterns: crate::scanner::DEFAULT_EXCLUDED_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Operator-tunable settings for the indexing service. Everything else
/// (catalogue schema, exclusion algorithm, MIME table) is fixed by the
/// spec and not configurable.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: ConfigValue<PathBuf>,
    pub bind_host: ConfigValue<String>,
    pub bind_port: ConfigValue<u16>,
    pub log_level: ConfigValue<String>,
    pub excluded_patterns: ConfigValue<Vec<String>>,
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl Config {
    /// Loads configuration from, in increasing priority: built-in
    /// defaults, `config.toml` in the project's data directory (or
    /// `FSINDEXD_DATA_DIR` when set), then `FSINDEXD_*` environment
    /// variables. Mirrors `fspulse::config::Config::load_config`'s layering
    /// with `figment`.
    pub fn load(project_dirs: &ProjectDirs) -> Result<Self, IndexError> {
        let config_path = Self::config_path(project_dirs);

        let figment = Figment::new()
            .merge(Serialized::defaults(RawConfig::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("FSINDEXD_"));

        let defaults = RawConfig::default();
        let file_only: RawConfig = Figment::new()
            .merge(Serialized::defaults(RawConfig::default()))
            .merge(Toml::file(&config_path))
            .extract()
            .map_err(|e| IndexError::Config(format!("invalid config.toml: {e}")))?;
        let merged: RawConfig = figment
            .extract()
            .map_err(|e| IndexError::Config(format!("invalid configuration: {e}")))?;

        let source_of = |default: &str, file: &str, merged_val: &str| -> ConfigSource {
            if merged_val != file {
                ConfigSource::Environment
            } else if file != default {
                ConfigSource::ConfigFile
            } else {
                ConfigSource::Default
            }
        };

        if !LOG_LEVELS.contains(&merged.log_level.as_str()) {
            return Err(IndexError::Config(format!(
                "log_level must be one of {LOG_LEVELS:?}, got '{}'",
                merged.log_level
            )));
        }

        let base_dir = merged.base_dir.clone().map(PathBuf::from).unwrap_or_else(|| {
            project_dirs.data_local_dir().join("db")
        });
        let base_dir_source = if merged.base_dir.is_some() {
            if std::env::var("FSINDEXD_BASE_DIR").is_ok() {
                ConfigSource::Environment
            } else {
                ConfigSource::ConfigFile
            }
        } else {
            ConfigSource::Default
        };

        Ok(Config {
            base_dir: ConfigValue::new(base_dir, base_dir_source),
            bind_host: ConfigValue::new(
                merged.bind_host.clone(),
                source_of(&defaults.bind_host, &file_only.bind_host, &merged.bind_host),
            ),
            bind_port: ConfigValue::new(
                merged.bind_port,
                if merged.bind_port != file_only.bind_port {
                    ConfigSource::Environment
                } else if file_only.bind_port != defaults.bind_port {
                    ConfigSource::ConfigFile
                } else {
                    ConfigSource::Default
                },
            ),
            log_level: ConfigValue::new(
                merged.log_level.clone(),
                source_of(&defaults.log_level, &file_only.log_level, &merged.log_level),
            ),
            excluded_patterns: ConfigValue::new(
                merged.excluded_patterns,
                ConfigSource::Default,
            ),
        })
    }

    fn config_path(project_dirs: &ProjectDirs) -> PathBuf {
        let config_dir = std::env::var("FSINDEXD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_dirs.data_local_dir().to_path_buf());
        config_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_apply_when_no_file_or_env() {
        let dirs = ProjectDirs::from("", "", "fsindexd-test-defaults").unwrap();
        let config = Config::load(&dirs).unwrap();
        assert_eq!(config.bind_host.value, "127.0.0.1");
        assert_eq!(config.bind_port.value, 8980);
        assert_eq!(config.bind_port.source, ConfigSource::Default);
        assert_eq!(config.log_level.value, "info");
    }

    #[test]
    #[serial]
    fn rejects_invalid_log_level() {
        std::env::set_var("FSINDEXD_LOG_LEVEL", "verbose");
        let dirs = ProjectDirs::from("", "", "fsindexd-test-badlevel").unwrap();
        let result = Config::load(&dirs);
        std::env::remove_var("FSINDEXD_LOG_LEVEL");
        assert!(result.is_err());
    }
}
