//! Pipeline configuration
//!
//! [`LifeportConfig::load`] reads `config/config.toml` (optional) and then environment variables
//! prefixed `LIFEPORT` with `__` as the section separator, e.g.
//! `LIFEPORT__SANDBOX__URL=postgresql://...` or `LIFEPORT__MIGRATION__BATCH_SIZE=5000`.
//! Every field has a default, so an empty environment yields a usable (if unconnected) config.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "config/config.toml";
const ENV_PREFIX: &str = "LIFEPORT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LifeportConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sandbox: TargetConfig,
    #[serde(default)]
    pub production: TargetConfig,
    #[serde(default)]
    pub migration: MigrationSettings,
    #[serde(default)]
    pub artifacts: ArtifactSettings,
}

/// MySQL source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,
    /// Schema name; stripped from `db.table` references. Taken from the URL when empty.
    #[serde(default)]
    pub database: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            database: String::new(),
        }
    }
}

/// PostgreSQL target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TargetConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Rows per source fetch / target insert
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Continue with the next table when one table's transfer fails
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    /// Maximum sandbox repair cycles
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First N errors per category listed in the run report
    #[serde(default = "default_report_error_limit")]
    pub report_error_limit: usize,
    /// How long to wait for the sandbox advisory lock
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
    /// Skip data migration when schema validation fails
    #[serde(default = "default_true")]
    pub skip_data_on_validation_failure: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            continue_on_error: true,
            max_retries: default_max_retries(),
            report_error_limit: default_report_error_limit(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            skip_data_on_validation_failure: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSettings {
    #[serde(default = "default_artifacts_dir")]
    pub dir: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
        }
    }
}

fn default_source_url() -> String {
    "mysql://root@localhost:3306/sakila".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    5
}

fn default_report_error_limit() -> usize {
    10
}

fn default_lock_timeout_seconds() -> u64 {
    60
}

fn default_artifacts_dir() -> String {
    "artifacts".to_string()
}

impl LifeportConfig {
    /// Load from `config/config.toml` (if present) and `LIFEPORT__*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load from `path` (if present) and `LIFEPORT__*` environment variables
    ///
    /// An unreadable or malformed file is reported and skipped; the environment still applies.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if path.exists() {
                    log::warn!(
                        "Failed to load config file {}, falling back to env. Error: {}",
                        path.display(),
                        err
                    );
                }
                Config::builder()
                    .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {}, then env-only error: {}",
                            err, env_err
                        ))
                    })?
            }
        };

        let mut loaded: LifeportConfig = settings.try_deserialize().map_err(|e| {
            ConfigError::Message(format!("Configuration could not be deserialized: {}", e))
        })?;
        loaded.fill_derived();
        Ok(loaded)
    }

    /// Derive the source database name from the URL when not set explicitly
    pub fn fill_derived(&mut self) {
        if self.source.database.is_empty() {
            if let Some(db) = crate::connection::source_database_from_url(&self.source.url) {
                self.source.database = db;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = LifeportConfig::default();
        assert_eq!(cfg.migration.batch_size, 1000);
        assert_eq!(cfg.migration.max_retries, 5);
        assert!(cfg.migration.continue_on_error);
        assert!(cfg.migration.skip_data_on_validation_failure);
        assert_eq!(cfg.migration.report_error_limit, 10);
        assert_eq!(cfg.artifacts.dir, "artifacts");
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[source]\nurl = \"mysql://root:pw@db:3306/sakila\"\n\n[migration]\nbatch_size = 250\nmax_retries = 2\n"
        )
        .unwrap();

        let cfg = LifeportConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.migration.batch_size, 250);
        assert_eq!(cfg.migration.max_retries, 2);
        assert!(cfg.migration.continue_on_error);
        assert_eq!(cfg.source.database, "sakila");
        assert_eq!(cfg.artifacts.dir, "artifacts");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = LifeportConfig::load_from(Path::new("/nonexistent/lifeport.toml")).unwrap();
        assert_eq!(cfg.migration.lock_timeout_seconds, 60);
    }
}
