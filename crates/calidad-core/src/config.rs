//! Pipeline configuration.
//!
//! Values come from an optional `calidad.toml`, then environment overrides:
//! - `DATABASE_URL` (or `CALIDAD_DATABASE_URL`)
//! - `CALIDAD_DATA_DIR`
//! - `CALIDAD_OUT_OF_RANGE` (`clamp` or `reject`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Upper bound on rows per upsert statement; Postgres allows 65535 bind parameters.
pub const MAX_CHUNK_SIZE: usize = 2000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EtlConfig {
    pub paths: PathsConfig,
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub raw_file: String,
    pub clean_csv: String,
    pub clean_parquet: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            raw_file: "calidad_agua.csv".to_string(),
            clean_csv: "calidad_agua_clean.csv".to_string(),
            clean_parquet: "calidad_agua_clean.parquet".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn raw_path(&self) -> PathBuf {
        self.data_dir.join(&self.raw_file)
    }

    pub fn clean_csv_path(&self, output_dir: Option<&Path>) -> PathBuf {
        output_dir.unwrap_or(self.data_dir.as_path()).join(&self.clean_csv)
    }

    pub fn clean_parquet_path(&self, output_dir: Option<&Path>) -> PathBuf {
        output_dir.unwrap_or(self.data_dir.as_path()).join(&self.clean_parquet)
    }
}

/// Connection settings. `url` wins; otherwise it is assembled from the parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub chunk_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: 5432,
            name: None,
            user: None,
            password: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
            chunk_size: 1000,
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        match (&self.host, &self.name, &self.user) {
            (Some(host), Some(name), Some(user)) => {
                let credentials = match &self.password {
                    Some(password) => format!("{user}:{password}"),
                    None => user.clone(),
                };
                Ok(format!(
                    "postgres://{credentials}@{host}:{}/{name}",
                    self.port
                ))
            }
            _ => Err(ConfigError::MissingField(
                "database.url (or DATABASE_URL / CALIDAD_DATABASE_URL)".to_string(),
            )),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutOfRangePolicy {
    #[default]
    Clamp,
    Reject,
}

impl std::str::FromStr for OutOfRangePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(OutOfRangePolicy::Clamp),
            "reject" => Ok(OutOfRangePolicy::Reject),
            other => Err(ConfigError::ValidationError(format!(
                "unknown out-of-range policy '{other}'"
            ))),
        }
    }
}

/// Classification policy for the transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub out_of_range: OutOfRangePolicy,
    /// Overall index at or below this is green.
    pub green_max: f64,
    /// Overall index at or below this (and above `green_max`) is yellow.
    pub yellow_max: f64,
    pub bod_max_mg_l: f64,
    pub cod_max_mg_l: f64,
    pub tss_max_mg_l: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            out_of_range: OutOfRangePolicy::Clamp,
            green_max: 2.0,
            yellow_max: 3.5,
            bod_max_mg_l: 10_000.0,
            cod_max_mg_l: 10_000.0,
            tss_max_mg_l: 50_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay_secs: 120,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl EtlConfig {
    /// Loads the file when given (a missing file is an error), applies the
    /// process environment and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                info!(path = %path.display(), "loaded configuration file");
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").or_else(|| lookup("CALIDAD_DATABASE_URL")) {
            self.database.url = Some(url);
        }
        if let Some(dir) = lookup("CALIDAD_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Some(policy) = lookup("CALIDAD_OUT_OF_RANGE") {
            self.policy.out_of_range = policy.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.policy;
        if !(1.0..=5.0).contains(&policy.green_max)
            || !(1.0..=5.0).contains(&policy.yellow_max)
            || policy.green_max >= policy.yellow_max
        {
            return Err(ConfigError::ValidationError(format!(
                "traffic-light thresholds must satisfy 1 <= green_max < yellow_max <= 5 (got {} / {})",
                policy.green_max, policy.yellow_max
            )));
        }

        for (name, max) in [
            ("bod_max_mg_l", policy.bod_max_mg_l),
            ("cod_max_mg_l", policy.cod_max_mg_l),
            ("tss_max_mg_l", policy.tss_max_mg_l),
        ] {
            if !max.is_finite() || max <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "policy.{name} must be a positive number"
                )));
            }
        }

        if self.database.chunk_size == 0 || self.database.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "database.chunk_size must be between 1 and {MAX_CHUNK_SIZE}"
            )));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
