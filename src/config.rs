// Classifier and batch configuration
//
// Values are resolved once at startup, in order:
// 1. CLI flags (applied by the caller through `ConfigOverrides`)
// 2. Environment variables (ENRICH_CLASSIFICATION_URL, ...)
// 3. TOML file (`[classification]` and `[batch]` tables)
// 4. Defaults
//
// Nothing here is consulted again once the stage is built.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PARALLELISM: usize = 4;
pub const DEFAULT_API_ERROR_ALERT_RATIO: f64 = 0.5;
pub const DEFAULT_CLIENT_ID: &str = concat!("transaction-enrichment/", env!("CARGO_PKG_VERSION"));

pub const ENV_URL: &str = "ENRICH_CLASSIFICATION_URL";
pub const ENV_CONNECT_TIMEOUT: &str = "ENRICH_CONNECT_TIMEOUT_SECS";
pub const ENV_READ_TIMEOUT: &str = "ENRICH_READ_TIMEOUT_SECS";
pub const ENV_CLIENT_ID: &str = "ENRICH_CLIENT_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("classification.url is not set (use --url, ENRICH_CLASSIFICATION_URL or the config file)")]
    MissingUrl,

    #[error("classification.url {url:?} is not a valid http(s) URL: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{name} must be a positive number of seconds, got {value:?}")]
    InvalidTimeout { name: &'static str, value: String },

    #[error("batch.parallelism must be at least 1")]
    InvalidParallelism,

    #[error("batch.api_error_alert_ratio must be between 0.0 and 1.0, got {0}")]
    InvalidAlertRatio(f64),
}

/// Read-only settings the enrichment stage is built from
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub client_id: String,
}

impl ClassifierConfig {
    /// Config with default timeouts and client id
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Reject configurations the stage could never serve
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = reqwest::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                name: "connect_timeout_secs",
                value: "0".to_string(),
            });
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                name: "read_timeout_secs",
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

/// Batch driver settings
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub parallelism: usize,
    pub api_error_alert_ratio: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            api_error_alert_ratio: DEFAULT_API_ERROR_ALERT_RATIO,
        }
    }
}

// ============================================================================
// FILE FORMAT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub classification: ClassificationSection,
    #[serde(default)]
    pub batch: BatchSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationSection {
    pub url: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSection {
    pub parallelism: Option<usize>,
    pub api_error_alert_ratio: Option<f64>,
}

impl FileConfig {
    /// Load a TOML config file; the file must exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load a TOML config file if present, else the empty config
    pub fn load_optional(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Values supplied on the command line; `None` falls through to env/file/defaults
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub client_id: Option<String>,
    pub parallelism: Option<usize>,
}

/// Fully resolved settings for one batch run
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub classifier: ClassifierConfig,
    pub batch: BatchConfig,
}

impl Settings {
    /// Resolve settings from the process environment
    pub fn resolve(file: &FileConfig, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with(file, overrides, |key| env::var(key).ok())
    }

    /// Resolve settings with an explicit environment lookup
    pub fn resolve_with(
        file: &FileConfig,
        overrides: &ConfigOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let section = &file.classification;

        let url = overrides
            .url
            .clone()
            .or_else(|| non_empty(lookup(ENV_URL)))
            .or_else(|| section.url.clone())
            .ok_or(ConfigError::MissingUrl)?;

        let connect_secs = match overrides.connect_timeout_secs {
            Some(secs) => secs,
            None => match non_empty(lookup(ENV_CONNECT_TIMEOUT)) {
                Some(raw) => parse_secs(ENV_CONNECT_TIMEOUT, &raw)?,
                None => section
                    .connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            },
        };

        let read_secs = match overrides.read_timeout_secs {
            Some(secs) => secs,
            None => match non_empty(lookup(ENV_READ_TIMEOUT)) {
                Some(raw) => parse_secs(ENV_READ_TIMEOUT, &raw)?,
                None => section.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
            },
        };

        let client_id = overrides
            .client_id
            .clone()
            .or_else(|| non_empty(lookup(ENV_CLIENT_ID)))
            .or_else(|| section.client_id.clone())
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let classifier = ClassifierConfig::new(url)
            .with_connect_timeout(Duration::from_secs(connect_secs))
            .with_read_timeout(Duration::from_secs(read_secs))
            .with_client_id(client_id);
        classifier.validate()?;

        let parallelism = overrides
            .parallelism
            .or(file.batch.parallelism)
            .unwrap_or(DEFAULT_PARALLELISM);
        if parallelism == 0 {
            return Err(ConfigError::InvalidParallelism);
        }

        let api_error_alert_ratio = file
            .batch
            .api_error_alert_ratio
            .unwrap_or(DEFAULT_API_ERROR_ALERT_RATIO);
        if !(0.0..=1.0).contains(&api_error_alert_ratio) {
            return Err(ConfigError::InvalidAlertRatio(api_error_alert_ratio));
        }

        let batch = BatchConfig {
            parallelism,
            api_error_alert_ratio,
        };

        Ok(Settings { classifier, batch })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_secs(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidTimeout {
            name,
            value: raw.to_string(),
        })
}
