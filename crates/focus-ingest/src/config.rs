//! Configuration management
//!
//! Three layers, all resolved once before a run starts:
//!
//! - [`PipelineConfig`]: batch and transport tuning from the environment
//! - [`ProviderConfig`]: one billing provider instance, read from JSON
//! - [`SourceConfig`]: one extraction source, `{name, source_type, config}`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::extract::sql::SqlDialect;
use crate::extract::warehouse::TableType;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default number of records mapped per chunk.
pub const DEFAULT_TRANSFORM_BATCH_SIZE: usize = 100;

/// Default cap on failure and validation samples kept in a batch result.
pub const DEFAULT_MAX_FAILURE_SAMPLES: usize = 10;

/// Default per-request timeout for REST and warehouse calls.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default page safety cap for paginated REST sources.
pub const DEFAULT_MAX_PAGES: usize = 1000;

/// Default row limit applied to warehouse queries.
pub const DEFAULT_WAREHOUSE_ROW_LIMIT: u64 = 100_000;

/// Default pool acquire timeout for SQL sources.
pub const DEFAULT_SQL_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

/// Default BigQuery REST base URL.
pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Billing provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Azure,
    Gcp,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Aws,
        ProviderKind::Azure,
        ProviderKind::Gcp,
        ProviderKind::OpenAi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Azure => "azure",
            ProviderKind::Gcp => "gcp",
            ProviderKind::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| {
                PipelineError::configuration(format!(
                    "unknown provider type '{s}', expected one of: aws, azure, gcp, openai"
                ))
            })
    }
}

/// How a provider authenticates outbound calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credentials {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    /// Static AWS keys; without them the AWS default chain applies
    AwsKeys {
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        session_token: Option<String>,
    },
}

/// Connection settings for SQL sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub dialect: SqlDialect,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    DEFAULT_SQL_ACQUIRE_TIMEOUT_SECS
}

/// BigQuery table coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSettings {
    pub project_id: String,
    pub dataset: String,
    pub table: String,
    #[serde(default)]
    pub location: Option<String>,
    /// Layout assumed when schema detection is inconclusive
    #[serde(default)]
    pub table_type: TableType,
}

impl WarehouseSettings {
    pub fn full_table_name(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset, self.table)
    }
}

/// One configured provider instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderKind,
    /// Stamped on every record as `x_provider_id`
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Price eligible models from the flex table
    #[serde(default)]
    pub flex_processing: bool,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    #[serde(default)]
    pub warehouse: Option<WarehouseSettings>,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderKind) -> Self {
        Self {
            provider_type,
            provider_id: None,
            organization_id: None,
            flex_processing: false,
            api_endpoint: None,
            credentials: Credentials::None,
            database: None,
            warehouse: None,
        }
    }

    /// Read a provider config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            PipelineError::configuration(format!("invalid provider config {}: {e}", path.display()))
        })?;
        Ok(config)
    }

    /// Explicit endpoint, or the provider's public API
    pub fn endpoint(&self) -> Option<&str> {
        self.api_endpoint.as_deref().or(match self.provider_type {
            ProviderKind::OpenAi => Some(DEFAULT_OPENAI_ENDPOINT),
            ProviderKind::Gcp => Some(DEFAULT_BIGQUERY_ENDPOINT),
            ProviderKind::Aws | ProviderKind::Azure => None,
        })
    }
}

/// One extraction source as handed to an extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub config: Value,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            config,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let source: Self = serde_json::from_str(&text).map_err(|e| {
            PipelineError::configuration(format!("invalid source config {}: {e}", path.display()))
        })?;
        source.validate()?;
        Ok(source)
    }

    /// Reject configs that no extractor could run
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::configuration(
                "Source configuration must have a 'name' field",
            ));
        }
        if self.source_type.trim().is_empty() {
            return Err(PipelineError::configuration(
                "Source configuration must have a 'source_type' field",
            ));
        }
        if !self.config.is_object() {
            return Err(PipelineError::configuration(
                "Source configuration must have a 'config' object",
            ));
        }
        Ok(())
    }

    /// String option from `config`
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Transform stage tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub batch_size: usize,
    /// Drop records with validation errors instead of emitting them
    pub strict_validation: bool,
    pub validate_focus: bool,
    pub max_failure_samples: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_TRANSFORM_BATCH_SIZE,
            strict_validation: false,
            validate_focus: true,
            max_failure_samples: DEFAULT_MAX_FAILURE_SAMPLES,
        }
    }
}

/// Extractor transport tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub request_timeout_secs: u64,
    pub max_pages: usize,
    pub warehouse_row_limit: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_pages: DEFAULT_MAX_PAGES,
            warehouse_row_limit: DEFAULT_WAREHOUSE_ROW_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub transform: TransformConfig,
    pub extract: ExtractConfig,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = PipelineConfig {
            transform: TransformConfig {
                batch_size: env_parse("FOCUS_TRANSFORM_BATCH_SIZE", DEFAULT_TRANSFORM_BATCH_SIZE),
                strict_validation: env_parse("FOCUS_STRICT_VALIDATION", false),
                validate_focus: env_parse("FOCUS_VALIDATE", true),
                max_failure_samples: env_parse(
                    "FOCUS_MAX_FAILURE_SAMPLES",
                    DEFAULT_MAX_FAILURE_SAMPLES,
                ),
            },
            extract: ExtractConfig {
                request_timeout_secs: env_parse(
                    "FOCUS_REQUEST_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                ),
                max_pages: env_parse("FOCUS_MAX_PAGES", DEFAULT_MAX_PAGES),
                warehouse_row_limit: env_parse(
                    "FOCUS_WAREHOUSE_ROW_LIMIT",
                    DEFAULT_WAREHOUSE_ROW_LIMIT,
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.transform.batch_size == 0 {
            return Err(PipelineError::configuration(
                "Transform batch_size must be greater than 0",
            ));
        }

        if self.extract.request_timeout_secs == 0 {
            return Err(PipelineError::configuration(
                "Request timeout must be greater than 0",
            ));
        }

        if self.extract.max_pages == 0 {
            return Err(PipelineError::configuration("max_pages must be greater than 0"));
        }

        if self.transform.max_failure_samples == 0 {
            tracing::warn!("max_failure_samples is 0 - failure details will not be retained");
        }

        Ok(())
    }
}
