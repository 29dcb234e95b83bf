//! Source-type registry
//!
//! Maps `source_type` strings (and their aliases) to extractor constructors.
//! Extra source types can be registered at runtime.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    filesystem, rest, sql, warehouse, BigQueryExtractor, Extractor, FilesystemExtractor,
    RestApiExtractor, SqlDatabaseExtractor,
};
use crate::config::{ExtractConfig, ProviderConfig, SourceConfig};
use crate::error::{PipelineError, Result};
use crate::RawRecord;

/// Builds an extractor for one provider run
pub type ExtractorConstructor = fn(&ProviderConfig, &ExtractConfig) -> Result<Box<dyn Extractor>>;

fn rest_extractor(provider: &ProviderConfig, extract: &ExtractConfig) -> Result<Box<dyn Extractor>> {
    let provider: Arc<dyn rest::RestProvider> = Arc::new(provider.clone());
    Ok(Box::new(RestApiExtractor::new(provider, extract)?))
}

fn filesystem_extractor(provider: &ProviderConfig, _: &ExtractConfig) -> Result<Box<dyn Extractor>> {
    Ok(Box::new(FilesystemExtractor::new(provider)))
}

fn sql_extractor(provider: &ProviderConfig, extract: &ExtractConfig) -> Result<Box<dyn Extractor>> {
    Ok(Box::new(SqlDatabaseExtractor::new(provider, extract)))
}

fn warehouse_extractor(provider: &ProviderConfig, extract: &ExtractConfig) -> Result<Box<dyn Extractor>> {
    Ok(Box::new(BigQueryExtractor::new(provider, extract)?))
}

/// Registry of extractor constructors keyed by lowercase source type
pub struct ExtractorFactory {
    constructors: HashMap<String, ExtractorConstructor>,
}

impl Default for ExtractorFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractorFactory {
    /// Factory with the built-in extractors and their aliases
    pub fn new() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
        };
        for name in [rest::SOURCE_TYPE, "api"] {
            factory.register(name, rest_extractor);
        }
        for name in [filesystem::SOURCE_TYPE, "file", "s3"] {
            factory.register(name, filesystem_extractor);
        }
        for name in [sql::SOURCE_TYPE, "sql", "postgres", "postgresql", "mysql"] {
            factory.register(name, sql_extractor);
        }
        for name in [warehouse::SOURCE_TYPE, "gcp_bigquery"] {
            factory.register(name, warehouse_extractor);
        }
        factory
    }

    /// Add or replace the constructor for `source_type`
    pub fn register(&mut self, source_type: &str, constructor: ExtractorConstructor) {
        let key = normalize(source_type);
        debug!(source_type = %key, "Registered extractor");
        self.constructors.insert(key, constructor);
    }

    /// Registered source types, sorted
    pub fn supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_supported(&self, source_type: &str) -> bool {
        self.constructors.contains_key(&normalize(source_type))
    }

    /// Build the extractor serving `source_type`
    pub fn create(
        &self,
        source_type: &str,
        provider: &ProviderConfig,
        extract: &ExtractConfig,
    ) -> Result<Box<dyn Extractor>> {
        let constructor = self.constructors.get(&normalize(source_type)).ok_or_else(|| {
            PipelineError::configuration(format!(
                "Unknown source type: '{source_type}'. Available types: {}",
                self.supported_types().join(", ")
            ))
        })?;
        constructor(provider, extract)
    }

    /// Validate `source`, build its extractor and run it over `[start, end)`
    pub async fn extract(
        &self,
        source: &SourceConfig,
        provider: &ProviderConfig,
        extract: &ExtractConfig,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>> {
        source.validate()?;
        let extractor = self.create(&source.source_type, provider, extract)?;
        info!(
            source = %source.name,
            source_type = extractor.source_type(),
            provider = %provider.provider_type,
            "Extracting source"
        );
        extractor.extract(source, start, end).await
    }
}

fn normalize(source_type: &str) -> String {
    source_type.trim().to_lowercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use async_trait::async_trait;

    struct StaticExtractor;

    #[async_trait]
    impl Extractor for StaticExtractor {
        fn source_type(&self) -> &'static str {
            "static"
        }

        async fn extract(
            &self,
            source: &SourceConfig,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<RawRecord>> {
            let mut record = RawRecord::new();
            record.insert("source".to_string(), source.name.clone().into());
            Ok(vec![record])
        }
    }

    fn static_extractor(_: &ProviderConfig, _: &ExtractConfig) -> Result<Box<dyn Extractor>> {
        Ok(Box::new(StaticExtractor))
    }

    #[test]
    fn test_aliases_resolve_to_builtin_extractors() {
        let factory = ExtractorFactory::new();
        let provider = ProviderConfig::new(ProviderKind::Aws);
        let extract = ExtractConfig::default();

        for (alias, expected) in [
            ("api", "rest_api"),
            ("S3", "filesystem"),
            ("file", "filesystem"),
            ("postgresql", "sql_database"),
            ("mysql", "sql_database"),
            ("sql", "sql_database"),
        ] {
            let extractor = factory.create(alias, &provider, &extract).unwrap();
            assert_eq!(extractor.source_type(), expected, "alias {alias}");
        }
        assert!(factory.is_supported("gcp_bigquery"));
    }

    #[test]
    fn test_unknown_type_lists_available_types() {
        let factory = ExtractorFactory::new();
        let provider = ProviderConfig::new(ProviderKind::Aws);
        let err = factory
            .create("ftp", &provider, &ExtractConfig::default())
            .err()
            .unwrap();

        assert!(err.is_fatal_before_extraction());
        let message = err.to_string();
        assert!(message.contains("Unknown source type: 'ftp'"));
        assert!(message.contains("api, bigquery, file, filesystem, gcp_bigquery"));
    }

    #[test]
    fn test_supported_types_are_sorted() {
        let types = ExtractorFactory::new().supported_types();
        let mut sorted = types.clone();
        sorted.sort();
        assert_eq!(types, sorted);
        assert_eq!(types.len(), 12);
    }

    #[tokio::test]
    async fn test_runtime_registration() {
        let mut factory = ExtractorFactory::new();
        factory.register("Static", static_extractor);
        assert!(factory.is_supported("static"));

        let provider = ProviderConfig::new(ProviderKind::OpenAi);
        let source = SourceConfig::new("fixed", "static", serde_json::json!({}));
        let start = Utc::now() - chrono::Duration::days(1);
        let records = factory
            .extract(&source, &provider, &ExtractConfig::default(), start, Utc::now())
            .await
            .unwrap();
        assert_eq!(records[0]["source"], "fixed");
    }

    #[tokio::test]
    async fn test_extract_rejects_invalid_source_before_io() {
        let factory = ExtractorFactory::new();
        let provider = ProviderConfig::new(ProviderKind::Aws);
        let source = SourceConfig::new("", "filesystem", serde_json::json!({}));
        let err = factory
            .extract(&source, &provider, &ExtractConfig::default(), Utc::now(), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_fatal_before_extraction());
    }
}
