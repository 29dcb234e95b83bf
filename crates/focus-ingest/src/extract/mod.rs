//! Billing data extractors
//!
//! Each extractor pulls raw records for one [`SourceConfig`] over a half-open
//! `[start, end)` UTC window. Configuration problems surface as
//! [`PipelineError::Configuration`] before any I/O; transport and decode
//! problems surface as [`PipelineError::Extraction`] and are not retried.

pub mod factory;
pub mod filesystem;
pub mod rest;
pub mod sql;
pub mod warehouse;

pub use factory::ExtractorFactory;
pub use filesystem::FilesystemExtractor;
pub use rest::{RestApiExtractor, RestProvider};
pub use sql::SqlDatabaseExtractor;
pub use warehouse::BigQueryExtractor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::config::SourceConfig;
use crate::error::{PipelineError, Result};
use crate::RawRecord;

/// Pulls raw records from one kind of source
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Canonical source type served by this extractor
    fn source_type(&self) -> &'static str;

    /// Extract records for `source` within `[start, end)`
    async fn extract(
        &self,
        source: &SourceConfig,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>>;
}

/// Reject empty or inverted windows
pub(crate) fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end <= start {
        return Err(PipelineError::configuration(format!(
            "extraction window end {end} must be after start {start}"
        )));
    }
    Ok(())
}

/// Placeholder values derived from the extraction window
pub fn window_params(start: DateTime<Utc>, end: DateTime<Utc>) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("start_date".to_string(), start.format("%Y-%m-%d").to_string()),
        ("end_date".to_string(), end.format("%Y-%m-%d").to_string()),
        ("start_datetime".to_string(), start.to_rfc3339()),
        ("end_datetime".to_string(), end.to_rfc3339()),
        ("start_timestamp".to_string(), start.timestamp().to_string()),
        ("end_timestamp".to_string(), end.timestamp().to_string()),
    ])
}

/// Fill `{name}` placeholders; `{{` and `}}` are literal braces.
///
/// An unknown or unterminated placeholder is a configuration error.
pub fn render_template(template: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    name.push(next);
                }
                if !closed {
                    return Err(PipelineError::configuration(format!(
                        "unterminated placeholder in template: {{{name}"
                    )));
                }
                match params.get(name.trim()) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(PipelineError::configuration(format!(
                            "unknown template placeholder '{name}'"
                        )))
                    }
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_window_params() {
        let (start, end) = window();
        let params = window_params(start, end);
        assert_eq!(params["start_date"], "2024-03-01");
        assert_eq!(params["end_datetime"], "2024-04-01T00:00:00+00:00");
        assert_eq!(params["start_timestamp"], "1709251200");
    }

    #[test]
    fn test_render_template() {
        let (start, end) = window();
        let mut params = window_params(start, end);
        params.insert("table".to_string(), "costs".to_string());

        let sql = render_template(
            "SELECT * FROM {table} WHERE d >= '{start_date}' AND d < '{end_date}' -- {{raw}}",
            &params,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM costs WHERE d >= '2024-03-01' AND d < '2024-04-01' -- {raw}"
        );
    }

    #[test]
    fn test_render_template_rejects_unknown_placeholders() {
        let params = BTreeMap::new();
        let err = render_template("SELECT {missing}", &params).unwrap_err();
        assert!(err.is_fatal_before_extraction());
        assert!(render_template("SELECT {open", &params).is_err());
    }

    #[test]
    fn test_check_window() {
        let (start, end) = window();
        assert!(check_window(start, end).is_ok());
        assert!(check_window(end, start).is_err());
        assert!(check_window(start, start).is_err());
    }
}
