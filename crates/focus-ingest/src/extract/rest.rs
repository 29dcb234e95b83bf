//! REST API extractor
//!
//! The provider supplies transport details through [`RestProvider`]; the
//! source config supplies the endpoint, the response selector and an optional
//! explode step for nested result lists.
//!
//! # Source config
//!
//! ```json
//! {
//!   "endpoint": {"path": "/organization/usage/completions", "method": "GET",
//!                "params": {"start_time": "{start_timestamp}", "group_by": ["model"]}},
//!   "data_selector": "data",
//!   "explode": {"field": "results", "parent_prefix": "bucket_"},
//!   "paginator": {"type": "json_cursor", "cursor_path": "next_page",
//!                 "has_more_path": "has_more", "cursor_param": "page"}
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::LINK;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{check_window, render_template, window_params, Extractor};
use crate::config::{Credentials, ExtractConfig, ProviderConfig, ProviderKind, SourceConfig};
use crate::error::{PipelineError, Result};
use crate::RawRecord;

pub const SOURCE_TYPE: &str = "rest_api";

/// Longest response excerpt quoted in an error
const ERROR_BODY_EXCERPT: usize = 200;

/// OpenAI organization usage endpoints, one source each
const OPENAI_USAGE_ENDPOINTS: [(&str, &str); 6] = [
    ("completions_usage", "/organization/usage/completions"),
    ("embeddings_usage", "/organization/usage/embeddings"),
    ("images_usage", "/organization/usage/images"),
    ("audio_speeches_usage", "/organization/usage/audio_speeches"),
    ("audio_transcriptions_usage", "/organization/usage/audio_transcriptions"),
    ("moderations_usage", "/organization/usage/moderations"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

/// How to reach the next page of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Paginator {
    None,
    /// Follow `Link: <url>; rel="next"`
    HeaderLink,
    /// Read a cursor from the body and send it back as a query parameter
    JsonCursor {
        cursor_path: String,
        #[serde(default)]
        has_more_path: Option<String>,
        cursor_param: String,
    },
    /// Step an offset until a short page comes back
    Offset {
        limit_param: String,
        offset_param: String,
        limit: usize,
    },
}

/// Transport details a provider contributes to REST extraction
pub trait RestProvider: Send + Sync {
    fn base_url(&self) -> Result<String>;

    fn auth(&self) -> Auth;

    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn paginator(&self) -> Paginator {
        Paginator::None
    }
}

impl RestProvider for ProviderConfig {
    fn base_url(&self) -> Result<String> {
        self.endpoint().map(str::to_string).ok_or_else(|| {
            PipelineError::configuration(format!(
                "{} provider has no api_endpoint for REST extraction",
                self.provider_type
            ))
        })
    }

    fn auth(&self) -> Auth {
        match &self.credentials {
            Credentials::Bearer { token } => Auth::Bearer(token.clone()),
            Credentials::Basic { username, password } => Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            Credentials::None | Credentials::AwsKeys { .. } => Auth::None,
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if self.provider_type == ProviderKind::OpenAi {
            if let Some(org) = self.organization_id.as_deref().filter(|o| !o.trim().is_empty()) {
                headers.push(("OpenAI-Organization".to_string(), org.to_string()));
            }
        }
        headers
    }

    fn paginator(&self) -> Paginator {
        match self.provider_type {
            ProviderKind::OpenAi => Paginator::JsonCursor {
                cursor_path: "next_page".to_string(),
                has_more_path: Some("has_more".to_string()),
                cursor_param: "page".to_string(),
            },
            _ => Paginator::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum HttpMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EndpointConfig {
    #[serde(default)]
    path: String,
    #[serde(default)]
    method: HttpMethod,
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    json: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExplodeConfig {
    field: String,
    #[serde(default)]
    parent_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RestSourceOptions {
    #[serde(default)]
    endpoint: EndpointConfig,
    #[serde(default)]
    data_selector: Option<String>,
    #[serde(default)]
    explode: Option<ExplodeConfig>,
    #[serde(default)]
    paginator: Option<Paginator>,
}

enum NextPage {
    First,
    Url(Url),
    Cursor(String),
    Offset(usize),
}

pub struct RestApiExtractor {
    provider: Arc<dyn RestProvider>,
    client: Client,
    max_pages: usize,
}

impl RestApiExtractor {
    pub fn new(provider: Arc<dyn RestProvider>, config: &ExtractConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("focus-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            provider,
            client,
            max_pages: config.max_pages,
        })
    }

    async fn fetch_page(
        &self,
        source: &SourceConfig,
        options: &RestSourceOptions,
        url: Url,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<(Value, Option<String>)> {
        let mut request = match options.endpoint.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        if !query.is_empty() {
            request = request.query(query);
        }
        for (name, value) in self.provider.headers() {
            request = request.header(name, value);
        }
        request = match self.provider.auth() {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            PipelineError::extraction(&source.name, format!("request failed: {e}"))
        })?;

        let status = response.status();
        let link = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(ERROR_BODY_EXCERPT).collect();
            return Err(PipelineError::extraction(
                &source.name,
                format!("HTTP {status}: {excerpt}"),
            ));
        }

        let payload: Value = response.json().await.map_err(|e| {
            PipelineError::extraction(&source.name, format!("undecodable response body: {e}"))
        })?;

        Ok((payload, link))
    }
}

#[async_trait]
impl Extractor for RestApiExtractor {
    fn source_type(&self) -> &'static str {
        SOURCE_TYPE
    }

    async fn extract(
        &self,
        source: &SourceConfig,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>> {
        source.validate()?;
        check_window(start, end)?;

        let options: RestSourceOptions = serde_json::from_value(source.config.clone())
            .map_err(|e| {
                PipelineError::configuration(format!("invalid REST source '{}': {e}", source.name))
            })?;
        let params = window_params(start, end);
        let query = build_query(&options.endpoint.params, &params)?;
        let body = options
            .endpoint
            .json
            .as_ref()
            .map(|json| render_json(json, &params))
            .transpose()?;
        let base = endpoint_url(&self.provider.base_url()?, &options.endpoint.path)?;
        let paginator = options
            .paginator
            .clone()
            .unwrap_or_else(|| self.provider.paginator());

        info!(source = %source.name, url = %base, "Extracting from REST API");

        let mut records = Vec::new();
        let mut next = Some(NextPage::First);
        let mut pages = 0usize;
        let mut offset = 0usize;

        while let Some(page) = next.take() {
            if pages >= self.max_pages {
                warn!(source = %source.name, max_pages = self.max_pages, "Page limit reached, stopping");
                break;
            }
            pages += 1;

            let mut page_query = query.clone();
            let url = match page {
                NextPage::First => base.clone(),
                NextPage::Url(url) => {
                    page_query.clear();
                    url
                }
                NextPage::Cursor(cursor) => {
                    if let Paginator::JsonCursor { cursor_param, .. } = &paginator {
                        page_query.push((cursor_param.clone(), cursor));
                    }
                    base.clone()
                }
                NextPage::Offset(next_offset) => {
                    offset = next_offset;
                    base.clone()
                }
            };
            if let Paginator::Offset {
                limit_param,
                offset_param,
                limit,
            } = &paginator
            {
                page_query.push((limit_param.clone(), limit.to_string()));
                page_query.push((offset_param.clone(), offset.to_string()));
            }

            let (payload, link) = self
                .fetch_page(source, &options, url.clone(), &page_query, body.as_ref())
                .await?;

            let items = select_items(&payload, options.data_selector.as_deref());
            let page_len = items.len();
            for item in items {
                match item {
                    Value::Object(object) => match &options.explode {
                        Some(explode) => records.extend(explode_item(object, explode)),
                        None => records.push(object),
                    },
                    other => debug!(source = %source.name, item = %other, "Ignoring non-object item"),
                }
            }

            debug!(source = %source.name, page = pages, items = page_len, "Fetched page");

            next = match &paginator {
                Paginator::None => None,
                Paginator::HeaderLink => link
                    .as_deref()
                    .and_then(next_link)
                    .and_then(|target| url.join(&target).ok())
                    .map(NextPage::Url),
                Paginator::JsonCursor {
                    cursor_path,
                    has_more_path,
                    ..
                } => {
                    let has_more = match has_more_path.as_deref() {
                        Some(path) => select_path(&payload, path)
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        None => true,
                    };
                    if has_more {
                        select_path(&payload, cursor_path)
                            .and_then(scalar_text)
                            .map(NextPage::Cursor)
                    } else {
                        None
                    }
                }
                Paginator::Offset { limit, .. } => {
                    (*limit > 0 && page_len >= *limit).then(|| NextPage::Offset(offset + limit))
                }
            };
        }

        info!(
            source = %source.name,
            records = records.len(),
            pages,
            "Successfully extracted records from REST API"
        );
        Ok(records)
    }
}

fn endpoint_url(base: &str, path: &str) -> Result<Url> {
    let joined = if path.trim().is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    };
    Url::parse(&joined)
        .map_err(|e| PipelineError::configuration(format!("invalid endpoint URL '{joined}': {e}")))
}

/// Query pairs from endpoint params; arrays repeat the key, nulls are dropped
fn build_query(
    params: &Map<String, Value>,
    window: &BTreeMap<String, String>,
) -> Result<Vec<(String, String)>> {
    let mut query = Vec::new();
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        query.push((key.clone(), render_template(&text, window)?));
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    query.push((key.clone(), render_template(&text, window)?));
                }
            }
        }
    }
    Ok(query)
}

/// Fill window placeholders in every string of a JSON body
fn render_json(value: &Value, window: &BTreeMap<String, String>) -> Result<Value> {
    Ok(match value {
        Value::String(s) => Value::String(render_template(s, window)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_json(item, window))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_json(v, window)?)))
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve a dot path; numeric segments index into arrays
pub(crate) fn select_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .filter(|v| !v.is_null())
}

/// Items on one page: the selected list, a single selected object, or nothing
fn select_items(payload: &Value, selector: Option<&str>) -> Vec<Value> {
    let selected = match selector {
        Some(path) => select_path(payload, path),
        None if payload.is_array() => Some(payload),
        None => payload.get("data"),
    };
    match selected {
        Some(Value::Array(items)) => items.clone(),
        Some(object @ Value::Object(_)) => vec![object.clone()],
        Some(_) | None => {
            warn!(selector = selector.unwrap_or("data"), "Response has no records at selector");
            Vec::new()
        }
    }
}

/// One record per nested element, each carrying the parent's scalars under a prefix
fn explode_item(item: Map<String, Value>, explode: &ExplodeConfig) -> Vec<RawRecord> {
    let Some(Value::Array(children)) = item.get(&explode.field) else {
        return vec![item];
    };

    children
        .iter()
        .filter_map(Value::as_object)
        .map(|child| {
            let mut record = child.clone();
            for (key, value) in &item {
                if key == &explode.field || value.is_object() || value.is_array() {
                    continue;
                }
                record
                    .entry(format!("{}{}", explode.parent_prefix, key))
                    .or_insert_with(|| value.clone());
            }
            record
        })
        .collect()
}

/// Target of the `rel="next"` entry of a Link header
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim().replace(' ', "");
            param == "rel=\"next\"" || param == "rel=next"
        });
        (is_next && target.starts_with('<') && target.ends_with('>'))
            .then(|| target[1..target.len() - 1].to_string())
    })
}

/// Daily usage sources for an OpenAI organization
pub fn openai_usage_sources() -> Vec<SourceConfig> {
    OPENAI_USAGE_ENDPOINTS
        .iter()
        .map(|(name, path)| {
            SourceConfig::new(
                *name,
                SOURCE_TYPE,
                serde_json::json!({
                    "endpoint": {
                        "path": path,
                        "method": "GET",
                        "params": {
                            "start_time": "{start_timestamp}",
                            "end_time": "{end_timestamp}",
                            "bucket_width": "1d",
                            "group_by": ["model", "api_key_id"],
                            "limit": 30
                        }
                    },
                    "data_selector": "data",
                    "explode": {"field": "results", "parent_prefix": "bucket_"}
                }),
            )
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_next_link() {
        let header = r#"<https://api.example.com/items?page=2>; rel="next", <https://api.example.com/items?page=9>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.example.com/items?page=2")
        );
        assert_eq!(next_link(r#"<https://x/1>; rel="prev""#), None);
    }

    #[test]
    fn test_select_items() {
        let body = json!({"data": [{"a": 1}], "meta": {"rows": [{"b": 2}, {"b": 3}]}});
        assert_eq!(select_items(&body, None).len(), 1);
        assert_eq!(select_items(&body, Some("meta.rows")).len(), 2);
        assert_eq!(select_items(&json!([{"a": 1}, {"a": 2}]), None).len(), 2);
        assert!(select_items(&body, Some("missing")).is_empty());
        assert_eq!(select_path(&body, "meta.rows.1.b"), Some(&json!(3)));
    }

    #[test]
    fn test_explode_copies_parent_scalars() {
        let bucket = json!({
            "object": "bucket",
            "start_time": 1704067200,
            "end_time": 1704153600,
            "results": [
                {"object": "organization.usage.completions.result", "model": "gpt-4o", "input_tokens": 10},
                {"model": "gpt-4o-mini", "input_tokens": 5}
            ]
        });
        let explode = ExplodeConfig {
            field: "results".to_string(),
            parent_prefix: "bucket_".to_string(),
        };
        let records = explode_item(bucket.as_object().unwrap().clone(), &explode);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["bucket_start_time"], json!(1704067200));
        assert_eq!(records[0]["object"], json!("organization.usage.completions.result"));
        assert_eq!(records[1]["bucket_object"], json!("bucket"));
        assert!(!records[1].contains_key("bucket_results"));
    }

    #[test]
    fn test_build_query_repeats_array_keys() {
        let params = json!({
            "start_time": "{start_timestamp}",
            "group_by": ["model", "api_key_id"],
            "limit": 30,
            "skip": null
        });
        let window = BTreeMap::from([("start_timestamp".to_string(), "1704067200".to_string())]);
        let query = build_query(params.as_object().unwrap(), &window).unwrap();
        assert_eq!(
            query,
            vec![
                ("group_by".to_string(), "model".to_string()),
                ("group_by".to_string(), "api_key_id".to_string()),
                ("limit".to_string(), "30".to_string()),
                ("start_time".to_string(), "1704067200".to_string()),
            ]
        );
    }

    #[test]
    fn test_provider_transport_defaults() {
        let mut openai = ProviderConfig::new(ProviderKind::OpenAi);
        openai.organization_id = Some("org-123".to_string());
        openai.credentials = Credentials::Bearer {
            token: "sk-test".to_string(),
        };
        assert_eq!(openai.base_url().unwrap(), "https://api.openai.com/v1");
        assert_eq!(openai.auth(), Auth::Bearer("sk-test".to_string()));
        assert_eq!(
            openai.headers(),
            vec![("OpenAI-Organization".to_string(), "org-123".to_string())]
        );
        assert!(matches!(openai.paginator(), Paginator::JsonCursor { .. }));

        let azure = ProviderConfig::new(ProviderKind::Azure);
        assert!(azure.base_url().unwrap_err().is_fatal_before_extraction());
        assert_eq!(azure.paginator(), Paginator::None);
    }

    #[test]
    fn test_openai_usage_sources_are_valid() {
        let sources = openai_usage_sources();
        assert_eq!(sources.len(), 6);
        for source in &sources {
            source.validate().unwrap();
            let options: RestSourceOptions = serde_json::from_value(source.config.clone()).unwrap();
            assert!(options.endpoint.path.starts_with("/organization/usage/"));
        }
    }
}
