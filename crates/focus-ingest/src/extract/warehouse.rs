//! BigQuery billing export extractor
//!
//! Talks to the BigQuery REST API with a bearer access token. Before pulling
//! data the table schema decides between the FOCUS export layout and the
//! standard (legacy) billing export; a one-row probe then confirms the query
//! returns the columns the mapper needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{check_window, Extractor};
use crate::config::{Credentials, ExtractConfig, ProviderConfig, SourceConfig, WarehouseSettings};
use crate::error::{PipelineError, Result};
use crate::RawRecord;

pub const SOURCE_TYPE: &str = "bigquery";

/// Mandatory FOCUS columns looked for during schema detection
const FOCUS_MANDATORY_FIELDS: [&str; 14] = [
    "BilledCost",
    "EffectiveCost",
    "ListCost",
    "ContractedCost",
    "BillingAccountId",
    "BillingAccountType",
    "BillingCurrency",
    "ServiceName",
    "ServiceCategory",
    "ProviderName",
    "PublisherName",
    "InvoiceIssuerName",
    "ChargeCategory",
    "ChargeDescription",
];

const FOCUS_DATE_FIELDS: [&str; 4] = [
    "ChargePeriodStart",
    "ChargePeriodEnd",
    "BillingPeriodStart",
    "BillingPeriodEnd",
];

const STANDARD_EXPORT_FIELDS: [&str; 7] = [
    "usage_start_time",
    "usage_end_time",
    "service.description",
    "sku.description",
    "project.id",
    "cost",
    "currency",
];

/// Server-side wait per query call
const QUERY_TIMEOUT_MS: u64 = 10_000;

/// Layout of a billing export table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    #[default]
    #[serde(rename = "focus", alias = "canonical")]
    Canonical,
    #[serde(rename = "standard", alias = "legacy")]
    Legacy,
}

impl TableType {
    pub fn as_str(self) -> &'static str {
        match self {
            TableType::Canonical => "focus",
            TableType::Legacy => "standard",
        }
    }

    /// Columns the first result row must carry
    fn required_columns(self) -> &'static [&'static str] {
        match self {
            TableType::Canonical => &["BilledCost", "EffectiveCost", "ServiceName", "ChargeCategory"],
            TableType::Legacy => &["cost", "currency", "usage_start_time"],
        }
    }
}

/// Pick the table layout from its (dot-flattened) column names
pub fn detect_table_type(fields: &[String], configured: TableType) -> TableType {
    let count = |wanted: &[&str]| wanted.iter().filter(|w| fields.iter().any(|f| f == *w)).count();
    let mandatory = count(&FOCUS_MANDATORY_FIELDS);
    let dates = count(&FOCUS_DATE_FIELDS);
    let standard = count(&STANDARD_EXPORT_FIELDS);

    info!(
        focus_mandatory = mandatory,
        focus_dates = dates,
        standard,
        "Inspected BigQuery table schema"
    );

    if dates >= 2 {
        if mandatory < 8 {
            info!("Detected partial FOCUS table layout");
        }
        TableType::Canonical
    } else if standard >= 4 {
        TableType::Legacy
    } else {
        warn!(configured = configured.as_str(), "Could not detect table type, using configured type");
        configured
    }
}

/// Extraction query for a table layout over `[start, end)`
pub fn billing_query(
    table_type: TableType,
    table_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: u64,
) -> String {
    let start = start.to_rfc3339();
    let end = end.to_rfc3339();
    match table_type {
        TableType::Canonical => format!(
            "SELECT * FROM `{table_id}` \
             WHERE ((ChargePeriodStart IS NOT NULL \
             AND ChargePeriodStart >= TIMESTAMP('{start}') \
             AND ChargePeriodStart < TIMESTAMP('{end}')) \
             OR (ChargePeriodStart IS NULL \
             AND BillingPeriodStart >= TIMESTAMP('{start}') \
             AND BillingPeriodStart < TIMESTAMP('{end}'))) \
             ORDER BY COALESCE(ChargePeriodStart, BillingPeriodStart) \
             LIMIT {limit}"
        ),
        TableType::Legacy => format!(
            "SELECT *, \
             service.description AS service_description, \
             service.id AS service_id, \
             sku.description AS sku_description, \
             sku.id AS sku_id, \
             project.id AS project_id, \
             project.name AS project_name, \
             location.location AS location_name, \
             location.country AS location_country, \
             location.region AS location_region, \
             location.zone AS location_zone \
             FROM `{table_id}` \
             WHERE usage_start_time >= TIMESTAMP('{start}') \
             AND usage_start_time < TIMESTAMP('{end}') \
             ORDER BY usage_start_time \
             LIMIT {limit}"
        ),
    }
}

/// Verify the probe row carries the layout's required columns; no row passes
fn check_first_row(table_type: TableType, row: Option<&RawRecord>) -> std::result::Result<(), Vec<&'static str>> {
    let Some(row) = row else {
        warn!("Probe query returned no rows");
        return Ok(());
    };
    let missing: Vec<&'static str> = table_type
        .required_columns()
        .iter()
        .copied()
        .filter(|column| !row.contains_key(*column))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaField {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<SchemaField>,
}

impl SchemaField {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    fn is_record(&self) -> bool {
        matches!(self.field_type.as_str(), "RECORD" | "STRUCT")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<SchemaField>,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    #[serde(default)]
    schema: TableSchema,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: JobReference,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<Value>,
    #[serde(default)]
    page_token: Option<String>,
}

/// Minimal BigQuery REST client for schema reads and queries
#[derive(Debug)]
pub struct BigQueryClient {
    http: Client,
    endpoint: String,
    token: String,
    project_id: String,
    location: Option<String>,
    max_pages: usize,
}

impl BigQueryClient {
    pub fn from_provider(provider: &ProviderConfig, extract: &ExtractConfig) -> Result<Self> {
        let settings = provider.warehouse.as_ref().ok_or_else(|| {
            PipelineError::configuration("provider has no warehouse settings for BigQuery")
        })?;
        let Credentials::Bearer { token } = &provider.credentials else {
            return Err(PipelineError::configuration(
                "BigQuery requires bearer credentials with an access token",
            ));
        };
        let endpoint = provider
            .endpoint()
            .unwrap_or(crate::config::DEFAULT_BIGQUERY_ENDPOINT)
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .timeout(Duration::from_secs(extract.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            token: token.clone(),
            project_id: settings.project_id.clone(),
            location: settings.location.clone(),
            max_pages: extract.max_pages,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PipelineError::extraction("bigquery", format!("{what} failed: {e}")))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("no error message");
            return Err(PipelineError::extraction(
                "bigquery",
                format!("{what} returned HTTP {status}: {message}"),
            ));
        }
        Ok(body)
    }

    /// Column names of a table, nested fields joined with `.`
    pub async fn table_fields(&self, settings: &WarehouseSettings) -> Result<Vec<String>> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.endpoint, settings.project_id, settings.dataset, settings.table
        );
        let body = self.send(self.http.get(url), "table lookup").await?;
        let table: TableResource = serde_json::from_value(body)?;
        let mut names = Vec::new();
        flatten_field_names(&table.schema.fields, "", &mut names);
        Ok(names)
    }

    /// Run a standard-SQL query and decode rows; `max_rows` stops early
    pub async fn query_rows(&self, sql: &str, max_rows: Option<u64>) -> Result<Vec<RawRecord>> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }
        if let Some(max) = max_rows {
            body["maxResults"] = json!(max);
        }

        let url = format!("{}/projects/{}/queries", self.endpoint, self.project_id);
        let first = self.send(self.http.post(url).json(&body), "query").await?;
        let mut page: QueryResponse = serde_json::from_value(first)?;
        let mut schema = page.schema.take();
        let mut records = Vec::new();
        let mut calls = 1usize;

        loop {
            if let Some(schema) = &schema {
                records.extend(page.rows.iter().filter_map(|row| decode_row(&schema.fields, row)));
            }
            if let Some(max) = max_rows {
                if records.len() as u64 >= max {
                    records.truncate(max as usize);
                    break;
                }
            }
            if page.job_complete && page.page_token.is_none() {
                break;
            }
            if calls >= self.max_pages {
                warn!(max_pages = self.max_pages, "BigQuery page limit reached, stopping");
                break;
            }
            calls += 1;

            let url = format!(
                "{}/projects/{}/queries/{}",
                self.endpoint, self.project_id, page.job_reference.job_id
            );
            let mut query: Vec<(&str, String)> = vec![("timeoutMs", QUERY_TIMEOUT_MS.to_string())];
            if let Some(token) = &page.page_token {
                query.push(("pageToken", token.clone()));
            }
            if let Some(location) = page.job_reference.location.as_ref().or(self.location.as_ref()) {
                query.push(("location", location.clone()));
            }
            if let Some(max) = max_rows {
                query.push(("maxResults", max.to_string()));
            }

            let next = self.send(self.http.get(url).query(&query), "query results").await?;
            page = serde_json::from_value(next)?;
            if schema.is_none() {
                schema = page.schema.take();
            }
        }

        debug!(rows = records.len(), calls, "BigQuery query finished");
        Ok(records)
    }
}

fn flatten_field_names(fields: &[SchemaField], prefix: &str, out: &mut Vec<String>) {
    for field in fields {
        let name = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{prefix}.{}", field.name)
        };
        if field.is_record() {
            flatten_field_names(&field.fields, &name, out);
        }
        out.push(name);
    }
}

/// Decode one `{"f": [{"v": ...}]}` row against its schema
fn decode_row(fields: &[SchemaField], row: &Value) -> Option<RawRecord> {
    let cells = row.get("f")?.as_array()?;
    Some(
        fields
            .iter()
            .zip(cells)
            .map(|(field, cell)| {
                let raw = cell.get("v").unwrap_or(&Value::Null);
                (field.name.clone(), decode_field(field, raw))
            })
            .collect::<Map<String, Value>>(),
    )
}

fn decode_field(field: &SchemaField, raw: &Value) -> Value {
    if field.is_repeated() {
        return match raw {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| decode_scalar(field, item.get("v").unwrap_or(&Value::Null)))
                    .collect(),
            ),
            _ => Value::Array(Vec::new()),
        };
    }
    decode_scalar(field, raw)
}

fn decode_scalar(field: &SchemaField, raw: &Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    if field.is_record() {
        return decode_row(&field.fields, raw)
            .map(Value::Object)
            .unwrap_or(Value::Null);
    }
    let Some(text) = raw.as_str() else {
        return raw.clone();
    };
    match field.field_type.as_str() {
        "INTEGER" | "INT64" => text.parse::<i64>().map(Value::from).unwrap_or_else(|_| raw.clone()),
        "FLOAT" | "FLOAT64" => text.parse::<f64>().map(Value::from).unwrap_or_else(|_| raw.clone()),
        "BOOLEAN" | "BOOL" => Value::Bool(text.eq_ignore_ascii_case("true")),
        "TIMESTAMP" => text
            .parse::<f64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64))
            .map(|at| Value::String(at.to_rfc3339()))
            .unwrap_or_else(|| raw.clone()),
        _ => raw.clone(),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WarehouseSourceOptions {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    dataset_id: Option<String>,
    #[serde(default)]
    table_name: Option<String>,
    #[serde(default)]
    table_type: Option<TableType>,
}

pub struct BigQueryExtractor {
    client: BigQueryClient,
    settings: WarehouseSettings,
    row_limit: u64,
}

impl BigQueryExtractor {
    pub fn new(provider: &ProviderConfig, extract: &ExtractConfig) -> Result<Self> {
        let client = BigQueryClient::from_provider(provider, extract)?;
        let settings = provider.warehouse.clone().ok_or_else(|| {
            PipelineError::configuration("provider has no warehouse settings for BigQuery")
        })?;
        Ok(Self {
            client,
            settings,
            row_limit: extract.warehouse_row_limit,
        })
    }

    fn resolve_settings(&self, source: &SourceConfig) -> Result<WarehouseSettings> {
        let options: WarehouseSourceOptions = serde_json::from_value(source.config.clone())
            .map_err(|e| {
                PipelineError::configuration(format!("invalid BigQuery source '{}': {e}", source.name))
            })?;
        let mut settings = self.settings.clone();
        if let Some(project) = options.project_id {
            settings.project_id = project;
        }
        if let Some(dataset) = options.dataset_id {
            settings.dataset = dataset;
        }
        if let Some(table) = options.table_name {
            settings.table = table;
        }
        if let Some(table_type) = options.table_type {
            settings.table_type = table_type;
        }
        Ok(settings)
    }
}

#[async_trait]
impl Extractor for BigQueryExtractor {
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
        let settings = self.resolve_settings(source)?;
        let table_id = settings.full_table_name();

        info!(source = %source.name, table = %table_id, %start, %end, "Starting BigQuery extraction");

        let table_type = match self.client.table_fields(&settings).await {
            Ok(fields) => detect_table_type(&fields, settings.table_type),
            Err(e) => {
                warn!(error = %e, "Could not read table schema, using configured type");
                settings.table_type
            }
        };

        let query = billing_query(table_type, &table_id, start, end, self.row_limit);
        debug!(query = %query, "BigQuery extraction query");

        let probe = self
            .client
            .query_rows(&query, Some(1))
            .await
            .map_err(|e| relabel(source, e))?;
        if let Err(missing) = check_first_row(table_type, probe.first()) {
            return Err(PipelineError::extraction(
                &source.name,
                format!(
                    "{} table missing expected fields: {}",
                    table_type.as_str(),
                    missing.join(", ")
                ),
            ));
        }

        let rows = self
            .client
            .query_rows(&query, None)
            .await
            .map_err(|e| relabel(source, e))?;

        let extracted_at = Value::String(Utc::now().to_rfc3339());
        let table_type_value = Value::String(table_type.as_str().to_string());
        let records: Vec<RawRecord> = rows
            .into_iter()
            .map(|mut row| {
                row.insert("_source_table_type".to_string(), table_type_value.clone());
                row.insert("_extraction_timestamp".to_string(), extracted_at.clone());
                row
            })
            .collect();

        info!(
            source = %source.name,
            records = records.len(),
            table_type = table_type.as_str(),
            "Extracted records from BigQuery"
        );
        Ok(records)
    }
}

/// Attribute client errors to the source being extracted
fn relabel(source: &SourceConfig, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Extraction { message, .. } => PipelineError::extraction(&source.name, message),
        PipelineError::Configuration(_) => err,
        other => PipelineError::extraction(&source.name, other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn names(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_detect_table_type() {
        let focus = names(&[
            "BilledCost", "EffectiveCost", "ListCost", "ContractedCost", "BillingAccountId",
            "ServiceName", "ServiceCategory", "ChargeCategory", "ChargePeriodStart", "ChargePeriodEnd",
        ]);
        assert_eq!(detect_table_type(&focus, TableType::Legacy), TableType::Canonical);

        let partial = names(&["BillingPeriodStart", "BillingPeriodEnd"]);
        assert_eq!(detect_table_type(&partial, TableType::Legacy), TableType::Canonical);

        let standard = names(&["usage_start_time", "usage_end_time", "cost", "currency", "service", "service.description"]);
        assert_eq!(detect_table_type(&standard, TableType::Canonical), TableType::Legacy);

        let unknown = names(&["foo", "bar"]);
        assert_eq!(detect_table_type(&unknown, TableType::Legacy), TableType::Legacy);
    }

    #[test]
    fn test_billing_query_shapes() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();

        let focus = billing_query(TableType::Canonical, "p.d.t", start, end, 500);
        assert!(focus.contains("FROM `p.d.t`"));
        assert!(focus.contains("ChargePeriodStart >= TIMESTAMP('2024-03-01T00:00:00+00:00')"));
        assert!(focus.contains("ORDER BY COALESCE(ChargePeriodStart, BillingPeriodStart)"));
        assert!(focus.ends_with("LIMIT 500"));

        let legacy = billing_query(TableType::Legacy, "p.d.t", start, end, 100_000);
        assert!(legacy.contains("service.description AS service_description"));
        assert!(legacy.contains("usage_start_time < TIMESTAMP('2024-04-01T00:00:00+00:00')"));
    }

    #[test]
    fn test_check_first_row() {
        let row: RawRecord = serde_json::from_value(json!({"cost": 1, "currency": "USD"})).unwrap();
        assert_eq!(
            check_first_row(TableType::Legacy, Some(&row)),
            Err(vec!["usage_start_time"])
        );
        assert!(check_first_row(TableType::Canonical, None).is_ok());
    }

    #[test]
    fn test_decode_row_with_nested_and_repeated_fields() {
        let schema: TableSchema = serde_json::from_value(json!({
            "fields": [
                {"name": "cost", "type": "FLOAT"},
                {"name": "usage_start_time", "type": "TIMESTAMP"},
                {"name": "service", "type": "RECORD", "fields": [
                    {"name": "id", "type": "STRING"},
                    {"name": "description", "type": "STRING"}
                ]},
                {"name": "labels", "type": "RECORD", "mode": "REPEATED", "fields": [
                    {"name": "key", "type": "STRING"},
                    {"name": "value", "type": "STRING"}
                ]},
                {"name": "credits_count", "type": "INTEGER"}
            ]
        }))
        .unwrap();
        let row = json!({"f": [
            {"v": "1.25"},
            {"v": "1.7040672E9"},
            {"v": {"f": [{"v": "6F81-5844-456A"}, {"v": "Compute Engine"}]}},
            {"v": [{"v": {"f": [{"v": "env"}, {"v": "prod"}]}}]},
            {"v": null}
        ]});

        let record = decode_row(&schema.fields, &row).unwrap();
        assert_eq!(record["cost"], json!(1.25));
        assert_eq!(record["usage_start_time"], json!("2024-01-01T00:00:00+00:00"));
        assert_eq!(record["service"]["description"], json!("Compute Engine"));
        assert_eq!(record["labels"][0]["value"], json!("prod"));
        assert_eq!(record["credits_count"], Value::Null);

        let mut flat = Vec::new();
        flatten_field_names(&schema.fields, "", &mut flat);
        assert!(flat.contains(&"service.description".to_string()));
        assert!(flat.contains(&"service".to_string()));
    }

    #[test]
    fn test_client_requires_bearer_token_and_settings() {
        let mut provider = ProviderConfig::new(crate::config::ProviderKind::Gcp);
        assert!(BigQueryClient::from_provider(&provider, &ExtractConfig::default()).is_err());

        provider.warehouse = Some(WarehouseSettings {
            project_id: "p".to_string(),
            dataset: "d".to_string(),
            table: "t".to_string(),
            location: None,
            table_type: TableType::Canonical,
        });
        assert!(BigQueryClient::from_provider(&provider, &ExtractConfig::default())
            .unwrap_err()
            .is_fatal_before_extraction());

        provider.credentials = Credentials::Bearer { token: "ya29.token".to_string() };
        assert!(BigQueryClient::from_provider(&provider, &ExtractConfig::default()).is_ok());
    }
}
