//! Filesystem and object store extractor
//!
//! Reads billing exports from a local directory or an `s3://bucket/prefix`
//! location. Files are selected with a glob, parsed by extension (Parquet,
//! CSV with optional gzip, JSON lines) and optionally filtered by a date
//! column on the client side.

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials as S3Credentials, Region};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt, TryStreamExt};
use parquet::file::reader::{ChunkReader, FileReader, SerializedFileReader};
use parquet::record::Field;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{check_window, render_template, Extractor};
use crate::config::{Credentials, ProviderConfig, SourceConfig};
use crate::error::{PipelineError, Result};
use crate::mapper::parse;
use crate::RawRecord;

pub const SOURCE_TYPE: &str = "filesystem";

/// Objects fetched in parallel from one S3 listing
const S3_DOWNLOAD_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Parquet,
    Csv,
    #[serde(alias = "jsonl")]
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ParseOptions {
    #[serde(default)]
    format: FileFormat,
    #[serde(default)]
    compression: Option<String>,
    #[serde(default)]
    delimiter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DateFilter {
    date_column: String,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilesystemOptions {
    #[serde(default)]
    bucket_url: Option<String>,
    #[serde(default)]
    file_pattern: Option<String>,
    #[serde(default)]
    parse_options: ParseOptions,
    #[serde(default)]
    filters: Option<DateFilter>,
    #[serde(default)]
    aws_access_key_id: Option<String>,
    #[serde(default)]
    aws_secret_access_key: Option<String>,
    #[serde(default)]
    aws_session_token: Option<String>,
    #[serde(default)]
    region: Option<String>,
    /// S3-compatible endpoint, with path-style addressing
    #[serde(default)]
    endpoint_url: Option<String>,
}

/// Where the export files live
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Local(PathBuf),
    S3 { bucket: String, prefix: String },
}

impl Location {
    fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(PipelineError::configuration(format!(
                    "bucket_url '{url}' has no bucket name"
                )));
            }
            return Ok(Location::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.trim_matches('/').to_string(),
            });
        }
        if url.contains("://") && !url.starts_with("file://") {
            return Err(PipelineError::configuration(format!(
                "unsupported bucket_url scheme in '{url}'"
            )));
        }
        Ok(Location::Local(PathBuf::from(
            url.strip_prefix("file://").unwrap_or(url),
        )))
    }
}

/// Parser picked for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Parquet,
    Csv { gzip: bool },
    JsonLines { gzip: bool },
}

impl FileKind {
    fn detect(name: &str, fallback: FileFormat, compression: Option<&str>) -> Self {
        let lower = name.to_lowercase();
        let gzip = lower.ends_with(".gz");
        let stem = lower.strip_suffix(".gz").unwrap_or(&lower);
        if stem.ends_with(".parquet") {
            FileKind::Parquet
        } else if stem.ends_with(".csv") {
            FileKind::Csv { gzip }
        } else if stem.ends_with(".jsonl") || stem.ends_with(".json") || stem.ends_with(".ndjson") {
            FileKind::JsonLines { gzip }
        } else {
            let gzip = gzip || compression == Some("gzip");
            match fallback {
                FileFormat::Parquet => FileKind::Parquet,
                FileFormat::Csv => FileKind::Csv { gzip },
                FileFormat::Json => FileKind::JsonLines { gzip },
            }
        }
    }
}

pub struct FilesystemExtractor {
    credentials: Credentials,
}

impl FilesystemExtractor {
    pub fn new(provider: &ProviderConfig) -> Self {
        Self {
            credentials: provider.credentials.clone(),
        }
    }

    async fn s3_client(&self, options: &FilesystemOptions) -> aws_sdk_s3::Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &options.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        let static_keys = match (&options.aws_access_key_id, &options.aws_secret_access_key) {
            (Some(key), Some(secret)) => {
                Some((key.clone(), secret.clone(), options.aws_session_token.clone()))
            }
            _ => match &self.credentials {
                Credentials::AwsKeys {
                    access_key_id,
                    secret_access_key,
                    session_token,
                } => Some((
                    access_key_id.clone(),
                    secret_access_key.clone(),
                    session_token.clone(),
                )),
                _ => None,
            },
        };
        if let Some((key, secret, token)) = static_keys {
            builder = builder.credentials_provider(S3Credentials::new(
                key,
                secret,
                token,
                None,
                "focus-source-config",
            ));
        }
        if let Some(endpoint) = &options.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        aws_sdk_s3::Client::from_conf(builder.build())
    }

    async fn extract_s3(
        &self,
        source: &SourceConfig,
        options: &FilesystemOptions,
        bucket: &str,
        prefix: &str,
        pattern: &Regex,
    ) -> Result<Vec<RawRecord>> {
        let client = self.s3_client(options).await;
        let fail = |e: String| PipelineError::extraction(&source.name, e);

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = client.list_objects_v2().bucket(bucket);
            if !prefix.is_empty() {
                request = request.prefix(format!("{prefix}/"));
            }
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| fail(format!("failed to list s3://{bucket}/{prefix}: {e}")))?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    let relative = key
                        .strip_prefix(prefix)
                        .unwrap_or(key)
                        .trim_start_matches('/');
                    if pattern.is_match(relative) {
                        keys.push(key.to_string());
                    }
                }
            }

            continuation = response.next_continuation_token().map(str::to_string);
            if continuation.is_none() {
                break;
            }
        }
        keys.sort();

        info!(source = %source.name, files = keys.len(), "Matched objects in s3://{}/{}", bucket, prefix);

        let client = &client;
        let parsed: Vec<Vec<RawRecord>> = stream::iter(keys)
            .map(|key| async move {
                let object = client
                    .get_object()
                    .bucket(bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| fail(format!("failed to download s3://{bucket}/{key}: {e}")))?;
                let data = object
                    .body
                    .collect()
                    .await
                    .map_err(|e| fail(format!("failed to read s3://{bucket}/{key}: {e}")))?
                    .into_bytes();

                let kind = FileKind::detect(
                    &key,
                    options.parse_options.format,
                    options.parse_options.compression.as_deref(),
                );
                let rows = match kind {
                    FileKind::Parquet => parquet_rows(data)?,
                    FileKind::Csv { gzip } => {
                        csv_rows(open_text(&data[..], gzip), delimiter(&options.parse_options)?)?
                    }
                    FileKind::JsonLines { gzip } => jsonl_rows(open_text(&data[..], gzip))?,
                };
                debug!(source = %source.name, key = %key, rows = rows.len(), "Parsed object");
                Ok::<_, PipelineError>(rows)
            })
            // Ordered so records keep the sorted key order
            .buffered(S3_DOWNLOAD_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(parsed.into_iter().flatten().collect())
    }
}

#[async_trait]
impl Extractor for FilesystemExtractor {
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

        let options: FilesystemOptions =
            serde_json::from_value(source.config.clone()).map_err(|e| {
                PipelineError::configuration(format!(
                    "invalid filesystem source '{}': {e}",
                    source.name
                ))
            })?;
        let bucket_url = options.bucket_url.as_deref().ok_or_else(|| {
            PipelineError::configuration(format!(
                "filesystem source '{}' has no bucket_url",
                source.name
            ))
        })?;
        let location = Location::parse(bucket_url)?;
        let glob = resolve_pattern(&options, start)?;
        let pattern = glob_to_regex(&glob)?;

        info!(source = %source.name, bucket_url, pattern = %glob, "Extracting from filesystem");

        let records = match &location {
            Location::Local(root) => {
                let mut records = Vec::new();
                for path in list_local(root, &pattern)? {
                    let rows = read_local_file(&path, &options.parse_options)
                        .map_err(|e| annotate(source, &path, e))?;
                    debug!(source = %source.name, file = %path.display(), rows = rows.len(), "Parsed file");
                    records.extend(rows);
                }
                records
            }
            Location::S3 { bucket, prefix } => {
                self.extract_s3(source, &options, bucket, prefix, &pattern)
                    .await?
            }
        };

        let records = match &options.filters {
            Some(filter) => apply_date_filter(records, filter),
            None => records,
        };

        info!(source = %source.name, records = records.len(), "Successfully extracted records from filesystem");
        Ok(records)
    }
}

fn annotate(source: &SourceConfig, path: &Path, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Configuration(_) => err,
        other => PipelineError::extraction(&source.name, format!("{}: {other}", path.display())),
    }
}

/// Configured glob, or one derived from the format, with date placeholders filled
fn resolve_pattern(options: &FilesystemOptions, start: DateTime<Utc>) -> Result<String> {
    let pattern = match options.file_pattern.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => match options.parse_options.format {
            FileFormat::Parquet => "**/*.parquet".to_string(),
            FileFormat::Csv if options.parse_options.compression.as_deref() == Some("gzip") => {
                "**/*.csv.gz".to_string()
            }
            FileFormat::Csv => "**/*.csv".to_string(),
            FileFormat::Json => "**/*.jsonl".to_string(),
        },
    };

    if !pattern.contains('{') {
        return Ok(pattern);
    }
    let params = BTreeMap::from([
        ("year".to_string(), start.format("%Y").to_string()),
        ("month".to_string(), start.format("%-m").to_string()),
        ("day".to_string(), start.format("%-d").to_string()),
        ("year_month".to_string(), start.format("%Y-%m").to_string()),
        ("date".to_string(), start.format("%Y-%m-%d").to_string()),
    ]);
    render_template(&pattern, &params)
}

/// Anchored regex for a glob: `**/` spans directories, `*` and `?` stay within one
pub(crate) fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut expr = String::from("^");
    let mut chars = glob.trim_start_matches("./").chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    expr.push_str("(?:.*/)?");
                } else {
                    expr.push_str(".*");
                }
            }
            '*' => expr.push_str("[^/]*"),
            '?' => expr.push_str("[^/]"),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
        .map_err(|e| PipelineError::configuration(format!("invalid file_pattern '{glob}': {e}")))
}

fn list_local(root: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(PipelineError::configuration(format!(
            "bucket_url path {} does not exist",
            root.display()
        )));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|rel| {
                    let rel = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    pattern.is_match(&rel)
                })
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}

fn read_local_file(path: &Path, options: &ParseOptions) -> Result<Vec<RawRecord>> {
    let name = path.to_string_lossy();
    match FileKind::detect(&name, options.format, options.compression.as_deref()) {
        FileKind::Parquet => parquet_rows(File::open(path)?),
        FileKind::Csv { gzip } => csv_rows(open_text(File::open(path)?, gzip), delimiter(options)?),
        FileKind::JsonLines { gzip } => jsonl_rows(open_text(File::open(path)?, gzip)),
    }
}

fn open_text<'a, R: Read + 'a>(reader: R, gzip: bool) -> Box<dyn Read + 'a> {
    if gzip {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    }
}

fn delimiter(options: &ParseOptions) -> Result<u8> {
    match options.delimiter.as_deref() {
        None | Some("") => Ok(b','),
        Some("\\t") | Some("\t") => Ok(b'\t'),
        Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
        Some(d) => Err(PipelineError::configuration(format!(
            "CSV delimiter must be a single byte, got '{d}'"
        ))),
    }
}

fn parquet_rows<R: ChunkReader + 'static>(reader: R) -> Result<Vec<RawRecord>> {
    let reader = SerializedFileReader::new(reader)?;
    let mut rows = Vec::new();
    for row in reader.get_row_iter(None)? {
        let row = row?;
        let record: RawRecord = row
            .get_column_iter()
            .map(|(name, field)| (name.clone(), parquet_value(field)))
            .collect();
        rows.push(record);
    }
    Ok(rows)
}

/// JSON for a Parquet field, with temporal values rendered as RFC 3339
fn parquet_value(field: &Field) -> Value {
    let instant = match field {
        Field::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms),
        Field::TimestampMicros(us) => DateTime::from_timestamp_micros(*us),
        Field::Date(days) => DateTime::from_timestamp(i64::from(*days) * 86_400, 0),
        _ => return field.to_json_value(),
    };
    match instant {
        Some(at) => Value::String(at.to_rfc3339()),
        None => field.to_json_value(),
    }
}

fn csv_rows<R: Read>(reader: R, delimiter: u8) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let row: RawRecord = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn jsonl_rows<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut rows = Vec::new();
    for line in serde_jsonlines::JsonLinesReader::new(BufReader::new(reader)).read_all::<Value>() {
        match line? {
            Value::Object(map) => rows.push(map),
            other => warn!(value = %other, "Skipping non-object JSON line"),
        }
    }
    Ok(rows)
}

/// Keep rows inside `[start_date, end_date]`; rows without a parsable value are kept
fn apply_date_filter(records: Vec<RawRecord>, filter: &DateFilter) -> Vec<RawRecord> {
    let bound = |raw: &Option<String>| {
        raw.as_deref()
            .and_then(|text| parse::instant(&Value::String(text.to_string())))
    };
    let (Some(start), Some(end)) = (bound(&filter.start_date), bound(&filter.end_date)) else {
        if filter.start_date.is_some() || filter.end_date.is_some() {
            warn!(column = %filter.date_column, "Date filter bounds are incomplete or unparsable, not filtering");
        }
        return records;
    };

    let before = records.len();
    let kept: Vec<RawRecord> = records
        .into_iter()
        .filter(|record| match record.get(&filter.date_column).and_then(parse::instant) {
            Some(at) => start <= at && at <= end,
            None => true,
        })
        .collect();
    debug!(column = %filter.date_column, before, after = kept.len(), "Applied date filter");
    kept
}
