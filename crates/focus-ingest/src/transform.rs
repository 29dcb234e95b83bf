//! Transform stage
//!
//! Turns a batch of extracted items into canonical records:
//!
//! 1. Flatten wrapper items (`extracted_data`, `data`, `records`) one level
//! 2. Map each record in chunks, checking for cancellation between chunks
//! 3. Validate every produced record and apply the strict/lenient policy
//! 4. Derive a batch status from the counts

use chrono::{DateTime, Utc};
use focus_common::FocusError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ProviderConfig, ProviderKind, TransformConfig};
use crate::focus::{FocusRecord, FocusValidator, ValidationIssue};
use crate::mapper::{MapOutcome, ProviderMapper};
use crate::RawRecord;

/// Wrapper fields whose contents replace the item during flattening
const WRAPPER_FIELDS: [&str; 3] = ["extracted_data", "data", "records"];

/// Final state of a transform run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformStatus {
    /// Nothing to transform
    SuccessEmpty,
    Success,
    PartialSuccess,
    Failure,
}

impl TransformStatus {
    fn from_counts(transformed: usize, failed: usize, skipped: usize) -> Self {
        if failed == 0 {
            TransformStatus::Success
        } else if transformed == 0 && skipped == 0 {
            TransformStatus::Failure
        } else {
            TransformStatus::PartialSuccess
        }
    }

    pub fn is_success(self) -> bool {
        self != TransformStatus::Failure
    }
}

/// Batch counters, serialized with exactly the reported keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformSummary {
    pub provider_type: ProviderKind,
    pub total_raw_records: usize,
    pub total_records: usize,
    pub transformed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub validation_errors: usize,
}

/// A record that could not be emitted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureEntry {
    pub record: Value,
    pub error: String,
    pub error_type: String,
}

impl FailureEntry {
    fn new(record: Value, err: &FocusError) -> Self {
        let error = match err {
            FocusError::Mapping(msg) | FocusError::Validation(msg) => msg.clone(),
            other => other.to_string(),
        };
        Self {
            record,
            error,
            error_type: err.kind().to_string(),
        }
    }
}

/// Validation issues attached to one emitted or rejected record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSample {
    pub record_id: String,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformBatchResult {
    pub status: TransformStatus,
    pub summary: TransformSummary,
    /// First failures only; `summary.failed` stays exact
    pub failures: Vec<FailureEntry>,
    pub validation_issues: Vec<ValidationSample>,
    #[serde(skip)]
    pub records: Vec<FocusRecord>,
    pub duration_seconds: f64,
    pub cancelled: bool,
}

impl TransformBatchResult {
    /// Emitted records as JSON objects, in input order
    pub fn transformed_records(&self) -> Vec<Map<String, Value>> {
        self.records.iter().map(FocusRecord::to_json_map).collect()
    }
}

/// Maps, validates and counts one provider's records
pub struct TransformStage {
    mapper: ProviderMapper,
    validator: FocusValidator,
    config: TransformConfig,
}

impl TransformStage {
    pub fn new(mapper: ProviderMapper, config: TransformConfig) -> Self {
        Self {
            mapper,
            validator: FocusValidator::new(),
            config,
        }
    }

    pub fn from_provider(provider: &ProviderConfig, config: TransformConfig) -> Self {
        Self::new(ProviderMapper::from_config(provider), config)
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.mapper.provider_kind()
    }

    pub fn transform(&self, raw: &[Value]) -> TransformBatchResult {
        self.transform_with_cancel(raw, &CancellationToken::new())
    }

    pub fn transform_with_cancel(
        &self,
        raw: &[Value],
        cancel: &CancellationToken,
    ) -> TransformBatchResult {
        self.transform_at(raw, cancel, Utc::now())
    }

    /// Run the stage with a pinned processing instant
    pub fn transform_at(
        &self,
        raw: &[Value],
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> TransformBatchResult {
        let started = Instant::now();
        let provider_type = self.provider_kind();
        let records = flatten(raw);

        let mut batch = BatchState::new(self.config.max_failure_samples);
        let mut summary = TransformSummary {
            provider_type,
            total_raw_records: raw.len(),
            total_records: records.len(),
            transformed: 0,
            failed: 0,
            skipped: 0,
            validation_errors: 0,
        };

        if records.is_empty() {
            info!(provider = %provider_type, "No records to transform");
            return TransformBatchResult {
                status: TransformStatus::SuccessEmpty,
                summary,
                failures: Vec::new(),
                validation_issues: Vec::new(),
                records: Vec::new(),
                duration_seconds: started.elapsed().as_secs_f64(),
                cancelled: false,
            };
        }

        info!(
            provider = %provider_type,
            raw_records = raw.len(),
            records = records.len(),
            batch_size = self.config.batch_size,
            strict = self.config.strict_validation,
            "Starting transform"
        );

        let batch_size = self.config.batch_size.max(1);
        let total_chunks = records.len().div_ceil(batch_size);
        let mut cancelled = false;

        for (index, chunk) in records.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    provider = %provider_type,
                    completed_chunks = index,
                    total_chunks,
                    "Transform cancelled"
                );
                cancelled = true;
                break;
            }

            for item in chunk {
                self.process(item, now, &mut batch);
            }

            info!(
                provider = %provider_type,
                chunk = index + 1,
                total_chunks,
                transformed = batch.records.len(),
                failed = batch.failed,
                skipped = batch.skipped,
                "Transform progress"
            );
        }

        summary.transformed = batch.records.len();
        summary.failed = batch.failed;
        summary.skipped = batch.skipped;
        summary.validation_errors = batch.validation_errors;

        let status =
            TransformStatus::from_counts(summary.transformed, summary.failed, summary.skipped);
        let duration_seconds = started.elapsed().as_secs_f64();

        info!(
            provider = %provider_type,
            status = ?status,
            transformed = summary.transformed,
            failed = summary.failed,
            skipped = summary.skipped,
            validation_errors = summary.validation_errors,
            "Transform complete in {:.2}s",
            duration_seconds
        );

        TransformBatchResult {
            status,
            summary,
            failures: batch.failures,
            validation_issues: batch.validation_issues,
            records: batch.records,
            duration_seconds,
            cancelled,
        }
    }

    fn process(&self, item: &Value, now: DateTime<Utc>, batch: &mut BatchState) {
        let Some(record) = item.as_object() else {
            let err = FocusError::Mapping("record is not a JSON object".to_string());
            batch.fail(item, &err);
            return;
        };

        match self.mapper.map_to_focus_at(record, now) {
            MapOutcome::Skip(reason) => {
                debug!(reason = %reason, "Skipping record");
                batch.skipped += 1;
            }
            MapOutcome::Invalid(err) => {
                debug!(error = %err, "Record failed mapping");
                batch.fail(item, &FocusError::Mapping(err.message));
            }
            MapOutcome::Records(mapped) => {
                for focus in mapped {
                    self.accept(item, focus, now, batch);
                }
            }
        }
    }

    fn accept(&self, item: &Value, focus: FocusRecord, now: DateTime<Utc>, batch: &mut BatchState) {
        if !self.config.validate_focus {
            batch.records.push(focus);
            return;
        }

        let validation = self.validator.validate_record_at(&focus, now);
        if validation.is_valid() {
            batch.records.push(focus);
            return;
        }

        batch.validation_errors += validation.errors.len();
        let message = validation
            .errors
            .iter()
            .map(|issue| format!("{}: {}", issue.field, issue.message))
            .collect::<Vec<_>>()
            .join("; ");
        batch.sample_issues(&focus.id, validation.errors);

        if self.config.strict_validation {
            batch.fail(item, &FocusError::Validation(message));
        } else {
            warn!(record_id = %focus.id, errors = %message, "Emitting record with validation errors");
            batch.records.push(focus);
        }
    }
}

/// Mutable counters threaded through one run
struct BatchState {
    max_samples: usize,
    records: Vec<FocusRecord>,
    failures: Vec<FailureEntry>,
    validation_issues: Vec<ValidationSample>,
    failed: usize,
    skipped: usize,
    validation_errors: usize,
}

impl BatchState {
    fn new(max_samples: usize) -> Self {
        Self {
            max_samples,
            records: Vec::new(),
            failures: Vec::new(),
            validation_issues: Vec::new(),
            failed: 0,
            skipped: 0,
            validation_errors: 0,
        }
    }

    fn fail(&mut self, record: &Value, err: &FocusError) {
        self.failed += 1;
        if self.failures.len() < self.max_samples {
            self.failures.push(FailureEntry::new(record.clone(), err));
        }
    }

    fn sample_issues(&mut self, record_id: &str, issues: Vec<ValidationIssue>) {
        if self.validation_issues.len() < self.max_samples {
            self.validation_issues.push(ValidationSample {
                record_id: record_id.to_string(),
                issues,
            });
        }
    }
}

/// Expand wrapper items one level; everything else passes through
pub fn flatten(raw: &[Value]) -> Vec<Value> {
    let mut records = Vec::with_capacity(raw.len());
    for item in raw {
        let wrapped = item
            .as_object()
            .and_then(|object| WRAPPER_FIELDS.iter().find_map(|field| object.get(*field)));

        match wrapped {
            None => records.push(item.clone()),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                Ok(parsed) => push_contents(parsed, &mut records),
                Err(e) => error!(error = %e, "Failed to parse wrapped record data"),
            },
            Some(contents) => push_contents(contents.clone(), &mut records),
        }
    }
    records
}

fn push_contents(contents: Value, records: &mut Vec<Value>) {
    match contents {
        Value::Array(items) => records.extend(items),
        Value::Null => {}
        other => records.push(other),
    }
}

/// Parse raw items from a JSON array, a single JSON object or JSON lines
pub fn parse_raw_items(text: &str) -> crate::error::Result<Vec<Value>> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    if let Ok(single) = serde_json::from_str::<RawRecord>(trimmed) {
        return Ok(vec![Value::Object(single)]);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn aws_stage(strict: bool) -> TransformStage {
        let config = TransformConfig {
            batch_size: 2,
            strict_validation: strict,
            ..TransformConfig::default()
        };
        TransformStage::from_provider(&ProviderConfig::new(ProviderKind::Aws), config)
    }

    fn aws_row(cost: &str) -> Value {
        json!({
            "BilledCost": cost,
            "EffectiveCost": cost,
            "ListCost": cost,
            "ContractedCost": cost,
            "BillingCurrency": "USD",
            "BillingAccountId": "123456789012",
            "ChargePeriodStart": "2024-03-01T00:00:00Z",
            "ChargePeriodEnd": "2024-03-01T01:00:00Z",
            "ServiceName": "Amazon Elastic Compute Cloud",
            "ChargeCategory": "Usage",
            "ChargeDescription": "m5.large hours"
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_input_is_success_empty() {
        let result = aws_stage(false).transform(&[]);
        assert_eq!(result.status, TransformStatus::SuccessEmpty);
        assert!(result.status.is_success());
        assert_eq!(result.summary.total_raw_records, 0);
    }

    #[test]
    fn test_wrapper_that_flattens_to_nothing_is_success_empty() {
        let result = aws_stage(false).transform(&[json!({"data": []})]);
        assert_eq!(result.status, TransformStatus::SuccessEmpty);
        assert_eq!(result.summary.total_raw_records, 1);
        assert_eq!(result.summary.total_records, 0);
    }

    #[test]
    fn test_flatten_wrappers() {
        let raw = vec![
            json!({"data": "[{\"a\": 1}, {\"a\": 2}]"}),
            json!({"records": {"a": 3}}),
            json!({"extracted_data": [{"a": 4}]}),
            json!({"data": "{not json"}),
            json!({"a": 5}),
        ];
        let flat = flatten(&raw);
        let values: Vec<i64> = flat.iter().map(|v| v["a"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_mixed_batch_is_partial_success() {
        let raw = vec![aws_row("1.50"), json!({"foo": "bar"}), json!({}), aws_row("2")];
        let result = aws_stage(false).transform_at(&raw, &CancellationToken::new(), now());

        assert_eq!(result.status, TransformStatus::PartialSuccess);
        assert_eq!(result.summary.transformed, 2);
        assert_eq!(result.summary.failed, 1);
        assert_eq!(result.summary.skipped, 1);
        assert_eq!(result.failures[0].error_type, "MappingError");
        assert_eq!(result.failures[0].record, json!({"foo": "bar"}));

        let summary = serde_json::to_value(&result.summary).unwrap();
        let mut keys: Vec<&String> = summary.as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "failed",
                "provider_type",
                "skipped",
                "total_raw_records",
                "total_records",
                "transformed",
                "validation_errors"
            ]
        );
    }

    #[test]
    fn test_all_invalid_is_failure() {
        let raw = vec![json!({"foo": 1}), json!("not an object")];
        let result = aws_stage(false).transform(&raw);
        assert_eq!(result.status, TransformStatus::Failure);
        assert!(!result.status.is_success());
        assert_eq!(result.summary.failed, 2);
    }

    #[test]
    fn test_strict_and_lenient_on_negative_cost() {
        let raw = vec![aws_row("-5")];

        let strict = aws_stage(true).transform_at(&raw, &CancellationToken::new(), now());
        assert_eq!(strict.summary.transformed, 0);
        assert_eq!(strict.summary.failed, 1);
        assert!(strict.summary.validation_errors >= 1);
        assert_eq!(strict.failures[0].error_type, "ValidationError");
        assert_eq!(strict.status, TransformStatus::Failure);

        let lenient = aws_stage(false).transform_at(&raw, &CancellationToken::new(), now());
        assert_eq!(lenient.summary.transformed, 1);
        assert_eq!(lenient.summary.failed, 0);
        assert_eq!(lenient.summary.validation_errors, strict.summary.validation_errors);
        assert_eq!(lenient.validation_issues.len(), 1);
        assert_eq!(lenient.status, TransformStatus::Success);
    }

    #[test]
    fn test_validation_can_be_disabled() {
        let config = TransformConfig {
            strict_validation: true,
            validate_focus: false,
            ..TransformConfig::default()
        };
        let stage = TransformStage::from_provider(&ProviderConfig::new(ProviderKind::Aws), config);
        let result = stage.transform(&[aws_row("-5")]);
        assert_eq!(result.summary.transformed, 1);
        assert_eq!(result.summary.validation_errors, 0);
    }

    #[test]
    fn test_cancelled_before_first_chunk() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = aws_stage(false).transform_with_cancel(&[aws_row("1")], &cancel);
        assert!(result.cancelled);
        assert_eq!(result.summary.transformed, 0);
        assert_eq!(result.summary.total_records, 1);
    }

    #[test]
    fn test_failure_samples_are_capped() {
        let config = TransformConfig {
            max_failure_samples: 3,
            ..TransformConfig::default()
        };
        let stage = TransformStage::from_provider(&ProviderConfig::new(ProviderKind::Aws), config);
        let raw: Vec<Value> = (0..8).map(|i| json!({"unknown": i})).collect();
        let result = stage.transform(&raw);
        assert_eq!(result.summary.failed, 8);
        assert_eq!(result.failures.len(), 3);
    }

    #[test]
    fn test_records_keep_input_order() {
        let raw = vec![aws_row("1"), aws_row("2"), aws_row("3")];
        let result = aws_stage(false).transform_at(&raw, &CancellationToken::new(), now());
        let costs: Vec<String> = result
            .transformed_records()
            .iter()
            .map(|r| r["billed_cost"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(costs, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_parse_raw_items_formats() {
        assert_eq!(parse_raw_items("[{\"a\":1},{\"a\":2}]").unwrap().len(), 2);
        assert_eq!(parse_raw_items("{\"a\":1}").unwrap().len(), 1);
        assert_eq!(parse_raw_items("{\"a\":1}\n\n{\"a\":2}\n").unwrap().len(), 2);
        assert!(parse_raw_items("   ").unwrap().is_empty());
        assert!(parse_raw_items("{\"a\":1}\nnope").is_err());
    }
}
