//! Record-level conformance checks
//!
//! The validator never rejects anything itself. It reports issues at three
//! severities and leaves the accept/reject decision to the transform stage.
//!
//! # Examples
//!
//! ```rust,ignore
//! let result = FocusValidator::new().validate_record(&record);
//! if !result.is_valid() {
//!     for issue in &result.errors {
//!         tracing::warn!(field = %issue.field, "{}", issue.message);
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::spec::{
    ChargeCategory, ChargeClass, ChargeFrequency, CommitmentDiscountStatus, ServiceCategory,
};
use super::FocusRecord;

/// Number of per-record details kept in a batch summary
pub const MAX_BATCH_DETAILS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

/// Issues found on one record, grouped by severity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    fn push(&mut self, severity: Severity, field: &str, message: impl Into<String>) {
        let issue = ValidationIssue {
            field: field.to_string(),
            message: message.into(),
            severity,
        };
        match severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
            Severity::Info => self.info.push(issue),
        }
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.push(Severity::Error, field, message);
    }

    fn warning(&mut self, field: &str, message: impl Into<String>) {
        self.push(Severity::Warning, field, message);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordValidation {
    pub record_index: usize,
    pub record_id: String,
    pub validation: ValidationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchValidationSummary {
    pub total_records: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
    /// Percentage of records without errors, 0 for an empty batch
    pub compliance_rate: f64,
    pub validation_details: Vec<RecordValidation>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FocusValidator;

impl FocusValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_record(&self, record: &FocusRecord) -> ValidationResult {
        self.validate_record_at(record, Utc::now())
    }

    /// Validate against a fixed "now" used by the future-period checks
    ///
    /// # Rules
    /// - Errors: blank mandatory strings, out-of-enum values, non-increasing
    ///   periods, negative costs or quantities, orphaned dependent fields
    /// - Warnings: malformed currency, charge period outside the billing
    ///   period, periods ending in the future, discounted cost above list cost
    /// - Info: consumed quantity above pricing quantity
    pub fn validate_record_at(&self, record: &FocusRecord, now: DateTime<Utc>) -> ValidationResult {
        let mut result = ValidationResult::default();
        check_mandatory(record, &mut result);
        check_enums(record, &mut result);
        check_dependencies(record, &mut result);
        check_periods(record, now, &mut result);
        check_amounts(record, &mut result);
        result
    }

    pub fn validate_batch(&self, records: &[FocusRecord]) -> BatchValidationSummary {
        let now = Utc::now();
        let mut summary = BatchValidationSummary {
            total_records: records.len(),
            valid_records: 0,
            invalid_records: 0,
            total_errors: 0,
            total_warnings: 0,
            compliance_rate: 0.0,
            validation_details: Vec::new(),
        };

        for (index, record) in records.iter().enumerate() {
            let result = self.validate_record_at(record, now);
            if result.is_valid() {
                summary.valid_records += 1;
            }
            summary.total_errors += result.errors.len();
            summary.total_warnings += result.warnings.len();
            if (!result.is_valid() || result.has_warnings())
                && summary.validation_details.len() < MAX_BATCH_DETAILS
            {
                summary.validation_details.push(RecordValidation {
                    record_index: index,
                    record_id: record.id.clone(),
                    validation: result,
                });
            }
        }

        summary.invalid_records = summary.total_records - summary.valid_records;
        if summary.total_records > 0 {
            summary.compliance_rate =
                summary.valid_records as f64 / summary.total_records as f64 * 100.0;
        }
        summary
    }
}

fn check_mandatory(record: &FocusRecord, result: &mut ValidationResult) {
    let fields = [
        ("billing_account_id", &record.billing_account_id),
        ("billing_account_type", &record.billing_account_type),
        ("currency", &record.currency),
        ("service_name", &record.service_name),
        ("service_category", &record.service_category),
        ("provider_name", &record.provider_name),
        ("publisher_name", &record.publisher_name),
        ("invoice_issuer_name", &record.invoice_issuer_name),
        ("charge_category", &record.charge_category),
        ("charge_description", &record.charge_description),
    ];
    for (field, value) in fields {
        if value.trim().is_empty() {
            result.error(field, format!("{field} is mandatory"));
        }
    }
}

fn check_enums(record: &FocusRecord, result: &mut ValidationResult) {
    let mandatory = [
        ("service_category", &record.service_category, ServiceCategory::is_valid as fn(&str) -> bool),
        ("charge_category", &record.charge_category, ChargeCategory::is_valid),
    ];
    for (field, value, is_valid) in mandatory {
        if !value.trim().is_empty() && !is_valid(value) {
            result.error(field, format!("invalid {field}: {value}"));
        }
    }

    let optional = [
        ("charge_class", &record.charge_class, ChargeClass::is_valid as fn(&str) -> bool),
        (
            "commitment_discount_status",
            &record.commitment_discount_status,
            CommitmentDiscountStatus::is_valid,
        ),
        ("charge_frequency", &record.charge_frequency, ChargeFrequency::is_valid),
    ];
    for (field, value, is_valid) in optional {
        if let Some(value) = value.as_deref().filter(|v| !is_valid(v)) {
            result.error(field, format!("invalid {field}: {value}"));
        }
    }
}

fn check_dependencies(record: &FocusRecord, result: &mut ValidationResult) {
    let dependents = [
        ("sub_account_name", record.sub_account_name.is_some(), "sub_account_id", record.sub_account_id.is_some()),
        ("pricing_unit", record.pricing_unit.is_some(), "pricing_quantity", record.pricing_quantity.is_some()),
        ("resource_name", record.resource_name.is_some(), "resource_id", record.resource_id.is_some()),
        ("resource_type", record.resource_type.is_some(), "resource_id", record.resource_id.is_some()),
        ("region_name", record.region_name.is_some(), "region_id", record.region_id.is_some()),
        ("consumed_unit", record.consumed_unit.is_some(), "consumed_quantity", record.consumed_quantity.is_some()),
    ];
    for (field, present, parent, parent_present) in dependents {
        if present && !parent_present {
            result.error(field, format!("{field} requires {parent}"));
        }
    }
}

fn check_periods(record: &FocusRecord, now: DateTime<Utc>, result: &mut ValidationResult) {
    if record.billing_period_end <= record.billing_period_start {
        result.error("billing_period", "billing_period_end must be after billing_period_start");
    }
    if record.charge_period_end <= record.charge_period_start {
        result.error("charge_period", "charge_period_end must be after charge_period_start");
    }
    if record.charge_period_start < record.billing_period_start {
        result.warning("charge_period", "charge_period_start is before billing_period_start");
    }
    if record.charge_period_end > record.billing_period_end {
        result.warning("charge_period", "charge_period_end is after billing_period_end");
    }
    if record.billing_period_end > now {
        result.warning("billing_period", "billing_period_end is in the future");
    }
    if record.charge_period_end > now {
        result.warning("charge_period", "charge_period_end is in the future");
    }
}

fn check_amounts(record: &FocusRecord, result: &mut ValidationResult) {
    if record.currency.len() != 3 || !record.currency.chars().all(|c| c.is_ascii_alphabetic()) {
        result.warning(
            "currency",
            format!("currency should be a 3-letter code: {}", record.currency),
        );
    }

    for (field, cost) in record.costs() {
        if cost < Decimal::ZERO {
            result.error(field, format!("{field} is negative: {cost}"));
        }
    }
    for (field, quantity) in record.quantities() {
        if quantity < Decimal::ZERO {
            result.error(field, format!("{field} is negative: {quantity}"));
        }
    }

    if record.effective_cost > record.list_cost {
        result.warning("effective_cost", "effective_cost is greater than list_cost");
    }
    if record.contracted_cost > record.list_cost {
        result.warning("contracted_cost", "contracted_cost is greater than list_cost");
    }

    if let (Some(consumed), Some(pricing)) = (record.consumed_quantity, record.pricing_quantity) {
        if consumed > pricing {
            result.push(
                Severity::Info,
                "consumed_quantity",
                "consumed_quantity exceeds pricing_quantity",
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn record() -> FocusRecord {
        serde_json::from_value(json!({
            "id": "rec-1",
            "billed_cost": "10.00",
            "effective_cost": "9.00",
            "list_cost": "12.00",
            "contracted_cost": "9.50",
            "currency": "USD",
            "billing_account_id": "acct-1",
            "billing_account_name": "Main",
            "billing_account_type": "BillingAccount",
            "charge_period_start": "2024-01-15T00:00:00Z",
            "charge_period_end": "2024-01-16T00:00:00Z",
            "billing_period_start": "2024-01-01T00:00:00Z",
            "billing_period_end": "2024-02-01T00:00:00Z",
            "service_name": "Amazon EC2",
            "service_category": "Compute",
            "provider_name": "Amazon Web Services",
            "publisher_name": "Amazon Web Services",
            "invoice_issuer_name": "Amazon Web Services",
            "charge_category": "Usage",
            "charge_description": "Instance hours",
            "pricing_quantity": "24",
            "pricing_unit": "Hours"
        }))
        .unwrap()
    }

    fn fields(issues: &[ValidationIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.field.as_str()).collect()
    }

    #[test]
    fn test_clean_record_has_no_issues() {
        let result = FocusValidator::new().validate_record_at(&record(), now());
        assert_eq!(result, ValidationResult::default());
    }

    #[test]
    fn test_negative_cost_and_quantity_are_errors() {
        let mut rec = record();
        rec.billed_cost = dec!(-1);
        rec.pricing_quantity = Some(dec!(-2));
        let result = FocusValidator::new().validate_record_at(&rec, now());
        assert!(!result.is_valid());
        assert_eq!(fields(&result.errors), vec!["billed_cost", "pricing_quantity"]);
    }

    #[test]
    fn test_equal_period_bounds_are_errors() {
        let mut rec = record();
        rec.charge_period_end = rec.charge_period_start;
        let result = FocusValidator::new().validate_record_at(&rec, now());
        assert_eq!(fields(&result.errors), vec!["charge_period"]);
    }

    #[test]
    fn test_orphaned_dependents() {
        let mut rec = record();
        rec.resource_name = Some("vm".into());
        rec.region_name = Some("US East".into());
        rec.pricing_quantity = None;
        let result = FocusValidator::new().validate_record_at(&rec, now());
        assert_eq!(
            fields(&result.errors),
            vec!["pricing_unit", "resource_name", "region_name"]
        );
    }

    #[test]
    fn test_out_of_enum_values_and_blank_mandatory_fields() {
        let mut rec = record();
        rec.service_category = "Quantum".into();
        rec.charge_frequency = Some("Sometimes".into());
        rec.charge_description = "  ".into();
        let result = FocusValidator::new().validate_record_at(&rec, now());
        assert_eq!(
            fields(&result.errors),
            vec!["charge_description", "service_category", "charge_frequency"]
        );
    }

    #[test]
    fn test_warnings_and_info() {
        let mut rec = record();
        rec.currency = "US$".into();
        rec.effective_cost = dec!(13);
        rec.consumed_quantity = Some(dec!(30));
        rec.charge_period_end = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let result = FocusValidator::new().validate_record_at(&rec, now());
        assert!(result.is_valid());
        assert_eq!(
            fields(&result.warnings),
            vec!["charge_period", "charge_period", "currency", "effective_cost"]
        );
        assert_eq!(fields(&result.info), vec!["consumed_quantity"]);
    }

    #[test]
    fn test_batch_summary() {
        let mut bad = record();
        bad.list_cost = dec!(-5);
        let records = vec![record(), bad, record(), record()];
        let summary = FocusValidator::new().validate_batch(&records);
        assert_eq!(summary.total_records, 4);
        assert_eq!(summary.valid_records, 3);
        assert_eq!(summary.invalid_records, 1);
        assert!((summary.compliance_rate - 75.0).abs() < f64::EPSILON);
        assert_eq!(summary.validation_details.len(), 1);
        assert_eq!(summary.validation_details[0].record_index, 1);
    }

    #[test]
    fn test_empty_batch() {
        let summary = FocusValidator::new().validate_batch(&[]);
        assert_eq!(summary.total_records, 0);
        assert_eq!(summary.compliance_rate, 0.0);
    }
}
