//! Provider record mappers
//!
//! Every provider implements [`FocusMapper`]: a validity check that detects the
//! export dialect, five mandatory blocks that may reject a record, and optional
//! blocks that never fail. [`FocusMapper::map_to_focus`] drives them in a fixed
//! order and always returns a [`MapOutcome`].

pub mod aws;
pub mod azure;
pub mod category;
pub mod gcp;
pub mod lookup;
pub mod openai;
pub mod parse;

pub use aws::AwsMapper;
pub use azure::AzureMapper;
pub use gcp::GcpMapper;
pub use lookup::{Dialect, FieldLookup};
pub use openai::OpenAiMapper;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Deref;
use tracing::warn;
use uuid::Uuid;

use crate::config::{ProviderConfig, ProviderKind};
use crate::focus::spec::{
    ChargeCategory, ChargeClass, ChargeFrequency, CommitmentDiscountStatus, ServiceCategory,
};
use crate::focus::FocusRecord;
use crate::pricing::CostCalculator;
use crate::RawRecord;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const UNKNOWN_ACCOUNT_ID: &str = "unknown";
pub const UNKNOWN_ACCOUNT_NAME: &str = "Unknown Account";
pub const DEFAULT_ACCOUNT_TYPE: &str = "BillingAccount";

/// A raw record that could not be turned into a canonical record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct MappingError {
    pub message: String,
}

impl MappingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of mapping one raw record
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    /// One or more canonical records
    Records(Vec<FocusRecord>),
    /// Intentionally ignored input, with the reason
    Skip(String),
    /// Unrecognizable or malformed input
    Invalid(MappingError),
}

/// Verdict of a mapper's validity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid(Dialect),
    Skip(String),
    Invalid(String),
}

/// Labelled slice of a raw record produced by splitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub label: &'static str,
    pub quantity: i64,
}

/// One raw record, or one partition of it, as seen by the block extractors
#[derive(Debug, Clone, Copy)]
pub struct Share<'a> {
    pub record: &'a RawRecord,
    pub dialect: Dialect,
    pub partition: Option<Partition>,
}

impl<'a> Share<'a> {
    pub fn whole(record: &'a RawRecord, dialect: Dialect) -> Self {
        Self {
            record,
            dialect,
            partition: None,
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.dialect == Dialect::Canonical
    }
}

impl Deref for Share<'_> {
    type Target = RawRecord;

    fn deref(&self) -> &RawRecord {
        self.record
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostInfo {
    pub billed_cost: Decimal,
    pub effective_cost: Decimal,
    pub list_cost: Decimal,
    pub contracted_cost: Decimal,
    pub currency: String,
}

impl CostInfo {
    /// Same amount in all four cost fields
    pub fn flat(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            billed_cost: amount,
            effective_cost: amount,
            list_cost: amount,
            contracted_cost: amount,
            currency: currency.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountInfo {
    pub billing_account_id: String,
    pub billing_account_name: String,
    pub billing_account_type: String,
    pub sub_account_id: Option<String>,
    pub sub_account_name: Option<String>,
    pub sub_account_type: Option<String>,
}

/// Periods as found in the record; gaps are filled by the builder
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeInfo {
    pub charge_period_start: Option<DateTime<Utc>>,
    pub charge_period_end: Option<DateTime<Utc>>,
    pub billing_period_start: Option<DateTime<Utc>>,
    pub billing_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub service_name: String,
    pub service_category: String,
    pub service_subcategory: Option<String>,
    pub provider_name: String,
    pub publisher_name: String,
    pub invoice_issuer_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeInfo {
    pub charge_category: String,
    pub charge_class: Option<String>,
    pub charge_description: String,
    pub charge_frequency: Option<String>,
    pub pricing_quantity: Option<Decimal>,
    pub pricing_unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceInfo {
    pub resource_id: Option<String>,
    pub resource_name: Option<String>,
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocationInfo {
    pub region_id: Option<String>,
    pub region_name: Option<String>,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkuInfo {
    pub sku_id: Option<String>,
    pub sku_price_id: Option<String>,
    pub sku_meter: Option<String>,
    pub sku_price_details: Option<String>,
    pub list_unit_price: Option<Decimal>,
    pub contracted_unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommitmentInfo {
    pub commitment_discount_id: Option<String>,
    pub commitment_discount_type: Option<String>,
    pub commitment_discount_category: Option<String>,
    pub commitment_discount_name: Option<String>,
    pub commitment_discount_status: Option<String>,
    pub commitment_discount_quantity: Option<Decimal>,
    pub commitment_discount_unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UsageInfo {
    pub consumed_quantity: Option<Decimal>,
    pub consumed_unit: Option<String>,
}

/// Provider-specific conversion of raw records into canonical records.
///
/// Implementations hold only immutable configuration, so a single mapper can
/// be shared across threads and mapping the same record twice yields the same
/// fields apart from `id`.
pub trait FocusMapper: Send + Sync {
    fn provider_kind(&self) -> ProviderKind;

    /// Provider instance id stamped on every record as `x_provider_id`
    fn provider_id(&self) -> Option<&str>;

    /// Decide whether the record is usable and which dialect it uses.
    ///
    /// Empty records never reach this method.
    fn check_validity(&self, record: &RawRecord) -> Validity;

    /// Expand a record into independently priced shares
    fn split_record<'a>(&self, record: &'a RawRecord, dialect: Dialect) -> Vec<Share<'a>> {
        vec![Share::whole(record, dialect)]
    }

    fn costs(&self, share: &Share<'_>) -> Result<CostInfo, MappingError>;
    fn account(&self, share: &Share<'_>) -> Result<AccountInfo, MappingError>;
    fn time(&self, share: &Share<'_>) -> Result<TimeInfo, MappingError>;
    fn service(&self, share: &Share<'_>) -> Result<ServiceInfo, MappingError>;
    fn charge(&self, share: &Share<'_>) -> Result<ChargeInfo, MappingError>;

    fn resource(&self, _share: &Share<'_>) -> Option<ResourceInfo> {
        None
    }

    fn location(&self, _share: &Share<'_>) -> Option<LocationInfo> {
        None
    }

    fn sku(&self, _share: &Share<'_>) -> Option<SkuInfo> {
        None
    }

    fn commitment(&self, _share: &Share<'_>) -> Option<CommitmentInfo> {
        None
    }

    fn usage(&self, _share: &Share<'_>) -> Option<UsageInfo> {
        None
    }

    fn tags(&self, _share: &Share<'_>) -> Option<BTreeMap<String, String>> {
        None
    }

    fn provider_extensions(&self, _share: &Share<'_>) -> Option<Map<String, Value>> {
        None
    }

    /// Charge period used when the record carries neither end
    fn default_charge_period(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now, now)
    }

    fn map_to_focus(&self, record: &RawRecord) -> MapOutcome {
        self.map_to_focus_at(record, Utc::now())
    }

    /// Map with a pinned processing instant, used when the charge period is absent
    fn map_to_focus_at(&self, record: &RawRecord, now: DateTime<Utc>) -> MapOutcome {
        if record.is_empty() {
            return MapOutcome::Skip("empty record".to_string());
        }

        let dialect = match self.check_validity(record) {
            Validity::Valid(dialect) => dialect,
            Validity::Skip(reason) => return MapOutcome::Skip(reason),
            Validity::Invalid(message) => return MapOutcome::Invalid(MappingError::new(message)),
        };

        let shares = self.split_record(record, dialect);
        let mut records = Vec::with_capacity(shares.len());
        for share in &shares {
            match build_record(self, share, now) {
                Ok(focus) => records.push(focus),
                Err(err) => return MapOutcome::Invalid(err),
            }
        }
        MapOutcome::Records(records)
    }
}

fn build_record<M: FocusMapper + ?Sized>(
    mapper: &M,
    share: &Share<'_>,
    now: DateTime<Utc>,
) -> Result<FocusRecord, MappingError> {
    let costs = mapper.costs(share)?;
    let account = mapper.account(share)?;
    let time = mapper.time(share)?;
    let service = mapper.service(share)?;
    let charge = mapper.charge(share)?;

    let resource = mapper.resource(share).unwrap_or_default();
    let location = mapper.location(share).unwrap_or_default();
    let sku = mapper.sku(share).unwrap_or_default();
    let commitment = mapper.commitment(share).unwrap_or_default();
    let usage = mapper.usage(share).unwrap_or_default();
    let tags = mapper.tags(share).unwrap_or_default();
    let provider_extensions = mapper.provider_extensions(share).unwrap_or_default();

    let (charge_period_start, charge_period_end) =
        match (time.charge_period_start, time.charge_period_end) {
            (Some(start), Some(end)) => (start, end),
            (Some(start), None) => (start, start),
            (None, Some(end)) => (end, end),
            (None, None) => mapper.default_charge_period(now),
        };
    let (month_start, month_end) = calendar_month(charge_period_start);

    let currency = if costs.currency.trim().is_empty() {
        DEFAULT_CURRENCY.to_string()
    } else {
        costs.currency
    };

    let mut record = FocusRecord {
        id: Uuid::new_v4().to_string(),
        x_provider_id: mapper.provider_id().map(str::to_string),
        billed_cost: costs.billed_cost,
        effective_cost: costs.effective_cost,
        list_cost: costs.list_cost,
        contracted_cost: costs.contracted_cost,
        currency,
        billing_account_id: account.billing_account_id,
        billing_account_name: account.billing_account_name,
        billing_account_type: account.billing_account_type,
        sub_account_id: account.sub_account_id,
        sub_account_name: account.sub_account_name,
        sub_account_type: account.sub_account_type,
        charge_period_start,
        charge_period_end,
        billing_period_start: time.billing_period_start.unwrap_or(month_start),
        billing_period_end: time.billing_period_end.unwrap_or(month_end),
        service_name: service.service_name,
        service_category: service.service_category,
        service_subcategory: service.service_subcategory,
        provider_name: service.provider_name,
        publisher_name: service.publisher_name,
        invoice_issuer_name: service.invoice_issuer_name,
        charge_category: charge.charge_category,
        charge_class: charge.charge_class,
        charge_description: charge.charge_description,
        charge_frequency: charge.charge_frequency,
        pricing_quantity: charge.pricing_quantity,
        pricing_unit: charge.pricing_unit,
        resource_id: resource.resource_id,
        resource_name: resource.resource_name,
        resource_type: resource.resource_type,
        region_id: location.region_id,
        region_name: location.region_name,
        availability_zone: location.availability_zone,
        sku_id: sku.sku_id,
        sku_price_id: sku.sku_price_id,
        sku_meter: sku.sku_meter,
        sku_price_details: sku.sku_price_details,
        list_unit_price: sku.list_unit_price,
        contracted_unit_price: sku.contracted_unit_price,
        commitment_discount_id: commitment.commitment_discount_id,
        commitment_discount_type: commitment.commitment_discount_type,
        commitment_discount_category: commitment.commitment_discount_category,
        commitment_discount_name: commitment.commitment_discount_name,
        commitment_discount_status: commitment.commitment_discount_status,
        commitment_discount_quantity: commitment.commitment_discount_quantity,
        commitment_discount_unit: commitment.commitment_discount_unit,
        consumed_quantity: usage.consumed_quantity,
        consumed_unit: usage.consumed_unit,
        tags,
        provider_extensions,
    };
    normalize_enums(&mut record);
    Ok(record)
}

/// First instant of the month containing `at` and of the following month
pub fn calendar_month(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (next_year, next_month) = if at.month() == 12 {
        (at.year() + 1, 1)
    } else {
        (at.year(), at.month() + 1)
    };
    let first = |year: i32, month: u32| {
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(at)
    };
    (first(at.year(), at.month()), first(next_year, next_month))
}

/// Replace out-of-enum values: mandatory enums get a fallback, optional ones are dropped
fn normalize_enums(record: &mut FocusRecord) {
    if !ServiceCategory::is_valid(&record.service_category) {
        warn!(value = %record.service_category, "Invalid service_category, defaulting to Other");
        record.service_category = ServiceCategory::Other.to_string();
    }
    if !ChargeCategory::is_valid(&record.charge_category) {
        warn!(value = %record.charge_category, "Invalid charge_category, defaulting to Usage");
        record.charge_category = ChargeCategory::Usage.to_string();
    }
    drop_invalid(&mut record.charge_class, "charge_class", ChargeClass::is_valid);
    drop_invalid(
        &mut record.commitment_discount_status,
        "commitment_discount_status",
        CommitmentDiscountStatus::is_valid,
    );
    drop_invalid(&mut record.charge_frequency, "charge_frequency", ChargeFrequency::is_valid);
}

fn drop_invalid(field: &mut Option<String>, name: &str, is_valid: fn(&str) -> bool) {
    if let Some(value) = field.as_deref() {
        if !is_valid(value) {
            warn!(field = name, value, "Invalid enum value, removing");
            *field = None;
        }
    }
}

/// Mapper chosen by provider kind, built once from a resolved [`ProviderConfig`]
#[derive(Debug, Clone)]
pub enum ProviderMapper {
    Aws(AwsMapper),
    Azure(AzureMapper),
    Gcp(GcpMapper),
    OpenAi(OpenAiMapper),
}

impl ProviderMapper {
    pub fn from_config(config: &ProviderConfig) -> Self {
        let provider_id = config.provider_id.clone();
        match config.provider_type {
            ProviderKind::Aws => ProviderMapper::Aws(AwsMapper::new(provider_id)),
            ProviderKind::Azure => ProviderMapper::Azure(AzureMapper::new(provider_id)),
            ProviderKind::Gcp => ProviderMapper::Gcp(GcpMapper::new(provider_id)),
            ProviderKind::OpenAi => ProviderMapper::OpenAi(OpenAiMapper::new(
                provider_id,
                config.organization_id.clone(),
                CostCalculator::default().with_flex(config.flex_processing),
            )),
        }
    }

    pub fn as_mapper(&self) -> &dyn FocusMapper {
        match self {
            ProviderMapper::Aws(m) => m,
            ProviderMapper::Azure(m) => m,
            ProviderMapper::Gcp(m) => m,
            ProviderMapper::OpenAi(m) => m,
        }
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.as_mapper().provider_kind()
    }

    pub fn map_to_focus(&self, record: &RawRecord) -> MapOutcome {
        self.as_mapper().map_to_focus(record)
    }

    pub fn map_to_focus_at(&self, record: &RawRecord, now: DateTime<Utc>) -> MapOutcome {
        self.as_mapper().map_to_focus_at(record, now)
    }
}

/// Parse an optional instant; a present but unparsable value rejects the record
pub(crate) fn instant_field(
    share: &Share<'_>,
    lookup: &FieldLookup,
    name: &str,
) -> Result<Option<DateTime<Utc>>, MappingError> {
    match lookup.value(share) {
        None => Ok(None),
        Some(value) => parse::instant(value)
            .map(Some)
            .ok_or_else(|| MappingError::new(format!("unparsable {name}: {value}"))),
    }
}

/// String map from a JSON object or a JSON-encoded object string
pub(crate) fn string_map(value: &Value) -> BTreeMap<String, String> {
    let parsed;
    let object = match value {
        Value::Object(map) => map,
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => {
                parsed = map;
                &parsed
            }
            _ => return BTreeMap::new(),
        },
        _ => return BTreeMap::new(),
    };
    object
        .iter()
        .filter_map(|(k, v)| {
            let rendered = match v {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((k.clone(), rendered))
        })
        .collect()
}

pub(crate) fn non_empty<T>(map: BTreeMap<String, T>) -> Option<BTreeMap<String, T>> {
    (!map.is_empty()).then_some(map)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_calendar_month() {
        let at = Utc.with_ymd_and_hms(2024, 12, 15, 8, 0, 0).unwrap();
        let (start, end) = calendar_month(at);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_string_map_accepts_json_strings() {
        let tags = string_map(&json!("{\"env\": \"prod\", \"tier\": 2, \"none\": null}"));
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["env"], "prod");
        assert_eq!(tags["tier"], "2");
        assert!(string_map(&json!("not json")).is_empty());
    }

    #[test]
    fn test_drop_invalid() {
        let mut class = Some("Database".to_string());
        drop_invalid(&mut class, "charge_class", ChargeClass::is_valid);
        assert_eq!(class, None);

        let mut class = Some("Correction".to_string());
        drop_invalid(&mut class, "charge_class", ChargeClass::is_valid);
        assert_eq!(class.as_deref(), Some("Correction"));
    }

    #[test]
    fn test_empty_record_is_skipped_for_every_provider() {
        for kind in [ProviderKind::Aws, ProviderKind::Azure, ProviderKind::Gcp, ProviderKind::OpenAi] {
            let mapper = ProviderMapper::from_config(&ProviderConfig::new(kind));
            assert!(matches!(mapper.map_to_focus(&RawRecord::new()), MapOutcome::Skip(_)));
        }
    }
}
