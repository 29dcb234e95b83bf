//! OpenAI mapper for organization usage buckets
//!
//! Usage records carry quantities but no cost, so every share is priced with
//! the [`CostCalculator`]. Records with both input and output tokens are split
//! in two so each token class gets its own line.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::lookup::{Dialect, FieldLookup};
use super::parse;
use super::{
    AccountInfo, ChargeInfo, CostInfo, FocusMapper, MappingError, Partition, ResourceInfo,
    ServiceInfo, Share, TimeInfo, UsageInfo, Validity, DEFAULT_ACCOUNT_TYPE, DEFAULT_CURRENCY,
};
use crate::config::ProviderKind;
use crate::focus::spec::{ChargeCategory, ChargeFrequency, ServiceCategory};
use crate::pricing::{CostCalculator, UsageShape};
use crate::RawRecord;

const PROVIDER_NAME: &str = "OpenAI";
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
const OPTIONAL_TAG_FIELDS: &[&str] = &["project_id", "user_id", "batch"];
const USAGE_COUNT_FIELDS: &[&str] = &[
    "input_tokens",
    "output_tokens",
    "num_images",
    "num_seconds",
    "num_containers",
    "storage_gb_days",
    "num_calls",
    "num_model_requests",
];

/// Service names keyed by model prefix, checked in order
const SERVICE_PREFIXES: &[(&str, &str)] = &[
    ("gpt", "Chat Completions"),
    ("text-embedding", "Text Embeddings"),
    ("dall-e", "Image Generation"),
    ("tts", "Text to Speech"),
    ("whisper", "Speech to Text"),
    ("moderation", "Content Moderation"),
    ("fine-tune", "Fine Tuning"),
    ("assistant", "Assistants API"),
];

/// What a usage record meters, decided by which count fields it carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UsageKind {
    Tokens,
    Images,
    Audio,
    Containers,
    Storage,
    Calls,
    Requests,
}

impl UsageKind {
    fn of(record: &RawRecord) -> Self {
        if record.contains_key("input_tokens") || record.contains_key("output_tokens") {
            UsageKind::Tokens
        } else if record.contains_key("num_images") {
            UsageKind::Images
        } else if record.contains_key("num_seconds") {
            UsageKind::Audio
        } else if record.contains_key("num_containers") {
            UsageKind::Containers
        } else if record.contains_key("storage_gb_days") {
            UsageKind::Storage
        } else if record.contains_key("num_calls") {
            UsageKind::Calls
        } else {
            UsageKind::Requests
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            UsageKind::Tokens => "tokens",
            UsageKind::Images => "images",
            UsageKind::Audio => "audio",
            UsageKind::Containers => "containers",
            UsageKind::Storage => "storage",
            UsageKind::Calls => "calls",
            UsageKind::Requests => "requests",
        }
    }
}

fn count(record: &RawRecord, key: &str) -> i64 {
    parse::count(record.get(key))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        other => parse::is_present(other),
    }
}

/// 1234567 => "1,234,567"
fn group_thousands(n: i128) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if n < 0 {
        grouped.insert(0, '-');
    }
    grouped
}

fn service_name(model: &str) -> &'static str {
    let lower = model.to_lowercase();
    if let Some((_, service)) = SERVICE_PREFIXES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
    {
        return *service;
    }
    if lower.contains("gpt") {
        "Chat Completions"
    } else if lower.contains("embedding") {
        "Text Embeddings"
    } else if lower.contains("dall-e") || lower.contains("dalle") {
        "Image Generation"
    } else {
        "OpenAI API"
    }
}

fn service_subcategory(model: &str) -> Option<&'static str> {
    let lower = model.to_lowercase();
    let label = if lower.contains("gpt-4") {
        if lower.contains("mini") {
            "Efficient Models"
        } else {
            "Advanced Models"
        }
    } else if lower.contains("gpt-3.5") {
        "Standard Models"
    } else if lower.contains("text-embedding") {
        if lower.contains("large") {
            "Large Embeddings"
        } else {
            "Standard Embeddings"
        }
    } else if lower.contains("dall-e-3") {
        "DALL-E 3"
    } else if lower.contains("dall-e-2") {
        "DALL-E 2"
    } else if lower.contains("tts") {
        "Text-to-Speech"
    } else if lower.contains("whisper") {
        "Speech-to-Text"
    } else if lower.contains("moderation") {
        "Content Moderation"
    } else if lower.contains("o1") {
        "Reasoning Models"
    } else {
        return None;
    };
    Some(label)
}

#[derive(Debug, Clone)]
pub struct OpenAiMapper {
    provider_id: Option<String>,
    organization_id: Option<String>,
    calculator: CostCalculator,
}

impl Default for OpenAiMapper {
    fn default() -> Self {
        Self::new(None, None, CostCalculator::default())
    }
}

impl OpenAiMapper {
    pub fn new(
        provider_id: Option<String>,
        organization_id: Option<String>,
        calculator: CostCalculator,
    ) -> Self {
        Self {
            provider_id,
            organization_id: organization_id.filter(|id| !id.trim().is_empty()),
            calculator,
        }
    }

    fn model(&self, share: &Share<'_>) -> Result<String, MappingError> {
        FieldLookup::canonical("model")
            .text(share)
            .ok_or_else(|| MappingError::new("usage record has no model"))
    }

    fn usage_shape(&self, share: &Share<'_>) -> UsageShape {
        match share.partition {
            Some(Partition { label: "input", quantity }) => UsageShape::Tokens {
                input: quantity,
                output: 0,
            },
            Some(Partition { quantity, .. }) => UsageShape::Tokens {
                input: 0,
                output: quantity,
            },
            None => match UsageKind::of(share) {
                UsageKind::Tokens => UsageShape::Tokens {
                    input: count(share, "input_tokens"),
                    output: count(share, "output_tokens"),
                },
                UsageKind::Images => UsageShape::Images {
                    count: count(share, "num_images"),
                },
                UsageKind::Audio => UsageShape::Audio {
                    seconds: parse::decimal(share.get("num_seconds")),
                },
                UsageKind::Containers => UsageShape::Containers {
                    count: count(share, "num_containers"),
                },
                UsageKind::Storage => UsageShape::StorageGbDays {
                    gb_days: parse::decimal(share.get("storage_gb_days")),
                },
                UsageKind::Calls => UsageShape::Calls {
                    count: count(share, "num_calls"),
                },
                UsageKind::Requests => UsageShape::Requests {
                    count: count(share, "num_model_requests"),
                },
            },
        }
    }

    fn total_cost(&self, share: &Share<'_>) -> Result<Decimal, MappingError> {
        let model = self.model(share)?;
        Ok(self.calculator.calculate(&model, &self.usage_shape(share)).total)
    }

    /// Quantity and unit the share is priced in
    fn pricing(&self, share: &Share<'_>) -> (Decimal, &'static str) {
        match self.usage_shape(share) {
            shape @ UsageShape::Tokens { .. } => (shape.quantity(), "tokens"),
            UsageShape::Images { count } => (Decimal::from(count), "images"),
            UsageShape::Audio { seconds } => (seconds, "seconds"),
            UsageShape::Characters { count } => (Decimal::from(count), "characters"),
            UsageShape::Containers { count } => (Decimal::from(count), "containers"),
            UsageShape::StorageGbDays { gb_days } => (gb_days, "GB-days"),
            UsageShape::Calls { count } => (Decimal::from(count), "calls"),
            UsageShape::Requests { count } => (Decimal::from(count), "requests"),
        }
    }

    fn describe(&self, share: &Share<'_>, model: &str, cost: Decimal) -> String {
        let prefix = format!("OpenAI {} ({model})", service_name(model));
        if let Some(partition) = share.partition {
            return format!(
                "{prefix}: {} {} tokens - ${cost:.6}",
                group_thousands(i128::from(partition.quantity)),
                partition.label
            );
        }
        match self.usage_shape(share) {
            UsageShape::Tokens { input, output } => {
                format!("{prefix}: {} tokens - ${cost:.6}", group_thousands(i128::from(input) + i128::from(output)))
            }
            UsageShape::Images { count } => format!("{prefix}: {count} images - ${cost:.2}"),
            UsageShape::Audio { seconds } => {
                let minutes = seconds / Decimal::from(60);
                format!("{prefix}: {minutes:.2} minutes - ${cost:.4}")
            }
            UsageShape::Characters { count } => {
                format!("{prefix}: {} characters - ${cost:.6}", group_thousands(i128::from(count)))
            }
            UsageShape::Containers { count } => format!("{prefix}: {count} containers - ${cost:.4}"),
            UsageShape::StorageGbDays { gb_days } => {
                format!("{prefix}: {gb_days} GB-days - ${cost:.4}")
            }
            UsageShape::Calls { count } => {
                format!("{prefix}: {} calls - ${cost:.4}", group_thousands(i128::from(count)))
            }
            UsageShape::Requests { count } => format!("{prefix}: {count} requests - ${cost:.6}"),
        }
    }
}

impl FocusMapper for OpenAiMapper {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    fn check_validity(&self, record: &RawRecord) -> Validity {
        if record.get("object").and_then(Value::as_str) == Some("bucket") {
            return Validity::Skip("bucket container, results are mapped individually".into());
        }
        for required in ["model", "api_key_id"] {
            if !FieldLookup::canonical(required).is_present(record) {
                return Validity::Invalid(format!("usage record is missing {required}"));
            }
        }
        if USAGE_COUNT_FIELDS
            .iter()
            .all(|key| parse::decimal(record.get(*key)) <= Decimal::ZERO)
        {
            return Validity::Skip("usage record has no metered quantity".into());
        }
        Validity::Valid(Dialect::Canonical)
    }

    fn split_record<'a>(&self, record: &'a RawRecord, dialect: Dialect) -> Vec<Share<'a>> {
        let input = count(record, "input_tokens");
        let output = count(record, "output_tokens");
        if input > 0 && output > 0 {
            return [("input", input), ("output", output)]
                .into_iter()
                .map(|(label, quantity)| Share {
                    record,
                    dialect,
                    partition: Some(Partition { label, quantity }),
                })
                .collect();
        }
        vec![Share::whole(record, dialect)]
    }

    fn costs(&self, share: &Share<'_>) -> Result<CostInfo, MappingError> {
        Ok(CostInfo::flat(self.total_cost(share)?, DEFAULT_CURRENCY))
    }

    fn account(&self, share: &Share<'_>) -> Result<AccountInfo, MappingError> {
        let api_key_id = FieldLookup::canonical("api_key_id")
            .text(share)
            .ok_or_else(|| MappingError::new("usage record has no api_key_id"))?;
        let key_tail = api_key_id
            .char_indices()
            .rev()
            .nth(7)
            .map_or(api_key_id.as_str(), |(i, _)| &api_key_id[i..]);
        let (billing_account_id, billing_account_name) = match &self.organization_id {
            Some(org) => (format!("openai_org_{org}"), format!("OpenAI Organization {org}")),
            None => (
                "openai_org_unknown".to_string(),
                "OpenAI Organization".to_string(),
            ),
        };
        Ok(AccountInfo {
            billing_account_id,
            billing_account_name,
            billing_account_type: DEFAULT_ACCOUNT_TYPE.to_string(),
            sub_account_name: Some(format!("API Key: ...{key_tail}")),
            sub_account_type: Some("APIKey".to_string()),
            sub_account_id: Some(api_key_id),
        })
    }

    fn time(&self, share: &Share<'_>) -> Result<TimeInfo, MappingError> {
        let start = FieldLookup::canonical("bucket_start_time")
            .or_canonical("start_time")
            .instant(share);
        let end = FieldLookup::canonical("bucket_end_time")
            .or_canonical("end_time")
            .instant(share);
        // Half a bucket is not trusted; the day default applies instead
        Ok(match (start, end) {
            (Some(start), Some(end)) => TimeInfo {
                charge_period_start: Some(start),
                charge_period_end: Some(end),
                ..TimeInfo::default()
            },
            _ => TimeInfo::default(),
        })
    }

    fn default_charge_period(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let day = now.date_naive();
        let start = day.and_hms_opt(0, 0, 0).map_or(now, |t| t.and_utc());
        let end = day
            .and_hms_micro_opt(23, 59, 59, 999_999)
            .map_or(now, |t| t.and_utc());
        (start, end)
    }

    fn service(&self, share: &Share<'_>) -> Result<ServiceInfo, MappingError> {
        let model = self.model(share)?;
        Ok(ServiceInfo {
            service_name: service_name(&model).to_string(),
            service_category: ServiceCategory::AiAndMachineLearning.to_string(),
            service_subcategory: service_subcategory(&model).map(str::to_string),
            provider_name: PROVIDER_NAME.to_string(),
            publisher_name: PROVIDER_NAME.to_string(),
            invoice_issuer_name: PROVIDER_NAME.to_string(),
        })
    }

    fn charge(&self, share: &Share<'_>) -> Result<ChargeInfo, MappingError> {
        let model = self.model(share)?;
        let cost = self.total_cost(share)?;
        let (quantity, unit) = self.pricing(share);
        Ok(ChargeInfo {
            charge_category: ChargeCategory::Usage.to_string(),
            charge_class: None,
            charge_description: self.describe(share, &model, cost),
            charge_frequency: Some(ChargeFrequency::UsageBased.to_string()),
            pricing_quantity: Some(quantity),
            pricing_unit: Some(unit.to_string()),
        })
    }

    fn resource(&self, share: &Share<'_>) -> Option<ResourceInfo> {
        let model = self.model(share).ok()?;
        Some(ResourceInfo {
            resource_name: Some(format!("OpenAI Model: {model}")),
            resource_type: Some("AI Model".to_string()),
            resource_id: Some(model),
        })
    }

    fn usage(&self, share: &Share<'_>) -> Option<UsageInfo> {
        let (quantity, unit) = self.pricing(share);
        Some(UsageInfo {
            consumed_quantity: Some(quantity),
            consumed_unit: Some(unit.to_string()),
        })
    }

    fn tags(&self, share: &Share<'_>) -> Option<BTreeMap<String, String>> {
        let text = |key: &str| FieldLookup::canonical(key).text(share).unwrap_or_default();
        let mut tags = BTreeMap::from([
            ("openai_model".to_string(), text("model")),
            ("openai_api_key_id".to_string(), text("api_key_id")),
            (
                "openai_usage_type".to_string(),
                UsageKind::of(share).as_str().to_string(),
            ),
            ("openai_object_type".to_string(), text("object")),
        ]);
        if let Some(org) = &self.organization_id {
            tags.insert("openai_organization_id".to_string(), org.clone());
        }
        if let Some(partition) = share.partition {
            tags.insert("openai_token_type".to_string(), partition.label.to_string());
        }
        if share.contains_key("input_tokens") {
            tags.insert(
                "openai_input_tokens".to_string(),
                count(share, "input_tokens").to_string(),
            );
            tags.insert(
                "openai_output_tokens".to_string(),
                count(share, "output_tokens").to_string(),
            );
        }
        for field in OPTIONAL_TAG_FIELDS {
            if let Some(value) = share.get(*field).filter(|v| truthy(v)) {
                let rendered = parse::text(value).unwrap_or_else(|| value.to_string());
                tags.insert(format!("openai_{field}"), rendered);
            }
        }
        Some(tags)
    }

    fn provider_extensions(&self, share: &Share<'_>) -> Option<Map<String, Value>> {
        let raw = |key: &str, default: Value| share.get(key).cloned().unwrap_or(default);
        let mut extensions = Map::new();
        extensions.insert("api_key_id".into(), raw("api_key_id", Value::Null));
        extensions.insert("model".into(), raw("model", Value::Null));
        extensions.insert(
            "usage_type".into(),
            Value::from(UsageKind::of(share).as_str()),
        );
        extensions.insert(
            "num_requests".into(),
            Value::from(count(share, "num_model_requests")),
        );
        extensions.insert("object_type".into(), raw("object", Value::from("")));

        match share.partition {
            Some(partition) => {
                extensions.insert("token_type".into(), Value::from(partition.label));
                extensions.insert(
                    format!("{}_tokens", partition.label),
                    Value::from(partition.quantity),
                );
            }
            None => {
                if share.contains_key("input_tokens") {
                    extensions.insert("input_tokens".into(), raw("input_tokens", Value::from(0)));
                    extensions.insert("output_tokens".into(), raw("output_tokens", Value::from(0)));
                }
                if share.contains_key("num_images") {
                    extensions.insert("num_images".into(), raw("num_images", Value::from(0)));
                    extensions.insert(
                        "image_size".into(),
                        raw("image_size", Value::from(DEFAULT_IMAGE_SIZE)),
                    );
                }
                if share.contains_key("num_seconds") {
                    extensions.insert("duration_seconds".into(), raw("num_seconds", Value::from(0)));
                }
                for key in ["num_containers", "storage_gb_days", "num_calls"] {
                    if let Some(value) = share.get(key) {
                        extensions.insert(key.into(), value.clone());
                    }
                }
            }
        }

        for field in OPTIONAL_TAG_FIELDS {
            if let Some(value) = share.get(*field).filter(|v| truthy(v)) {
                extensions.insert(field.to_string(), value.clone());
            }
        }
        Some(extensions)
    }
}
