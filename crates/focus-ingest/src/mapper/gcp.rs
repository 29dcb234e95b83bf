//! GCP mapper for FOCUS BigQuery views and the standard billing export

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::category::{GCP_CATEGORIES, GCP_SUBCATEGORIES};
use super::lookup::{Dialect, FieldLookup};
use super::{
    instant_field, non_empty, string_map, AccountInfo, ChargeInfo, CostInfo, FocusMapper,
    LocationInfo, MappingError, ResourceInfo, ServiceInfo, Share, SkuInfo, TimeInfo, UsageInfo,
    Validity, DEFAULT_ACCOUNT_TYPE, DEFAULT_CURRENCY, UNKNOWN_ACCOUNT_ID, UNKNOWN_ACCOUNT_NAME,
};
use crate::config::ProviderKind;
use crate::focus::spec::ChargeFrequency;
use crate::RawRecord;

const PROVIDER_NAME: &str = "Google Cloud Platform";
const PUBLISHER_NAME: &str = "Google";
const INVOICE_ISSUER_NAME: &str = "Google Cloud";
const DEFAULT_SERVICE_NAME: &str = "Google Cloud Service";

const CANONICAL_INDICATORS: &[&str] = &[
    "BilledCost",
    "EffectiveCost",
    "ChargePeriodStart",
    "BillingAccountId",
    "ServiceCategory",
];
const LEGACY_INDICATORS: &[&str] = &["cost", "service", "project", "usage_start_time"];

/// Standard export columns preserved verbatim in extensions
const EXTENSION_COLUMNS: &[&str] = &[
    "export_time",
    "cost_type",
    "adjustment_info",
    "system_labels",
    "credits",
    "invoice",
    "cost_at_list",
];

fn col(key: &str) -> FieldLookup {
    FieldLookup::canonical(key)
}

fn legacy(key: &str) -> FieldLookup {
    FieldLookup::legacy(key)
}

/// `usage` => "Usage"
fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct GcpMapper {
    provider_id: Option<String>,
}

impl GcpMapper {
    pub fn new(provider_id: Option<String>) -> Self {
        Self { provider_id }
    }

    fn legacy_service_name(&self, share: &Share<'_>) -> String {
        legacy("service/description")
            .or_legacy("service/id")
            .or_legacy("service")
            .text_or(share, DEFAULT_SERVICE_NAME)
    }

    /// "service - sku" from the standard export descriptions
    fn legacy_description(&self, share: &Share<'_>) -> String {
        let parts: Vec<String> = [legacy("service/description"), legacy("sku/description")]
            .iter()
            .filter_map(|lookup| lookup.text(share))
            .collect();
        if parts.is_empty() {
            "Google Cloud service charge".to_string()
        } else {
            parts.join(" - ")
        }
    }
}

impl FocusMapper for GcpMapper {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Gcp
    }

    fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    fn check_validity(&self, record: &RawRecord) -> Validity {
        if CANONICAL_INDICATORS.iter().any(|k| record.contains_key(*k)) {
            Validity::Valid(Dialect::Canonical)
        } else if LEGACY_INDICATORS.iter().any(|k| record.contains_key(*k)) {
            Validity::Valid(Dialect::Legacy)
        } else {
            Validity::Invalid("record has neither FOCUS view nor billing export columns".into())
        }
    }

    fn costs(&self, share: &Share<'_>) -> Result<CostInfo, MappingError> {
        if share.is_canonical() {
            return Ok(CostInfo {
                billed_cost: col("BilledCost").decimal(share),
                effective_cost: col("EffectiveCost").decimal(share),
                list_cost: col("ListCost").decimal(share),
                contracted_cost: col("ContractedCost").decimal(share),
                currency: col("BillingCurrency").text_or(share, DEFAULT_CURRENCY),
            });
        }
        Ok(CostInfo::flat(
            legacy("cost").decimal(share),
            legacy("currency").text_or(share, DEFAULT_CURRENCY),
        ))
    }

    fn account(&self, share: &Share<'_>) -> Result<AccountInfo, MappingError> {
        if share.is_canonical() {
            let billing_id = col("BillingAccountId").text(share);
            let billing_name = col("BillingAccountName")
                .text(share)
                .or_else(|| billing_id.clone());
            let sub_account_id = col("SubAccountId").text(share);
            return Ok(AccountInfo {
                billing_account_id: billing_id.unwrap_or_else(|| UNKNOWN_ACCOUNT_ID.to_string()),
                billing_account_name: billing_name
                    .unwrap_or_else(|| UNKNOWN_ACCOUNT_NAME.to_string()),
                billing_account_type: DEFAULT_ACCOUNT_TYPE.to_string(),
                sub_account_name: col("SubAccountName").text(share),
                sub_account_type: sub_account_id.as_ref().map(|_| "Project".to_string()),
                sub_account_id,
            });
        }

        let billing_id = legacy("billing_account_id").text(share);
        let project_id = legacy("project/id").or_legacy("project").text(share);
        let project_name = legacy("project/name").text(share);
        Ok(AccountInfo {
            billing_account_id: billing_id
                .clone()
                .or_else(|| project_id.clone())
                .unwrap_or_else(|| UNKNOWN_ACCOUNT_ID.to_string()),
            billing_account_name: project_name
                .clone()
                .or(billing_id)
                .unwrap_or_else(|| UNKNOWN_ACCOUNT_NAME.to_string()),
            billing_account_type: DEFAULT_ACCOUNT_TYPE.to_string(),
            sub_account_type: project_id.as_ref().map(|_| "Project".to_string()),
            sub_account_id: project_id,
            sub_account_name: project_name,
        })
    }

    fn time(&self, share: &Share<'_>) -> Result<TimeInfo, MappingError> {
        if share.is_canonical() {
            let period = |key: &str| instant_field(share, &col(key), key);
            return Ok(TimeInfo {
                charge_period_start: period("ChargePeriodStart")?,
                charge_period_end: period("ChargePeriodEnd")?,
                billing_period_start: period("BillingPeriodStart")?,
                billing_period_end: period("BillingPeriodEnd")?,
            });
        }
        Ok(TimeInfo {
            charge_period_start: instant_field(share, &legacy("usage_start_time"), "usage_start_time")?,
            charge_period_end: instant_field(share, &legacy("usage_end_time"), "usage_end_time")?,
            ..TimeInfo::default()
        })
    }

    fn service(&self, share: &Share<'_>) -> Result<ServiceInfo, MappingError> {
        if share.is_canonical() {
            let service_name = col("ServiceName").text_or(share, DEFAULT_SERVICE_NAME);
            return Ok(ServiceInfo {
                service_category: col("ServiceCategory")
                    .text(share)
                    .unwrap_or_else(|| GCP_CATEGORIES.classify(&service_name).to_string()),
                service_subcategory: col("ServiceSubcategory").text(share),
                provider_name: col("ProviderName").text_or(share, PROVIDER_NAME),
                publisher_name: col("PublisherName").text_or(share, PUBLISHER_NAME),
                invoice_issuer_name: col("InvoiceIssuerName").text_or(share, INVOICE_ISSUER_NAME),
                service_name,
            });
        }

        let service_name = self.legacy_service_name(share);
        Ok(ServiceInfo {
            service_category: GCP_CATEGORIES.classify(&service_name).to_string(),
            service_subcategory: GCP_SUBCATEGORIES.classify(&service_name).map(str::to_string),
            provider_name: PROVIDER_NAME.to_string(),
            publisher_name: PUBLISHER_NAME.to_string(),
            invoice_issuer_name: INVOICE_ISSUER_NAME.to_string(),
            service_name,
        })
    }

    fn charge(&self, share: &Share<'_>) -> Result<ChargeInfo, MappingError> {
        if share.is_canonical() {
            return Ok(ChargeInfo {
                charge_category: col("ChargeCategory")
                    .text(share)
                    .map(|c| capitalize(&c))
                    .unwrap_or_else(|| "Usage".to_string()),
                charge_class: col("ChargeClass").text(share),
                charge_description: col("ChargeDescription").text_or(share, "Google Cloud Usage"),
                charge_frequency: col("ChargeFrequency").text(share),
                pricing_quantity: col("PricingQuantity").decimal_opt(share),
                pricing_unit: col("PricingUnit").text(share),
            });
        }
        Ok(ChargeInfo {
            charge_category: "Usage".to_string(),
            charge_class: None,
            charge_description: self.legacy_description(share),
            charge_frequency: Some(ChargeFrequency::UsageBased.to_string()),
            pricing_quantity: legacy("usage/amount").decimal_opt(share),
            pricing_unit: legacy("usage/unit").text(share),
        })
    }

    fn resource(&self, share: &Share<'_>) -> Option<ResourceInfo> {
        let (id, name, kind) = if share.is_canonical() {
            (col("ResourceId"), col("ResourceName"), col("ResourceType"))
        } else {
            (legacy("resource/id"), legacy("resource/name"), legacy("resource/type"))
        };
        let resource_id = id.text(share)?;
        Some(ResourceInfo {
            resource_name: name.text(share).or_else(|| Some(resource_id.clone())),
            resource_type: kind.text(share),
            resource_id: Some(resource_id),
        })
    }

    fn location(&self, share: &Share<'_>) -> Option<LocationInfo> {
        let location = if share.is_canonical() {
            LocationInfo {
                region_id: col("RegionId").text(share),
                region_name: col("RegionName").text(share),
                availability_zone: col("AvailabilityZone").text(share),
            }
        } else {
            // The export carries one region string used for both id and name
            let region = legacy("location/region").or_legacy("location").text(share);
            LocationInfo {
                region_name: region.clone(),
                region_id: region,
                availability_zone: legacy("location/zone").text(share),
            }
        };
        (location != LocationInfo::default()).then_some(location)
    }

    fn sku(&self, share: &Share<'_>) -> Option<SkuInfo> {
        if share.is_canonical() {
            let sku_id = col("SkuId").text(share)?;
            return Some(SkuInfo {
                sku_id: Some(sku_id),
                sku_price_id: col("SkuPriceId").text(share),
                sku_meter: col("SkuMeter").text(share),
                sku_price_details: col("SkuPriceDetails").text(share),
                list_unit_price: col("ListUnitPrice").decimal_opt(share),
                contracted_unit_price: col("ContractedUnitPrice").decimal_opt(share),
            });
        }
        let sku_id = legacy("sku/id").text(share)?;
        Some(SkuInfo {
            sku_id: Some(sku_id),
            sku_price_details: legacy("sku/description").text(share),
            ..SkuInfo::default()
        })
    }

    fn usage(&self, share: &Share<'_>) -> Option<UsageInfo> {
        let (quantity, unit) = if share.is_canonical() {
            (col("ConsumedQuantity"), col("ConsumedUnit"))
        } else {
            (legacy("usage/amount"), legacy("usage/unit"))
        };
        let consumed_quantity = quantity.decimal_opt(share)?;
        Some(UsageInfo {
            consumed_quantity: Some(consumed_quantity),
            consumed_unit: unit.text(share),
        })
    }

    fn tags(&self, share: &Share<'_>) -> Option<BTreeMap<String, String>> {
        if share.is_canonical() {
            return share.get("Tags").map(string_map).and_then(non_empty);
        }
        let tags = match share.get("labels") {
            Some(Value::Array(labels)) => labels
                .iter()
                .filter_map(|label| {
                    let key = label.get("key").and_then(Value::as_str)?;
                    let value = match label.get("value")? {
                        Value::Null => return None,
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    Some((key.to_string(), value))
                })
                .collect(),
            Some(labels) => string_map(labels),
            None => BTreeMap::new(),
        };
        non_empty(tags)
    }

    fn provider_extensions(&self, share: &Share<'_>) -> Option<Map<String, Value>> {
        let mut extensions: Map<String, Value> = EXTENSION_COLUMNS
            .iter()
            .filter_map(|column| {
                let value = share.get(*column).filter(|v| !v.is_null())?;
                Some((column.to_string(), value.clone()))
            })
            .collect();
        if let Some(table_type) = share.get("_source_table_type").filter(|v| !v.is_null()) {
            extensions.insert("source_table_type".to_string(), table_type.clone());
        }
        (!extensions.is_empty()).then_some(extensions)
    }
}
