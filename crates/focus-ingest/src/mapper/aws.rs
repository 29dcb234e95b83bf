//! AWS mapper for FOCUS exports and legacy Cost and Usage Reports

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::category::{AWS_CATEGORIES, AWS_SUBCATEGORIES};
use super::lookup::{Dialect, FieldLookup};
use super::{
    instant_field, non_empty, string_map, AccountInfo, ChargeInfo, CommitmentInfo, CostInfo,
    FocusMapper, LocationInfo, MappingError, ResourceInfo, ServiceInfo, Share, SkuInfo, TimeInfo,
    UsageInfo, Validity, DEFAULT_ACCOUNT_TYPE, DEFAULT_CURRENCY, UNKNOWN_ACCOUNT_ID,
    UNKNOWN_ACCOUNT_NAME,
};
use crate::config::ProviderKind;
use crate::focus::spec::{ChargeCategory, ChargeFrequency};
use crate::RawRecord;

const PROVIDER_NAME: &str = "Amazon Web Services";

const CANONICAL_INDICATORS: &[&str] = &["BilledCost", "EffectiveCost", "BillingAccountId"];
const LEGACY_INDICATOR: &str = "lineItem/UnblendedCost";

/// FOCUS columns carried into extensions as lowercase keys without the prefix
const EXTENSION_COLUMNS: &[&str] = &[
    "x_CostCategories",
    "x_Discounts",
    "x_Operation",
    "x_ServiceCode",
    "x_UsageType",
];

/// CUR columns carried into extensions with `/` replaced by `_`
const LEGACY_EXTENSION_COLUMNS: &[&str] = &[
    "bill/BillType",
    "lineItem/LineItemType",
    "lineItem/ProductCode",
    "lineItem/OperationType",
    "product/instanceType",
    "product/operatingSystem",
    "pricing/LeaseContractLength",
    "reservation/OfferingType",
];

fn field(canonical: &str, legacy: &str) -> FieldLookup {
    FieldLookup::canonical(canonical).or_legacy(legacy)
}

fn legacy(slash_key: &str) -> FieldLookup {
    FieldLookup::legacy(slash_key)
}

/// Charge category for a CUR `lineItem/LineItemType`
pub fn charge_category_for_line_item(line_item_type: Option<&str>) -> ChargeCategory {
    match line_item_type {
        Some("Usage" | "DiscountedUsage") => ChargeCategory::Usage,
        Some("Tax") => ChargeCategory::Tax,
        Some("Refund" | "Credit") => ChargeCategory::Credit,
        Some("RIFee" | "Fee" | "SavingsPlanUpfrontFee" | "SavingsPlanRecurringFee" | "Support") => {
            ChargeCategory::Purchase
        }
        Some("SavingsPlanNegation") => ChargeCategory::Adjustment,
        _ => ChargeCategory::Usage,
    }
}

#[derive(Debug, Clone, Default)]
pub struct AwsMapper {
    provider_id: Option<String>,
}

impl AwsMapper {
    pub fn new(provider_id: Option<String>) -> Self {
        Self { provider_id }
    }
}

impl FocusMapper for AwsMapper {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Aws
    }

    fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    fn check_validity(&self, record: &RawRecord) -> Validity {
        if CANONICAL_INDICATORS.iter().any(|k| record.contains_key(*k)) {
            return Validity::Valid(Dialect::Canonical);
        }
        if legacy(LEGACY_INDICATOR).find(record).is_some() {
            return Validity::Valid(Dialect::Legacy);
        }
        Validity::Invalid("record has neither FOCUS cost columns nor lineItem/UnblendedCost".into())
    }

    fn costs(&self, share: &Share<'_>) -> Result<CostInfo, MappingError> {
        if share.is_canonical() {
            let billed = FieldLookup::canonical("BilledCost").decimal(share);
            let effective = FieldLookup::canonical("EffectiveCost")
                .decimal_opt(share)
                .unwrap_or(billed);
            let list = FieldLookup::canonical("ListCost")
                .decimal_opt(share)
                .unwrap_or(billed);
            let contracted = FieldLookup::canonical("ContractedCost")
                .decimal_opt(share)
                .unwrap_or(effective);
            return Ok(CostInfo {
                billed_cost: billed,
                effective_cost: effective,
                list_cost: list,
                contracted_cost: contracted,
                currency: FieldLookup::canonical("BillingCurrency").text_or(share, DEFAULT_CURRENCY),
            });
        }

        let billed = legacy(LEGACY_INDICATOR).decimal(share);
        let or_billed = |lookup: FieldLookup| {
            let value = lookup.decimal(share);
            if value.is_zero() {
                billed
            } else {
                value
            }
        };
        let effective = or_billed(legacy("lineItem/NetUnblendedCost"));
        Ok(CostInfo {
            billed_cost: billed,
            effective_cost: effective,
            list_cost: or_billed(legacy("pricing/publicOnDemandCost")),
            contracted_cost: effective,
            currency: legacy("lineItem/CurrencyCode").text_or(share, DEFAULT_CURRENCY),
        })
    }

    fn account(&self, share: &Share<'_>) -> Result<AccountInfo, MappingError> {
        let billing_id = field("BillingAccountId", "bill/PayerAccountId").text(share);
        let billing_name = field("BillingAccountName", "bill/PayerAccountName")
            .text(share)
            .or_else(|| billing_id.clone());
        let sub_account_id = field("SubAccountId", "lineItem/UsageAccountId").text(share);
        Ok(AccountInfo {
            billing_account_id: billing_id.unwrap_or_else(|| UNKNOWN_ACCOUNT_ID.to_string()),
            billing_account_name: billing_name.unwrap_or_else(|| UNKNOWN_ACCOUNT_NAME.to_string()),
            billing_account_type: FieldLookup::canonical("BillingAccountType")
                .text_or(share, DEFAULT_ACCOUNT_TYPE),
            sub_account_name: field("SubAccountName", "lineItem/UsageAccountName").text(share),
            sub_account_type: sub_account_id.as_ref().map(|_| "Account".to_string()),
            sub_account_id,
        })
    }

    fn time(&self, share: &Share<'_>) -> Result<TimeInfo, MappingError> {
        Ok(TimeInfo {
            charge_period_start: instant_field(
                share,
                &field("ChargePeriodStart", "lineItem/UsageStartDate"),
                "ChargePeriodStart",
            )?,
            charge_period_end: instant_field(
                share,
                &field("ChargePeriodEnd", "lineItem/UsageEndDate"),
                "ChargePeriodEnd",
            )?,
            billing_period_start: instant_field(
                share,
                &field("BillingPeriodStart", "bill/BillingPeriodStartDate"),
                "BillingPeriodStart",
            )?,
            billing_period_end: instant_field(
                share,
                &field("BillingPeriodEnd", "bill/BillingPeriodEndDate"),
                "BillingPeriodEnd",
            )?,
        })
    }

    fn service(&self, share: &Share<'_>) -> Result<ServiceInfo, MappingError> {
        let service_name = field("ServiceName", "product/ProductName").text_or(share, "AWS Service");
        let service_category = FieldLookup::canonical("ServiceCategory")
            .text(share)
            .unwrap_or_else(|| {
                let product_code = legacy("lineItem/ProductCode").text(share);
                AWS_CATEGORIES
                    .classify(product_code.as_deref().unwrap_or(&service_name))
                    .to_string()
            });
        let name_or_default = |key: &str| FieldLookup::canonical(key).text_or(share, PROVIDER_NAME);
        Ok(ServiceInfo {
            service_subcategory: FieldLookup::canonical("ServiceSubcategory")
                .text(share)
                .or_else(|| AWS_SUBCATEGORIES.classify(&service_name).map(str::to_string)),
            service_category,
            provider_name: name_or_default("ProviderName"),
            publisher_name: name_or_default("PublisherName"),
            invoice_issuer_name: name_or_default("InvoiceIssuerName"),
            service_name,
        })
    }

    fn charge(&self, share: &Share<'_>) -> Result<ChargeInfo, MappingError> {
        let charge_category = FieldLookup::canonical("ChargeCategory")
            .text(share)
            .unwrap_or_else(|| {
                let line_item_type = legacy("lineItem/LineItemType").text(share);
                charge_category_for_line_item(line_item_type.as_deref()).to_string()
            });
        let quantity = field("PricingQuantity", "lineItem/UsageAmount");
        Ok(ChargeInfo {
            charge_category,
            charge_class: FieldLookup::canonical("ChargeClass").text(share),
            charge_description: field("ChargeDescription", "lineItem/LineItemDescription")
                .text_or(share, "AWS Usage Charge"),
            charge_frequency: Some(
                FieldLookup::canonical("ChargeFrequency")
                    .text_or(share, ChargeFrequency::UsageBased.as_str()),
            ),
            pricing_quantity: quantity.decimal_opt(share),
            pricing_unit: field("PricingUnit", "pricing/unit").text(share),
        })
    }

    fn resource(&self, share: &Share<'_>) -> Option<ResourceInfo> {
        let resource_id = field("ResourceId", "lineItem/ResourceId").text(share)?;
        Some(ResourceInfo {
            resource_name: FieldLookup::canonical("ResourceName")
                .text(share)
                .or_else(|| Some(resource_id.clone())),
            resource_type: field("ResourceType", "product/resourceType").text(share),
            resource_id: Some(resource_id),
        })
    }

    fn location(&self, share: &Share<'_>) -> Option<LocationInfo> {
        let location = LocationInfo {
            region_id: field("RegionId", "product/regionCode").text(share),
            region_name: field("RegionName", "product/region").text(share),
            availability_zone: field("AvailabilityZone", "product/availabilityZone").text(share),
        };
        (location != LocationInfo::default()).then_some(location)
    }

    fn sku(&self, share: &Share<'_>) -> Option<SkuInfo> {
        let sku_id = field("SkuId", "product/sku").text(share).or_else(|| {
            (share.dialect == Dialect::Legacy).then(|| {
                let product_code = legacy("lineItem/ProductCode").text_or(share, "unknown");
                let line_item_type = legacy("lineItem/LineItemType").text_or(share, "usage");
                format!(
                    "aws-{}-{}",
                    product_code.to_lowercase(),
                    line_item_type.to_lowercase()
                )
            })
        });
        let sku = SkuInfo {
            sku_id,
            sku_price_id: field("SkuPriceId", "pricing/RateId").text(share),
            sku_meter: FieldLookup::canonical("SkuMeter").text(share),
            sku_price_details: FieldLookup::canonical("SkuPriceDetails").text(share),
            list_unit_price: field("ListUnitPrice", "lineItem/UnblendedRate").decimal_opt(share),
            contracted_unit_price: field("ContractedUnitPrice", "lineItem/NetUnblendedRate")
                .decimal_opt(share),
        };
        (sku != SkuInfo::default()).then_some(sku)
    }

    fn commitment(&self, share: &Share<'_>) -> Option<CommitmentInfo> {
        if let Some(id) = FieldLookup::canonical("CommitmentDiscountId").text(share) {
            let text = |key: &str| FieldLookup::canonical(key).text(share);
            return Some(CommitmentInfo {
                commitment_discount_id: Some(id),
                commitment_discount_type: text("CommitmentDiscountType"),
                commitment_discount_category: text("CommitmentDiscountCategory"),
                commitment_discount_name: text("CommitmentDiscountName"),
                commitment_discount_status: text("CommitmentDiscountStatus"),
                commitment_discount_quantity: FieldLookup::canonical("CommitmentDiscountQuantity")
                    .decimal_opt(share),
                commitment_discount_unit: text("CommitmentDiscountUnit"),
            });
        }

        let purchased = [
            ("reservation/ReservationARN", "reservation/OfferingType", "Reserved Instance"),
            ("savingsPlan/SavingsPlanARN", "savingsPlan/OfferingType", "Savings Plan"),
        ];
        purchased.iter().find_map(|(arn_key, offering_key, kind)| {
            let arn = legacy(arn_key).text(share)?;
            let name = match legacy(offering_key).text(share) {
                Some(offering) => format!("{kind} - {offering}"),
                None => kind.to_string(),
            };
            Some(CommitmentInfo {
                commitment_discount_id: Some(arn),
                commitment_discount_type: Some(kind.to_string()),
                commitment_discount_category: Some("Committed Use".to_string()),
                commitment_discount_name: Some(name),
                commitment_discount_status: Some("Used".to_string()),
                ..CommitmentInfo::default()
            })
        })
    }

    fn usage(&self, share: &Share<'_>) -> Option<UsageInfo> {
        let consumed_quantity = field("ConsumedQuantity", "lineItem/UsageAmount").decimal_opt(share)?;
        Some(UsageInfo {
            consumed_quantity: Some(consumed_quantity),
            consumed_unit: field("ConsumedUnit", "pricing/unit").text(share),
        })
    }

    fn tags(&self, share: &Share<'_>) -> Option<BTreeMap<String, String>> {
        if let Some(tags) = FieldLookup::canonical("Tags").value(share) {
            return non_empty(string_map(tags));
        }
        let tags = share
            .iter()
            .filter_map(|(key, value)| {
                let rendered = match value {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if let Some(name) = key.strip_prefix("resourceTags/") {
                    Some((name.to_string(), rendered))
                } else if key.starts_with("user:") || key.starts_with("aws:") {
                    Some((key.clone(), rendered))
                } else {
                    None
                }
            })
            .collect();
        non_empty(tags)
    }

    fn provider_extensions(&self, share: &Share<'_>) -> Option<Map<String, Value>> {
        let mut extensions = Map::new();
        for column in EXTENSION_COLUMNS {
            if let Some(value) = share.get(*column).filter(|v| !v.is_null()) {
                let key = column.trim_start_matches("x_").to_lowercase();
                extensions.insert(key, value.clone());
            }
        }
        for column in LEGACY_EXTENSION_COLUMNS {
            if let Some(value) = legacy(column).text(share) {
                extensions.insert(column.replace('/', "_"), Value::String(value));
            }
        }
        (!extensions.is_empty()).then_some(extensions)
    }
}
