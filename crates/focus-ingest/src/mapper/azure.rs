//! Azure mapper for Cost Management FOCUS exports

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::category::AZURE_CATEGORIES;
use super::lookup::{Dialect, FieldLookup};
use super::{
    instant_field, non_empty, string_map, AccountInfo, ChargeInfo, CommitmentInfo, CostInfo,
    FocusMapper, LocationInfo, MappingError, ResourceInfo, ServiceInfo, Share, SkuInfo, TimeInfo,
    UsageInfo, Validity, DEFAULT_ACCOUNT_TYPE, DEFAULT_CURRENCY, UNKNOWN_ACCOUNT_ID,
    UNKNOWN_ACCOUNT_NAME,
};
use crate::config::ProviderKind;
use crate::focus::spec::{ChargeClass, CommitmentDiscountStatus, ServiceCategory};
use crate::RawRecord;

const INDICATORS: &[&str] = &["BilledCost", "EffectiveCost", "ServiceName", "ChargeCategory"];

/// Azure columns preserved verbatim in extensions
const EXTENSION_COLUMNS: &[&str] = &[
    "SubscriptionId",
    "SubscriptionName",
    "ResourceGroup",
    "ResourceGroupName",
    "DepartmentName",
    "AccountName",
    "CostCenter",
    "BillingProfileId",
    "BillingProfileName",
    "InvoiceSectionId",
    "InvoiceSectionName",
    "ReservationId",
    "ReservationName",
    "PlanName",
    "OfferType",
    "Term",
    "Frequency",
    "PublisherType",
    "IsAzureCreditEligible",
];

fn col(key: &str) -> FieldLookup {
    FieldLookup::canonical(key)
}

/// Azure's own category spellings that differ from the FOCUS enumeration
fn category_alias(value: &str) -> Option<ServiceCategory> {
    match value {
        "AI + Machine Learning" => Some(ServiceCategory::AiAndMachineLearning),
        "Database" => Some(ServiceCategory::Databases),
        _ => None,
    }
}

/// Azure reuses `ChargeClass` for resource families
fn category_from_charge_class(value: &str) -> Option<ServiceCategory> {
    match value {
        "Database" => Some(ServiceCategory::Databases),
        "Storage" => Some(ServiceCategory::Storage),
        "Compute" => Some(ServiceCategory::Compute),
        "Network" => Some(ServiceCategory::Networking),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct AzureMapper {
    provider_id: Option<String>,
}

impl AzureMapper {
    pub fn new(provider_id: Option<String>) -> Self {
        Self { provider_id }
    }
}

impl FocusMapper for AzureMapper {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    fn check_validity(&self, record: &RawRecord) -> Validity {
        if INDICATORS.iter().any(|k| record.contains_key(*k)) {
            Validity::Valid(Dialect::Canonical)
        } else {
            Validity::Invalid("record has no Azure FOCUS indicator columns".into())
        }
    }

    fn costs(&self, share: &Share<'_>) -> Result<CostInfo, MappingError> {
        Ok(CostInfo {
            billed_cost: col("BilledCost").decimal(share),
            effective_cost: col("EffectiveCost").decimal(share),
            list_cost: col("ListCost").decimal(share),
            contracted_cost: col("ContractedCost").decimal(share),
            currency: col("BillingCurrency").text_or(share, DEFAULT_CURRENCY),
        })
    }

    fn account(&self, share: &Share<'_>) -> Result<AccountInfo, MappingError> {
        let billing_id = col("BillingAccountId").text(share);
        let billing_name = col("BillingAccountName")
            .text(share)
            .or_else(|| billing_id.clone());
        let sub_account_id = col("SubAccountId").text(share);
        Ok(AccountInfo {
            billing_account_id: billing_id.unwrap_or_else(|| UNKNOWN_ACCOUNT_ID.to_string()),
            billing_account_name: billing_name.unwrap_or_else(|| UNKNOWN_ACCOUNT_NAME.to_string()),
            billing_account_type: col("BillingAccountType").text_or(share, DEFAULT_ACCOUNT_TYPE),
            sub_account_name: col("SubAccountName").text(share),
            sub_account_type: col("SubAccountType")
                .text(share)
                .or_else(|| sub_account_id.as_ref().map(|_| "Subscription".to_string())),
            sub_account_id,
        })
    }

    fn time(&self, share: &Share<'_>) -> Result<TimeInfo, MappingError> {
        let period = |key: &str| instant_field(share, &col(key), key);
        Ok(TimeInfo {
            charge_period_start: period("ChargePeriodStart")?,
            charge_period_end: period("ChargePeriodEnd")?,
            billing_period_start: period("BillingPeriodStart")?,
            billing_period_end: period("BillingPeriodEnd")?,
        })
    }

    fn service(&self, share: &Share<'_>) -> Result<ServiceInfo, MappingError> {
        let service_name = col("ServiceName").text_or(share, "Azure Service");
        let service_category = match col("ServiceCategory").text(share) {
            Some(raw) => category_alias(&raw).map(|c| c.to_string()).unwrap_or(raw),
            None => col("ChargeClass")
                .text(share)
                .and_then(|class| category_from_charge_class(&class))
                .unwrap_or_else(|| AZURE_CATEGORIES.classify(&service_name))
                .to_string(),
        };
        Ok(ServiceInfo {
            service_category,
            service_subcategory: col("ServiceSubcategory").text(share),
            provider_name: col("ProviderName").text_or(share, "Microsoft Azure"),
            publisher_name: col("PublisherName").text_or(share, "Microsoft"),
            invoice_issuer_name: col("InvoiceIssuerName").text_or(share, "Microsoft Azure"),
            service_name,
        })
    }

    fn charge(&self, share: &Share<'_>) -> Result<ChargeInfo, MappingError> {
        Ok(ChargeInfo {
            charge_category: col("ChargeCategory").text_or(share, "Usage"),
            charge_class: col("ChargeClass")
                .text(share)
                .filter(|class| ChargeClass::is_valid(class)),
            charge_description: col("ChargeDescription").text_or(share, "Azure Usage Charge"),
            charge_frequency: col("ChargeFrequency").text(share),
            pricing_quantity: col("PricingQuantity").decimal_opt(share),
            pricing_unit: col("PricingUnit").text(share),
        })
    }

    fn resource(&self, share: &Share<'_>) -> Option<ResourceInfo> {
        let resource_id = col("ResourceId").text(share)?;
        Some(ResourceInfo {
            resource_name: col("ResourceName")
                .text(share)
                .or_else(|| Some(resource_id.clone())),
            resource_type: col("ResourceType").text(share),
            resource_id: Some(resource_id),
        })
    }

    fn location(&self, share: &Share<'_>) -> Option<LocationInfo> {
        let location = LocationInfo {
            region_id: col("RegionId").text(share),
            region_name: col("RegionName").text(share),
            availability_zone: col("AvailabilityZone").text(share),
        };
        (location != LocationInfo::default()).then_some(location)
    }

    fn sku(&self, share: &Share<'_>) -> Option<SkuInfo> {
        let sku_id = col("SkuId").text(share)?;
        Some(SkuInfo {
            sku_id: Some(sku_id),
            sku_price_id: col("SkuPriceId").text(share),
            sku_meter: col("SkuMeter").text(share),
            sku_price_details: col("SkuPriceDetails").text(share),
            list_unit_price: col("ListUnitPrice").decimal_opt(share),
            contracted_unit_price: col("ContractedUnitPrice").decimal_opt(share),
        })
    }

    fn commitment(&self, share: &Share<'_>) -> Option<CommitmentInfo> {
        let id = col("CommitmentDiscountId").text(share)?;
        Some(CommitmentInfo {
            commitment_discount_id: Some(id),
            commitment_discount_type: col("CommitmentDiscountType").text(share),
            commitment_discount_category: col("CommitmentDiscountCategory").text(share),
            commitment_discount_name: col("CommitmentDiscountName").text(share),
            // Azure reports "Active" here, which has no FOCUS counterpart
            commitment_discount_status: col("CommitmentDiscountStatus")
                .text(share)
                .filter(|status| CommitmentDiscountStatus::is_valid(status)),
            commitment_discount_quantity: col("CommitmentDiscountQuantity").decimal_opt(share),
            commitment_discount_unit: col("CommitmentDiscountUnit").text(share),
        })
    }

    fn usage(&self, share: &Share<'_>) -> Option<UsageInfo> {
        let consumed_quantity = col("ConsumedQuantity").decimal_opt(share)?;
        Some(UsageInfo {
            consumed_quantity: Some(consumed_quantity),
            consumed_unit: col("ConsumedUnit").text(share),
        })
    }

    fn tags(&self, share: &Share<'_>) -> Option<BTreeMap<String, String>> {
        let mut tags: BTreeMap<String, String> = share
            .iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix("Tags/")?;
                let rendered = match value {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((name.to_string(), rendered))
            })
            .collect();
        if let Some(value @ Value::Object(_)) = share.get("Tags") {
            tags.extend(string_map(value));
        }
        non_empty(tags)
    }

    fn provider_extensions(&self, share: &Share<'_>) -> Option<Map<String, Value>> {
        let mut extensions = Map::new();
        for column in EXTENSION_COLUMNS {
            if let Some(value) = col(column).text(share) {
                extensions.insert(column.to_string(), Value::String(value));
            }
        }
        for (key, value) in share.iter() {
            if key.starts_with("x_") && !value.is_null() {
                extensions.insert(key.clone(), value.clone());
            }
        }
        (!extensions.is_empty()).then_some(extensions)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::focus::FocusRecord;
    use crate::mapper::MapOutcome;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn map_one(record: Value) -> FocusRecord {
        let record = record.as_object().cloned().unwrap();
        match AzureMapper::new(Some("az-1".into())).map_to_focus(&record) {
            MapOutcome::Records(mut records) => records.remove(0),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_focus_export_row() {
        let record = map_one(json!({
            "BilledCost": "100.50",
            "EffectiveCost": "90.00",
            "ListCost": "120.00",
            "ContractedCost": "95.00",
            "BillingCurrency": "EUR",
            "BillingAccountId": "ba-1",
            "SubAccountId": "sub-1",
            "ServiceName": "Virtual Machines",
            "ServiceCategory": "Compute",
            "ChargeCategory": "Usage",
            "ChargePeriodStart": "2024-01-15T00:00:00Z",
            "ChargePeriodEnd": "2024-01-16T00:00:00Z",
            "ResourceId": "/subscriptions/sub-1/vm1",
            "SubscriptionName": "Prod",
            "x_SkuMeterCategory": "Virtual Machines"
        }));
        assert_eq!(record.billed_cost, dec!(100.50));
        assert_eq!(record.contracted_cost, dec!(95.00));
        assert_eq!(record.currency, "EUR");
        assert_eq!(record.sub_account_type.as_deref(), Some("Subscription"));
        assert_eq!(record.resource_name.as_deref(), Some("/subscriptions/sub-1/vm1"));
        assert_eq!(record.publisher_name, "Microsoft");
        assert_eq!(record.provider_extensions["SubscriptionName"], json!("Prod"));
        assert_eq!(record.provider_extensions["x_SkuMeterCategory"], json!("Virtual Machines"));
    }

    #[test]
    fn test_category_aliases() {
        let record = map_one(json!({"BilledCost": 1, "ServiceCategory": "AI + Machine Learning"}));
        assert_eq!(record.service_category, "AI and Machine Learning");

        let record = map_one(json!({"BilledCost": 1, "ServiceCategory": "Database"}));
        assert_eq!(record.service_category, "Databases");
    }

    #[test]
    fn test_charge_class_feeds_category_but_is_dropped() {
        let record = map_one(json!({"BilledCost": 1, "ServiceName": "Mystery", "ChargeClass": "Network"}));
        assert_eq!(record.service_category, "Networking");
        assert_eq!(record.charge_class, None);

        let record = map_one(json!({"BilledCost": 1, "ChargeClass": "Correction"}));
        assert_eq!(record.charge_class.as_deref(), Some("Correction"));
    }

    #[test]
    fn test_category_from_service_name() {
        let record = map_one(json!({"BilledCost": 1, "ServiceName": "Azure Key Vault"}));
        assert_eq!(record.service_category, "Security, Identity, and Compliance");
    }

    #[test]
    fn test_active_commitment_status_is_dropped() {
        let record = map_one(json!({
            "BilledCost": 1,
            "CommitmentDiscountId": "ri-1",
            "CommitmentDiscountStatus": "Active"
        }));
        assert_eq!(record.commitment_discount_id.as_deref(), Some("ri-1"));
        assert_eq!(record.commitment_discount_status, None);
    }

    #[test]
    fn test_tags_from_prefixed_columns_and_object() {
        let record = map_one(json!({
            "BilledCost": 1,
            "Tags/env": "prod",
            "Tags": {"team": "core"}
        }));
        assert_eq!(record.tags["env"], "prod");
        assert_eq!(record.tags["team"], "core");
    }

    #[test]
    fn test_missing_indicators_is_invalid() {
        let record = json!({"cost": 1}).as_object().cloned().unwrap();
        assert!(matches!(
            AzureMapper::default().map_to_focus(&record),
            MapOutcome::Invalid(_)
        ));
    }
}
