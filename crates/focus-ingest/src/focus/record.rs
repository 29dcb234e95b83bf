//! Canonical billing record

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One normalized billing line.
///
/// Enumerated fields are stored as their wire strings so that records read
/// back from storage can still be checked by the validator. Mappers only ever
/// produce members of the `focus::spec` enumerations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_provider_id: Option<String>,

    // Cost
    pub billed_cost: Decimal,
    pub effective_cost: Decimal,
    pub list_cost: Decimal,
    pub contracted_cost: Decimal,
    pub currency: String,

    // Account
    pub billing_account_id: String,
    pub billing_account_name: String,
    pub billing_account_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account_type: Option<String>,

    // Time
    pub charge_period_start: DateTime<Utc>,
    pub charge_period_end: DateTime<Utc>,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,

    // Service
    pub service_name: String,
    pub service_category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_subcategory: Option<String>,
    pub provider_name: String,
    pub publisher_name: String,
    pub invoice_issuer_name: String,

    // Charge
    pub charge_category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_class: Option<String>,
    pub charge_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_unit: Option<String>,

    // Resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    // Location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    // SKU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_price_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_meter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_price_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_unit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracted_unit_price: Option<Decimal>,

    // Commitment discount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_discount_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_discount_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_discount_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_discount_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_discount_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_discount_quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_discount_unit: Option<String>,

    // Usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_unit: Option<String>,

    // Extensions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_extensions: Map<String, Value>,
}

impl FocusRecord {
    /// Record as a JSON object, the shape handed to the load side
    pub fn to_json_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Cost fields paired with their wire names
    pub fn costs(&self) -> [(&'static str, Decimal); 4] {
        [
            ("billed_cost", self.billed_cost),
            ("effective_cost", self.effective_cost),
            ("list_cost", self.list_cost),
            ("contracted_cost", self.contracted_cost),
        ]
    }

    /// Quantity fields that are present, paired with their wire names
    pub fn quantities(&self) -> Vec<(&'static str, Decimal)> {
        [
            ("pricing_quantity", self.pricing_quantity),
            ("consumed_quantity", self.consumed_quantity),
            ("commitment_discount_quantity", self.commitment_discount_quantity),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn record() -> FocusRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        FocusRecord {
            id: "rec-1".into(),
            x_provider_id: None,
            billed_cost: dec!(12.345),
            effective_cost: dec!(10),
            list_cost: dec!(15),
            contracted_cost: dec!(10),
            currency: "USD".into(),
            billing_account_id: "123".into(),
            billing_account_name: "Main".into(),
            billing_account_type: "BillingAccount".into(),
            sub_account_id: None,
            sub_account_name: None,
            sub_account_type: None,
            charge_period_start: start,
            charge_period_end: end,
            billing_period_start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            billing_period_end: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            service_name: "Amazon EC2".into(),
            service_category: "Compute".into(),
            service_subcategory: None,
            provider_name: "Amazon Web Services".into(),
            publisher_name: "Amazon Web Services".into(),
            invoice_issuer_name: "Amazon Web Services".into(),
            charge_category: "Usage".into(),
            charge_class: None,
            charge_description: "Usage".into(),
            charge_frequency: Some("Usage-Based".into()),
            pricing_quantity: Some(dec!(3)),
            pricing_unit: Some("Hrs".into()),
            resource_id: None,
            resource_name: None,
            resource_type: None,
            region_id: None,
            region_name: None,
            availability_zone: None,
            sku_id: None,
            sku_price_id: None,
            sku_meter: None,
            sku_price_details: None,
            list_unit_price: None,
            contracted_unit_price: None,
            commitment_discount_id: None,
            commitment_discount_type: None,
            commitment_discount_category: None,
            commitment_discount_name: None,
            commitment_discount_status: None,
            commitment_discount_quantity: None,
            commitment_discount_unit: None,
            consumed_quantity: None,
            consumed_unit: None,
            tags: BTreeMap::new(),
            provider_extensions: Map::new(),
        }
    }

    #[test]
    fn test_wire_format_omits_none_and_keeps_decimals_exact() {
        let map = record().to_json_map();
        assert_eq!(map["billed_cost"], Value::String("12.345".into()));
        assert_eq!(map["charge_period_start"], Value::String("2024-01-15T00:00:00Z".into()));
        assert!(!map.contains_key("resource_id"));
        assert!(!map.contains_key("tags"));
        assert!(!map.contains_key("x_provider_id"));
    }

    #[test]
    fn test_deserializes_own_output() {
        let original = record();
        let json = serde_json::to_string(&original).unwrap();
        let back: FocusRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_quantities_skip_absent_fields() {
        let quantities = record().quantities();
        assert_eq!(quantities, vec![("pricing_quantity", dec!(3))]);
    }
}
