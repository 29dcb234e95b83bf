//! Multi-layout field lookup
//!
//! A conceptual field can live under several physical keys depending on the
//! export version. [`FieldLookup`] holds the candidate accessors in priority
//! order and returns the first present value:
//!
//! 1. canonical key (`BilledCost`)
//! 2. slash key (`lineItem/UnblendedCost`)
//! 3. underscore key (`lineItem_UnblendedCost`)
//! 4. nested object (`record["lineItem"]["UnblendedCost"]`)
//! 5. concatenated key (`lineItemUnblendedCost`)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use super::parse;
use crate::RawRecord;

/// Export dialect a value was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// FOCUS-style PascalCase columns
    Canonical,
    /// Provider-native export columns
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Accessor {
    Key(String),
    Nested { category: String, field: String },
}

impl Accessor {
    fn get<'a>(&self, record: &'a RawRecord) -> Option<&'a Value> {
        match self {
            Accessor::Key(key) => record.get(key),
            Accessor::Nested { category, field } => record
                .get(category)
                .and_then(Value::as_object)
                .and_then(|inner| inner.get(field)),
        }
    }
}

/// Ordered (dialect, accessor) candidates for one conceptual field
#[derive(Debug, Clone, Default)]
pub struct FieldLookup {
    steps: Vec<(Dialect, Accessor)>,
}

impl FieldLookup {
    /// Lookup starting with a canonical column
    pub fn canonical(key: &str) -> Self {
        Self::default().or_canonical(key)
    }

    /// Lookup over legacy layouts only
    pub fn legacy(slash_key: &str) -> Self {
        Self::default().or_legacy(slash_key)
    }

    pub fn or_canonical(mut self, key: &str) -> Self {
        self.steps
            .push((Dialect::Canonical, Accessor::Key(key.to_string())));
        self
    }

    /// Append every legacy layout derived from a `category/field` key.
    ///
    /// A key without a slash is a single flat legacy column.
    pub fn or_legacy(mut self, slash_key: &str) -> Self {
        match slash_key.split_once('/') {
            Some((category, field)) => {
                let layouts = [
                    Accessor::Key(slash_key.to_string()),
                    Accessor::Key(format!("{category}_{field}")),
                    Accessor::Nested {
                        category: category.to_string(),
                        field: field.to_string(),
                    },
                    Accessor::Key(format!("{category}{field}")),
                ];
                self.steps
                    .extend(layouts.into_iter().map(|a| (Dialect::Legacy, a)));
            }
            None => self
                .steps
                .push((Dialect::Legacy, Accessor::Key(slash_key.to_string()))),
        }
        self
    }

    /// First present value with the dialect it was found in
    pub fn find<'a>(&self, record: &'a RawRecord) -> Option<(Dialect, &'a Value)> {
        self.steps.iter().find_map(|(dialect, accessor)| {
            accessor
                .get(record)
                .filter(|v| parse::is_present(v))
                .map(|v| (*dialect, v))
        })
    }

    pub fn value<'a>(&self, record: &'a RawRecord) -> Option<&'a Value> {
        self.find(record).map(|(_, v)| v)
    }

    pub fn is_present(&self, record: &RawRecord) -> bool {
        self.find(record).is_some()
    }

    /// Trimmed string rendering of the first scalar hit
    pub fn text(&self, record: &RawRecord) -> Option<String> {
        self.steps.iter().find_map(|(_, accessor)| {
            accessor.get(record).and_then(parse::text)
        })
    }

    pub fn text_or(&self, record: &RawRecord, default: &str) -> String {
        self.text(record).unwrap_or_else(|| default.to_string())
    }

    /// Decimal, zero when absent
    pub fn decimal(&self, record: &RawRecord) -> Decimal {
        parse::decimal(self.value(record))
    }

    /// Decimal, `None` when absent
    pub fn decimal_opt(&self, record: &RawRecord) -> Option<Decimal> {
        parse::decimal_opt(self.value(record))
    }

    pub fn instant(&self, record: &RawRecord) -> Option<DateTime<Utc>> {
        self.value(record).and_then(parse::instant)
    }

    pub fn object<'a>(&self, record: &'a RawRecord) -> Option<&'a Map<String, Value>> {
        self.value(record).and_then(Value::as_object)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    fn unblended() -> FieldLookup {
        FieldLookup::canonical("BilledCost").or_legacy("lineItem/UnblendedCost")
    }

    #[test]
    fn test_canonical_beats_slash() {
        let record = raw(json!({"BilledCost": "1", "lineItem/UnblendedCost": "2"}));
        assert_eq!(unblended().find(&record).unwrap().0, Dialect::Canonical);
        assert_eq!(unblended().decimal(&record), dec!(1));
    }

    #[test]
    fn test_slash_beats_underscore_beats_nested() {
        let record = raw(json!({
            "lineItem/UnblendedCost": "2",
            "lineItem_UnblendedCost": "3",
            "lineItem": {"UnblendedCost": "4"}
        }));
        assert_eq!(unblended().decimal(&record), dec!(2));

        let record = raw(json!({
            "lineItem_UnblendedCost": "3",
            "lineItem": {"UnblendedCost": "4"}
        }));
        assert_eq!(unblended().decimal(&record), dec!(3));

        let record = raw(json!({"lineItem": {"UnblendedCost": "4"}, "lineItemUnblendedCost": "5"}));
        assert_eq!(unblended().decimal(&record), dec!(4));
    }

    #[test]
    fn test_concatenated_key_is_last_resort() {
        let record = raw(json!({"lineItemUnblendedCost": "5"}));
        let (dialect, value) = unblended().find(&record).unwrap();
        assert_eq!(dialect, Dialect::Legacy);
        assert_eq!(value, &json!("5"));
    }

    #[test]
    fn test_empty_values_fall_through() {
        let record = raw(json!({"BilledCost": "  ", "lineItem/UnblendedCost": null, "lineItem_UnblendedCost": "9"}));
        assert_eq!(unblended().decimal(&record), dec!(9));
    }

    #[test]
    fn test_text_trims_and_renders_numbers() {
        let record = raw(json!({"lineItem/UsageAccountId": 123456789012_i64}));
        let lookup = FieldLookup::canonical("SubAccountId").or_legacy("lineItem/UsageAccountId");
        assert_eq!(lookup.text(&record), Some("123456789012".into()));

        let record = raw(json!({"SubAccountId": "  acct  "}));
        assert_eq!(lookup.text(&record), Some("acct".into()));
    }

    #[test]
    fn test_flat_legacy_key() {
        let record = raw(json!({"cost": 1.25}));
        assert_eq!(FieldLookup::legacy("cost").decimal(&record), dec!(1.25));
        assert!(FieldLookup::legacy("currency").text(&record).is_none());
    }

    #[test]
    fn test_missing_is_none_and_zero() {
        let record = raw(json!({}));
        assert!(!unblended().is_present(&record));
        assert_eq!(unblended().decimal(&record), Decimal::ZERO);
        assert_eq!(unblended().decimal_opt(&record), None);
    }
}
