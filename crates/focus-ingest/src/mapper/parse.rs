//! Lenient value parsing
//!
//! Nothing here fails: numbers fall back to zero and instants to `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Naive layouts tried after RFC 3339, in order
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S UTC",
];

/// Unix values above this are milliseconds
const MILLIS_THRESHOLD: f64 = 1e11;

/// Render a scalar as a trimmed string; null, empty and composite values are absent
pub fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Whether a value counts as present for lookup purposes
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Exact decimal, zero when absent or unparsable
pub fn decimal(value: Option<&Value>) -> Decimal {
    value.and_then(try_decimal).unwrap_or(Decimal::ZERO)
}

/// Exact decimal when the value is present; present but unparsable is zero
pub fn decimal_opt(value: Option<&Value>) -> Option<Decimal> {
    value
        .filter(|v| is_present(v))
        .map(|v| try_decimal(v).unwrap_or(Decimal::ZERO))
}

fn try_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                decimal_str(&n.to_string())
            }
        }
        Value::String(s) => decimal_str(s),
        _ => None,
    }
}

fn decimal_str(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

/// Integer count; floats are truncated, anything else is zero
pub fn count(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => decimal_str(s)
            .and_then(|d| i64::try_from(d.trunc()).ok())
            .unwrap_or(0),
        _ => 0,
    }
}

/// UTC instant from a number (unix seconds or millis) or a date string
pub fn instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_unix),
        Value::String(s) => instant_str(s.trim()),
        _ => None,
    }
}

fn instant_str(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse::<f64>().ok().and_then(from_unix);
    }
    None
}

fn from_unix(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value.abs() > MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    DateTime::from_timestamp_millis(millis as i64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_strips_commas_and_whitespace() {
        assert_eq!(decimal(Some(&json!(" 1,234.50 "))), dec!(1234.50));
    }

    #[test]
    fn test_decimal_defaults_to_zero() {
        assert_eq!(decimal(Some(&json!("abc"))), Decimal::ZERO);
        assert_eq!(decimal(Some(&json!(""))), Decimal::ZERO);
        assert_eq!(decimal(Some(&Value::Null)), Decimal::ZERO);
        assert_eq!(decimal(None), Decimal::ZERO);
        assert_eq!(decimal(Some(&json!({"nested": 1}))), Decimal::ZERO);
    }

    #[test]
    fn test_decimal_accepts_numbers_and_scientific_notation() {
        assert_eq!(decimal(Some(&json!(42))), dec!(42));
        assert_eq!(decimal(Some(&json!(0.25))), dec!(0.25));
        assert_eq!(decimal(Some(&json!("1.5e3"))), dec!(1500));
        assert_eq!(decimal(Some(&json!("2e-2"))), dec!(0.02));
    }

    #[test]
    fn test_decimal_opt_distinguishes_absent_from_invalid() {
        assert_eq!(decimal_opt(None), None);
        assert_eq!(decimal_opt(Some(&json!(""))), None);
        assert_eq!(decimal_opt(Some(&json!("n/a"))), Some(Decimal::ZERO));
        assert_eq!(decimal_opt(Some(&json!("7"))), Some(dec!(7)));
    }

    #[test]
    fn test_instant_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        for raw in [
            "2024-01-15T10:30:00Z",
            "2024-01-15T10:30:00+00:00",
            "2024-01-15T10:30:00.000Z",
            "2024-01-15T10:30:00",
            "2024-01-15 10:30:00",
            "2024-01-15 10:30:00 UTC",
        ] {
            assert_eq!(instant(&json!(raw)), Some(expected), "format {raw}");
        }
        assert_eq!(
            instant(&json!("2024-01-15")),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_instant_offsets_are_converted_to_utc() {
        let parsed = instant(&json!("2024-01-15T12:00:00+02:00")).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_instant_unix_seconds_and_millis() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(instant(&json!(1_704_067_200)), Some(expected));
        assert_eq!(instant(&json!(1_704_067_200_000_i64)), Some(expected));
        assert_eq!(instant(&json!("1704067200")), Some(expected));
    }

    #[test]
    fn test_instant_failure_is_none() {
        assert_eq!(instant(&json!("yesterday")), None);
        assert_eq!(instant(&json!("")), None);
        assert_eq!(instant(&json!(true)), None);
    }

    #[test]
    fn test_text_renders_scalars() {
        assert_eq!(text(&json!("  abc ")), Some("abc".into()));
        assert_eq!(text(&json!(12)), Some("12".into()));
        assert_eq!(text(&json!(false)), Some("false".into()));
        assert_eq!(text(&json!("   ")), None);
        assert_eq!(text(&json!([1])), None);
    }

    #[test]
    fn test_count() {
        assert_eq!(count(Some(&json!(1000))), 1000);
        assert_eq!(count(Some(&json!(2.9))), 2);
        assert_eq!(count(Some(&json!("1,500"))), 1500);
        assert_eq!(count(None), 0);
    }
}
