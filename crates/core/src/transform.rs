//! Transformation engine.
//!
//! A [`TransformRule`] maps one field value to one output value. Rules are
//! stored as JSON objects of the form `{"type": "...", ...params}`. Known
//! types are parsed into typed variants; anything else becomes
//! [`TransformRule::Unknown`], which keeps the raw JSON and acts as the
//! identity transform.
//!
//! [`apply`] never fails. A value the rule cannot handle (a string passed to
//! `multiply`, an unparseable date, an invalid format string) is returned
//! unchanged and the fallback is logged at debug level.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use tracing::debug;

/// Default output format of `format_date`.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Offset-carrying timestamp layouts accepted by `format_date`, tried in
/// order after RFC 3339. `%z` takes both `+02:00` and `+0200`.
const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%z",
    "%Y%m%dT%H%M%S%z",
];

/// Naive timestamp layouts accepted by `format_date`.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y%m%dT%H%M%S",
    "%Y%m%dT%H%M",
];

/// Calendar date layouts, extended and basic.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

/// A declared field transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformRule {
    Uppercase,
    Lowercase,
    Multiply { factor: Number },
    Add { amount: Number },
    FormatDate { format: String },
    /// Unrecognized or missing `type`; the original JSON is kept verbatim.
    Unknown(Value),
}

/// Typed parameters of the recognized rule kinds.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownRule {
    Uppercase,
    Lowercase,
    Multiply {
        #[serde(default = "default_factor")]
        factor: Number,
    },
    Add {
        #[serde(default = "default_amount")]
        amount: Number,
    },
    FormatDate {
        #[serde(default = "default_date_format")]
        format: String,
    },
}

const KNOWN_TYPES: &[&str] = &["uppercase", "lowercase", "multiply", "add", "format_date"];

fn default_factor() -> Number {
    Number::from(1)
}

fn default_amount() -> Number {
    Number::from(0)
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

impl TransformRule {
    /// Build a rule from its JSON representation.
    ///
    /// Fails only when the JSON is not an object or a known rule carries
    /// parameters of the wrong type; an unknown `type` is accepted.
    pub fn from_value(value: Value) -> Result<Self, String> {
        if !value.is_object() {
            return Err(format!("rule must be a JSON object, got {}", value));
        }
        let rule_type = value.get("type").and_then(Value::as_str);
        match rule_type {
            Some(t) if KNOWN_TYPES.contains(&t) => {
                let known: KnownRule =
                    serde_json::from_value(value).map_err(|e| e.to_string())?;
                Ok(match known {
                    KnownRule::Uppercase => Self::Uppercase,
                    KnownRule::Lowercase => Self::Lowercase,
                    KnownRule::Multiply { factor } => Self::Multiply { factor },
                    KnownRule::Add { amount } => Self::Add { amount },
                    KnownRule::FormatDate { format } => Self::FormatDate { format },
                })
            }
            _ => Ok(Self::Unknown(value)),
        }
    }

    /// Parse a rule from JSON text, as stored in the database.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        Self::from_value(value)
    }

    /// JSON representation, the inverse of [`from_value`](Self::from_value).
    pub fn to_value(&self) -> Value {
        match self {
            Self::Uppercase => serde_json::json!({ "type": "uppercase" }),
            Self::Lowercase => serde_json::json!({ "type": "lowercase" }),
            Self::Multiply { factor } => serde_json::json!({ "type": "multiply", "factor": factor }),
            Self::Add { amount } => serde_json::json!({ "type": "add", "amount": amount }),
            Self::FormatDate { format } => {
                serde_json::json!({ "type": "format_date", "format": format })
            }
            Self::Unknown(raw) => raw.clone(),
        }
    }
}

impl Serialize for TransformRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TransformRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Apply `rule` to `value`, returning the transformed value.
pub fn apply(value: &Value, rule: &TransformRule) -> Value {
    let result = match rule {
        TransformRule::Uppercase => Some(Value::String(string_cast(value).to_uppercase())),
        TransformRule::Lowercase => Some(Value::String(string_cast(value).to_lowercase())),
        TransformRule::Multiply { factor } => {
            numeric_op(value, factor, i64::checked_mul, |a, b| a * b)
        }
        TransformRule::Add { amount } => numeric_op(value, amount, i64::checked_add, |a, b| a + b),
        TransformRule::FormatDate { format } => format_date(value, format),
        TransformRule::Unknown(_) => return value.clone(),
    };

    match result {
        Some(v) => v,
        None => {
            debug!(?rule, %value, "transformation not applicable, keeping original value");
            value.clone()
        }
    }
}

/// Text form of a value: strings as-is, everything else as compact JSON.
fn string_cast(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Integer arithmetic when both operands are integers and the result fits,
/// floating point otherwise.
fn numeric_op(
    value: &Value,
    operand: &Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Option<Value> {
    let Value::Number(lhs) = value else {
        return None;
    };
    if let (Some(a), Some(b)) = (lhs.as_i64(), operand.as_i64()) {
        if let Some(result) = int_op(a, b) {
            return Some(Value::from(result));
        }
    }
    let result = float_op(lhs.as_f64()?, operand.as_f64()?);
    Number::from_f64(result).map(Value::Number)
}

fn format_date(value: &Value, format: &str) -> Option<Value> {
    let text = value.as_str()?.trim();
    let mut out = String::new();

    let with_offset = DateTime::parse_from_rfc3339(text).ok().or_else(|| {
        OFFSET_DATETIME_FORMATS
            .iter()
            .find_map(|f| DateTime::parse_from_str(text, f).ok())
    });
    if let Some(dt) = with_offset {
        write!(out, "{}", dt.format(format)).ok()?;
        return Some(Value::String(out));
    }

    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| parse_hour_only(text))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    write!(out, "{}", naive.format(format)).ok()?;
    Some(Value::String(out))
}

/// `2024-03-15T10`: a date with only the hour of the time part.
fn parse_hour_only(text: &str) -> Option<NaiveDateTime> {
    let (date, hour) = text.split_once(|c| c == 'T' || c == ' ')?;
    if hour.len() != 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(hour.parse().ok()?, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(v: Value) -> TransformRule {
        TransformRule::from_value(v).unwrap()
    }

    #[test]
    fn test_case_rules_cast_to_string() {
        let upper = rule(json!({"type": "uppercase"}));
        assert_eq!(apply(&json!("hello"), &upper), json!("HELLO"));
        assert_eq!(apply(&json!(12), &upper), json!("12"));
        assert_eq!(apply(&json!(true), &upper), json!("TRUE"));

        let lower = rule(json!({"type": "lowercase"}));
        assert_eq!(apply(&json!("MiXeD"), &lower), json!("mixed"));
    }

    #[test]
    fn test_uppercase_is_idempotent() {
        let upper = TransformRule::Uppercase;
        for v in [json!("abc"), json!("ÄbC"), json!(3.5), json!(null), json!("")] {
            let once = apply(&v, &upper);
            assert_eq!(apply(&once, &upper), once);
        }
    }

    #[test]
    fn test_multiply_and_add() {
        let double = rule(json!({"type": "multiply", "factor": 2}));
        assert_eq!(apply(&json!(21), &double), json!(42));
        assert_eq!(apply(&json!(1.5), &double), json!(3.0));

        let scale = rule(json!({"type": "multiply", "factor": 0.5}));
        assert_eq!(apply(&json!(10), &scale), json!(5.0));

        let plus = rule(json!({"type": "add", "amount": 5}));
        assert_eq!(apply(&json!(10), &plus), json!(15));
    }

    #[test]
    fn test_numeric_defaults_are_identity() {
        let multiply = rule(json!({"type": "multiply"}));
        assert_eq!(multiply, TransformRule::Multiply { factor: Number::from(1) });
        assert_eq!(apply(&json!(7), &multiply), json!(7));

        let add = rule(json!({"type": "add"}));
        assert_eq!(apply(&json!(7), &add), json!(7));
    }

    #[test]
    fn test_numeric_rule_on_non_number_degrades() {
        let double = rule(json!({"type": "multiply", "factor": 2}));
        assert_eq!(apply(&json!("abc"), &double), json!("abc"));
        assert_eq!(apply(&json!(null), &double), json!(null));
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let double = rule(json!({"type": "multiply", "factor": 2}));
        let out = apply(&json!(i64::MAX), &double);
        assert!(out.is_f64());
    }

    #[test]
    fn test_format_date() {
        let default = rule(json!({"type": "format_date"}));
        assert_eq!(apply(&json!("2024-03-15T10:30:00"), &default), json!("2024-03-15"));
        assert_eq!(apply(&json!("2024-03-15T10:30:00Z"), &default), json!("2024-03-15"));
        assert_eq!(apply(&json!("2024-03-15"), &default), json!("2024-03-15"));

        let custom = rule(json!({"type": "format_date", "format": "%d/%m/%Y %H:%M"}));
        assert_eq!(
            apply(&json!("2024-03-15 10:30:45.123+02:00"), &custom),
            json!("15/03/2024 10:30")
        );
    }

    #[test]
    fn test_format_date_accepts_other_iso_layouts() {
        let default = rule(json!({"type": "format_date"}));
        for input in [
            "2024-03-15T10:30+02:00",
            "2024-03-15T10:30:00+0200",
            "2024-03-15 10:30:00.5-05:00",
            "2024-03-15T10",
            "20240315",
            "20240315T103000",
            "20240315T103000+0200",
        ] {
            assert_eq!(apply(&json!(input), &default), json!("2024-03-15"), "input {}", input);
        }

        let with_time = rule(json!({"type": "format_date", "format": "%H:%M %z"}));
        assert_eq!(
            apply(&json!("2024-03-15T10:30+02:00"), &with_time),
            json!("10:30 +0200")
        );
    }

    #[test]
    fn test_format_date_invalid_input_is_identity() {
        let default = rule(json!({"type": "format_date"}));
        assert_eq!(apply(&json!("not a date"), &default), json!("not a date"));
        assert_eq!(apply(&json!("2024-13-45"), &default), json!("2024-13-45"));
        assert_eq!(apply(&json!(20240315), &default), json!(20240315));
    }

    #[test]
    fn test_format_date_bad_format_is_identity() {
        let bad = rule(json!({"type": "format_date", "format": "%Q"}));
        assert_eq!(apply(&json!("2024-03-15"), &bad), json!("2024-03-15"));
    }

    #[test]
    fn test_unknown_and_missing_type_are_identity() {
        let unknown = rule(json!({"type": "reverse", "depth": 2}));
        assert!(matches!(unknown, TransformRule::Unknown(_)));
        assert_eq!(apply(&json!("abc"), &unknown), json!("abc"));
        assert_eq!(unknown.to_value(), json!({"type": "reverse", "depth": 2}));

        let missing = rule(json!({"factor": 3}));
        assert_eq!(apply(&json!(2), &missing), json!(2));
    }

    #[test]
    fn test_construction_rejects_malformed_rules() {
        assert!(TransformRule::parse("{not json").is_err());
        assert!(TransformRule::parse("[1, 2]").is_err());
        assert!(TransformRule::from_value(json!({"type": "multiply", "factor": "x"})).is_err());
    }

    #[test]
    fn test_rule_serde_round_trip() {
        let text = r#"{"type":"format_date","format":"%Y"}"#;
        let parsed: TransformRule = serde_json::from_str(text).unwrap();
        assert_eq!(
            parsed,
            TransformRule::FormatDate {
                format: "%Y".into()
            }
        );
        assert_eq!(serde_json::to_value(&parsed).unwrap(), serde_json::from_str::<Value>(text).unwrap());
    }
}
