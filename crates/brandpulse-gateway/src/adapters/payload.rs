use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::UtcDateTime;

/// Decoded JSON body of a successful upstream response, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPayload(Value);

impl RawPayload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The provider's own success flag. Missing or non-boolean counts as false.
    pub fn is_success(&self) -> bool {
        self.0.get("success").and_then(Value::as_bool) == Some(true)
    }

    /// Top-level object, when the body is one.
    pub fn object(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }

    /// Items of a `{success, data: [...]}` list envelope. `None` unless the
    /// envelope reports success and carries an array.
    pub fn items(&self) -> Option<&[Value]> {
        if !self.is_success() {
            return None;
        }
        self.0.get("data").and_then(Value::as_array).map(Vec::as_slice)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for RawPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Non-empty string field; numeric ids are rendered as strings.
pub(crate) fn text(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// String field with an empty default, for free-text content.
pub(crate) fn content(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Non-negative count; accepts integers, floats and numeric strings.
pub(crate) fn count(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::Number(number)) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|n| n.is_finite() && *n >= 0.0).map(|n| n as u64))
            .unwrap_or(0),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Finite float; accepts numbers and numeric strings.
pub(crate) fn float(value: &Value, key: &str) -> Option<f64> {
    let parsed = match value.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

/// Unix-seconds timestamp field.
pub(crate) fn unix_time(value: &Value, key: &str) -> Option<UtcDateTime> {
    let seconds = match value.get(key)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }?;
    UtcDateTime::from_unix_seconds(seconds).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_flag_must_be_literal_true() {
        assert!(RawPayload::new(json!({"success": true})).is_success());
        assert!(!RawPayload::new(json!({"success": false})).is_success());
        assert!(!RawPayload::new(json!({"success": "true"})).is_success());
        assert!(!RawPayload::new(json!({"data": []})).is_success());
        assert!(!RawPayload::new(json!([1, 2])).is_success());
    }

    #[test]
    fn items_require_successful_envelope() {
        let ok = RawPayload::new(json!({"success": true, "data": [{"id": 1}]}));
        assert_eq!(ok.items().map(<[Value]>::len), Some(1));

        let failed = RawPayload::new(json!({"success": false, "data": [{"id": 1}]}));
        assert_eq!(failed.items(), None);
    }

    #[test]
    fn field_helpers_are_lenient_about_representation() {
        let item = json!({
            "id": 1234,
            "likes": "17",
            "shares": 3.0,
            "rating": "4.5",
            "blank": "   ",
            "taken_at": 1_700_000_000,
        });

        assert_eq!(text(&item, "id").as_deref(), Some("1234"));
        assert_eq!(text(&item, "blank"), None);
        assert_eq!(count(&item, "likes"), 17);
        assert_eq!(count(&item, "shares"), 3);
        assert_eq!(count(&item, "missing"), 0);
        assert_eq!(float(&item, "rating"), Some(4.5));
        assert_eq!(
            unix_time(&item, "taken_at").map(|at| at.format_rfc3339()),
            Some(String::from("2023-11-14T22:13:20Z"))
        );
    }
}
