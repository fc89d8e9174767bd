//! Lenient field decoders for request payloads.
//!
//! Clients send identifiers as either strings or numbers and flags as
//! `true`, `"true"`, `1` or `"1"`. These are used with
//! `#[serde(default, deserialize_with = "...")]` on `Option` fields.

use serde::{Deserialize, Deserializer, de::Error};
use serde_json::Value;

/// Accept a string or a number, yielding its string form.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string or number, found {other}"
        ))),
    }
}

/// Accept an integer or a string holding one.
pub fn int_like<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse::<i32>().ok(),
        Some(_) => None,
    };

    parsed
        .map(Some)
        .ok_or_else(|| D::Error::custom("expected an integer"))
}

/// Accept a boolean-like value. Anything other than the true spellings is `false`.
pub fn bool_like<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|value| match value {
        Value::Null => None,
        other => Some(is_truthy(&other)),
    }))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s == "true" || s == "1",
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "string_or_number")]
        id: Option<String>,
        #[serde(default, deserialize_with = "int_like")]
        order: Option<i32>,
        #[serde(default, deserialize_with = "bool_like")]
        flag: Option<bool>,
    }

    fn probe(value: Value) -> Probe {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_missing_fields_are_none() {
        let p = probe(json!({}));
        assert!(p.id.is_none());
        assert!(p.order.is_none());
        assert!(p.flag.is_none());
    }

    #[test]
    fn test_string_or_number() {
        assert_eq!(probe(json!({"id": 30111222})).id.as_deref(), Some("30111222"));
        assert_eq!(probe(json!({"id": "30111222"})).id.as_deref(), Some("30111222"));
        assert!(serde_json::from_value::<Probe>(json!({"id": [1]})).is_err());
    }

    #[test]
    fn test_int_like() {
        assert_eq!(probe(json!({"order": 7})).order, Some(7));
        assert_eq!(probe(json!({"order": " 12 "})).order, Some(12));
        assert!(serde_json::from_value::<Probe>(json!({"order": "abc"})).is_err());
    }

    #[test]
    fn test_bool_like_spellings() {
        for truthy in [json!(true), json!("true"), json!(1), json!("1")] {
            assert_eq!(probe(json!({ "flag": truthy })).flag, Some(true));
        }
        for falsy in [json!(false), json!("yes"), json!(0), json!(2)] {
            assert_eq!(probe(json!({ "flag": falsy })).flag, Some(false));
        }
        assert_eq!(probe(json!({"flag": null})).flag, None);
    }
}
