//! Lenient decoding of node property values.
//!
//! Graph descriptions are produced by an editor that stores numbers as strings,
//! booleans as `"True"`/`1`, and pairs as either `[w, h]` or `"w,h"`. These
//! helpers are used with `#[serde(deserialize_with = "...")]` on typed node
//! configurations so that the coercion happens once, at load time.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reads an integer from a number (rounded) or numeric string.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Reads a float from a number or numeric string.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Reads a boolean from a bool, an integer or one of the usual spellings.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim() {
            "1" | "true" | "True" | "TRUE" => Some(true),
            "0" | "false" | "False" | "FALSE" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Reads a string; non-string scalars are rendered as JSON text.
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Reads an integer pair from `[a, b]` or a `"a,b"` / `"a;b"` / `"a b"` string.
pub fn as_pair(value: &Value) -> Option<(i64, i64)> {
    match value {
        Value::Array(items) if items.len() >= 2 => Some((as_i64(&items[0])?, as_i64(&items[1])?)),
        Value::String(s) => {
            let mut parts = s
                .split([',', ';', ' '])
                .map(str::trim)
                .filter(|p| !p.is_empty());
            let a = parts.next()?.parse::<i64>().ok()?;
            let b = parts.next()?.parse::<i64>().ok()?;
            Some((a, b))
        }
        Value::Number(_) => as_i64(value).map(|v| (v, v)),
        _ => None,
    }
}

fn expected<'de, D: Deserializer<'de>, T>(what: &str, got: &Value) -> Result<T, D::Error> {
    Err(D::Error::custom(format!("expected {}, got {}", what, got)))
}

/// Deserializes an `i32` leniently.
pub fn de_i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match as_i64(&value).and_then(|v| i32::try_from(v).ok()) {
        Some(v) => Ok(v),
        None => expected::<D, _>("integer", &value),
    }
}

/// Deserializes an `i64` leniently; floats are rounded.
pub fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match as_i64(&value) {
        Some(v) => Ok(v),
        None => expected::<D, _>("integer", &value),
    }
}

/// Deserializes an `f64` leniently.
pub fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match as_f64(&value) {
        Some(v) => Ok(v),
        None => expected::<D, _>("number", &value),
    }
}

/// Deserializes an optional `f64`; `null` and empty strings map to `None`.
pub fn de_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        other => match as_f64(other) {
            Some(v) => Ok(Some(v)),
            None => expected::<D, _>("number", other),
        },
    }
}

/// Deserializes an optional `i64`; `null` and empty strings map to `None`.
pub fn de_opt_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        other => match as_i64(other) {
            Some(v) => Ok(Some(v)),
            None => expected::<D, _>("integer", other),
        },
    }
}

/// Deserializes an optional `bool`; `null` and empty strings map to `None`.
pub fn de_opt_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        other => match as_bool(other) {
            Some(v) => Ok(Some(v)),
            None => expected::<D, _>("boolean", other),
        },
    }
}

/// Deserializes a `bool` leniently.
pub fn de_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match as_bool(&value) {
        Some(v) => Ok(v),
        None => expected::<D, _>("boolean", &value),
    }
}

/// Deserializes a `String`, rendering non-string scalars as text.
pub fn de_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(as_string(&value).unwrap_or_default())
}

/// Deserializes an integer pair from `[a, b]` or `"a,b"`.
pub fn de_pair<'de, D: Deserializer<'de>>(deserializer: D) -> Result<(i32, i32), D::Error> {
    let value = Value::deserialize(deserializer)?;
    match as_pair(&value)
        .and_then(|(a, b)| Some((i32::try_from(a).ok()?, i32::try_from(b).ok()?)))
    {
        Some(pair) => Ok(pair),
        None => expected::<D, _>("integer pair", &value),
    }
}

/// Deserializes an optional integer pair.
pub fn de_opt_pair<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<(i32, i32)>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match as_pair(&value)
        .and_then(|(a, b)| Some((i32::try_from(a).ok()?, i32::try_from(b).ok()?)))
    {
        Some(pair) => Ok(Some(pair)),
        None => expected::<D, _>("integer pair", &value),
    }
}

/// Deserializes a list of strings from an array or a single string.
///
/// Non-string array items and empty strings are dropped.
pub fn de_string_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s],
        _ => Vec::new(),
    })
}

/// Deserializes a string-to-string map from an object or from a string that
/// holds a JSON object.
pub fn de_string_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let object = match value {
        Value::Object(map) => map,
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            _ => return Ok(BTreeMap::new()),
        },
        _ => return Ok(BTreeMap::new()),
    };
    Ok(object
        .into_iter()
        .filter_map(|(k, v)| as_string(&v).map(|v| (k, v)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Props {
        #[serde(deserialize_with = "de_i32")]
        count: i32,
        #[serde(deserialize_with = "de_f64")]
        ratio: f64,
        #[serde(deserialize_with = "de_bool")]
        flag: bool,
        #[serde(deserialize_with = "de_pair")]
        size: (i32, i32),
        #[serde(default, deserialize_with = "de_string_list")]
        labels: Vec<String>,
        #[serde(default, deserialize_with = "de_opt_f64")]
        limit: Option<f64>,
    }

    #[test]
    fn test_string_encoded_values() {
        let props: Props = serde_json::from_value(json!({
            "count": "12",
            "ratio": "0.25",
            "flag": "True",
            "size": "832, 704",
            "labels": "scratch",
            "limit": ""
        }))
        .unwrap();
        assert_eq!(props.count, 12);
        assert_eq!(props.ratio, 0.25);
        assert!(props.flag);
        assert_eq!(props.size, (832, 704));
        assert_eq!(props.labels, vec!["scratch".to_string()]);
        assert_eq!(props.limit, None);
    }

    #[test]
    fn test_native_values() {
        let props: Props = serde_json::from_value(json!({
            "count": 7.6,
            "ratio": 1,
            "flag": 0,
            "size": [640, 480],
            "labels": ["a", "", 3, "b"],
            "limit": 5
        }))
        .unwrap();
        assert_eq!(props.count, 8);
        assert_eq!(props.ratio, 1.0);
        assert!(!props.flag);
        assert_eq!(props.size, (640, 480));
        assert_eq!(props.labels, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(props.limit, Some(5.0));
    }

    #[test]
    fn test_unconvertible_value_is_an_error() {
        let result: Result<Props, _> = serde_json::from_value(json!({
            "count": "many",
            "ratio": 0.1,
            "flag": true,
            "size": [1, 1]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_string_map_from_json_text() {
        #[derive(Deserialize)]
        struct M {
            #[serde(deserialize_with = "de_string_map")]
            mapping: BTreeMap<String, String>,
        }
        let m: M = serde_json::from_value(json!({"mapping": "{\"OK\": \"PASS\", \"n\": 1}"}))
            .unwrap();
        assert_eq!(m.mapping.get("OK").map(String::as_str), Some("PASS"));
        assert_eq!(m.mapping.get("n").map(String::as_str), Some("1"));
    }
}
