//! Dotted JSON field paths such as `prescription.id` or `items.0.id`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CaptureError;

/// A parsed field path. Numeric segments index into arrays, everything else is an object key.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, CaptureError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CaptureError::InvalidFieldPath(raw.to_string()));
        }

        let segments: Vec<String> = trimmed.split('.').map(str::to_string).collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(CaptureError::InvalidFieldPath(raw.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walk `document` along the path.
    pub fn resolve<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(document, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index)),
                _ => None,
            })
    }
}

/// String form of an extracted value. `null` has none.
pub fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = CaptureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_empty_and_hollow_paths() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("   ").is_err());
        assert!(FieldPath::parse("prescription..id").is_err());
        assert!(FieldPath::parse(".id").is_err());
    }

    #[test]
    fn resolves_nested_objects_and_array_indices() {
        let doc = json!({
            "prescription": { "id": "rx-17" },
            "prescriptions": [ { "id": 3 }, { "id": 4 } ]
        });

        let nested = FieldPath::parse("prescription.id").unwrap();
        assert_eq!(nested.resolve(&doc), Some(&json!("rx-17")));

        let indexed = FieldPath::parse("prescriptions.1.id").unwrap();
        assert_eq!(indexed.resolve(&doc), Some(&json!(4)));

        let missing = FieldPath::parse("prescription.patient").unwrap();
        assert!(missing.resolve(&doc).is_none());

        let through_scalar = FieldPath::parse("prescription.id.value").unwrap();
        assert!(through_scalar.resolve(&doc).is_none());
    }

    #[test]
    fn renders_scalars_like_json_text() {
        assert_eq!(render(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(render(&json!(42)).as_deref(), Some("42"));
        assert_eq!(render(&json!(true)).as_deref(), Some("true"));
        assert_eq!(render(&json!({"a": 1})).as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(render(&Value::Null), None);
    }

    #[test]
    fn serde_uses_dotted_string_form() {
        let path: FieldPath = serde_json::from_str("\"prescription.id\"").unwrap();
        assert_eq!(path.segments(), ["prescription", "id"]);
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"prescription.id\"");
        assert!(serde_json::from_str::<FieldPath>("\"a..b\"").is_err());
    }
}
