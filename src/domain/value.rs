/// Fallback payload for log records whose tag this build does not know.
///
/// Kept as a closed sum type rather than re-exporting `serde_json::Value` so
/// the rest of the crate cannot grow accidental dependencies on payload
/// internals. Never written back to disk.
#[derive(Clone, Debug, PartialEq)]
pub enum LogValue {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    Object(Vec<(String, LogValue)>),
    Array(Vec<LogValue>),
}

impl LogValue {
    /// Converts a parsed JSON value, attempting each primitive shape in a
    /// fixed order (string, number, bool, null) before the containers.
    pub fn from_json(value: &serde_json::Value) -> Self {
        if let Some(text) = value.as_str() {
            return Self::String(text.to_string());
        }
        if let Some(number) = value.as_f64() {
            return Self::Number(number);
        }
        if let Some(flag) = value.as_bool() {
            return Self::Bool(flag);
        }
        if value.is_null() {
            return Self::Null;
        }
        if let Some(object) = value.as_object() {
            return Self::Object(
                object
                    .iter()
                    .map(|(key, entry)| (key.clone(), Self::from_json(entry)))
                    .collect(),
            );
        }
        if let Some(items) = value.as_array() {
            return Self::Array(items.iter().map(Self::from_json).collect());
        }
        Self::Null
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&LogValue> {
        match self {
            Self::Object(entries) => entries
                .iter()
                .find(|(entry_key, _)| entry_key == key)
                .map(|(_, entry)| entry),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_string_stays_a_string() {
        let value: serde_json::Value = serde_json::from_str(r#""42""#).expect("json");
        assert_eq!(LogValue::from_json(&value), LogValue::String("42".to_string()));
    }

    #[test]
    fn object_keeps_declaration_order() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"zeta":1,"alpha":{"nested":true},"mid":null}"#).expect("json");
        let converted = LogValue::from_json(&value);
        let LogValue::Object(entries) = &converted else {
            panic!("expected object");
        };
        let keys = entries.iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(
            converted.get("alpha").and_then(|v| v.get("nested")),
            Some(&LogValue::Bool(true))
        );
    }

    #[test]
    fn arrays_and_numbers_convert() {
        let value: serde_json::Value = serde_json::from_str(r#"[1, "two", null]"#).expect("json");
        assert_eq!(
            LogValue::from_json(&value),
            LogValue::Array(vec![
                LogValue::Number(1.0),
                LogValue::String("two".to_string()),
                LogValue::Null,
            ])
        );
    }
}
