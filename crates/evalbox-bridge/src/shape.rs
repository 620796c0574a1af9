//! Inspection of raw chat-completion responses.
//!
//! Bridges that claim OpenAI compatibility do not always return the schema
//! they advertise. This module describes what actually came back, without
//! failing on anything unexpected.

use serde::Serialize;
use serde_json::Value;

const BODY_PREVIEW_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonKind {
    Object,
    Array,
    String,
    Number,
    Bool,
    Null,
}

impl JsonKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => JsonKind::Object,
            Value::Array(_) => JsonKind::Array,
            Value::String(_) => JsonKind::String,
            Value::Number(_) => JsonKind::Number,
            Value::Bool(_) => JsonKind::Bool,
            Value::Null => JsonKind::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatShapeReport {
    pub status: u16,
    pub content_type: Option<String>,
    /// Body preview, cut at a fixed number of characters
    pub body: String,
    /// `None` when the body is not JSON at all
    pub json_kind: Option<JsonKind>,
    /// The body was a JSON string that itself held a JSON object
    pub double_encoded: bool,
    pub keys: Vec<String>,
    pub has_choices: bool,
    pub choice_count: usize,
    pub first_content: Option<String>,
}

impl ChatShapeReport {
    pub fn from_body(status: u16, content_type: Option<String>, body: &str) -> Self {
        let mut report = ChatShapeReport {
            status,
            content_type,
            body: body.chars().take(BODY_PREVIEW_CHARS).collect(),
            json_kind: None,
            double_encoded: false,
            keys: Vec::new(),
            has_choices: false,
            choice_count: 0,
            first_content: None,
        };

        let Ok(parsed) = serde_json::from_str::<Value>(body) else {
            return report;
        };
        report.json_kind = Some(JsonKind::of(&parsed));

        let object = match parsed {
            Value::Object(map) => map,
            Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
                Ok(Value::Object(map)) => {
                    report.double_encoded = true;
                    map
                }
                _ => return report,
            },
            _ => return report,
        };

        report.keys = object.keys().cloned().collect();
        if let Some(Value::Array(choices)) = object.get("choices") {
            report.has_choices = true;
            report.choice_count = choices.len();
            report.first_content = choices
                .first()
                .and_then(|c| c.pointer("/message/content"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        report
    }

    pub fn is_openai_compatible(&self) -> bool {
        (200..300).contains(&self.status)
            && self.json_kind == Some(JsonKind::Object)
            && self.has_choices
            && self.first_content.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_shape() {
        let body = r#"{"id":"x","object":"chat.completion","choices":[{"index":0,"message":{"role":"assistant","content":"Hi there!"}}]}"#;
        let report = ChatShapeReport::from_body(200, Some("application/json".to_string()), body);
        assert_eq!(report.json_kind, Some(JsonKind::Object));
        assert!(report.has_choices);
        assert_eq!(report.choice_count, 1);
        assert_eq!(report.first_content.as_deref(), Some("Hi there!"));
        assert!(report.keys.contains(&"object".to_string()));
        assert!(report.is_openai_compatible());
    }

    #[test]
    fn test_double_encoded_body() {
        let inner = r#"{"choices":[{"message":{"content":"Hi"}}]}"#;
        let body = serde_json::to_string(inner).unwrap();
        let report = ChatShapeReport::from_body(200, None, &body);
        assert_eq!(report.json_kind, Some(JsonKind::String));
        assert!(report.double_encoded);
        assert_eq!(report.first_content.as_deref(), Some("Hi"));
        assert!(!report.is_openai_compatible());
    }

    #[test]
    fn test_plain_text_body() {
        let report = ChatShapeReport::from_body(502, Some("text/plain".to_string()), "Bad Gateway");
        assert_eq!(report.json_kind, None);
        assert!(report.keys.is_empty());
        assert!(!report.has_choices);
        assert_eq!(report.body, "Bad Gateway");
    }

    #[test]
    fn test_body_preview_is_bounded() {
        let body = "z".repeat(10_000);
        let report = ChatShapeReport::from_body(200, None, &body);
        assert_eq!(report.body.chars().count(), BODY_PREVIEW_CHARS);
    }
}
