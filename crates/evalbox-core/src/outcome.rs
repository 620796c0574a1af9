use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Closed classification of a failed evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Candidate missing, unreadable, or without the expected entry operation.
    LoadError,
    /// Candidate raised while running its entry operation.
    RuntimeFault,
    /// Candidate hit a memory, recursion, or CPU limit.
    ResourceExhausted,
    Unknown,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::LoadError => "LoadError",
            ErrorKind::RuntimeFault => "RuntimeFault",
            ErrorKind::ResourceExhausted => "ResourceExhausted",
            ErrorKind::Unknown => "Unknown",
        }
    }

    /// Wire name, as it appears in the serialized `kind` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LoadError => "load_error",
            ErrorKind::RuntimeFault => "runtime_fault",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one evaluation. Exactly one branch is ever populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    Success {
        value: serde_json::Value,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        trace: String,
    },
    #[serde(rename = "timeout")]
    TimedOut {
        #[serde(with = "duration_secs")]
        limit: Duration,
    },
}

impl EvaluationOutcome {
    pub fn failure(kind: ErrorKind, message: impl Into<String>, trace: impl Into<String>) -> Self {
        EvaluationOutcome::Failure {
            kind,
            message: message.into(),
            trace: trace.into(),
        }
    }

    pub fn load_error(message: impl Into<String>) -> Self {
        Self::failure(ErrorKind::LoadError, message, String::new())
    }

    pub fn status(&self) -> &'static str {
        match self {
            EvaluationOutcome::Success { .. } => "success",
            EvaluationOutcome::Failure { .. } => "failure",
            EvaluationOutcome::TimedOut { .. } => "timeout",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, EvaluationOutcome::Success { .. })
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            EvaluationOutcome::Success { value } => Some(value),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            EvaluationOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Serializes a `Duration` as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let timed_out = EvaluationOutcome::TimedOut {
            limit: Duration::from_secs(1),
        };
        assert_eq!(
            serde_json::to_value(&timed_out).unwrap(),
            json!({"status": "timeout", "limit": 1.0})
        );

        let failure = EvaluationOutcome::failure(ErrorKind::RuntimeFault, "boom", "Traceback");
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({
                "status": "failure",
                "kind": "runtime_fault",
                "message": "boom",
                "trace": "Traceback"
            })
        );

        let success = EvaluationOutcome::Success { value: json!([1, 2]) };
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({"status": "success", "value": [1, 2]})
        );
    }

    #[test]
    fn test_as_str_matches_wire_name() {
        for kind in [
            ErrorKind::LoadError,
            ErrorKind::RuntimeFault,
            ErrorKind::ResourceExhausted,
            ErrorKind::Unknown,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }

    #[test]
    fn test_parse_timeout() {
        let parsed: EvaluationOutcome =
            serde_json::from_str(r#"{"status":"timeout","limit":2.5}"#).unwrap();
        assert_eq!(
            parsed,
            EvaluationOutcome::TimedOut {
                limit: Duration::from_millis(2500)
            }
        );
        assert_eq!(parsed.status(), "timeout");
        assert!(parsed.value().is_none());
    }

    #[test]
    fn test_accessors() {
        let outcome = EvaluationOutcome::load_error("candidate not found");
        assert_eq!(outcome.error_kind(), Some(ErrorKind::LoadError));
        assert!(!outcome.is_success());
        assert_eq!(ErrorKind::ResourceExhausted.to_string(), "ResourceExhausted");
    }
}
