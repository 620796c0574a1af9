pub mod config;
pub mod error;
pub mod language;
pub mod outcome;

pub use config::{EvalboxConfig, HarnessConfig, LlmConfig, ModelEntry};
pub use error::{EvalboxError, Result};
pub use language::CandidateLanguage;
pub use outcome::{ErrorKind, EvaluationOutcome};
