use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{EvalboxError, Result};

/// Source languages a candidate file may be written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateLanguage {
    #[default]
    Python,
    JavaScript,
}

impl CandidateLanguage {
    pub fn label(&self) -> &'static str {
        match self {
            CandidateLanguage::Python => "Python",
            CandidateLanguage::JavaScript => "JavaScript",
        }
    }

    pub fn file_extensions(&self) -> &'static [&'static str] {
        match self {
            CandidateLanguage::Python => &["py"],
            CandidateLanguage::JavaScript => &["js", "cjs"],
        }
    }

    pub fn all() -> &'static [CandidateLanguage] {
        &[CandidateLanguage::Python, CandidateLanguage::JavaScript]
    }

    /// Resolve the language from the candidate's file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        Self::all()
            .iter()
            .copied()
            .find(|lang| lang.file_extensions().contains(&ext.as_str()))
            .ok_or_else(|| {
                EvalboxError::UnsupportedCandidate(format!(
                    "{} (expected one of: .py, .js, .cjs)",
                    path.display()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(
            CandidateLanguage::from_path(Path::new("a/initial_program.py")).unwrap(),
            CandidateLanguage::Python
        );
        assert_eq!(
            CandidateLanguage::from_path(Path::new("solver.CJS")).unwrap(),
            CandidateLanguage::JavaScript
        );
    }

    #[test]
    fn test_unsupported_extension() {
        let err = CandidateLanguage::from_path(Path::new("main.go")).unwrap_err();
        assert!(matches!(err, EvalboxError::UnsupportedCandidate(_)));
        assert!(CandidateLanguage::from_path(Path::new("Makefile")).is_err());
    }
}
