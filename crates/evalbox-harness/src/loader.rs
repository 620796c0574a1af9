//! Candidate loading.
//!
//! A candidate is "loaded" by validating its file and materializing a
//! language driver next to a fresh result file. The driver performs the
//! actual dynamic import inside the child process, so import-time faults
//! surface as driver reports rather than harness errors.

use std::path::{Path, PathBuf};

use evalbox_core::{CandidateLanguage, EvalboxError, HarnessConfig, Result};
use tempfile::TempDir;
use uuid::Uuid;

const PYTHON_DRIVER: &str = include_str!("drivers/python_driver.py");
const JS_DRIVER: &str = include_str!("drivers/js_driver.js");

const REPORT_FILE: &str = "report.json";

/// A candidate ready to run. Owns its scratch directory; dropping the unit
/// removes the driver and report files.
#[derive(Debug)]
pub struct CandidateUnit {
    id: Uuid,
    path: PathBuf,
    language: CandidateLanguage,
    entry: String,
    driver_path: PathBuf,
    report_path: PathBuf,
    scratch: TempDir,
}

impl CandidateUnit {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn language(&self) -> CandidateLanguage {
        self.language
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn driver_path(&self) -> &Path {
        &self.driver_path
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Directory the candidate runs in, so relative data files resolve.
    pub fn working_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| self.scratch.path())
    }

    pub fn interpreter<'a>(&self, config: &'a HarnessConfig) -> &'a str {
        match self.language {
            CandidateLanguage::Python => &config.python,
            CandidateLanguage::JavaScript => &config.node,
        }
    }

    /// Interpreter flags placed before the driver script.
    pub fn interpreter_flags(&self, config: &HarnessConfig) -> Vec<String> {
        match (self.language, config.memory_limit_mb) {
            (CandidateLanguage::JavaScript, Some(mb)) => {
                vec![format!("--max-old-space-size={mb}")]
            }
            _ => Vec::new(),
        }
    }

    /// Byte cap for `RLIMIT_AS`. V8 reserves far more address space than it
    /// uses at startup, so node candidates are capped by heap size instead.
    pub fn address_space_limit(&self, config: &HarnessConfig) -> Option<u64> {
        match self.language {
            CandidateLanguage::Python => config
                .memory_limit_mb
                .map(|mb| mb.saturating_mul(1024 * 1024)),
            CandidateLanguage::JavaScript => None,
        }
    }
}

fn driver_source(language: CandidateLanguage) -> (&'static str, &'static str) {
    match language {
        CandidateLanguage::Python => ("driver.py", PYTHON_DRIVER),
        CandidateLanguage::JavaScript => ("driver.js", JS_DRIVER),
    }
}

fn candidate_err(path: &Path, e: impl std::fmt::Display) -> EvalboxError {
    EvalboxError::Candidate(format!("{}: {}", path.display(), e))
}

/// Validate `path` and prepare a [`CandidateUnit`] for it.
///
/// Fails without spawning anything when the file is missing, unreadable,
/// not a regular file, or of an unsupported type.
pub async fn load(path: &Path, config: &HarnessConfig) -> Result<CandidateUnit> {
    config.validate()?;

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| candidate_err(path, e))?;
    if !metadata.is_file() {
        return Err(candidate_err(path, "not a regular file"));
    }

    let language = CandidateLanguage::from_path(path)?;

    // Opening proves readability without pulling the whole file in.
    tokio::fs::File::open(path)
        .await
        .map_err(|e| candidate_err(path, e))?;
    let path = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| candidate_err(path, e))?;

    let id = Uuid::new_v4();
    let scratch = tempfile::Builder::new()
        .prefix(&format!("evalbox-{}-", id.simple()))
        .tempdir()?;

    let (driver_name, source) = driver_source(language);
    let driver_path = scratch.path().join(driver_name);
    tokio::fs::write(&driver_path, source).await?;

    tracing::debug!(
        "Loaded {} candidate {} (entry `{}`)",
        language.label(),
        path.display(),
        config.entry
    );

    Ok(CandidateUnit {
        id,
        report_path: scratch.path().join(REPORT_FILE),
        path,
        language,
        entry: config.entry.trim().to_string(),
        driver_path,
        scratch,
    })
}
