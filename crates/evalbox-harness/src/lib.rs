//! Deadline-bounded evaluation of candidate programs.
//!
//! [`run_with_timeout`] loads a candidate file, runs its entry operation in a
//! separate process group, and reports a single [`EvaluationOutcome`]. The
//! candidate is killed once the deadline passes; a candidate that finishes
//! exactly at the deadline is reported as timed out.

pub mod executor;
pub mod loader;
pub mod normalizer;
pub mod output;

use std::path::Path;
use std::time::Duration;

use tracing::Instrument;

pub use evalbox_core::{CandidateLanguage, ErrorKind, EvaluationOutcome, HarnessConfig};
pub use loader::CandidateUnit;

/// Upper bound for deadlines given as huge or infinite seconds.
const MAX_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Runs candidates with a fixed [`HarnessConfig`]. Holds no per-call state,
/// so one evaluator can serve concurrent evaluations.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    config: HarnessConfig,
}

impl Evaluator {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Evaluate the candidate at `path`, abandoning it after `deadline`.
    pub async fn evaluate(&self, path: impl AsRef<Path>, deadline: Duration) -> EvaluationOutcome {
        let path = path.as_ref();

        if deadline.is_zero() {
            tracing::debug!("Zero deadline for {}, not starting candidate", path.display());
            return EvaluationOutcome::TimedOut { limit: deadline };
        }

        let unit = match loader::load(path, &self.config).await {
            Ok(unit) => unit,
            Err(e) => {
                tracing::info!("Candidate {} failed to load: {}", path.display(), e);
                return normalizer::load_failure(e);
            }
        };

        let span = tracing::info_span!(
            "evaluation",
            id = %unit.id(),
            path = %unit.path().display(),
            language = unit.language().label(),
        );

        async {
            let raw = executor::execute(&unit, deadline, &self.config).await;
            let outcome = normalizer::normalize(raw, deadline);
            match &outcome {
                EvaluationOutcome::Success { .. } => tracing::info!("Candidate succeeded"),
                EvaluationOutcome::Failure { kind, message, .. } => {
                    tracing::info!(kind = %kind, "Candidate failed: {}", message)
                }
                EvaluationOutcome::TimedOut { limit } => {
                    tracing::info!("Candidate timed out after {:?}", limit)
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }
}

/// Convert caller-supplied seconds into a deadline. Non-positive and NaN
/// values map to zero; overly large values saturate.
pub fn deadline_from_secs(timeout_seconds: f64) -> Duration {
    if timeout_seconds.is_nan() || timeout_seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(timeout_seconds)
        .map(|d| d.min(MAX_DEADLINE))
        .unwrap_or(MAX_DEADLINE)
}

/// Evaluate the candidate at `path` with default settings.
pub async fn run_with_timeout(path: impl AsRef<Path>, timeout_seconds: f64) -> EvaluationOutcome {
    Evaluator::default()
        .evaluate(path, deadline_from_secs(timeout_seconds))
        .await
}

/// Blocking variant of [`run_with_timeout`] for callers without a runtime.
///
/// Must not be called from inside an async context.
pub fn run_with_timeout_blocking(path: impl AsRef<Path>, timeout_seconds: f64) -> EvaluationOutcome {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            return EvaluationOutcome::failure(
                ErrorKind::Unknown,
                format!("cannot start evaluation runtime: {e}"),
                String::new(),
            )
        }
    };
    runtime.block_on(run_with_timeout(path, timeout_seconds))
}
