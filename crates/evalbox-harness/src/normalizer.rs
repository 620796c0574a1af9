use std::time::Duration;

use evalbox_core::{ErrorKind, EvalboxError, EvaluationOutcome};
use serde::Deserialize;

use crate::executor::{RawExecution, ReportRead};
use crate::output::CapturedOutput;

/// Interpreter diagnostics that mean the candidate ran out of memory.
const EXHAUSTION_MARKERS: &[&str] = &[
    "MemoryError",
    "out of memory",
    "Fatal process OOM",
    "heap out of memory",
];

/// Report written by a language driver inside the candidate process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriverReport {
    Success {
        #[serde(default)]
        value: serde_json::Value,
    },
    Failure {
        kind: ErrorKind,
        #[serde(default)]
        error_type: String,
        message: String,
        #[serde(default)]
        trace: String,
    },
}

impl DriverReport {
    pub fn parse(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }
}

/// Map a loader error onto the outcome taxonomy.
pub fn load_failure(err: EvalboxError) -> EvaluationOutcome {
    let message = match err {
        EvalboxError::Candidate(msg) => format!("cannot load candidate {msg}"),
        EvalboxError::UnsupportedCandidate(msg) => format!("unsupported candidate type {msg}"),
        EvalboxError::Config(msg) => format!("invalid evaluator settings: {msg}"),
        other => format!("cannot prepare candidate: {other}"),
    };
    EvaluationOutcome::load_error(message)
}

/// Collapse a raw execution into exactly one outcome branch.
pub fn normalize(raw: RawExecution, limit: Duration) -> EvaluationOutcome {
    match raw {
        RawExecution::DeadlineExpired { .. } => EvaluationOutcome::TimedOut { limit },
        RawExecution::SpawnFailed { program, error } => EvaluationOutcome::failure(
            ErrorKind::LoadError,
            format!("cannot start interpreter `{program}`: {error}"),
            String::new(),
        ),
        RawExecution::WaitFailed(error) => EvaluationOutcome::failure(
            ErrorKind::Unknown,
            format!("lost track of candidate process: {error}"),
            String::new(),
        ),
        RawExecution::Exited {
            status,
            report,
            stdout,
            stderr,
            ..
        } => match report {
            ReportRead::Present(report) => from_report(report, &stderr),
            ReportRead::Missing => from_exit_status(status, &stdout, &stderr),
            ReportRead::Malformed(reason) => EvaluationOutcome::failure(
                ErrorKind::Unknown,
                format!("candidate report is unreadable: {reason}"),
                diagnostic(&stdout, &stderr),
            ),
        },
    }
}

fn from_report(report: DriverReport, stderr: &CapturedOutput) -> EvaluationOutcome {
    match report {
        DriverReport::Success { value } => EvaluationOutcome::Success { value },
        DriverReport::Failure {
            kind,
            error_type,
            message,
            trace,
        } => {
            let message = if error_type.is_empty() || message.starts_with(&error_type) {
                message
            } else {
                format!("{error_type}: {message}")
            };
            let trace = if trace.trim().is_empty() {
                stderr.text()
            } else {
                trace
            };
            EvaluationOutcome::Failure {
                kind,
                message,
                trace,
            }
        }
    }
}

#[cfg(unix)]
fn terminating_signal(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: std::process::ExitStatus) -> Option<i32> {
    None
}

fn from_exit_status(
    status: std::process::ExitStatus,
    stdout: &CapturedOutput,
    stderr: &CapturedOutput,
) -> EvaluationOutcome {
    let trace = diagnostic(stdout, stderr);

    if let Some(signal) = terminating_signal(status) {
        // The harness only signals after the deadline, so a kill here came
        // from the kernel (OOM killer) or an rlimit. V8 aborts on heap OOM.
        let kind = if is_resource_signal(signal) || mentions_exhaustion(&trace) {
            ErrorKind::ResourceExhausted
        } else {
            ErrorKind::RuntimeFault
        };
        return EvaluationOutcome::failure(
            kind,
            format!("candidate terminated by signal {signal}"),
            trace,
        );
    }

    match status.code() {
        Some(0) => EvaluationOutcome::failure(
            ErrorKind::Unknown,
            "candidate exited without reporting a result",
            trace,
        ),
        Some(code) => {
            let kind = if mentions_exhaustion(&trace) {
                ErrorKind::ResourceExhausted
            } else {
                ErrorKind::RuntimeFault
            };
            EvaluationOutcome::failure(kind, format!("candidate exited with code {code}"), trace)
        }
        None => EvaluationOutcome::failure(
            ErrorKind::Unknown,
            format!("candidate ended with {status}"),
            trace,
        ),
    }
}

#[cfg(unix)]
fn is_resource_signal(signal: i32) -> bool {
    use nix::sys::signal::Signal;
    signal == Signal::SIGKILL as i32 || signal == Signal::SIGXCPU as i32
}

#[cfg(not(unix))]
fn is_resource_signal(_signal: i32) -> bool {
    false
}

fn mentions_exhaustion(trace: &str) -> bool {
    EXHAUSTION_MARKERS.iter().any(|marker| trace.contains(marker))
}

fn diagnostic(stdout: &CapturedOutput, stderr: &CapturedOutput) -> String {
    if !stderr.is_empty() {
        stderr.text()
    } else {
        stdout.text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exited(status: std::process::ExitStatus, report: ReportRead) -> RawExecution {
        RawExecution::Exited {
            status,
            report,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput::default(),
            elapsed: Duration::from_millis(30),
        }
    }

    #[cfg(unix)]
    fn status_from_raw(raw: i32) -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(raw)
    }

    #[test]
    fn test_parse_failure_report() {
        let report = DriverReport::parse(
            r#"{"status":"failure","kind":"runtime_fault","error_type":"ValueError","message":"bad radius","trace":"Traceback ..."}"#,
        )
        .unwrap();
        assert_eq!(
            report,
            DriverReport::Failure {
                kind: ErrorKind::RuntimeFault,
                error_type: "ValueError".to_string(),
                message: "bad radius".to_string(),
                trace: "Traceback ...".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_report_kind_rejected() {
        assert!(DriverReport::parse(r#"{"status":"failure","kind":"segfault","message":""}"#).is_err());
    }

    #[test]
    fn test_deadline_maps_to_timeout() {
        let outcome = normalize(
            RawExecution::DeadlineExpired {
                elapsed: Duration::from_millis(1003),
            },
            Duration::from_secs(1),
        );
        assert_eq!(
            outcome,
            EvaluationOutcome::TimedOut {
                limit: Duration::from_secs(1)
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_report_wins_over_exit_status() {
        let outcome = normalize(
            exited(
                status_from_raw(0),
                ReportRead::Present(DriverReport::Success {
                    value: json!({"sum_radii": 2.63}),
                }),
            ),
            Duration::from_secs(30),
        );
        assert_eq!(outcome.value(), Some(&json!({"sum_radii": 2.63})));

        let outcome = normalize(
            exited(
                status_from_raw(0),
                ReportRead::Present(DriverReport::Failure {
                    kind: ErrorKind::LoadError,
                    error_type: "AttributeError".to_string(),
                    message: "candidate does not define 'run'".to_string(),
                    trace: String::new(),
                }),
            ),
            Duration::from_secs(30),
        );
        match outcome {
            EvaluationOutcome::Failure { kind, message, .. } => {
                assert_eq!(kind, ErrorKind::LoadError);
                assert_eq!(message, "AttributeError: candidate does not define 'run'");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_classification() {
        let limit = Duration::from_secs(5);

        // Killed by SIGKILL without the harness asking: OOM killer.
        let outcome = normalize(exited(status_from_raw(9), ReportRead::Missing), limit);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ResourceExhausted));

        // SIGSEGV
        let outcome = normalize(exited(status_from_raw(11), ReportRead::Missing), limit);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::RuntimeFault));

        // exit(1) with no report
        let outcome = normalize(exited(status_from_raw(1 << 8), ReportRead::Missing), limit);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::RuntimeFault));

        // exit(0) with no report: the candidate bypassed the driver.
        let outcome = normalize(exited(status_from_raw(0), ReportRead::Missing), limit);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Unknown));

        let outcome = normalize(
            exited(status_from_raw(0), ReportRead::Malformed("EOF".to_string())),
            limit,
        );
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Unknown));
    }

    #[cfg(unix)]
    #[test]
    fn test_v8_abort_is_resource_exhausted() {
        let limit = Duration::from_secs(5);
        let stderr = CapturedOutput::from_text(
            "\n#\n# Fatal process OOM in Failed to reserve virtual memory for CodeRange\n#\n",
        );
        let raw = RawExecution::Exited {
            status: status_from_raw(5),
            report: ReportRead::Missing,
            stdout: CapturedOutput::default(),
            stderr,
            elapsed: Duration::from_millis(40),
        };
        match normalize(raw, limit) {
            EvaluationOutcome::Failure { kind, trace, .. } => {
                assert_eq!(kind, ErrorKind::ResourceExhausted);
                assert!(trace.contains("Fatal process OOM"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // SIGABRT after "Reached heap limit"
        let raw = RawExecution::Exited {
            status: status_from_raw(6),
            report: ReportRead::Missing,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput::from_text(
                "FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory\n",
            ),
            elapsed: Duration::from_millis(900),
        };
        assert_eq!(
            normalize(raw, limit).error_kind(),
            Some(ErrorKind::ResourceExhausted)
        );
    }

    #[test]
    fn test_spawn_failure_is_load_error() {
        let outcome = normalize(
            RawExecution::SpawnFailed {
                program: "python3".to_string(),
                error: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
            Duration::from_secs(1),
        );
        assert_eq!(outcome.error_kind(), Some(ErrorKind::LoadError));
    }

    #[test]
    fn test_load_failure_message() {
        let outcome = load_failure(EvalboxError::Candidate(
            "/tmp/missing.py: No such file or directory (os error 2)".to_string(),
        ));
        match outcome {
            EvaluationOutcome::Failure { kind, message, trace } => {
                assert_eq!(kind, ErrorKind::LoadError);
                assert!(message.starts_with("cannot load candidate /tmp/missing.py"));
                assert!(trace.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
