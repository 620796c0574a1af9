use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use evalbox_core::HarnessConfig;
use tokio::process::Command;

use crate::loader::CandidateUnit;
use crate::normalizer::DriverReport;
use crate::output::{self, CapturedOutput};

/// Environment variable naming the file the driver writes its report to.
pub const REPORT_ENV: &str = "EVALBOX_RESULT";

/// How long pipes may stay open after the candidate is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Drain grace once the deadline has already passed.
const EXPIRED_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// What the driver left behind in its report file.
#[derive(Debug)]
pub enum ReportRead {
    Present(DriverReport),
    Missing,
    Malformed(String),
}

/// Raw result of racing a candidate against its deadline.
#[derive(Debug)]
pub enum RawExecution {
    Exited {
        status: ExitStatus,
        report: ReportRead,
        stdout: CapturedOutput,
        stderr: CapturedOutput,
        elapsed: Duration,
    },
    DeadlineExpired {
        elapsed: Duration,
    },
    SpawnFailed {
        program: String,
        error: io::Error,
    },
    WaitFailed(io::Error),
}

/// Run `unit` under `deadline`.
///
/// The candidate leads its own process group. Whatever the outcome, the
/// whole group receives SIGKILL before this returns, and the direct child is
/// reaped. A child that exits at or after the deadline counts as expired.
pub async fn execute(unit: &CandidateUnit, deadline: Duration, config: &HarnessConfig) -> RawExecution {
    let program = unit.interpreter(config);
    let mut cmd = Command::new(program);
    cmd.args(unit.interpreter_flags(config))
        .arg(unit.driver_path())
        .arg(unit.path())
        .arg(unit.entry())
        .env(REPORT_ENV, unit.report_path())
        .current_dir(unit.working_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    isolate(&mut cmd, unit.address_space_limit(config));

    let start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(error) => {
            return RawExecution::SpawnFailed {
                program: program.to_string(),
                error,
            }
        }
    };

    let pid = child.id();
    tracing::debug!("Spawned {} (pid {:?}) with deadline {:?}", program, pid, deadline);

    let stdout = output::spawn_drain(child.stdout.take(), config.output_limit_bytes);
    let stderr = output::spawn_drain(child.stderr.take(), config.output_limit_bytes);

    let waited = tokio::time::timeout(deadline, child.wait()).await;
    let elapsed = start.elapsed();

    // Reclaim stragglers even after a clean exit.
    reclaim_group(pid);

    match waited {
        Ok(Ok(status)) if !deadline_won(elapsed, deadline) => {
            let (stdout, stderr) = tokio::join!(
                output::collect(stdout, DRAIN_GRACE),
                output::collect(stderr, DRAIN_GRACE)
            );
            let report = read_report(unit.report_path()).await;
            tracing::debug!("Candidate exited with {} after {:?}", status, elapsed);
            RawExecution::Exited {
                status,
                report,
                stdout,
                stderr,
                elapsed,
            }
        }
        Ok(Ok(status)) => {
            tracing::debug!(
                "Candidate exited with {} at {:?}, not before the {:?} deadline",
                status,
                elapsed,
                deadline
            );
            discard_output(stdout, stderr).await;
            RawExecution::DeadlineExpired { elapsed }
        }
        Ok(Err(e)) => {
            tracing::warn!("Waiting on candidate failed: {}", e);
            if let Err(kill_err) = child.kill().await {
                tracing::debug!("Kill after wait failure: {}", kill_err);
            }
            discard_output(stdout, stderr).await;
            RawExecution::WaitFailed(e)
        }
        Err(_) => {
            tracing::warn!("Candidate exceeded {:?}, killed process group", deadline);
            if let Err(e) = child.kill().await {
                tracing::debug!("Reaping timed-out candidate: {}", e);
            }
            discard_output(stdout, stderr).await;
            RawExecution::DeadlineExpired {
                elapsed: start.elapsed(),
            }
        }
    }
}

/// A child that exits at or after the deadline counts as expired.
fn deadline_won(elapsed: Duration, deadline: Duration) -> bool {
    elapsed >= deadline
}

async fn discard_output(
    stdout: Option<tokio::task::JoinHandle<CapturedOutput>>,
    stderr: Option<tokio::task::JoinHandle<CapturedOutput>>,
) {
    let (out, err) = tokio::join!(
        output::collect(stdout, EXPIRED_DRAIN_GRACE),
        output::collect(stderr, EXPIRED_DRAIN_GRACE)
    );
    tracing::trace!(
        "Discarded {} stdout / {} stderr bytes",
        out.total_bytes(),
        err.total_bytes()
    );
}

async fn read_report(path: &Path) -> ReportRead {
    match tokio::fs::read_to_string(path).await {
        Ok(body) => match DriverReport::parse(&body) {
            Ok(report) => ReportRead::Present(report),
            Err(e) => ReportRead::Malformed(e.to_string()),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => ReportRead::Missing,
        Err(e) => ReportRead::Malformed(e.to_string()),
    }
}

#[cfg(unix)]
fn isolate(cmd: &mut Command, address_space: Option<u64>) {
    use nix::sys::resource::{setrlimit, Resource};
    use nix::unistd::{setpgid, Pid};

    // SAFETY: the closure runs between fork and exec and only makes the
    // async-signal-safe setpgid/setrlimit calls.
    unsafe {
        cmd.pre_exec(move || {
            setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(io::Error::from)?;
            if let Some(bytes) = address_space {
                setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(io::Error::from)?;
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command, address_space: Option<u64>) {
    if address_space.is_some() {
        tracing::warn!("memory_limit_mb is only enforced on unix");
    }
}

#[cfg(unix)]
fn reclaim_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    let pgid = Pid::from_raw(pid as i32);
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => tracing::trace!("Sent SIGKILL to process group {}", pgid),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!("killpg({}) failed: {}", pgid, e),
    }
}

#[cfg(not(unix))]
fn reclaim_group(_pid: Option<u32>) {}
