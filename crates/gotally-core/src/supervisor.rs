use std::future::Future;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;

use crate::aggregator::ResultAggregator;
use crate::config::RunConfig;
use crate::errors::{DecodeError, RunError, SupervisorError};
use crate::event::decode_line;
use crate::events::ProgressEvent;

/// Exit code the runner uses when it ran and some tests failed.
pub const TESTS_FAILED_EXIT: i32 = 1;

/// Exit code reported when no runner exit code could be observed.
pub const INTERNAL_FAILURE_EXIT: i32 = 2;

/// What the supervisor observed once the runner finished.
#[derive(Debug)]
pub struct RunOutcome {
    /// The runner's exit code, which becomes the program's own.
    pub exit_code: i32,
    /// Set when the runner ended with anything other than pass or test failure.
    pub abnormal: Option<SupervisorError>,
    /// The run was cancelled before the runner finished on its own.
    pub interrupted: bool,
    /// Lines that could not be decoded and were skipped.
    pub decode_errors: usize,
}

impl RunOutcome {
    pub fn tests_failed(&self) -> bool {
        self.exit_code == TESTS_FAILED_EXIT
    }
}

/// Runs the test runner as a subprocess and feeds its output to an aggregator.
pub struct Supervisor {
    config: RunConfig,
}

impl Supervisor {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the runner to completion.
    ///
    /// Every stdout line is decoded and applied in arrival order, and the pipe
    /// is drained to EOF before the process is waited on. Undecodable lines are
    /// logged and skipped. An aggregator fault kills the runner and stops the
    /// run. When `cancel` resolves first, the runner is killed and the results
    /// aggregated so far are kept.
    pub async fn run(
        &self,
        aggregator: &mut ResultAggregator,
        events: Option<&UnboundedSender<ProgressEvent>>,
        cancel: impl Future<Output = ()>,
    ) -> Result<RunOutcome, RunError> {
        tracing::debug!(command = %self.config.display(), "starting runner");

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        // safety: we set Stdio::piped() above so this is always Some
        let stdout = child.stdout.take().expect("stdout piped");
        let mut lines = BufReader::new(stdout).split(b'\n');

        let mut line_no = 0usize;
        let mut decode_errors = 0usize;
        let mut interrupted = false;
        tokio::pin!(cancel);

        loop {
            let next = tokio::select! {
                biased;
                () = &mut cancel => {
                    interrupted = true;
                    break;
                }
                next = lines.next_segment() => next,
            };

            let bytes = match next {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    terminate(&mut child).await;
                    return Err(SupervisorError::Read(e).into());
                }
            };
            line_no += 1;

            let line = String::from_utf8_lossy(&bytes);
            let event = match decode_line(&line) {
                Ok(event) => event,
                Err(DecodeError::Blank) => continue,
                Err(e) => {
                    decode_errors += 1;
                    tracing::warn!(line = line_no, error = %e, "skipping undecodable line");
                    continue;
                }
            };

            if let Err(fault) = aggregator.apply(event, events) {
                tracing::error!(line = line_no, error = %fault, "aggregation halted");
                terminate(&mut child).await;
                return Err(RunError::Fault {
                    line: line_no,
                    fault,
                });
            }
        }

        if interrupted {
            tracing::warn!(lines = line_no, "run interrupted, stopping runner");
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "runner already exited");
            }
        }

        let status = child.wait().await.map_err(SupervisorError::Wait)?;
        let (exit_code, abnormal) = classify_exit(status);

        let abnormal = if interrupted {
            None
        } else {
            abnormal
        };
        match &abnormal {
            Some(err) => tracing::error!(error = %err, "runner finished abnormally"),
            None if exit_code == TESTS_FAILED_EXIT => {
                tracing::debug!("runner reported test failures")
            }
            None => tracing::debug!(exit_code, "runner finished"),
        }

        Ok(RunOutcome {
            exit_code,
            abnormal,
            interrupted,
            decode_errors,
        })
    }
}

/// Kill the runner and reap it.
async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "runner already exited");
    }
    if let Err(e) = child.wait().await {
        tracing::debug!(error = %e, "failed to reap runner");
    }
}

/// Map a runner exit status to the program's exit code.
///
/// `0` (all passed) and `1` (tests failed) are ordinary outcomes; everything
/// else is returned alongside a [`SupervisorError`]. Termination by signal `N`
/// maps to `128 + N` on Unix.
pub fn classify_exit(status: ExitStatus) -> (i32, Option<SupervisorError>) {
    match status.code() {
        Some(code @ (0 | TESTS_FAILED_EXIT)) => (code, None),
        Some(code) => (code, Some(SupervisorError::AbnormalExit(code))),
        None => signal_exit(status),
    }
}

#[cfg(unix)]
fn signal_exit(status: ExitStatus) -> (i32, Option<SupervisorError>) {
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(signal) => (128 + signal, Some(SupervisorError::Signaled(signal))),
        None => (INTERNAL_FAILURE_EXIT, Some(SupervisorError::Unknown)),
    }
}

#[cfg(not(unix))]
fn signal_exit(_status: ExitStatus) -> (i32, Option<SupervisorError>) {
    (INTERNAL_FAILURE_EXIT, Some(SupervisorError::Unknown))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::aggregator::{PackageStatus, TestState};
    use crate::errors::AggregatorFault;
    use std::future;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn sh(script: &str) -> Supervisor {
        Supervisor::new(RunConfig::new("sh", ["-c", script]))
    }

    async fn run_script(script: &str) -> (Result<RunOutcome, RunError>, ResultAggregator) {
        let mut agg = ResultAggregator::new();
        let result = sh(script)
            .run(&mut agg, None, future::pending())
            .await;
        (result, agg)
    }

    const PASSING: &str = r#"printf '%s\n' \
        '{"Action":"start","Package":"p"}' \
        '{"Action":"run","Package":"p","Test":"T"}' \
        '{"Action":"pass","Package":"p","Test":"T","Elapsed":0.01}' \
        '{"Action":"pass","Package":"p","Elapsed":0.02}'"#;

    // -- exit code policy --

    #[tokio::test]
    async fn test_clean_exit() {
        let (result, agg) = run_script(PASSING).await;
        let outcome = result.expect("run should succeed");
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.abnormal.is_none());
        assert!(!outcome.interrupted);
        assert_eq!(
            agg.package("p").expect("p exists").status,
            PackageStatus::Passed
        );
    }

    #[tokio::test]
    async fn test_exit_one_is_ordinary() {
        let script = format!("{PASSING}; exit 1");
        let (result, _) = run_script(&script).await;
        let outcome = result.expect("run should succeed");
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.tests_failed());
        assert!(outcome.abnormal.is_none());
    }

    #[tokio::test]
    async fn test_other_exit_code_is_abnormal() {
        let (result, _) = run_script("exit 3").await;
        let outcome = result.expect("run should succeed");
        assert_eq!(outcome.exit_code, 3);
        assert!(matches!(
            outcome.abnormal,
            Some(SupervisorError::AbnormalExit(3))
        ));
    }

    #[tokio::test]
    async fn test_signal_maps_to_128_plus_signal() {
        let (result, _) = run_script("kill -TERM $$").await;
        let outcome = result.expect("run should succeed");
        assert_eq!(outcome.exit_code, 128 + 15);
        assert!(matches!(outcome.abnormal, Some(SupervisorError::Signaled(15))));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut agg = ResultAggregator::new();
        let supervisor = Supervisor::new(RunConfig::new(
            "/nonexistent/gotally-runner",
            Vec::<String>::new(),
        ));
        let err = supervisor
            .run(&mut agg, None, future::pending())
            .await
            .expect_err("spawn should fail");
        assert!(matches!(
            err,
            RunError::Supervisor(SupervisorError::Spawn { .. })
        ));
    }

    // -- stream handling --

    #[tokio::test]
    async fn test_malformed_line_does_not_disturb_later_lines() {
        let script = r#"printf '%s\n' \
            '{"Action":"run","Package":"p","Test":"T"}' \
            'not json at all' \
            '' \
            '{"Action":"output","Package":"p","Test":"T","Output":"still here"}' \
            '{"Action":"fail","Package":"p","Test":"T"}'; exit 1"#;
        let (result, agg) = run_script(script).await;
        let outcome = result.expect("run should succeed");
        assert_eq!(outcome.decode_errors, 1);
        let test = agg.test("p", "T").expect("T exists");
        assert_eq!(test.state, TestState::Failed);
        assert_eq!(test.output, vec!["still here"]);
    }

    #[tokio::test]
    async fn test_fault_stops_run() {
        let script = r#"printf '%s\n' \
            '{"Action":"start","Package":"p"}' \
            '{"Action":"output","Package":"p","Test":"Ghost","Output":"boo"}'; exec sleep 30"#;
        let (result, _) = tokio::time::timeout(Duration::from_secs(10), run_script(script))
            .await
            .expect("fault should stop the run promptly");
        match result {
            Err(RunError::Fault { line, fault }) => {
                assert_eq!(line, 2);
                assert!(matches!(fault, AggregatorFault::MissingRun { .. }));
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_large_output_is_drained_before_wait() {
        // Well past any pipe buffer: the runner blocks unless we keep reading.
        let script = r#"printf '%s\n' '{"Action":"run","Package":"p","Test":"T"}'
            i=0
            while [ $i -lt 5000 ]; do
                printf '%s\n' '{"Action":"output","Package":"p","Test":"T","Output":"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"}'
                i=$((i+1))
            done
            printf '%s\n' '{"Action":"pass","Package":"p","Test":"T"}'"#;
        let (result, agg) = tokio::time::timeout(Duration::from_secs(30), run_script(script))
            .await
            .expect("run should not deadlock");
        assert_eq!(result.expect("run should succeed").exit_code, 0);
        assert_eq!(agg.test("p", "T").expect("T exists").output.len(), 5000);
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut agg = ResultAggregator::new();
        sh(PASSING)
            .run(&mut agg, Some(&tx), future::pending())
            .await
            .expect("run should succeed");
        drop(tx);
        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(received.len(), 2);
        assert!(matches!(received[0], ProgressEvent::TestStarted { .. }));
        assert!(matches!(received[1], ProgressEvent::PackageFinished(_)));
    }

    #[tokio::test]
    async fn test_cancel_kills_runner_and_keeps_results() {
        let script = r#"printf '%s\n' '{"Action":"run","Package":"p","Test":"T"}'; exec sleep 30"#;
        let mut agg = ResultAggregator::new();
        let cancel = tokio::time::sleep(Duration::from_millis(300));
        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            sh(script).run(&mut agg, None, cancel),
        )
        .await
        .expect("cancel should stop the run promptly")
        .expect("run should succeed");

        assert!(outcome.interrupted);
        assert!(outcome.abnormal.is_none());
        assert_eq!(
            agg.test("p", "T").expect("T exists").state,
            TestState::Running
        );
    }
}
