use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;

use crate::errors::AggregatorFault;
use crate::event::{Action, TestEvent};
use crate::events::{PackageSummary, ProgressEvent};

/// Matches package-level output that signals the package never got as far
/// as running tests, e.g. `FAIL\texample.com/pkg [build failed]`.
pub static BUILD_FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // safety: this regex is valid and tested
    Regex::new(r"(?i)\b(?:build|setup) failed\b").expect("valid regex")
});

/// Lifecycle of a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    Running,
    Passed,
    Failed,
    Skipped,
}

impl TestState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TestState::Running)
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestState::Running => "running",
            TestState::Passed => "passed",
            TestState::Failed => "failed",
            TestState::Skipped => "skipped",
        })
    }
}

/// Lifecycle of a package. Anything but `Running` means the package is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    Running,
    Passed,
    Failed,
    Skipped,
}

/// Terminal-state tally over a set of tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    fn record(&mut self, state: TestState) {
        match state {
            TestState::Passed => self.passed += 1,
            TestState::Failed => self.failed += 1,
            TestState::Skipped => self.skipped += 1,
            TestState::Running => {}
        }
    }
}

impl std::ops::AddAssign for Counts {
    fn add_assign(&mut self, rhs: Self) {
        self.passed += rhs.passed;
        self.failed += rhs.failed;
        self.skipped += rhs.skipped;
    }
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub package: String,
    pub output: Vec<String>,
    pub state: TestState,
    pub elapsed: Option<Duration>,
    /// 1 for the first run of this name in its package; `-count=N` runs count up.
    pub attempt: usize,
}

#[derive(Debug, Clone)]
pub struct PackageResult {
    pub name: String,
    /// Every test run, in the order the `run` events arrived.
    pub tests: Vec<TestResult>,
    /// Index into `tests` of the latest run of each name.
    latest: HashMap<String, usize>,
    /// Output that is not attributed to any test.
    pub output: Vec<String>,
    pub status: PackageStatus,
    pub build_failed: bool,
    pub elapsed: Option<Duration>,
}

impl PackageResult {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tests: Vec::new(),
            latest: HashMap::new(),
            output: Vec::new(),
            status: PackageStatus::Running,
            build_failed: false,
            elapsed: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status != PackageStatus::Running
    }

    /// The latest run of the test called `name`.
    pub fn test(&self, name: &str) -> Option<&TestResult> {
        self.latest.get(name).and_then(|&i| self.tests.get(i))
    }

    fn test_mut(&mut self, name: &str) -> Option<&mut TestResult> {
        let i = *self.latest.get(name)?;
        self.tests.get_mut(i)
    }

    /// Count test runs by terminal state. Runs still in progress are not counted.
    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for test in &self.tests {
            counts.record(test.state);
        }
        counts
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &TestResult> {
        self.tests.iter().filter(|t| t.state == TestState::Failed)
    }

    /// Test runs that never reached a terminal state, e.g. the test that was
    /// executing when the binary timed out.
    pub fn unfinished_tests(&self) -> impl Iterator<Item = &TestResult> {
        self.tests.iter().filter(|t| !t.state.is_terminal())
    }

    fn summary(&self) -> PackageSummary {
        PackageSummary {
            package: self.name.clone(),
            status: self.status,
            counts: self.counts(),
            build_failed: self.build_failed,
            elapsed: self.elapsed,
        }
    }
}

/// Run-wide totals across every package seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub tests: Counts,
    pub packages: usize,
    pub build_failures: usize,
}

/// Folds runner events into per-package and per-test results.
///
/// Events must be applied in arrival order. Any event the state model cannot
/// place yields an [`AggregatorFault`], after which the aggregator should not
/// be fed further.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    packages: IndexMap<String, PackageResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event, notifying `events` of progress worth rendering.
    pub fn apply(
        &mut self,
        event: TestEvent,
        events: Option<&UnboundedSender<ProgressEvent>>,
    ) -> Result<(), AggregatorFault> {
        match event.test {
            None => self.apply_package_event(
                event.action,
                event.package,
                event.output,
                event.elapsed,
                events,
            ),
            Some(test) => self.apply_test_event(
                event.action,
                event.package,
                test,
                event.output,
                event.elapsed,
                events,
            ),
        }
    }

    fn apply_package_event(
        &mut self,
        action: Action,
        package: String,
        output: Option<String>,
        elapsed: Option<f64>,
        events: Option<&UnboundedSender<ProgressEvent>>,
    ) -> Result<(), AggregatorFault> {
        match action {
            Action::Start => {
                self.package_entry(&package);
            }
            Action::Output => {
                let pkg = self.package_entry(&package);
                if let Some(text) = output {
                    if BUILD_FAILURE_RE.is_match(&text) && pkg.tests.is_empty() {
                        tracing::debug!(package = %pkg.name, "package flagged as build failure");
                        pkg.build_failed = true;
                    }
                    pkg.output.push(text);
                }
            }
            Action::Pass | Action::Fail | Action::Skip => {
                let pkg = self.package_entry(&package);
                if pkg.is_closed() {
                    return Err(AggregatorFault::PackageClosed { action, package });
                }
                pkg.status = match action {
                    Action::Pass => PackageStatus::Passed,
                    Action::Fail => PackageStatus::Failed,
                    _ => PackageStatus::Skipped,
                };
                pkg.elapsed = elapsed.and_then(|secs| Duration::try_from_secs_f64(secs).ok());

                let summary = pkg.summary();
                tracing::debug!(
                    package = %summary.package,
                    passed = summary.counts.passed,
                    failed = summary.counts.failed,
                    skipped = summary.counts.skipped,
                    "package closed"
                );
                // A package with neither tests nor a build failure has nothing to say.
                if summary.counts.total() > 0 || summary.build_failed {
                    emit(events, ProgressEvent::PackageFinished(summary));
                }
            }
            Action::BuildOutput => {
                let pkg = self.package_entry(&package);
                if let Some(text) = output {
                    pkg.output.push(text);
                }
            }
            Action::BuildFail => {
                let pkg = self.package_entry(&package);
                if pkg.tests.is_empty() {
                    tracing::debug!(package = %pkg.name, "package reported build failure");
                    pkg.build_failed = true;
                }
            }
            Action::Pause | Action::Cont => {}
            Action::Run | Action::Other(_) => {
                return Err(AggregatorFault::UnexpectedAction {
                    level: "package",
                    action,
                    package,
                });
            }
        }
        Ok(())
    }

    fn apply_test_event(
        &mut self,
        action: Action,
        package: String,
        test: String,
        output: Option<String>,
        elapsed: Option<f64>,
        events: Option<&UnboundedSender<ProgressEvent>>,
    ) -> Result<(), AggregatorFault> {
        if action == Action::Run {
            let pkg = self.package_entry(&package);
            if pkg.is_closed() {
                return Err(AggregatorFault::PackageClosed { action, package });
            }
            let attempt = match pkg.test(&test) {
                Some(prev) if !prev.state.is_terminal() => {
                    return Err(AggregatorFault::DuplicateRun { package, test });
                }
                Some(prev) => prev.attempt + 1,
                None => 1,
            };
            if attempt > 1 {
                tracing::trace!(package = %package, test = %test, attempt, "test run again");
            }
            pkg.latest.insert(test.clone(), pkg.tests.len());
            pkg.tests.push(TestResult {
                name: test.clone(),
                package: package.clone(),
                output: Vec::new(),
                state: TestState::Running,
                elapsed: None,
                attempt,
            });
            emit(events, ProgressEvent::TestStarted { package, test });
            return Ok(());
        }

        if matches!(
            action,
            Action::Start | Action::BuildOutput | Action::BuildFail | Action::Other(_)
        ) {
            return Err(AggregatorFault::UnexpectedAction {
                level: "test",
                action,
                package,
            });
        }

        let Some(result) = self
            .packages
            .get_mut(&package)
            .and_then(|pkg| pkg.test_mut(&test))
        else {
            return Err(AggregatorFault::MissingRun {
                action,
                package,
                test,
            });
        };

        let next = match action {
            Action::Pass => TestState::Passed,
            Action::Fail => TestState::Failed,
            Action::Skip => TestState::Skipped,
            Action::Output => {
                // Trailing lines after a terminal state are kept; the test stays closed.
                if let Some(text) = output {
                    result.output.push(text);
                }
                return Ok(());
            }
            // pause/cont
            _ => return Ok(()),
        };

        if result.state.is_terminal() {
            return Err(AggregatorFault::IllegalTransition {
                package,
                test,
                from: result.state,
                to: next,
            });
        }
        result.state = next;
        result.elapsed = elapsed.and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        Ok(())
    }

    /// Fetch a package, creating it on first sight. Runners that predate the
    /// package `start` action open packages with their first event instead.
    fn package_entry(&mut self, package: &str) -> &mut PackageResult {
        if !self.packages.contains_key(package) {
            tracing::trace!(package, "package opened");
        }
        self.packages
            .entry(package.to_string())
            .or_insert_with(|| PackageResult::new(package))
    }

    /// Packages in first-seen order.
    pub fn packages(&self) -> impl Iterator<Item = &PackageResult> {
        self.packages.values()
    }

    pub fn package(&self, name: &str) -> Option<&PackageResult> {
        self.packages.get(name)
    }

    /// The latest run of `test` in `package`.
    pub fn test(&self, package: &str, test: &str) -> Option<&TestResult> {
        self.packages.get(package)?.test(test)
    }

    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for pkg in self.packages.values() {
            totals.tests += pkg.counts();
            totals.packages += 1;
            if pkg.build_failed {
                totals.build_failures += 1;
            }
        }
        totals
    }

    /// Number of failed tests across all packages.
    pub fn failure_count(&self) -> usize {
        self.packages.values().map(|p| p.failed_tests().count()).sum()
    }
}

/// Send an event if the transmitter is present, ignoring send errors
/// (the receiver may have been dropped).
fn emit(tx: Option<&UnboundedSender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}
