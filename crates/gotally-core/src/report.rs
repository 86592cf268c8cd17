//! Post-run failure report.

use std::io::{self, Write};

use colored::Colorize;

use crate::aggregator::{PackageStatus, ResultAggregator, TestState, Totals};

/// Width (in characters) of the separator line drawn above each block.
const SEPARATOR_WIDTH: usize = 60;

/// Why a package appears in the report without a per-test breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFailureKind {
    /// The package failed to build or set up before any test ran.
    BuildFailed,
    /// The package failed although none of its tests did.
    NoFailingTests,
}

/// One delimited section of the failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureBlock<'a> {
    Test {
        package: &'a str,
        name: &'a str,
        attempt: usize,
        output: &'a [String],
    },
    /// A test that was still running when its package failed, typically the
    /// one a `-timeout` panic interrupted.
    Unfinished {
        package: &'a str,
        name: &'a str,
        output: &'a [String],
    },
    Package {
        package: &'a str,
        kind: PackageFailureKind,
        output: &'a [String],
    },
}

impl FailureBlock<'_> {
    fn title(&self) -> String {
        match self {
            FailureBlock::Test { name, attempt, .. } if *attempt > 1 => {
                format!("{} (run {})", name, attempt)
            }
            FailureBlock::Test { name, .. } => name.to_string(),
            FailureBlock::Unfinished { name, .. } => format!("{} [did not finish]", name),
            FailureBlock::Package {
                package,
                kind: PackageFailureKind::BuildFailed,
                ..
            } => format!("{} [build failed]", package),
            FailureBlock::Package { package, .. } => format!("{} [package failed]", package),
        }
    }

    fn output(&self) -> &[String] {
        match self {
            FailureBlock::Test { output, .. }
            | FailureBlock::Unfinished { output, .. }
            | FailureBlock::Package { output, .. } => output,
        }
    }
}

/// Every failure of a finished run, in first-seen package order and run order
/// within each package.
#[derive(Debug, Clone, Default)]
pub struct FailureReport<'a> {
    blocks: Vec<FailureBlock<'a>>,
}

impl<'a> FailureReport<'a> {
    pub fn collect(aggregator: &'a ResultAggregator) -> Self {
        let mut blocks = Vec::new();

        for pkg in aggregator.packages() {
            let package_failed = pkg.status == PackageStatus::Failed;

            if pkg.build_failed {
                blocks.push(FailureBlock::Package {
                    package: &pkg.name,
                    kind: PackageFailureKind::BuildFailed,
                    output: &pkg.output,
                });
            } else if package_failed && pkg.failed_tests().next().is_none() {
                blocks.push(FailureBlock::Package {
                    package: &pkg.name,
                    kind: PackageFailureKind::NoFailingTests,
                    output: &pkg.output,
                });
            }

            for test in &pkg.tests {
                match test.state {
                    TestState::Failed => blocks.push(FailureBlock::Test {
                        package: &pkg.name,
                        name: &test.name,
                        attempt: test.attempt,
                        output: &test.output,
                    }),
                    TestState::Running if package_failed => {
                        blocks.push(FailureBlock::Unfinished {
                            package: &pkg.name,
                            name: &test.name,
                            output: &test.output,
                        })
                    }
                    _ => {}
                }
            }
        }

        Self { blocks }
    }

    pub fn blocks(&self) -> &[FailureBlock<'a>] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Write the report. Nothing at all is written when there are no failures.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        if self.blocks.is_empty() {
            return Ok(());
        }

        writeln!(writer)?;
        writeln!(writer, "{}", "Failures".red().bold())?;

        for block in &self.blocks {
            writeln!(writer)?;
            writeln!(writer, "{}", separator_line(&block.title()))?;
            for line in block.output() {
                if line.ends_with('\n') {
                    write!(writer, "{}", line)?;
                } else {
                    writeln!(writer, "{}", line)?;
                }
            }
        }

        writer.flush()
    }
}

/// Build a separator line: `─── TestName ─────────────────`
fn separator_line(title: &str) -> String {
    let label = format!(" {} ", title);
    let prefix_dashes = 3;
    let suffix_dashes = SEPARATOR_WIDTH.saturating_sub(prefix_dashes + label.chars().count());
    format!(
        "{}{}{}",
        "─".repeat(prefix_dashes).red(),
        label.bold(),
        "─".repeat(suffix_dashes).red(),
    )
}

/// Write the closing totals line: `3 passed, 1 failed, 0 skipped in 2 packages`.
pub fn write_totals<W: Write>(mut writer: W, totals: &Totals) -> io::Result<()> {
    let failed = format!("{} failed", totals.tests.failed);
    let failed = if totals.tests.failed > 0 {
        failed.red().bold()
    } else {
        failed.normal()
    };
    let mut line = format!(
        "{}, {}, {} in {} package(s)",
        format!("{} passed", totals.tests.passed).green(),
        failed,
        format!("{} skipped", totals.tests.skipped).yellow(),
        totals.packages,
    );
    if totals.build_failures > 0 {
        line.push_str(&format!(
            ", {}",
            format!("{} build failure(s)", totals.build_failures).red()
        ));
    }
    writeln!(writer)?;
    writeln!(writer, "{}", line)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Action, TestEvent};

    fn ev(action: &str, package: &str, test: Option<&str>, output: Option<&str>) -> TestEvent {
        TestEvent {
            action: Action::from(action.to_string()),
            package: package.to_string(),
            test: test.map(String::from),
            output: output.map(String::from),
            elapsed: None,
            time: None,
        }
    }

    fn aggregate(events: Vec<TestEvent>) -> ResultAggregator {
        let mut agg = ResultAggregator::new();
        for event in events {
            agg.apply(event, None).expect("event should apply");
        }
        agg
    }

    fn render(report: &FailureReport<'_>) -> String {
        colored::control::set_override(false);
        let mut buf = Vec::new();
        report.write_to(&mut buf).expect("write report");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn test_no_failures_writes_nothing() {
        let agg = aggregate(vec![
            ev("run", "p", Some("T1"), None),
            ev("pass", "p", Some("T1"), None),
            ev("run", "p", Some("T2"), None),
            ev("skip", "p", Some("T2"), None),
            ev("pass", "p", None, None),
        ]);
        let report = FailureReport::collect(&agg);
        assert!(report.is_empty());
        assert_eq!(render(&report), "");
    }

    #[test]
    fn test_single_failure_block_is_verbatim() {
        let agg = aggregate(vec![
            ev("start", "pkgA", None, None),
            ev("run", "pkgA", Some("test1"), None),
            ev("pass", "pkgA", Some("test1"), None),
            ev("run", "pkgA", Some("test2"), None),
            ev("output", "pkgA", Some("test2"), Some("got 1 want 2")),
            ev("fail", "pkgA", Some("test2"), None),
            ev("fail", "pkgA", None, None),
        ]);
        let report = FailureReport::collect(&agg);
        assert_eq!(
            report.blocks(),
            &[FailureBlock::Test {
                package: "pkgA",
                name: "test2",
                attempt: 1,
                output: &["got 1 want 2".to_string()],
            }]
        );

        let text = render(&report);
        assert_eq!(text.matches("Failures").count(), 1);
        assert!(text.contains(" test2 "));
        assert!(text.contains("\ngot 1 want 2\n"));
        assert!(!text.contains("test1"));
    }

    #[test]
    fn test_failures_in_first_seen_order() {
        let agg = aggregate(vec![
            ev("run", "b", Some("TestB1"), None),
            ev("run", "a", Some("TestA1"), None),
            ev("run", "b", Some("TestB2"), None),
            ev("fail", "a", Some("TestA1"), None),
            ev("fail", "b", Some("TestB2"), None),
            ev("fail", "b", Some("TestB1"), None),
        ]);
        let report = FailureReport::collect(&agg);
        let names: Vec<_> = report
            .blocks()
            .iter()
            .map(|b| match b {
                FailureBlock::Test { package, name, .. }
                | FailureBlock::Unfinished { package, name, .. } => format!("{package}/{name}"),
                FailureBlock::Package { package, .. } => package.to_string(),
            })
            .collect();
        assert_eq!(names, vec!["b/TestB1", "b/TestB2", "a/TestA1"]);
    }

    #[test]
    fn test_build_failure_has_no_test_breakdown() {
        let agg = aggregate(vec![
            ev("output", "pkgB", None, Some("build failed for pkgB")),
            ev("fail", "pkgB", None, None),
        ]);
        let report = FailureReport::collect(&agg);
        assert_eq!(
            report.blocks(),
            &[FailureBlock::Package {
                package: "pkgB",
                kind: PackageFailureKind::BuildFailed,
                output: &["build failed for pkgB".to_string()],
            }]
        );
        let text = render(&report);
        assert!(text.contains("pkgB [build failed]"));
        assert!(text.contains("build failed for pkgB\n"));
    }

    #[test]
    fn test_failed_package_without_failed_tests() {
        let agg = aggregate(vec![
            ev("run", "p", Some("T"), None),
            ev("pass", "p", Some("T"), None),
            ev("output", "p", None, Some("panic: TestMain exploded\n")),
            ev("fail", "p", None, None),
        ]);
        let report = FailureReport::collect(&agg);
        assert!(matches!(
            report.blocks(),
            [FailureBlock::Package {
                kind: PackageFailureKind::NoFailingTests,
                ..
            }]
        ));
    }

    #[test]
    fn test_timed_out_test_output_is_reported() {
        let agg = aggregate(vec![
            ev("run", "p", Some("TestFast"), None),
            ev("pass", "p", Some("TestFast"), None),
            ev("run", "p", Some("TestSlow"), None),
            ev("output", "p", Some("TestSlow"), Some("panic: test timed out after 1s\n")),
            ev("output", "p", None, Some("FAIL\tp\t1.0s\n")),
            ev("fail", "p", None, None),
        ]);
        let report = FailureReport::collect(&agg);
        assert_eq!(report.blocks().len(), 2);
        assert!(matches!(
            report.blocks()[0],
            FailureBlock::Package {
                kind: PackageFailureKind::NoFailingTests,
                ..
            }
        ));
        assert_eq!(
            report.blocks()[1],
            FailureBlock::Unfinished {
                package: "p",
                name: "TestSlow",
                output: &["panic: test timed out after 1s\n".to_string()],
            }
        );

        let text = render(&report);
        assert!(text.contains(" p [package failed] "));
        assert!(text.contains(" TestSlow [did not finish] "));
        assert!(text.contains("\npanic: test timed out after 1s\n"));
        assert!(!text.contains("TestFast"));
    }

    #[test]
    fn test_running_tests_of_open_package_are_not_reported() {
        // The run was cut short before the package closed.
        let agg = aggregate(vec![
            ev("run", "p", Some("T"), None),
            ev("output", "p", Some("T"), Some("working\n")),
        ]);
        assert!(FailureReport::collect(&agg).is_empty());
    }

    #[test]
    fn test_each_failed_run_is_reported() {
        let agg = aggregate(vec![
            ev("run", "p", Some("TestA"), None),
            ev("output", "p", Some("TestA"), Some("first\n")),
            ev("fail", "p", Some("TestA"), None),
            ev("run", "p", Some("TestA"), None),
            ev("pass", "p", Some("TestA"), None),
            ev("run", "p", Some("TestA"), None),
            ev("output", "p", Some("TestA"), Some("third\n")),
            ev("fail", "p", Some("TestA"), None),
            ev("fail", "p", None, None),
        ]);
        let report = FailureReport::collect(&agg);
        assert_eq!(report.blocks().len(), 2);

        let text = render(&report);
        assert!(text.contains("─── TestA ─"));
        assert!(text.contains("─── TestA (run 3) ─"));
        assert!(!text.contains("(run 2)"));
        let first = text.find("first").expect("first run output");
        let third = text.find("third").expect("third run output");
        assert!(first < third);
    }

    #[test]
    fn test_output_with_trailing_newlines_is_not_doubled() {
        let agg = aggregate(vec![
            ev("run", "p", Some("T"), None),
            ev("output", "p", Some("T"), Some("=== RUN   T\n")),
            ev("output", "p", Some("T"), Some("    x_test.go:9: boom\n")),
            ev("fail", "p", Some("T"), None),
        ]);
        let text = render(&FailureReport::collect(&agg));
        assert!(text.ends_with("=== RUN   T\n    x_test.go:9: boom\n"));
    }

    #[test]
    fn test_write_totals() {
        colored::control::set_override(false);
        let agg = aggregate(vec![
            ev("run", "p", Some("A"), None),
            ev("pass", "p", Some("A"), None),
            ev("run", "p", Some("B"), None),
            ev("fail", "p", Some("B"), None),
            ev("output", "q", None, Some("FAIL\tq [build failed]\n")),
            ev("fail", "q", None, None),
        ]);
        let mut buf = Vec::new();
        write_totals(&mut buf, &agg.totals()).expect("write totals");
        assert_eq!(
            String::from_utf8(buf).expect("utf8"),
            "\n1 passed, 1 failed, 0 skipped in 2 package(s), 1 build failure(s)\n"
        );
    }
}
