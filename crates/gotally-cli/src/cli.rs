use clap::Parser;

use gotally_core::config::{DEFAULT_GO, RunConfig};

/// gotally: live progress and a failure digest for `go test`
///
/// Runs `go test -json`, shows the currently running test, prints one line per
/// finished package and, once the run is over, the output of every failed test.
#[derive(Parser, Debug)]
#[command(name = "gotally", version, about, long_about = None)]
pub struct Cli {
    /// Packages to test, forwarded unmodified to `go test` (default: ./...)
    pub packages: Vec<String>,

    /// Additional flags passed to `go test` (after --)
    #[arg(last = true)]
    pub go_flags: Vec<String>,

    /// Go executable used to run the tests
    #[arg(long, env = "GOTALLY_GO", default_value = DEFAULT_GO)]
    pub go: String,

    /// Print append-only progress lines instead of a spinner
    #[arg(long)]
    pub plain: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Increase diagnostic output (show debug info)
    #[arg(short, long)]
    pub verbose: bool,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Verbosity level resolved from --verbose / --quiet flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// --quiet: only errors and essential output
    Quiet,
    /// default: normal output
    Normal,
    /// --verbose: extra debug info
    Verbose,
}

impl Cli {
    /// Resolve the verbosity level from CLI flags
    pub fn verbosity(&self) -> Verbosity {
        match (self.quiet, self.verbose) {
            (true, _) => Verbosity::Quiet,
            (_, true) => Verbosity::Verbose,
            _ => Verbosity::Normal,
        }
    }

    /// The runner invocation selected by the arguments.
    pub fn run_config(&self) -> RunConfig {
        RunConfig::go_test(&self.go, &self.packages, &self.go_flags)
    }
}
