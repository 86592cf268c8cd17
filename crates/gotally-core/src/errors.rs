//! Errors produced while decoding, aggregating and supervising a test run.

use std::io;

use thiserror::Error;

use crate::aggregator::TestState;
use crate::event::Action;

/// A single input line could not be turned into a [`TestEvent`](crate::event::TestEvent).
///
/// Recovered locally: the offending line is logged and skipped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("blank line")]
    Blank,

    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("`{action}` event is missing required field `{field}`")]
    MissingField { action: String, field: &'static str },

    #[error("elapsed time must be a non-negative number of seconds, got {0}")]
    NegativeElapsed(f64),
}

/// The event stream broke the protocol the aggregator relies on.
///
/// Fatal: once raised, aggregated counts can no longer be trusted and
/// processing stops.
#[derive(Debug, Error)]
pub enum AggregatorFault {
    #[error("unexpected {level}-level action `{action}` for package `{package}`")]
    UnexpectedAction {
        level: &'static str,
        action: Action,
        package: String,
    },

    #[error("`{action}` for test `{test}` in package `{package}` arrived before its `run` event")]
    MissingRun {
        action: Action,
        package: String,
        test: String,
    },

    #[error("test `{test}` in package `{package}` was run again before it finished")]
    DuplicateRun { package: String, test: String },

    #[error("test `{test}` in package `{package}` cannot move from {from} to {to}")]
    IllegalTransition {
        package: String,
        test: String,
        from: TestState,
        to: TestState,
    },

    #[error("package `{package}` received `{action}` after it was closed")]
    PackageClosed { action: Action, package: String },
}

/// The runner subprocess could not be driven, or ended abnormally.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read runner output")]
    Read(#[source] io::Error),

    #[error("failed to wait for runner")]
    Wait(#[source] io::Error),

    #[error("runner exited with code {0}")]
    AbnormalExit(i32),

    #[error("runner was terminated by signal {0}")]
    Signaled(i32),

    #[error("runner terminated without an exit code")]
    Unknown,
}

/// A live-region draw failed. Never escalated past the reporter.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write progress output")]
    Io(#[from] io::Error),

    #[error("invalid progress template: {0}")]
    Template(String),
}

/// Why [`Supervisor::run`](crate::supervisor::Supervisor::run) stopped early.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("aggregation halted at input line {line}")]
    Fault {
        line: usize,
        #[source]
        fault: AggregatorFault,
    },
}
