use std::fmt;

use serde::Deserialize;

use crate::errors::DecodeError;

/// The kind of a runner event.
///
/// Actions outside the known set are preserved in [`Action::Other`] so the
/// aggregator can reject them by name instead of the decoder guessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    Run,
    Pause,
    Cont,
    Output,
    Pass,
    Fail,
    Skip,
    /// Compiler output for a package that is being built (Go 1.24+).
    BuildOutput,
    /// The package's build failed (Go 1.24+).
    BuildFail,
    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Start => "start",
            Action::Run => "run",
            Action::Pause => "pause",
            Action::Cont => "cont",
            Action::Output => "output",
            Action::Pass => "pass",
            Action::Fail => "fail",
            Action::Skip => "skip",
            Action::BuildOutput => "build-output",
            Action::BuildFail => "build-fail",
            Action::Other(name) => name,
        }
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        match name.as_str() {
            "start" => Action::Start,
            "run" => Action::Run,
            "pause" => Action::Pause,
            "cont" => Action::Cont,
            "output" => Action::Output,
            "pass" => Action::Pass,
            "fail" => Action::Fail,
            "skip" => Action::Skip,
            "build-output" => Action::BuildOutput,
            "build-fail" => Action::BuildFail,
            _ => Action::Other(name),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded record from the runner's output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TestEvent {
    pub action: Action,
    pub package: String,
    /// `None` for package-level events.
    pub test: Option<String>,
    pub output: Option<String>,
    pub elapsed: Option<f64>,
    /// Informational only.
    pub time: Option<String>,
}

/// Wire shape of a `go test -json` record. Every field is optional here so
/// that missing fields surface as [`DecodeError::MissingField`] rather than
/// an opaque serde message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEvent {
    time: Option<String>,
    action: Option<String>,
    package: Option<String>,
    /// Set instead of `Package` on build records, e.g. `example.com/x [example.com/x.test]`.
    import_path: Option<String>,
    test: Option<String>,
    output: Option<String>,
    elapsed: Option<f64>,
}

/// Decode one line of runner output into a [`TestEvent`].
pub fn decode_line(line: &str) -> Result<TestEvent, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Blank);
    }

    let raw: RawEvent = serde_json::from_str(trimmed)?;

    let Some(action) = raw.action else {
        return Err(DecodeError::MissingField {
            action: "<unknown>".to_string(),
            field: "Action",
        });
    };
    let action = Action::from(action);

    let Some(package) = raw.package.or_else(|| raw.import_path.map(strip_variant)) else {
        return Err(DecodeError::MissingField {
            action: action.to_string(),
            field: "Package",
        });
    };

    if matches!(action, Action::Output | Action::BuildOutput) && raw.output.is_none() {
        return Err(DecodeError::MissingField {
            action: action.to_string(),
            field: "Output",
        });
    }

    if let Some(elapsed) = raw.elapsed
        && !(elapsed.is_finite() && elapsed >= 0.0)
    {
        return Err(DecodeError::NegativeElapsed(elapsed));
    }

    Ok(TestEvent {
        action,
        package,
        test: raw.test.filter(|t| !t.is_empty()),
        output: raw.output,
        elapsed: raw.elapsed,
        time: raw.time,
    })
}

/// `example.com/x [example.com/x.test]` names the test build of `example.com/x`.
fn strip_variant(import_path: String) -> String {
    match import_path.split_once(" [") {
        Some((package, _)) => package.to_string(),
        None => import_path,
    }
}
