//! Live progress rendering.
//!
//! The reporter only talks to a [`LiveRegion`]: a transient area that is
//! overwritten with the currently running test, and an append-only log that
//! receives one line per finished package. Rendering is best-effort; a region
//! that fails is swapped for a plain fallback and the run carries on.

use std::io::{self, Write};

use anyhow::Result;
use colored::Colorize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::RenderError;
use crate::events::{PackageSummary, ProgressEvent};

/// Terminal capability the live reporter draws on.
pub trait LiveRegion: Send {
    /// Replace the transient region with `text`.
    fn update(&mut self, text: &str) -> Result<(), RenderError>;

    /// Empty the transient region.
    fn clear(&mut self) -> Result<(), RenderError>;

    /// Append one line to the permanent log.
    fn append_line(&mut self, text: &str) -> Result<(), RenderError>;
}

/// Append-only region for CI logs and non-terminal output. Transient updates
/// are not drawn.
#[derive(Debug)]
pub struct PlainRegion<W> {
    writer: W,
}

impl<W: Write> PlainRegion<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl PlainRegion<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> LiveRegion for PlainRegion<W> {
    fn update(&mut self, _text: &str) -> Result<(), RenderError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    fn append_line(&mut self, text: &str) -> Result<(), RenderError> {
        writeln!(self.writer, "{}", text)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Renders [`ProgressEvent`]s onto a [`LiveRegion`].
pub struct LiveReporter {
    region: Box<dyn LiveRegion>,
    fallback: Option<Box<dyn LiveRegion>>,
    degraded: bool,
    /// Last text drawn in the transient region, so identical redraws are skipped.
    transient: Option<String>,
}

impl LiveReporter {
    pub fn new(region: Box<dyn LiveRegion>) -> Self {
        Self {
            region,
            fallback: Some(Box::new(PlainRegion::stdout())),
            degraded: false,
            transient: None,
        }
    }

    /// Use `fallback` instead of plain stdout once the primary region fails.
    pub fn with_fallback(mut self, fallback: Box<dyn LiveRegion>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn handle(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::TestStarted { package, test } => {
                let text = format!("{} {}", package.dimmed(), test);
                if self.transient.as_deref() == Some(text.as_str()) {
                    return;
                }
                self.draw(|region| region.update(&text));
                self.transient = Some(text);
            }
            ProgressEvent::PackageFinished(summary) => {
                self.clear();
                let line = summary_line(summary);
                self.draw(|region| region.append_line(&line));
            }
        }
    }

    /// Empty the transient region.
    pub fn clear(&mut self) {
        if self.transient.take().is_some() {
            self.draw(|region| region.clear());
        }
    }

    /// Consume events until every sender has been dropped.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) -> Result<()> {
        while let Some(event) = rx.recv().await {
            self.handle(&event);
        }
        self.clear();
        if self.is_degraded() {
            tracing::debug!("progress was rendered with the plain fallback");
        }
        Ok(())
    }

    /// Issue one draw call, switching to the fallback region if it fails.
    fn draw(&mut self, mut call: impl FnMut(&mut dyn LiveRegion) -> Result<(), RenderError>) {
        let Err(err) = call(self.region.as_mut()) else {
            return;
        };
        if self.degraded {
            tracing::trace!(error = %err, "fallback render failed");
            return;
        }
        tracing::debug!(error = %err, "live region failed, falling back to plain output");
        self.degraded = true;
        if let Some(fallback) = self.fallback.take() {
            self.region = fallback;
            if let Err(err) = call(self.region.as_mut()) {
                tracing::trace!(error = %err, "fallback render failed");
            }
        }
    }
}

/// Spawn a render task for `reporter`.
///
/// Returns an event sender and a join handle. Drop the sender when done
/// to signal the render loop to finish, then await the handle.
pub fn spawn(
    reporter: LiveReporter,
) -> (mpsc::UnboundedSender<ProgressEvent>, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(reporter.run(rx));
    (tx, handle)
}

/// One log line for a finished package: `pkg Passed: 3 Failed: 1 (0.05s)`.
pub fn summary_line(summary: &PackageSummary) -> String {
    if summary.build_failed {
        return format!("{} {}", summary.package, "BUILD FAILED".red().bold());
    }

    let mut line = format!(
        "{} {}",
        summary.package,
        format!("Passed: {}", summary.counts.passed).green()
    );
    if summary.counts.failed > 0 {
        line.push_str(&format!(
            " {}",
            format!("Failed: {}", summary.counts.failed).red()
        ));
    }
    if summary.counts.skipped > 0 {
        line.push_str(&format!(
            " {}",
            format!("Skipped: {}", summary.counts.skipped).yellow()
        ));
    }
    if let Some(elapsed) = summary.elapsed {
        line.push_str(&format!(
            " {}",
            format!("({:.2}s)", elapsed.as_secs_f64()).dimmed()
        ));
    }
    line
}
