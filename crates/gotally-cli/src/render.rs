use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use gotally_core::errors::RenderError;
use gotally_core::live::{LiveRegion, PlainRegion};

/// Spinner template: `{spinner} {msg}` where the message is the running test.
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";

/// Interactive live region backed by an indicatif spinner.
///
/// The spinner message is the transient region; log lines are printed above
/// the spinner so they stay in the terminal's scrollback. Both are drawn on
/// stdout, next to the failure report.
pub struct SpinnerRegion {
    pb: ProgressBar,
}

impl SpinnerRegion {
    pub fn new() -> Result<Self, RenderError> {
        let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
        let region = Self::with_bar(pb)?;
        region.pb.enable_steady_tick(Duration::from_millis(100));
        Ok(region)
    }

    fn with_bar(pb: ProgressBar) -> Result<Self, RenderError> {
        let style = ProgressStyle::with_template(SPINNER_TEMPLATE)
            .map_err(|e| RenderError::Template(e.to_string()))?;
        pb.set_style(style);
        Ok(Self { pb })
    }
}

impl LiveRegion for SpinnerRegion {
    fn update(&mut self, text: &str) -> Result<(), RenderError> {
        self.pb.set_message(text.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), RenderError> {
        self.pb.set_message("");
        Ok(())
    }

    fn append_line(&mut self, text: &str) -> Result<(), RenderError> {
        // A hidden bar swallows println, so write the line ourselves.
        if self.pb.is_hidden() {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", text)?;
            stdout.flush()?;
        } else {
            self.pb.println(text);
        }
        Ok(())
    }
}

impl Drop for SpinnerRegion {
    fn drop(&mut self) {
        self.pb.finish_and_clear();
    }
}

/// Pick the live region for this run.
///
/// The spinner is only used on an interactive stdout outside CI; everything
/// else gets plain append-only lines.
pub fn live_region(plain: bool) -> Box<dyn LiveRegion> {
    if plain || std::env::var_os("CI").is_some() || !io::stdout().is_terminal() {
        return Box::new(PlainRegion::stdout());
    }
    match SpinnerRegion::new() {
        Ok(region) => Box::new(region),
        Err(e) => {
            tracing::debug!(error = %e, "spinner unavailable, using plain output");
            Box::new(PlainRegion::stdout())
        }
    }
}
