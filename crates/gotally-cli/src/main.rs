mod cli;
mod logging;
mod render;

use std::io::{self, Write};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Verbosity};
use colored::Colorize;
use gotally_core::aggregator::ResultAggregator;
use gotally_core::config::RunConfig;
use gotally_core::live::{self, LiveReporter};
use gotally_core::report::{FailureReport, write_totals};
use gotally_core::supervisor::{INTERNAL_FAILURE_EXIT, Supervisor};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbosity = cli.verbosity();
    logging::init(verbosity);

    if cli.no_color {
        colored::control::set_override(false);
    }

    let code = match run(cli.run_config(), cli.plain, verbosity).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\n{} {:#}", "FAILED".red().bold(), e);
            INTERNAL_FAILURE_EXIT
        }
    };

    std::process::exit(code);
}

/// Run the tests and report on them, returning the runner's exit code.
async fn run(config: RunConfig, plain: bool, verbosity: Verbosity) -> Result<i32> {
    let supervisor = Supervisor::new(config);
    if verbosity != Verbosity::Quiet {
        println!("{} {}", "$".cyan(), supervisor.config().display());
    }

    let reporter = LiveReporter::new(render::live_region(plain));
    let (tx, render_handle) = live::spawn(reporter);

    let mut aggregator = ResultAggregator::new();
    let result = supervisor
        .run(&mut aggregator, Some(&tx), interrupted())
        .await;

    drop(tx);
    render_handle.await??;

    let outcome = result?;
    tracing::debug!(
        failures = aggregator.failure_count(),
        tests_failed = outcome.tests_failed(),
        interrupted = outcome.interrupted,
        "run finished"
    );

    let mut stdout = io::stdout().lock();
    FailureReport::collect(&aggregator).write_to(&mut stdout)?;
    if verbosity != Verbosity::Quiet {
        write_totals(&mut stdout, &aggregator.totals())?;
    }
    if outcome.decode_errors > 0 && verbosity == Verbosity::Verbose {
        writeln!(
            stdout,
            "{} {} undecodable line(s) skipped",
            "DEBUG".dimmed(),
            outcome.decode_errors
        )?;
    }
    stdout.flush()?;

    Ok(outcome.exit_code)
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::debug!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
