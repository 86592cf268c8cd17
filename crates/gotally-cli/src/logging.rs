use std::io::{self, IsTerminal};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::Verbosity;

/// Initialize diagnostic logging on stderr.
///
/// The level comes from `GOTALLY_LOG`, then `RUST_LOG`, then the verbosity
/// flags (`error` when quiet, `debug` when verbose, `warn` otherwise).
pub fn init(verbosity: Verbosity) {
    let default_level = match verbosity {
        Verbosity::Quiet => "error",
        Verbosity::Normal => "warn",
        Verbosity::Verbose => "debug",
    };

    let env_filter = EnvFilter::try_from_env("GOTALLY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_target(false)
                .without_time(),
        )
        .with(env_filter)
        .init();
}
