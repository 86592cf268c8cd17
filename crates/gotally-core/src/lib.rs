//! Core library for gotally.
//!
//! Decodes the `go test -json` event stream, aggregates it into per-package
//! and per-test results, drives live progress rendering, and assembles the
//! post-run failure report. Nothing here knows about the command line.

pub mod aggregator;
pub mod config;
pub mod errors;
pub mod event;
pub mod events;
pub mod live;
pub mod report;
pub mod supervisor;
