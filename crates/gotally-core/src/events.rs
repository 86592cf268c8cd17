use std::time::Duration;

use crate::aggregator::{Counts, PackageStatus};

/// Events emitted by the aggregator while a run is in progress.
///
/// These events decouple aggregation from the presentation layer, so an
/// interactive spinner and a plain CI log consume the same stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A test has started executing.
    TestStarted { package: String, test: String },
    /// A package closed with at least one test or a build failure.
    PackageFinished(PackageSummary),
}

/// Snapshot of a package taken when it closes.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageSummary {
    pub package: String,
    pub status: PackageStatus,
    pub counts: Counts,
    pub build_failed: bool,
    pub elapsed: Option<Duration>,
}
