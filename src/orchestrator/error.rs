//! Error types for provisioning runs.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::fleet::FleetError;
use crate::image::ImageError;
use crate::poll::PollError;
use crate::results::ResultStoreError;
use crate::suite::SelectionError;
use crate::worker::WorkerError;

/// Fatal failure of a setup phase.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Raised when a fleet service call fails.
    #[error("{phase}: {source}")]
    Fleet {
        /// Setup phase that issued the call.
        phase: &'static str,
        /// Underlying fleet error.
        #[source]
        source: FleetError,
    },
    /// Raised when the run configuration cannot be applied.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    /// Raised when the OS image cannot be fetched or configured.
    #[error(transparent)]
    Image(#[from] ImageError),
    /// Raised when the device worker cannot be created, prepared, flashed
    /// or powered on.
    #[error("{phase}: {source}")]
    Worker {
        /// Worker operation that failed.
        phase: &'static str,
        /// Underlying worker error.
        #[source]
        source: WorkerError,
    },
    /// Raised when a polling phase exceeds its timeout.
    #[error("timed out waiting for {phase} after {}s ({attempts} polls)", .timeout.as_secs())]
    Timeout {
        /// Condition being waited for.
        phase: &'static str,
        /// Configured timeout window.
        timeout: Duration,
        /// Number of polls performed.
        attempts: u32,
    },
}

impl SetupError {
    pub(crate) fn fleet(phase: &'static str) -> impl FnOnce(FleetError) -> Self {
        move |source| Self::Fleet { phase, source }
    }

    pub(crate) fn worker(phase: &'static str) -> impl FnOnce(WorkerError) -> Self {
        move |source| Self::Worker { phase, source }
    }

    pub(crate) fn poll(phase: &'static str) -> impl FnOnce(PollError<FleetError>) -> Self {
        move |err| match err {
            PollError::Timeout { timeout, attempts } => Self::Timeout {
                phase,
                timeout,
                attempts,
            },
            PollError::Predicate(source) => Self::Fleet { phase, source },
        }
    }
}

/// Errors surfaced by a provisioning run.
///
/// Fatal variants carry the primary failure message, extended with a
/// teardown note when powering off or persisting results also failed.
#[derive(Debug, Error)]
pub enum RunError {
    /// Raised when setup aborted the run.
    #[error("setup failed: {message}")]
    Setup {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying setup error.
        #[source]
        source: Box<SetupError>,
    },
    /// Raised when the test catalog cannot be filtered.
    #[error("test selection failed: {message}")]
    Selection {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying selection error.
        #[source]
        source: SelectionError,
    },
    /// Raised when the device worker failed while tests were running.
    #[error("device worker failed during the suite: {message}")]
    Worker {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying worker error.
        #[source]
        source: WorkerError,
    },
    /// Raised when powering off fails after an otherwise successful run.
    #[error("failed to power off the device: {0}")]
    Teardown(#[source] WorkerError),
    /// Raised when results cannot be stored after an otherwise successful
    /// run.
    #[error("failed to persist results: {0}")]
    Persist(#[source] ResultStoreError),
}
