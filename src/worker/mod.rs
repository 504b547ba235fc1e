//! Device worker abstraction for flashing and powering the device under test.
//!
//! A worker owns exactly one emulator process or physical rig for its whole
//! lifetime and walks the `Created → Ready → Flashed → PoweredOn →
//! PoweredOff` lifecycle. The variant is picked from the device type by a
//! closed lookup table, so the orchestrator never branches on device names.

mod config;
mod emulated;
mod physical;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::command::CommandRunner;
use crate::contract::DeviceTypeContract;
use crate::image::OsImage;
use crate::operator::Operator;

pub use config::{DISK_PLACEHOLDER, WorkerConfig, WorkerConfigError};
pub use emulated::{EmulatedWorker, emulator_for_arch};
pub use physical::PhysicalWorker;

/// Lifecycle position of a worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    /// Constructed, no resources acquired.
    Created,
    /// Backing resource can accept an image.
    Ready,
    /// Image written to the device storage.
    Flashed,
    /// Device is running.
    PoweredOn,
    /// Terminal; resources released.
    PoweredOff,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::Flashed => "flashed",
            Self::PoweredOn => "powered on",
            Self::PoweredOff => "powered off",
        };
        f.write_str(label)
    }
}

/// Errors raised by device workers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WorkerError {
    /// Raised when an operation is attempted from the wrong lifecycle state.
    #[error("cannot {action} a worker that is {state}")]
    InvalidState {
        /// Attempted operation.
        action: &'static str,
        /// State the worker was in.
        state: WorkerState,
    },
    /// Raised when an operation needs a worker but none is bound to the run.
    #[error("no device worker is bound to the run")]
    Unbound,
    /// Raised when no worker variant handles the device type.
    #[error("no device worker registered for device type '{0}'")]
    UnsupportedDeviceType(String),
    /// Raised when the backing resource cannot be prepared.
    #[error("failed to prepare worker: {0}")]
    Prepare(String),
    /// Raised when the image cannot be written to the device storage.
    #[error("failed to flash image: {0}")]
    Flash(String),
    /// Raised when power control fails.
    #[error("power control failed: {0}")]
    Power(String),
    /// Raised when the backing resource died while the device was running.
    #[error("device worker crashed: {0}")]
    Crashed(String),
}

/// Future returned by worker operations.
pub type WorkerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, WorkerError>> + Send + 'a>>;

/// Capability set shared by all worker variants.
pub trait DeviceWorker: Send + fmt::Debug {
    /// Variant implementing this worker.
    fn kind(&self) -> WorkerKind;

    /// Current lifecycle state.
    fn state(&self) -> WorkerState;

    /// Brings the backing resource to [`WorkerState::Ready`]. Calling it
    /// again once ready is a no-op.
    fn prepare(&mut self) -> WorkerFuture<'_, ()>;

    /// Writes `image` to the device storage. Requires [`WorkerState::Ready`].
    fn flash<'a>(&'a mut self, image: &'a OsImage) -> WorkerFuture<'a, ()>;

    /// Starts the device. Requires [`WorkerState::Flashed`].
    fn power_on(&mut self) -> WorkerFuture<'_, ()>;

    /// Releases the backing resource. Valid from any state; only the first
    /// call has an effect.
    fn power_off(&mut self) -> WorkerFuture<'_, ()>;

    /// Reports whether the backing resource is still healthy.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Crashed`] when the device died underneath a
    /// running suite.
    fn check(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Lifecycle bookkeeping shared by the worker variants.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkerLifecycle {
    state: WorkerState,
}

impl WorkerLifecycle {
    /// Starts in [`WorkerState::Created`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: WorkerState::Created,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// Returns `Ok(true)` when preparation is still needed and `Ok(false)`
    /// when the worker is already ready.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidState`] past [`WorkerState::Ready`].
    pub const fn begin_prepare(&self) -> Result<bool, WorkerError> {
        match self.state {
            WorkerState::Created => Ok(true),
            WorkerState::Ready => Ok(false),
            state => Err(WorkerError::InvalidState {
                action: "prepare",
                state,
            }),
        }
    }

    /// Checks that the worker sits in `expected` before `action`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidState`] otherwise.
    pub fn require(&self, action: &'static str, expected: WorkerState) -> Result<(), WorkerError> {
        if self.state == expected {
            return Ok(());
        }
        Err(WorkerError::InvalidState {
            action,
            state: self.state,
        })
    }

    /// Moves to `next`.
    pub const fn advance(&mut self, next: WorkerState) {
        self.state = next;
    }

    /// Enters [`WorkerState::PoweredOff`] and returns the state it left, or
    /// `None` when the worker was already off.
    pub fn shut_down(&mut self) -> Option<WorkerState> {
        if self.state == WorkerState::PoweredOff {
            return None;
        }
        let previous = self.state;
        self.state = WorkerState::PoweredOff;
        Some(previous)
    }
}

impl Default for WorkerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker variants known to the crate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerKind {
    /// Virtual machine bound directly to the image file.
    Emulated,
    /// Real board flashed through a storage device and powered by a relay
    /// or by hand.
    Physical,
}

/// Device types with a worker binding.
pub const DEVICE_WORKERS: &[(&str, WorkerKind)] = &[
    ("qemux86-64", WorkerKind::Emulated),
    ("qemux86", WorkerKind::Emulated),
    ("raspberry-pi", WorkerKind::Physical),
    ("raspberry-pi2", WorkerKind::Physical),
    ("raspberrypi3", WorkerKind::Physical),
    ("beaglebone-black", WorkerKind::Physical),
    ("intel-nuc", WorkerKind::Physical),
    ("ts4900", WorkerKind::Physical),
];

impl WorkerKind {
    /// Selects the worker variant for `device_type`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::UnsupportedDeviceType`] for unknown device
    /// types.
    pub fn for_device_type(device_type: &str) -> Result<Self, WorkerError> {
        DEVICE_WORKERS
            .iter()
            .find(|(slug, _)| *slug == device_type)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| WorkerError::UnsupportedDeviceType(device_type.to_owned()))
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emulated => f.write_str("emulated"),
            Self::Physical => f.write_str("physical"),
        }
    }
}

/// Creates the worker bound to a device type.
pub trait WorkerFactory {
    /// Builds a fresh worker in [`WorkerState::Created`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] when the device type has no binding or the
    /// variant cannot be configured for it.
    fn create(
        &self,
        device_type: &str,
        contract: &DeviceTypeContract,
    ) -> Result<Box<dyn DeviceWorker>, WorkerError>;
}

/// Production factory dispatching through [`DEVICE_WORKERS`].
#[derive(Debug)]
pub struct WorkerRegistry<R> {
    config: WorkerConfig,
    disk: Option<Utf8PathBuf>,
    workdir: Utf8PathBuf,
    runner: R,
    operator: Arc<dyn Operator>,
}

impl<R> WorkerRegistry<R>
where
    R: CommandRunner + Clone + Send + Sync + fmt::Debug + 'static,
{
    /// Creates a registry. `workdir` receives emulator scratch files and
    /// `disk` is the storage device written by physical workers.
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        disk: Option<Utf8PathBuf>,
        workdir: Utf8PathBuf,
        runner: R,
        operator: Arc<dyn Operator>,
    ) -> Self {
        Self {
            config,
            disk,
            workdir,
            runner,
            operator,
        }
    }
}

impl<R> WorkerFactory for WorkerRegistry<R>
where
    R: CommandRunner + Clone + Send + Sync + fmt::Debug + 'static,
{
    fn create(
        &self,
        device_type: &str,
        contract: &DeviceTypeContract,
    ) -> Result<Box<dyn DeviceWorker>, WorkerError> {
        match WorkerKind::for_device_type(device_type)? {
            WorkerKind::Emulated => Ok(Box::new(EmulatedWorker::new(
                &self.config,
                contract,
                self.workdir.clone(),
            )?)),
            WorkerKind::Physical => Ok(Box::new(PhysicalWorker::new(
                &self.config,
                self.disk.clone(),
                self.runner.clone(),
                Arc::clone(&self.operator),
            ))),
        }
    }
}
