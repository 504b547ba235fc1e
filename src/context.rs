//! Shared state of one provisioning run.

use crate::contract::DeviceTypeContract;
use crate::fleet::{Application, SshKey};
use crate::image::OsImage;
use crate::worker::{DeviceWorker, WorkerError};

/// State accumulated while a run progresses.
///
/// Fields start empty and are filled as setup phases complete; nothing is
/// ever cleared. Tests receive a shared reference and can read, but not
/// replace, anything recorded here.
#[derive(Debug)]
pub struct RunContext {
    pub(crate) contract: DeviceTypeContract,
    pub(crate) application: Option<Application>,
    pub(crate) ssh_key: Option<SshKey>,
    pub(crate) uuid: Option<String>,
    pub(crate) image: Option<OsImage>,
    pub(crate) dashboard_url: Option<String>,
    pub(crate) worker: Option<Box<dyn DeviceWorker>>,
}

impl RunContext {
    /// Creates an empty context for the device type described by `contract`.
    #[must_use]
    pub const fn new(contract: DeviceTypeContract) -> Self {
        Self {
            contract,
            application: None,
            ssh_key: None,
            uuid: None,
            image: None,
            dashboard_url: None,
            worker: None,
        }
    }

    /// Contract of the device type under test.
    #[must_use]
    pub const fn contract(&self) -> &DeviceTypeContract {
        &self.contract
    }

    /// Application the device joined.
    #[must_use]
    pub const fn application(&self) -> Option<&Application> {
        self.application.as_ref()
    }

    /// SSH identity registered for host OS access.
    #[must_use]
    pub const fn ssh_key(&self) -> Option<&SshKey> {
        self.ssh_key.as_ref()
    }

    /// UUID of the device placeholder.
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// Image flashed onto the device.
    #[must_use]
    pub const fn image(&self) -> Option<&OsImage> {
        self.image.as_ref()
    }

    /// Dashboard page of the device.
    #[must_use]
    pub fn dashboard_url(&self) -> Option<&str> {
        self.dashboard_url.as_deref()
    }

    /// Whether a worker has been bound to the run.
    #[must_use]
    pub const fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub(crate) fn worker_mut(&mut self) -> Result<&mut (dyn DeviceWorker + 'static), WorkerError> {
        self.worker.as_deref_mut().ok_or(WorkerError::Unbound)
    }
}
