//! Physical worker writing the image to a storage device and switching power
//! through a relay command or the operator.

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use tokio::fs::{File, OpenOptions};
use tracing::info;

use super::{
    DISK_PLACEHOLDER, DeviceWorker, WorkerConfig, WorkerError, WorkerFuture, WorkerKind,
    WorkerLifecycle, WorkerState,
};
use crate::command::CommandRunner;
use crate::image::OsImage;
use crate::operator::Operator;

/// Worker for real boards.
pub struct PhysicalWorker<R> {
    lifecycle: WorkerLifecycle,
    disk: Option<Utf8PathBuf>,
    relay_on: Option<String>,
    relay_off: Option<String>,
    runner: R,
    operator: Arc<dyn Operator>,
}

impl<R: fmt::Debug> fmt::Debug for PhysicalWorker<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalWorker")
            .field("state", &self.lifecycle.state())
            .field("disk", &self.disk)
            .field("relay_on", &self.relay_on)
            .field("relay_off", &self.relay_off)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl<R> PhysicalWorker<R>
where
    R: CommandRunner + Send + Sync,
{
    /// Creates a worker writing to `disk`.
    #[must_use]
    pub fn new(
        config: &WorkerConfig,
        disk: Option<Utf8PathBuf>,
        runner: R,
        operator: Arc<dyn Operator>,
    ) -> Self {
        Self {
            lifecycle: WorkerLifecycle::new(),
            disk,
            relay_on: config.relay_on_command.clone(),
            relay_off: config.relay_off_command.clone(),
            runner,
            operator,
        }
    }

    fn disk(&self) -> Result<&Utf8PathBuf, WorkerError> {
        self.disk.as_ref().ok_or_else(|| {
            WorkerError::Prepare(String::from(
                "no storage device configured: set OSPROBE_DISK or add disk to osprobe.toml",
            ))
        })
    }

    fn relay(&self, template: &str) -> Result<(), WorkerError> {
        let disk = self
            .disk
            .as_ref()
            .map(|path| escape(path.as_str().into()).into_owned())
            .unwrap_or_default();
        let command = template.replace(DISK_PLACEHOLDER, &disk);
        self.runner
            .run_checked("sh", &[OsString::from("-c"), OsString::from(command)])
            .map(|_| ())
            .map_err(|err| WorkerError::Power(err.to_string()))
    }

    async fn prepare_rig(&mut self) -> Result<(), WorkerError> {
        if !self.lifecycle.begin_prepare()? {
            return Ok(());
        }
        let disk = self.disk()?;
        tokio::fs::metadata(disk)
            .await
            .map_err(|err| WorkerError::Prepare(format!("{disk}: {err}")))?;
        if let Some(command) = self.relay_off.as_deref() {
            self.relay(command)?;
        }
        self.lifecycle.advance(WorkerState::Ready);
        Ok(())
    }

    async fn write_image(&mut self, image: &OsImage) -> Result<(), WorkerError> {
        self.lifecycle.require("flash", WorkerState::Ready)?;
        let disk = self.disk().map_err(|err| WorkerError::Flash(err.to_string()))?;

        let mut source = File::open(image.path())
            .await
            .map_err(|err| WorkerError::Flash(format!("{}: {err}", image.path())))?;
        let mut target = OpenOptions::new()
            .write(true)
            .open(disk)
            .await
            .map_err(|err| WorkerError::Flash(format!("{disk}: {err}")))?;
        let written = tokio::io::copy(&mut source, &mut target)
            .await
            .map_err(|err| WorkerError::Flash(format!("writing {disk}: {err}")))?;
        target
            .sync_all()
            .await
            .map_err(|err| WorkerError::Flash(format!("syncing {disk}: {err}")))?;

        info!(%disk, bytes = written, "image written");
        self.lifecycle.advance(WorkerState::Flashed);
        Ok(())
    }

    async fn switch_on(&mut self) -> Result<(), WorkerError> {
        self.lifecycle.require("power on", WorkerState::Flashed)?;
        if let Some(command) = self.relay_on.as_deref() {
            self.relay(command)?;
        } else {
            let disk = self.disk()?;
            let message = format!(
                "Move the storage at {disk} into the device and power it on."
            );
            self.operator
                .instruct(&message)
                .await
                .map_err(|err| WorkerError::Power(err.to_string()))?;
        }
        self.lifecycle.advance(WorkerState::PoweredOn);
        Ok(())
    }

    async fn switch_off(&mut self) -> Result<(), WorkerError> {
        let Some(previous) = self.lifecycle.shut_down() else {
            return Ok(());
        };
        if let Some(command) = self.relay_off.as_deref() {
            return self.relay(command);
        }
        if previous == WorkerState::PoweredOn {
            self.operator
                .instruct("Power off the device.")
                .await
                .map_err(|err| WorkerError::Power(err.to_string()))?;
        }
        Ok(())
    }
}

impl<R> DeviceWorker for PhysicalWorker<R>
where
    R: CommandRunner + Send + Sync + fmt::Debug,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::Physical
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn prepare(&mut self) -> WorkerFuture<'_, ()> {
        Box::pin(self.prepare_rig())
    }

    fn flash<'a>(&'a mut self, image: &'a OsImage) -> WorkerFuture<'a, ()> {
        Box::pin(self.write_image(image))
    }

    fn power_on(&mut self) -> WorkerFuture<'_, ()> {
        Box::pin(self.switch_on())
    }

    fn power_off(&mut self) -> WorkerFuture<'_, ()> {
        Box::pin(self.switch_off())
    }
}
