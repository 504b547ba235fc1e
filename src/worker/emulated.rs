//! Emulated worker running the image inside a QEMU virtual machine.

use std::process::Stdio;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::{
    DeviceWorker, WorkerConfig, WorkerError, WorkerFuture, WorkerKind, WorkerLifecycle,
    WorkerState,
};
use crate::contract::DeviceTypeContract;
use crate::image::OsImage;

/// Worker that boots the image file directly in an emulator.
#[derive(Debug)]
pub struct EmulatedWorker {
    lifecycle: WorkerLifecycle,
    program: String,
    memory_mb: u32,
    cpus: u32,
    kvm: bool,
    workdir: Utf8PathBuf,
    image: Option<Utf8PathBuf>,
    child: Option<Child>,
}

/// Maps a contract architecture to its system emulator.
#[must_use]
pub fn emulator_for_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "amd64" => Some("qemu-system-x86_64"),
        "i386" => Some("qemu-system-i386"),
        "aarch64" => Some("qemu-system-aarch64"),
        "armv7hf" | "rpi" => Some("qemu-system-arm"),
        _ => None,
    }
}

impl EmulatedWorker {
    /// Builds a worker for `contract`, resolving the emulator binary from the
    /// configuration or the contract architecture.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Prepare`] when no emulator matches the
    /// architecture and none is configured.
    pub fn new(
        config: &WorkerConfig,
        contract: &DeviceTypeContract,
        workdir: Utf8PathBuf,
    ) -> Result<Self, WorkerError> {
        let program = match config.qemu_bin.as_deref() {
            Some(bin) => bin.trim().to_owned(),
            None => {
                let arch = contract.arch().unwrap_or_default();
                emulator_for_arch(arch)
                    .ok_or_else(|| {
                        WorkerError::Prepare(format!(
                            "no emulator for architecture '{arch}' of {}; set OSPROBE_WORKER_QEMU_BIN",
                            contract.slug()
                        ))
                    })?
                    .to_owned()
            }
        };

        Ok(Self {
            lifecycle: WorkerLifecycle::new(),
            program,
            memory_mb: config.qemu_memory_mb,
            cpus: config.qemu_cpus,
            kvm: config.qemu_kvm,
            workdir,
            image: None,
            child: None,
        })
    }

    /// Emulator binary launched on power on.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the emulator for the flashed image.
    #[must_use]
    pub fn emulator_args(&self, image: &Utf8Path) -> Vec<String> {
        let mut args = vec![
            String::from("-m"),
            self.memory_mb.to_string(),
            String::from("-smp"),
            self.cpus.to_string(),
            String::from("-drive"),
            format!("file={image},format=raw,if=virtio"),
            String::from("-netdev"),
            String::from("user,id=net0"),
            String::from("-device"),
            String::from("virtio-net-pci,netdev=net0"),
            String::from("-nographic"),
        ];
        if self.kvm {
            args.push(String::from("-enable-kvm"));
        }
        args
    }

    async fn prepare_workdir(&mut self) -> Result<(), WorkerError> {
        if !self.lifecycle.begin_prepare()? {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.workdir)
            .await
            .map_err(|err| WorkerError::Prepare(format!("{}: {err}", self.workdir)))?;
        self.lifecycle.advance(WorkerState::Ready);
        Ok(())
    }

    async fn bind_image(&mut self, image: &OsImage) -> Result<(), WorkerError> {
        self.lifecycle.require("flash", WorkerState::Ready)?;
        let metadata = tokio::fs::metadata(image.path())
            .await
            .map_err(|err| WorkerError::Flash(format!("{}: {err}", image.path())))?;
        if !metadata.is_file() {
            return Err(WorkerError::Flash(format!(
                "{} is not a regular file",
                image.path()
            )));
        }
        self.image = Some(image.path().to_path_buf());
        self.lifecycle.advance(WorkerState::Flashed);
        Ok(())
    }

    fn spawn(&mut self) -> Result<(), WorkerError> {
        self.lifecycle.require("power on", WorkerState::Flashed)?;
        let Some(image) = self.image.clone() else {
            return Err(WorkerError::Power(String::from("no image bound")));
        };
        let child = Command::new(&self.program)
            .args(self.emulator_args(&image))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| WorkerError::Power(format!("failed to start {}: {err}", self.program)))?;
        info!(program = %self.program, pid = ?child.id(), "emulator started");
        self.child = Some(child);
        self.lifecycle.advance(WorkerState::PoweredOn);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WorkerError> {
        if self.lifecycle.shut_down().is_none() {
            return Ok(());
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                warn!(%status, "emulator had already exited");
                Ok(())
            }
            Ok(None) => child
                .kill()
                .await
                .map_err(|err| WorkerError::Power(format!("failed to stop emulator: {err}"))),
            Err(err) => Err(WorkerError::Power(format!("failed to query emulator: {err}"))),
        }
    }
}

impl DeviceWorker for EmulatedWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Emulated
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn prepare(&mut self) -> WorkerFuture<'_, ()> {
        Box::pin(self.prepare_workdir())
    }

    fn flash<'a>(&'a mut self, image: &'a OsImage) -> WorkerFuture<'a, ()> {
        Box::pin(self.bind_image(image))
    }

    fn power_on(&mut self) -> WorkerFuture<'_, ()> {
        Box::pin(async move { self.spawn() })
    }

    fn power_off(&mut self) -> WorkerFuture<'_, ()> {
        Box::pin(self.stop())
    }

    fn check(&mut self) -> Result<(), WorkerError> {
        if self.lifecycle.state() != WorkerState::PoweredOn {
            return Ok(());
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(WorkerError::Crashed(format!("emulator exited with {status}"))),
            Err(err) => Err(WorkerError::Crashed(err.to_string())),
        }
    }
}
