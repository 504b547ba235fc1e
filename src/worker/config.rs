//! Device worker settings loaded via `ortho-config`.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Placeholder replaced with the shell-escaped disk path in relay commands.
pub const DISK_PLACEHOLDER: &str = "{disk}";

/// Emulator and relay settings merged from defaults, configuration files,
/// and `OSPROBE_WORKER_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "OSPROBE_WORKER",
    discovery(
        app_name = "osprobe",
        env_var = "OSPROBE_CONFIG_PATH",
        config_file_name = "osprobe.toml",
        dotfile_name = ".osprobe.toml",
        project_file_name = "osprobe.toml"
    )
)]
pub struct WorkerConfig {
    /// Emulator binary. Derived from the contract architecture when unset.
    pub qemu_bin: Option<String>,
    /// Guest memory in MiB.
    #[ortho_config(default = 512)]
    pub qemu_memory_mb: u32,
    /// Guest CPU count.
    #[ortho_config(default = 2)]
    pub qemu_cpus: u32,
    /// Whether hardware acceleration is requested.
    #[ortho_config(default = false)]
    pub qemu_kvm: bool,
    /// Shell command that powers the physical device on. May reference
    /// `{disk}`.
    pub relay_on_command: Option<String>,
    /// Shell command that cuts power to the physical device.
    pub relay_off_command: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            qemu_bin: None,
            qemu_memory_mb: 512,
            qemu_cpus: 2,
            qemu_kvm: false,
            relay_on_command: None,
            relay_off_command: None,
        }
    }
}

/// Errors raised when the worker configuration cannot be used.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WorkerConfigError {
    /// Indicates that merging configuration layers failed.
    #[error("worker configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a configured value is blank or zero.
    #[error("invalid {field}: set OSPROBE_WORKER_{env_suffix} or add {field} to osprobe.toml", env_suffix = field.to_uppercase())]
    Invalid {
        /// Offending field.
        field: String,
    },
}

impl WorkerConfig {
    /// Loads worker settings without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, WorkerConfigError> {
        Self::load_from_iter([OsString::from("osprobe")])
            .map_err(|err| WorkerConfigError::Parse(err.to_string()))
    }

    /// Rejects blank optional strings and zero-sized guests.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), WorkerConfigError> {
        for (value, field) in [
            (self.qemu_bin.as_deref(), "qemu_bin"),
            (self.relay_on_command.as_deref(), "relay_on_command"),
            (self.relay_off_command.as_deref(), "relay_off_command"),
        ] {
            if value.is_some_and(|text| text.trim().is_empty()) {
                return Err(WorkerConfigError::Invalid {
                    field: field.to_owned(),
                });
            }
        }
        if self.qemu_memory_mb == 0 {
            return Err(WorkerConfigError::Invalid {
                field: String::from("qemu_memory_mb"),
            });
        }
        if self.qemu_cpus == 0 {
            return Err(WorkerConfigError::Invalid {
                field: String::from("qemu_cpus"),
            });
        }
        Ok(())
    }
}
