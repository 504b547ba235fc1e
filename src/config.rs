//! Run configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::poll::PollSchedule;

/// Environment variable that points at an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "OSPROBE_CONFIG_PATH";

/// Static configuration for one provisioning run, merged from defaults,
/// configuration files, and `OSPROBE_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "OSPROBE",
    discovery(
        app_name = "osprobe",
        env_var = "OSPROBE_CONFIG_PATH",
        config_file_name = "osprobe.toml",
        dotfile_name = ".osprobe.toml",
        project_file_name = "osprobe.toml"
    )
)]
pub struct RunConfig {
    /// Device type slug under test (for example `raspberrypi3`).
    #[ortho_config(default = String::new())]
    pub device_type: String,
    /// OS release to provision (for example `2.0.6+rev3.prod`).
    #[ortho_config(default = String::new())]
    pub os_version: String,
    /// Fleet application the device joins.
    #[ortho_config(default = String::from("osprobe"))]
    pub application_name: String,
    /// API token used to authenticate with the fleet service.
    #[ortho_config(default = String::new())]
    pub api_key: String,
    /// Label for the SSH key registered with the fleet service.
    #[ortho_config(default = String::from("osprobe"))]
    pub ssh_key_label: String,
    /// Optional supervisor delta setting exported to the application.
    pub delta: Option<String>,
    /// Optional JSON object merged into the OS configuration request.
    pub configuration: Option<String>,
    /// Scratch directory for images, keys, and emulator state.
    #[ortho_config(default = String::from("/tmp/osprobe"))]
    pub tmpdir: String,
    /// Storage device written by the physical worker.
    pub disk: Option<String>,
    /// Whether operator-driven tests are included.
    #[ortho_config(default = false)]
    pub interactive_tests: bool,
    /// Base URL of the fleet API.
    #[ortho_config(default = String::from("https://api.resin.io"))]
    pub fleet_url: String,
    /// Alternative base URL for OS image downloads.
    pub image_url: Option<String>,
    /// SSH proxy used to reach device host operating systems.
    #[ortho_config(default = String::from("ssh.resindevice.io"))]
    pub ssh_host: String,
    /// Directory holding `hw.device-type/<slug>.json` contracts.
    #[ortho_config(default = String::from("contracts"))]
    pub contracts_dir: String,
    /// JSON document receiving the run results.
    #[ortho_config(default = String::from("osprobe-results.json"))]
    pub results_path: String,
    /// Optional author recorded alongside the results.
    pub author: Option<String>,
    /// Optional binary used to inject configuration into the image.
    pub image_configure_bin: Option<String>,
    /// Seconds between fleet status polls.
    #[ortho_config(default = 10)]
    pub poll_interval_secs: u64,
    /// Seconds to wait for the device to come online.
    #[ortho_config(default = 900)]
    pub online_timeout_secs: u64,
    /// Seconds to wait for the supervisor to become idle.
    #[ortho_config(default = 900)]
    pub supervisor_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl RunConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to osprobe.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("osprobe")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the fields needed to choose a device type and its tests.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the device type or
    /// contracts directory is empty.
    pub fn validate_for_plan(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.device_type,
            &FieldMetadata::new("device type", "OSPROBE_DEVICE_TYPE", "device_type"),
        )?;
        Self::require_field(
            &self.contracts_dir,
            &FieldMetadata::new(
                "contracts directory",
                "OSPROBE_CONTRACTS_DIR",
                "contracts_dir",
            ),
        )
    }

    /// Performs semantic validation on everything a full run needs. Error
    /// messages name the environment variable and configuration key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// [`ConfigError::InvalidOverrides`] when `configuration` is not a JSON
    /// object, and [`ConfigError::InvalidTimeout`] for zero poll settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_for_plan()?;
        for (value, metadata) in [
            (
                &self.os_version,
                FieldMetadata::new("OS version", "OSPROBE_OS_VERSION", "os_version"),
            ),
            (
                &self.application_name,
                FieldMetadata::new(
                    "application name",
                    "OSPROBE_APPLICATION_NAME",
                    "application_name",
                ),
            ),
            (
                &self.api_key,
                FieldMetadata::new("fleet API key", "OSPROBE_API_KEY", "api_key"),
            ),
            (
                &self.ssh_key_label,
                FieldMetadata::new("SSH key label", "OSPROBE_SSH_KEY_LABEL", "ssh_key_label"),
            ),
            (
                &self.tmpdir,
                FieldMetadata::new("scratch directory", "OSPROBE_TMPDIR", "tmpdir"),
            ),
            (
                &self.fleet_url,
                FieldMetadata::new("fleet API URL", "OSPROBE_FLEET_URL", "fleet_url"),
            ),
            (
                &self.results_path,
                FieldMetadata::new("results path", "OSPROBE_RESULTS_PATH", "results_path"),
            ),
        ] {
            Self::require_field(value, &metadata)?;
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidTimeout("poll_interval_secs"));
        }
        if self.online_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("online_timeout_secs"));
        }
        if self.supervisor_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("supervisor_timeout_secs"));
        }

        self.configuration_overrides()?;
        Ok(())
    }

    /// Parses the `configuration` overrides into a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverrides`] when the value is not a JSON
    /// object.
    pub fn configuration_overrides(&self) -> Result<Map<String, Value>, ConfigError> {
        let Some(raw) = self
            .configuration
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
        else {
            return Ok(Map::new());
        };

        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ConfigError::InvalidOverrides(String::from(
                "expected a JSON object",
            ))),
            Err(err) => Err(ConfigError::InvalidOverrides(err.to_string())),
        }
    }

    /// Scratch directory as a path.
    #[must_use]
    pub fn tmpdir_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.tmpdir.trim())
    }

    /// Schedule used while waiting for the device to come online.
    #[must_use]
    pub const fn online_schedule(&self) -> PollSchedule {
        PollSchedule::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.online_timeout_secs),
        )
    }

    /// Schedule used while waiting for the supervisor to become idle.
    #[must_use]
    pub const fn supervisor_schedule(&self) -> PollSchedule {
        PollSchedule::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.supervisor_timeout_secs),
        )
    }

    /// Resolves a test title template key (`${options.<key>}`) to its value.
    ///
    /// Keys use the camelCase names operators know from the test catalog.
    #[must_use]
    pub fn template_value(&self, key: &str) -> Option<String> {
        match key {
            "deviceType" => Some(self.device_type.clone()),
            "resinOSVersion" | "osVersion" => Some(self.os_version.clone()),
            "applicationName" => Some(self.application_name.clone()),
            "sshKeyLabel" => Some(self.ssh_key_label.clone()),
            "tmpdir" => Some(self.tmpdir.clone()),
            "disk" => self.disk.clone(),
            "delta" => self.delta.clone(),
            "interactiveTests" => Some(self.interactive_tests.to_string()),
            _ => None,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Raised when the OS configuration overrides are malformed.
    #[error("invalid configuration overrides: {0}")]
    InvalidOverrides(String),
    /// Raised when a polling setting is zero.
    #[error("{0} must be greater than zero")]
    InvalidTimeout(&'static str),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
