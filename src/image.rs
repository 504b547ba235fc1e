//! OS image retrieval and configuration.
//!
//! [`ImageFetcher`] downloads the image for a device type and release into
//! the scratch directory, stores the device configuration beside it and
//! optionally hands both to an external configurator that injects the
//! configuration into the image's boot partition.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::command::{CommandError, CommandRunner};
use crate::fleet::{FleetClient, FleetError};

/// File name of the device configuration written next to the image.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Errors raised while fetching or configuring an OS image.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ImageError {
    /// Raised when the device type or version cannot name an image file.
    #[error("invalid image request: {0}")]
    InvalidRequest(String),
    /// Raised when the download fails.
    #[error("image download failed: {0}")]
    Fleet(#[from] FleetError),
    /// Raised when local image files cannot be handled.
    #[error("{path}: {message}")]
    Io {
        /// Affected path.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the configurator rejects the image.
    #[error("image configuration failed: {0}")]
    Configure(#[from] CommandError),
}

/// Downloaded image and its configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OsImage {
    path: Utf8PathBuf,
    config_path: Utf8PathBuf,
    bytes: u64,
}

impl OsImage {
    /// Wraps an image already present on disk.
    #[must_use]
    pub const fn new(path: Utf8PathBuf, config_path: Utf8PathBuf, bytes: u64) -> Self {
        Self {
            path,
            config_path,
            bytes,
        }
    }

    /// Image file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Device configuration file.
    #[must_use]
    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Size of the image file on disk.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Size of the file `path` ultimately points to.
///
/// # Errors
///
/// Returns [`ImageError::Io`] when the path cannot be resolved.
pub async fn real_size(path: &Utf8Path) -> Result<u64, ImageError> {
    let io_error = |err: std::io::Error| ImageError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let resolved = tokio::fs::canonicalize(path).await.map_err(io_error)?;
    let metadata = tokio::fs::metadata(resolved).await.map_err(io_error)?;
    Ok(metadata.len())
}

fn require_component(value: &str, what: &str) -> Result<(), ImageError> {
    if value.trim().is_empty() || value.contains(['/', '\\']) || value.starts_with('.') {
        return Err(ImageError::InvalidRequest(format!(
            "{what} '{value}' cannot name an image file"
        )));
    }
    Ok(())
}

/// Fetches OS images into a scratch directory.
#[derive(Clone, Debug)]
pub struct ImageFetcher<R> {
    tmpdir: Utf8PathBuf,
    configure_bin: Option<String>,
    runner: R,
}

impl<R: CommandRunner> ImageFetcher<R> {
    /// Creates a fetcher storing images under `tmpdir`.
    #[must_use]
    pub const fn new(tmpdir: Utf8PathBuf, configure_bin: Option<String>, runner: R) -> Self {
        Self {
            tmpdir,
            configure_bin,
            runner,
        }
    }

    /// Location the image for `device_type` and `version` is stored at.
    #[must_use]
    pub fn image_path(&self, device_type: &str, version: &str) -> Utf8PathBuf {
        self.tmpdir.join(format!("{device_type}-{version}.img"))
    }

    /// Downloads and configures the image.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError`] when the request is unusable, the download
    /// fails, files cannot be written, or the configurator fails.
    pub async fn fetch(
        &self,
        fleet: &dyn FleetClient,
        device_type: &str,
        version: &str,
        configuration: &Value,
    ) -> Result<OsImage, ImageError> {
        require_component(device_type, "device type")?;
        require_component(version, "version")?;

        tokio::fs::create_dir_all(&self.tmpdir)
            .await
            .map_err(|err| ImageError::Io {
                path: self.tmpdir.clone(),
                message: err.to_string(),
            })?;

        let path = self.image_path(device_type, version);
        info!(%path, %device_type, %version, "downloading OS image");
        fleet.download_os_image(device_type, version, &path).await?;

        let config_path = self.write_configuration(configuration)?;
        self.configure(&path, &config_path)?;

        let bytes = real_size(&path).await?;
        Ok(OsImage::new(path, config_path, bytes))
    }

    fn write_configuration(&self, configuration: &Value) -> Result<Utf8PathBuf, ImageError> {
        let config_path = self.tmpdir.join(CONFIG_FILE_NAME);
        let io_error = |message: String| ImageError::Io {
            path: config_path.clone(),
            message,
        };
        let contents =
            serde_json::to_vec_pretty(configuration).map_err(|err| io_error(err.to_string()))?;
        let dir = Dir::open_ambient_dir(&self.tmpdir, ambient_authority())
            .map_err(|err| io_error(err.to_string()))?;
        dir.write(CONFIG_FILE_NAME, contents)
            .map_err(|err| io_error(err.to_string()))?;
        Ok(config_path)
    }

    fn configure(&self, image: &Utf8Path, config_path: &Utf8Path) -> Result<(), ImageError> {
        let Some(bin) = self.configure_bin.as_deref() else {
            return Ok(());
        };
        let args = [
            OsString::from("os"),
            OsString::from("configure"),
            OsString::from(image.as_str()),
            OsString::from("--config"),
            OsString::from(config_path.as_str()),
        ];
        self.runner.run_checked(bin, &args)?;
        Ok(())
    }
}
