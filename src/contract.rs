//! Device-type contracts loaded from the contracts directory.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::Value;
use thiserror::Error;

/// Sub-directory of the contracts root holding device-type documents.
pub const DEVICE_TYPE_DIR: &str = "hw.device-type";

/// Errors raised while loading a device-type contract.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ContractError {
    /// Raised when the slug cannot name a contract file.
    #[error("invalid device type slug '{0}'")]
    InvalidSlug(String),
    /// Raised when the contract file cannot be read.
    #[error("failed to read contract {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the contract is not a JSON object.
    #[error("failed to parse contract {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the document describes a different device type.
    #[error("contract {path} declares slug '{found}', expected '{expected}'")]
    SlugMismatch {
        /// Contract path.
        path: Utf8PathBuf,
        /// Slug requested by the caller.
        expected: String,
        /// Slug found in the document.
        found: String,
    },
}

/// Immutable description of one device type's capabilities.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceTypeContract {
    slug: String,
    document: Value,
}

impl DeviceTypeContract {
    /// Wraps an already parsed contract document.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Parse`] when the document is not an object
    /// and [`ContractError::SlugMismatch`] when it names another slug.
    pub fn from_document(slug: &str, document: Value) -> Result<Self, ContractError> {
        let path = Utf8PathBuf::from(format!("<{slug}>"));
        Self::validated(slug, document, &path)
    }

    fn validated(slug: &str, document: Value, path: &Utf8Path) -> Result<Self, ContractError> {
        if !document.is_object() {
            return Err(ContractError::Parse {
                path: path.to_path_buf(),
                message: String::from("contract root must be an object"),
            });
        }
        if let Some(found) = document.get("slug").and_then(Value::as_str)
            && found != slug
        {
            return Err(ContractError::SlugMismatch {
                path: path.to_path_buf(),
                expected: slug.to_owned(),
                found: found.to_owned(),
            });
        }
        Ok(Self {
            slug: slug.to_owned(),
            document,
        })
    }

    /// Loads `<root>/hw.device-type/<slug>.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError`] when the slug is unusable, or the file
    /// cannot be read or parsed.
    pub fn load(root: &Utf8Path, slug: &str) -> Result<Self, ContractError> {
        let trimmed = slug.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('.')
            || trimmed.contains(['/', '\\'])
        {
            return Err(ContractError::InvalidSlug(slug.to_owned()));
        }

        let relative = Utf8PathBuf::from(DEVICE_TYPE_DIR).join(format!("{trimmed}.json"));
        let path = root.join(&relative);
        let dir = Dir::open_ambient_dir(root, ambient_authority()).map_err(|err| {
            ContractError::Io {
                path: root.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        let contents = dir
            .read_to_string(&relative)
            .map_err(|err| ContractError::Io {
                path: path.clone(),
                message: err.to_string(),
            })?;
        let document = serde_json::from_str(&contents).map_err(|err| ContractError::Parse {
            path: path.clone(),
            message: err.to_string(),
        })?;
        Self::validated(trimmed, document, &path)
    }

    /// Device type slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Human readable name, falling back to the slug.
    #[must_use]
    pub fn name(&self) -> &str {
        self.document
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&self.slug)
    }

    /// CPU architecture declared under `data.arch`.
    #[must_use]
    pub fn arch(&self) -> Option<&str> {
        self.document.pointer("/data/arch").and_then(Value::as_str)
    }

    /// Whole contract document, used for compatibility matching.
    #[must_use]
    pub const fn document(&self) -> &Value {
        &self.document
    }
}
