//! Provenance metrics and per-test outcomes for one run, plus their
//! persistence.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Key of the results record inside the store document.
pub const RESULTS_KEY: &str = "results";

const BYTES_PER_MIB: u128 = 1_048_576;

/// Formats a duration as `"<minutes>m <seconds>s"`.
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    format!("{}m {}s", seconds.div_euclid(60), seconds.rem_euclid(60))
}

/// Formats a byte count as mebibytes with two decimals, for example
/// `"1.50 Mb"`.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    let hundredths = (u128::from(bytes) * 100).div_euclid(BYTES_PER_MIB);
    format!(
        "{}.{:02} Mb",
        hundredths.div_euclid(100),
        hundredths.rem_euclid(100)
    )
}

/// Reads whole seconds from `/proc/uptime` output.
#[must_use]
pub fn parse_uptime(output: &str) -> Option<u64> {
    let first = output.split_whitespace().next()?;
    let whole = first.split_once('.').map_or(first, |(whole, _)| whole);
    whole.parse().ok()
}

/// Outcome of one executed test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    /// Rendered test title.
    pub title: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Failure description for failed tests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestReport {
    /// Report for a passing test.
    #[must_use]
    pub const fn passed(title: String) -> Self {
        Self {
            title,
            passed: true,
            error: None,
        }
    }

    /// Report for a failing test.
    #[must_use]
    pub const fn failed(title: String, error: String) -> Self {
        Self {
            title,
            passed: false,
            error: Some(error),
        }
    }
}

/// Results record written once at the end of a run.
///
/// Metric fields are write-once: the first recorded value is kept.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    author: Option<String>,
    device_type: String,
    provision_time: Option<String>,
    provision_seconds: Option<u64>,
    image_size: Option<String>,
    image_bytes: Option<u64>,
    #[serde(rename = "resinOSVersion")]
    os_version: String,
    email: Option<String>,
    tests: Vec<TestReport>,
}

fn io_error(path: &Utf8Path, err: &io::Error) -> ResultStoreError {
    ResultStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &'static str) {
    if slot.is_some() {
        warn!(field, "result already recorded; keeping the first value");
        return;
    }
    *slot = Some(value);
}

impl Results {
    /// Starts a record for the given run identity.
    #[must_use]
    pub fn new(author: Option<String>, device_type: &str, os_version: &str) -> Self {
        Self {
            author,
            device_type: device_type.to_owned(),
            os_version: os_version.to_owned(),
            ..Self::default()
        }
    }

    /// Records the boot-to-ready duration.
    pub fn record_provision_time(&mut self, seconds: u64) {
        set_once(&mut self.provision_seconds, seconds, "provisionSeconds");
        set_once(
            &mut self.provision_time,
            format_duration(seconds),
            "provisionTime",
        );
    }

    /// Records the on-disk image size.
    pub fn record_image_size(&mut self, bytes: u64) {
        set_once(&mut self.image_bytes, bytes, "imageBytes");
        set_once(&mut self.image_size, format_size(bytes), "imageSize");
    }

    /// Records the operator identity from the fleet session.
    pub fn record_email(&mut self, email: String) {
        set_once(&mut self.email, email, "email");
    }

    /// Appends the outcome of one test.
    pub fn push_test(&mut self, report: TestReport) {
        self.tests.push(report);
    }

    /// Recorded author.
    #[must_use]
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Device type under test.
    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Formatted provisioning duration.
    #[must_use]
    pub fn provision_time(&self) -> Option<&str> {
        self.provision_time.as_deref()
    }

    /// Provisioning duration in seconds.
    #[must_use]
    pub const fn provision_seconds(&self) -> Option<u64> {
        self.provision_seconds
    }

    /// Formatted image size.
    #[must_use]
    pub fn image_size(&self) -> Option<&str> {
        self.image_size.as_deref()
    }

    /// Image size in bytes.
    #[must_use]
    pub const fn image_bytes(&self) -> Option<u64> {
        self.image_bytes
    }

    /// OS version under test.
    #[must_use]
    pub fn os_version(&self) -> &str {
        &self.os_version
    }

    /// Operator email.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Per-test outcomes in execution order.
    #[must_use]
    pub fn tests(&self) -> &[TestReport] {
        &self.tests
    }
}

/// Errors raised while persisting results.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ResultStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the existing document cannot be parsed or rendered.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the existing document is not a JSON object.
    #[error("invalid results store {path}: {message}")]
    InvalidStructure {
        /// Path that had invalid content.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Destination for the final results record.
pub trait ResultSink {
    /// Stores `results`, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError`] when the record cannot be written.
    fn persist(&self, results: &Results) -> Result<(), ResultStoreError>;
}

/// JSON document store keeping the record under [`RESULTS_KEY`].
///
/// Other top-level keys of an existing document are preserved.
#[derive(Clone, Debug)]
pub struct FileResultStore {
    path: Utf8PathBuf,
}

impl FileResultStore {
    /// Creates a store writing to `path`.
    #[must_use]
    pub const fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    /// Document location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn parent(&self) -> &Utf8Path {
        self.path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."))
    }

    fn file_name(&self) -> Result<&str, ResultStoreError> {
        self.path
            .file_name()
            .ok_or_else(|| ResultStoreError::InvalidStructure {
                path: self.path.clone(),
                message: String::from("results path is missing a filename"),
            })
    }

    fn read_document(
        &self,
        dir: &Dir,
        file_name: &str,
    ) -> Result<Map<String, Value>, ResultStoreError> {
        let exists = dir
            .try_exists(file_name)
            .map_err(|err| io_error(&self.path, &err))?;
        if !exists {
            return Ok(Map::new());
        }
        let contents = dir
            .read_to_string(file_name)
            .map_err(|err| io_error(&self.path, &err))?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ResultStoreError::InvalidStructure {
                path: self.path.clone(),
                message: String::from("document root is not an object"),
            }),
            Err(err) => Err(ResultStoreError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            }),
        }
    }

    /// Reads the stored record, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError`] when the document cannot be read.
    pub fn load(&self) -> Result<Option<Value>, ResultStoreError> {
        let parent = self.parent();
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(parent, &err)),
        };
        let mut document = self.read_document(&dir, self.file_name()?)?;
        Ok(document.remove(RESULTS_KEY))
    }
}

impl ResultSink for FileResultStore {
    fn persist(&self, results: &Results) -> Result<(), ResultStoreError> {
        let parent = self.parent();
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let file_name = self.file_name()?;

        let mut document = self.read_document(&dir, file_name)?;
        let record = serde_json::to_value(results).map_err(|err| ResultStoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        document.insert(String::from(RESULTS_KEY), record);

        let rendered = serde_json::to_string_pretty(&Value::Object(document)).map_err(|err| {
            ResultStoreError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            }
        })?;
        dir.write(file_name, rendered)
            .map_err(|err| io_error(&self.path, &err))
    }
}
