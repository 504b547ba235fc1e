//! Acceptance test catalog and selection.
//!
//! Descriptors are static data: a title template, an interactive flag, an
//! optional compatibility schema matched against the device-type contract,
//! and an entry point. [`select`] decides which descriptors apply to a run
//! and renders their titles; the orchestrator executes them one by one.

mod catalog;
mod manual;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

use crate::config::RunConfig;
use crate::context::RunContext;
use crate::contract::DeviceTypeContract;
use crate::fleet::{FleetClient, FleetError};
use crate::operator::{Operator, OperatorError};
use crate::schema::{self, SchemaError};

pub use catalog::{CATALOG, catalog, release_label};
pub use manual::run_manual;

/// Future returned by a test entry point.
pub type TestFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TestFailure>> + 'a>>;

/// Entry point of a test descriptor.
pub type TestRun = for<'a> fn(TestEnv<'a>) -> TestFuture<'a>;

/// Everything a test can see while it runs.
#[derive(Clone, Copy)]
pub struct TestEnv<'a> {
    /// Shared run state.
    pub context: &'a RunContext,
    /// Run configuration.
    pub config: &'a RunConfig,
    /// Fleet service handle.
    pub fleet: &'a dyn FleetClient,
    /// Person able to act on the device.
    pub operator: &'a dyn Operator,
    /// Descriptor being executed.
    pub case: &'a TestCase,
}

impl<'a> TestEnv<'a> {
    /// UUID of the device under test.
    ///
    /// # Errors
    ///
    /// Returns [`TestFailure::MissingContext`] before the device was
    /// registered.
    pub fn uuid(&self) -> Result<&'a str, TestFailure> {
        self.context
            .uuid()
            .ok_or(TestFailure::MissingContext("device uuid"))
    }
}

/// Operator procedure of an interactive descriptor.
///
/// Steps are instructions the operator acknowledges; assertions are yes/no
/// questions that must all be answered "yes". Both accept
/// `${options.<key>}` placeholders.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ManualSteps {
    /// Instructions shown in order.
    pub steps: &'static [&'static str],
    /// Confirmations asked after the steps.
    pub assertions: &'static [&'static str],
}

/// Static description of one acceptance test.
#[derive(Clone, Copy, Debug)]
pub struct TestCase {
    /// Stable identifier used in logs and errors.
    pub id: &'static str,
    /// Title template with `${options.<key>}` placeholders.
    pub title: &'static str,
    /// Whether the test needs an operator.
    pub interactive: bool,
    /// JSON schema the device-type contract must satisfy.
    pub compatibility: Option<&'static str>,
    /// Operator procedure for interactive tests.
    pub manual: Option<ManualSteps>,
    /// Entry point.
    pub run: TestRun,
}

/// Recoverable failure of one test.
#[derive(Debug, Error)]
pub enum TestFailure {
    /// Raised when an observed value differs from the expected one.
    #[error("assertion failed: {0}")]
    Assertion(String),
    /// Raised when a fleet call made by the test fails.
    #[error(transparent)]
    Fleet(#[from] FleetError),
    /// Raised when the operator cannot be reached.
    #[error(transparent)]
    Operator(#[from] OperatorError),
    /// Raised when the operator answers "no".
    #[error("operator declined: {0}")]
    Declined(String),
    /// Raised when setup did not record something the test needs.
    #[error("run context is missing the {0}")]
    MissingContext(&'static str),
}

/// Descriptor chosen for a run, paired with its rendered title.
#[derive(Clone, Debug)]
pub struct SelectedTest<'c> {
    /// Rendered display title.
    pub title: String,
    /// Descriptor to execute.
    pub case: &'c TestCase,
}

/// Errors raised while selecting tests.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SelectionError {
    /// Raised when a compatibility fragment is not valid JSON.
    #[error("test '{id}' has an unreadable compatibility schema: {message}")]
    InvalidCompatibility {
        /// Descriptor identifier.
        id: &'static str,
        /// Parser message.
        message: String,
    },
    /// Raised when a compatibility fragment is malformed.
    #[error("test '{id}' has an invalid compatibility schema")]
    Schema {
        /// Descriptor identifier.
        id: &'static str,
        /// Underlying schema error.
        #[source]
        source: SchemaError,
    },
}

/// Chooses the descriptors of `catalog` that apply to this run, in catalog
/// order.
///
/// Interactive descriptors are skipped unless `interactive_tests` is set.
/// Descriptors whose compatibility schema rejects `contract` are skipped,
/// not failed.
///
/// # Errors
///
/// Returns [`SelectionError`] when a compatibility schema is malformed.
pub fn select<'c>(
    catalog: &'c [TestCase],
    config: &RunConfig,
    contract: &DeviceTypeContract,
) -> Result<Vec<SelectedTest<'c>>, SelectionError> {
    let mut selected = Vec::new();
    for case in catalog {
        if case.interactive && !config.interactive_tests {
            continue;
        }
        if let Some(text) = case.compatibility {
            let fragment: Value = serde_json::from_str(text).map_err(|err| {
                SelectionError::InvalidCompatibility {
                    id: case.id,
                    message: err.to_string(),
                }
            })?;
            let compatible = schema::matches(&fragment, contract.document())
                .map_err(|source| SelectionError::Schema { id: case.id, source })?;
            if !compatible {
                continue;
            }
        }
        selected.push(SelectedTest {
            title: render_title(case.title, config),
            case,
        });
    }
    Ok(selected)
}

/// Substitutes `${options.<key>}` placeholders with configuration values.
///
/// Unknown keys render as the empty string. Placeholders outside the
/// `options` namespace are left untouched.
#[must_use]
pub fn render_title(template: &str, config: &RunConfig) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((before, after)) = rest.split_once("${") {
        rendered.push_str(before);
        let Some((expression, tail)) = after.split_once('}') else {
            rendered.push_str("${");
            rendered.push_str(after);
            return rendered;
        };
        if let Some(key) = expression.trim().strip_prefix("options.") {
            rendered.push_str(&config.template_value(key.trim()).unwrap_or_default());
        } else {
            rendered.push_str("${");
            rendered.push_str(expression);
            rendered.push('}');
        }
        rest = tail;
    }
    rendered.push_str(rest);
    rendered
}
