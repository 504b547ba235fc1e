//! Command-line interface definitions for the `osprobe` binary.
//!
//! The parser structures live here so the binary and the build script that
//! renders the manual page share one definition.

use clap::{Args, Parser};

/// Top-level CLI for the `osprobe` binary.
#[derive(Debug, Parser)]
#[command(
    name = "osprobe",
    about = "Provision a device with an OS image and run acceptance tests against it",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision the device, run the selected tests and record results.
    #[command(
        name = "run",
        about = "Provision the device, run the selected tests and record results"
    )]
    Run(RunOverrides),
    /// List the tests a run would execute without contacting the fleet.
    #[command(
        name = "plan",
        about = "List the tests a run would execute without contacting the fleet"
    )]
    Plan(RunOverrides),
}

/// Overrides applied on top of the loaded configuration.
#[derive(Args, Clone, Debug, Default)]
pub(crate) struct RunOverrides {
    /// Device type slug to provision (overrides `device_type`).
    #[arg(long, value_name = "SLUG")]
    pub(crate) device_type: Option<String>,
    /// OS release to provision (overrides `os_version`).
    #[arg(long, value_name = "VERSION")]
    pub(crate) os_version: Option<String>,
    /// Include tests that need an operator at the device.
    #[arg(long)]
    pub(crate) interactive: bool,
}
