//! Core library for the `osprobe` OS image acceptance tool.
//!
//! The crate provisions a device (an emulator or a physical board) with a
//! freshly configured OS image, waits until it joins the fleet and its
//! supervisor settles, runs the applicable acceptance tests against it and
//! records provenance metrics. The device is always powered off and the
//! results are always persisted, however the run ends.

pub mod command;
pub mod config;
pub mod context;
pub mod contract;
pub mod fleet;
pub mod image;
pub mod operator;
pub mod orchestrator;
pub mod poll;
pub mod results;
pub mod schema;
pub mod suite;
pub mod test_support;
pub mod worker;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, RunConfig};
pub use context::RunContext;
pub use contract::{ContractError, DeviceTypeContract};
pub use fleet::{
    Application, DevicePlaceholder, FleetClient, FleetError, FleetFuture, HttpFleetClient, SshKey,
};
pub use image::{ImageError, ImageFetcher, OsImage};
pub use operator::{Operator, OperatorError, TerminalOperator};
pub use orchestrator::{Collaborators, ProvisioningOrchestrator, RunError, SetupError};
pub use poll::{PollError, PollSchedule, Polled, wait_until};
pub use results::{FileResultStore, ResultSink, ResultStoreError, Results, TestReport};
pub use suite::{
    CATALOG, SelectedTest, SelectionError, TestCase, TestEnv, TestFailure, catalog, select,
};
pub use worker::{
    DeviceWorker, WorkerConfig, WorkerError, WorkerFactory, WorkerKind, WorkerRegistry,
    WorkerState,
};
