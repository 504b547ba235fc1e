//! Drives one provisioning run from fleet registration to teardown.
//!
//! Setup phases execute once, in a fixed order, and the first failure
//! aborts the rest. Selected tests then run one after another against the
//! shared [`RunContext`]; a test failure is recorded and the suite moves on,
//! while a crashed device worker ends the suite. The worker is bound before
//! anything else runs, so whatever happened afterwards it is powered off
//! exactly once and the results record is persisted.

mod error;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::command::CommandRunner;
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::contract::DeviceTypeContract;
use crate::fleet::{DevicePlaceholder, FleetClient, FleetError, SUPERVISOR_IDLE};
use crate::image::{ImageFetcher, OsImage};
use crate::operator::Operator;
use crate::poll::wait_until;
use crate::results::{ResultSink, Results, TestReport, parse_uptime};
use crate::suite::{SelectedTest, SelectionError, TestCase, TestEnv, select};
use crate::worker::{WorkerError, WorkerFactory};

pub use error::{RunError, SetupError};

/// Application variable enabling delta updates on the supervisor.
pub const DELTA_ENV: &str = "RESIN_SUPERVISOR_DELTA";

const UPTIME_COMMAND: &str = "cat /proc/uptime";

#[derive(Debug, Error)]
enum Fatal {
    #[error(transparent)]
    Setup(Box<SetupError>),
    #[error(transparent)]
    Selection(SelectionError),
    #[error(transparent)]
    Worker(WorkerError),
}

impl From<SetupError> for Fatal {
    fn from(value: SetupError) -> Self {
        Self::Setup(Box::new(value))
    }
}

impl Fatal {
    fn into_run_error(self, teardown: Option<&str>) -> RunError {
        let message = append_teardown_note(self.to_string(), teardown);
        match self {
            Self::Setup(source) => RunError::Setup { message, source },
            Self::Selection(source) => RunError::Selection { message, source },
            Self::Worker(source) => RunError::Worker { message, source },
        }
    }
}

/// Services a run depends on.
#[derive(Debug)]
pub struct Collaborators<F, W, S, R> {
    /// Fleet service client.
    pub fleet: F,
    /// Creates the worker for the device type under test.
    pub workers: W,
    /// Downloads and configures the OS image.
    pub images: ImageFetcher<R>,
    /// Receives the final results record.
    pub sink: S,
    /// Person able to act on the device.
    pub operator: Arc<dyn Operator>,
}

/// Executes provisioning runs.
#[derive(Debug)]
pub struct ProvisioningOrchestrator<F, W, S, R> {
    config: RunConfig,
    fleet: F,
    workers: W,
    images: ImageFetcher<R>,
    sink: S,
    operator: Arc<dyn Operator>,
}

impl<F, W, S, R> ProvisioningOrchestrator<F, W, S, R>
where
    F: FleetClient,
    W: WorkerFactory,
    S: ResultSink,
    R: CommandRunner,
{
    /// Creates an orchestrator for `config`.
    #[must_use]
    pub fn new(config: RunConfig, collaborators: Collaborators<F, W, S, R>) -> Self {
        let Collaborators {
            fleet,
            workers,
            images,
            sink,
            operator,
        } = collaborators;
        Self {
            config,
            fleet,
            workers,
            images,
            sink,
            operator,
        }
    }

    /// Run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs setup, the applicable tests of `catalog`, and teardown.
    ///
    /// Returns the persisted results when the run completed; failed tests
    /// are reported inside the results, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when selection, setup or the device worker
    /// failed, or when teardown could not power off the device or persist
    /// the results. Teardown has already run when an error is returned.
    pub async fn execute(
        &self,
        contract: DeviceTypeContract,
        catalog: &[TestCase],
    ) -> Result<Results, RunError> {
        let mut context = RunContext::new(contract);
        let mut results = Results::new(
            self.config.author.clone(),
            &self.config.device_type,
            &self.config.os_version,
        );

        let outcome = self.run_phases(&mut context, &mut results, catalog).await;
        if let Err(err) = &outcome {
            error!(error = %err, "run aborted; tearing down");
        }
        self.teardown(&mut context, results, outcome).await
    }

    async fn run_phases(
        &self,
        context: &mut RunContext,
        results: &mut Results,
        catalog: &[TestCase],
    ) -> Result<(), Fatal> {
        let worker = self
            .workers
            .create(&self.config.device_type, context.contract())
            .map_err(SetupError::worker("select worker"))?;
        info!(kind = %worker.kind(), "bound device worker");
        context.worker = Some(worker);

        let selected =
            select(catalog, &self.config, context.contract()).map_err(Fatal::Selection)?;
        info!(
            selected = selected.len(),
            available = catalog.len(),
            "selected tests"
        );
        self.setup(context, results).await?;
        self.run_tests(context, results, &selected).await
    }

    async fn setup(
        &self,
        context: &mut RunContext,
        results: &mut Results,
    ) -> Result<(), SetupError> {
        let placeholder = self.register(context).await?;
        let image = self.provision_image(&placeholder).await?;
        results.record_image_size(image.bytes());

        let powered_on = self.bring_up(context, &image).await?;
        context.image = Some(image);

        let uuid = placeholder.uuid.as_str();
        self.await_ready(uuid).await?;
        let ready_after = powered_on.elapsed();

        results.record_provision_time(self.provision_seconds(context, uuid, ready_after).await);
        results.record_email(
            self.fleet
                .session_email()
                .await
                .map_err(SetupError::fleet("read session email"))?,
        );
        context.dashboard_url = Some(
            self.fleet
                .dashboard_url(uuid)
                .await
                .map_err(SetupError::fleet("resolve dashboard URL"))?,
        );
        info!(%uuid, "device provisioned");
        Ok(())
    }

    async fn register(&self, context: &mut RunContext) -> Result<DevicePlaceholder, SetupError> {
        let config = &self.config;
        info!("authenticating with the fleet service");
        self.fleet
            .authenticate(&config.api_key)
            .await
            .map_err(SetupError::fleet("authenticate"))?;

        let application = self
            .fleet
            .create_application(&config.application_name, &config.device_type)
            .await
            .map_err(SetupError::fleet("create application"))?;
        info!(application = %application.name, id = application.id, "using application");

        let key = self
            .fleet
            .create_ssh_key(&config.ssh_key_label, &config.tmpdir_path())
            .await
            .map_err(SetupError::fleet("create SSH key"))?;
        context.ssh_key = Some(key);

        if let Some(delta) = config.delta.as_deref().filter(|value| !value.trim().is_empty()) {
            self.fleet
                .set_application_env(&application, DELTA_ENV, delta)
                .await
                .map_err(SetupError::fleet("enable delta updates"))?;
        }

        let placeholder = self
            .fleet
            .register_device_placeholder(&application)
            .await
            .map_err(SetupError::fleet("register device"))?;
        info!(uuid = %placeholder.uuid, "registered device placeholder");
        context.uuid = Some(placeholder.uuid.clone());
        context.application = Some(application);
        Ok(placeholder)
    }

    async fn provision_image(
        &self,
        placeholder: &DevicePlaceholder,
    ) -> Result<OsImage, SetupError> {
        let config = &self.config;
        let mut options = config.configuration_overrides()?;
        options
            .entry("version")
            .or_insert_with(|| config.os_version.clone().into());

        let configuration = self
            .fleet
            .device_os_configuration(placeholder, &options)
            .await
            .map_err(SetupError::fleet("fetch device configuration"))?;

        let image = self
            .images
            .fetch(
                &self.fleet,
                &config.device_type,
                &config.os_version,
                &configuration,
            )
            .await?;
        info!(path = %image.path(), bytes = image.bytes(), "OS image ready");
        Ok(image)
    }

    /// Prepares, flashes and powers on the bound worker.
    async fn bring_up(
        &self,
        context: &mut RunContext,
        image: &OsImage,
    ) -> Result<Instant, SetupError> {
        let bound = context
            .worker_mut()
            .map_err(SetupError::worker("prepare worker"))?;
        bound
            .prepare()
            .await
            .map_err(SetupError::worker("prepare worker"))?;
        bound
            .flash(image)
            .await
            .map_err(SetupError::worker("flash image"))?;
        bound
            .power_on()
            .await
            .map_err(SetupError::worker("power on"))?;
        info!("device powered on");
        Ok(Instant::now())
    }

    async fn await_ready(&self, uuid: &str) -> Result<(), SetupError> {
        let online = wait_until(
            || self.fleet.is_device_online(uuid),
            self.config.online_schedule(),
        )
        .await
        .map_err(SetupError::poll("device online"))?;
        info!(attempts = online.attempts, "device is online");

        let idle = wait_until(
            || async move {
                let status = self.fleet.device_status(uuid).await?;
                Ok::<_, FleetError>(status == SUPERVISOR_IDLE)
            },
            self.config.supervisor_schedule(),
        )
        .await
        .map_err(SetupError::poll("supervisor idle"))?;
        info!(attempts = idle.attempts, "supervisor is idle");
        Ok(())
    }

    async fn provision_seconds(
        &self,
        context: &RunContext,
        uuid: &str,
        ready_after: Duration,
    ) -> u64 {
        let fallback = ready_after.as_secs();
        let Some(key) = context.ssh_key() else {
            return fallback;
        };
        match self.fleet.host_os_command(uuid, key, UPTIME_COMMAND).await {
            Ok(output) => parse_uptime(&output.stdout).unwrap_or_else(|| {
                warn!(output = %output.stdout.trim(), "unreadable device uptime; using wall clock");
                fallback
            }),
            Err(err) => {
                warn!(error = %err, "could not read device uptime; using wall clock");
                fallback
            }
        }
    }

    async fn run_tests(
        &self,
        context: &mut RunContext,
        results: &mut Results,
        selected: &[SelectedTest<'_>],
    ) -> Result<(), Fatal> {
        for test in selected {
            info!(title = %test.title, "running test");
            let env = TestEnv {
                context: &*context,
                config: &self.config,
                fleet: &self.fleet,
                operator: self.operator.as_ref(),
                case: test.case,
            };
            match (test.case.run)(env).await {
                Ok(()) => {
                    info!(title = %test.title, "test passed");
                    results.push_test(TestReport::passed(test.title.clone()));
                }
                Err(err) => {
                    error!(title = %test.title, error = %err, "test failed");
                    results.push_test(TestReport::failed(test.title.clone(), err.to_string()));
                }
            }

            if let Some(worker) = context.worker.as_mut() {
                worker.check().map_err(Fatal::Worker)?;
            }
        }
        Ok(())
    }

    async fn teardown(
        &self,
        context: &mut RunContext,
        results: Results,
        outcome: Result<(), Fatal>,
    ) -> Result<Results, RunError> {
        let power_error = match context.worker.as_mut() {
            Some(worker) => {
                info!(kind = %worker.kind(), "powering off device");
                worker.power_off().await.err()
            }
            None => {
                warn!("no device worker was bound; nothing to power off");
                None
            }
        };
        let persist_error = self.sink.persist(&results).err();

        if let Err(fatal) = outcome {
            let note = teardown_note(power_error.as_ref(), persist_error.as_ref());
            return Err(fatal.into_run_error(note.as_deref()));
        }
        if let Some(err) = power_error {
            return Err(RunError::Teardown(err));
        }
        if let Some(err) = persist_error {
            return Err(RunError::Persist(err));
        }
        Ok(results)
    }
}

fn teardown_note<P: Display, S: Display>(power: Option<&P>, persist: Option<&S>) -> Option<String> {
    let parts: Vec<String> = power
        .map(|err| format!("power off: {err}"))
        .into_iter()
        .chain(persist.map(|err| format!("persist results: {err}")))
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("; "))
}

fn append_teardown_note(message: String, teardown: Option<&str>) -> String {
    let Some(note) = teardown else {
        return message;
    };
    format!("{message} (teardown also failed: {note})")
}
