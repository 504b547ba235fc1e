//! Shared setup for provisioning scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use osprobe::test_support::{ScriptedRunner, sample_run_config};
use osprobe::{
    Collaborators, DeviceTypeContract, ImageFetcher, ProvisioningOrchestrator, Results, RunConfig,
    RunError, TestCase, catalog,
};
use serde_json::json;
use tempfile::TempDir;

use super::test_doubles::{AgreeableOperator, MemorySink, ScriptedFleet, ScriptedWorkers, WorkerProbe};

/// Orchestrator wired to scripted collaborators.
pub type ScriptedOrchestrator =
    ProvisioningOrchestrator<ScriptedFleet, ScriptedWorkers, MemorySink, ScriptedRunner>;

/// Scratch directory, configuration and doubles for one scenario.
pub struct Harness {
    _tmp: TempDir,
    pub config: RunConfig,
    pub fleet: ScriptedFleet,
    pub probe: WorkerProbe,
    pub sink: MemorySink,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let tmpdir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("utf8 tempdir: {}", path.display()));
        let config = RunConfig {
            tmpdir: tmpdir.into_string(),
            poll_interval_secs: 10,
            online_timeout_secs: 60,
            supervisor_timeout_secs: 60,
            ..sample_run_config()
        };
        Self {
            _tmp: tmp,
            config,
            fleet: ScriptedFleet::new(),
            probe: WorkerProbe::default(),
            sink: MemorySink::default(),
        }
    }

    pub fn orchestrator(&self) -> ScriptedOrchestrator {
        ProvisioningOrchestrator::new(
            self.config.clone(),
            Collaborators {
                fleet: self.fleet.clone(),
                workers: ScriptedWorkers::new(self.probe.clone()),
                images: ImageFetcher::new(self.config.tmpdir_path(), None, ScriptedRunner::new()),
                sink: self.sink.clone(),
                operator: Arc::new(AgreeableOperator),
            },
        )
    }

    pub async fn run(&self) -> Result<Results, RunError> {
        self.run_catalog(catalog()).await
    }

    pub async fn run_catalog(&self, tests: &[TestCase]) -> Result<Results, RunError> {
        self.orchestrator().execute(contract(), tests).await
    }
}

/// Contract of the emulated `qemux86-64` device type.
pub fn contract() -> DeviceTypeContract {
    DeviceTypeContract::from_document(
        "qemux86-64",
        json!({
            "slug": "qemux86-64",
            "name": "QEMU x86_64",
            "data": {"arch": "amd64", "led": false, "hdmi": false},
        }),
    )
    .unwrap_or_else(|err| panic!("contract: {err}"))
}
