//! Test doubles for provisioning scenarios.

use std::sync::{Arc, Mutex, MutexGuard};

use camino::Utf8Path;
use osprobe::operator::OperatorFuture;
use osprobe::worker::{WorkerFuture, WorkerLifecycle};
use osprobe::{
    Application, CommandOutput, DevicePlaceholder, DeviceTypeContract, DeviceWorker, FleetClient,
    FleetError, FleetFuture, Operator, OsImage, ResultSink, ResultStoreError, Results, SshKey,
    WorkerError, WorkerFactory, WorkerKind, WorkerState,
};
use serde_json::{Map, Value, json};

/// UUID handed out for the registered device.
pub const DEVICE_UUID: &str = "5f0c2b9e1d3a4c7f8e6b0a9d2c4e6f81";

#[derive(Debug)]
struct FleetState {
    calls: Vec<&'static str>,
    fail_on: Option<&'static str>,
    online_after: u32,
    idle_after: u32,
    online_polls: u32,
    status_polls: u32,
    uptime: Option<String>,
    os_version: Option<String>,
    env: Vec<(String, String)>,
    image_bytes: usize,
}

/// Scripted fleet service: the device comes online and its supervisor
/// settles after configurable numbers of polls.
#[derive(Clone, Debug)]
pub struct ScriptedFleet {
    state: Arc<Mutex<FleetState>>,
}

impl ScriptedFleet {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FleetState {
                calls: Vec::new(),
                fail_on: None,
                online_after: 1,
                idle_after: 1,
                online_polls: 0,
                status_polls: 0,
                uptime: Some(String::from("42.17 30.00\n")),
                os_version: Some(String::from("Resin OS 2.0.6+rev3")),
                env: Vec::new(),
                image_bytes: 4096,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state
            .lock()
            .unwrap_or_else(|err| panic!("lock poisoned: fleet state: {err}"))
    }

    pub fn online_after(&self, polls: u32) {
        self.lock().online_after = polls;
    }

    pub fn idle_after(&self, polls: u32) {
        self.lock().idle_after = polls;
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.lock().fail_on = Some(operation);
    }

    pub fn without_uptime(&self) {
        self.lock().uptime = None;
    }

    pub fn without_os_version(&self) {
        self.lock().os_version = None;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn online_polls(&self) -> u32 {
        self.lock().online_polls
    }

    pub fn status_polls(&self) -> u32 {
        self.lock().status_polls
    }

    pub fn env(&self) -> Vec<(String, String)> {
        self.lock().env.clone()
    }

    fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, FleetState>, FleetError> {
        let mut state = self.lock();
        state.calls.push(operation);
        if state.fail_on == Some(operation) {
            return Err(FleetError::Status {
                operation,
                status: 503,
                body: String::from("service unavailable"),
            });
        }
        Ok(state)
    }
}

impl FleetClient for ScriptedFleet {
    fn authenticate<'a>(&'a self, _token: &'a str) -> FleetFuture<'a, ()> {
        let result = self.enter("authenticate").map(drop);
        Box::pin(async move { result })
    }

    fn create_application<'a>(
        &'a self,
        name: &'a str,
        device_type: &'a str,
    ) -> FleetFuture<'a, Application> {
        let result = self.enter("create_application").map(|_| Application {
            id: 7,
            name: name.to_owned(),
            device_type: device_type.to_owned(),
        });
        Box::pin(async move { result })
    }

    fn create_ssh_key<'a>(
        &'a self,
        label: &'a str,
        directory: &'a Utf8Path,
    ) -> FleetFuture<'a, SshKey> {
        let result = self.enter("create_ssh_key").map(|_| SshKey {
            label: label.to_owned(),
            public_key: String::from("ssh-ed25519 AAAAC3Nza osprobe"),
            private_key_path: directory.join("id_ed25519_osprobe"),
        });
        Box::pin(async move { result })
    }

    fn set_application_env<'a>(
        &'a self,
        _application: &'a Application,
        name: &'a str,
        value: &'a str,
    ) -> FleetFuture<'a, ()> {
        let result = self
            .enter("set_application_env")
            .map(|mut state| state.env.push((name.to_owned(), value.to_owned())));
        Box::pin(async move { result })
    }

    fn register_device_placeholder<'a>(
        &'a self,
        application: &'a Application,
    ) -> FleetFuture<'a, DevicePlaceholder> {
        let result = self
            .enter("register_device_placeholder")
            .map(|_| DevicePlaceholder {
                uuid: String::from(DEVICE_UUID),
                api_key: String::from("device-api-key"),
                device_id: 11,
                application_id: application.id,
                device_type: application.device_type.clone(),
            });
        Box::pin(async move { result })
    }

    fn device_os_configuration<'a>(
        &'a self,
        placeholder: &'a DevicePlaceholder,
        options: &'a Map<String, Value>,
    ) -> FleetFuture<'a, Value> {
        let result = self.enter("device_os_configuration").map(|_| {
            json!({
                "uuid": placeholder.uuid,
                "deviceApiKey": placeholder.api_key,
                "options": options,
            })
        });
        Box::pin(async move { result })
    }

    fn download_os_image<'a>(
        &'a self,
        _device_type: &'a str,
        _version: &'a str,
        destination: &'a Utf8Path,
    ) -> FleetFuture<'a, u64> {
        let bytes = self.enter("download_os_image").map(|state| state.image_bytes);
        Box::pin(async move {
            let size = bytes?;
            tokio::fs::write(destination, vec![0_u8; size])
                .await
                .map_err(|err| FleetError::Io {
                    path: destination.to_path_buf(),
                    message: err.to_string(),
                })?;
            Ok(u64::try_from(size).unwrap_or(u64::MAX))
        })
    }

    fn is_device_online<'a>(&'a self, _uuid: &'a str) -> FleetFuture<'a, bool> {
        let result = self.enter("is_device_online").map(|mut state| {
            state.online_polls += 1;
            state.online_polls >= state.online_after
        });
        Box::pin(async move { result })
    }

    fn device_status<'a>(&'a self, _uuid: &'a str) -> FleetFuture<'a, String> {
        let result = self.enter("device_status").map(|mut state| {
            state.status_polls += 1;
            if state.status_polls >= state.idle_after {
                String::from("Idle")
            } else {
                String::from("Downloading")
            }
        });
        Box::pin(async move { result })
    }

    fn device_os_version<'a>(&'a self, _uuid: &'a str) -> FleetFuture<'a, Option<String>> {
        let result = self
            .enter("device_os_version")
            .map(|state| state.os_version.clone());
        Box::pin(async move { result })
    }

    fn session_email(&self) -> FleetFuture<'_, String> {
        let result = self
            .enter("session_email")
            .map(|_| String::from("tester@example.com"));
        Box::pin(async move { result })
    }

    fn dashboard_url<'a>(&'a self, uuid: &'a str) -> FleetFuture<'a, String> {
        let result = self
            .enter("dashboard_url")
            .map(|_| format!("https://dashboard.example.com/devices/{uuid}/summary"));
        Box::pin(async move { result })
    }

    fn host_os_command<'a>(
        &'a self,
        _uuid: &'a str,
        _key: &'a SshKey,
        command: &'a str,
    ) -> FleetFuture<'a, CommandOutput> {
        let result = self.enter("host_os_command").and_then(|state| {
            let stdout = match command {
                "cat /proc/uptime" => state.uptime.clone().ok_or(FleetError::Http {
                    operation: "host OS command",
                    message: String::from("proxy refused the connection"),
                })?,
                "cat /etc/os-release" => {
                    String::from("ID=\"resin-os\"\nVERSION=\"2.0.6+rev3\"\n")
                }
                _ => String::new(),
            };
            Ok(CommandOutput {
                code: Some(0),
                stdout,
                stderr: String::new(),
            })
        });
        Box::pin(async move { result })
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    calls: Vec<&'static str>,
    failures: Vec<&'static str>,
    crash_after_checks: Option<u32>,
    checks: u32,
    created: u32,
}

/// Shared record of everything the fake workers were asked to do.
#[derive(Clone, Debug, Default)]
pub struct WorkerProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl WorkerProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state
            .lock()
            .unwrap_or_else(|err| panic!("lock poisoned: worker probe: {err}"))
    }

    pub fn fail(&self, operation: &'static str) {
        self.lock().failures.push(operation);
    }

    pub fn crash_after_checks(&self, checks: u32) {
        self.lock().crash_after_checks = Some(checks);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    pub fn created(&self) -> u32 {
        self.lock().created
    }

    fn record(&self, operation: &'static str) -> bool {
        let mut state = self.lock();
        state.calls.push(operation);
        state.failures.contains(&operation)
    }
}

/// Worker factory handing out [`FakeWorker`]s bound to one probe.
#[derive(Clone, Debug)]
pub struct ScriptedWorkers {
    probe: WorkerProbe,
}

impl ScriptedWorkers {
    pub const fn new(probe: WorkerProbe) -> Self {
        Self { probe }
    }
}

impl WorkerFactory for ScriptedWorkers {
    fn create(
        &self,
        device_type: &str,
        _contract: &DeviceTypeContract,
    ) -> Result<Box<dyn DeviceWorker>, WorkerError> {
        if self.probe.record("create") {
            return Err(WorkerError::UnsupportedDeviceType(device_type.to_owned()));
        }
        self.probe.lock().created += 1;
        Ok(Box::new(FakeWorker {
            lifecycle: WorkerLifecycle::new(),
            probe: self.probe.clone(),
        }))
    }
}

/// Emulated worker stand-in that follows the real lifecycle rules.
#[derive(Debug)]
pub struct FakeWorker {
    lifecycle: WorkerLifecycle,
    probe: WorkerProbe,
}

impl DeviceWorker for FakeWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Emulated
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn prepare(&mut self) -> WorkerFuture<'_, ()> {
        Box::pin(async move {
            let needed = self.lifecycle.begin_prepare()?;
            if self.probe.record("prepare") {
                return Err(WorkerError::Prepare(String::from("emulator missing")));
            }
            if needed {
                self.lifecycle.advance(WorkerState::Ready);
            }
            Ok(())
        })
    }

    fn flash<'a>(&'a mut self, _image: &'a OsImage) -> WorkerFuture<'a, ()> {
        Box::pin(async move {
            self.lifecycle.require("flash", WorkerState::Ready)?;
            if self.probe.record("flash") {
                return Err(WorkerError::Flash(String::from(
                    "write target unavailable",
                )));
            }
            self.lifecycle.advance(WorkerState::Flashed);
            Ok(())
        })
    }

    fn power_on(&mut self) -> WorkerFuture<'_, ()> {
        Box::pin(async move {
            self.lifecycle.require("power on", WorkerState::Flashed)?;
            if self.probe.record("power_on") {
                return Err(WorkerError::Power(String::from("emulator exited")));
            }
            self.lifecycle.advance(WorkerState::PoweredOn);
            Ok(())
        })
    }

    fn power_off(&mut self) -> WorkerFuture<'_, ()> {
        Box::pin(async move {
            let fails = self.probe.record("power_off");
            self.lifecycle.shut_down();
            if fails {
                return Err(WorkerError::Power(String::from("relay stuck")));
            }
            Ok(())
        })
    }

    fn check(&mut self) -> Result<(), WorkerError> {
        let mut state = self.probe.lock();
        state.checks += 1;
        match state.crash_after_checks {
            Some(limit) if state.checks >= limit => {
                Err(WorkerError::Crashed(String::from("emulator exited")))
            }
            _ => Ok(()),
        }
    }
}

/// In-memory results store.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    persisted: Arc<Mutex<Vec<Results>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn fail(&self) {
        *self
            .failing
            .lock()
            .unwrap_or_else(|err| panic!("lock poisoned: sink flag: {err}")) = true;
    }

    pub fn persisted(&self) -> Vec<Results> {
        self.persisted
            .lock()
            .unwrap_or_else(|err| panic!("lock poisoned: sink: {err}"))
            .clone()
    }
}

impl ResultSink for MemorySink {
    fn persist(&self, results: &Results) -> Result<(), ResultStoreError> {
        self.persisted
            .lock()
            .unwrap_or_else(|err| panic!("lock poisoned: sink: {err}"))
            .push(results.clone());
        let failing = *self
            .failing
            .lock()
            .unwrap_or_else(|err| panic!("lock poisoned: sink flag: {err}"));
        if failing {
            return Err(ResultStoreError::Io {
                path: "results.json".into(),
                message: String::from("disk full"),
            });
        }
        Ok(())
    }
}

/// Operator that acknowledges everything.
#[derive(Debug)]
pub struct AgreeableOperator;

impl Operator for AgreeableOperator {
    fn instruct<'a>(&'a self, _message: &'a str) -> OperatorFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn confirm<'a>(&'a self, _question: &'a str) -> OperatorFuture<'a, bool> {
        Box::pin(async { Ok(true) })
    }
}
