//! Fleet service collaborator: applications, device identities, OS images
//! and device state.
//!
//! Every operation is a suspension point and may fail with [`FleetError`].
//! The orchestrator and the test catalog only see the [`FleetClient`]
//! trait; [`HttpFleetClient`] talks to the real REST API.

mod error;
mod http;
mod ssh;

use std::future::Future;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};

use crate::command::CommandOutput;

pub use error::FleetError;
pub use http::HttpFleetClient;
pub use ssh::{SSH_CONNECT_TIMEOUT_SECS, SSH_PORT, generate_keypair, host_os_args};

/// Supervisor status reported once the application runtime settled.
pub const SUPERVISOR_IDLE: &str = "Idle";

/// Future returned by fleet operations.
pub type FleetFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FleetError>> + Send + 'a>>;

/// Application the device under test joins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Application {
    /// Fleet identifier.
    pub id: u64,
    /// Application name.
    pub name: String,
    /// Device type the application was created for.
    pub device_type: String,
}

/// SSH identity registered with the fleet service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshKey {
    /// Label the public key was registered under.
    pub label: String,
    /// OpenSSH public key line.
    pub public_key: String,
    /// Private key file used for host OS access.
    pub private_key_path: Utf8PathBuf,
}

/// Device identity registered before the device first boots.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DevicePlaceholder {
    /// Device UUID baked into the OS configuration.
    pub uuid: String,
    /// Device API key baked into the OS configuration.
    pub api_key: String,
    /// Fleet identifier of the registered device.
    pub device_id: u64,
    /// Application the device belongs to.
    pub application_id: u64,
    /// Device type slug.
    pub device_type: String,
}

/// Operations consumed from the fleet service.
pub trait FleetClient: Send + Sync {
    /// Opens a session with an API token.
    fn authenticate<'a>(&'a self, token: &'a str) -> FleetFuture<'a, ()>;

    /// Creates the application, reusing an existing one with the same name.
    fn create_application<'a>(
        &'a self,
        name: &'a str,
        device_type: &'a str,
    ) -> FleetFuture<'a, Application>;

    /// Generates a keypair in `directory` and registers the public half.
    fn create_ssh_key<'a>(
        &'a self,
        label: &'a str,
        directory: &'a Utf8Path,
    ) -> FleetFuture<'a, SshKey>;

    /// Sets an application-wide environment variable.
    fn set_application_env<'a>(
        &'a self,
        application: &'a Application,
        name: &'a str,
        value: &'a str,
    ) -> FleetFuture<'a, ()>;

    /// Registers a device identity in `application`.
    fn register_device_placeholder<'a>(
        &'a self,
        application: &'a Application,
    ) -> FleetFuture<'a, DevicePlaceholder>;

    /// Fetches the OS configuration blob for `placeholder`, with `options`
    /// merged into the request.
    fn device_os_configuration<'a>(
        &'a self,
        placeholder: &'a DevicePlaceholder,
        options: &'a Map<String, Value>,
    ) -> FleetFuture<'a, Value>;

    /// Streams the OS image to `destination`, returning the bytes written.
    fn download_os_image<'a>(
        &'a self,
        device_type: &'a str,
        version: &'a str,
        destination: &'a Utf8Path,
    ) -> FleetFuture<'a, u64>;

    /// Whether the device currently reports as online.
    fn is_device_online<'a>(&'a self, uuid: &'a str) -> FleetFuture<'a, bool>;

    /// Supervisor status string, for example [`SUPERVISOR_IDLE`].
    fn device_status<'a>(&'a self, uuid: &'a str) -> FleetFuture<'a, String>;

    /// OS version reported by the device, if any yet.
    fn device_os_version<'a>(&'a self, uuid: &'a str) -> FleetFuture<'a, Option<String>>;

    /// Email of the authenticated user.
    fn session_email(&self) -> FleetFuture<'_, String>;

    /// Dashboard page for the device.
    fn dashboard_url<'a>(&'a self, uuid: &'a str) -> FleetFuture<'a, String>;

    /// Runs `command` on the device host OS through the fleet SSH proxy.
    fn host_os_command<'a>(
        &'a self,
        uuid: &'a str,
        key: &'a SshKey,
        command: &'a str,
    ) -> FleetFuture<'a, CommandOutput>;
}
