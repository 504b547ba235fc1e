//! REST implementation of [`FleetClient`].

use std::fmt;
use std::sync::{LazyLock, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use camino::Utf8Path;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use super::ssh::{generate_keypair, host_os_args};
use super::{Application, DevicePlaceholder, FleetClient, FleetError, FleetFuture, SshKey};
use crate::command::{CommandOutput, CommandRunner};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Clone, Debug)]
struct Session {
    token: String,
    user_id: u64,
    username: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    id: u64,
    username: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ODataList<T> {
    d: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApplicationRecord {
    id: u64,
    app_name: String,
    #[serde(default)]
    device_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisteredDevice {
    id: u64,
}

/// Fleet client speaking the REST API over `reqwest`.
pub struct HttpFleetClient<R> {
    api_url: String,
    image_url: Option<String>,
    ssh_host: String,
    runner: R,
    session: RwLock<Option<Session>>,
}

impl<R: fmt::Debug> fmt::Debug for HttpFleetClient<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFleetClient")
            .field("api_url", &self.api_url)
            .field("image_url", &self.image_url)
            .field("ssh_host", &self.ssh_host)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

/// Builds an OData equality filter, doubling embedded quotes.
pub(super) fn odata_eq(field: &str, value: &str) -> String {
    format!("{field} eq '{}'", value.replace('\'', "''"))
}

/// Maps an API URL to the matching dashboard device page.
pub(super) fn dashboard_url_for(api_url: &str, uuid: &str) -> String {
    let base = api_url.trim_end_matches('/').replacen("://api.", "://dashboard.", 1);
    format!("{base}/devices/{uuid}/summary")
}

/// Stamps the device identity into an OS configuration blob.
pub(super) fn decorate_configuration(
    mut configuration: Value,
    placeholder: &DevicePlaceholder,
    registered_at: u64,
) -> Result<Value, FleetError> {
    let Some(object) = configuration.as_object_mut() else {
        return Err(FleetError::Decode {
            operation: "device configuration",
            message: String::from("configuration is not a JSON object"),
        });
    };
    object.insert(String::from("registered_at"), Value::from(registered_at));
    object.insert(String::from("deviceId"), Value::from(placeholder.device_id));
    object.insert(String::from("uuid"), Value::from(placeholder.uuid.clone()));
    object.insert(
        String::from("deviceApiKey"),
        Value::from(placeholder.api_key.clone()),
    );
    Ok(configuration)
}

/// Extracts `field` from the single record of an OData device query.
pub(super) fn device_field(body: &Value, uuid: &str, field: &str) -> Result<Value, FleetError> {
    let record = body
        .get("d")
        .and_then(Value::as_array)
        .and_then(|records| records.first())
        .ok_or_else(|| FleetError::NotFound {
            kind: "device",
            name: uuid.to_owned(),
        })?;
    Ok(record.get(field).cloned().unwrap_or(Value::Null))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

fn unique_key() -> String {
    Uuid::new_v4().simple().to_string()
}

impl<R> HttpFleetClient<R>
where
    R: CommandRunner + Send + Sync,
{
    /// Creates a client for `api_url`. `image_url` overrides the host OS
    /// images are downloaded from; `ssh_host` is the host OS SSH proxy.
    #[must_use]
    pub fn new(api_url: &str, image_url: Option<&str>, ssh_host: &str, runner: R) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_owned(),
            image_url: image_url.map(|url| url.trim_end_matches('/').to_owned()),
            ssh_host: ssh_host.to_owned(),
            runner,
            session: RwLock::new(None),
        }
    }

    fn session(&self) -> Result<Session, FleetError> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(FleetError::NotAuthenticated)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    async fn send(
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, FleetError> {
        let response = request.send().await.map_err(|err| FleetError::Http {
            operation,
            message: err.to_string(),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FleetError::Status {
            operation,
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, FleetError> {
        let response = Self::send(operation, request).await?;
        let body = response.bytes().await.map_err(|err| FleetError::Http {
            operation,
            message: err.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|err| FleetError::Decode {
            operation,
            message: err.to_string(),
        })
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder, FleetError> {
        let session = self.session()?;
        Ok(request.bearer_auth(session.token).timeout(HTTP_TIMEOUT))
    }

    async fn login(&self, token: &str) -> Result<(), FleetError> {
        if token.trim().is_empty() {
            return Err(FleetError::NotAuthenticated);
        }
        let request = HTTP_CLIENT
            .get(self.url("/user/v1/whoami"))
            .bearer_auth(token)
            .timeout(HTTP_TIMEOUT);
        let whoami: WhoAmI = Self::json("authenticate", request).await?;
        info!(username = %whoami.username, "authenticated with fleet service");
        let session = Session {
            token: token.to_owned(),
            user_id: whoami.id,
            username: whoami.username,
            email: whoami.email.unwrap_or_default(),
        };
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        Ok(())
    }

    async fn find_application(&self, name: &str) -> Result<Option<ApplicationRecord>, FleetError> {
        let request = self.authed(
            HTTP_CLIENT
                .get(self.url("/v4/application"))
                .query(&[("$filter", odata_eq("app_name", name))]),
        )?;
        let list: ODataList<ApplicationRecord> = Self::json("find application", request).await?;
        Ok(list.d.into_iter().next())
    }

    async fn ensure_application(
        &self,
        name: &str,
        device_type: &str,
    ) -> Result<Application, FleetError> {
        if let Some(existing) = self.find_application(name).await? {
            debug!(id = existing.id, "reusing existing application");
            return Ok(Application {
                id: existing.id,
                name: existing.app_name,
                device_type: existing
                    .device_type
                    .unwrap_or_else(|| device_type.to_owned()),
            });
        }
        let request = self.authed(
            HTTP_CLIENT
                .post(self.url("/v4/application"))
                .json(&json!({ "app_name": name, "device_type": device_type })),
        )?;
        let created: ApplicationRecord = Self::json("create application", request).await?;
        Ok(Application {
            id: created.id,
            name: created.app_name,
            device_type: device_type.to_owned(),
        })
    }

    async fn register_key(&self, label: &str, directory: &Utf8Path) -> Result<SshKey, FleetError> {
        let session = self.session()?;
        let key = generate_keypair(&self.runner, label, directory).await?;
        let request = self.authed(HTTP_CLIENT.post(self.url("/v4/user__has__public_key")).json(
            &json!({
                "title": label,
                "public_key": key.public_key,
                "user": session.user_id,
            }),
        ))?;
        Self::send("register SSH key", request).await?;
        Ok(key)
    }

    async fn set_env(
        &self,
        application: &Application,
        name: &str,
        value: &str,
    ) -> Result<(), FleetError> {
        let request = self.authed(
            HTTP_CLIENT
                .post(self.url("/v4/application_environment_variable"))
                .json(&json!({
                    "application": application.id,
                    "name": name,
                    "value": value,
                })),
        )?;
        Self::send("set environment variable", request).await?;
        Ok(())
    }

    async fn register_placeholder(
        &self,
        application: &Application,
    ) -> Result<DevicePlaceholder, FleetError> {
        let session = self.session()?;
        let uuid = unique_key();
        let api_key = unique_key();
        let request = self.authed(HTTP_CLIENT.post(self.url("/device/register")).json(&json!({
            "user": session.user_id,
            "application": application.id,
            "device_type": application.device_type,
            "uuid": uuid,
            "api_key": api_key,
        })))?;
        let registered: RegisteredDevice = Self::json("register device", request).await?;
        Ok(DevicePlaceholder {
            uuid,
            api_key,
            device_id: registered.id,
            application_id: application.id,
            device_type: application.device_type.clone(),
        })
    }

    async fn os_configuration(
        &self,
        placeholder: &DevicePlaceholder,
        options: &Map<String, Value>,
    ) -> Result<Value, FleetError> {
        let mut body = options.clone();
        body.insert(String::from("appId"), Value::from(placeholder.application_id));
        body.insert(
            String::from("deviceType"),
            Value::from(placeholder.device_type.clone()),
        );
        let request = self.authed(
            HTTP_CLIENT
                .post(self.url("/download-config"))
                .json(&Value::Object(body)),
        )?;
        let configuration: Value = Self::json("device configuration", request).await?;
        decorate_configuration(configuration, placeholder, unix_now())
    }

    async fn download(
        &self,
        device_type: &str,
        version: &str,
        destination: &Utf8Path,
    ) -> Result<u64, FleetError> {
        let base = self.image_url.as_deref().unwrap_or(&self.api_url);
        let request = self
            .authed(
                HTTP_CLIENT
                    .get(format!("{base}/download"))
                    .query(&[("deviceType", device_type), ("version", version)]),
            )?
            .timeout(DOWNLOAD_TIMEOUT);
        let mut response = Self::send("download image", request).await?;

        let io_error = |err: std::io::Error| FleetError::Io {
            path: destination.to_path_buf(),
            message: err.to_string(),
        };
        let mut file = tokio::fs::File::create(destination).await.map_err(io_error)?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|err| FleetError::Http {
            operation: "download image",
            message: err.to_string(),
        })? {
            file.write_all(&chunk).await.map_err(io_error)?;
            written = written.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
        }
        file.flush().await.map_err(io_error)?;
        info!(%destination, bytes = written, "image downloaded");
        Ok(written)
    }

    async fn device_value(&self, uuid: &str, field: &'static str) -> Result<Value, FleetError> {
        let request = self.authed(HTTP_CLIENT.get(self.url("/v4/device")).query(&[
            ("$filter", odata_eq("uuid", uuid)),
            ("$select", field.to_owned()),
        ]))?;
        let body: Value = Self::json("device query", request).await?;
        device_field(&body, uuid, field)
    }

    async fn online(&self, uuid: &str) -> Result<bool, FleetError> {
        Ok(self
            .device_value(uuid, "is_online")
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn status(&self, uuid: &str) -> Result<String, FleetError> {
        Ok(self
            .device_value(uuid, "status")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_owned())
    }

    async fn os_version(&self, uuid: &str) -> Result<Option<String>, FleetError> {
        Ok(self
            .device_value(uuid, "os_version")
            .await?
            .as_str()
            .map(str::to_owned))
    }

    fn run_host_command(
        &self,
        uuid: &str,
        key: &SshKey,
        command: &str,
    ) -> Result<CommandOutput, FleetError> {
        let session = self.session()?;
        let args = host_os_args(&self.ssh_host, &session.username, uuid, key, command);
        Ok(self.runner.run_checked("ssh", &args)?)
    }
}

impl<R> FleetClient for HttpFleetClient<R>
where
    R: CommandRunner + Send + Sync,
{
    fn authenticate<'a>(&'a self, token: &'a str) -> FleetFuture<'a, ()> {
        Box::pin(self.login(token))
    }

    fn create_application<'a>(
        &'a self,
        name: &'a str,
        device_type: &'a str,
    ) -> FleetFuture<'a, Application> {
        Box::pin(self.ensure_application(name, device_type))
    }

    fn create_ssh_key<'a>(
        &'a self,
        label: &'a str,
        directory: &'a Utf8Path,
    ) -> FleetFuture<'a, SshKey> {
        Box::pin(self.register_key(label, directory))
    }

    fn set_application_env<'a>(
        &'a self,
        application: &'a Application,
        name: &'a str,
        value: &'a str,
    ) -> FleetFuture<'a, ()> {
        Box::pin(self.set_env(application, name, value))
    }

    fn register_device_placeholder<'a>(
        &'a self,
        application: &'a Application,
    ) -> FleetFuture<'a, DevicePlaceholder> {
        Box::pin(self.register_placeholder(application))
    }

    fn device_os_configuration<'a>(
        &'a self,
        placeholder: &'a DevicePlaceholder,
        options: &'a Map<String, Value>,
    ) -> FleetFuture<'a, Value> {
        Box::pin(self.os_configuration(placeholder, options))
    }

    fn download_os_image<'a>(
        &'a self,
        device_type: &'a str,
        version: &'a str,
        destination: &'a Utf8Path,
    ) -> FleetFuture<'a, u64> {
        Box::pin(self.download(device_type, version, destination))
    }

    fn is_device_online<'a>(&'a self, uuid: &'a str) -> FleetFuture<'a, bool> {
        Box::pin(self.online(uuid))
    }

    fn device_status<'a>(&'a self, uuid: &'a str) -> FleetFuture<'a, String> {
        Box::pin(self.status(uuid))
    }

    fn device_os_version<'a>(&'a self, uuid: &'a str) -> FleetFuture<'a, Option<String>> {
        Box::pin(self.os_version(uuid))
    }

    fn session_email(&self) -> FleetFuture<'_, String> {
        Box::pin(async move { self.session().map(|session| session.email) })
    }

    fn dashboard_url<'a>(&'a self, uuid: &'a str) -> FleetFuture<'a, String> {
        Box::pin(async move { Ok(dashboard_url_for(&self.api_url, uuid)) })
    }

    fn host_os_command<'a>(
        &'a self,
        uuid: &'a str,
        key: &'a SshKey,
        command: &'a str,
    ) -> FleetFuture<'a, CommandOutput> {
        Box::pin(async move { self.run_host_command(uuid, key, command) })
    }
}
