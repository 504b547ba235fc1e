//! SSH helpers: keypair generation and host OS access through the fleet
//! proxy.

use std::ffi::OsString;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};

use super::{FleetError, SshKey};
use crate::command::CommandRunner;

/// Port of the fleet SSH proxy.
pub const SSH_PORT: u16 = 22;

/// Seconds `ssh` waits for the proxy to accept a connection.
pub const SSH_CONNECT_TIMEOUT_SECS: u16 = 30;

fn key_file_name(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' })
        .collect();
    format!("id_ed25519_{sanitized}")
}

async fn remove_if_present(path: &Utf8Path) -> Result<(), FleetError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FleetError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

/// Generates a passphrase-less ed25519 keypair under `directory`.
///
/// Stale key files from an earlier run are removed first so `ssh-keygen`
/// never stops to ask about overwriting them.
///
/// # Errors
///
/// Returns [`FleetError::Io`] when the directory or key files cannot be
/// handled and [`FleetError::Command`] when `ssh-keygen` fails.
pub async fn generate_keypair<R>(
    runner: &R,
    label: &str,
    directory: &Utf8Path,
) -> Result<SshKey, FleetError>
where
    R: CommandRunner + ?Sized,
{
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(|err| FleetError::Io {
            path: directory.to_path_buf(),
            message: err.to_string(),
        })?;

    let private_key_path = directory.join(key_file_name(label));
    let public_key_path = Utf8PathBuf::from(format!("{private_key_path}.pub"));
    remove_if_present(&private_key_path).await?;
    remove_if_present(&public_key_path).await?;

    let args: Vec<OsString> = [
        "-q",
        "-t",
        "ed25519",
        "-N",
        "",
        "-C",
        label,
        "-f",
        private_key_path.as_str(),
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    runner.run_checked("ssh-keygen", &args)?;

    let public_key = tokio::fs::read_to_string(&public_key_path)
        .await
        .map_err(|err| FleetError::Io {
            path: public_key_path.clone(),
            message: err.to_string(),
        })?;

    Ok(SshKey {
        label: label.to_owned(),
        public_key: public_key.trim().to_owned(),
        private_key_path,
    })
}

/// Arguments for `ssh` that run `command` on the host OS of `uuid`.
#[must_use]
pub fn host_os_args(
    ssh_host: &str,
    username: &str,
    uuid: &str,
    key: &SshKey,
    command: &str,
) -> Vec<OsString> {
    vec![
        OsString::from("-p"),
        OsString::from(SSH_PORT.to_string()),
        OsString::from("-i"),
        OsString::from(key.private_key_path.as_str()),
        OsString::from("-o"),
        OsString::from("BatchMode=yes"),
        OsString::from("-o"),
        OsString::from("StrictHostKeyChecking=no"),
        OsString::from("-o"),
        OsString::from("UserKnownHostsFile=/dev/null"),
        OsString::from("-o"),
        OsString::from(format!("ConnectTimeout={SSH_CONNECT_TIMEOUT_SECS}")),
        OsString::from(format!("{username}@{ssh_host}")),
        OsString::from("host"),
        OsString::from(uuid),
        OsString::from(command),
    ]
}
