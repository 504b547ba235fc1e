//! Built-in acceptance tests.

use super::{ManualSteps, TestCase, TestEnv, TestFailure, TestFuture, run_manual};
use crate::fleet::SUPERVISOR_IDLE;

const LED: &str = r#"{"required": ["data"], "properties": {"data": {"required": ["led"], "properties": {"led": {"const": true}}}}}"#;
const HDMI: &str = r#"{"required": ["data"], "properties": {"data": {"required": ["hdmi"], "properties": {"hdmi": {"const": true}}}}}"#;
const BLUETOOTH: &str = r#"{"properties": {"data": {"properties": {"connectivity": {"required": ["bluetooth"], "properties": {"bluetooth": {"const": true}}}}}}, "required": ["data"]}"#;
const BEAGLEBONE: &str = r#"{"required": ["slug"], "properties": {"slug": {"const": "beaglebone-black"}}}"#;
const RASPBERRY_PI: &str = r#"{"required": ["slug"], "properties": {"slug": {"enum": ["raspberry-pi", "raspberry-pi2", "raspberrypi3"]}}}"#;
const TS4900: &str = r#"{"required": ["slug"], "properties": {"slug": {"const": "ts4900"}}}"#;

/// Release part of a version string, without the `.prod`/`.dev` suffix.
#[must_use]
pub fn release_label(version: &str) -> &str {
    version
        .strip_suffix(".prod")
        .or_else(|| version.strip_suffix(".dev"))
        .unwrap_or(version)
}

fn device_online(env: TestEnv<'_>) -> TestFuture<'_> {
    Box::pin(async move {
        let uuid = env.uuid()?;
        if env.fleet.is_device_online(uuid).await? {
            return Ok(());
        }
        Err(TestFailure::Assertion(format!("device {uuid} is offline")))
    })
}

fn os_version_reported(env: TestEnv<'_>) -> TestFuture<'_> {
    Box::pin(async move {
        let uuid = env.uuid()?;
        let expected = release_label(&env.config.os_version);
        let Some(reported) = env.fleet.device_os_version(uuid).await? else {
            return Err(TestFailure::Assertion(String::from(
                "device has not reported an OS version",
            )));
        };
        if reported.contains(expected) {
            return Ok(());
        }
        Err(TestFailure::Assertion(format!(
            "device reports '{reported}', expected '{expected}'"
        )))
    })
}

fn supervisor_idle(env: TestEnv<'_>) -> TestFuture<'_> {
    Box::pin(async move {
        let uuid = env.uuid()?;
        let status = env.fleet.device_status(uuid).await?;
        if status == SUPERVISOR_IDLE {
            return Ok(());
        }
        Err(TestFailure::Assertion(format!(
            "supervisor status is '{status}'"
        )))
    })
}

fn host_os_release(env: TestEnv<'_>) -> TestFuture<'_> {
    Box::pin(async move {
        let uuid = env.uuid()?;
        let key = env
            .context
            .ssh_key()
            .ok_or(TestFailure::MissingContext("SSH key"))?;
        let output = env
            .fleet
            .host_os_command(uuid, key, "cat /etc/os-release")
            .await?;
        let expected = release_label(&env.config.os_version);
        let matched = output
            .stdout
            .lines()
            .any(|line| line.starts_with("VERSION") && line.contains(expected));
        if matched {
            return Ok(());
        }
        Err(TestFailure::Assertion(format!(
            "/etc/os-release does not mention '{expected}'"
        )))
    })
}

fn dashboard_links_device(env: TestEnv<'_>) -> TestFuture<'_> {
    Box::pin(async move {
        let uuid = env.uuid()?;
        let url = env
            .context
            .dashboard_url()
            .ok_or(TestFailure::MissingContext("dashboard URL"))?;
        if url.contains(uuid) {
            return Ok(());
        }
        Err(TestFailure::Assertion(format!(
            "dashboard URL {url} does not name device {uuid}"
        )))
    })
}

const fn automated(id: &'static str, title: &'static str, run: super::TestRun) -> TestCase {
    TestCase {
        id,
        title,
        interactive: false,
        compatibility: None,
        manual: None,
        run,
    }
}

const fn manual(
    id: &'static str,
    title: &'static str,
    compatibility: &'static str,
    procedure: ManualSteps,
) -> TestCase {
    TestCase {
        id,
        title,
        interactive: true,
        compatibility: Some(compatibility),
        manual: Some(procedure),
        run: run_manual,
    }
}

/// One CPU-core variant of the TS4900 board. Every variant runs the same
/// procedure shape; only the module fitted differs.
const fn provisioning_variant(
    id: &'static str,
    title: &'static str,
    procedure: ManualSteps,
) -> TestCase {
    manual(id, title, TS4900, procedure)
}

/// Built-in descriptors in execution order.
pub static CATALOG: &[TestCase] = &[
    automated(
        "device-online",
        "${options.deviceType}: Device should be online",
        device_online,
    ),
    automated(
        "os-version",
        "${options.deviceType}: Device should report OS version ${options.resinOSVersion}",
        os_version_reported,
    ),
    automated(
        "supervisor-idle",
        "${options.deviceType}: Supervisor should be idle",
        supervisor_idle,
    ),
    automated(
        "host-os-release",
        "${options.deviceType}: Host OS should report release ${options.resinOSVersion}",
        host_os_release,
    ),
    automated(
        "dashboard-url",
        "${options.deviceType}: Dashboard should link to the device",
        dashboard_links_device,
    ),
    manual(
        "identification-led",
        "${options.deviceType}: Identification LED should blink",
        LED,
        ManualSteps {
            steps: &["Open the device dashboard and trigger \"Identify device\"."],
            assertions: &["Is the identification LED of the ${options.deviceType} blinking?"],
        },
    ),
    manual(
        "hdmi-uart5",
        "${options.deviceType}: HDMI and UART5 should carry console output",
        BEAGLEBONE,
        ManualSteps {
            steps: &[
                "Connect an HDMI screen to the board.",
                "Attach a serial adapter to UART5 and open it at 115200 baud.",
                "Reboot the device from the dashboard.",
            ],
            assertions: &[
                "Did boot messages appear on the HDMI screen?",
                "Did boot messages appear on the UART5 console?",
            ],
        },
    ),
    manual(
        "kernel-boot-splash",
        "${options.deviceType}: Kernel log and boot splash should show on HDMI",
        HDMI,
        ManualSteps {
            steps: &[
                "Connect an HDMI screen to the device.",
                "Reboot the device from the dashboard.",
            ],
            assertions: &[
                "Was the boot splash logo displayed?",
                "Were kernel messages printed on the screen?",
            ],
        },
    ),
    manual(
        "rpi-uart0",
        "${options.deviceType}: UART0 should provide a serial console",
        RASPBERRY_PI,
        ManualSteps {
            steps: &[
                "Attach a serial adapter to GPIO14/GPIO15 and open it at 115200 baud.",
                "Reboot the device from the dashboard.",
            ],
            assertions: &["Did a login prompt appear on the serial console?"],
        },
    ),
    manual(
        "bluetooth",
        "${options.deviceType}: Bluetooth should discover nearby devices",
        BLUETOOTH,
        ManualSteps {
            steps: &[
                "Make a Bluetooth device near the board discoverable.",
                "Run `hcitool scan` in the host OS terminal of the dashboard.",
            ],
            assertions: &["Was the nearby device listed by the scan?"],
        },
    ),
    provisioning_variant(
        "ts4900-single",
        "${options.deviceType}: Provisioning should succeed on the single core variant",
        ManualSteps {
            steps: &[
                "Power off the carrier board and fit the single core TS-4900 module.",
                "Power the board on.",
            ],
            assertions: &["Did the device come online in the dashboard with the single core module?"],
        },
    ),
    provisioning_variant(
        "ts4900-quad",
        "${options.deviceType}: Provisioning should succeed on the quad core variant",
        ManualSteps {
            steps: &[
                "Power off the carrier board and fit the quad core TS-4900 module.",
                "Power the board on.",
            ],
            assertions: &["Did the device come online in the dashboard with the quad core module?"],
        },
    ),
];

/// Built-in descriptors in execution order.
#[must_use]
pub const fn catalog() -> &'static [TestCase] {
    CATALOG
}
