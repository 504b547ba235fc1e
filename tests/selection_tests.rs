//! Test selection against the shipped device-type contracts.

use camino::Utf8PathBuf;
use osprobe::test_support::sample_run_config;
use osprobe::worker::DEVICE_WORKERS;
use osprobe::{DeviceTypeContract, RunConfig, WorkerKind, catalog, select};
use rstest::rstest;

fn contracts_root() -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("contracts")
}

fn load(slug: &str) -> DeviceTypeContract {
    DeviceTypeContract::load(&contracts_root(), slug)
        .unwrap_or_else(|err| panic!("contract for {slug} should load: {err}"))
}

fn selected_ids(slug: &str, interactive: bool) -> Vec<&'static str> {
    let config = RunConfig {
        device_type: slug.to_owned(),
        interactive_tests: interactive,
        ..sample_run_config()
    };
    select(catalog(), &config, &load(slug))
        .unwrap_or_else(|err| panic!("selection for {slug} should succeed: {err}"))
        .iter()
        .map(|test| test.case.id)
        .collect()
}

#[test]
fn every_bound_device_type_ships_a_contract() {
    for (slug, kind) in DEVICE_WORKERS {
        let contract = load(slug);
        assert_eq!(contract.slug(), *slug);
        assert_eq!(
            WorkerKind::for_device_type(contract.slug()).ok(),
            Some(*kind)
        );
    }
}

#[rstest]
#[case("qemux86-64")]
#[case("raspberrypi3")]
#[case("ts4900")]
fn unattended_runs_only_select_automated_tests(#[case] slug: &str) {
    assert_eq!(
        selected_ids(slug, false),
        vec![
            "device-online",
            "os-version",
            "supervisor-idle",
            "host-os-release",
            "dashboard-url",
        ]
    );
}

#[rstest]
#[case("qemux86-64", &[])]
#[case("qemux86", &[])]
#[case("raspberry-pi", &["identification-led", "kernel-boot-splash", "rpi-uart0"])]
#[case("raspberry-pi2", &["identification-led", "kernel-boot-splash", "rpi-uart0"])]
#[case(
    "raspberrypi3",
    &["identification-led", "kernel-boot-splash", "rpi-uart0", "bluetooth"]
)]
#[case(
    "beaglebone-black",
    &["identification-led", "hdmi-uart5", "kernel-boot-splash"]
)]
#[case("intel-nuc", &["kernel-boot-splash", "bluetooth"])]
#[case(
    "ts4900",
    &["identification-led", "kernel-boot-splash", "bluetooth", "ts4900-single", "ts4900-quad"]
)]
fn interactive_runs_add_compatible_manual_tests(
    #[case] slug: &str,
    #[case] manual: &[&str],
) {
    let ids = selected_ids(slug, true);
    let (automated, interactive) = ids.split_at(5);
    assert_eq!(automated.first(), Some(&"device-online"));
    assert_eq!(interactive, manual);
}

#[test]
fn titles_name_the_device_type_and_release() {
    let config = RunConfig {
        device_type: String::from("raspberrypi3"),
        ..sample_run_config()
    };
    let selected = select(catalog(), &config, &load("raspberrypi3"))
        .unwrap_or_else(|err| panic!("selection should succeed: {err}"));

    let titles: Vec<&str> = selected.iter().map(|test| test.title.as_str()).collect();
    assert!(titles.contains(&"raspberrypi3: Device should report OS version 2.0.6+rev3.prod"));
    assert!(titles.iter().all(|title| title.starts_with("raspberrypi3: ")));
}

#[test]
fn unknown_device_type_has_no_contract() {
    assert!(DeviceTypeContract::load(&contracts_root(), "commodore-64").is_err());
}
