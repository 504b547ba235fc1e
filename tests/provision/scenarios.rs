//! End-to-end provisioning runs against scripted collaborators.

use osprobe::orchestrator::DELTA_ENV;
use osprobe::suite::run_manual;
use osprobe::{RunError, SetupError, TestCase, WorkerError};

use super::test_helpers::Harness;

#[tokio::test(start_paused = true)]
async fn clean_run_records_metrics_and_tears_down_once() {
    let harness = Harness::new();
    harness.fleet.online_after(3);
    harness.fleet.idle_after(2);

    let results = harness
        .run()
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(results.provision_seconds(), Some(42));
    assert_eq!(results.provision_time(), Some("0m 42s"));
    assert_eq!(results.image_bytes(), Some(4096));
    assert_eq!(results.email(), Some("tester@example.com"));
    assert_eq!(results.tests().len(), 5);
    assert!(results.tests().iter().all(|test| test.passed));
    assert_eq!(
        results.tests().first().map(|test| test.title.as_str()),
        Some("qemux86-64: Device should be online")
    );

    assert_eq!(harness.fleet.online_polls(), 3);
    assert_eq!(harness.fleet.status_polls(), 2);
    assert_eq!(harness.probe.count("power_off"), 1);
    assert_eq!(harness.sink.persisted(), vec![results]);

    let calls = harness.fleet.calls();
    assert_eq!(
        calls.get(..6),
        Some(
            &[
                "authenticate",
                "create_application",
                "create_ssh_key",
                "register_device_placeholder",
                "device_os_configuration",
                "download_os_image",
            ][..]
        )
    );
    assert_eq!(
        harness.probe.calls(),
        vec!["create", "prepare", "flash", "power_on", "power_off"]
    );
}

#[tokio::test(start_paused = true)]
async fn flash_failure_skips_tests_and_still_powers_off() {
    let harness = Harness::new();
    harness.probe.fail("flash");

    let err = harness.run().await.expect_err("flash failure should abort");

    let RunError::Setup { message, source } = err else {
        panic!("expected a setup error");
    };
    assert!(matches!(
        *source,
        SetupError::Worker {
            phase: "flash image",
            source: WorkerError::Flash(_),
        }
    ));
    assert!(message.contains("write target unavailable"), "{message}");
    assert_eq!(harness.probe.count("power_off"), 1);
    assert_eq!(harness.fleet.online_polls(), 0);

    let persisted = harness.sink.persisted();
    assert_eq!(persisted.len(), 1);
    assert!(persisted.iter().all(|results| results.tests().is_empty()));
}

#[tokio::test(start_paused = true)]
async fn failing_test_is_recorded_and_the_suite_continues() {
    let harness = Harness::new();
    harness.fleet.without_os_version();

    let results = harness
        .run()
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(results.tests().len(), 5);
    let failed: Vec<_> = results.tests().iter().filter(|test| !test.passed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed.first().and_then(|test| test.error.as_deref()),
        Some("device has not reported an OS version")
    );
    assert_eq!(harness.probe.count("power_off"), 1);
}

#[tokio::test(start_paused = true)]
async fn device_that_never_comes_online_times_out() {
    let harness = Harness::new();
    harness.fleet.online_after(u32::MAX);

    let err = harness.run().await.expect_err("online wait should time out");

    let RunError::Setup { source, .. } = err else {
        panic!("expected a setup error");
    };
    let SetupError::Timeout {
        phase,
        timeout,
        attempts,
    } = *source
    else {
        panic!("expected a timeout");
    };
    assert_eq!(phase, "device online");
    assert_eq!(timeout.as_secs(), 60);
    assert_eq!(attempts, 7);
    assert_eq!(harness.fleet.status_polls(), 0);
    assert_eq!(harness.probe.count("power_off"), 1);
}

#[tokio::test(start_paused = true)]
async fn authentication_failure_still_powers_off_the_worker() {
    let harness = Harness::new();
    harness.fleet.fail_on("authenticate");

    let err = harness.run().await.expect_err("authentication should fail");

    assert!(matches!(
        &err,
        RunError::Setup { source, .. }
            if matches!(**source, SetupError::Fleet { phase: "authenticate", .. })
    ));
    assert_eq!(harness.probe.created(), 1);
    assert_eq!(harness.probe.calls(), vec!["create", "power_off"]);
    assert_eq!(harness.sink.persisted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn image_download_failure_still_powers_off_the_worker() {
    let harness = Harness::new();
    harness.fleet.fail_on("download_os_image");

    let err = harness.run().await.expect_err("download should fail");

    assert!(matches!(err, RunError::Setup { .. }));
    assert_eq!(harness.probe.calls(), vec!["create", "power_off"]);
    assert_eq!(harness.fleet.online_polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unbindable_device_type_fails_before_touching_the_fleet() {
    let harness = Harness::new();
    harness.probe.fail("create");

    let err = harness.run().await.expect_err("worker binding should fail");

    let RunError::Setup { source, .. } = err else {
        panic!("expected a setup error");
    };
    assert!(matches!(
        *source,
        SetupError::Worker {
            phase: "select worker",
            source: WorkerError::UnsupportedDeviceType(_),
        }
    ));
    assert!(harness.fleet.calls().is_empty());
    assert_eq!(harness.probe.created(), 0);
    assert_eq!(harness.probe.count("power_off"), 0);
    assert_eq!(harness.sink.persisted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn crashed_worker_ends_the_suite() {
    let harness = Harness::new();
    harness.probe.crash_after_checks(1);

    let err = harness.run().await.expect_err("crash should abort the suite");

    assert!(matches!(
        err,
        RunError::Worker {
            source: WorkerError::Crashed(_),
            ..
        }
    ));
    let persisted = harness.sink.persisted();
    assert_eq!(
        persisted.first().map(|results| results.tests().len()),
        Some(1)
    );
    assert_eq!(harness.probe.count("power_off"), 1);
}

#[tokio::test(start_paused = true)]
async fn delta_setting_is_pushed_to_the_application() {
    let mut harness = Harness::new();
    harness.config.delta = Some(String::from("1"));

    harness
        .run()
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(
        harness.fleet.env(),
        vec![(String::from(DELTA_ENV), String::from("1"))]
    );
}

#[tokio::test(start_paused = true)]
async fn delta_is_left_alone_when_unset() {
    let harness = Harness::new();

    harness
        .run()
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert!(harness.fleet.env().is_empty());
    assert!(!harness.fleet.calls().contains(&"set_application_env"));
}

#[tokio::test(start_paused = true)]
async fn unreadable_uptime_falls_back_to_wall_clock() {
    let harness = Harness::new();
    harness.fleet.online_after(3);
    harness.fleet.idle_after(2);
    harness.fleet.without_uptime();

    let results = harness
        .run()
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(results.provision_seconds(), Some(30));
}

#[tokio::test(start_paused = true)]
async fn power_off_failure_after_success_is_reported() {
    let harness = Harness::new();
    harness.probe.fail("power_off");

    let err = harness.run().await.expect_err("power off should fail");

    assert!(matches!(err, RunError::Teardown(WorkerError::Power(_))));
    assert_eq!(harness.sink.persisted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_failure_is_appended_to_the_primary_error() {
    let harness = Harness::new();
    harness.probe.fail("flash");
    harness.probe.fail("power_off");

    let err = harness.run().await.expect_err("flash failure should abort");

    let RunError::Setup { message, .. } = err else {
        panic!("expected a setup error");
    };
    assert!(
        message.ends_with("(teardown also failed: power off: power control failed: relay stuck)"),
        "{message}"
    );
}

#[tokio::test(start_paused = true)]
async fn persist_failure_is_reported() {
    let harness = Harness::new();
    harness.sink.fail();

    let err = harness.run().await.expect_err("persisting should fail");

    assert!(matches!(err, RunError::Persist(_)));
    assert_eq!(harness.probe.count("power_off"), 1);
}

#[tokio::test(start_paused = true)]
async fn unreadable_compatibility_schema_aborts_before_registration() {
    static BROKEN: &[TestCase] = &[TestCase {
        id: "broken",
        title: "Broken compatibility",
        interactive: false,
        compatibility: Some("{not json"),
        manual: None,
        run: run_manual,
    }];
    let harness = Harness::new();

    let err = harness
        .run_catalog(BROKEN)
        .await
        .expect_err("selection should fail");

    assert!(matches!(err, RunError::Selection { .. }));
    assert!(err.to_string().contains("broken"), "{err}");
    assert!(harness.fleet.calls().is_empty());
    assert_eq!(harness.probe.calls(), vec!["create", "power_off"]);
    assert_eq!(harness.sink.persisted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dashboard_url_names_the_device() {
    let harness = Harness::new();

    let results = harness
        .run()
        .await
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    let dashboard = results
        .tests()
        .iter()
        .find(|test| test.title.contains("Dashboard"))
        .unwrap_or_else(|| panic!("dashboard test should run"));
    assert!(dashboard.passed, "{:?}", dashboard.error);
    assert!(harness.fleet.calls().contains(&"dashboard_url"));
}
