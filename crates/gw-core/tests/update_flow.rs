//! Update runs against a local HTTP update server.

mod common;

use std::fs;
use std::sync::Arc;

use common::{tar_gz_package, zip_package, TestServer};
use gw_config::Config;
use gw_core::alert::RecordingAlertSink;
use gw_core::controllers::mock::MockSet;
use gw_core::runtime::Runtime;
use gw_core::update::{
    HttpUpdateSource, UpdateError, UpdateOutcome, UpdatePhase, UpdateSource, SNAPSHOT_PREFIX,
};
use gw_core::version::{read_version, write_version};
use tempfile::TempDir;

struct Device {
    _temp: TempDir,
    config: Config,
    mocks: MockSet,
    alerts: Arc<RecordingAlertSink>,
}

fn device(server_url: &str) -> Device {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.device.id = "cam-42".into();
    config.device.install_dir = temp.path().join("install");
    config.device.data_dir = temp.path().join("data");
    config.backup.backup_dir = temp.path().join("backups");
    config.update.temp_dir = temp.path().join("tmp");
    config.update.auto_update = true;
    config.update.sanity_command = Vec::new();
    config.server.url = server_url.to_string();

    fs::create_dir_all(&config.device.install_dir).unwrap();
    fs::write(config.device.install_dir.join("main.py"), b"v1").unwrap();
    write_version(&config.version_file(), "1.0.0").unwrap();

    Device {
        _temp: temp,
        config,
        mocks: MockSet::new(),
        alerts: Arc::new(RecordingAlertSink::default()),
    }
}

fn runtime(dev: &Device) -> Runtime {
    let source: Arc<dyn UpdateSource> =
        Arc::new(HttpUpdateSource::from_config(&dev.config).unwrap());
    Runtime::assemble(
        dev.config.clone(),
        None,
        dev.mocks.collaborators(),
        source,
        dev.alerts.clone(),
    )
    .unwrap()
}

/// Serves one ZIP offer of `package` at version 1.2.0.
fn update_server(package: Vec<u8>, checksum: Option<String>) -> TestServer {
    TestServer::start(move |req| {
        if req.method == "POST" && req.url == "/api/client/updates/check" {
            let body = serde_json::json!({
                "update_available": true,
                "version": "1.2.0",
                "download_url": format!("http://{}{}", req.host, PACKAGE_PATH),
                "checksum": checksum,
            });
            (200, body.to_string().into_bytes())
        } else if req.method == "GET" && req.url == PACKAGE_PATH {
            (200, package.clone())
        } else {
            (404, b"not found".to_vec())
        }
    })
}

const PACKAGE_PATH: &str = "/api/client/updates/download/update-1.2.0.zip";

#[test]
fn check_reports_identity_and_current_version() {
    let server = TestServer::start(|_| (200, br#"{"update_available": false}"#.to_vec()));
    let dev = device(&server.url());
    let rt = runtime(&dev);

    assert_eq!(rt.updater.check_now().unwrap(), None);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let body = requests[0].json();
    assert_eq!(body["camera_id"], "cam-42");
    assert_eq!(body["current_version"], "1.0.0");
    assert!(body["timestamp"].is_string());
    assert_eq!(rt.updater.status().phase, UpdatePhase::Idle);
    assert!(rt.updater.status().last_check_at.is_some());
}

#[test]
fn zip_update_installs_and_snapshots() {
    let package = zip_package(&[("main.py", b"v2"), ("tools/run.sh", b"#!/bin/sh\n")]);
    let checksum = gw_bundle::hash_bytes(&package);
    let server = update_server(package, Some(checksum));
    let dev = device(&server.url());
    let rt = runtime(&dev);

    let outcome = rt.updater.poll().unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Succeeded {
            from: "1.0.0".into(),
            to: "1.2.0".into()
        }
    );

    let install = &dev.config.device.install_dir;
    assert_eq!(fs::read(install.join("main.py")).unwrap(), b"v2");
    assert_eq!(read_version(&dev.config.version_file()), "1.2.0");
    assert_eq!(dev.mocks.service.count("restart"), 1);
    assert_eq!(rt.budget.usage().used, 0);

    let snapshots: Vec<_> = rt
        .backups
        .list(None, None)
        .unwrap()
        .into_iter()
        .filter(|l| l.record.name.starts_with(SNAPSHOT_PREFIX))
        .collect();
    assert_eq!(snapshots.len(), 1);

    let urls: Vec<String> = server.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["/api/client/updates/check", PACKAGE_PATH]);
}

#[test]
fn tampered_download_is_never_applied() {
    let package = zip_package(&[("main.py", b"v2")]);
    let server = update_server(package, Some("ab".repeat(32)));
    let dev = device(&server.url());
    let rt = runtime(&dev);

    let outcome = rt.updater.poll().unwrap();
    assert!(matches!(
        outcome,
        UpdateOutcome::Failed {
            rolled_back: false,
            ..
        }
    ));
    assert_eq!(
        fs::read(dev.config.device.install_dir.join("main.py")).unwrap(),
        b"v1"
    );
    assert_eq!(read_version(&dev.config.version_file()), "1.0.0");
    assert!(dev.mocks.service.calls().is_empty());
    assert_eq!(rt.budget.usage().used, 0);
    assert!(rt.backups.list(None, None).unwrap().is_empty());
    assert_eq!(
        rt.updater.status().update_result.as_deref(),
        Some("failed: checksum mismatch")
    );
}

#[cfg(unix)]
#[test]
fn tar_gz_update_runs_post_update_hook() {
    let package = tar_gz_package(&[
        ("main.py", b"v2"),
        ("post_update.sh", b"touch hook_ran\n"),
    ]);
    let server = TestServer::start(move |req| {
        if req.method == "POST" {
            let body = serde_json::json!({
                "update_available": true,
                "version": "2.0.0",
                "download_url": format!("http://{}/files/update-2.0.0.tar.gz", req.host),
            });
            (200, body.to_string().into_bytes())
        } else if req.url == "/files/update-2.0.0.tar.gz" {
            (200, package.clone())
        } else {
            (404, Vec::new())
        }
    });
    let dev = device(&server.url());
    let rt = runtime(&dev);

    let outcome = rt.updater.poll().unwrap();
    assert!(matches!(outcome, UpdateOutcome::Succeeded { .. }), "{outcome:?}");
    assert!(dev.config.device.install_dir.join("hook_ran").exists());
    assert_eq!(read_version(&dev.config.version_file()), "2.0.0");
}

#[cfg(unix)]
#[test]
fn failing_hook_rolls_back() {
    let package = zip_package(&[("main.py", b"v2"), ("post_update.sh", b"exit 3\n")]);
    let server = update_server(package, None);
    let dev = device(&server.url());
    let rt = runtime(&dev);

    match rt.updater.poll().unwrap() {
        UpdateOutcome::Failed { rolled_back, .. } => assert!(rolled_back),
        other => panic!("unexpected outcome {other:?}"),
    }
    let install = &dev.config.device.install_dir;
    assert_eq!(fs::read(install.join("main.py")).unwrap(), b"v1");
    assert!(!install.join("post_update.sh").exists());
    assert_eq!(read_version(&dev.config.version_file()), "1.0.0");
}

#[test]
fn unreachable_server_is_a_network_error() {
    let url = {
        let server = TestServer::start(|_| (200, Vec::new()));
        server.url()
    };
    let dev = device(&url);
    let rt = runtime(&dev);

    let err = rt.updater.check_now().unwrap_err();
    assert!(matches!(err, UpdateError::Network(_)), "{err}");
    assert!(!rt.updater.is_in_flight());
    assert!(!rt.updater.status().update_in_progress);
}

#[test]
fn manual_apply_with_auto_update_off() {
    let package = zip_package(&[("main.py", b"v2")]);
    let server = update_server(package, None);
    let mut dev = device(&server.url());
    dev.config.update.auto_update = false;
    let rt = runtime(&dev);

    assert_eq!(
        rt.updater.poll().unwrap(),
        UpdateOutcome::Available {
            version: "1.2.0".into()
        }
    );
    assert_eq!(read_version(&dev.config.version_file()), "1.0.0");

    let outcome = rt.updater.apply(false).unwrap();
    assert!(matches!(outcome, UpdateOutcome::Succeeded { .. }));
    assert_eq!(read_version(&dev.config.version_file()), "1.2.0");
}

