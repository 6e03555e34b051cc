//! End-to-end backup lifecycle against an on-disk metadata store.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use gw_config::{Config, SourceSpec};
use gw_core::backup::{BackupManager, BackupType, RecordStatus, RestoreTarget};
use gw_core::controllers::mock::MockService;
use gw_core::fsutil;
use tempfile::TempDir;

struct Device {
    _temp: TempDir,
    config: Config,
    service: Arc<MockService>,
}

fn device() -> Device {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("app");
    fs::create_dir_all(root.join("certs").join("ca")).unwrap();
    fs::write(root.join("config.json"), br#"{"zone":"A"}"#).unwrap();
    fs::write(root.join("api.key"), b"secret-1").unwrap();
    fs::write(root.join("certs").join("ca").join("root.pem"), b"pem-1").unwrap();

    let mut config = Config::default();
    config.device.install_dir = root.clone();
    config.device.data_dir = temp.path().join("data");
    config.backup.backup_dir = temp.path().join("backups");
    config.backup.sources.clear();
    config
        .backup
        .sources
        .insert("config".into(), SourceSpec::new(root.join("config.json")));
    config
        .backup
        .sources
        .insert("security".into(), SourceSpec::new(root.join("api.key")));
    config
        .backup
        .sources
        .insert("certificates".into(), SourceSpec::new(root.join("certs")));
    config.backup.manual_items = vec!["config".into(), "security".into(), "certificates".into()];
    config.backup.daily_items = vec!["config".into(), "security".into()];

    Device {
        _temp: temp,
        config,
        service: Arc::new(MockService::default()),
    }
}

fn open(dev: &Device) -> BackupManager {
    BackupManager::open(&dev.config, dev.service.clone()).unwrap()
}

fn read(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}

#[test]
fn manual_backup_restores_every_item() {
    let dev = device();
    let backups = open(&dev);
    let root = &dev.config.device.install_dir;

    let record = backups.create_manual(Some("before maintenance")).unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.backup_type, BackupType::Manual);
    assert!(record.file_path.exists());

    fs::write(root.join("config.json"), br#"{"zone":"B"}"#).unwrap();
    fs::write(root.join("certs").join("ca").join("root.pem"), b"pem-2").unwrap();

    let event = backups.restore(&RestoreTarget::Id(record.id), None).unwrap();
    assert_eq!(event.status, RecordStatus::Completed);
    assert_eq!(event.backup_id, Some(record.id));
    assert_eq!(read(&root.join("config.json")), br#"{"zone":"A"}"#);
    assert_eq!(read(&root.join("certs").join("ca").join("root.pem")), b"pem-1");

    let safety = fsutil::safety_copy_path(&root.join("config.json"));
    assert_eq!(read(&safety), br#"{"zone":"B"}"#);
    assert_eq!(dev.service.calls(), vec!["stop", "start"]);
}

#[test]
fn records_survive_reopen() {
    let dev = device();
    let id = {
        let backups = open(&dev);
        backups.create_daily().unwrap().id
    };

    let backups = open(&dev);
    let listing = backups.get(id).unwrap().unwrap();
    assert!(listing.exists);
    assert_eq!(listing.record.backup_type, BackupType::Daily);
    assert_eq!(backups.list(Some(BackupType::Daily), None).unwrap().len(), 1);
    assert!(backups.list(Some(BackupType::Weekly), None).unwrap().is_empty());
}

#[test]
fn restore_by_path_is_audited_without_id() {
    let dev = device();
    let backups = open(&dev);
    let record = backups.create_manual(None).unwrap();

    let copied = dev.config.backup.backup_dir.join("copied").join("manual.zip");
    fs::create_dir_all(copied.parent().unwrap()).unwrap();
    fs::copy(&record.file_path, &copied).unwrap();

    let subset = vec!["security".to_string()];
    let event = backups
        .restore(&RestoreTarget::Path(copied), Some(&subset))
        .unwrap();
    assert_eq!(event.backup_id, None);
    assert_eq!(event.notes, subset);

    let history = backups.history(None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].backup_id, None);
    assert_eq!(backups.stats().unwrap().total_restores, 1);
}

#[test]
fn corrupted_archive_is_rejected_and_nothing_changes() {
    let dev = device();
    let backups = open(&dev);
    let root = &dev.config.device.install_dir;
    let record = backups.create_manual(None).unwrap();

    let mut bytes = read(&record.file_path);
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    fs::write(&record.file_path, &bytes).unwrap();
    fs::write(root.join("api.key"), b"secret-2").unwrap();

    let target = RestoreTarget::Id(record.id);
    let err = backups.verify(&target).unwrap_err();
    assert!(err.is_integrity(), "{err}");
    assert!(backups.restore(&target, None).is_err());

    assert_eq!(read(&root.join("api.key")), b"secret-2");
    assert!(!fsutil::safety_copy_path(&root.join("api.key")).exists());
    assert!(dev.service.calls().is_empty());
}

#[test]
fn unknown_backup_id_is_not_found() {
    let dev = device();
    let backups = open(&dev);
    assert!(backups.get(gw_common::BackupId(404)).unwrap().is_none());
    let err: gw_common::Error = backups
        .restore(&RestoreTarget::Id(gw_common::BackupId(404)), None)
        .unwrap_err()
        .into();
    assert_eq!(
        gw_core::exit_codes::ExitCode::from(&err),
        gw_core::exit_codes::ExitCode::NotFound
    );
}

#[test]
fn stats_count_by_type() {
    let dev = device();
    let backups = open(&dev);
    backups.create_daily().unwrap();
    backups.create_weekly().unwrap();
    backups.create_manual(None).unwrap();

    let stats = backups.stats().unwrap();
    assert_eq!(stats.by_type.get("daily"), Some(&1));
    assert_eq!(stats.by_type.get("weekly"), Some(&1));
    assert_eq!(stats.by_type.get("manual"), Some(&1));
    assert!(stats.total_size_bytes > 0);
    assert!(stats.latest_backup.is_some());
}
