use bitarr_core::hasher::ChecksumAlgorithm;
use bitarr_core::storage::models::*;
use bitarr_core::storage::Database;
use bitarr_core::Error;

fn make_device(db: &Database, key: &str, mount: &str) -> i64 {
    db.upsert_device(&DeviceObservation {
        device_key: key.to_string(),
        name: format!("Storage - {}", mount),
        mount_point: mount.to_string(),
        device_type: DeviceType::Ssd,
        fs_type: Some("ext4".to_string()),
        total_size: 1_000,
        used_size: 400,
        host_id: None,
        is_local: true,
    })
    .unwrap()
}

fn make_scan(db: &Database, root: &str, device_id: i64) -> i64 {
    db.create_scan(&NewScan {
        name: format!("Scan of {}", root),
        root_path: root.to_string(),
        algorithm: ChecksumAlgorithm::Sha256,
        device_id: Some(device_id),
        host_id: None,
    })
    .unwrap()
}

fn observe(scan_id: i64, device_id: i64, path: &str, digest: &str, status: FileStatus) -> NewObservation {
    NewObservation {
        scan_id,
        device_id,
        path: path.to_string(),
        size: 10,
        mtime: 1_700_000_000_000_000_000,
        digest: digest.to_string(),
        algorithm: ChecksumAlgorithm::Sha256,
        status,
        bytes_read: 10,
    }
}

#[test]
fn test_upsert_host_and_device_are_idempotent() {
    let db = Database::open_in_memory().unwrap();
    let host = HostObservation {
        host_name: "box".to_string(),
        host_ip: "10.0.0.2".to_string(),
        host_type: "linux".to_string(),
    };
    let h1 = db.upsert_host(&host).unwrap();
    let h2 = db.upsert_host(&host).unwrap();
    assert_eq!(h1, h2);
    assert_eq!(db.get_host(h1).unwrap().unwrap().host_name, "box");

    let d1 = make_device(&db, "uuid:1234", "/data");
    let d2 = db
        .upsert_device(&DeviceObservation {
            device_key: "uuid:1234".to_string(),
            name: "Renamed".to_string(),
            mount_point: "/mnt/data".to_string(),
            device_type: DeviceType::Ssd,
            fs_type: None,
            total_size: 2_000,
            used_size: 900,
            host_id: Some(h1),
            is_local: true,
        })
        .unwrap();
    assert_eq!(d1, d2);

    let device = db.get_device(d1).unwrap().unwrap();
    assert_eq!(device.mount_point, "/mnt/data");
    assert_eq!(device.used_size, 900);
    assert_eq!(db.list_storage_devices().unwrap().len(), 1);
}

#[test]
fn test_devices_are_disconnected_not_deleted() {
    let db = Database::open_in_memory().unwrap();
    let host_id = db
        .upsert_host(&HostObservation {
            host_name: "box".to_string(),
            host_ip: "10.0.0.2".to_string(),
            host_type: "linux".to_string(),
        })
        .unwrap();
    let mut ids = Vec::new();
    for (key, mount) in [("a", "/a"), ("b", "/b")] {
        ids.push(
            db.upsert_device(&DeviceObservation {
                device_key: key.to_string(),
                name: mount.to_string(),
                mount_point: mount.to_string(),
                device_type: DeviceType::Hdd,
                fs_type: None,
                total_size: 0,
                used_size: 0,
                host_id: Some(host_id),
                is_local: true,
            })
            .unwrap(),
        );
    }

    let changed = db.mark_devices_disconnected(host_id, &ids[..1]).unwrap();
    assert_eq!(changed, 1);
    let devices = db.list_storage_devices().unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().any(|d| d.id == ids[1] && !d.connected));
    assert!(devices.iter().any(|d| d.id == ids[0] && d.connected));
}

#[test]
fn test_checksum_lineage_links_previous_rows() {
    let db = Database::open_in_memory().unwrap();
    let device_id = make_device(&db, "uuid:x", "/data");

    let scan1 = make_scan(&db, "/data", device_id);
    let (file_id, c1) = db
        .record_observation(&observe(scan1, device_id, "/data/a.txt", "aa", FileStatus::New))
        .unwrap();
    let scan2 = make_scan(&db, "/data", device_id);
    let (file_again, c2) = db
        .record_observation(&observe(scan2, device_id, "/data/a.txt", "aa", FileStatus::Unchanged))
        .unwrap();
    assert_eq!(file_id, file_again);

    let scan3 = make_scan(&db, "/data", device_id);
    let c3 = db
        .write_checksum(file_id, scan3, "bb", ChecksumAlgorithm::Sha256, FileStatus::Corrupted)
        .unwrap();

    let history = db.file_history(file_id).unwrap();
    let ids: Vec<i64> = history.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![c3, c2, c1]);
    assert_eq!(history[0].previous_checksum_id, Some(c2));
    assert_eq!(history[1].previous_checksum_id, Some(c1));
    assert_eq!(history[2].previous_checksum_id, None);
    assert_eq!(history[0].status, FileStatus::Corrupted);

    let latest = db.latest_checksum(file_id).unwrap().unwrap();
    assert_eq!(latest.id, c3);
}

#[test]
fn test_counters_follow_checksum_rows() {
    let db = Database::open_in_memory().unwrap();
    let device_id = make_device(&db, "uuid:x", "/data");
    let scan_id = make_scan(&db, "/data", device_id);

    db.record_observation(&observe(scan_id, device_id, "/data/a", "1", FileStatus::New))
        .unwrap();
    db.record_observation(&observe(scan_id, device_id, "/data/b", "2", FileStatus::New))
        .unwrap();
    db.record_observation(&observe(scan_id, device_id, "/data/c", "3", FileStatus::Modified))
        .unwrap();

    let scan = db.get_scan(scan_id).unwrap().unwrap();
    assert_eq!(scan.counters.new, 2);
    assert_eq!(scan.counters.modified, 1);
    assert_eq!(scan.total_bytes, 30);
    assert_eq!(scan.counters.with_checksum(), db.count_checksums_for_scan(scan_id).unwrap());

    let modified = db
        .list_scan_checksums(scan_id, Some(FileStatus::Modified), 0, 10)
        .unwrap();
    assert_eq!(modified.len(), 1);
    assert_eq!(modified[0].1, "/data/c");
    assert_eq!(db.list_scan_checksums(scan_id, None, 0, 10).unwrap().len(), 3);
}

#[test]
fn test_write_checksum_rejects_missing_status() {
    let db = Database::open_in_memory().unwrap();
    let device_id = make_device(&db, "uuid:x", "/data");
    let scan_id = make_scan(&db, "/data", device_id);
    let file_id = db.upsert_file("/data/a", device_id, 1, 1).unwrap();

    let err = db
        .write_checksum(file_id, scan_id, "aa", ChecksumAlgorithm::Sha256, FileStatus::Missing)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));
    assert_eq!(db.count_checksums_for_scan(scan_id).unwrap(), 0);
}

#[test]
fn test_mark_missing_and_reappearance() {
    let db = Database::open_in_memory().unwrap();
    let device_id = make_device(&db, "uuid:x", "/data");
    let scan1 = make_scan(&db, "/data", device_id);
    let (file_id, _) = db
        .record_observation(&observe(scan1, device_id, "/data/gone", "aa", FileStatus::New))
        .unwrap();

    let scan2 = make_scan(&db, "/data", device_id);
    assert!(db.mark_missing(file_id, scan2).unwrap());
    // Second call is a no-op
    assert!(!db.mark_missing(file_id, scan2).unwrap());

    let file = db.get_file(file_id).unwrap().unwrap();
    assert!(file.is_deleted);
    assert_eq!(file.deleted_scan_id, Some(scan2));
    let scan = db.get_scan(scan2).unwrap().unwrap();
    assert_eq!(scan.counters.missing, 1);
    assert_eq!(db.count_missing_for_scan(scan2).unwrap(), 1);
    assert_eq!(db.count_checksums_for_scan(scan2).unwrap(), 0);

    // Seen again: undeleted, same row
    let again = db.upsert_file("/data/gone", device_id, 10, 5).unwrap();
    assert_eq!(again, file_id);
    let file = db.get_file(file_id).unwrap().unwrap();
    assert!(!file.is_deleted);
    assert_eq!(file.deleted_scan_id, None);
}

#[test]
fn test_prior_files_is_scoped_to_root_and_device() {
    let db = Database::open_in_memory().unwrap();
    let d1 = make_device(&db, "uuid:1", "/");
    let d2 = make_device(&db, "uuid:2", "/other");
    let scan_id = make_scan(&db, "/data", d1);

    db.record_observation(&observe(scan_id, d1, "/data/a", "1", FileStatus::New))
        .unwrap();
    db.record_observation(&observe(scan_id, d1, "/data/sub/b", "2", FileStatus::New))
        .unwrap();
    db.record_observation(&observe(scan_id, d1, "/data2/c", "3", FileStatus::New))
        .unwrap();
    db.upsert_file("/data/never_hashed", d1, 1, 1).unwrap();
    db.upsert_file("/data/on_other_device", d2, 1, 1).unwrap();

    let mut prior = db.prior_files("/data", d1).unwrap();
    prior.sort_by(|a, b| a.path.cmp(&b.path));
    let paths: Vec<&str> = prior.iter().map(|p| p.path.as_str()).collect();
    assert_eq!(paths, vec!["/data/a", "/data/never_hashed", "/data/sub/b"]);
    assert_eq!(prior[0].latest.as_ref().unwrap().digest, "1");
    assert!(prior[1].latest.is_none());
}

#[test]
fn test_finalize_is_terminal_and_sets_end_time() {
    let db = Database::open_in_memory().unwrap();
    let device_id = make_device(&db, "uuid:x", "/data");
    let scan_id = make_scan(&db, "/data", device_id);

    assert!(db
        .update_scan(
            scan_id,
            &ScanUpdate {
                status: Some(ScanStatus::Running),
                ..Default::default()
            }
        )
        .unwrap());
    assert!(matches!(
        db.finalize_scan(scan_id, ScanStatus::Running, None),
        Err(Error::InvalidStatus(_))
    ));
    assert!(db.finalize_scan(scan_id, ScanStatus::Stopped, None).unwrap());
    assert!(!db
        .finalize_scan(scan_id, ScanStatus::Completed, None)
        .unwrap());
    assert!(!db
        .update_scan(
            scan_id,
            &ScanUpdate {
                status: Some(ScanStatus::Running),
                ..Default::default()
            }
        )
        .unwrap());

    let scan = db.get_scan(scan_id).unwrap().unwrap();
    assert_eq!(scan.status, ScanStatus::Stopped);
    assert!(scan.end_time.is_some());
}

#[test]
fn test_list_scans_paginates_newest_first() {
    let db = Database::open_in_memory().unwrap();
    let device_id = make_device(&db, "uuid:x", "/data");
    let ids: Vec<i64> = (0..5).map(|_| make_scan(&db, "/data", device_id)).collect();

    let (page, total) = db.list_scans(0, 2).unwrap();
    assert_eq!(total, 5);
    assert_eq!(page.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

    let (page, _) = db.list_scans(4, 2).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, ids[0]);
}

#[test]
fn test_scan_errors_and_summary() {
    let db = Database::open_in_memory().unwrap();
    let device_id = make_device(&db, "uuid:x", "/data");
    let scan_id = make_scan(&db, "/data", device_id);

    db.record_scan_error(scan_id, Some("/data/locked"), "permission_error", "denied")
        .unwrap();
    db.record_scan_error(scan_id, Some("/data/bad"), "io_error", "EIO")
        .unwrap();
    db.finalize_scan(scan_id, ScanStatus::Completed, None).unwrap();

    assert_eq!(db.count_scan_errors(scan_id).unwrap(), 2);
    let errors = db.list_scan_errors(scan_id, 1, 10).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "io_error");

    let summary = db.scan_summary(scan_id, 1).unwrap().unwrap();
    assert_eq!(summary.status, ScanStatus::Completed);
    assert_eq!(summary.error_count, 2);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.duration_secs.is_some());
    assert!(db.scan_summary(scan_id + 100, 10).unwrap().is_none());
}

#[test]
fn test_fail_orphaned_scans_only_touches_unfinished() {
    let db = Database::open_in_memory().unwrap();
    let device_id = make_device(&db, "uuid:x", "/data");
    let done = make_scan(&db, "/data", device_id);
    db.finalize_scan(done, ScanStatus::Completed, None).unwrap();
    let orphan = make_scan(&db, "/data", device_id);

    assert_eq!(db.fail_orphaned_scans().unwrap(), 1);
    let orphan = db.get_scan(orphan).unwrap().unwrap();
    assert_eq!(orphan.status, ScanStatus::Failed);
    assert!(orphan.error_message.is_some());
    assert_eq!(db.get_scan(done).unwrap().unwrap().status, ScanStatus::Completed);
}

#[test]
fn test_get_file_by_path() {
    let db = Database::open_in_memory().unwrap();
    let device_id = make_device(&db, "uuid:x", "/data");
    let id = db.upsert_file("/data/photos/cat.jpg", device_id, 5, 7).unwrap();

    let file = db.get_file_by_path("/data/photos/cat.jpg").unwrap().unwrap();
    assert_eq!(file.id, id);
    assert_eq!(file.filename, "cat.jpg");
    assert_eq!(file.directory, "/data/photos");
    assert_eq!(file.mtime, 7);
    assert!(db.get_file_by_path("/nope").unwrap().is_none());
}
