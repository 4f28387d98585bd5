use super::models::*;
use super::sqlite::Database;
use crate::error::Error;
use crate::hasher::ChecksumAlgorithm;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;
use tracing::debug;

const DEVICE_COLUMNS: &str = "id, device_key, name, mount_point, device_type, fs_type, \
     total_size, used_size, host_id, is_local, first_seen, last_seen, is_connected";

const FILE_COLUMNS: &str = "id, path, filename, directory, device_id, size, mtime, \
     first_seen, last_seen, is_deleted, deleted_scan_id";

const CHECKSUM_COLUMNS: &str = "ck.id, ck.file_id, ck.scan_id, ck.digest, ck.algorithm, \
     ck.computed_at, ck.status, ck.previous_checksum_id";

const SCAN_COLUMNS: &str = "id, name, root_path, start_time, end_time, status, files_new, \
     files_unchanged, files_modified, files_corrupted, files_missing, total_bytes, algorithm, \
     device_id, host_id, error_message";

const NON_TERMINAL: &str = "('pending', 'counting', 'running')";

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn counter_column(status: FileStatus) -> &'static str {
    match status {
        FileStatus::New => "files_new",
        FileStatus::Unchanged => "files_unchanged",
        FileStatus::Modified => "files_modified",
        FileStatus::Corrupted => "files_corrupted",
        FileStatus::Missing => "files_missing",
    }
}

impl Database {
    // ── Hosts & Devices ──────────────────────────────────────────

    pub fn upsert_host(&self, host: &HostObservation) -> Result<i64> {
        let now = now();
        self.connection().query_row(
            "INSERT INTO hosts (host_name, host_ip, host_type, first_seen, last_seen) \
             VALUES (?1, ?2, ?3, ?4, ?4) \
             ON CONFLICT(host_name, host_ip) DO UPDATE SET \
                 host_type = excluded.host_type, last_seen = excluded.last_seen \
             RETURNING id",
            params![host.host_name, host.host_ip, host.host_type, now],
            |row| row.get(0),
        )
    }

    pub fn get_host(&self, host_id: i64) -> Result<Option<ScanHost>> {
        self.connection()
            .query_row(
                "SELECT id, host_name, host_ip, host_type, first_seen, last_seen \
                 FROM hosts WHERE id = ?1",
                params![host_id],
                |row| {
                    Ok(ScanHost {
                        id: row.get(0)?,
                        host_name: row.get(1)?,
                        host_ip: row.get(2)?,
                        host_type: row.get(3)?,
                        first_seen: row.get(4)?,
                        last_seen: row.get(5)?,
                    })
                },
            )
            .optional()
    }

    /// Insert or refresh a device by its natural key. A refreshed device is connected again.
    pub fn upsert_device(&self, device: &DeviceObservation) -> Result<i64> {
        let now = now();
        let id = self.connection().query_row(
            "INSERT INTO storage_devices \
                 (device_key, name, mount_point, device_type, fs_type, total_size, used_size, \
                  host_id, is_local, first_seen, last_seen, is_connected) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, 1) \
             ON CONFLICT(device_key) DO UPDATE SET \
                 name = excluded.name, \
                 mount_point = excluded.mount_point, \
                 device_type = excluded.device_type, \
                 fs_type = excluded.fs_type, \
                 total_size = excluded.total_size, \
                 used_size = excluded.used_size, \
                 host_id = excluded.host_id, \
                 is_local = excluded.is_local, \
                 last_seen = excluded.last_seen, \
                 is_connected = 1 \
             RETURNING id",
            params![
                device.device_key,
                device.name,
                device.mount_point,
                device.device_type,
                device.fs_type,
                device.total_size,
                device.used_size,
                device.host_id,
                device.is_local,
                now,
            ],
            |row| row.get(0),
        )?;
        debug!("Upserted device {} ({}) as id {}", device.device_key, device.mount_point, id);
        Ok(id)
    }

    /// Mark every device of `host_id` not in `present` as disconnected. Rows are never deleted.
    pub fn mark_devices_disconnected(&self, host_id: i64, present: &[i64]) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let known: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM storage_devices WHERE host_id = ?1 AND is_connected = 1",
            )?;
            let ids = stmt
                .query_map(params![host_id], |row| row.get(0))?
                .collect::<Result<Vec<i64>>>()?;
            ids
        };
        let mut changed = 0;
        for id in known.into_iter().filter(|id| !present.contains(id)) {
            changed += tx.execute(
                "UPDATE storage_devices SET is_connected = 0 WHERE id = ?1",
                params![id],
            )?;
        }
        tx.commit()?;
        Ok(changed)
    }

    pub fn get_device(&self, device_id: i64) -> Result<Option<StorageDevice>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM storage_devices WHERE id = ?1", DEVICE_COLUMNS),
                params![device_id],
                device_from_row,
            )
            .optional()
    }

    pub fn list_storage_devices(&self) -> Result<Vec<StorageDevice>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM storage_devices ORDER BY is_connected DESC, mount_point",
            DEVICE_COLUMNS
        ))?;
        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(devices)
    }

    // ── Files ────────────────────────────────────────────────────

    /// Insert or refresh a file row. Seeing a file again clears `is_deleted`.
    pub fn upsert_file(&self, path: &str, device_id: i64, size: i64, mtime: i64) -> Result<i64> {
        upsert_file_on(self.connection(), path, device_id, size, mtime)
    }

    pub fn get_file(&self, file_id: i64) -> Result<Option<FileRecord>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS),
                params![file_id],
                file_from_row,
            )
            .optional()
    }

    /// The most recently seen file row with this path, on any device.
    pub fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM files WHERE path = ?1 ORDER BY last_seen DESC, id DESC LIMIT 1",
                    FILE_COLUMNS
                ),
                params![path],
                file_from_row,
            )
            .optional()
    }

    /// Every known file under `root` on `device_id`, deleted ones included, each with its
    /// latest checksum. This is the baseline a scan classifies against.
    pub fn prior_files(&self, root: &str, device_id: i64) -> Result<Vec<PriorFile>> {
        let prefix = if root.ends_with('/') {
            root.to_string()
        } else {
            format!("{}/", root)
        };
        let mut stmt = self.connection().prepare(
            "SELECT f.id, f.path, f.size, f.mtime, f.is_deleted, c.id, c.digest, c.algorithm \
             FROM files f \
             LEFT JOIN checksums c \
                 ON c.id = (SELECT MAX(id) FROM checksums WHERE file_id = f.id) \
             WHERE f.device_id = ?1 AND substr(f.path, 1, ?3) = ?2",
        )?;
        let rows = stmt
            .query_map(
                params![device_id, prefix, prefix.chars().count() as i64],
                |row| {
                    let latest = match row.get::<_, Option<i64>>(5)? {
                        Some(id) => Some(LatestChecksum {
                            id,
                            digest: row.get(6)?,
                            algorithm: row.get(7)?,
                        }),
                        None => None,
                    };
                    Ok(PriorFile {
                        file_id: row.get(0)?,
                        path: row.get(1)?,
                        size: row.get(2)?,
                        mtime: row.get(3)?,
                        is_deleted: row.get(4)?,
                        latest,
                    })
                },
            )?
            .collect::<Result<Vec<_>>>()?;
        debug!("Loaded {} prior files under {} on device {}", rows.len(), root, device_id);
        Ok(rows)
    }

    /// Flag a file as missing in `scan_id`. No checksum row is written; the scan's
    /// `files_missing` counter is bumped only if the file was not already deleted.
    pub fn mark_missing(&self, file_id: i64, scan_id: i64) -> Result<bool> {
        let tx = self.connection().unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE files SET is_deleted = 1, deleted_scan_id = ?2 \
             WHERE id = ?1 AND is_deleted = 0",
            params![file_id, scan_id],
        )?;
        if changed > 0 {
            tx.execute(
                "UPDATE scans SET files_missing = files_missing + 1 WHERE id = ?1",
                params![scan_id],
            )?;
        }
        tx.commit()?;
        Ok(changed > 0)
    }

    // ── Checksums ────────────────────────────────────────────────

    /// Append a checksum row linked to the file's previous one and bump the matching
    /// scan counter, atomically.
    pub fn write_checksum(
        &self,
        file_id: i64,
        scan_id: i64,
        digest: &str,
        algorithm: ChecksumAlgorithm,
        status: FileStatus,
    ) -> Result<i64, Error> {
        if status == FileStatus::Missing {
            return Err(Error::InvalidStatus(status.to_string()));
        }
        let tx = self.connection().unchecked_transaction()?;
        let id = insert_checksum_on(&tx, file_id, scan_id, digest, algorithm, status)?;
        tx.commit()?;
        Ok(id)
    }

    /// `upsert_file` + `write_checksum` + byte accounting in a single transaction.
    /// Returns `(file_id, checksum_id)`.
    pub fn record_observation(&self, obs: &NewObservation) -> Result<(i64, i64), Error> {
        if obs.status == FileStatus::Missing {
            return Err(Error::InvalidStatus(obs.status.to_string()));
        }
        let tx = self.connection().unchecked_transaction()?;
        let file_id = upsert_file_on(&tx, &obs.path, obs.device_id, obs.size, obs.mtime)?;
        let checksum_id = insert_checksum_on(
            &tx,
            file_id,
            obs.scan_id,
            &obs.digest,
            obs.algorithm,
            obs.status,
        )?;
        tx.execute(
            "UPDATE scans SET total_bytes = total_bytes + ?1 WHERE id = ?2",
            params![obs.bytes_read, obs.scan_id],
        )?;
        tx.commit()?;
        Ok((file_id, checksum_id))
    }

    pub fn latest_checksum(&self, file_id: i64) -> Result<Option<Checksum>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM checksums ck WHERE ck.file_id = ?1 ORDER BY ck.id DESC LIMIT 1",
                    CHECKSUM_COLUMNS
                ),
                params![file_id],
                checksum_from_row,
            )
            .optional()
    }

    /// Walk a file's lineage from its latest checksum back through `previous_checksum_id`.
    /// Newest first.
    pub fn file_history(&self, file_id: i64) -> Result<Vec<Checksum>> {
        let mut stmt = self.connection().prepare(&format!(
            "WITH RECURSIVE chain(id) AS ( \
                 SELECT MAX(id) FROM checksums WHERE file_id = ?1 \
                 UNION ALL \
                 SELECT c.previous_checksum_id FROM checksums c JOIN chain ON c.id = chain.id \
                 WHERE c.previous_checksum_id IS NOT NULL \
             ) \
             SELECT {} FROM checksums ck JOIN chain ON ck.id = chain.id ORDER BY ck.id DESC",
            CHECKSUM_COLUMNS
        ))?;
        let history = stmt
            .query_map(params![file_id], checksum_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(history)
    }

    /// Checksums written by a scan with their file paths, optionally filtered by status.
    pub fn list_scan_checksums(
        &self,
        scan_id: i64,
        status: Option<FileStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<(Checksum, String)>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {}, f.path FROM checksums ck \
             JOIN files f ON f.id = ck.file_id \
             WHERE ck.scan_id = ?1 AND (?2 IS NULL OR ck.status = ?2) \
             ORDER BY ck.id LIMIT ?3 OFFSET ?4",
            CHECKSUM_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![scan_id, status, limit, offset], |row| {
                Ok((checksum_from_row(row)?, row.get(8)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_checksums_for_scan(&self, scan_id: i64) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM checksums WHERE scan_id = ?1",
            params![scan_id],
            |row| row.get(0),
        )
    }

    pub fn count_missing_for_scan(&self, scan_id: i64) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM files WHERE deleted_scan_id = ?1",
            params![scan_id],
            |row| row.get(0),
        )
    }

    // ── Scans ────────────────────────────────────────────────────

    pub fn create_scan(&self, scan: &NewScan) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO scans (name, root_path, start_time, status, algorithm, device_id, host_id) \
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)",
            params![
                scan.name,
                scan.root_path,
                now(),
                scan.algorithm,
                scan.device_id,
                scan.host_id
            ],
        )?;
        let id = self.connection().last_insert_rowid();
        debug!("Created scan {} for {}", id, scan.root_path);
        Ok(id)
    }

    /// Apply a partial update to a scan that has not yet reached a terminal status.
    pub fn update_scan(&self, scan_id: i64, update: &ScanUpdate) -> Result<bool> {
        let changed = self.connection().execute(
            &format!(
                "UPDATE scans SET \
                     status = COALESCE(?2, status), \
                     device_id = COALESCE(?3, device_id), \
                     error_message = COALESCE(?4, error_message) \
                 WHERE id = ?1 AND status IN {}",
                NON_TERMINAL
            ),
            params![scan_id, update.status, update.device_id, update.error_message],
        )?;
        Ok(changed > 0)
    }

    /// Move a scan to a terminal status. A scan that is already terminal is left untouched
    /// and `false` is returned.
    pub fn finalize_scan(
        &self,
        scan_id: i64,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<bool, Error> {
        if !status.is_terminal() {
            return Err(Error::InvalidStatus(status.to_string()));
        }
        let changed = self.connection().execute(
            &format!(
                "UPDATE scans SET status = ?2, end_time = ?3, \
                     error_message = COALESCE(?4, error_message) \
                 WHERE id = ?1 AND status IN {}",
                NON_TERMINAL
            ),
            params![scan_id, status, now(), error_message],
        )?;
        debug!("Finalized scan {} as {}", scan_id, status);
        Ok(changed > 0)
    }

    pub fn get_scan(&self, scan_id: i64) -> Result<Option<Scan>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM scans WHERE id = ?1", SCAN_COLUMNS),
                params![scan_id],
                scan_from_row,
            )
            .optional()
    }

    /// List scans newest-first. Returns (scans, total_scan_count).
    pub fn list_scans(&self, offset: i64, limit: i64) -> Result<(Vec<Scan>, i64)> {
        let total: i64 = self
            .connection()
            .query_row("SELECT COUNT(*) FROM scans", [], |row| row.get(0))?;

        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM scans ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            SCAN_COLUMNS
        ))?;
        let scans = stmt
            .query_map(params![limit, offset], scan_from_row)?
            .collect::<Result<Vec<_>>>()?;

        Ok((scans, total))
    }

    /// Scans left pending/counting/running by a process that died are marked failed.
    pub fn fail_orphaned_scans(&self) -> Result<usize> {
        let changed = self.connection().execute(
            &format!(
                "UPDATE scans SET status = 'failed', end_time = ?1, \
                     error_message = COALESCE(error_message, 'Scan was interrupted before it finished') \
                 WHERE status IN {}",
                NON_TERMINAL
            ),
            params![now()],
        )?;
        if changed > 0 {
            debug!("Marked {} orphaned scans as failed", changed);
        }
        Ok(changed)
    }

    // ── Scan Errors ──────────────────────────────────────────────

    pub fn record_scan_error(
        &self,
        scan_id: i64,
        file_path: Option<&str>,
        error_type: &str,
        message: &str,
    ) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO scan_errors (scan_id, file_path, error_type, message, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![scan_id, file_path, error_type, message, now()],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn list_scan_errors(
        &self,
        scan_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ScanErrorRecord>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, scan_id, file_path, error_type, message, timestamp \
             FROM scan_errors WHERE scan_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
        )?;
        let errors = stmt
            .query_map(params![scan_id, limit, offset], |row| {
                Ok(ScanErrorRecord {
                    id: row.get(0)?,
                    scan_id: row.get(1)?,
                    file_path: row.get(2)?,
                    error_type: row.get(3)?,
                    message: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(errors)
    }

    pub fn count_scan_errors(&self, scan_id: i64) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM scan_errors WHERE scan_id = ?1",
            params![scan_id],
            |row| row.get(0),
        )
    }

    // ── Reports ──────────────────────────────────────────────────

    /// Scan result summary with up to `error_limit` of its errors.
    pub fn scan_summary(&self, scan_id: i64, error_limit: i64) -> Result<Option<ScanSummary>> {
        let scan = match self.get_scan(scan_id)? {
            Some(scan) => scan,
            None => return Ok(None),
        };
        let error_count = self.count_scan_errors(scan_id)?;
        let errors = self.list_scan_errors(scan_id, 0, error_limit)?;
        let duration_secs = scan
            .end_time
            .as_deref()
            .and_then(|end| duration_between(&scan.start_time, end));

        Ok(Some(ScanSummary {
            scan_id: scan.id,
            name: scan.name,
            root_path: scan.root_path,
            status: scan.status,
            counters: scan.counters,
            total_bytes: scan.total_bytes,
            duration_secs,
            error_message: scan.error_message,
            error_count,
            errors,
        }))
    }
}

fn duration_between(start: &str, end: &str) -> Option<f64> {
    let start = chrono::DateTime::parse_from_rfc3339(start).ok()?;
    let end = chrono::DateTime::parse_from_rfc3339(end).ok()?;
    Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
}

fn upsert_file_on(
    conn: &Connection,
    path: &str,
    device_id: i64,
    size: i64,
    mtime: i64,
) -> Result<i64> {
    let p = Path::new(path);
    let filename = p
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let directory = p
        .parent()
        .map(|d| d.to_string_lossy().into_owned())
        .unwrap_or_default();
    conn.query_row(
        "INSERT INTO files \
             (path, filename, directory, device_id, size, mtime, first_seen, last_seen, is_deleted) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0) \
         ON CONFLICT(path, device_id) DO UPDATE SET \
             size = excluded.size, \
             mtime = excluded.mtime, \
             last_seen = excluded.last_seen, \
             is_deleted = 0, \
             deleted_scan_id = NULL \
         RETURNING id",
        params![path, filename, directory, device_id, size, mtime, now()],
        |row| row.get(0),
    )
}

fn insert_checksum_on(
    conn: &Connection,
    file_id: i64,
    scan_id: i64,
    digest: &str,
    algorithm: ChecksumAlgorithm,
    status: FileStatus,
) -> Result<i64> {
    let previous: Option<i64> = conn.query_row(
        "SELECT MAX(id) FROM checksums WHERE file_id = ?1",
        params![file_id],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO checksums \
             (file_id, scan_id, digest, algorithm, computed_at, status, previous_checksum_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![file_id, scan_id, digest, algorithm, now(), status, previous],
    )?;
    let id = conn.last_insert_rowid();
    let column = counter_column(status);
    conn.execute(
        &format!("UPDATE scans SET {col} = {col} + 1 WHERE id = ?1", col = column),
        params![scan_id],
    )?;
    Ok(id)
}

fn device_from_row(row: &Row<'_>) -> Result<StorageDevice> {
    Ok(StorageDevice {
        id: row.get(0)?,
        device_key: row.get(1)?,
        name: row.get(2)?,
        mount_point: row.get(3)?,
        device_type: row.get(4)?,
        fs_type: row.get(5)?,
        total_size: row.get(6)?,
        used_size: row.get(7)?,
        host_id: row.get(8)?,
        is_local: row.get(9)?,
        first_seen: row.get(10)?,
        last_seen: row.get(11)?,
        connected: row.get(12)?,
    })
}

fn file_from_row(row: &Row<'_>) -> Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        filename: row.get(2)?,
        directory: row.get(3)?,
        device_id: row.get(4)?,
        size: row.get(5)?,
        mtime: row.get(6)?,
        first_seen: row.get(7)?,
        last_seen: row.get(8)?,
        is_deleted: row.get(9)?,
        deleted_scan_id: row.get(10)?,
    })
}

fn checksum_from_row(row: &Row<'_>) -> Result<Checksum> {
    Ok(Checksum {
        id: row.get(0)?,
        file_id: row.get(1)?,
        scan_id: row.get(2)?,
        digest: row.get(3)?,
        algorithm: row.get(4)?,
        computed_at: row.get(5)?,
        status: row.get(6)?,
        previous_checksum_id: row.get(7)?,
    })
}

fn scan_from_row(row: &Row<'_>) -> Result<Scan> {
    Ok(Scan {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        status: row.get(5)?,
        counters: ScanCounters {
            new: row.get(6)?,
            unchanged: row.get(7)?,
            modified: row.get(8)?,
            corrupted: row.get(9)?,
            missing: row.get(10)?,
        },
        total_bytes: row.get(11)?,
        algorithm: row.get(12)?,
        device_id: row.get(13)?,
        host_id: row.get(14)?,
        error_message: row.get(15)?,
    })
}
