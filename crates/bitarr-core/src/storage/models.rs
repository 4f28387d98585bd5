use crate::error::ParseEnumError;
use crate::hasher::ChecksumAlgorithm;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Per-file, per-scan classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    New,
    Unchanged,
    Modified,
    Corrupted,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Counting,
    Running,
    Completed,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Ssd,
    Hdd,
    Usb,
    Optical,
    Network,
    Unknown,
}

macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(ParseEnumError { kind: $kind, value: s.to_string() }),
                }
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

string_enum!(FileStatus, "file status", {
    New => "new",
    Unchanged => "unchanged",
    Modified => "modified",
    Corrupted => "corrupted",
    Missing => "missing",
});

string_enum!(ScanStatus, "scan status", {
    Pending => "pending",
    Counting => "counting",
    Running => "running",
    Completed => "completed",
    Stopped => "stopped",
    Failed => "failed",
});

string_enum!(DeviceType, "device type", {
    Ssd => "ssd",
    Hdd => "hdd",
    Usb => "usb",
    Optical => "optical",
    Network => "network",
    Unknown => "unknown",
});

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

impl ToSql for ChecksumAlgorithm {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ChecksumAlgorithm {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// The five classification counters of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounters {
    pub new: i64,
    pub unchanged: i64,
    pub modified: i64,
    pub corrupted: i64,
    pub missing: i64,
}

impl ScanCounters {
    pub fn total(&self) -> i64 {
        self.new + self.unchanged + self.modified + self.corrupted + self.missing
    }

    /// Files that received a checksum row: everything except `missing`.
    pub fn with_checksum(&self) -> i64 {
        self.total() - self.missing
    }

    pub fn get(&self, status: FileStatus) -> i64 {
        match status {
            FileStatus::New => self.new,
            FileStatus::Unchanged => self.unchanged,
            FileStatus::Modified => self.modified,
            FileStatus::Corrupted => self.corrupted,
            FileStatus::Missing => self.missing,
        }
    }
}

/// The machine a device is attached to.
#[derive(Debug, Clone, Serialize)]
pub struct ScanHost {
    pub id: i64,
    pub host_name: String,
    pub host_ip: String,
    pub host_type: String,
    pub first_seen: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageDevice {
    pub id: i64,
    /// Natural key: `uuid:<fs uuid>` or `mount:<host name>:<mount point>`.
    pub device_key: String,
    pub name: String,
    pub mount_point: String,
    pub device_type: DeviceType,
    pub fs_type: Option<String>,
    pub total_size: i64,
    pub used_size: i64,
    pub host_id: Option<i64>,
    pub is_local: bool,
    pub first_seen: String,
    pub last_seen: String,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub filename: String,
    pub directory: String,
    pub device_id: i64,
    pub size: i64,
    /// Nanoseconds since the Unix epoch.
    pub mtime: i64,
    pub first_seen: String,
    pub last_seen: String,
    pub is_deleted: bool,
    pub deleted_scan_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Checksum {
    pub id: i64,
    pub file_id: i64,
    pub scan_id: i64,
    pub digest: String,
    pub algorithm: ChecksumAlgorithm,
    pub computed_at: String,
    pub status: FileStatus,
    pub previous_checksum_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Scan {
    pub id: i64,
    pub name: String,
    pub root_path: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub status: ScanStatus,
    pub counters: ScanCounters,
    pub total_bytes: i64,
    pub algorithm: ChecksumAlgorithm,
    pub device_id: Option<i64>,
    pub host_id: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanErrorRecord {
    pub id: i64,
    pub scan_id: i64,
    pub file_path: Option<String>,
    pub error_type: String,
    pub message: String,
    pub timestamp: String,
}

/// Fields written on every host upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostObservation {
    pub host_name: String,
    pub host_ip: String,
    pub host_type: String,
}

/// Fields written on every device upsert; `device_key` is the conflict target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceObservation {
    pub device_key: String,
    pub name: String,
    pub mount_point: String,
    pub device_type: DeviceType,
    pub fs_type: Option<String>,
    pub total_size: i64,
    pub used_size: i64,
    pub host_id: Option<i64>,
    pub is_local: bool,
}

/// One classified file, written by [`Database::record_observation`](super::Database::record_observation).
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub scan_id: i64,
    pub device_id: i64,
    pub path: String,
    pub size: i64,
    pub mtime: i64,
    pub digest: String,
    pub algorithm: ChecksumAlgorithm,
    pub status: FileStatus,
    pub bytes_read: i64,
}

/// Parameters for a new scan row.
#[derive(Debug, Clone)]
pub struct NewScan {
    pub name: String,
    pub root_path: String,
    pub algorithm: ChecksumAlgorithm,
    pub device_id: Option<i64>,
    pub host_id: Option<i64>,
}

/// Partial update of a running scan; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct ScanUpdate {
    pub status: Option<ScanStatus>,
    pub device_id: Option<i64>,
    pub error_message: Option<String>,
}

/// A known file under a scan root with its most recent checksum, if any.
#[derive(Debug, Clone)]
pub struct PriorFile {
    pub file_id: i64,
    pub path: String,
    pub size: i64,
    pub mtime: i64,
    pub is_deleted: bool,
    pub latest: Option<LatestChecksum>,
}

#[derive(Debug, Clone)]
pub struct LatestChecksum {
    pub id: i64,
    pub digest: String,
    pub algorithm: ChecksumAlgorithm,
}

/// Report view of a scan, for the reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scan_id: i64,
    pub name: String,
    pub root_path: String,
    pub status: ScanStatus,
    pub counters: ScanCounters,
    pub total_bytes: i64,
    pub duration_secs: Option<f64>,
    pub error_message: Option<String>,
    pub error_count: i64,
    pub errors: Vec<ScanErrorRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip_through_names() {
        for status in [
            FileStatus::New,
            FileStatus::Unchanged,
            FileStatus::Modified,
            FileStatus::Corrupted,
            FileStatus::Missing,
        ] {
            assert_eq!(status.as_str().parse::<FileStatus>().unwrap(), status);
        }
        assert!("aborted".parse::<ScanStatus>().is_err());
    }

    #[test]
    fn test_terminal_scan_statuses() {
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Stopped.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
        assert!(!ScanStatus::Counting.is_terminal());
    }

    #[test]
    fn test_counter_totals() {
        let counters = ScanCounters {
            new: 0,
            unchanged: 1,
            modified: 0,
            corrupted: 1,
            missing: 1,
        };
        assert_eq!(counters.total(), 3);
        assert_eq!(counters.with_checksum(), 2);
        assert_eq!(counters.get(FileStatus::Corrupted), 1);
    }
}
