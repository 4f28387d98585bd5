use super::mounts::{find_mount, MountEntry};
use super::probe::{disk_usage, friendly_name, SystemProbe};
use crate::error::Error;
use crate::storage::models::{DeviceObservation, DeviceType, HostObservation, StorageDevice};
use crate::storage::Database;
use std::path::Path;
use tracing::{debug, warn};

/// The device a scan root was attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: i64,
    pub name: String,
    pub mount_point: String,
    pub device_type: DeviceType,
    pub is_local: bool,
    pub host_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    probe: SystemProbe,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe(probe: SystemProbe) -> Self {
        Self { probe }
    }

    /// Attribute `path` to the mount that covers it and upsert the device row.
    /// `path` should already be canonical.
    pub fn resolve(&self, db: &Database, path: &Path) -> Result<DeviceDescriptor, Error> {
        let mounts = self.probe.mounts().map_err(|e| Error::DeviceResolution {
            path: path.to_path_buf(),
            reason: format!("cannot read mount table: {}", e),
        })?;
        let entry = find_mount(&mounts, path).ok_or_else(|| Error::DeviceResolution {
            path: path.to_path_buf(),
            reason: "no mount covers this path".to_string(),
        })?;

        let host = self.probe.host();
        let host_id = db.upsert_host(&host)?;
        let observation = self.observe(entry, &host, host_id);
        let id = db.upsert_device(&observation)?;
        debug!(
            "Resolved {} to device {} ({}, {})",
            path.display(),
            id,
            observation.name,
            observation.device_type
        );
        Ok(descriptor(id, host_id, observation))
    }

    /// Placeholder device used when `resolve` fails, keyed by host and scan root so repeated
    /// scans of the same root still share history.
    pub fn unknown_device(&self, db: &Database, root: &Path) -> Result<DeviceDescriptor, Error> {
        let host = self.probe.host();
        let host_id = db.upsert_host(&host)?;
        let mount_point = root.to_string_lossy().into_owned();
        let observation = DeviceObservation {
            device_key: format!("unknown:{}:{}", host.host_name, mount_point),
            name: format!("Unknown Device - {}", mount_point),
            mount_point,
            device_type: DeviceType::Unknown,
            fs_type: None,
            total_size: 0,
            used_size: 0,
            host_id: Some(host_id),
            is_local: true,
        };
        let id = db.upsert_device(&observation)?;
        Ok(descriptor(id, host_id, observation))
    }

    /// Real, user-facing mounts of this machine.
    pub fn detect_all(&self) -> Result<Vec<MountEntry>, Error> {
        let mounts = self.probe.mounts()?;
        Ok(mounts
            .into_iter()
            .filter(|m| !m.is_virtual() && m.mount_point.is_dir())
            .collect())
    }

    /// Upsert every detected mount and mark this host's other devices disconnected.
    pub fn refresh(&self, db: &Database) -> Result<Vec<StorageDevice>, Error> {
        let host = self.probe.host();
        let host_id = db.upsert_host(&host)?;
        let mut present = Vec::new();
        for entry in self.detect_all()? {
            let observation = self.observe(&entry, &host, host_id);
            present.push(db.upsert_device(&observation)?);
        }
        let gone = db.mark_devices_disconnected(host_id, &present)?;
        debug!("Device refresh: {} connected, {} disconnected", present.len(), gone);
        Ok(db.list_storage_devices()?)
    }

    fn observe(&self, entry: &MountEntry, host: &HostObservation, host_id: i64) -> DeviceObservation {
        let device_type = self.probe.classify(entry);
        let mount_point = entry.mount_point.to_string_lossy().into_owned();
        let device_key = match self.probe.fs_uuid(&entry.source) {
            Some(uuid) => format!("uuid:{}", uuid),
            None => format!("mount:{}:{}", host.host_name, mount_point),
        };
        let (total_size, used_size) = match disk_usage(&entry.mount_point) {
            Ok(usage) => usage,
            Err(e) => {
                warn!("Could not read capacity of {}: {}", mount_point, e);
                (0, 0)
            }
        };
        DeviceObservation {
            device_key,
            name: friendly_name(entry, device_type),
            mount_point,
            device_type,
            fs_type: Some(entry.fs_type.clone()).filter(|t| !t.is_empty()),
            total_size: total_size as i64,
            used_size: used_size as i64,
            host_id: Some(host_id),
            is_local: device_type != DeviceType::Network,
        }
    }
}

fn descriptor(id: i64, host_id: i64, observation: DeviceObservation) -> DeviceDescriptor {
    DeviceDescriptor {
        id,
        name: observation.name,
        mount_point: observation.mount_point,
        device_type: observation.device_type,
        is_local: observation.is_local,
        host_id,
    }
}
