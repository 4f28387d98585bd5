use super::mounts::{parse_mounts, MountEntry};
use crate::storage::models::{DeviceType, HostObservation};
use std::fs;
use std::io;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Where device facts are read from. Defaults to the live Linux locations; tests point the
/// paths at fixture trees.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    mounts_file: PathBuf,
    sys_block: PathBuf,
    by_uuid: PathBuf,
    host: Option<HostObservation>,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self {
            mounts_file: PathBuf::from("/proc/self/mounts"),
            sys_block: PathBuf::from("/sys/block"),
            by_uuid: PathBuf::from("/dev/disk/by-uuid"),
            host: None,
        }
    }
}

impl SystemProbe {
    pub fn with_mounts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_file = path.into();
        self
    }

    pub fn with_sys_block(mut self, path: impl Into<PathBuf>) -> Self {
        self.sys_block = path.into();
        self
    }

    pub fn with_by_uuid(mut self, path: impl Into<PathBuf>) -> Self {
        self.by_uuid = path.into();
        self
    }

    /// Fix the host identity instead of asking the OS.
    pub fn with_host(mut self, host: HostObservation) -> Self {
        self.host = Some(host);
        self
    }

    pub fn mounts(&self) -> io::Result<Vec<MountEntry>> {
        Ok(parse_mounts(&fs::read_to_string(&self.mounts_file)?))
    }

    pub fn host(&self) -> HostObservation {
        self.host.clone().unwrap_or_else(|| HostObservation {
            host_name: host_name(),
            host_ip: primary_ip(),
            host_type: std::env::consts::OS.to_string(),
        })
    }

    /// Filesystem UUID for a block device source, from the by-uuid symlink farm.
    pub fn fs_uuid(&self, source: &str) -> Option<String> {
        if !source.starts_with('/') {
            return None;
        }
        let device = fs::canonicalize(source).ok()?;
        fs::read_dir(&self.by_uuid)
            .ok()?
            .filter_map(Result::ok)
            .find(|link| fs::canonicalize(link.path()).ok().as_deref() == Some(device.as_path()))
            .and_then(|link| link.file_name().to_str().map(str::to_string))
    }

    pub fn classify(&self, entry: &MountEntry) -> DeviceType {
        if entry.is_network() {
            return DeviceType::Network;
        }
        let Some(name) = self.block_device(&entry.source) else {
            return DeviceType::Unknown;
        };
        if name.starts_with("sr") {
            return DeviceType::Optical;
        }

        let dir = self.sys_block.join(&name);
        let removable = read_flag(&dir.join("removable"));
        let on_usb = fs::canonicalize(&dir)
            .map(|real| real.to_string_lossy().to_ascii_lowercase().contains("/usb"))
            .unwrap_or(false);
        if removable == Some(true) || on_usb {
            return DeviceType::Usb;
        }

        match read_flag(&dir.join("queue/rotational")) {
            Some(true) => DeviceType::Hdd,
            Some(false) => DeviceType::Ssd,
            None if name.starts_with("nvme") => DeviceType::Ssd,
            None => DeviceType::Unknown,
        }
    }

    /// Name of the whole-disk entry under `sys_block` backing `source`, partitions stripped.
    fn block_device(&self, source: &str) -> Option<String> {
        if !source.starts_with('/') {
            return None;
        }
        let real = fs::canonicalize(source).unwrap_or_else(|_| PathBuf::from(source));
        let name = real.file_name()?.to_str()?.to_string();
        let candidates = [name.clone(), strip_partition(&name)];
        let found = candidates
            .into_iter()
            .find(|c| self.sys_block.join(c).exists());
        trace!("Block device for {}: {:?}", source, found);
        found
    }
}

/// `sda1` -> `sda`, `nvme0n1p2` -> `nvme0n1`, `mmcblk0p1` -> `mmcblk0`.
fn strip_partition(name: &str) -> String {
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        if let Some(idx) = name.rfind('p') {
            let (head, tail) = name.split_at(idx);
            let digits = &tail[1..];
            if !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit())
                && head.bytes().last().is_some_and(|b| b.is_ascii_digit())
            {
                return head.to_string();
            }
        }
        return name.to_string();
    }
    name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

fn read_flag(path: &Path) -> Option<bool> {
    match fs::read_to_string(path).ok()?.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// Human name in the style `Internal SSD (ext4) - /home`.
pub fn friendly_name(entry: &MountEntry, device_type: DeviceType) -> String {
    let mount = entry.mount_point.to_string_lossy();
    if device_type == DeviceType::Network {
        return match entry.server() {
            Some(server) => format!("Network Share ({}) - {}", server, mount),
            None => format!("Network Share - {}", mount),
        };
    }
    let kind = match device_type {
        DeviceType::Ssd => "Internal SSD",
        DeviceType::Hdd => "Internal HDD",
        DeviceType::Usb => "External Drive",
        DeviceType::Optical => "Optical Drive",
        DeviceType::Network | DeviceType::Unknown => "Storage",
    };
    let display = match mount.as_ref() {
        "/" => "Root",
        "/home" => "Home",
        other => other,
    };
    if entry.fs_type.is_empty() {
        format!("{} - {}", kind, display)
    } else {
        format!("{} ({}) - {}", kind, entry.fs_type, display)
    }
}

/// Total and used bytes of the filesystem holding `path`.
#[cfg(unix)]
pub fn disk_usage(path: &Path) -> io::Result<(u64, u64)> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: statvfs only writes into the zeroed struct we own
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let fragment = stat.f_frsize as u64;
    let total = fragment * stat.f_blocks as u64;
    let free = fragment * stat.f_bfree as u64;
    Ok((total, total.saturating_sub(free)))
}

#[cfg(not(unix))]
pub fn disk_usage(_path: &Path) -> io::Result<(u64, u64)> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "statvfs unavailable"))
}

#[cfg(unix)]
fn host_name() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buffer length is passed; gethostname NUL-terminates on success
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(not(unix))]
fn host_name() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Address of the interface that would route outward. Connecting a UDP socket sends nothing.
fn primary_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("10.255.255.255:1")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, mount: &str, fs_type: &str) -> MountEntry {
        MountEntry {
            source: source.to_string(),
            mount_point: PathBuf::from(mount),
            fs_type: fs_type.to_string(),
            options: "rw".to_string(),
        }
    }

    #[test]
    fn test_strip_partition() {
        assert_eq!(strip_partition("sda1"), "sda");
        assert_eq!(strip_partition("sda"), "sda");
        assert_eq!(strip_partition("nvme0n1p2"), "nvme0n1");
        assert_eq!(strip_partition("nvme0n1"), "nvme0n1");
        assert_eq!(strip_partition("mmcblk0p1"), "mmcblk0");
    }

    #[test]
    fn test_friendly_names() {
        assert_eq!(
            friendly_name(&entry("/dev/sda1", "/home", "ext4"), DeviceType::Ssd),
            "Internal SSD (ext4) - Home"
        );
        assert_eq!(
            friendly_name(&entry("/dev/sdb1", "/", "xfs"), DeviceType::Hdd),
            "Internal HDD (xfs) - Root"
        );
        assert_eq!(
            friendly_name(&entry("server:/export", "/mnt/x", "nfs"), DeviceType::Network),
            "Network Share (server) - /mnt/x"
        );
    }

    #[test]
    fn test_network_source_classifies_without_sysfs() {
        let probe = SystemProbe::default().with_sys_block("/nonexistent");
        assert_eq!(
            probe.classify(&entry("//nas/share", "/mnt/nas", "cifs")),
            DeviceType::Network
        );
        assert_eq!(
            probe.classify(&entry("tmpfs", "/tmp", "tmpfs")),
            DeviceType::Unknown
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_usage_reports_capacity() {
        let (total, used) = disk_usage(Path::new("/")).unwrap();
        assert!(total > 0);
        assert!(used <= total);
    }

    #[test]
    fn test_host_identity_is_populated() {
        let host = SystemProbe::default().host();
        assert!(!host.host_name.is_empty());
        assert!(!host.host_ip.is_empty());
        assert_eq!(host.host_type, std::env::consts::OS);
    }
}
