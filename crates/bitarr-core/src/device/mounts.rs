use std::path::{Path, PathBuf};

/// One line of a Linux mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: String,
}

const NETWORK_FS_TYPES: &[&str] = &[
    "nfs",
    "nfs4",
    "cifs",
    "smb3",
    "smbfs",
    "fuse.sshfs",
    "sshfs",
    "9p",
    "afs",
    "ceph",
    "glusterfs",
    "fuse.glusterfs",
    "davfs",
    "fuse.davfs2",
];

const VIRTUAL_FS_TYPES: &[&str] = &[
    "proc",
    "sysfs",
    "devpts",
    "cgroup",
    "cgroup2",
    "tmpfs",
    "securityfs",
    "fusectl",
    "debugfs",
    "tracefs",
    "configfs",
    "hugetlbfs",
    "mqueue",
    "pstore",
    "efivarfs",
    "fuse.snapfuse",
    "fuse.gvfsd-fuse",
    "fuse.portal",
    "squashfs",
    "nsfs",
    "binfmt_misc",
    "rpc_pipefs",
    "devtmpfs",
    "autofs",
    "bpf",
];

const SYSTEM_MOUNT_PREFIXES: &[&str] = &[
    "/proc",
    "/sys",
    "/dev",
    "/run",
    "/snap",
    "/boot",
    "/var/snap",
];

impl MountEntry {
    pub fn is_network(&self) -> bool {
        NETWORK_FS_TYPES.contains(&self.fs_type.as_str())
            || self.source.starts_with("//")
            || (self.source.contains(":/") && !self.source.starts_with('/'))
    }

    /// Pseudo filesystems and system mounts that never hold user data.
    pub fn is_virtual(&self) -> bool {
        VIRTUAL_FS_TYPES.contains(&self.fs_type.as_str())
            || SYSTEM_MOUNT_PREFIXES
                .iter()
                .any(|prefix| self.mount_point.starts_with(prefix))
            || self.source.contains("/loop")
            || self.source == "rootfs"
    }

    /// Server part of a network source: `//server/share` or `server:/export`.
    pub fn server(&self) -> Option<&str> {
        if let Some(rest) = self.source.strip_prefix("//") {
            return rest.split('/').next().filter(|s| !s.is_empty());
        }
        if !self.source.starts_with('/') {
            if let Some((server, _)) = self.source.split_once(':') {
                if !server.is_empty() {
                    return Some(server);
                }
            }
        }
        None
    }
}

/// Parse `/proc/self/mounts` text. Malformed lines are skipped.
pub fn parse_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next().unwrap_or_default();
            Some(MountEntry {
                source: decode_octal_escapes(source),
                mount_point: PathBuf::from(decode_octal_escapes(mount_point)),
                fs_type: fs_type.to_string(),
                options: options.to_string(),
            })
        })
        .collect()
}

/// The kernel writes space, tab, newline and backslash in mount fields as `\ooo`.
fn decode_octal_escapes(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// The mount whose mount point is the longest component-wise prefix of `path`.
/// When the same point is mounted twice the later entry shadows the earlier one.
pub fn find_mount<'a>(mounts: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    let mut best: Option<&MountEntry> = None;
    for entry in mounts.iter().filter(|m| path.starts_with(&m.mount_point)) {
        let depth = entry.mount_point.components().count();
        match best {
            Some(b) if b.mount_point.components().count() > depth => {}
            _ => best = Some(entry),
        }
    }
    best
}
