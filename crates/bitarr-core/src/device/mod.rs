//! Attribution of scan roots to storage devices and hosts.

mod mounts;
mod probe;
mod registry;

pub use mounts::{find_mount, parse_mounts, MountEntry};
pub use probe::{disk_usage, friendly_name, SystemProbe};
pub use registry::{DeviceDescriptor, DeviceRegistry};
