//! Volumes and the device paths derived from them

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default prefix of DRBD block devices
pub const DEFAULT_DEVICE_PREFIX: &str = "/dev/drbd";

/// Volume number used as "the" volume of single-volume resources
pub const PRIMARY_VOLUME: u32 = 0;

/// One volume of a resource as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub resource: String,
    pub volume_number: u32,
    /// Kernel minor, if one has been allocated yet
    pub minor: Option<u32>,
}

/// Minor of the primary volume of `resource` within `volumes`
pub fn primary_minor(volumes: &[VolumeRecord], resource: &str) -> Option<u32> {
    volumes
        .iter()
        .filter(|v| v.resource == resource && v.volume_number == PRIMARY_VOLUME)
        .find_map(|v| v.minor)
}

/// Owner of the volume with `minor`, if any
pub fn resource_for_minor(volumes: &[VolumeRecord], minor: u32) -> Option<String> {
    volumes
        .iter()
        .find(|v| v.minor == Some(minor))
        .map(|v| v.resource.clone())
}

/// `/dev/drbd` + `130` -> `/dev/drbd130`
pub fn compose_device_path(prefix: &str, minor: u32) -> String {
    format!("{}{}", prefix, minor)
}

/// Inverse of [`compose_device_path`]
pub fn extract_minor(prefix: &str, device: &str) -> Result<u32> {
    let unsupported = || Error::UnsupportedDeviceNaming {
        device: device.to_string(),
        prefix: prefix.to_string(),
    };

    let digits = device.strip_prefix(prefix).ok_or_else(unsupported)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unsupported());
    }
    digits.parse().map_err(|_| unsupported())
}
