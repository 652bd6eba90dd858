//! Device path resolution
//!
//! Maps a resource to the block device of its volume 0 and back. Paths are
//! derived from the minor the control plane reports on every call.

use crate::config::RetryConfig;
use crate::domain::device::{compose_device_path, extract_minor, primary_minor, resource_for_minor};
use crate::domain::ports::ControlPlaneRef;
use crate::error::{Error, Result};
use std::io::ErrorKind;
use tracing::{debug, info};

/// Resolves device paths through the control plane's volume inventory
pub struct DevicePathResolver {
    control_plane: ControlPlaneRef,
    prefix: String,
    retry: RetryConfig,
}

impl DevicePathResolver {
    pub fn new(control_plane: ControlPlaneRef, prefix: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            control_plane,
            prefix: prefix.into(),
            retry,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Device path of volume 0 of `resource`.
    ///
    /// `None` while no minor is known. With `verify`, a path that does not
    /// exist on this host yet is `DeviceNotFound`.
    pub async fn resolve_device_path(&self, resource: &str, verify: bool) -> Result<Option<String>> {
        let volumes = self.control_plane.volumes(Some(resource)).await?;
        let Some(minor) = primary_minor(&volumes, resource) else {
            debug!("No minor known for {}", resource);
            return Ok(None);
        };

        let path = compose_device_path(&self.prefix, minor);
        if verify {
            match tokio::fs::symlink_metadata(&path).await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(Error::DeviceNotFound { device: path });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Some(path))
    }

    /// Poll until the device of `resource` exists on this host
    pub async fn wait_for_device_path(&self, resource: &str, attempts: u32) -> Result<String> {
        let mut reason = String::from("no minor allocated");

        for attempt in 1..=attempts {
            match self.resolve_device_path(resource, true).await {
                Ok(Some(path)) => {
                    info!("Resource {} available at {}", resource, path);
                    return Ok(path);
                }
                Ok(None) => reason = "no minor allocated".to_string(),
                Err(e @ Error::DeviceNotFound { .. }) => reason = e.to_string(),
                Err(e) => return Err(e),
            }

            debug!("Attempt {}: device of {} not ready: {}", attempt, resource, reason);
            if attempt < attempts && !self.retry.interval().is_zero() {
                tokio::time::sleep(self.retry.interval()).await;
            }
        }

        Err(Error::DevicePathUnavailable {
            resource: resource.to_string(),
            attempts,
            reason,
        })
    }

    /// Resource owning `device`, if the control plane knows one
    pub async fn resolve_resource_from_device(&self, device: &str) -> Result<Option<String>> {
        let minor = extract_minor(&self.prefix, device)?;
        let volumes = self.control_plane.volumes(None).await?;
        Ok(resource_for_minor(&volumes, minor))
    }
}
