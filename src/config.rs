//! Agent configuration
//!
//! Loaded from an optional YAML file; command line flags and environment
//! variables override individual fields in `main.rs`.

use crate::domain::device::DEFAULT_DEVICE_PREFIX;
use crate::domain::resource::{DEFAULT_DISKLESS_STORAGE_POOL, DEFAULT_STORAGE_POOL};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Configuration file read when none is given explicitly
pub const DEFAULT_CONFIG_PATH: &str = "/etc/linstor-flexvolume/config.yaml";

// =============================================================================
// Backend Selection
// =============================================================================

/// Which control plane CLI to drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// LINSTOR (`linstor -m`, JSON output)
    #[default]
    Linstor,
    /// drbdmanage (`--machine-readable`, CSV output)
    Drbdmanage,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Linstor => write!(f, "linstor"),
            BackendKind::Drbdmanage => write!(f, "drbdmanage"),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Configuration for the LINSTOR client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinstorConfig {
    pub binary: String,
    /// Comma separated controller list passed as `--controllers`
    pub controllers: Option<String>,
    pub storage_pool: String,
    pub diskless_storage_pool: String,
}

impl Default for LinstorConfig {
    fn default() -> Self {
        Self {
            binary: "linstor".to_string(),
            controllers: None,
            storage_pool: DEFAULT_STORAGE_POOL.to_string(),
            diskless_storage_pool: DEFAULT_DISKLESS_STORAGE_POOL.to_string(),
        }
    }
}

/// Configuration for the drbdmanage client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrbdmanageConfig {
    pub binary: String,
    pub drbdadm_binary: String,
    /// Promote the resource after attaching (DRBD 8 has no auto-promote)
    pub promote: bool,
    /// Pause before promoting so the disk state can establish
    pub promotion_delay_ms: u64,
}

impl Default for DrbdmanageConfig {
    fn default() -> Self {
        Self {
            binary: "drbdmanage".to_string(),
            drbdadm_binary: "drbdadm".to_string(),
            promote: false,
            promotion_delay_ms: 200,
        }
    }
}

impl DrbdmanageConfig {
    pub fn promotion_delay(&self) -> Duration {
        Duration::from_millis(self.promotion_delay_ms)
    }
}

/// Retry budgets of the polling loops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub assign_attempts: u32,
    pub unassign_attempts: u32,
    pub device_path_attempts: u32,
    /// Pause between attempts
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            assign_attempts: 5,
            unassign_attempts: 3,
            device_path_attempts: 4,
            interval_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Budgets with no pause between attempts
    pub fn immediate() -> Self {
        Self {
            interval_ms: 0,
            ..Self::default()
        }
    }
}

/// Block device naming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub path_prefix: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path_prefix: DEFAULT_DEVICE_PREFIX.to_string(),
        }
    }
}

/// Filesystem probing and creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Used when the caller does not name a filesystem
    pub default_fs_type: String,
    pub blkid_binary: String,
    pub mkfs_binary: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            default_fs_type: "ext4".to_string(),
            blkid_binary: "blkid".to_string(),
            mkfs_binary: "mkfs".to_string(),
        }
    }
}

/// Mount handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Used when the caller gives no mount options
    pub default_options: String,
    pub mount_binary: String,
    pub umount_binary: String,
    pub findmnt_binary: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            default_options: "defaults".to_string(),
            mount_binary: "mount".to_string(),
            umount_binary: "umount".to_string(),
            findmnt_binary: "findmnt".to_string(),
        }
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Complete agent configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub backend: BackendKind,
    /// Name of this node in the control plane; derived from the host if unset
    pub node_name: Option<String>,
    pub linstor: LinstorConfig,
    pub drbdmanage: DrbdmanageConfig,
    pub retry: RetryConfig,
    pub device: DeviceConfig,
    pub filesystem: FilesystemConfig,
    pub mount: MountConfig,
}

impl AgentConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration.
    ///
    /// An explicitly given file must exist. Without one, the default path is
    /// read if present and built-in defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        if !path.exists() {
            if required {
                return Err(Error::Configuration(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            debug!("No configuration file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml(&contents)
    }

    /// Name of the local node in the control plane
    pub fn local_node(&self) -> Result<String> {
        if let Some(name) = self.node_name.as_deref().filter(|n| !n.is_empty()) {
            return Ok(name.to_string());
        }
        get_hostname()
    }
}

/// Get the system hostname
fn get_hostname() -> Result<String> {
    // Try /etc/hostname first
    if let Ok(hostname) = fs::read_to_string("/etc/hostname") {
        let hostname = hostname.trim();
        if !hostname.is_empty() {
            return Ok(hostname.to_string());
        }
    }

    // Fall back to hostname command
    #[cfg(unix)]
    {
        use std::process::Command;
        if let Ok(output) = Command::new("hostname").output() {
            if output.status.success() {
                let hostname = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !hostname.is_empty() {
                    return Ok(hostname);
                }
            }
        }
    }

    Err(Error::Configuration(
        "unable to determine node name, set NODE_NAME".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = AgentConfig::default();

        assert_eq!(config.backend, BackendKind::Linstor);
        assert_eq!(config.retry.assign_attempts, 5);
        assert_eq!(config.retry.unassign_attempts, 3);
        assert_eq!(config.retry.device_path_attempts, 4);
        assert_eq!(config.retry.interval(), Duration::from_secs(2));
        assert_eq!(config.drbdmanage.promotion_delay(), Duration::from_millis(200));
        assert_eq!(config.device.path_prefix, "/dev/drbd");
        assert_eq!(config.mount.default_options, "defaults");
        assert_eq!(config.filesystem.default_fs_type, "ext4");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AgentConfig::from_yaml(
            "backend: drbdmanage\n\
             node_name: kubelet-a\n\
             retry:\n  assign_attempts: 10\n\
             linstor:\n  controllers: 10.0.0.1:3370\n",
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Drbdmanage);
        assert_eq!(config.local_node().unwrap(), "kubelet-a");
        assert_eq!(config.retry.assign_attempts, 10);
        assert_eq!(config.retry.interval_ms, 2000);
        assert_eq!(config.linstor.controllers.as_deref(), Some("10.0.0.1:3370"));
        assert_eq!(config.linstor.binary, "linstor");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device:\n  path_prefix: /dev/drbd_").unwrap();

        let config = AgentConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.device.path_prefix, "/dev/drbd_");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");

        assert_matches!(
            AgentConfig::load(Some(&missing)),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_malformed_yaml() {
        assert_matches!(
            AgentConfig::from_yaml("retry: [1, 2"),
            Err(Error::YamlParse(_))
        );
    }
}
