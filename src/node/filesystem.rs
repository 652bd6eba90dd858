//! Filesystem probing and creation
//!
//! A device is only ever formatted when it carries no filesystem at all.
//! A different existing filesystem is reported, never overwritten.

use crate::config::FilesystemConfig;
use crate::domain::ports::{command_line, CommandRunnerRef};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const FS_TYPE_KEY: &str = "ID_FS_TYPE";

/// How to create a filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOptions {
    pub fs_type: String,
    /// Block size in bytes, 0 for the mkfs default
    pub block_size: u64,
    pub force: bool,
    /// XFS data stripe unit, digits with an optional k, m or g suffix
    pub xfs_data_su: Option<String>,
    /// XFS data stripe width
    pub xfs_data_sw: u32,
    /// XFS external log device
    pub xfs_log_dev: Option<String>,
}

impl FormatOptions {
    pub fn new(fs_type: impl Into<String>) -> Self {
        Self {
            fs_type: fs_type.into(),
            ..Default::default()
        }
    }

    fn is_xfs(&self) -> bool {
        self.fs_type == "xfs"
    }

    fn is_ext(&self) -> bool {
        matches!(self.fs_type.as_str(), "ext2" | "ext3" | "ext4")
    }

    fn log_dev(&self) -> Option<&str> {
        self.xfs_log_dev.as_deref().filter(|d| !d.is_empty())
    }
}

fn valid_stripe_unit(su: &str) -> bool {
    let digits = su.strip_suffix(|c: char| matches!(c, 'k' | 'm' | 'g')).unwrap_or(su);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Arguments for `mkfs -t <type>` ahead of the device
pub fn build_mkfs_args(opts: &FormatOptions) -> Result<Vec<String>> {
    let mut args = Vec::new();

    if opts.force {
        if opts.is_xfs() {
            args.push("-f".to_string());
        } else if opts.is_ext() {
            args.push("-F".to_string());
        }
    }

    if opts.block_size != 0 {
        args.push("-b".to_string());
        if opts.is_xfs() {
            args.push(format!("size={}", opts.block_size));
        } else {
            args.push(opts.block_size.to_string());
        }
    }

    if opts.is_xfs() {
        if let Some(su) = opts.xfs_data_su.as_deref().filter(|s| !s.is_empty()) {
            if !valid_stripe_unit(su) {
                return Err(Error::InvalidFormatOption(format!(
                    "su must be a number optionally followed by k, m or g, got {:?}",
                    su
                )));
            }
            args.push("-d".to_string());
            args.push(format!("su={}", su));
        }

        if opts.xfs_data_sw != 0 {
            args.push("-d".to_string());
            args.push(format!("sw={}", opts.xfs_data_sw));
        }

        if let Some(log_dev) = opts.log_dev() {
            args.push("-l".to_string());
            args.push(format!("logdev={}", log_dev));
        }
    }

    Ok(args)
}

/// Filesystem type from `blkid -o udev` output, empty when there is none
pub fn parse_blkid(device: &str, output: &str) -> Result<String> {
    let mut attrs = HashMap::new();
    for pair in output.split_whitespace() {
        let (key, value) = pair.split_once('=').ok_or_else(|| Error::FilesystemProbe {
            device: device.to_string(),
            reason: format!("unparsable blkid output {:?}", output.trim()),
        })?;
        attrs.insert(key, value);
    }

    if attrs.is_empty() {
        return Ok(String::new());
    }

    attrs
        .get(FS_TYPE_KEY)
        .map(|fs| fs.to_string())
        .ok_or_else(|| Error::FilesystemProbe {
            device: device.to_string(),
            reason: format!("no {} in blkid output", FS_TYPE_KEY),
        })
}

/// Refuses to format over existing data
pub struct FilesystemGuard {
    runner: CommandRunnerRef,
    config: FilesystemConfig,
}

impl FilesystemGuard {
    pub fn new(runner: CommandRunnerRef, config: FilesystemConfig) -> Self {
        Self { runner, config }
    }

    /// Filesystem on `device`, empty when unformatted
    pub async fn detect_filesystem(&self, device: &str) -> Result<String> {
        let args = vec!["-o".to_string(), "udev".to_string(), device.to_string()];
        // blkid exits non-zero without printing anything on a blank device
        let output = self.runner.run(&self.config.blkid_binary, &args).await?;
        parse_blkid(device, &output.combined())
    }

    /// Make sure `device` carries the filesystem `opts` asks for
    pub async fn ensure_filesystem(&self, device: &str, opts: &FormatOptions) -> Result<()> {
        let existing = self.detect_filesystem(device).await?;

        if existing == opts.fs_type {
            debug!("{} already formatted with {}", device, existing);
            return Ok(());
        }

        if !existing.is_empty() {
            return Err(Error::FilesystemConflict {
                device: device.to_string(),
                existing,
                requested: opts.fs_type.clone(),
            });
        }

        if let Some(log_dev) = opts.log_dev() {
            if tokio::fs::metadata(Path::new(log_dev)).await.is_err() {
                return Err(Error::LogDeviceNotFound {
                    device: log_dev.to_string(),
                });
            }
        }

        let mut args = vec!["-t".to_string(), opts.fs_type.clone()];
        args.extend(build_mkfs_args(opts)?);
        args.push(device.to_string());

        info!("Creating {} filesystem on {}", opts.fs_type, device);
        let output = self.runner.run(&self.config.mkfs_binary, &args).await?;
        if !output.success() {
            return Err(Error::HostCommand {
                command: command_line(&self.config.mkfs_binary, &args),
                output: output.combined(),
            });
        }

        Ok(())
    }
}
