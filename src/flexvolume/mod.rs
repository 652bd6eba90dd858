//! Kubernetes FlexVolume driver interface
//!
//! The kubelet runs the driver binary once per call with the verb and its
//! arguments on the command line, and reads a single JSON [`Response`] from
//! stdout.

pub mod api;
pub mod options;
pub mod response;

pub use api::FlexVolumeApi;
pub use options::FlexOptions;
pub use response::{Reply, Response, Status};

use clap::Subcommand;
use std::path::PathBuf;

/// Driver calls, named as the kubelet sends them
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum FlexCall {
    /// Report driver capabilities
    #[command(name = "init")]
    Init,

    /// Assign the volume to a node and report its device
    #[command(name = "attach")]
    Attach { options: String, node: String },

    /// Wait for the device of an attached volume
    #[command(name = "waitforattach")]
    WaitForAttach { device: String, options: String },

    /// Check whether the volume is attached to a node
    #[command(name = "isattached")]
    IsAttached { options: String, node: String },

    /// Remove a diskless assignment from a node
    #[command(name = "detach")]
    Detach { volume: String, node: String },

    /// Format if blank and mount at the global mount directory
    #[command(name = "mountdevice")]
    MountDevice {
        target: PathBuf,
        device: String,
        options: String,
    },

    /// Unmount the global mount directory
    #[command(name = "unmountdevice")]
    UnmountDevice { target: PathBuf },

    /// Unmount a directory
    #[command(name = "unmount")]
    Unmount { target: PathBuf },

    /// Name of the volume described by the options
    #[command(name = "getvolumename")]
    GetVolumeName { options: String },
}

impl FlexCall {
    pub fn verb(&self) -> &'static str {
        match self {
            FlexCall::Init => "init",
            FlexCall::Attach { .. } => "attach",
            FlexCall::WaitForAttach { .. } => "waitforattach",
            FlexCall::IsAttached { .. } => "isattached",
            FlexCall::Detach { .. } => "detach",
            FlexCall::MountDevice { .. } => "mountdevice",
            FlexCall::UnmountDevice { .. } => "unmountdevice",
            FlexCall::Unmount { .. } => "unmount",
            FlexCall::GetVolumeName { .. } => "getvolumename",
        }
    }
}
