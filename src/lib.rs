//! LINSTOR FlexVolume - DRBD volumes for the kubelet
//!
//! A FlexVolume driver that attaches replicated DRBD resources to Kubernetes
//! nodes, creates their filesystems and mounts them. The storage control
//! plane is driven through its command line client, LINSTOR on current
//! stacks or drbdmanage on legacy ones.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                    kubelet  (driver <verb> <args...>)                        │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                        FlexVolume API  (JSON reply)                          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────┐  ┌─────────────────────┐   │
//! │  │             Mount Orchestrator              │  │      Deployer       │   │
//! │  │  attach / mount / unmount / detach          │  │  define + place     │   │
//! │  └──────┬──────────────┬──────────────┬────────┘  └──────────┬──────────┘   │
//! │         │              │              │                      │              │
//! │  ┌──────┴──────┐ ┌─────┴──────┐ ┌─────┴───────┐              │              │
//! │  │ Assignment  │ │ Device     │ │ Filesystem  │              │              │
//! │  │ Convergence │ │ Resolver   │ │ Guard       │              │              │
//! │  └──────┬──────┘ └─────┬──────┘ └─────┬───────┘              │              │
//! ├─────────┴──────────────┴──────────────┼──────────────────────┴──────────────┤
//! │             Control Plane port        │       Command Runner port            │
//! │  ┌─────────────────┐ ┌──────────────┐ │  ┌──────────────────────────────┐   │
//! │  │    LINSTOR      │ │  drbdmanage  │ │  │ blkid / mkfs / mount / umount│   │
//! │  │  (JSON output)  │ │ (CSV output) │ │  │ findmnt / drbdadm            │   │
//! │  └─────────────────┘ └──────────────┘ │  └──────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Agent configuration file and defaults
//! - [`controlplane`]: Control plane adapters, convergence and deployment
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling
//! - [`flexvolume`]: Kubelet call protocol
//! - [`node`]: Device resolution, filesystems and mounts on this host

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod flexvolume;
pub mod node;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{AgentConfig, BackendKind, RetryConfig};

pub use controlplane::{
    AssignmentConvergence, BackendFactory, Deployer, DrbdmanageBackend, LinstorBackend,
    SystemRunner,
};

pub use domain::{
    Assignment, CommandOutput, CommandRunner, ControlPlane, DefinitionState, ResourceSpec,
    StateFlag, StateFlags, VolumeRecord,
};

pub use error::{Error, ErrorAction, Result, Step};

pub use flexvolume::{FlexCall, FlexOptions, FlexVolumeApi, Reply, Response, Status};

pub use node::{DevicePathResolver, FilesystemGuard, FormatOptions, MountOrchestrator, MountRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
