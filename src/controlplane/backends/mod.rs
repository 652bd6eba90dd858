//! Control Plane Backend Adapters
//!
//! Provides adapters for the supported control plane CLIs:
//! - LINSTOR: current stacks, JSON output
//! - drbdmanage: legacy stacks, CSV output

pub mod drbdmanage;
pub mod linstor;

pub use drbdmanage::DrbdmanageBackend;
pub use linstor::LinstorBackend;

use crate::config::{AgentConfig, BackendKind};
use crate::domain::ports::{CommandRunnerRef, ControlPlaneRef};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Factory for creating control plane adapters
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend adapter by name
    pub fn create(name: &str, config: &AgentConfig, runner: CommandRunnerRef) -> Result<ControlPlaneRef> {
        match name.to_lowercase().as_str() {
            "linstor" => Ok(Self::for_kind(BackendKind::Linstor, config, runner)),
            "drbdmanage" | "drbd" => Ok(Self::for_kind(BackendKind::Drbdmanage, config, runner)),
            _ => Err(Error::Configuration(format!("unknown backend {}", name))),
        }
    }

    /// Create the backend a configuration selects
    pub fn for_kind(kind: BackendKind, config: &AgentConfig, runner: CommandRunnerRef) -> ControlPlaneRef {
        match kind {
            BackendKind::Linstor => Arc::new(LinstorBackend::new(config.linstor.clone(), runner)),
            BackendKind::Drbdmanage => {
                Arc::new(DrbdmanageBackend::new(config.drbdmanage.clone(), runner))
            }
        }
    }

    /// Create the configured backend
    pub fn from_config(config: &AgentConfig, runner: CommandRunnerRef) -> ControlPlaneRef {
        Self::for_kind(config.backend, config, runner)
    }
}
