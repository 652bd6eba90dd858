//! Domain Ports - Core trait definitions for the agent
//!
//! These traits define the boundaries between the attach/mount engine and
//! the external programs it drives. Adapters implement these traits to
//! provide concrete functionality.

use crate::domain::assignment::Assignment;
use crate::domain::device::VolumeRecord;
use crate::domain::resource::ResourceSpec;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Command Execution
// =============================================================================

/// Captured result of an external program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the program exited with status 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr, the way a terminal would show them
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// Port for running external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// A non-zero exit is not an error at this level; only failing to
    /// start the program is.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Render a command line for logs and error messages
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

// =============================================================================
// Control Plane Port
// =============================================================================

/// What the control plane knows about a resource definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefinitionState {
    /// The resource definition exists
    pub defined: bool,
    /// Volume 0 is defined for it
    pub volume_zero: bool,
}

impl DefinitionState {
    /// Definition and volume 0 both present
    pub fn is_complete(&self) -> bool {
        self.defined && self.volume_zero
    }
}

/// Port for the replicated storage control plane.
///
/// Every call re-queries authoritative state; implementations keep nothing
/// between calls.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &str;

    /// Look up the resource definition
    async fn definition(&self, resource: &str) -> Result<DefinitionState>;

    /// Create whatever parts of the definition `state` reports missing
    async fn create_definition(&self, spec: &ResourceSpec, state: DefinitionState) -> Result<()>;

    /// Assignment of `resource` to `node`, if any
    async fn assignment(&self, resource: &str, node: &str) -> Result<Option<Assignment>>;

    /// Assign `resource` to `node` from `storage_pool`
    async fn create_assignment(
        &self,
        resource: &str,
        node: &str,
        storage_pool: &str,
        diskless: bool,
    ) -> Result<()>;

    /// Let the control plane pick `spec.auto_place` nodes
    async fn auto_place(&self, spec: &ResourceSpec) -> Result<()>;

    /// Remove the assignment of `resource` from `node`
    async fn delete_assignment(&self, resource: &str, node: &str) -> Result<()>;

    /// Volume inventory, optionally restricted to one resource
    async fn volumes(&self, resource: Option<&str>) -> Result<Vec<VolumeRecord>>;

    /// Ask the control plane to resume stalled or failed actions
    async fn resume_failed_actions(&self) -> Result<()> {
        Ok(())
    }

    /// Make the local replica primary
    async fn promote(&self, _resource: &str) -> Result<()> {
        Ok(())
    }

    /// Make the local replica secondary
    async fn demote(&self, _resource: &str) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CommandRunnerRef = Arc<dyn CommandRunner>;
pub type ControlPlaneRef = Arc<dyn ControlPlane>;
