//! Error types for the FlexVolume agent
//!
//! Provides structured error types for every engine component: the
//! control-plane clients, assignment convergence, device resolution,
//! filesystem handling and mount orchestration.

use std::fmt;
use thiserror::Error;

/// Unified error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Control Plane Errors
    // =========================================================================
    #[error("Unexpected output from '{command}': {reason}")]
    ControlPlaneParse { command: String, reason: String },

    #[error("Control plane command '{command}' failed: {output}")]
    ControlPlaneCommand { command: String, output: String },

    #[error("Resource {resource} is not defined in the control plane")]
    ResourceNotDefined { resource: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Convergence Errors
    // =========================================================================
    #[error("Resource {resource} not settled on node {node} after {attempts} attempts")]
    AssignmentTimeout {
        resource: String,
        node: String,
        attempts: u32,
    },

    #[error("Resource {resource} still assigned to node {node} after {attempts} attempts")]
    UnassignmentTimeout {
        resource: String,
        node: String,
        attempts: u32,
    },

    // =========================================================================
    // Device Errors
    // =========================================================================
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("No device path for resource {resource} after {attempts} attempts: {reason}")]
    DevicePathUnavailable {
        resource: String,
        attempts: u32,
        reason: String,
    },

    #[error("Device {device} does not follow the {prefix}<minor> naming")]
    UnsupportedDeviceNaming { device: String, prefix: String },

    // =========================================================================
    // Filesystem Errors
    // =========================================================================
    #[error("Unable to probe filesystem on {device}: {reason}")]
    FilesystemProbe { device: String, reason: String },

    #[error("Device {device} already formatted with {existing}, refusing to overwrite with {requested}")]
    FilesystemConflict {
        device: String,
        existing: String,
        requested: String,
    },

    #[error("Invalid format option: {0}")]
    InvalidFormatOption(String),

    #[error("External log device not found: {device}")]
    LogDeviceNotFound { device: String },

    // =========================================================================
    // Host Command Errors
    // =========================================================================
    #[error("Command '{command}' failed: {output}")]
    HostCommand { command: String, output: String },

    #[error("Unable to execute '{command}': {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Mountpoint {target} is busy with {existing}")]
    MountpointBusy { target: String, existing: String },

    // =========================================================================
    // Orchestration Errors
    // =========================================================================
    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Orchestration step an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Assign,
    Promote,
    ResolveDevice,
    EnsureFilesystem,
    CreateTarget,
    Mount,
    Unmount,
    ResolveResource,
    Unassign,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Assign => "assign",
            Step::Promote => "promote",
            Step::ResolveDevice => "resolve-device",
            Step::EnsureFilesystem => "ensure-filesystem",
            Step::CreateTarget => "create-target",
            Step::Mount => "mount",
            Step::Unmount => "unmount",
            Step::ResolveResource => "resolve-resource",
            Step::Unassign => "unassign",
        };
        f.write_str(name)
    }
}

/// What the caller should do about a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// The whole operation may succeed if retried from scratch
    RetryCall,
    /// Environment or data problem, retrying will not help
    Abort,
    /// The call itself was malformed
    RejectCall,
}

impl Error {
    /// Wrap this error with the orchestration step it came from
    pub fn at(self, step: Step) -> Self {
        Error::Step {
            step,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping step wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self.root() {
            // Convergence or device lag - the control plane may catch up
            Error::AssignmentTimeout { .. }
            | Error::UnassignmentTimeout { .. }
            | Error::DevicePathUnavailable { .. }
            | Error::DeviceNotFound { .. }
            | Error::ControlPlaneCommand { .. }
            | Error::CommandSpawn { .. }
            | Error::HostCommand { .. }
            | Error::Io(_) => ErrorAction::RetryCall,

            // Caller errors
            Error::ApiValidation(_) | Error::InvalidFormatOption(_) | Error::JsonParse(_) => {
                ErrorAction::RejectCall
            }

            // Data protection, configuration and version mismatches
            _ => ErrorAction::Abort,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.action(), ErrorAction::RetryCall)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            Error::AssignmentTimeout { .. }
                | Error::UnassignmentTimeout { .. }
                | Error::DevicePathUnavailable { .. }
                | Error::DeviceNotFound { .. }
        )
    }
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, Error>;
