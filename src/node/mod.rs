//! Node-side operations
//!
//! Works on the local host once the control plane has placed a resource:
//! device lookup, filesystem creation and mounting.

pub mod filesystem;
pub mod mount;
pub mod resolver;

pub use filesystem::{FilesystemGuard, FormatOptions};
pub use mount::{MountOrchestrator, MountRequest};
pub use resolver::DevicePathResolver;
