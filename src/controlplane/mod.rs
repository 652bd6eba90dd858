//! Control Plane Module
//!
//! Everything that talks to the replicated storage control plane: the CLI
//! adapters, the process runner they share with the node utilities, and the
//! convergence loops built on top of them.

pub mod backends;
pub mod convergence;
pub mod deployer;
pub mod runner;

pub use backends::*;
pub use convergence::*;
pub use deployer::*;
pub use runner::*;
