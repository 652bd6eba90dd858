//! Domain layer - Core types and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles.

pub mod assignment;
pub mod device;
pub mod ports;
pub mod resource;

pub use assignment::*;
pub use device::*;
pub use ports::*;
pub use resource::*;
