//! azrec-engine: convergence handlers for declaratively managed Azure
//! resources.
//!
//! Each handler keeps one kind of remote object in line with its declared
//! configuration: it builds and parses identifiers, checks existence,
//! submits writes through the [`azrec_arm::ArmClient`] capability, and
//! reports observed state back with spurious differences suppressed.

pub mod attrs;
pub mod drift;
pub mod handler;
pub mod registry;
pub mod resources;

// Re-export commonly used types
pub use attrs::Attrs;
pub use handler::{OperationTimeouts, ResourceHandler};
pub use registry::{HandlerRegistry, ProviderConfig};
