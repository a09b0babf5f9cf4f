//! azrec-arm: ARM plumbing for the azrec convergence engine.
//!
//! This library provides structured resource identifiers, the minimal
//! [`ArmClient`] capability the convergence handlers depend on, and a
//! reqwest-based implementation that talks to the Azure Resource Manager
//! REST endpoint, including polling of long-running operations.

pub mod client;
pub mod deadline;
pub mod error;
pub mod http;
pub mod id;
pub mod testing;

// Re-export commonly used types
pub use client::{ArmClient, Operation};
pub use deadline::Deadline;
pub use error::{ArmError, Result};
pub use http::HttpArmClient;
pub use id::ResourceId;
