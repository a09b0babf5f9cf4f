//! The capability the convergence handlers depend on.

use async_trait::async_trait;
use serde_json::Value;

use crate::deadline::Deadline;
use crate::error::Result;

/// Handle for an accepted asynchronous service operation.
///
/// `poll_url` is absent when the service completed the write synchronously;
/// awaiting such an operation returns immediately.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Path the operation was submitted against.
    pub resource_path: String,
    /// Status endpoint to poll until the operation reaches a terminal state.
    pub poll_url: Option<String>,
}

impl Operation {
    /// An operation that already completed synchronously.
    pub fn completed(resource_path: impl Into<String>) -> Self {
        Self {
            resource_path: resource_path.into(),
            poll_url: None,
        }
    }
}

/// Minimal ARM surface consumed by the handlers.
///
/// Paths are either management-plane paths (`/subscriptions/...`) resolved
/// against the configured endpoint, or absolute data-plane URLs
/// (`https://myvault.vault.azure.net/secrets/...`) used as-is.
///
/// Not-found is a value, not an error: `get` yields `Ok(None)` and `list`
/// yields `Ok(None)` when the listed parent itself is absent, so callers can
/// treat absence as a terminal, non-error outcome.
#[async_trait]
pub trait ArmClient: Send + Sync {
    /// Fetch the current representation of one object.
    async fn get(&self, path: &str, deadline: Deadline) -> Result<Option<Value>>;

    /// List the children of `path`, bounded to a single page of `page_size`
    /// entries when given. Entries beyond that page are not fetched.
    async fn list(
        &self,
        path: &str,
        page_size: Option<u32>,
        deadline: Deadline,
    ) -> Result<Option<Vec<Value>>>;

    /// Submit a create-or-update write.
    async fn create_or_update(
        &self,
        path: &str,
        body: &Value,
        deadline: Deadline,
    ) -> Result<Operation>;

    /// Submit a delete. Deleting an absent object completes successfully.
    async fn delete(&self, path: &str, deadline: Deadline) -> Result<Operation>;

    /// Block until the operation reaches a terminal state, the deadline
    /// passes, or the enclosing future is dropped.
    async fn await_completion(&self, op: &Operation, deadline: Deadline) -> Result<()>;
}
