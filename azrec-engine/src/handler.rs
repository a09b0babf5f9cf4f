//! The convergence handler seam.
//!
//! One implementation per resource kind, constructed with its client
//! capability injected; the orchestration layer drives the lifecycle through
//! this trait and owns retry policy and state tracking.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use azrec_arm::{ArmError, Deadline, Result};

use crate::attrs::Attrs;

/// Wall-clock budgets per operation kind.
///
/// Writes (and the long-running operations behind them) get tens of minutes;
/// reads stay short.
#[derive(Debug, Clone, Copy)]
pub struct OperationTimeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(30 * 60),
        }
    }
}

/// Lifecycle operations for one resource kind.
///
/// Handlers are stateless and safe to share across concurrent invocations
/// for different resource instances; each call operates on exactly one
/// identifier.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Stable type name used for registry lookup and manifests.
    fn kind(&self) -> &'static str;

    fn timeouts(&self) -> OperationTimeouts {
        OperationTimeouts::default()
    }

    /// Converge a new resource and return the identifier to track.
    async fn create(&self, desired: &Attrs, deadline: Deadline) -> Result<String>;

    /// Observed state for an identifier. `Ok(None)` means the resource or
    /// its parent container no longer exists and the caller should clear its
    /// tracked identifier.
    async fn read(&self, id: &str, deadline: Deadline) -> Result<Option<Attrs>>;

    /// Converge an existing resource. `Ok(Some(id))` is the identifier to
    /// track from now on, a fresh one exactly when a field forced a new
    /// underlying object. `Ok(None)` means the parent container is gone and
    /// the caller should clear its tracked identifier.
    ///
    /// `prior` is the previously applied declared state, used to tell which
    /// fields actually changed for write-only values the service never
    /// reports back.
    async fn update(
        &self,
        id: &str,
        desired: &Attrs,
        prior: &Attrs,
        deadline: Deadline,
    ) -> Result<Option<String>>;

    /// Remove the resource. Deleting an already absent or logically disabled
    /// object succeeds without a remote write.
    async fn delete(&self, id: &str, deadline: Deadline) -> Result<()>;

    /// Populate declared state from an externally supplied identifier.
    /// Fails when the identifier cannot be parsed or resolves to nothing.
    async fn import(&self, id: &str, deadline: Deadline) -> Result<Attrs> {
        match self.read(id, deadline).await? {
            Some(attrs) => Ok(attrs),
            None => Err(ArmError::transient(
                "import",
                id,
                "resource does not exist",
            )),
        }
    }

    /// Whether an observed difference on `field` should be ignored when
    /// comparing declared against observed state. Pure; evaluated once per
    /// field per comparison.
    fn suppress_diff(
        &self,
        _field: &str,
        _declared: &Value,
        _observed: &Value,
        _desired: &Attrs,
    ) -> bool {
        false
    }
}
