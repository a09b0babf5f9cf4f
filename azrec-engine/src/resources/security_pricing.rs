//! Security Center subscription pricing handler.
//!
//! A subscription-scoped singleton per protected resource type: it always
//! exists and cannot be deleted, so create and update are the same write and
//! delete is a no-op. All this resource does is flip the pricing tier.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use azrec_arm::{ArmClient, ArmError, Deadline, ResourceId, Result};

use crate::attrs::Attrs;
use crate::handler::{OperationTimeouts, ResourceHandler};
use crate::registry::ProviderConfig;
use crate::resources::require_str;

const API_VERSION: &str = "2018-06-01";

const VALID_TIERS: &[&str] = &["Free", "Standard"];

const RESOURCE_TYPES: &[&str] = &[
    "AppServices",
    "ContainerRegistry",
    "KeyVaults",
    "KubernetesService",
    "SqlServers",
    "SqlServerVirtualMachines",
    "StorageAccounts",
    "VirtualMachines",
    "Arm",
    "Dns",
];

const DEFAULT_RESOURCE_TYPE: &str = "VirtualMachines";

/// Identifier of a pricing singleton; subscription-scoped, no resource group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingId {
    pub subscription_id: String,
    pub resource_type: String,
}

impl PricingId {
    pub fn parse(raw: &str) -> Result<Self> {
        let id = ResourceId::parse(raw)?;
        Ok(Self {
            subscription_id: id.subscription_id().to_string(),
            resource_type: id.require("pricings")?.to_string(),
        })
    }

    fn arm_id(&self) -> ResourceId {
        ResourceId::subscription(&self.subscription_id)
            .provider("Microsoft.Security")
            .child("pricings", &self.resource_type)
    }

    fn path(&self) -> String {
        format!("{}?api-version={API_VERSION}", self.arm_id())
    }
}

impl fmt::Display for PricingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.arm_id().fmt(f)
    }
}

/// Converges the Security Center pricing tier of one resource type.
pub struct SecurityPricingHandler {
    client: Arc<dyn ArmClient>,
    config: ProviderConfig,
}

impl SecurityPricingHandler {
    pub fn new(client: Arc<dyn ArmClient>, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    fn id_from(&self, desired: &Attrs) -> Result<PricingId> {
        let resource_type = desired
            .str("resource_type")
            .unwrap_or(DEFAULT_RESOURCE_TYPE);
        if !RESOURCE_TYPES.contains(&resource_type) {
            return Err(ArmError::transient(
                "expand",
                resource_type,
                "unknown security pricing resource type",
            ));
        }
        Ok(PricingId {
            subscription_id: self.config.subscription_id.clone(),
            resource_type: resource_type.to_string(),
        })
    }

    /// Write the tier and re-read the service-assigned identifier.
    async fn submit(&self, id: &PricingId, desired: &Attrs, deadline: Deadline) -> Result<String> {
        let tier = require_str(desired, "tier")?;
        if !VALID_TIERS.contains(&tier) {
            return Err(ArmError::transient(
                "expand",
                tier,
                "pricing tier must be Free or Standard",
            ));
        }

        let body = json!({ "properties": { "pricingTier": tier } });
        let path = id.path();
        let op = self.client.create_or_update(&path, &body, deadline).await?;
        self.client.await_completion(&op, deadline).await?;

        let read = self
            .client
            .get(&path, deadline)
            .await?
            .ok_or_else(|| ArmError::PostCreateRead { id: id.to_string() })?;
        let assigned = read
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ArmError::PostCreateRead { id: id.to_string() })?;
        Ok(assigned.to_string())
    }
}

#[async_trait]
impl ResourceHandler for SecurityPricingHandler {
    fn kind(&self) -> &'static str {
        "security_center_subscription_pricing"
    }

    fn timeouts(&self) -> OperationTimeouts {
        OperationTimeouts {
            create: std::time::Duration::from_secs(60 * 60),
            update: std::time::Duration::from_secs(60 * 60),
            delete: std::time::Duration::from_secs(60 * 60),
            ..OperationTimeouts::default()
        }
    }

    async fn create(&self, desired: &Attrs, deadline: Deadline) -> Result<String> {
        // No import check: the pricing singleton always exists, creating it
        // only flips the tier.
        let id = self.id_from(desired)?;
        info!(id = %id, "setting security center pricing tier");
        self.submit(&id, desired, deadline).await
    }

    async fn read(&self, id: &str, deadline: Deadline) -> Result<Option<Attrs>> {
        let pricing_id = PricingId::parse(id)?;
        let Some(payload) = self.client.get(&pricing_id.path(), deadline).await? else {
            debug!(id, "pricing not found, clearing state");
            return Ok(None);
        };

        let mut attrs = Attrs::new();
        attrs.set("resource_type", pricing_id.resource_type.clone());
        if let Some(tier) = payload
            .pointer("/properties/pricingTier")
            .and_then(Value::as_str)
        {
            attrs.set("tier", tier);
        }
        Ok(Some(attrs))
    }

    async fn update(
        &self,
        id: &str,
        desired: &Attrs,
        _prior: &Attrs,
        deadline: Deadline,
    ) -> Result<Option<String>> {
        PricingId::parse(id)?;
        // The declared resource type addresses the singleton; a change moves
        // this resource to a different pricing object.
        let target = self.id_from(desired)?;
        let assigned = self.submit(&target, desired, deadline).await?;
        Ok(Some(assigned))
    }

    async fn delete(&self, id: &str, _deadline: Deadline) -> Result<()> {
        // Cannot be deleted.
        debug!(id, "security center pricing delete is a no-op");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscription_scoped_id() {
        let id = PricingId::parse(
            "/subscriptions/sub-1/providers/Microsoft.Security/pricings/VirtualMachines",
        )
        .unwrap();
        assert_eq!(id.resource_type, "VirtualMachines");
        assert_eq!(
            id.to_string(),
            "/subscriptions/sub-1/providers/Microsoft.Security/pricings/VirtualMachines"
        );
    }

    #[test]
    fn rejects_id_without_pricings_segment() {
        let err = PricingId::parse("/subscriptions/sub-1/providers/Microsoft.Security")
            .unwrap_err();
        assert!(err.to_string().contains("pricings"));
    }
}
