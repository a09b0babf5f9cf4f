//! Network Watcher flow log handler.
//!
//! Flow logs are children of a network watcher and converge through a
//! long-running create-or-update. A disabled flow log reports placeholder
//! retention values and an empty storage id, so the read path is careful not
//! to register those as drift.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use azrec_arm::{ArmClient, ArmError, Deadline, ResourceId, Result};

use crate::attrs::Attrs;
use crate::drift;
use crate::handler::ResourceHandler;
use crate::registry::ProviderConfig;
use crate::resources::require_str;

const API_VERSION: &str = "2019-11-01";

/// Identifier of a flow log under its network watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowLogId {
    pub subscription_id: String,
    pub resource_group: String,
    pub watcher: String,
    pub name: String,
}

impl FlowLogId {
    pub fn parse(raw: &str) -> Result<Self> {
        let id = ResourceId::parse(raw)?;
        Ok(Self {
            subscription_id: id.subscription_id().to_string(),
            resource_group: id.require_group()?.to_string(),
            watcher: id.require("networkWatchers")?.to_string(),
            name: id.require("flowLogs")?.to_string(),
        })
    }

    fn watcher_id(&self) -> ResourceId {
        ResourceId::subscription(&self.subscription_id)
            .resource_group(&self.resource_group)
            .provider("Microsoft.Network")
            .child("networkWatchers", &self.watcher)
    }

    fn arm_id(&self) -> ResourceId {
        self.watcher_id().child("flowLogs", &self.name)
    }

    fn path(&self) -> String {
        format!("{}?api-version={API_VERSION}", self.arm_id())
    }
}

impl fmt::Display for FlowLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.arm_id().fmt(f)
    }
}

/// Converges Network Watcher flow logs.
pub struct FlowLogHandler {
    client: Arc<dyn ArmClient>,
    config: ProviderConfig,
}

impl FlowLogHandler {
    pub fn new(client: Arc<dyn ArmClient>, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    fn id_from(&self, desired: &Attrs) -> Result<FlowLogId> {
        Ok(FlowLogId {
            subscription_id: self.config.subscription_id.clone(),
            resource_group: require_str(desired, "resource_group_name")?.to_string(),
            watcher: require_str(desired, "network_watcher_name")?.to_string(),
            name: require_str(desired, "name")?.to_string(),
        })
    }

    /// Submit, wait for the long-running operation, and re-read to pick up
    /// the service-assigned identifier.
    async fn submit(&self, id: &FlowLogId, desired: &Attrs, deadline: Deadline) -> Result<String> {
        let body = expand_flow_log(desired)?;
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
impl ResourceHandler for FlowLogHandler {
    fn kind(&self) -> &'static str {
        "network_watcher_flow_log"
    }

    async fn create(&self, desired: &Attrs, deadline: Deadline) -> Result<String> {
        let id = self.id_from(desired)?;
        info!(id = %id, "creating flow log");
        self.submit(&id, desired, deadline).await
    }

    async fn read(&self, id: &str, deadline: Deadline) -> Result<Option<Attrs>> {
        let flow_id = FlowLogId::parse(id)?;
        let Some(payload) = self.client.get(&flow_id.path(), deadline).await? else {
            debug!(id, "flow log not found, clearing state");
            return Ok(None);
        };
        Ok(Some(flatten_flow_log(&flow_id, &payload)))
    }

    async fn update(
        &self,
        id: &str,
        desired: &Attrs,
        _prior: &Attrs,
        deadline: Deadline,
    ) -> Result<Option<String>> {
        let flow_id = FlowLogId::parse(id)?;

        let watcher_path = format!("{}?api-version={API_VERSION}", flow_id.watcher_id());
        if self.client.get(&watcher_path, deadline).await?.is_none() {
            info!(id, "network watcher is gone, clearing state");
            return Ok(None);
        }

        let assigned = self.submit(&flow_id, desired, deadline).await?;
        Ok(Some(assigned))
    }

    async fn delete(&self, id: &str, deadline: Deadline) -> Result<()> {
        let flow_id = FlowLogId::parse(id)?;
        let path = flow_id.path();

        let Some(payload) = self.client.get(&path, deadline).await? else {
            debug!(id, "flow log already gone");
            return Ok(());
        };

        // A disabled flow log has nothing left to tear down.
        let enabled = payload
            .pointer("/properties/enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !enabled {
            debug!(id, "flow log already disabled, delete is a no-op");
            return Ok(());
        }

        let op = self.client.delete(&path, deadline).await?;
        self.client.await_completion(&op, deadline).await
    }

    fn suppress_diff(
        &self,
        field: &str,
        declared: &Value,
        observed: &Value,
        desired: &Attrs,
    ) -> bool {
        drift::suppress(field, declared, observed, desired)
    }
}

fn expand_flow_log(desired: &Attrs) -> Result<Value> {
    let enabled = desired
        .bool("enabled")
        .ok_or_else(|| ArmError::transient("expand", "enabled", "required field is missing"))?;

    let mut properties = Map::new();
    properties.insert(
        "targetResourceId".to_string(),
        require_str(desired, "network_security_group_id")?.into(),
    );
    properties.insert(
        "storageId".to_string(),
        require_str(desired, "storage_account_id")?.into(),
    );
    properties.insert("enabled".to_string(), enabled.into());

    if let Some(retention) = desired.map("retention_policy") {
        properties.insert(
            "retentionPolicy".to_string(),
            json!({
                "enabled": retention.get("enabled").and_then(Value::as_bool).unwrap_or(false),
                "days": retention.get("days").and_then(Value::as_i64).unwrap_or(0),
            }),
        );
    }
    if let Some(version) = desired.i64("version") {
        properties.insert("format".to_string(), json!({ "version": version }));
    }
    if let Some(analytics) = desired.map("traffic_analytics") {
        let workspace_id = analytics
            .get("workspace_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if Uuid::parse_str(workspace_id).is_err() {
            return Err(ArmError::malformed(
                workspace_id,
                "traffic analytics workspace_id is not a UUID",
            ));
        }
        properties.insert(
            "flowAnalyticsConfiguration".to_string(),
            json!({
                "networkWatcherFlowAnalyticsConfiguration": {
                    "enabled": analytics.get("enabled").and_then(Value::as_bool).unwrap_or(false),
                    "workspaceId": workspace_id,
                    "workspaceRegion": analytics.get("workspace_region").and_then(Value::as_str).unwrap_or_default(),
                    "workspaceResourceId": analytics.get("workspace_resource_id").and_then(Value::as_str).unwrap_or_default(),
                }
            }),
        );
    }

    Ok(json!({ "properties": Value::Object(properties) }))
}

fn flatten_flow_log(id: &FlowLogId, payload: &Value) -> Attrs {
    let mut attrs = Attrs::new();
    attrs.set("name", id.name.clone());
    attrs.set("network_watcher_name", id.watcher.clone());
    attrs.set("resource_group_name", id.resource_group.clone());

    let Some(properties) = payload.get("properties") else {
        return attrs;
    };

    if let Some(target) = properties.get("targetResourceId").and_then(Value::as_str) {
        attrs.set("network_security_group_id", target);
    }
    if let Some(enabled) = properties.get("enabled").and_then(Value::as_bool) {
        attrs.set("enabled", enabled);
    }
    if let Some(version) = properties.pointer("/format/version").and_then(Value::as_i64) {
        attrs.set("version", version);
    }
    // The service reports an empty storage id while the flow log is
    // disabled; keeping the field absent avoids a spurious difference.
    if let Some(storage) = properties.get("storageId").and_then(Value::as_str) {
        if !storage.is_empty() {
            attrs.set("storage_account_id", storage);
        }
    }
    if let Some(retention) = properties.get("retentionPolicy").and_then(Value::as_object) {
        attrs.set(
            "retention_policy",
            json!({
                "enabled": retention.get("enabled").and_then(Value::as_bool).unwrap_or(false),
                "days": retention.get("days").and_then(Value::as_i64).unwrap_or(0),
            }),
        );
    }
    if let Some(analytics) = properties
        .pointer("/flowAnalyticsConfiguration/networkWatcherFlowAnalyticsConfiguration")
        .and_then(Value::as_object)
    {
        let mut out = Map::new();
        if let Some(enabled) = analytics.get("enabled").and_then(Value::as_bool) {
            out.insert("enabled".to_string(), enabled.into());
        }
        if let Some(workspace) = analytics.get("workspaceId").and_then(Value::as_str) {
            out.insert("workspace_id".to_string(), normalize_workspace_id(workspace).into());
        }
        if let Some(region) = analytics.get("workspaceRegion").and_then(Value::as_str) {
            out.insert("workspace_region".to_string(), normalize_location(region).into());
        }
        if let Some(resource) = analytics.get("workspaceResourceId").and_then(Value::as_str) {
            out.insert("workspace_resource_id".to_string(), resource.into());
        }
        attrs.set("traffic_analytics", Value::Object(out));
    }

    attrs
}

/// Canonical lowercase-hyphenated form when the value is a UUID.
fn normalize_workspace_id(raw: &str) -> String {
    Uuid::parse_str(raw)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Locations compare case- and whitespace-insensitively.
fn normalize_location(raw: &str) -> String {
    raw.to_lowercase().replace(' ', "")
}
