//! Database server configuration set: a virtual resource.
//!
//! The set aggregates every tunable setting of one MySQL or PostgreSQL
//! server into a single name → value map. It is a pure projection with no
//! identity of its own: `read` does the only real work, recomputing the map
//! in full from a listing call, while create, update, and delete never touch
//! the service because the set does not own the underlying children.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use azrec_arm::{ArmClient, Deadline, ResourceId, Result};

use crate::attrs::Attrs;
use crate::handler::ResourceHandler;
use crate::registry::ProviderConfig;
use crate::resources::require_str;

const API_VERSION: &str = "2017-12-01";

/// Converges (observes, really) one server's configuration set.
pub struct ConfigurationSetHandler {
    client: Arc<dyn ArmClient>,
    config: ProviderConfig,
    kind: &'static str,
    namespace: &'static str,
}

impl ConfigurationSetHandler {
    pub fn mysql(client: Arc<dyn ArmClient>, config: ProviderConfig) -> Self {
        Self {
            client,
            config,
            kind: "mysql_configuration_set",
            namespace: "Microsoft.DBforMySQL",
        }
    }

    pub fn postgresql(client: Arc<dyn ArmClient>, config: ProviderConfig) -> Self {
        Self {
            client,
            config,
            kind: "postgresql_configuration_set",
            namespace: "Microsoft.DBforPostgreSQL",
        }
    }

    fn server_id(&self, resource_group: &str, server: &str) -> ResourceId {
        ResourceId::subscription(&self.config.subscription_id)
            .resource_group(resource_group)
            .provider(self.namespace)
            .child("servers", server)
    }
}

#[async_trait]
impl ResourceHandler for ConfigurationSetHandler {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn create(&self, desired: &Attrs, _deadline: Deadline) -> Result<String> {
        // The set only observes settings owned by the server; creation is
        // minting the synthetic identifier.
        let server = require_str(desired, "server_name")?;
        let resource_group = require_str(desired, "resource_group_name")?;
        let id = self.server_id(resource_group, server).to_string();
        info!(id = %id, "configuration set is a projection, nothing to create");
        Ok(id)
    }

    async fn read(&self, id: &str, deadline: Deadline) -> Result<Option<Attrs>> {
        let parsed = ResourceId::parse(id)?;
        let resource_group = parsed.require_group()?.to_string();
        let server = parsed.require("servers")?.to_string();

        let path = format!(
            "{}/configurations?api-version={API_VERSION}",
            self.server_id(&resource_group, &server)
        );
        let Some(items) = self.client.list(&path, None, deadline).await? else {
            warn!(server = %server, resource_group = %resource_group, "server not found, clearing state");
            return Ok(None);
        };

        // Missing names or values on individual entries are skipped, not
        // errors; the aggregate is whatever the server reports.
        let mut config_map = BTreeMap::new();
        for item in &items {
            let Some(name) = item.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(value) = item.pointer("/properties/value").and_then(Value::as_str) else {
                continue;
            };
            config_map.insert(name.to_string(), value.to_string());
        }

        let mut attrs = Attrs::new();
        attrs.set("server_name", server);
        attrs.set("resource_group_name", resource_group);
        attrs.set(
            "config_map",
            Value::Object(Map::from_iter(
                config_map.into_iter().map(|(k, v)| (k, Value::String(v))),
            )),
        );
        Ok(Some(attrs))
    }

    async fn update(
        &self,
        id: &str,
        _desired: &Attrs,
        _prior: &Attrs,
        _deadline: Deadline,
    ) -> Result<Option<String>> {
        let _ = ResourceId::parse(id)?;
        Ok(Some(id.to_string()))
    }

    async fn delete(&self, id: &str, _deadline: Deadline) -> Result<()> {
        // The children belong to the server; there is nothing to remove.
        debug!(id, "configuration set delete is a no-op");
        Ok(())
    }
}
