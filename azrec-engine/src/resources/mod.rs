//! Convergence handlers for the supported Azure resource kinds.
//!
//! Each module owns one ARM resource type: its identifier parsing, request
//! shaping, and lifecycle logic.

pub mod configuration_set;
pub mod flow_log;
pub mod security_pricing;
pub mod vault_secret;

use std::sync::Arc;

use azrec_arm::{ArmClient, ArmError, Result};

use crate::attrs::Attrs;
use crate::registry::{HandlerRegistry, ProviderConfig};

/// Registry with every built-in handler, client injected at construction.
pub fn default_registry(client: Arc<dyn ArmClient>, config: ProviderConfig) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(vault_secret::VaultSecretHandler::new(
        client.clone(),
        config.clone(),
    )));
    registry.register(Arc::new(flow_log::FlowLogHandler::new(
        client.clone(),
        config.clone(),
    )));
    registry.register(Arc::new(configuration_set::ConfigurationSetHandler::mysql(
        client.clone(),
        config.clone(),
    )));
    registry.register(Arc::new(
        configuration_set::ConfigurationSetHandler::postgresql(client.clone(), config.clone()),
    ));
    registry.register(Arc::new(security_pricing::SecurityPricingHandler::new(
        client, config,
    )));
    registry
}

/// Required declared field, or an error naming it.
pub(crate) fn require_str<'a>(attrs: &'a Attrs, field: &'static str) -> Result<&'a str> {
    attrs
        .str(field)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ArmError::transient("expand", field, "required field is missing"))
}
