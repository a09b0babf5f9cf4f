//! Handler registry: one instance per resource kind, built at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::ResourceHandler;

/// Provider-wide settings injected into handlers at construction.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Subscription all management-plane identifiers are rooted at.
    pub subscription_id: String,

    /// Fail `create` when the object already exists remotely instead of
    /// silently adopting it.
    pub import_protection: bool,
}

impl ProviderConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            import_protection: true,
        }
    }
}

/// Mapping from resource kind to its handler, built once at process start.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own kind. Last registration wins.
    pub fn register(&mut self, handler: Arc<dyn ResourceHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Registered kinds, sorted for stable output.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}
