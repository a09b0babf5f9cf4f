//! Structured ARM resource identifiers.
//!
//! An ARM id is an ordered path of (collection, instance) pairs rooted at a
//! subscription, optionally scoped to a resource group and a provider
//! namespace:
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/servers/{name}/...
//! ```
//!
//! Identifiers are immutable once constructed; deriving a related id (for
//! example the parent server of a database) builds a new value instead of
//! mutating the old one.

use std::fmt;

use crate::error::{ArmError, Result};

/// Parsed form of an ARM resource id.
///
/// Path segments keep their original order and case so that
/// `ResourceId::parse(id.to_string())` reproduces `id` exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    subscription_id: String,
    resource_group: Option<String>,
    provider: Option<String>,
    path: Vec<(String, String)>,
}

impl ResourceId {
    /// Start building an id rooted at a subscription.
    pub fn subscription(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: None,
            provider: None,
            path: Vec::new(),
        }
    }

    pub fn resource_group(mut self, name: impl Into<String>) -> Self {
        self.resource_group = Some(name.into());
        self
    }

    pub fn provider(mut self, namespace: impl Into<String>) -> Self {
        self.provider = Some(namespace.into());
        self
    }

    /// Append a (collection, instance) pair.
    pub fn child(mut self, collection: impl Into<String>, name: impl Into<String>) -> Self {
        self.path.push((collection.into(), name.into()));
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn group(&self) -> Option<&str> {
        self.resource_group.as_deref()
    }

    /// Resource group, or a `MalformedId` naming the missing element.
    pub fn require_group(&self) -> Result<&str> {
        self.resource_group.as_deref().ok_or_else(|| {
            ArmError::malformed(self.to_string(), "missing the 'resourceGroups' element")
        })
    }

    /// Instance name of the given collection, if present.
    pub fn segment(&self, collection: &str) -> Option<&str> {
        self.path
            .iter()
            .find(|(c, _)| c == collection)
            .map(|(_, n)| n.as_str())
    }

    /// Instance name of the given collection, or a `MalformedId` naming the
    /// missing element.
    pub fn require(&self, collection: &str) -> Result<&str> {
        self.segment(collection).ok_or_else(|| {
            ArmError::malformed(
                self.to_string(),
                format!("missing the '{collection}' element"),
            )
        })
    }

    /// Parse the canonical string form.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(ArmError::malformed(raw, "id is empty"));
        }

        let mut parts = trimmed.split('/');
        match parts.next() {
            Some(s) if s.eq_ignore_ascii_case("subscriptions") => {}
            _ => {
                return Err(ArmError::malformed(
                    raw,
                    "id must begin with '/subscriptions'",
                ));
            }
        }
        let subscription_id = match parts.next() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return Err(ArmError::malformed(raw, "missing the 'subscriptions' value")),
        };

        let mut id = ResourceId {
            subscription_id,
            resource_group: None,
            provider: None,
            path: Vec::new(),
        };

        while let Some(collection) = parts.next() {
            if collection.is_empty() {
                return Err(ArmError::malformed(raw, "empty segment in id"));
            }
            let value = match parts.next() {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => {
                    return Err(ArmError::malformed(
                        raw,
                        format!("no value for segment '{collection}'"),
                    ));
                }
            };

            if collection.eq_ignore_ascii_case("resourceGroups")
                && id.resource_group.is_none()
                && id.path.is_empty()
            {
                id.resource_group = Some(value);
            } else if collection.eq_ignore_ascii_case("providers")
                && id.provider.is_none()
                && id.path.is_empty()
            {
                id.provider = Some(value);
            } else {
                id.path.push((collection.to_string(), value));
            }
        }

        Ok(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/subscriptions/{}", self.subscription_id)?;
        if let Some(rg) = &self.resource_group {
            write!(f, "/resourceGroups/{rg}")?;
        }
        if let Some(ns) = &self.provider {
            write!(f, "/providers/{ns}")?;
        }
        for (collection, name) in &self.path {
            write!(f, "/{collection}/{name}")?;
        }
        Ok(())
    }
}
