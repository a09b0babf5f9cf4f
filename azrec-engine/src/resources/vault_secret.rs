//! Key Vault secret handler.
//!
//! Secrets are data-plane children of a vault, addressed by URL rather than
//! by ARM path. Every write of the secret value mints a new version, so the
//! tracked identifier changes whenever the value does.
//!
//! Reads deliberately avoid the point-lookup endpoint: fetching a secret
//! directly requires the `get` permission and returns the payload, while
//! enumerating the vault only needs `list` and returns everything except the
//! value. The listing is a single bounded page; a secret beyond the first
//! [`SECRET_LIST_PAGE`] siblings is invisible to `read`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use serde_json::{Map, Value};
use tracing::{debug, info};

use azrec_arm::{ArmClient, ArmError, Deadline, Result};

use crate::attrs::Attrs;
use crate::handler::ResourceHandler;
use crate::registry::ProviderConfig;
use crate::resources::require_str;

/// Data-plane api-version for vault child objects.
const VAULT_API_VERSION: &str = "2016-10-01";

/// Upper bound on the sibling listing used by `read`.
const SECRET_LIST_PAGE: u32 = 25;

/// Identifier of a vault secret:
/// `https://{vault}.vault.azure.net/secrets/{name}[/{version}]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretId {
    pub vault_base_url: String,
    pub name: String,
    pub version: Option<String>,
}

impl SecretId {
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((scheme, rest)) = raw.split_once("://") else {
            return Err(ArmError::malformed(raw, "secret id must be a vault URL"));
        };
        let mut segments = rest.trim_end_matches('/').split('/');
        let host = match segments.next() {
            Some(h) if !h.is_empty() => h,
            _ => return Err(ArmError::malformed(raw, "missing vault host")),
        };

        match segments.next() {
            Some("secrets") => {}
            _ => return Err(ArmError::malformed(raw, "missing the 'secrets' element")),
        }
        let name = match segments.next() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return Err(ArmError::malformed(raw, "missing the secret name")),
        };
        let version = segments.next().map(str::to_string);
        if segments.next().is_some() {
            return Err(ArmError::malformed(raw, "trailing segments after version"));
        }

        Ok(Self {
            vault_base_url: format!("{scheme}://{host}"),
            name,
            version,
        })
    }

    /// Path addressing the latest version of the secret.
    fn latest_path(&self) -> String {
        format!(
            "{}/secrets/{}?api-version={VAULT_API_VERSION}",
            self.vault_base_url, self.name
        )
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/secrets/{}", self.vault_base_url, self.name)?;
        if let Some(version) = &self.version {
            write!(f, "/{version}")?;
        }
        Ok(())
    }
}

/// Converges Key Vault secrets.
pub struct VaultSecretHandler {
    client: Arc<dyn ArmClient>,
    config: ProviderConfig,
}

impl VaultSecretHandler {
    pub fn new(client: Arc<dyn ArmClient>, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    /// Data-plane base URL of a vault, from its ARM id.
    async fn vault_uri(&self, key_vault_id: &str, deadline: Deadline) -> Result<Option<String>> {
        let Some(vault) = self.client.get(key_vault_id, deadline).await? else {
            return Ok(None);
        };
        let uri = vault
            .pointer("/properties/vaultUri")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ArmError::transient("get", key_vault_id, "vault carried no vaultUri")
            })?;
        Ok(Some(uri.trim_end_matches('/').to_string()))
    }

    /// ARM id of the vault behind a data-plane base URL, resolved without a
    /// stored mapping by scanning the subscription's vaults.
    async fn vault_arm_id(&self, base_url: &str, deadline: Deadline) -> Result<Option<String>> {
        let path = format!(
            "/subscriptions/{}/providers/Microsoft.KeyVault/vaults",
            self.config.subscription_id
        );
        let Some(vaults) = self.client.list(&path, None, deadline).await? else {
            return Ok(None);
        };
        let arm_id = vaults.iter().find_map(|vault| {
            let uri = vault.pointer("/properties/vaultUri")?.as_str()?;
            if uri.trim_end_matches('/') == base_url {
                vault.get("id")?.as_str().map(str::to_string)
            } else {
                None
            }
        });
        Ok(arm_id)
    }

    /// Vault still present? Update/delete treat a vanished vault as the
    /// secret already being gone.
    async fn vault_exists(&self, vault_arm_id: &str, deadline: Deadline) -> Result<bool> {
        Ok(self.client.get(vault_arm_id, deadline).await?.is_some())
    }

    /// Shared submit/await/re-read sequence: every value write goes through
    /// here and yields the version-suffixed identifier the service assigned.
    async fn put_secret(
        &self,
        base_url: &str,
        name: &str,
        desired: &Attrs,
        deadline: Deadline,
    ) -> Result<String> {
        let path = format!("{base_url}/secrets/{name}?api-version={VAULT_API_VERSION}");
        let body = expand_set_body(desired)?;
        let op = self.client.create_or_update(&path, &body, deadline).await?;
        self.client.await_completion(&op, deadline).await?;

        let unversioned = format!("{base_url}/secrets/{name}");
        let read = self
            .client
            .get(&path, deadline)
            .await?
            .ok_or_else(|| ArmError::PostCreateRead {
                id: unversioned.clone(),
            })?;
        let id = read
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ArmError::PostCreateRead { id: unversioned })?;
        // The id is suffixed with the new secret version.
        SecretId::parse(id)?;
        Ok(id.to_string())
    }
}

#[async_trait]
impl ResourceHandler for VaultSecretHandler {
    fn kind(&self) -> &'static str {
        "key_vault_secret"
    }

    async fn create(&self, desired: &Attrs, deadline: Deadline) -> Result<String> {
        let name = require_str(desired, "name")?;
        let key_vault_id = require_str(desired, "key_vault_id")?;
        info!(name, key_vault_id, "creating key vault secret");

        let base_url = self
            .vault_uri(key_vault_id, deadline)
            .await?
            .ok_or_else(|| {
                ArmError::transient("create", key_vault_id, "key vault does not exist")
            })?;

        if self.config.import_protection {
            let latest = format!("{base_url}/secrets/{name}?api-version={VAULT_API_VERSION}");
            if let Some(existing) = self.client.get(&latest, deadline).await? {
                if let Some(id) = existing.get("id").and_then(Value::as_str) {
                    if !id.is_empty() {
                        return Err(ArmError::AlreadyExists { id: id.to_string() });
                    }
                }
            }
        }

        self.put_secret(&base_url, name, desired, deadline).await
    }

    async fn read(&self, id: &str, deadline: Deadline) -> Result<Option<Attrs>> {
        let secret_id = SecretId::parse(id)?;

        let Some(vault_arm_id) = self
            .vault_arm_id(&secret_id.vault_base_url, deadline)
            .await?
        else {
            debug!(id, "vault behind secret is no longer resolvable, clearing state");
            return Ok(None);
        };
        if !self.vault_exists(&vault_arm_id, deadline).await? {
            debug!(id, "vault is gone, clearing state");
            return Ok(None);
        }

        // List-and-filter instead of a point lookup: needs only the `list`
        // permission and never sees the secret value. One page only.
        let list_path = format!(
            "{}/secrets?api-version={VAULT_API_VERSION}",
            secret_id.vault_base_url
        );
        let Some(items) = self
            .client
            .list(&list_path, Some(SECRET_LIST_PAGE), deadline)
            .await?
        else {
            return Ok(None);
        };

        let item = items.iter().find(|item| {
            item.get("id")
                .and_then(Value::as_str)
                .and_then(|raw| SecretId::parse(raw).ok())
                .is_some_and(|parsed| parsed.name == secret_id.name)
        });
        let Some(item) = item else {
            debug!(id, "secret not present in vault listing, clearing state");
            return Ok(None);
        };

        let mut attrs = Attrs::new();
        attrs.set("key_vault_id", vault_arm_id);
        attrs.set("name", secret_id.name.clone());
        if let Some(version) = &secret_id.version {
            attrs.set("version", version.clone());
        }
        if let Some(content_type) = item.get("contentType").and_then(Value::as_str) {
            attrs.set("content_type", content_type);
        }
        if let Some(nbf) = item.pointer("/attributes/nbf").and_then(Value::as_i64) {
            attrs.set("not_before_date", format_timestamp(nbf));
        }
        if let Some(exp) = item.pointer("/attributes/exp").and_then(Value::as_i64) {
            attrs.set("expiration_date", format_timestamp(exp));
        }
        if let Some(tags) = item.get("tags").and_then(Value::as_object) {
            attrs.set("tags", Value::Object(tags.clone()));
        }
        Ok(Some(attrs))
    }

    async fn update(
        &self,
        id: &str,
        desired: &Attrs,
        prior: &Attrs,
        deadline: Deadline,
    ) -> Result<Option<String>> {
        let secret_id = SecretId::parse(id)?;

        let Some(vault_arm_id) = self
            .vault_arm_id(&secret_id.vault_base_url, deadline)
            .await?
        else {
            info!(id, "vault behind secret is gone, clearing state");
            return Ok(None);
        };
        if !self.vault_exists(&vault_arm_id, deadline).await? {
            info!(id, "vault is gone, clearing state");
            return Ok(None);
        }

        // Identity is the name parsed out of the tracked id, not whatever the
        // declared state currently displays.
        let name = &secret_id.name;

        if desired.get("value") != prior.get("value") {
            // Changing the value forces a new version of the secret.
            info!(name = %name, "secret value changed, writing a new version");
            let new_id = self
                .put_secret(&secret_id.vault_base_url, name, desired, deadline)
                .await?;
            return Ok(Some(new_id));
        }

        // Attribute-only change: in-place update against the same version.
        let path = match &secret_id.version {
            Some(version) => format!(
                "{}/secrets/{name}/{version}?api-version={VAULT_API_VERSION}",
                secret_id.vault_base_url
            ),
            None => secret_id.latest_path(),
        };
        let body = expand_update_body(desired)?;
        let op = self.client.create_or_update(&path, &body, deadline).await?;
        self.client.await_completion(&op, deadline).await?;
        Ok(Some(id.to_string()))
    }

    async fn delete(&self, id: &str, deadline: Deadline) -> Result<()> {
        let secret_id = SecretId::parse(id)?;

        let Some(vault_arm_id) = self
            .vault_arm_id(&secret_id.vault_base_url, deadline)
            .await?
        else {
            debug!(id, "vault behind secret is gone, nothing to delete");
            return Ok(());
        };
        if !self.vault_exists(&vault_arm_id, deadline).await? {
            debug!(id, "vault is gone, nothing to delete");
            return Ok(());
        }

        let op = self.client.delete(&secret_id.latest_path(), deadline).await?;
        self.client.await_completion(&op, deadline).await
    }
}

/// Full body for a value write.
fn expand_set_body(desired: &Attrs) -> Result<Value> {
    let mut body = Map::new();
    if let Some(value) = desired.str("value") {
        body.insert("value".to_string(), value.into());
    }
    fill_metadata(&mut body, desired)?;
    Ok(Value::Object(body))
}

/// Body for an in-place attribute update; never carries the value.
fn expand_update_body(desired: &Attrs) -> Result<Value> {
    let mut body = Map::new();
    fill_metadata(&mut body, desired)?;
    Ok(Value::Object(body))
}

fn fill_metadata(body: &mut Map<String, Value>, desired: &Attrs) -> Result<()> {
    if let Some(content_type) = desired.str("content_type") {
        body.insert("contentType".to_string(), content_type.into());
    }
    if let Some(tags) = desired.map("tags") {
        body.insert("tags".to_string(), Value::Object(tags.clone()));
    }

    let mut attributes = Map::new();
    if let Some(raw) = desired.str("not_before_date") {
        attributes.insert("nbf".to_string(), parse_timestamp("not_before_date", raw)?.into());
    }
    if let Some(raw) = desired.str("expiration_date") {
        attributes.insert("exp".to_string(), parse_timestamp("expiration_date", raw)?.into());
    }
    if !attributes.is_empty() {
        body.insert("attributes".to_string(), Value::Object(attributes));
    }
    Ok(())
}

fn parse_timestamp(field: &'static str, raw: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|e| ArmError::transient("expand", field, format!("not RFC3339: {e}")))
}

fn format_timestamp(unix: i64) -> String {
    DateTime::from_timestamp(unix, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}
