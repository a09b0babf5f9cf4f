//! One-shot convergence driver.
//!
//! Loads a manifest of declared resources and the tracked identifier state,
//! converges every declared resource through its handler, prunes resources
//! that left the manifest, and writes the state back.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use azrec_arm::Deadline;
use azrec_arm::http::{ArmConfig, HttpArmClient};
use azrec_engine::resources::default_registry;
use azrec_engine::{Attrs, ProviderConfig, ResourceHandler};

#[derive(Parser)]
#[command(name = "azrec")]
#[command(about = "One-shot convergence of declared Azure resources")]
struct Args {
    /// Manifest of declared resources
    #[arg(short, long, default_value = "manifest.json")]
    manifest: PathBuf,

    /// Tracked identifier state
    #[arg(short, long, default_value = "state.json")]
    state: PathBuf,

    /// ARM management endpoint
    #[arg(long, default_value = "https://management.azure.com")]
    endpoint: String,

    /// Subscription id
    #[arg(long)]
    subscription: String,

    /// Environment variable holding the bearer token
    #[arg(long, default_value = "ARM_ACCESS_TOKEN")]
    token_env: String,

    /// Fail creates when the object already exists remotely
    #[arg(long, default_value_t = true)]
    import_protection: bool,
}

/// One declared resource.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    kind: String,
    name: String,
    attrs: Attrs,
}

/// Tracked identifier plus the declared state it was applied with.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackedResource {
    kind: String,
    id: String,
    attrs: Attrs,
}

type State = BTreeMap<String, TrackedResource>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("azrec_engine=info".parse()?)
                .add_directive("azrec_arm=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let token = std::env::var(&args.token_env)
        .with_context(|| format!("missing access token in ${}", args.token_env))?;
    let client = HttpArmClient::new(ArmConfig::new(args.endpoint.clone(), token))?;

    let mut provider = ProviderConfig::new(args.subscription.clone());
    provider.import_protection = args.import_protection;
    let registry = default_registry(Arc::new(client), provider);

    let manifest_bytes = tokio::fs::read(&args.manifest)
        .await
        .with_context(|| format!("failed to read manifest {}", args.manifest.display()))?;
    let manifest: Vec<ManifestEntry> =
        serde_json::from_slice(&manifest_bytes).context("manifest is not valid JSON")?;

    let mut state: State = match tokio::fs::read(&args.state).await {
        Ok(bytes) => serde_json::from_slice(&bytes).context("state file is not valid JSON")?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::new(),
        Err(e) => return Err(e).context("failed to read state file"),
    };

    info!(
        resources = manifest.len(),
        tracked = state.len(),
        subscription = %args.subscription,
        "applying manifest"
    );

    let mut failures = 0usize;
    for entry in &manifest {
        let Some(handler) = registry.get(&entry.kind) else {
            error!(name = %entry.name, kind = %entry.kind, "no handler registered for kind");
            failures += 1;
            continue;
        };
        if let Err(e) = converge(handler.as_ref(), entry, &mut state).await {
            error!(name = %entry.name, kind = %entry.kind, error = %e, "convergence failed");
            failures += 1;
        }
    }

    // Prune resources that left the manifest.
    let declared: HashSet<&str> = manifest.iter().map(|m| m.name.as_str()).collect();
    let stale: Vec<String> = state
        .keys()
        .filter(|name| !declared.contains(name.as_str()))
        .cloned()
        .collect();
    for name in stale {
        let tracked = state[&name].clone();
        let Some(handler) = registry.get(&tracked.kind) else {
            warn!(name = %name, kind = %tracked.kind, "no handler for tracked kind, dropping entry");
            state.remove(&name);
            continue;
        };
        info!(name = %name, id = %tracked.id, "pruning resource");
        match handler
            .delete(&tracked.id, Deadline::after(handler.timeouts().delete))
            .await
        {
            Ok(()) => {
                state.remove(&name);
            }
            Err(e) => {
                error!(name = %name, error = %e, "failed to prune resource");
                failures += 1;
            }
        }
    }

    tokio::fs::write(&args.state, serde_json::to_vec_pretty(&state)?)
        .await
        .with_context(|| format!("failed to write state {}", args.state.display()))?;

    if failures > 0 {
        anyhow::bail!("{failures} resource(s) failed to converge");
    }
    Ok(())
}

/// Bring one declared resource in line with its remote object.
async fn converge(
    handler: &dyn ResourceHandler,
    entry: &ManifestEntry,
    state: &mut State,
) -> Result<()> {
    let timeouts = handler.timeouts();

    let Some(tracked) = state.get(&entry.name).cloned() else {
        let id = handler
            .create(&entry.attrs, Deadline::after(timeouts.create))
            .await?;
        info!(name = %entry.name, id = %id, "created");
        state.insert(
            entry.name.clone(),
            TrackedResource {
                kind: entry.kind.clone(),
                id,
                attrs: entry.attrs.clone(),
            },
        );
        return Ok(());
    };

    let observed = handler
        .read(&tracked.id, Deadline::after(timeouts.read))
        .await?;
    let Some(observed) = observed else {
        warn!(name = %entry.name, id = %tracked.id, "remote object is gone, recreating");
        state.remove(&entry.name);
        let id = handler
            .create(&entry.attrs, Deadline::after(timeouts.create))
            .await?;
        state.insert(
            entry.name.clone(),
            TrackedResource {
                kind: entry.kind.clone(),
                id,
                attrs: entry.attrs.clone(),
            },
        );
        return Ok(());
    };

    let changed = changed_fields(handler, &entry.attrs, &tracked.attrs, &observed);
    if changed.is_empty() {
        info!(name = %entry.name, id = %tracked.id, "in sync");
        return Ok(());
    }

    info!(name = %entry.name, fields = ?changed, "updating");
    match handler
        .update(
            &tracked.id,
            &entry.attrs,
            &tracked.attrs,
            Deadline::after(timeouts.update),
        )
        .await?
    {
        Some(id) => {
            state.insert(
                entry.name.clone(),
                TrackedResource {
                    kind: entry.kind.clone(),
                    id,
                    attrs: entry.attrs.clone(),
                },
            );
        }
        None => {
            warn!(name = %entry.name, "parent container is gone, clearing tracked state");
            state.remove(&entry.name);
        }
    }
    Ok(())
}

/// Declared fields whose observed value meaningfully differs.
fn changed_fields(
    handler: &dyn ResourceHandler,
    declared: &Attrs,
    prior: &Attrs,
    observed: &Attrs,
) -> Vec<String> {
    let mut changed = Vec::new();
    for (field, declared_value) in declared.iter() {
        match observed.get(field) {
            // Write-only fields (a secret's value) never come back from the
            // service; compare against the previously applied state instead.
            None => {
                if prior.get(field) != Some(declared_value) {
                    changed.push(field.clone());
                }
            }
            Some(observed_value) if observed_value == declared_value => {}
            Some(observed_value) => {
                collect_diffs(handler, declared, field, declared_value, observed_value, &mut changed);
            }
        }
    }
    changed
}

/// Record a difference, descending one level into nested blocks so the
/// suppression policy sees dotted field paths like `retention_policy.days`.
fn collect_diffs(
    handler: &dyn ResourceHandler,
    desired: &Attrs,
    field: &str,
    declared: &Value,
    observed: &Value,
    out: &mut Vec<String>,
) {
    match (declared.as_object(), observed.as_object()) {
        (Some(declared_map), Some(observed_map)) => {
            for (key, declared_value) in declared_map {
                let path = format!("{field}.{key}");
                let observed_value = observed_map.get(key).cloned().unwrap_or(Value::Null);
                if *declared_value != observed_value
                    && !handler.suppress_diff(&path, declared_value, &observed_value, desired)
                {
                    out.push(path);
                }
            }
        }
        _ => {
            if !handler.suppress_diff(field, declared, observed, desired) {
                out.push(field.to_string());
            }
        }
    }
}
