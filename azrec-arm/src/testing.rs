//! In-memory [`ArmClient`] for tests.
//!
//! Stores objects by path, serves scripted list pages, and records every
//! call so tests can assert which operations a handler performed (and which
//! it did not).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{ArmClient, Operation};
use crate::deadline::Deadline;
use crate::error::{ArmError, Result};

/// One recorded client call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub method: &'static str,
    pub path: String,
    pub page_size: Option<u32>,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<String, Value>,
    pages: HashMap<String, Vec<Value>>,
    versioned: BTreeSet<String>,
    version_counters: HashMap<String, u32>,
    calls: Vec<CallRecord>,
}

/// In-memory fake of the ARM surface.
///
/// Writes inject a service-assigned `id` into the stored payload: the path
/// itself, or a fresh version-suffixed id for paths under a prefix marked
/// with [`set_versioned`](FakeArmClient::set_versioned) (modeling Key Vault
/// child objects, where every write mints a new version).
#[derive(Default)]
pub struct FakeArmClient {
    state: Mutex<FakeState>,
}

impl FakeArmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object at a path, stored verbatim.
    pub fn put_object(&self, path: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(strip_query(path).to_string(), value);
    }

    /// Script the page returned by `list` for a path.
    pub fn stub_page(&self, path: &str, items: Vec<Value>) {
        let mut state = self.state.lock().unwrap();
        state.pages.insert(strip_query(path).to_string(), items);
    }

    /// Mark a collection prefix as version-assigning.
    pub fn set_versioned(&self, prefix: &str) {
        let mut state = self.state.lock().unwrap();
        state.versioned.insert(prefix.trim_end_matches('/').to_string());
    }

    /// Current object at a path, if any.
    pub fn object(&self, path: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state.objects.get(strip_query(path)).cloned()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls of one method.
    pub fn count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Number of calls of one method whose path contains `fragment`.
    pub fn count_matching(&self, method: &str, fragment: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.method == method && c.path.contains(fragment))
            .count()
    }

    fn record(&self, method: &'static str, path: &str, page_size: Option<u32>) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CallRecord {
            method,
            path: strip_query(path).to_string(),
            page_size,
        });
    }
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

#[async_trait]
impl ArmClient for FakeArmClient {
    async fn get(&self, path: &str, _deadline: Deadline) -> Result<Option<Value>> {
        self.record("get", path, None);
        Ok(self.object(path))
    }

    async fn list(
        &self,
        path: &str,
        page_size: Option<u32>,
        _deadline: Deadline,
    ) -> Result<Option<Vec<Value>>> {
        self.record("list", path, page_size);
        let key = strip_query(path).trim_end_matches('/').to_string();
        let state = self.state.lock().unwrap();
        if let Some(items) = state.pages.get(&key) {
            return Ok(Some(items.clone()));
        }

        // No scripted page: serve direct children when the parent exists.
        let Some((parent, _)) = key.rsplit_once('/') else {
            return Ok(None);
        };
        if !state.objects.contains_key(parent) {
            return Ok(None);
        }
        let prefix = format!("{key}/");
        let items = state
            .objects
            .iter()
            .filter(|(k, _)| {
                k.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(_, v)| v.clone())
            .collect();
        Ok(Some(items))
    }

    async fn create_or_update(
        &self,
        path: &str,
        body: &Value,
        _deadline: Deadline,
    ) -> Result<Operation> {
        self.record("put", path, None);
        let key = strip_query(path).to_string();
        let mut state = self.state.lock().unwrap();

        let versioned_prefix = state
            .versioned
            .iter()
            .find(|p| key.starts_with(p.as_str()))
            .cloned();
        let assigned_id = match versioned_prefix {
            Some(prefix) => {
                let rest = key[prefix.len()..].trim_start_matches('/');
                if rest.is_empty() || rest.contains('/') {
                    // Already version-addressed: an in-place write, id stays.
                    key.clone()
                } else {
                    let counter = state.version_counters.entry(key.clone()).or_insert(0);
                    *counter += 1;
                    format!("{key}/v{counter}")
                }
            }
            None => key.clone(),
        };

        let mut stored = body.clone();
        if let Some(map) = stored.as_object_mut() {
            map.insert("id".to_string(), Value::String(assigned_id));
        }
        state.objects.insert(key.clone(), stored);
        Ok(Operation::completed(key))
    }

    async fn delete(&self, path: &str, _deadline: Deadline) -> Result<Operation> {
        self.record("delete", path, None);
        let key = strip_query(path).to_string();
        let mut state = self.state.lock().unwrap();
        state.objects.remove(&key);
        let child_prefix = format!("{key}/");
        state.objects.retain(|k, _| !k.starts_with(&child_prefix));
        Ok(Operation::completed(key))
    }

    async fn await_completion(&self, op: &Operation, deadline: Deadline) -> Result<()> {
        self.record("await", &op.resource_path, None);
        if deadline.expired() {
            return Err(ArmError::Timeout {
                operation: "poll",
                id: op.resource_path.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn put_assigns_path_as_id() {
        let fake = FakeArmClient::new();
        let op = fake
            .create_or_update("/subscriptions/s/thing/a?api-version=1", &json!({"x": 1}), deadline())
            .await
            .unwrap();
        fake.await_completion(&op, deadline()).await.unwrap();

        let read = fake.get("/subscriptions/s/thing/a", deadline()).await.unwrap().unwrap();
        assert_eq!(read["id"], "/subscriptions/s/thing/a");
        assert_eq!(read["x"], 1);
        assert_eq!(fake.count("put"), 1);
        assert_eq!(fake.count("await"), 1);
    }

    #[tokio::test]
    async fn versioned_prefix_mints_new_ids_per_write() {
        let fake = FakeArmClient::new();
        fake.set_versioned("https://v.vault.azure.net/secrets");
        let path = "https://v.vault.azure.net/secrets/app";

        fake.create_or_update(path, &json!({"value": "one"}), deadline()).await.unwrap();
        let first = fake.get(path, deadline()).await.unwrap().unwrap();
        fake.create_or_update(path, &json!({"value": "two"}), deadline()).await.unwrap();
        let second = fake.get(path, deadline()).await.unwrap().unwrap();

        assert_ne!(first["id"], second["id"]);
        assert_eq!(second["value"], "two");
    }

    #[tokio::test]
    async fn list_serves_children_and_signals_absent_parent() {
        let fake = FakeArmClient::new();
        fake.put_object("/subscriptions/s/servers/db", json!({"name": "db"}));
        fake.put_object("/subscriptions/s/servers/db/configurations/a", json!({"name": "a"}));

        let page = fake
            .list("/subscriptions/s/servers/db/configurations", None, deadline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.len(), 1);

        let absent = fake
            .list("/subscriptions/s/servers/gone/configurations", None, deadline())
            .await
            .unwrap();
        assert!(absent.is_none());
    }
}
