//! Lifecycle tests for the convergence handlers, driven against the
//! in-memory ARM fake so every scenario is hermetic.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use azrec_arm::testing::FakeArmClient;
use azrec_arm::{ArmError, Deadline};
use azrec_engine::resources::configuration_set::ConfigurationSetHandler;
use azrec_engine::resources::flow_log::FlowLogHandler;
use azrec_engine::resources::security_pricing::SecurityPricingHandler;
use azrec_engine::resources::vault_secret::VaultSecretHandler;
use azrec_engine::{Attrs, ProviderConfig, ResourceHandler};

const SUB: &str = "sub-1";
const VAULT_ARM_ID: &str =
    "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.KeyVault/vaults/v1";
const VAULT_URL: &str = "https://v1.vault.azure.net";
const VAULTS_LIST_PATH: &str = "/subscriptions/sub-1/providers/Microsoft.KeyVault/vaults";

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(300))
}

fn vault_fake() -> Arc<FakeArmClient> {
    let fake = Arc::new(FakeArmClient::new());
    let vault = json!({
        "id": VAULT_ARM_ID,
        "properties": { "vaultUri": format!("{VAULT_URL}/") }
    });
    fake.put_object(VAULT_ARM_ID, vault.clone());
    fake.stub_page(VAULTS_LIST_PATH, vec![vault]);
    fake.set_versioned(&format!("{VAULT_URL}/secrets"));
    fake
}

fn secret_handler(fake: &Arc<FakeArmClient>) -> VaultSecretHandler {
    VaultSecretHandler::new(fake.clone(), ProviderConfig::new(SUB))
}

fn secret_desired(value: &str) -> Attrs {
    Attrs::new()
        .with("name", "app-secret")
        .with("key_vault_id", VAULT_ARM_ID)
        .with("value", value)
        .with("content_type", "text/plain")
        .with("tags", json!({"env": "prod"}))
        .with("not_before_date", "2031-01-02T03:04:05Z")
}

/// Reflect the vault's current contents into the listing used by `read`.
fn refresh_secret_page(fake: &FakeArmClient, name: &str) {
    let item = fake
        .object(&format!("{VAULT_URL}/secrets/{name}"))
        .expect("secret should exist");
    fake.stub_page(&format!("{VAULT_URL}/secrets"), vec![item]);
}

#[tokio::test]
async fn secret_create_then_read_is_consistent() {
    let fake = vault_fake();
    let handler = secret_handler(&fake);

    let id = handler.create(&secret_desired("hunter2"), deadline()).await.unwrap();
    assert!(id.starts_with(&format!("{VAULT_URL}/secrets/app-secret/")));

    refresh_secret_page(&fake, "app-secret");
    let observed = handler.read(&id, deadline()).await.unwrap().unwrap();

    assert_eq!(observed.str("name"), Some("app-secret"));
    assert_eq!(observed.str("key_vault_id"), Some(VAULT_ARM_ID));
    assert_eq!(observed.str("content_type"), Some("text/plain"));
    assert_eq!(observed.str("not_before_date"), Some("2031-01-02T03:04:05Z"));
    assert_eq!(observed.map("tags").unwrap()["env"], "prod");
    assert_eq!(observed.str("version"), Some("v1"));
    // The listing never exposes the payload.
    assert!(!observed.contains("value"));
}

#[tokio::test]
async fn secret_create_rejects_existing_when_import_protected() {
    let fake = vault_fake();
    let handler = secret_handler(&fake);

    let existing_id = format!("{VAULT_URL}/secrets/app-secret/v9");
    fake.put_object(
        &format!("{VAULT_URL}/secrets/app-secret"),
        json!({"id": existing_id, "value": "old"}),
    );

    let err = handler
        .create(&secret_desired("hunter2"), deadline())
        .await
        .unwrap_err();
    match err {
        ArmError::AlreadyExists { id } => assert_eq!(id, existing_id),
        other => panic!("expected AlreadyExists, got {other}"),
    }
}

#[tokio::test]
async fn secret_value_change_produces_new_identifier() {
    let fake = vault_fake();
    let handler = secret_handler(&fake);

    let prior = secret_desired("hunter2");
    let first_id = handler.create(&prior, deadline()).await.unwrap();

    let desired = secret_desired("correct-horse");
    let second_id = handler
        .update(&first_id, &desired, &prior, deadline())
        .await
        .unwrap()
        .expect("vault still exists");

    assert_ne!(first_id, second_id);
    let remote = fake.object(&format!("{VAULT_URL}/secrets/app-secret")).unwrap();
    assert_eq!(remote["value"], "correct-horse");

    refresh_secret_page(&fake, "app-secret");
    let observed = handler.read(&second_id, deadline()).await.unwrap().unwrap();
    assert_eq!(observed.str("version"), Some("v2"));
}

#[tokio::test]
async fn secret_attribute_update_keeps_identifier() {
    let fake = vault_fake();
    let handler = secret_handler(&fake);

    let prior = secret_desired("hunter2");
    let id = handler.create(&prior, deadline()).await.unwrap();

    let desired = secret_desired("hunter2").with("content_type", "application/json");
    let updated = handler
        .update(&id, &desired, &prior, deadline())
        .await
        .unwrap()
        .expect("vault still exists");

    assert_eq!(updated, id);
}

#[tokio::test]
async fn secret_read_lists_siblings_without_point_lookup() {
    let fake = vault_fake();
    let handler = secret_handler(&fake);

    // A full page of 25 siblings with the target in the middle.
    let mut page: Vec<_> = (0..24)
        .map(|i| json!({"id": format!("{VAULT_URL}/secrets/s{i}"), "attributes": {}}))
        .collect();
    page.insert(
        9,
        json!({
            "id": format!("{VAULT_URL}/secrets/app-secret"),
            "contentType": "text/plain",
            "attributes": {}
        }),
    );
    fake.stub_page(&format!("{VAULT_URL}/secrets"), page);

    let id = format!("{VAULT_URL}/secrets/app-secret/v7");
    let observed = handler.read(&id, deadline()).await.unwrap().unwrap();
    assert_eq!(observed.str("name"), Some("app-secret"));

    // Never a point lookup against the secret itself.
    assert_eq!(fake.count_matching("get", "/secrets/"), 0);
    let list_call = fake
        .calls()
        .into_iter()
        .find(|c| c.method == "list" && c.path.ends_with("/secrets"))
        .expect("read should list the vault");
    assert_eq!(list_call.page_size, Some(25));
}

#[tokio::test]
async fn secret_read_clears_state_when_vault_is_gone() {
    let fake = Arc::new(FakeArmClient::new());
    fake.stub_page(VAULTS_LIST_PATH, vec![]);
    let handler = secret_handler(&fake);

    let observed = handler
        .read(&format!("{VAULT_URL}/secrets/app-secret/v1"), deadline())
        .await
        .unwrap();
    assert!(observed.is_none());
}

#[tokio::test]
async fn secret_delete_is_idempotent() {
    let fake = vault_fake();
    let handler = secret_handler(&fake);

    let id = handler.create(&secret_desired("hunter2"), deadline()).await.unwrap();
    handler.delete(&id, deadline()).await.unwrap();
    // Second delete observes the secret already absent and still succeeds.
    handler.delete(&id, deadline()).await.unwrap();

    // With the vault itself gone there is nothing left to submit.
    let deletes_so_far = fake.count("delete");
    fake.stub_page(VAULTS_LIST_PATH, vec![]);
    handler.delete(&id, deadline()).await.unwrap();
    assert_eq!(fake.count("delete"), deletes_so_far);
}

#[tokio::test]
async fn secret_import_fails_on_unparseable_id() {
    let fake = vault_fake();
    let handler = secret_handler(&fake);

    let err = handler.import("not-a-vault-url", deadline()).await.unwrap_err();
    assert!(matches!(err, ArmError::MalformedId { .. }));
}

const FLOW_LOG_ID: &str = "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Network\
                           /networkWatchers/watcher-1/flowLogs/fl-1";

fn flow_log_desired() -> Attrs {
    Attrs::new()
        .with("name", "fl-1")
        .with("network_watcher_name", "watcher-1")
        .with("resource_group_name", "rg-1")
        .with("network_security_group_id", "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Network/networkSecurityGroups/nsg-1")
        .with("storage_account_id", "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Storage/storageAccounts/logs1")
        .with("enabled", true)
        .with("retention_policy", json!({"enabled": true, "days": 7}))
        .with("version", 2)
        .with("traffic_analytics", json!({
            "enabled": true,
            "workspace_id": "00000000-0000-0000-0000-000000000001",
            "workspace_region": "West Europe",
            "workspace_resource_id": "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.OperationalInsights/workspaces/ws-1"
        }))
}

#[tokio::test]
async fn flow_log_create_then_read_is_consistent() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = FlowLogHandler::new(fake.clone(), ProviderConfig::new(SUB));

    let id = handler.create(&flow_log_desired(), deadline()).await.unwrap();
    assert_eq!(id, FLOW_LOG_ID);
    // The write went through the long-running operation path.
    assert!(fake.count("await") >= 1);

    let observed = handler.read(&id, deadline()).await.unwrap().unwrap();
    assert_eq!(observed.bool("enabled"), Some(true));
    assert_eq!(observed.i64("version"), Some(2));
    assert_eq!(observed.at("retention_policy.days"), Some(&json!(7)));
    assert!(observed.str("storage_account_id").is_some());
    assert_eq!(
        observed.at("traffic_analytics.workspace_region"),
        Some(&json!("westeurope"))
    );
}

#[tokio::test]
async fn flow_log_read_not_found_clears_state() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = FlowLogHandler::new(fake.clone(), ProviderConfig::new(SUB));

    let observed = handler.read(FLOW_LOG_ID, deadline()).await.unwrap();
    assert!(observed.is_none());
}

#[tokio::test]
async fn flow_log_update_clears_state_when_watcher_is_gone() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = FlowLogHandler::new(fake.clone(), ProviderConfig::new(SUB));

    let result = handler
        .update(FLOW_LOG_ID, &flow_log_desired(), &flow_log_desired(), deadline())
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(fake.count("put"), 0);
}

#[tokio::test]
async fn flow_log_delete_is_a_noop_while_disabled() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = FlowLogHandler::new(fake.clone(), ProviderConfig::new(SUB));

    fake.put_object(
        FLOW_LOG_ID,
        json!({"id": FLOW_LOG_ID, "properties": {"enabled": false}}),
    );
    handler.delete(FLOW_LOG_ID, deadline()).await.unwrap();
    assert_eq!(fake.count("delete"), 0);

    fake.put_object(
        FLOW_LOG_ID,
        json!({"id": FLOW_LOG_ID, "properties": {"enabled": true}}),
    );
    handler.delete(FLOW_LOG_ID, deadline()).await.unwrap();
    assert_eq!(fake.count("delete"), 1);
    assert!(fake.object(FLOW_LOG_ID).is_none());
}

#[tokio::test]
async fn flow_log_suppresses_retention_drift_only_while_disabled() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = FlowLogHandler::new(fake, ProviderConfig::new(SUB));

    let disabled = flow_log_desired().with("enabled", false);
    assert!(handler.suppress_diff("retention_policy.days", &json!(30), &json!(0), &disabled));
    assert!(handler.suppress_diff(
        "retention_policy.enabled",
        &json!(true),
        &json!(false),
        &disabled
    ));

    let enabled = flow_log_desired();
    assert!(!handler.suppress_diff("retention_policy.days", &json!(30), &json!(0), &enabled));
}

const SERVER_ID: &str = "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.DBforMySQL\
                         /servers/db-1";

#[tokio::test]
async fn configuration_set_aggregates_children_on_read() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = ConfigurationSetHandler::mysql(fake.clone(), ProviderConfig::new(SUB));

    fake.put_object(SERVER_ID, json!({"id": SERVER_ID, "name": "db-1"}));
    for (name, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
        fake.put_object(
            &format!("{SERVER_ID}/configurations/{name}"),
            json!({"name": name, "properties": {"value": value}}),
        );
    }

    let desired = Attrs::new()
        .with("server_name", "db-1")
        .with("resource_group_name", "rg-1");
    let id = handler.create(&desired, deadline()).await.unwrap();
    assert_eq!(id, SERVER_ID);

    let observed = handler.read(&id, deadline()).await.unwrap().unwrap();
    assert_eq!(
        observed.get("config_map"),
        Some(&json!({"a": "1", "b": "2", "c": "3"}))
    );
    assert_eq!(observed.str("server_name"), Some("db-1"));
}

#[tokio::test]
async fn configuration_set_writes_never_touch_the_service() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = ConfigurationSetHandler::mysql(fake.clone(), ProviderConfig::new(SUB));

    let desired = Attrs::new()
        .with("server_name", "db-1")
        .with("resource_group_name", "rg-1");
    let id = handler.create(&desired, deadline()).await.unwrap();
    handler
        .update(&id, &desired, &desired, deadline())
        .await
        .unwrap();
    handler.delete(&id, deadline()).await.unwrap();

    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn configuration_set_read_clears_state_when_server_is_gone() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = ConfigurationSetHandler::postgresql(fake.clone(), ProviderConfig::new(SUB));

    let id = "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.DBforPostgreSQL\
              /servers/gone";
    let observed = handler.read(id, deadline()).await.unwrap();
    assert!(observed.is_none());
}

const PRICING_ID: &str =
    "/subscriptions/sub-1/providers/Microsoft.Security/pricings/VirtualMachines";

#[tokio::test]
async fn pricing_create_then_read_reports_the_tier() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = SecurityPricingHandler::new(fake.clone(), ProviderConfig::new(SUB));

    let desired = Attrs::new().with("tier", "Standard");
    let id = handler.create(&desired, deadline()).await.unwrap();
    assert_eq!(id, PRICING_ID);

    let observed = handler.read(&id, deadline()).await.unwrap().unwrap();
    assert_eq!(observed.str("tier"), Some("Standard"));
    assert_eq!(observed.str("resource_type"), Some("VirtualMachines"));
}

#[tokio::test]
async fn pricing_rejects_unknown_tier_and_resource_type() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = SecurityPricingHandler::new(fake.clone(), ProviderConfig::new(SUB));

    let bad_tier = Attrs::new().with("tier", "Platinum");
    assert!(handler.create(&bad_tier, deadline()).await.is_err());

    let bad_type = Attrs::new().with("tier", "Free").with("resource_type", "Mainframes");
    assert!(handler.create(&bad_type, deadline()).await.is_err());
    assert_eq!(fake.count("put"), 0);
}

#[tokio::test]
async fn pricing_delete_is_a_noop() {
    let fake = Arc::new(FakeArmClient::new());
    let handler = SecurityPricingHandler::new(fake.clone(), ProviderConfig::new(SUB));

    handler.delete(PRICING_ID, deadline()).await.unwrap();
    assert!(fake.calls().is_empty());
}
