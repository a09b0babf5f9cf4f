//! HTTP implementation of [`ArmClient`] against the ARM REST endpoint.
//!
//! Management-plane paths (`/subscriptions/...`) are resolved against the
//! configured endpoint; absolute URLs (Key Vault data plane, operation poll
//! URLs) are used as-is. Long-running operations are polled through the
//! `Azure-AsyncOperation` / `Location` status endpoint until they reach a
//! terminal state or the caller's deadline passes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{ArmClient, Operation};
use crate::deadline::Deadline;
use crate::error::{ArmError, Result};

const ASYNC_OPERATION_HEADER: &str = "Azure-AsyncOperation";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Connection settings for the ARM endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmConfig {
    /// Management endpoint, e.g. `https://management.azure.com`.
    pub endpoint: String,

    /// Bearer token. Acquisition is the caller's concern.
    pub access_token: String,

    /// Fallback api-version for paths that do not carry their own.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl ArmConfig {
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            api_version: default_api_version(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_api_version() -> String {
    "2020-06-01".to_string()
}

fn default_timeout() -> u64 {
    60
}

/// [`ArmClient`] backed by reqwest.
pub struct HttpArmClient {
    config: ArmConfig,
    http: Client,
}

impl HttpArmClient {
    pub fn new(config: ArmConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    "Authorization",
                    format!("Bearer {}", config.access_token)
                        .parse()
                        .map_err(|e| {
                            ArmError::transient("init", &config.endpoint, format!("invalid token: {e}"))
                        })?,
                );
                headers
            })
            .build()
            .map_err(|e| {
                ArmError::transient(
                    "init",
                    &config.endpoint,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        let base = if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
        };
        if base.contains('?') {
            base
        } else {
            format!("{base}?api-version={}", self.config.api_version)
        }
    }

    fn check_deadline(operation: &'static str, path: &str, deadline: Deadline) -> Result<()> {
        if deadline.expired() {
            return Err(ArmError::Timeout {
                operation,
                id: path.to_string(),
            });
        }
        Ok(())
    }

    async fn failure(operation: &'static str, path: &str, response: Response) -> ArmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ArmError::transient(operation, path, format!("service returned {status}: {body}"))
    }

    fn operation_from(path: &str, response: &Response) -> Operation {
        let poll_url = response
            .headers()
            .get(ASYNC_OPERATION_HEADER)
            .or_else(|| response.headers().get(reqwest::header::LOCATION))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Operation {
            resource_path: path.to_string(),
            poll_url,
        }
    }
}

#[async_trait]
impl ArmClient for HttpArmClient {
    async fn get(&self, path: &str, deadline: Deadline) -> Result<Option<Value>> {
        Self::check_deadline("get", path, deadline)?;
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ArmError::transient("get", path, e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "get: not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::failure("get", path, response).await);
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|e| ArmError::transient("get", path, e.to_string()))?;
        Ok(Some(payload))
    }

    async fn list(
        &self,
        path: &str,
        page_size: Option<u32>,
        deadline: Deadline,
    ) -> Result<Option<Vec<Value>>> {
        Self::check_deadline("list", path, deadline)?;
        let mut url = self.url(path);
        if let Some(n) = page_size {
            // The Key Vault data plane spells the page bound differently from
            // the management plane.
            let param = if path.starts_with("http") { "maxresults" } else { "$top" };
            url = format!("{url}&{param}={n}");
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ArmError::transient("list", path, e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "list: parent not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::failure("list", path, response).await);
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|e| ArmError::transient("list", path, e.to_string()))?;
        let items = payload
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                ArmError::transient("list", path, "response carried no 'value' array")
            })?;
        // A single page only; a continuation link beyond it is not followed.
        if payload.get("nextLink").is_some() {
            warn!(path, "list: more results than one page, remainder ignored");
        }
        Ok(Some(items))
    }

    async fn create_or_update(
        &self,
        path: &str,
        body: &Value,
        deadline: Deadline,
    ) -> Result<Operation> {
        Self::check_deadline("put", path, deadline)?;
        let response = self
            .http
            .put(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ArmError::transient("put", path, e.to_string()))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => {
                Ok(Self::operation_from(path, &response))
            }
            _ => Err(Self::failure("put", path, response).await),
        }
    }

    async fn delete(&self, path: &str, deadline: Deadline) -> Result<Operation> {
        Self::check_deadline("delete", path, deadline)?;
        let response = self
            .http
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| ArmError::transient("delete", path, e.to_string()))?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => {
                Ok(Self::operation_from(path, &response))
            }
            // Deleting what is already gone is a success.
            StatusCode::NOT_FOUND => Ok(Operation::completed(path)),
            _ => Err(Self::failure("delete", path, response).await),
        }
    }

    async fn await_completion(&self, op: &Operation, deadline: Deadline) -> Result<()> {
        let Some(poll_url) = &op.poll_url else {
            return Ok(());
        };

        loop {
            if deadline.expired() {
                return Err(ArmError::Timeout {
                    operation: "poll",
                    id: op.resource_path.clone(),
                });
            }

            let response = self
                .http
                .get(self.url(poll_url))
                .send()
                .await
                .map_err(|e| ArmError::transient("poll", &op.resource_path, e.to_string()))?;

            if !response.status().is_success() {
                return Err(Self::failure("poll", &op.resource_path, response).await);
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL);

            let payload = response
                .json::<Value>()
                .await
                .map_err(|e| ArmError::transient("poll", &op.resource_path, e.to_string()))?;
            let status = payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("Succeeded");

            match status {
                "Succeeded" => return Ok(()),
                "Failed" | "Canceled" => {
                    let message = payload
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("no error detail")
                        .to_string();
                    return Err(ArmError::Operation {
                        id: op.resource_path.clone(),
                        status: status.to_string(),
                        message,
                    });
                }
                other => {
                    debug!(path = %op.resource_path, status = other, "operation in progress");
                    tokio::time::sleep(retry_after.min(deadline.remaining())).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpArmClient {
        HttpArmClient::new(ArmConfig {
            endpoint: "https://management.azure.com".to_string(),
            access_token: "token".to_string(),
            api_version: default_api_version(),
            timeout_secs: default_timeout(),
        })
        .unwrap()
    }

    #[test]
    fn management_paths_get_endpoint_and_api_version() {
        let url = client().url("/subscriptions/sub-1/resourceGroups/rg-1");
        assert_eq!(
            url,
            "https://management.azure.com/subscriptions/sub-1/resourceGroups/rg-1\
             ?api-version=2020-06-01"
        );
    }

    #[test]
    fn absolute_urls_keep_their_query() {
        let url = client().url("https://v.vault.azure.net/secrets/s?api-version=2016-10-01");
        assert_eq!(url, "https://v.vault.azure.net/secrets/s?api-version=2016-10-01");
    }
}
