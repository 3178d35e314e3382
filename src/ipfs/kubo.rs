/// Kubo RPC API client
///
/// All RPC calls are `POST /api/v0/<command>?arg=...`. Transport failures and
/// 5xx responses are retried with linearly increasing backoff; 4xx responses
/// are returned immediately since they will not succeed on retry.
use crate::{
    config::IpfsConfig,
    error::{PinError, PinResult},
    ipfs::{NodeInfo, StorageNetwork},
};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectStatResponse {
    cumulative_size: i64,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "AgentVersion", default)]
    agent_version: String,
    #[serde(rename = "ProtocolVersion", default)]
    protocol_version: String,
}

pub struct KuboClient {
    base_url: String,
    http_client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl KuboClient {
    pub fn new(config: &IpfsConfig) -> PinResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("pinledger/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PinError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            http_client,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        })
    }

    fn url(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.base_url, command)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_delay * attempt;
        let jitter_ms = (self.retry_delay.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// POST an RPC command with query args, retrying transient failures
    async fn call(&self, command: &str, query: &[(&str, &str)]) -> PinResult<Vec<u8>> {
        let url = self.url(command);
        let mut last_error = PinError::Network(format!("{}: no attempt made", command));

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }

            let response = match self.http_client.post(&url).query(query).send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(command, attempt, "Kubo request failed: {}", e);
                    last_error = PinError::Network(format!("{} request failed: {}", command, e));
                    continue;
                }
            };

            let status = response.status();
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = PinError::Network(format!("{} response unreadable: {}", command, e));
                    continue;
                }
            };

            if status.is_success() {
                return Ok(body.to_vec());
            }

            last_error = PinError::Network(format!(
                "{} returned status {}: {}",
                command,
                status,
                String::from_utf8_lossy(&body).trim()
            ));

            if status.is_client_error() {
                return Err(last_error);
            }

            tracing::debug!(command, attempt, %status, "Kubo returned server error");
        }

        Err(last_error)
    }

    fn require_cid(cid: &str) -> PinResult<()> {
        if cid.is_empty() {
            return Err(PinError::Validation("CID must not be empty".to_string()));
        }
        Ok(())
    }

    fn decode<T: serde::de::DeserializeOwned>(command: &str, body: &[u8]) -> PinResult<T> {
        serde_json::from_slice(body)
            .map_err(|e| PinError::Network(format!("Failed to parse {} response: {}", command, e)))
    }
}

#[async_trait]
impl StorageNetwork for KuboClient {
    async fn add(&self, data: Vec<u8>) -> PinResult<String> {
        // Multipart bodies are consumed on send, so uploads are not retried
        let form = multipart::Form::new().part("file", multipart::Part::bytes(data).file_name("data"));

        let response = self
            .http_client
            .post(self.url("add"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PinError::Network(format!("add request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PinError::Network(format!("add response unreadable: {}", e)))?;

        if status != StatusCode::OK {
            return Err(PinError::Network(format!(
                "add returned status {}: {}",
                status,
                String::from_utf8_lossy(&body).trim()
            )));
        }

        let result: AddResponse = Self::decode("add", &body)?;
        if result.hash.is_empty() {
            return Err(PinError::Network("add response missing Hash".to_string()));
        }

        Ok(result.hash)
    }

    async fn pin(&self, cid: &str) -> PinResult<()> {
        Self::require_cid(cid)?;
        self.call("pin/add", &[("arg", cid), ("progress", "false")]).await?;
        Ok(())
    }

    async fn unpin(&self, cid: &str) -> PinResult<()> {
        Self::require_cid(cid)?;
        self.call("pin/rm", &[("arg", cid)]).await?;
        Ok(())
    }

    async fn stat(&self, cid: &str) -> PinResult<i64> {
        Self::require_cid(cid)?;
        let body = self.call("object/stat", &[("arg", cid)]).await?;
        let stat: ObjectStatResponse = Self::decode("object/stat", &body)?;
        Ok(stat.cumulative_size)
    }

    async fn node_info(&self) -> PinResult<NodeInfo> {
        let body = self.call("id", &[]).await?;
        let id: IdResponse = Self::decode("id", &body)?;
        Ok(NodeInfo {
            peer_id: id.id,
            agent_version: id.agent_version,
            protocol_version: id.protocol_version,
        })
    }
}
