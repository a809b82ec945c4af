//! Content-addressed pinning service client.

use super::{status_error, ContentStore, DataSourceError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PinningStore {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    value: UploadValue,
}

#[derive(Debug, Deserialize)]
struct UploadValue {
    pin: Pin,
}

#[derive(Debug, Deserialize)]
struct Pin {
    cid: String,
}

impl PinningStore {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, DataSourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

fn parse_upload_response(body: &str) -> Result<String, DataSourceError> {
    let parsed: UploadResponse = serde_json::from_str(body)
        .map_err(|e| DataSourceError::ParseError(format!("Invalid upload response: {}", e)))?;
    if parsed.value.pin.cid.is_empty() {
        return Err(DataSourceError::ParseError("Empty content id".to_string()));
    }
    Ok(parsed.value.pin.cid)
}

#[async_trait]
impl ContentStore for PinningStore {
    async fn pin(&self, path: &Path) -> Result<String, DataSourceError> {
        info!(path = %path.display(), "Pinning file");
        let bytes = tokio::fs::read(path).await?;
        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        if !status.is_success() {
            return Err(status_error(status, body));
        }
        parse_upload_response(&body)
    }
}
