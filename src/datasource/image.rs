//! HTTP client for the image rendering service.

use super::{
    status_error, DataSourceError, FightImageRequest, ImageRenderer, RenderedFight,
    RewardImageRequest,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Response header carrying the background the renderer picked.
pub const BACKGROUND_HEADER: &str = "Background";

#[derive(Debug, Clone)]
pub struct HttpImageRenderer {
    client: Client,
    base_url: String,
}

impl HttpImageRenderer {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, DataSourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, DataSourceError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ImageRenderer for HttpImageRenderer {
    async fn render_reward(&self, request: &RewardImageRequest) -> Result<Vec<u8>, DataSourceError> {
        info!(traits = request.traits.len(), "Rendering reward image");
        let response = self.post("/images/reward", request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn render_fight(&self, request: &FightImageRequest) -> Result<RenderedFight, DataSourceError> {
        info!(red = %request.red_fighter, blue = %request.blue_fighter, "Rendering fight image");
        let response = self.post("/images/fight", request).await?;
        let background = response
            .headers()
            .get(BACKGROUND_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        Ok(RenderedFight {
            bytes: bytes.to_vec(),
            background,
        })
    }
}
