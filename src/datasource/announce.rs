//! Social announcement client. Posting is best-effort.

use super::{status_error, Announcement, Announcer, DataSourceError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct HttpAnnouncer {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    id: String,
}

impl HttpAnnouncer {
    pub fn new(base_url: String, token: String, timeout: Duration) -> Result<Self, DataSourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

/// Caption posted after a fight is staged.
pub fn fight_caption(winner: &str, loser: &str, reward: &str) -> String {
    format!("{} defeated {} and revealed {}!", winner, loser, reward)
}

#[async_trait]
impl Announcer for HttpAnnouncer {
    async fn announce(&self, post: &Announcement) -> Result<String, DataSourceError> {
        let mut form = Form::new().text("text", post.caption.clone());
        for (i, path) in post.images.iter().enumerate() {
            let bytes = tokio::fs::read(path).await?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("image{}.png", i));
            let part = Part::bytes(bytes)
                .file_name(file_name)
                .mime_str("image/png")
                .map_err(|e| DataSourceError::ParseError(e.to_string()))?;
            form = form.part(format!("media{}", i), part);
        }

        let response = self
            .client
            .post(format!("{}/posts", self.base_url))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        let parsed: PostResponse = response
            .json()
            .await
            .map_err(|e| DataSourceError::ParseError(e.to_string()))?;
        info!(post_id = %parsed.id, "Posted announcement");
        Ok(parsed.id)
    }
}
