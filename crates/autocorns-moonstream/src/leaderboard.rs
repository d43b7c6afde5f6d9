//! Moonstream Engine API leaderboard push

use reqwest::Client;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::MoonstreamConfig;
use crate::error::{MoonstreamError, Result};

pub struct LeaderboardClient {
    http: Client,
    engine_api_url: String,
    access_token: String,
}

impl LeaderboardClient {
    pub fn new(config: &MoonstreamConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            http,
            engine_api_url: config.engine_api_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    /// Replace the scores of `leaderboard_id`
    ///
    /// Addresses are sent as-is; the engine is told not to normalize them.
    pub async fn push_scores<T: Serialize>(&self, leaderboard_id: Uuid, scores: &[T]) -> Result<()> {
        let url = format!("{}/leaderboard/{}/scores", self.engine_api_url, leaderboard_id);
        let resp = self
            .http
            .put(&url)
            .query(&[("normalize_addresses", "false")])
            .bearer_auth(&self.access_token)
            .json(scores)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(MoonstreamError::Server {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        info!(%leaderboard_id, rows = scores.len(), "Leaderboard scores pushed");
        Ok(())
    }
}
