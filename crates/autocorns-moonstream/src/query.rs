//! Moonstream Query API: start a data update, then poll for the result
//!
//! Results are published at a URL returned by the update request. Polling
//! sends `If-Modified-Since` with the time the update was requested, so a
//! stale result from an earlier run is never mistaken for a fresh one.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::MoonstreamConfig;
use crate::error::{MoonstreamError, Result};

#[derive(Debug, Deserialize)]
struct UpdateDataResponse {
    url: String,
}

/// Parameters for the Dark Forest choices query of one session
pub fn session_params(contract_address: &str, session_id: &str) -> Value {
    json!({
        "contract_address": contract_address,
        "session_id": session_id,
    })
}

/// Parameters for event queries covering `[start, end]` unix timestamps
pub fn event_params(start_timestamp: i64, end_timestamp: i64) -> Value {
    json!({
        "start_timestamp": start_timestamp,
        "end_timestamp": end_timestamp,
    })
}

pub struct QueryClient {
    http: Client,
    api_url: String,
    access_token: String,
    interval: Duration,
    max_retries: u32,
    update_attempts: u32,
}

impl QueryClient {
    pub fn new(config: &MoonstreamConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            interval: config.interval(),
            max_retries: config.max_retries,
            update_attempts: config.update_attempts.max(1),
        })
    }

    /// Request fresh results for `query_name` and wait for them
    ///
    /// When a round of polling runs out of retries the update is requested
    /// again, up to `update_attempts` rounds.
    pub async fn update_and_fetch(&self, query_name: &str, params: Value) -> Result<Value> {
        // Taken before the first update request so the result can only be newer
        let if_modified_since = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let mut polls = 0u32;
        for round in 1..=self.update_attempts {
            let data_url = self.request_update(query_name, params.clone()).await?;
            info!(query = query_name, round, %if_modified_since, "Query update requested, polling for results");

            match self.poll(&data_url, &if_modified_since).await {
                Ok(results) => {
                    info!(query = query_name, round, "Query results ready");
                    return Ok(results);
                }
                Err(attempts) => {
                    polls += attempts;
                    warn!(query = query_name, round, attempts, "Query results not ready, giving up on this update");
                }
            }
        }

        Err(MoonstreamError::RetriesExhausted { attempts: polls })
    }

    /// Poll `data_url` until it serves fresh data, or return the number of polls made
    async fn poll(&self, data_url: &str, if_modified_since: &str) -> std::result::Result<Value, u32> {
        let mut attempts = 0u32;
        loop {
            tokio::time::sleep(self.interval).await;
            attempts += 1;

            match self
                .http
                .get(data_url)
                .header(IF_MODIFIED_SINCE, if_modified_since)
                .send()
                .await
            {
                Ok(resp) if resp.status() == StatusCode::OK => match resp.json().await {
                    Ok(results) => return Ok(results),
                    Err(e) => warn!(error = %e, attempts, "Query results were not valid JSON"),
                },
                Ok(resp) => {
                    debug!(
                        status = resp.status().as_u16(),
                        last_modified = resp
                            .headers()
                            .get(LAST_MODIFIED)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-"),
                        attempts,
                        "Query results not ready"
                    );
                }
                Err(e) => {
                    warn!(error = %e, attempts, "Polling query results failed");
                }
            }

            if self.max_retries > 0 && attempts > self.max_retries {
                return Err(attempts);
            }
        }
    }

    async fn request_update(&self, query_name: &str, params: Value) -> Result<String> {
        let url = format!("{}/queries/{}/update_data", self.api_url, query_name);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "params": params }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(MoonstreamError::Server {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let body: UpdateDataResponse = resp.json().await?;
        Ok(body.url)
    }
}
