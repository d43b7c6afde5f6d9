//! Moonstream endpoints, credentials and polling settings

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MoonstreamError, Result};

pub const DEFAULT_QUERY_API: &str = "https://api.moonstream.to";
pub const DEFAULT_ENGINE_API: &str = "https://engineapi.moonstream.to";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoonstreamConfig {
    /// Query API base URL
    pub api_url: String,
    /// Engine API base URL (leaderboards)
    pub engine_api_url: String,
    /// Bearer token; never written back to disk
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Seconds between result polls
    pub interval_secs: f64,
    /// Result polls before giving up, 0 for no limit
    pub max_retries: u32,
    /// Update requests to send when a round of polling gives up
    pub update_attempts: u32,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for MoonstreamConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_QUERY_API.into(),
            engine_api_url: DEFAULT_ENGINE_API.into(),
            access_token: String::new(),
            interval_secs: 2.0,
            max_retries: 0,
            update_attempts: 1,
            request_timeout_secs: 30,
        }
    }
}

impl MoonstreamConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.0))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(MoonstreamError::MissingAccessToken);
        }
        Ok(())
    }
}
