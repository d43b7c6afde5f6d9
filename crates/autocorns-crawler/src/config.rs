//! Crawler configuration

use std::path::Path;
use std::time::Duration;

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::Result;

/// Crypto Unicorns diamond on Polygon mainnet
pub const POLYGON_UNICORNS: Address = address!("dC0479CC5BbA033B3e7De9F178607150B3AbCe1f");
/// Multicall2 on Polygon mainnet
pub const POLYGON_MULTICALL2: Address = address!("c8E51042792d7405184DfCa245F2d27B94D013b6");
/// Multicall2 on Mumbai
pub const MUMBAI_MULTICALL2: Address = address!("e9939e7Ea7D7fb619Ac57f648Da7B1D425832631");

/// 43200 blocks is roughly 24 hours of Polygon blocks
pub const DEFAULT_CACHE_LIVENESS: u64 = 43_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Chunks issued as aggregated tryAggregate calls
    #[default]
    Multicall,
    /// One eth_call per item through a bounded worker pool
    Pool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub rpc_url: String,
    pub unicorns: Option<Address>,
    pub multicall: Address,
    pub shadowcorns: Option<Address>,
    /// Block to read at, chain head when unset
    pub block_number: Option<u64>,
    pub chunk_size: usize,
    pub num_workers: usize,
    /// Deadline for a whole worker-pool batch, in seconds
    pub timeout_secs: u64,
    /// Blocks a checkpointed DNA stays fresh for
    pub cache_liveness: u64,
    pub leak_rate: f64,
    /// Seed for the leak RNG, for reproducible runs
    pub leak_seed: Option<u64>,
    pub fetch_mode: FetchMode,
    pub retry: RetryPolicy,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self::polygon()
    }
}

impl CrawlerConfig {
    pub fn polygon() -> Self {
        Self {
            rpc_url: "https://polygon-rpc.com".into(),
            unicorns: Some(POLYGON_UNICORNS),
            multicall: POLYGON_MULTICALL2,
            shadowcorns: None,
            block_number: None,
            chunk_size: 1000,
            num_workers: 1,
            timeout_secs: 30,
            cache_liveness: DEFAULT_CACHE_LIVENESS,
            leak_rate: 0.0,
            leak_seed: None,
            fetch_mode: FetchMode::Multicall,
            retry: RetryPolicy::default(),
        }
    }

    pub fn mumbai() -> Self {
        Self {
            rpc_url: "https://rpc-mumbai.maticvigil.com".into(),
            unicorns: None,
            multicall: MUMBAI_MULTICALL2,
            ..Self::polygon()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }
        if !(0.0..=1.0).contains(&self.leak_rate) {
            return Err(ConfigError::InvalidLeakRate(self.leak_rate));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.retry.multiplier));
        }
        Ok(())
    }

    pub fn unicorns_address(&self) -> std::result::Result<Address, ConfigError> {
        self.unicorns.ok_or(ConfigError::MissingAddress("unicorns"))
    }

    pub fn shadowcorns_address(&self) -> std::result::Result<Address, ConfigError> {
        self.shadowcorns.ok_or(ConfigError::MissingAddress("shadowcorns"))
    }
}
