//! Error types for autocorns-crawler

use std::time::Duration;

use alloy_transport::{RpcError, TransportError};
use thiserror::Error;

/// JSON-RPC error codes providers use for throttling
const RATE_LIMIT_CODES: [i64; 2] = [429, -32005];

const TRANSIENT_MESSAGES: [&str; 5] = [
    "rate limit",
    "timeout",
    "header not found",
    "too many requests",
    "try again",
];

/// Failure of one remote call (a single eth_call or one aggregated chunk)
#[derive(Error, Debug)]
pub enum CallError {
    #[error("RPC error: {0}")]
    Rpc(#[from] TransportError),

    #[error("ABI error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("Aggregated reply has {got} results for {expected} calls")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),
}

impl CallError {
    /// Whether retrying the same call could succeed
    ///
    /// Connection failures, empty responses, throttling and lagging nodes are
    /// transient. Reverts, malformed replies and everything else are not.
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::Rpc(RpcError::Transport(_)) | CallError::Rpc(RpcError::NullResp) => true,
            CallError::Rpc(RpcError::ErrorResp(payload)) => {
                if RATE_LIMIT_CODES.contains(&payload.code) {
                    return true;
                }
                let message = payload.message.to_lowercase();
                TRANSIENT_MESSAGES.iter().any(|m| message.contains(m))
            }
            CallError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Preconditions checked before any remote work starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No {0} contract address configured for this network")]
    MissingAddress(&'static str),

    #[error("Chunk size must be at least 1")]
    InvalidChunkSize,

    #[error("Number of workers must be at least 1")]
    InvalidWorkers,

    #[error("Leak rate {0} is outside [0, 1]")]
    InvalidLeakRate(f64),

    #[error("Retry multiplier {0} must be at least 1")]
    InvalidMultiplier(f64),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Core(#[from] autocorns_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Value out of range: {0}")]
    OutOfRange(String),
}
