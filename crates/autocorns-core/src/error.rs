//! Error types for autocorns-core

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed line {line} in {path}: {source}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error("Starting token ID {start} must not exceed ending token ID {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("Invalid token URI: {0}")]
    InvalidTokenUri(String),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid score for {address}: {value}")]
    InvalidScore { address: String, value: String },
}
