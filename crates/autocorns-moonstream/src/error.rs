//! Error types for autocorns-moonstream

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MoonstreamError {
    #[error("No Moonstream access token; set MOONSTREAM_ACCESS_TOKEN")]
    MissingAccessToken,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Failed to retrieve data after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MoonstreamError>;
