//! autocorns-moonstream: HTTP clients for Moonstream
//!
//! - [`QueryClient`] starts a Query API data update and polls for the result
//! - [`LeaderboardClient`] pushes scores to an Engine API leaderboard
//!
//! Both authenticate with a bearer access token.

pub mod config;
mod error;
pub mod leaderboard;
pub mod query;

pub use config::MoonstreamConfig;
pub use error::{MoonstreamError, Result};
pub use leaderboard::LeaderboardClient;
pub use query::{event_params, session_params, QueryClient};
