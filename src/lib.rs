//! autocorns: Crypto Unicorns data crawlers and leaderboard bots
//!
//! The work lives in the member crates:
//! - [`core`]: records, checkpoints, merge, scoring, rarity
//! - [`crawler`]: contract calls, batching, the fetch pipeline, and the `autocorns` binary
//! - [`moonstream`]: Query API and leaderboard clients

pub use autocorns_core as core;
pub use autocorns_crawler as crawler;
pub use autocorns_moonstream as moonstream;
