//! autocorns-core: Record types and offline stages for the Crypto Unicorns bots
//!
//! This crate holds everything that does not talk to a chain or an HTTP API:
//! - Work items and the tagged checkpoint / error records the crawlers produce
//! - The NDJSON checkpoint store (load, filter, leak, skip, save)
//! - The merge stage joining crawled datasets by token ID
//! - Leaderboard scoring with versioned, file-loadable rules
//! - Shadowcorn metadata parsing and rarity multipliers
//!
//! # Checkpoint lifecycle
//!
//! ```text
//! load -> filter_validity -> filter_fresh -> filter_superseded -> leak -> apply
//!                                                                          |
//!            save <- carried records + newly fetched records <- fetch <----+
//! ```
//!
//! Each stage owns its checkpoint file exclusively. Downstream stages only read
//! upstream outputs.

mod error;
mod record;

pub mod checkpoint;
pub mod merge;
pub mod ndjson;
pub mod rarity;
pub mod score;

pub use checkpoint::{CheckpointStore, LoadedCheckpoint};
pub use error::Error;
pub use merge::{MergeError, MergeReport, MergeRules, MergedRecord};
pub use rarity::{LeaderboardRow, Rarity, RarityMultipliers};
pub use record::{
    is_placeholder_dna, CheckpointRecord, ErrorRecord, FetchOutcome, Payload, RecordKind,
    WorkItem, CHECKPOINT_SCHEMA_VERSION, PLACEHOLDER_DNA,
};
pub use score::{EventLog, GameEvent, PointsData, ScoreEntry, ScoredEvent, ScoringRules};

pub type Result<T> = std::result::Result<T, Error>;
