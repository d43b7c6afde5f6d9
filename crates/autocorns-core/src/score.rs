//! Leaderboard scoring from game event logs
//!
//! Point values change from one leaderboard event to the next, so they are
//! carried in a versioned [`ScoringRules`] file instead of being fixed here.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::merge::MergedRecord;
use crate::rarity::RarityMultipliers;
use crate::Result;

pub const EVENT_BREEDING: &str = "breeding";
pub const EVENT_HATCHING: &str = "hatchingEggs";

/// Point values for one leaderboard event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRules {
    /// Identifies the ruleset a leaderboard was computed with
    pub version: String,
    pub breeding_points: u64,
    pub hatch_points: u64,
    pub mythic_hatch_points: u64,
    #[serde(default)]
    pub rarity_multipliers: RarityMultipliers,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            version: "sob-milestone-1".to_string(),
            breeding_points: 50,
            hatch_points: 0,
            mythic_hatch_points: 20,
            rarity_multipliers: RarityMultipliers::default(),
        }
    }
}

impl ScoringRules {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

/// One row of an event query result
///
/// Only `event_type` is required. Rows of types that are not scored may omit
/// the other columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub event_type: String,
    #[serde(default)]
    pub player_wallet: Option<String>,
    #[serde(default, deserialize_with = "token_key")]
    pub token: Option<String>,
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// Event query results as delivered by the query API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    #[serde(default)]
    pub data: Vec<GameEvent>,
}

impl EventLog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// An event with its points already assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredEvent {
    pub player: String,
    pub milestone_1: u64,
    pub block_number: u64,
    /// Hatch of a mythic unicorn
    pub is_mythic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointsData {
    pub milestone_1: u64,
    pub num_breeds: u64,
    pub num_hatches: u64,
    pub num_mythic_hatches: u64,
    /// Block of the first event seen for the player
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity_multiplier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub address: String,
    pub score: u64,
    pub points_data: PointsData,
}

/// Accumulate per-player points and rank them
///
/// Players are bucketed in first-seen order (breeding events, then hatching
/// events) and the stable sort keeps that order among equal scores.
pub fn accumulate(breeding: &[ScoredEvent], hatching: &[ScoredEvent]) -> Vec<ScoreEntry> {
    let mut order: Vec<String> = Vec::new();
    let mut points: HashMap<String, PointsData> = HashMap::new();

    let mut bucket = |event: &ScoredEvent| -> String {
        if !points.contains_key(&event.player) {
            order.push(event.player.clone());
            points.insert(
                event.player.clone(),
                PointsData {
                    block_number: event.block_number,
                    ..PointsData::default()
                },
            );
        }
        event.player.clone()
    };

    let mut breeding_players = Vec::with_capacity(breeding.len());
    for event in breeding {
        breeding_players.push(bucket(event));
    }
    let mut hatching_players = Vec::with_capacity(hatching.len());
    for event in hatching {
        hatching_players.push(bucket(event));
    }

    for (event, player) in breeding.iter().zip(breeding_players) {
        if let Some(entry) = points.get_mut(&player) {
            entry.milestone_1 += event.milestone_1;
            entry.num_breeds += 1;
        }
    }
    for (event, player) in hatching.iter().zip(hatching_players) {
        if let Some(entry) = points.get_mut(&player) {
            entry.milestone_1 += event.milestone_1;
            entry.num_hatches += 1;
            if event.is_mythic {
                entry.num_mythic_hatches += 1;
            }
        }
    }

    let mut scores: Vec<ScoreEntry> = order
        .into_iter()
        .filter_map(|player| {
            points.remove(&player).map(|points_data| ScoreEntry {
                address: player,
                score: points_data.milestone_1,
                points_data,
            })
        })
        .collect();

    scores.sort_by(|a, b| b.score.cmp(&a.score));
    scores
}

/// Score breeding and hatching events against the merged unicorn dataset
///
/// A hatch earns mythic points when the hatched token is mythic in `merged`.
/// Other event types are ignored.
pub fn score_events(
    events: &[GameEvent],
    merged: &[MergedRecord],
    rules: &ScoringRules,
) -> Vec<ScoreEntry> {
    let mythic_tokens: HashSet<String> = merged
        .iter()
        .filter(|r| r.is_mythic)
        .map(|r| r.token_id.to_string())
        .collect();

    let mut breeding = Vec::new();
    let mut hatching = Vec::new();

    for event in events {
        let scored = event.event_type == EVENT_BREEDING || event.event_type == EVENT_HATCHING;
        if !scored {
            continue;
        }
        let (player, block_number) = match (&event.player_wallet, event.block_number) {
            (Some(player), Some(block_number)) => (player.clone(), block_number),
            _ => {
                warn!(event_type = %event.event_type, "Skipping event without player or block number");
                continue;
            }
        };

        if event.event_type == EVENT_BREEDING {
            breeding.push(ScoredEvent {
                player,
                milestone_1: rules.breeding_points,
                block_number,
                is_mythic: false,
            });
        } else {
            let is_mythic = event
                .token
                .as_ref()
                .is_some_and(|token| mythic_tokens.contains(token));
            hatching.push(ScoredEvent {
                player,
                milestone_1: if is_mythic {
                    rules.mythic_hatch_points
                } else {
                    rules.hatch_points
                },
                block_number,
                is_mythic,
            });
        }
    }

    accumulate(&breeding, &hatching)
}

/// Accept token IDs given either as JSON strings or numbers
fn token_key<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
