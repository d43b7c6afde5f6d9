//! Shadowcorn rarity and leaderboard multipliers
//!
//! Shadowcorn token URIs embed their metadata as base64 JSON. The Throwing
//! Shade leaderboard is keyed by Shadowcorn token ID, so multipliers are
//! looked up by the row's `address` field holding that ID.

use std::collections::HashMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::record::{CheckpointRecord, Payload};
use crate::{Error, Result};

/// Prefix of an inline JSON token URI
pub const METADATA_PREFIX: &str = "data:application/json;base64,";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Unknown,
    Common,
    Rare,
    Mythic,
}

impl Rarity {
    fn from_trait_value(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "common" => Rarity::Common,
            "rare" => Rarity::Rare,
            "mythic" => Rarity::Mythic,
            _ => Rarity::Unknown,
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rarity::Unknown => write!(f, "unknown"),
            Rarity::Common => write!(f, "common"),
            Rarity::Rare => write!(f, "rare"),
            Rarity::Mythic => write!(f, "mythic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RarityMultipliers {
    pub common: f64,
    pub rare: f64,
    pub mythic: f64,
    pub unknown: f64,
}

impl Default for RarityMultipliers {
    fn default() -> Self {
        Self {
            common: 1.0,
            rare: 1.2,
            mythic: 1.5,
            unknown: 1.0,
        }
    }
}

impl RarityMultipliers {
    pub fn get(&self, rarity: Rarity) -> f64 {
        match rarity {
            Rarity::Common => self.common,
            Rarity::Rare => self.rare,
            Rarity::Mythic => self.mythic,
            Rarity::Unknown => self.unknown,
        }
    }
}

/// Decode the JSON metadata embedded in a token URI
pub fn parse_token_uri(uri: &str) -> Result<Value> {
    let encoded = uri
        .strip_prefix(METADATA_PREFIX)
        .ok_or_else(|| Error::InvalidTokenUri(truncate(uri)))?;
    let decoded = STANDARD.decode(encoded.trim())?;
    Ok(serde_json::from_slice(&decoded)?)
}

/// Rarity from the `rarity` attribute of a Shadowcorn's metadata
///
/// The last matching attribute wins; no match means [`Rarity::Unknown`].
pub fn rarity(metadata: &Value) -> Rarity {
    let Some(attributes) = metadata.get("attributes").and_then(Value::as_array) else {
        return Rarity::Unknown;
    };

    attributes
        .iter()
        .filter(|attribute| {
            attribute
                .get("trait_type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case("rarity"))
        })
        .filter_map(|attribute| attribute.get("value").and_then(Value::as_str))
        .last()
        .map(Rarity::from_trait_value)
        .unwrap_or(Rarity::Unknown)
}

/// Multiplier per Shadowcorn token ID, from shadowcorn checkpoint records
pub fn multipliers_from_records(
    records: &[CheckpointRecord],
    multipliers: &RarityMultipliers,
) -> HashMap<String, f64> {
    records
        .iter()
        .filter_map(|record| match &record.payload {
            Payload::Shadowcorn { metadata, .. } => Some((
                record.token_id.to_string(),
                multipliers.get(rarity(metadata)),
            )),
            _ => None,
        })
        .collect()
}

/// One row of a leaderboard produced by a query
///
/// Scores may arrive as numbers or strings, and `points_data` carries
/// whatever fields the query emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub address: String,
    pub score: Value,
    #[serde(default)]
    pub points_data: Map<String, Value>,
}

impl LeaderboardRow {
    fn score_value(&self) -> Result<f64> {
        let parsed = match &self.score {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| Error::InvalidScore {
            address: self.address.clone(),
            value: self.score.to_string(),
        })
    }
}

/// Scale each row's score by its multiplier
///
/// Scores are written back as integer strings, truncated toward zero.
/// Rows without a multiplier keep a multiplier of 1.0; their addresses are
/// returned so the caller can report them.
pub fn apply_rarity_multipliers(
    rows: &mut [LeaderboardRow],
    multipliers: &HashMap<String, f64>,
) -> Result<Vec<String>> {
    let mut missing = Vec::new();

    for row in rows.iter_mut() {
        let multiplier = match multipliers.get(&row.address) {
            Some(m) => *m,
            None => {
                warn!(address = %row.address, "No rarity multiplier for leaderboard row");
                missing.push(row.address.clone());
                1.0
            }
        };

        let scaled = (multiplier * row.score_value()?).trunc() as i64;
        row.points_data.insert(
            "rarity_multiplier".to_string(),
            Value::String(format_multiplier(multiplier)),
        );
        row.score = Value::String(scaled.to_string());
    }

    Ok(missing)
}

fn format_multiplier(multiplier: f64) -> String {
    if multiplier.fract() == 0.0 {
        format!("{:.1}", multiplier)
    } else {
        multiplier.to_string()
    }
}

fn truncate(uri: &str) -> String {
    uri.chars().take(64).collect()
}
