//! Merge stage: join crawled datasets by token ID
//!
//! Rules that need fields from more than one dataset are applied here rather
//! than in the crawlers, since each crawler only sees its own data.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::record::{CheckpointRecord, Payload};
use crate::Result;

/// Lifecycle stage of an unhatched egg
pub const EGG_LIFECYCLE_STAGE: u64 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRules {
    /// Unicorn classes that count as hidden
    pub hidden_classes: BTreeSet<u64>,
}

impl Default for MergeRules {
    fn default() -> Self {
        Self {
            hidden_classes: [1, 5, 8].into_iter().collect(),
        }
    }
}

impl MergeRules {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Metadata and body-part data for one unicorn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub token_id: u64,
    pub lifecycle_stage: u64,
    pub class_number: u64,
    pub dna: String,
    pub num_mythic_body_parts: u64,
    pub metadata_block_number: u64,
    pub mythic_body_parts_block_number: u64,
    pub is_mythic: bool,
    pub is_hidden_class: bool,
}

/// A primary record that could not be merged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeError {
    pub token_id: u64,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub merged: Vec<MergedRecord>,
    pub errors: Vec<MergeError>,
}

/// Rows of a keyed join, each primary record with its secondary matches
#[derive(Debug)]
pub struct Join<'a> {
    pub rows: Vec<(&'a CheckpointRecord, Vec<&'a CheckpointRecord>)>,
    pub errors: Vec<MergeError>,
}

/// Index records by token ID; a later record for the same token wins
pub fn index_by_token(records: &[CheckpointRecord]) -> BTreeMap<u64, &CheckpointRecord> {
    records.iter().map(|r| (r.token_id, r)).collect()
}

/// Join `primary` against each named secondary dataset
///
/// Every primary key must be present in every secondary. Keys missing from
/// any secondary are reported and left out of the rows.
pub fn join<'a>(
    primary: &'a [CheckpointRecord],
    secondaries: &[(&str, &'a [CheckpointRecord])],
) -> Join<'a> {
    let primary_index = index_by_token(primary);
    let secondary_indices: Vec<(&str, BTreeMap<u64, &'a CheckpointRecord>)> = secondaries
        .iter()
        .map(|(name, records)| (*name, index_by_token(*records)))
        .collect();

    let mut rows = Vec::with_capacity(primary_index.len());
    let mut errors = Vec::new();

    'primary: for (token_id, record) in primary_index {
        let mut matches = Vec::with_capacity(secondary_indices.len());
        for (name, index) in &secondary_indices {
            match index.get(&token_id) {
                Some(matched) => matches.push(*matched),
                None => {
                    warn!(token_id, dataset = *name, "Token ID missing from secondary dataset");
                    errors.push(MergeError {
                        token_id,
                        error: format!("Token ID in primary dataset but not in {}: {}", name, token_id),
                    });
                    continue 'primary;
                }
            }
        }
        rows.push((record, matches));
    }

    Join { rows, errors }
}

/// Merge unicorn metadata with mythic body-part counts
pub fn merge(
    metadata: &[CheckpointRecord],
    mythic_body_parts: &[CheckpointRecord],
    rules: &MergeRules,
) -> MergeReport {
    let joined = join(metadata, &[("mythic-body-parts", mythic_body_parts)]);
    let mut report = MergeReport {
        merged: Vec::with_capacity(joined.rows.len()),
        errors: joined.errors,
    };

    for (primary, secondaries) in joined.rows {
        let parts = secondaries[0];
        match (&primary.payload, &parts.payload) {
            (
                Payload::Metadata {
                    lifecycle_stage,
                    class_number,
                },
                Payload::MythicBodyParts {
                    dna,
                    num_mythic_body_parts,
                },
            ) => {
                let num_mythic_body_parts = if *lifecycle_stage == EGG_LIFECYCLE_STAGE {
                    0
                } else {
                    *num_mythic_body_parts
                };
                report.merged.push(MergedRecord {
                    token_id: primary.token_id,
                    lifecycle_stage: *lifecycle_stage,
                    class_number: *class_number,
                    dna: dna.clone(),
                    num_mythic_body_parts,
                    metadata_block_number: primary.block_number,
                    mythic_body_parts_block_number: parts.block_number,
                    is_mythic: num_mythic_body_parts > 0,
                    is_hidden_class: rules.hidden_classes.contains(class_number),
                });
            }
            (left, right) => {
                warn!(
                    token_id = primary.token_id,
                    primary = %left.kind(),
                    secondary = %right.kind(),
                    "Unexpected record kinds in merge"
                );
                report.errors.push(MergeError {
                    token_id: primary.token_id,
                    error: format!(
                        "Expected metadata and mythic_body_parts records, got {} and {}",
                        left.kind(),
                        right.kind()
                    ),
                });
            }
        }
    }

    report
}
