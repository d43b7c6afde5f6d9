//! Work items and the records crawlers emit

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Version tag written into every checkpoint line
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// DNA value the contract reports before a unicorn's genes are settled
pub const PLACEHOLDER_DNA: &str = "2";

/// True when a DNA value carries no usable genes
pub fn is_placeholder_dna(dna: &str) -> bool {
    dna.is_empty() || dna == PLACEHOLDER_DNA
}

/// One unit of fetch work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub token_id: u64,
    /// DNA argument for lookups keyed by genes rather than token ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dna: Option<String>,
    /// Block the upstream value was read at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Live DNA seen by an earlier report run (report verification)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_before: Option<String>,
}

impl WorkItem {
    pub fn new(token_id: u64) -> Self {
        Self {
            token_id,
            dna: None,
            block_number: None,
            live_before: None,
        }
    }

    /// Expand an inclusive token ID range
    pub fn range(start: u64, end: u64) -> Result<Vec<Self>> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        Ok((start..=end).map(Self::new).collect())
    }

    /// Derive a work item from an upstream stage's record
    ///
    /// DNA records become body-part lookups pinned to the block the DNA was
    /// read at. DNA reports become verification items carrying the live DNA
    /// observed at that time. Other kinds have no downstream lookup.
    pub fn from_record(record: &CheckpointRecord) -> Option<Self> {
        match &record.payload {
            Payload::Dna { dna } => Some(Self {
                token_id: record.token_id,
                dna: Some(dna.clone()),
                block_number: Some(record.block_number),
                live_before: None,
            }),
            Payload::DnaReport { live, .. } => Some(Self {
                token_id: record.token_id,
                dna: None,
                block_number: None,
                live_before: Some(live.clone()),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Dna,
    Metadata,
    MythicBodyParts,
    DnaReport,
    Shadowcorn,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Dna => write!(f, "dna"),
            RecordKind::Metadata => write!(f, "metadata"),
            RecordKind::MythicBodyParts => write!(f, "mythic_body_parts"),
            RecordKind::DnaReport => write!(f, "dna_report"),
            RecordKind::Shadowcorn => write!(f, "shadowcorn"),
        }
    }
}

/// Kind-specific fields of a checkpoint record
///
/// uint256 values are kept as decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Dna {
        dna: String,
    },
    Metadata {
        lifecycle_stage: u64,
        class_number: u64,
    },
    MythicBodyParts {
        dna: String,
        num_mythic_body_parts: u64,
    },
    DnaReport {
        predictive: String,
        live: String,
        canonical: String,
        cached: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        live_before: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consistent: Option<bool>,
    },
    Shadowcorn {
        uri: String,
        metadata: serde_json::Value,
    },
}

impl Payload {
    pub fn kind(&self) -> RecordKind {
        match self {
            Payload::Dna { .. } => RecordKind::Dna,
            Payload::Metadata { .. } => RecordKind::Metadata,
            Payload::MythicBodyParts { .. } => RecordKind::MythicBodyParts,
            Payload::DnaReport { .. } => RecordKind::DnaReport,
            Payload::Shadowcorn { .. } => RecordKind::Shadowcorn,
        }
    }

    /// Whether the payload is populated well enough to be replayed from a checkpoint
    pub fn is_complete(&self) -> bool {
        match self {
            Payload::Dna { dna } => !is_placeholder_dna(dna),
            Payload::Metadata { .. } => true,
            Payload::MythicBodyParts { dna, .. } => !is_placeholder_dna(dna),
            Payload::DnaReport {
                predictive,
                live_before,
                ..
            } => !predictive.is_empty() && (predictive != "0" || live_before.is_some()),
            Payload::Shadowcorn { uri, metadata } => !uri.is_empty() && metadata.is_object(),
        }
    }
}

/// A persisted result for one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub schema_version: u32,
    pub token_id: u64,
    pub block_number: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

impl CheckpointRecord {
    pub fn new(token_id: u64, block_number: u64, payload: Payload) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            token_id,
            block_number,
            payload,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }
}

/// A failed fetch, surfaced to the operator and never checkpointed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub token_id: u64,
    pub block_number: u64,
    pub kind: RecordKind,
    pub error: String,
}

impl ErrorRecord {
    pub fn new(token_id: u64, block_number: u64, kind: RecordKind, error: impl Into<String>) -> Self {
        Self {
            token_id,
            block_number,
            kind,
            error: error.into(),
        }
    }
}

/// Result of fetching one work item
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(CheckpointRecord),
    Failure(ErrorRecord),
}

impl FetchOutcome {
    pub fn token_id(&self) -> u64 {
        match self {
            FetchOutcome::Success(record) => record.token_id,
            FetchOutcome::Failure(error) => error.token_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    /// Split outcomes into records and errors, keeping relative order
    pub fn partition(
        outcomes: impl IntoIterator<Item = FetchOutcome>,
    ) -> (Vec<CheckpointRecord>, Vec<ErrorRecord>) {
        let mut records = Vec::new();
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                FetchOutcome::Success(record) => records.push(record),
                FetchOutcome::Failure(error) => errors.push(error),
            }
        }
        (records, errors)
    }
}
